//! 错误类型定义模块
//!
//! 定义公共层的错误类型 DocwireError 和 Result 别名。

use thiserror::Error;

/// 公共层错误类型
#[derive(Error, Debug)]
pub enum DocwireError {
    /// I/O 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ObjectId 无效
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// 名称或参数校验失败
    #[error("Validation error: {0}")]
    Validation(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
}

/// 公共层 Result 类型别名
pub type DocwireResult<T> = Result<T, DocwireError>;
