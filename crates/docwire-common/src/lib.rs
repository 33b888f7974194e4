//! docwire 公共模块
//!
//! 提供各 crate 共享的基础设施:
//! - ObjectId 及其进程级生成状态
//! - 数据库/集合名称校验
//! - 统一错误类型 DocwireError
//! - TOML 配置

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{DocwireError, DocwireResult};
pub use types::*;
