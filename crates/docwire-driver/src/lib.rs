//! # docwire-driver
//!
//! 驱动侧的协议胶水层, 不做套接字 I/O:
//! - `wire`: OP_MSG / OP_QUERY / OP_REPLY 报文的编解码与异步读写
//! - `command`: 经序列化注册表读写的类型化命令与应答
//! - `connection_string`: 连接字符串解析
//! - `init_logging`: 按 `LogConfig` 安装 tracing 订阅者

pub mod command;
pub mod connection_string;
pub mod wire;

pub use docwire_bson as bson;
pub use docwire_common as common;

pub use command::{
    CommandMessage, CommandReply, CursorReply, DocumentSequence, Find, GetMore, Hello,
    HelloReply, Insert, InsertReply, Ping, WriteError,
};
pub use connection_string::{
    AuthMechanism, ConnectionOptions, ConnectionString, Credentials, Host, ReadConcern,
    ReadPreference, ReadPreferenceMode, TlsOptions, WriteConcern, WriteConcernLevel,
};
pub use wire::{
    read_message, write_message, Message, MessageHeader, OpCode, OpMsg, OpQuery, OpReply,
    Payload, Section,
};

use docwire_bson::BsonError;
use docwire_common::{DocwireError, LogConfig, LogFormat};
use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_PORT: u16 = 27017;
/// 服务端未通告时使用的最大报文长度
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 48_000_000;

/// 驱动层错误
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),

    #[error(transparent)]
    Common(#[from] DocwireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 连接字符串无效
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// 报文格式错误
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown opcode {0}")]
    UnknownOpCode(i32),

    #[error("Message size {size} exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// 服务端返回 `ok: 0`
    #[error("Command failed with error {code} ({code_name}): {message}")]
    Command {
        code: i32,
        code_name: String,
        message: String,
    },

    /// 写操作中单个文档失败
    #[error("Write error at index {index} with code {code}: {message}")]
    Write {
        index: i32,
        code: i32,
        message: String,
    },

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// # Brief
/// 安装全局 tracing 订阅者
///
/// 优先使用 `RUST_LOG`, 未设置时使用配置中的级别。
///
/// # Arguments
/// * `config` - 日志配置
///
/// # Returns
/// 已安装过订阅者或级别无法解析时返回错误
pub fn init_logging(config: &LogConfig) -> DriverResult<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| DriverError::Logging(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init(),
    };
    result.map_err(|e| DriverError::Logging(e.to_string()))
}
