//! # docwire-bson
//!
//! BSON 文档格式与类映射序列化框架。
//!
//! - **值模型**: `BsonValue` 覆盖全部 BSON 类型, `Document` 保持插入顺序
//! - **二进制编解码**: `BinaryWriter`/`BinaryReader` 状态机, 长度前缀回填, O(1) 跳过
//! - **JSON 编解码**: strict / shell / canonical / relaxed 四种文本模式
//! - **序列化注册表**: 类映射、约定管线、鉴别器、id 生成器
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use docwire_bson::serialization::{ClassMapBuilder, ClassMapped, SerializerRegistry};
//!
//! #[derive(Default, Clone, PartialEq, Debug)]
//! struct Person {
//!     id: ObjectId,
//!     name: String,
//! }
//!
//! impl ClassMapped for Person {
//!     fn map_class(cm: &mut ClassMapBuilder<Self>) {
//!         cm.map_member("Id", |p| &p.id, |p, v| p.id = v);
//!         cm.map_member("Name", |p| &p.name, |p, v| p.name = v);
//!     }
//! }
//!
//! let registry = SerializerRegistry::new();
//! let bytes = registry.to_vec(&person)?;
//! let back: Person = registry.from_slice(&bytes)?;
//! ```

pub mod binary;
pub mod codec;
pub mod compat;
pub mod datetime;
pub mod de;
pub mod decimal128;
pub mod document;
pub mod io;
pub mod json;
pub mod raw;
pub mod ser;
pub mod serialization;
pub mod spec;
pub mod value;

pub use binary::Binary;
pub use codec::{decode_document, encode_document};
pub use datetime::BsonDateTime;
pub use decimal128::Decimal128;
pub use docwire_common::{GuidRepresentation, JsonOutputMode, ObjectId};
pub use document::Document;
pub use raw::{RawDocument, RawDocumentBuf};
pub use spec::{BinarySubtype, ElementType};
pub use value::{BsonValue, JavaScriptCodeWithScope, Regex, Timestamp};

use docwire_common::DocwireError;
use std::sync::Arc;
use thiserror::Error;

/// 错误分类
///
/// 调用方据此决定恢复策略: 格式错误与模式错误针对单个文档,
/// 配置错误表示程序缺陷, 应在类映射构建时暴露。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 输入字节或文本格式损坏
    Format,
    /// 文档结构与类映射不符
    Schema,
    /// 数值或时间超出可表示范围
    Range,
    /// 类映射或注册表配置非法
    Configuration,
    /// API 调用顺序错误
    Usage,
    /// 底层流读写失败
    Io,
}

/// BSON 操作的错误类型
#[derive(Error, Debug, Clone)]
pub enum BsonError {
    /// IO 操作错误
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// 输入在读取完成前结束
    #[error("Unexpected end of input at offset {offset}: needed {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },

    /// 无效的元素类型标记
    #[error("Invalid element type 0x{byte:02x} at offset {offset}")]
    InvalidElementType { byte: u8, offset: usize },

    /// 字符串不是有效的 UTF-8 编码
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// 长度前缀非法
    #[error("Invalid size {size} at offset {offset}: {reason}")]
    InvalidSize {
        size: i64,
        offset: usize,
        reason: &'static str,
    },

    /// C 字符串缺少结尾 0x00
    #[error("Unterminated C string at offset {0}")]
    UnterminatedCString(usize),

    /// 文档格式无效
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// JSON 文本语法错误
    #[error("JSON syntax error at position {position}: {message}")]
    JsonSyntax { position: usize, message: String },

    /// ObjectId 格式无效
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// Decimal128 文本或位模式无效
    #[error("Invalid Decimal128: {0}")]
    InvalidDecimal128(String),

    /// 嵌套层级过深
    #[error("Maximum nesting depth of {0} exceeded")]
    MaxDepthExceeded(usize),

    /// 文档体积超出限制
    #[error("Document size {size} is larger than the maximum of {max} bytes")]
    DocumentTooLarge { size: usize, max: usize },

    /// 元素名称非法
    #[error("Invalid element name {name:?}: {reason}")]
    InvalidElementName { name: String, reason: String },

    /// 读写器状态不允许该操作
    #[error("{operation} cannot be called when {detail}")]
    InvalidState {
        operation: &'static str,
        detail: String,
    },

    /// 序列化器收到不匹配的值类型
    #[error("Serializer for {expected} received a value of another type")]
    ValueTypeMismatch { expected: String },

    /// 缺少必需元素
    #[error("Required element '{element}' for class {class} is missing")]
    MissingRequiredElement { class: String, element: String },

    /// 遇到类映射中不存在的元素
    #[error("Element '{element}' does not match any field or property of class {class}")]
    UnexpectedElement { class: String, element: String },

    /// 鉴别器无法解析为已知类型
    #[error("Unknown discriminator value '{discriminator}' for {class}")]
    UnknownDiscriminator {
        class: String,
        discriminator: String,
    },

    /// BSON 类型与目标类型不匹配
    #[error("Cannot deserialize a '{target}' from BsonType '{actual}'")]
    UnexpectedBsonType { target: String, actual: ElementType },

    /// 成员反序列化失败
    #[error("An error occurred while deserializing the {member} member of class {class}: {source}")]
    Member {
        class: String,
        member: String,
        source: Box<BsonError>,
    },

    /// 值超出可表示范围
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// 类映射已冻结
    #[error("Class map for {0} has been frozen and can no longer be modified")]
    ClassMapFrozen(String),

    /// 元素名重复
    #[error("The element name '{element}' of member {member} of class {class} is already used by member {other}")]
    DuplicateElementName {
        class: String,
        element: String,
        member: String,
        other: String,
    },

    /// 重复声明 id 成员
    #[error("Class {class} already has an id member {existing}")]
    DuplicateIdMember { class: String, existing: String },

    /// 重复声明额外元素成员
    #[error("Class {class} already has an extra elements member {existing}")]
    DuplicateExtraElementsMember { class: String, existing: String },

    /// 额外元素成员类型非法
    #[error("Extra elements member {member} of class {class} must be of type Document")]
    InvalidExtraElementsMember { class: String, member: String },

    /// 成员不存在
    #[error("Class {class} has no member named {member}")]
    UnknownMember { class: String, member: String },

    /// 成员声明类型与请求类型不符
    #[error("Member {member} of class {class} is not of type {requested}")]
    MemberTypeMismatch {
        class: String,
        member: String,
        requested: String,
    },

    /// 序列化器重复注册
    #[error("There is already a serializer registered for type {0}")]
    SerializerAlreadyRegistered(String),

    /// 类映射重复注册
    #[error("A class map for {0} has already been registered")]
    ClassMapAlreadyRegistered(String),

    /// 类型不支持给定的序列化选项
    #[error("Serializer for {type_name} does not support serialization options {options}")]
    UnsupportedOptions { type_name: String, options: String },

    /// 已知类型之间存在环
    #[error("Circular known type reference detected while building the class map for {0}")]
    CircularClassMap(String),

    /// 其他配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// serde 序列化过程错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// serde 反序列化过程错误
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl BsonError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BsonError::Io(_) => ErrorCategory::Io,
            BsonError::UnexpectedEof { .. }
            | BsonError::InvalidElementType { .. }
            | BsonError::InvalidUtf8 { .. }
            | BsonError::InvalidSize { .. }
            | BsonError::UnterminatedCString(_)
            | BsonError::InvalidDocument(_)
            | BsonError::JsonSyntax { .. }
            | BsonError::InvalidObjectId(_)
            | BsonError::InvalidDecimal128(_)
            | BsonError::MaxDepthExceeded(_)
            | BsonError::DocumentTooLarge { .. }
            | BsonError::InvalidElementName { .. } => ErrorCategory::Format,
            BsonError::InvalidState { .. } | BsonError::ValueTypeMismatch { .. } => {
                ErrorCategory::Usage
            }
            BsonError::MissingRequiredElement { .. }
            | BsonError::UnexpectedElement { .. }
            | BsonError::UnknownDiscriminator { .. }
            | BsonError::UnexpectedBsonType { .. }
            | BsonError::Serialization(_)
            | BsonError::Deserialization(_) => ErrorCategory::Schema,
            BsonError::Member { source, .. } => source.category(),
            BsonError::OutOfRange(_) => ErrorCategory::Range,
            BsonError::ClassMapFrozen(_)
            | BsonError::DuplicateElementName { .. }
            | BsonError::DuplicateIdMember { .. }
            | BsonError::DuplicateExtraElementsMember { .. }
            | BsonError::InvalidExtraElementsMember { .. }
            | BsonError::UnknownMember { .. }
            | BsonError::MemberTypeMismatch { .. }
            | BsonError::SerializerAlreadyRegistered(_)
            | BsonError::ClassMapAlreadyRegistered(_)
            | BsonError::UnsupportedOptions { .. }
            | BsonError::CircularClassMap(_)
            | BsonError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, detail: impl Into<String>) -> Self {
        BsonError::InvalidState {
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn unexpected_type(target: impl Into<String>, actual: ElementType) -> Self {
        BsonError::UnexpectedBsonType {
            target: target.into(),
            actual,
        }
    }

    /// 去掉成员包装, 返回最内层错误
    pub fn root_cause(&self) -> &BsonError {
        match self {
            BsonError::Member { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for BsonError {
    fn from(err: std::io::Error) -> Self {
        BsonError::Io(Arc::new(err))
    }
}

impl From<DocwireError> for BsonError {
    fn from(err: DocwireError) -> Self {
        match err {
            DocwireError::Io(e) => BsonError::from(e),
            DocwireError::InvalidObjectId(msg) => BsonError::InvalidObjectId(msg),
            DocwireError::Validation(msg) | DocwireError::Config(msg) => {
                BsonError::Configuration(msg)
            }
        }
    }
}

/// BSON 操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_error_keeps_inner_category() {
        let inner = BsonError::OutOfRange("too big".to_string());
        let wrapped = BsonError::Member {
            class: "Order".to_string(),
            member: "Total".to_string(),
            source: Box::new(inner),
        };
        assert_eq!(wrapped.category(), ErrorCategory::Range);
        assert!(matches!(wrapped.root_cause(), BsonError::OutOfRange(_)));
        assert!(wrapped.to_string().contains("Total"));
    }

    #[test]
    fn test_common_error_conversion() {
        let err: BsonError = DocwireError::InvalidObjectId("bad".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Format);
    }
}
