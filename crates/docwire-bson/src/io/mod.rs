//! 读写器状态机
//!
//! `BsonWriter` 与 `BsonReader` 是流式的元素级接口, 调用顺序由状态机约束:
//! 写名称之后才能写值, 文档结束前不能结束数组。序列化框架只依赖这两个
//! trait, 二进制与 JSON 表示可以互换。

mod binary_reader;
mod binary_writer;
mod json_reader;
mod json_scanner;
mod json_writer;

pub use binary_reader::{BinaryReader, BinaryReaderSettings};
pub use binary_writer::{BinaryWriter, BinaryWriterSettings};
pub use json_reader::JsonReader;
pub use json_writer::{JsonWriter, JsonWriterSettings};

use crate::binary::Binary;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::spec::ElementType;
use crate::value::{BsonValue, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonDateTime, BsonError, BsonResult};
use docwire_common::{GuidRepresentation, ObjectId};
use smallvec::SmallVec;
use std::fmt;

/// 写入器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// 尚未写入任何内容
    Initial,
    /// 等待元素名
    Name,
    /// 等待元素值
    Value,
    /// 等待 JavaScriptWithScope 的作用域文档
    ScopeDocument,
    /// 顶层文档已写完
    Done,
    Closed,
}

/// 读取器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Initial,
    /// 等待读取元素类型
    Type,
    /// 等待读取元素名
    Name,
    /// 等待读取元素值
    Value,
    /// 等待读取 JavaScriptWithScope 的作用域文档
    ScopeDocument,
    /// 读到文档结尾
    EndOfDocument,
    /// 读到数组结尾
    EndOfArray,
    /// 顶层文档已读完
    Done,
    Closed,
}

/// 嵌套上下文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    TopLevel,
    Document,
    Array,
    JavaScriptWithScope,
    ScopeDocument,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 元素名校验策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameValidation {
    /// 只拒绝包含 0x00 的名称
    #[default]
    Any,
    /// 存储校验: 额外拒绝以 '$' 开头或包含 '.' 的名称
    Storage,
}

impl NameValidation {
    pub fn validate(&self, name: &str) -> BsonResult<()> {
        if name.contains('\0') {
            return Err(BsonError::InvalidElementName {
                name: name.to_string(),
                reason: "element names cannot contain null bytes".to_string(),
            });
        }
        if *self == NameValidation::Storage {
            if name.starts_with('$') {
                return Err(BsonError::InvalidElementName {
                    name: name.to_string(),
                    reason: "element names cannot start with '$'".to_string(),
                });
            }
            if name.contains('.') {
                return Err(BsonError::InvalidElementName {
                    name: name.to_string(),
                    reason: "element names cannot contain '.'".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// 读取器内部的嵌套上下文
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderContext {
    pub(crate) context_type: ContextType,
    pub(crate) start_position: usize,
    pub(crate) size: usize,
}

impl ReaderContext {
    pub(crate) fn end_position(&self) -> usize {
        self.start_position + self.size
    }
}

/// 读取位置书签
///
/// 记录状态、当前类型、当前名称、上下文栈与偏移, 用于前瞻后回退。
#[derive(Debug, Clone)]
pub struct ReaderBookmark {
    pub(crate) state: ReaderState,
    pub(crate) current_type: Option<ElementType>,
    pub(crate) current_name: Option<String>,
    pub(crate) contexts: SmallVec<[ReaderContext; 8]>,
    pub(crate) position: usize,
}

impl ReaderBookmark {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }
}

/// 流式写入接口
pub trait BsonWriter {
    fn state(&self) -> WriterState;

    /// 写入 GUID 时使用的默认表示法
    fn guid_representation(&self) -> GuidRepresentation;

    fn write_name(&mut self, name: &str) -> BsonResult<()>;
    fn write_start_document(&mut self) -> BsonResult<()>;
    fn write_end_document(&mut self) -> BsonResult<()>;
    fn write_start_array(&mut self) -> BsonResult<()>;
    fn write_end_array(&mut self) -> BsonResult<()>;

    fn write_double(&mut self, value: f64) -> BsonResult<()>;
    fn write_string(&mut self, value: &str) -> BsonResult<()>;
    fn write_binary(&mut self, value: &Binary) -> BsonResult<()>;
    fn write_undefined(&mut self) -> BsonResult<()>;
    fn write_object_id(&mut self, value: ObjectId) -> BsonResult<()>;
    fn write_boolean(&mut self, value: bool) -> BsonResult<()>;
    fn write_date_time(&mut self, millis: i64) -> BsonResult<()>;
    fn write_null(&mut self) -> BsonResult<()>;
    fn write_regular_expression(&mut self, value: &Regex) -> BsonResult<()>;
    fn write_javascript(&mut self, code: &str) -> BsonResult<()>;
    /// 写入代码部分, 之后必须紧跟作用域文档
    fn write_javascript_with_scope(&mut self, code: &str) -> BsonResult<()>;
    fn write_symbol(&mut self, value: &str) -> BsonResult<()>;
    fn write_int32(&mut self, value: i32) -> BsonResult<()>;
    fn write_timestamp(&mut self, value: Timestamp) -> BsonResult<()>;
    fn write_int64(&mut self, value: i64) -> BsonResult<()>;
    fn write_decimal128(&mut self, value: Decimal128) -> BsonResult<()>;
    fn write_min_key(&mut self) -> BsonResult<()>;
    fn write_max_key(&mut self) -> BsonResult<()>;

    /// 写入预编码的文档字节
    fn write_raw_document(&mut self, bytes: &[u8]) -> BsonResult<()> {
        let doc = crate::codec::decode_document(bytes)?;
        self.write_document(&doc)
    }

    /// 写入名称与值
    fn write_element(&mut self, name: &str, value: &BsonValue) -> BsonResult<()> {
        self.write_name(name)?;
        self.write_value(value)
    }

    /// 写入完整文档
    fn write_document(&mut self, doc: &Document) -> BsonResult<()> {
        self.write_start_document()?;
        for (name, value) in doc.iter() {
            self.write_name(name)?;
            self.write_value(value)?;
        }
        self.write_end_document()
    }

    /// 按值的类型分派到具体的写方法
    fn write_value(&mut self, value: &BsonValue) -> BsonResult<()> {
        match value {
            BsonValue::Double(v) => self.write_double(*v),
            BsonValue::String(v) => self.write_string(v),
            BsonValue::Document(doc) => self.write_document(doc),
            BsonValue::Array(items) => {
                self.write_start_array()?;
                for item in items {
                    self.write_value(item)?;
                }
                self.write_end_array()
            }
            BsonValue::Binary(v) => self.write_binary(v),
            BsonValue::Undefined => self.write_undefined(),
            BsonValue::ObjectId(v) => self.write_object_id(*v),
            BsonValue::Boolean(v) => self.write_boolean(*v),
            BsonValue::DateTime(v) => self.write_date_time(v.timestamp_millis()),
            BsonValue::Null => self.write_null(),
            BsonValue::RegularExpression(v) => self.write_regular_expression(v),
            BsonValue::JavaScript(code) => self.write_javascript(code),
            BsonValue::JavaScriptWithScope(v) => {
                self.write_javascript_with_scope(&v.code)?;
                self.write_document(&v.scope)
            }
            BsonValue::Symbol(v) => self.write_symbol(v),
            BsonValue::Int32(v) => self.write_int32(*v),
            BsonValue::Timestamp(v) => self.write_timestamp(*v),
            BsonValue::Int64(v) => self.write_int64(*v),
            BsonValue::Decimal128(v) => self.write_decimal128(*v),
            BsonValue::MinKey => self.write_min_key(),
            BsonValue::MaxKey => self.write_max_key(),
        }
    }
}

/// 流式读取接口
pub trait BsonReader {
    fn state(&self) -> ReaderState;

    /// 最近一次 `read_bson_type` 得到的类型
    fn current_bson_type(&self) -> Option<ElementType>;

    fn current_name(&self) -> Option<&str>;

    /// 读取 GUID 时使用的默认表示法
    fn guid_representation(&self) -> GuidRepresentation;

    fn is_at_end_of_file(&self) -> bool;

    /// 读取下一个元素的类型
    ///
    /// 在 Initial、Done 与 ScopeDocument 状态下隐式返回 Document。
    fn read_bson_type(&mut self) -> BsonResult<ElementType>;
    fn read_name(&mut self) -> BsonResult<String>;
    fn skip_name(&mut self) -> BsonResult<()>;
    /// 跳过当前值, 文档与数组利用长度前缀整体跳过
    fn skip_value(&mut self) -> BsonResult<()>;

    fn read_start_document(&mut self) -> BsonResult<()>;
    fn read_end_document(&mut self) -> BsonResult<()>;
    fn read_start_array(&mut self) -> BsonResult<()>;
    fn read_end_array(&mut self) -> BsonResult<()>;

    fn read_double(&mut self) -> BsonResult<f64>;
    fn read_string(&mut self) -> BsonResult<String>;
    fn read_binary(&mut self) -> BsonResult<Binary>;
    fn read_undefined(&mut self) -> BsonResult<()>;
    fn read_object_id(&mut self) -> BsonResult<ObjectId>;
    fn read_boolean(&mut self) -> BsonResult<bool>;
    fn read_date_time(&mut self) -> BsonResult<i64>;
    fn read_null(&mut self) -> BsonResult<()>;
    fn read_regular_expression(&mut self) -> BsonResult<Regex>;
    fn read_javascript(&mut self) -> BsonResult<String>;
    /// 读取代码部分, 之后可以用 `read_start_document` 读取作用域
    fn read_javascript_with_scope(&mut self) -> BsonResult<String>;
    fn read_symbol(&mut self) -> BsonResult<String>;
    fn read_int32(&mut self) -> BsonResult<i32>;
    fn read_timestamp(&mut self) -> BsonResult<Timestamp>;
    fn read_int64(&mut self) -> BsonResult<i64>;
    fn read_decimal128(&mut self) -> BsonResult<Decimal128>;
    fn read_min_key(&mut self) -> BsonResult<()>;
    fn read_max_key(&mut self) -> BsonResult<()>;

    fn get_bookmark(&self) -> ReaderBookmark;
    fn return_to_bookmark(&mut self, bookmark: &ReaderBookmark) -> BsonResult<()>;

    /// 读取当前文档的原始字节
    fn read_raw_document(&mut self) -> BsonResult<Vec<u8>> {
        let doc = self.read_document()?;
        crate::codec::encode_document(&doc)
    }

    /// # Brief
    /// 在当前文档中向后查找指定名称的元素
    ///
    /// 必须在 `read_start_document` 之后调用。找到时停在该元素的值上,
    /// 找不到时停在文档结尾。
    ///
    /// # Returns
    /// 是否找到
    fn find_element(&mut self, name: &str) -> BsonResult<bool> {
        loop {
            if self.read_bson_type()? == ElementType::EndOfDocument {
                return Ok(false);
            }
            if self.read_name()? == name {
                return Ok(true);
            }
            self.skip_value()?;
        }
    }

    /// 把当前文档物化为 `Document`
    fn read_document(&mut self) -> BsonResult<Document> {
        self.read_start_document()?;
        let mut doc = Document::new();
        while self.read_bson_type()? != ElementType::EndOfDocument {
            let name = self.read_name()?;
            let value = self.read_value()?;
            doc.push_unchecked(name, value);
        }
        self.read_end_document()?;
        Ok(doc)
    }

    /// 读取当前值
    fn read_value(&mut self) -> BsonResult<BsonValue> {
        if matches!(
            self.state(),
            ReaderState::Initial | ReaderState::Done | ReaderState::ScopeDocument
        ) {
            self.read_bson_type()?;
        }
        if self.state() == ReaderState::Name {
            self.skip_name()?;
        }
        let ty = self
            .current_bson_type()
            .ok_or_else(|| BsonError::invalid_state("ReadValue", "no current BSON type"))?;
        let value = match ty {
            ElementType::Double => BsonValue::Double(self.read_double()?),
            ElementType::String => BsonValue::String(self.read_string()?),
            ElementType::Document => BsonValue::Document(self.read_document()?),
            ElementType::Array => {
                self.read_start_array()?;
                let mut items = Vec::new();
                while self.read_bson_type()? != ElementType::EndOfDocument {
                    items.push(self.read_value()?);
                }
                self.read_end_array()?;
                BsonValue::Array(items)
            }
            ElementType::Binary => BsonValue::Binary(self.read_binary()?),
            ElementType::Undefined => {
                self.read_undefined()?;
                BsonValue::Undefined
            }
            ElementType::ObjectId => BsonValue::ObjectId(self.read_object_id()?),
            ElementType::Boolean => BsonValue::Boolean(self.read_boolean()?),
            ElementType::DateTime => {
                BsonValue::DateTime(BsonDateTime::from_millis(self.read_date_time()?))
            }
            ElementType::Null => {
                self.read_null()?;
                BsonValue::Null
            }
            ElementType::RegularExpression => {
                BsonValue::RegularExpression(self.read_regular_expression()?)
            }
            ElementType::JavaScript => BsonValue::JavaScript(self.read_javascript()?),
            ElementType::JavaScriptWithScope => {
                let code = self.read_javascript_with_scope()?;
                let scope = self.read_document()?;
                BsonValue::JavaScriptWithScope(JavaScriptCodeWithScope { code, scope })
            }
            ElementType::Symbol => BsonValue::Symbol(self.read_symbol()?),
            ElementType::Int32 => BsonValue::Int32(self.read_int32()?),
            ElementType::Timestamp => BsonValue::Timestamp(self.read_timestamp()?),
            ElementType::Int64 => BsonValue::Int64(self.read_int64()?),
            ElementType::Decimal128 => BsonValue::Decimal128(self.read_decimal128()?),
            ElementType::MinKey => {
                self.read_min_key()?;
                BsonValue::MinKey
            }
            ElementType::MaxKey => {
                self.read_max_key()?;
                BsonValue::MaxKey
            }
            ElementType::EndOfDocument => {
                return Err(BsonError::invalid_state(
                    "ReadValue",
                    "the reader is positioned at the end of a document",
                ))
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_name_validation() {
        assert!(NameValidation::Any.validate("$set").is_ok());
        assert!(NameValidation::Any.validate("a.b").is_ok());
        assert!(NameValidation::Any.validate("a\0b").is_err());
        assert!(NameValidation::Storage.validate("$set").is_err());
        assert!(NameValidation::Storage.validate("a.b").is_err());
        assert!(NameValidation::Storage.validate("price$").is_ok());
    }
}
