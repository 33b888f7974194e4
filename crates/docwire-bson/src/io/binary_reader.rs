//! BSON 二进制读取器
//!
//! 零拷贝地读取字节切片。每个文档与数组的边界都记录在上下文栈中,
//! 结束时校验实际读取长度与长度前缀一致。

use super::{BsonReader, ContextType, ReaderBookmark, ReaderContext, ReaderState};
use crate::binary::Binary;
use crate::datetime::DATE_TIME_MAX_MILLIS;
use crate::decimal128::Decimal128;
use crate::spec::{BinarySubtype, ElementType, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
use crate::value::{Regex, Timestamp};
use crate::{BsonError, BsonResult};
use docwire_common::{CodecConfig, GuidRepresentation, ObjectId};
use smallvec::SmallVec;

/// 二进制读取器设置
#[derive(Debug, Clone)]
pub struct BinaryReaderSettings {
    pub max_document_size: usize,
    pub max_nesting_depth: usize,
    pub guid_representation: GuidRepresentation,
    /// 把旧二进制子类型 0x02 读为 0x00
    pub fix_old_binary_subtype_on_input: bool,
    /// 把旧驱动写出的 "最大时间 + 1 毫秒" 修正为最大时间
    pub fix_old_date_time_max_value_on_input: bool,
}

impl Default for BinaryReaderSettings {
    fn default() -> Self {
        Self {
            max_document_size: MAX_DOCUMENT_SIZE,
            max_nesting_depth: MAX_NESTING_DEPTH,
            guid_representation: GuidRepresentation::Standard,
            fix_old_binary_subtype_on_input: true,
            fix_old_date_time_max_value_on_input: true,
        }
    }
}

impl From<&CodecConfig> for BinaryReaderSettings {
    fn from(config: &CodecConfig) -> Self {
        Self {
            max_document_size: config.max_document_size,
            max_nesting_depth: config.max_nesting_depth,
            guid_representation: config.guid_representation,
            fix_old_binary_subtype_on_input: config.fix_old_binary_subtype_on_input,
            fix_old_date_time_max_value_on_input: config.fix_old_date_time_max_value_on_input,
        }
    }
}

/// BSON 二进制读取器
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
    settings: BinaryReaderSettings,
    state: ReaderState,
    current_type: Option<ElementType>,
    current_name: Option<String>,
    contexts: SmallVec<[ReaderContext; 8]>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_settings(data, BinaryReaderSettings::default())
    }

    pub fn with_settings(data: &'a [u8], settings: BinaryReaderSettings) -> Self {
        Self {
            data,
            position: 0,
            settings,
            state: ReaderState::Initial,
            current_type: None,
            current_name: None,
            contexts: SmallVec::new(),
        }
    }

    pub fn settings(&self) -> &BinaryReaderSettings {
        &self.settings
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn close(&mut self) {
        self.state = ReaderState::Closed;
    }

    fn ensure(&self, needed: usize) -> BsonResult<()> {
        if self.remaining() < needed {
            return Err(BsonError::UnexpectedEof {
                offset: self.position,
                needed: needed - self.remaining(),
            });
        }
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> BsonResult<&'a [u8]> {
        self.ensure(len)?;
        let data: &'a [u8] = self.data;
        let slice = &data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn advance(&mut self, len: usize) -> BsonResult<()> {
        self.ensure(len)?;
        self.position += len;
        Ok(())
    }

    fn read_u8(&mut self) -> BsonResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32_raw(&mut self) -> BsonResult<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64_raw(&mut self) -> BsonResult<i64> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(i64::from_le_bytes(buf))
    }

    fn cstring_end(&self) -> BsonResult<usize> {
        self.data[self.position..]
            .iter()
            .position(|&b| b == 0)
            .map(|offset| self.position + offset)
            .ok_or(BsonError::UnterminatedCString(self.position))
    }

    fn read_cstring(&mut self) -> BsonResult<String> {
        let start = self.position;
        let end = self.cstring_end()?;
        let text = std::str::from_utf8(&self.data[start..end])
            .map_err(|_| BsonError::InvalidUtf8 { offset: start })?
            .to_string();
        self.position = end + 1;
        Ok(text)
    }

    fn skip_cstring(&mut self) -> BsonResult<()> {
        self.position = self.cstring_end()? + 1;
        Ok(())
    }

    /// 长度前缀字符串: 长度包含结尾 0x00
    fn read_bson_string(&mut self) -> BsonResult<String> {
        let offset = self.position;
        let len = self.read_i32_raw()?;
        if len < 1 {
            return Err(BsonError::InvalidSize {
                size: len as i64,
                offset,
                reason: "string length must include the terminating null",
            });
        }
        let bytes = self.read_bytes(len as usize)?;
        if bytes[bytes.len() - 1] != 0 {
            return Err(BsonError::InvalidSize {
                size: len as i64,
                offset,
                reason: "string is not null terminated",
            });
        }
        std::str::from_utf8(&bytes[..bytes.len() - 1])
            .map(str::to_string)
            .map_err(|_| BsonError::InvalidUtf8 { offset: offset + 4 })
    }

    /// 当前可读取的上界: 外层文档结尾或数据结尾
    fn limit(&self) -> usize {
        self.contexts
            .last()
            .map(|c| c.end_position())
            .unwrap_or(self.data.len())
    }

    /// 读取并校验文档长度前缀, 读取位置停在前缀之后
    fn read_document_size(&mut self) -> BsonResult<usize> {
        let offset = self.position;
        let size = self.read_i32_raw()?;
        if size < 0 {
            return Err(BsonError::InvalidSize {
                size: size as i64,
                offset,
                reason: "document size cannot be negative",
            });
        }
        let size = size as usize;
        if size < MIN_DOCUMENT_SIZE {
            return Err(BsonError::InvalidSize {
                size: size as i64,
                offset,
                reason: "document is smaller than the minimum of 5 bytes",
            });
        }
        if size > self.settings.max_document_size {
            return Err(BsonError::DocumentTooLarge {
                size,
                max: self.settings.max_document_size,
            });
        }
        if offset + size > self.data.len() {
            return Err(BsonError::UnexpectedEof {
                offset,
                needed: offset + size - self.data.len(),
            });
        }
        if offset + size > self.limit() {
            return Err(BsonError::InvalidSize {
                size: size as i64,
                offset,
                reason: "document extends past the end of its container",
            });
        }
        Ok(size)
    }

    /// 在 Initial/Done/ScopeDocument/Type 状态下先读出类型, 再校验当前值的类型
    fn verify_bson_type(&mut self, operation: &'static str, expected: ElementType) -> BsonResult<()> {
        if matches!(
            self.state,
            ReaderState::Initial | ReaderState::Done | ReaderState::ScopeDocument | ReaderState::Type
        ) {
            self.read_bson_type()?;
        }
        if self.state == ReaderState::Name {
            self.skip_name()?;
        }
        if self.state != ReaderState::Value {
            return Err(BsonError::invalid_state(
                operation,
                format!("the reader state is {}", self.state),
            ));
        }
        if self.current_type != Some(expected) {
            return Err(BsonError::invalid_state(
                operation,
                format!(
                    "the current BSON type is {}",
                    self.current_type.map(|t| t.name()).unwrap_or("unknown")
                ),
            ));
        }
        Ok(())
    }

    fn next_state(&self) -> ReaderState {
        match self.contexts.last() {
            Some(_) => ReaderState::Type,
            None => ReaderState::Done,
        }
    }

    fn finish_value(&mut self) {
        self.state = self.next_state();
    }

    fn push_context(&mut self, context_type: ContextType, start: usize, size: usize) -> BsonResult<()> {
        if self.contexts.len() >= self.settings.max_nesting_depth {
            return Err(BsonError::MaxDepthExceeded(self.settings.max_nesting_depth));
        }
        self.contexts.push(ReaderContext {
            context_type,
            start_position: start,
            size,
        });
        Ok(())
    }

    /// 出栈并校验读取位置恰好停在上下文结尾
    fn pop_context(&mut self, operation: &'static str) -> BsonResult<ReaderContext> {
        let ctx = self
            .contexts
            .pop()
            .ok_or_else(|| BsonError::invalid_state(operation, "no open context"))?;
        if self.position != ctx.end_position() {
            return Err(BsonError::InvalidSize {
                size: ctx.size as i64,
                offset: ctx.start_position,
                reason: "size prefix does not match the bytes consumed",
            });
        }
        Ok(ctx)
    }
}

impl<'a> BsonReader for BinaryReader<'a> {
    fn state(&self) -> ReaderState {
        self.state
    }

    fn current_bson_type(&self) -> Option<ElementType> {
        self.current_type
    }

    fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    fn guid_representation(&self) -> GuidRepresentation {
        self.settings.guid_representation
    }

    fn is_at_end_of_file(&self) -> bool {
        self.position >= self.data.len()
    }

    fn read_bson_type(&mut self) -> BsonResult<ElementType> {
        match self.state {
            ReaderState::Initial | ReaderState::Done | ReaderState::ScopeDocument => {
                if self.state != ReaderState::ScopeDocument && self.is_at_end_of_file() {
                    return Err(BsonError::UnexpectedEof {
                        offset: self.position,
                        needed: MIN_DOCUMENT_SIZE,
                    });
                }
                self.current_type = Some(ElementType::Document);
                self.state = ReaderState::Value;
                return Ok(ElementType::Document);
            }
            ReaderState::Type => {}
            other => {
                return Err(BsonError::invalid_state(
                    "ReadBsonType",
                    format!("the reader state is {}", other),
                ))
            }
        }

        let offset = self.position;
        let byte = self.read_u8()?;
        if byte == 0 {
            self.current_type = Some(ElementType::EndOfDocument);
            self.state = match self.contexts.last().map(|c| c.context_type) {
                Some(ContextType::Array) => ReaderState::EndOfArray,
                Some(ContextType::Document) | Some(ContextType::ScopeDocument) => {
                    ReaderState::EndOfDocument
                }
                _ => {
                    return Err(BsonError::InvalidDocument(format!(
                        "unexpected end of document marker at offset {}",
                        offset
                    )))
                }
            };
            return Ok(ElementType::EndOfDocument);
        }

        let ty = ElementType::from_u8(byte).ok_or(BsonError::InvalidElementType { byte, offset })?;
        self.current_type = Some(ty);
        if self.contexts.last().map(|c| c.context_type) == Some(ContextType::Array) {
            // 数组下标不需要对外暴露
            self.skip_cstring()?;
            self.current_name = None;
            self.state = ReaderState::Value;
        } else {
            self.state = ReaderState::Name;
        }
        Ok(ty)
    }

    fn read_name(&mut self) -> BsonResult<String> {
        if self.state != ReaderState::Name {
            return Err(BsonError::invalid_state(
                "ReadName",
                format!("the reader state is {}", self.state),
            ));
        }
        let name = self.read_cstring()?;
        self.current_name = Some(name.clone());
        self.state = ReaderState::Value;
        Ok(name)
    }

    fn skip_name(&mut self) -> BsonResult<()> {
        if self.state != ReaderState::Name {
            return Err(BsonError::invalid_state(
                "SkipName",
                format!("the reader state is {}", self.state),
            ));
        }
        self.skip_cstring()?;
        self.current_name = None;
        self.state = ReaderState::Value;
        Ok(())
    }

    fn skip_value(&mut self) -> BsonResult<()> {
        if self.state != ReaderState::Value {
            return Err(BsonError::invalid_state(
                "SkipValue",
                format!("the reader state is {}", self.state),
            ));
        }
        let ty = self
            .current_type
            .ok_or_else(|| BsonError::invalid_state("SkipValue", "no current BSON type"))?;
        match ty {
            ElementType::Document | ElementType::Array => {
                let start = self.position;
                let size = self.read_document_size()?;
                self.position = start;
                self.advance(size)?;
            }
            ElementType::Binary => {
                let len = self.read_i32_raw()?;
                if len < 0 {
                    return Err(BsonError::InvalidSize {
                        size: len as i64,
                        offset: self.position - 4,
                        reason: "binary length cannot be negative",
                    });
                }
                self.advance(len as usize + 1)?;
            }
            ElementType::String | ElementType::JavaScript | ElementType::Symbol => {
                let len = self.read_i32_raw()?;
                if len < 1 {
                    return Err(BsonError::InvalidSize {
                        size: len as i64,
                        offset: self.position - 4,
                        reason: "string length must include the terminating null",
                    });
                }
                self.advance(len as usize)?;
            }
            ElementType::JavaScriptWithScope => {
                let len = self.read_i32_raw()?;
                if len < 4 {
                    return Err(BsonError::InvalidSize {
                        size: len as i64,
                        offset: self.position - 4,
                        reason: "code with scope is too small",
                    });
                }
                self.advance(len as usize - 4)?;
            }
            ElementType::RegularExpression => {
                self.skip_cstring()?;
                self.skip_cstring()?;
            }
            ElementType::EndOfDocument => {
                return Err(BsonError::invalid_state(
                    "SkipValue",
                    "the reader is positioned at the end of a document",
                ))
            }
            fixed => {
                let size = fixed.fixed_size().unwrap_or(0);
                self.advance(size)?;
            }
        }
        self.finish_value();
        Ok(())
    }

    fn read_start_document(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadStartDocument", ElementType::Document)?;
        let context_type = match self.contexts.last().map(|c| c.context_type) {
            Some(ContextType::JavaScriptWithScope) => ContextType::ScopeDocument,
            _ => ContextType::Document,
        };
        let start = self.position;
        let size = self.read_document_size()?;
        self.push_context(context_type, start, size)?;
        self.state = ReaderState::Type;
        Ok(())
    }

    fn read_end_document(&mut self) -> BsonResult<()> {
        if !matches!(
            self.contexts.last().map(|c| c.context_type),
            Some(ContextType::Document) | Some(ContextType::ScopeDocument)
        ) {
            return Err(BsonError::invalid_state(
                "ReadEndDocument",
                "the current context is not a document",
            ));
        }
        if self.state == ReaderState::Type {
            self.read_bson_type()?;
        }
        if self.state != ReaderState::EndOfDocument {
            return Err(BsonError::invalid_state(
                "ReadEndDocument",
                format!("the reader state is {}", self.state),
            ));
        }
        let ctx = self.pop_context("ReadEndDocument")?;
        if ctx.context_type == ContextType::ScopeDocument {
            self.pop_context("ReadEndDocument")?;
        }
        self.finish_value();
        Ok(())
    }

    fn read_start_array(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadStartArray", ElementType::Array)?;
        let start = self.position;
        let size = self.read_document_size()?;
        self.push_context(ContextType::Array, start, size)?;
        self.state = ReaderState::Type;
        Ok(())
    }

    fn read_end_array(&mut self) -> BsonResult<()> {
        if self.contexts.last().map(|c| c.context_type) != Some(ContextType::Array) {
            return Err(BsonError::invalid_state(
                "ReadEndArray",
                "the current context is not an array",
            ));
        }
        if self.state == ReaderState::Type {
            self.read_bson_type()?;
        }
        if self.state != ReaderState::EndOfArray {
            return Err(BsonError::invalid_state(
                "ReadEndArray",
                format!("the reader state is {}", self.state),
            ));
        }
        self.pop_context("ReadEndArray")?;
        self.finish_value();
        Ok(())
    }

    fn read_double(&mut self) -> BsonResult<f64> {
        self.verify_bson_type("ReadDouble", ElementType::Double)?;
        let value = f64::from_bits(self.read_i64_raw()? as u64);
        self.finish_value();
        Ok(value)
    }

    fn read_string(&mut self) -> BsonResult<String> {
        self.verify_bson_type("ReadString", ElementType::String)?;
        let value = self.read_bson_string()?;
        self.finish_value();
        Ok(value)
    }

    fn read_binary(&mut self) -> BsonResult<Binary> {
        self.verify_bson_type("ReadBinaryData", ElementType::Binary)?;
        let offset = self.position;
        let mut len = self.read_i32_raw()?;
        if len < 0 {
            return Err(BsonError::InvalidSize {
                size: len as i64,
                offset,
                reason: "binary length cannot be negative",
            });
        }
        let mut subtype = BinarySubtype::from(self.read_u8()?);
        if subtype == BinarySubtype::BinaryOld {
            let inner = self.read_i32_raw()?;
            if inner != len - 4 {
                return Err(BsonError::InvalidSize {
                    size: inner as i64,
                    offset: offset + 5,
                    reason: "old binary inner length must be 4 less than the outer length",
                });
            }
            len = inner;
            if self.settings.fix_old_binary_subtype_on_input {
                subtype = BinarySubtype::Generic;
            }
        }
        let bytes = self.read_bytes(len as usize)?.to_vec();
        self.finish_value();
        Ok(Binary { subtype, bytes })
    }

    fn read_undefined(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadUndefined", ElementType::Undefined)?;
        self.finish_value();
        Ok(())
    }

    fn read_object_id(&mut self) -> BsonResult<ObjectId> {
        self.verify_bson_type("ReadObjectId", ElementType::ObjectId)?;
        let mut raw = [0u8; 12];
        raw.copy_from_slice(self.read_bytes(12)?);
        self.finish_value();
        Ok(ObjectId::from_bytes(raw))
    }

    fn read_boolean(&mut self) -> BsonResult<bool> {
        self.verify_bson_type("ReadBoolean", ElementType::Boolean)?;
        let offset = self.position;
        let value = match self.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(BsonError::InvalidDocument(format!(
                    "invalid boolean byte 0x{:02x} at offset {}",
                    other, offset
                )))
            }
        };
        self.finish_value();
        Ok(value)
    }

    fn read_date_time(&mut self) -> BsonResult<i64> {
        self.verify_bson_type("ReadDateTime", ElementType::DateTime)?;
        let mut value = self.read_i64_raw()?;
        if self.settings.fix_old_date_time_max_value_on_input && value == DATE_TIME_MAX_MILLIS + 1 {
            value = DATE_TIME_MAX_MILLIS;
        }
        self.finish_value();
        Ok(value)
    }

    fn read_null(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadNull", ElementType::Null)?;
        self.finish_value();
        Ok(())
    }

    fn read_regular_expression(&mut self) -> BsonResult<Regex> {
        self.verify_bson_type("ReadRegularExpression", ElementType::RegularExpression)?;
        let pattern = self.read_cstring()?;
        let options = self.read_cstring()?;
        self.finish_value();
        Ok(Regex { pattern, options })
    }

    fn read_javascript(&mut self) -> BsonResult<String> {
        self.verify_bson_type("ReadJavaScript", ElementType::JavaScript)?;
        let value = self.read_bson_string()?;
        self.finish_value();
        Ok(value)
    }

    fn read_javascript_with_scope(&mut self) -> BsonResult<String> {
        self.verify_bson_type("ReadJavaScriptWithScope", ElementType::JavaScriptWithScope)?;
        let start = self.position;
        let size = self.read_i32_raw()?;
        // 总长 + 空代码字符串 + 空作用域文档
        if size < 14 || start + size as usize > self.limit() {
            return Err(BsonError::InvalidSize {
                size: size as i64,
                offset: start,
                reason: "invalid code with scope size",
            });
        }
        self.push_context(ContextType::JavaScriptWithScope, start, size as usize)?;
        let code = self.read_bson_string()?;
        self.state = ReaderState::ScopeDocument;
        Ok(code)
    }

    fn read_symbol(&mut self) -> BsonResult<String> {
        self.verify_bson_type("ReadSymbol", ElementType::Symbol)?;
        let value = self.read_bson_string()?;
        self.finish_value();
        Ok(value)
    }

    fn read_int32(&mut self) -> BsonResult<i32> {
        self.verify_bson_type("ReadInt32", ElementType::Int32)?;
        let value = self.read_i32_raw()?;
        self.finish_value();
        Ok(value)
    }

    fn read_timestamp(&mut self) -> BsonResult<Timestamp> {
        self.verify_bson_type("ReadTimestamp", ElementType::Timestamp)?;
        let value = Timestamp::from_u64(self.read_i64_raw()? as u64);
        self.finish_value();
        Ok(value)
    }

    fn read_int64(&mut self) -> BsonResult<i64> {
        self.verify_bson_type("ReadInt64", ElementType::Int64)?;
        let value = self.read_i64_raw()?;
        self.finish_value();
        Ok(value)
    }

    fn read_decimal128(&mut self) -> BsonResult<Decimal128> {
        self.verify_bson_type("ReadDecimal128", ElementType::Decimal128)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(self.read_bytes(16)?);
        self.finish_value();
        Ok(Decimal128::from_bytes(raw))
    }

    fn read_min_key(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadMinKey", ElementType::MinKey)?;
        self.finish_value();
        Ok(())
    }

    fn read_max_key(&mut self) -> BsonResult<()> {
        self.verify_bson_type("ReadMaxKey", ElementType::MaxKey)?;
        self.finish_value();
        Ok(())
    }

    fn get_bookmark(&self) -> ReaderBookmark {
        ReaderBookmark {
            state: self.state,
            current_type: self.current_type,
            current_name: self.current_name.clone(),
            contexts: self.contexts.clone(),
            position: self.position,
        }
    }

    fn return_to_bookmark(&mut self, bookmark: &ReaderBookmark) -> BsonResult<()> {
        if bookmark.position > self.data.len() {
            return Err(BsonError::invalid_state(
                "ReturnToBookmark",
                "the bookmark does not belong to this reader",
            ));
        }
        self.state = bookmark.state;
        self.current_type = bookmark.current_type;
        self.current_name = bookmark.current_name.clone();
        self.contexts = bookmark.contexts.clone();
        self.position = bookmark.position;
        Ok(())
    }

    /// 直接切出文档字节, 不做物化
    fn read_raw_document(&mut self) -> BsonResult<Vec<u8>> {
        self.verify_bson_type("ReadRawBsonDocument", ElementType::Document)?;
        let start = self.position;
        let size = self.read_document_size()?;
        self.position = start;
        let bytes = self.read_bytes(size)?.to_vec();
        if bytes[size - 1] != 0 {
            return Err(BsonError::InvalidDocument(format!(
                "document at offset {} is not terminated by a null byte",
                start
            )));
        }
        if self.contexts.last().map(|c| c.context_type) == Some(ContextType::JavaScriptWithScope) {
            self.pop_context("ReadRawBsonDocument")?;
        }
        self.finish_value();
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::value::BsonValue;
    use proptest::prelude::*;

    fn sample() -> Vec<u8> {
        doc! {
            "a": 1,
            "nested": { "x": "y", "deep": [1, 2, 3] },
            "b": "after"
        }
        .to_vec()
        .unwrap()
    }

    #[test]
    fn test_read_elements() {
        let bytes = sample();
        let mut reader = BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert_eq!(reader.read_bson_type().unwrap(), ElementType::Int32);
        assert_eq!(reader.read_name().unwrap(), "a");
        assert_eq!(reader.read_int32().unwrap(), 1);
        assert_eq!(reader.read_bson_type().unwrap(), ElementType::Document);
        reader.skip_name().unwrap();
        reader.skip_value().unwrap();
        assert_eq!(reader.read_bson_type().unwrap(), ElementType::String);
        assert_eq!(reader.read_name().unwrap(), "b");
        assert_eq!(reader.read_string().unwrap(), "after");
        reader.read_end_document().unwrap();
        assert_eq!(reader.state(), ReaderState::Done);
        assert!(reader.is_at_end_of_file());
    }

    #[test]
    fn test_bookmark_rewind() {
        let bytes = sample();
        let mut reader = BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        let mark = reader.get_bookmark();
        assert!(reader.find_element("b").unwrap());
        assert_eq!(reader.read_string().unwrap(), "after");
        reader.return_to_bookmark(&mark).unwrap();
        assert_eq!(reader.read_bson_type().unwrap(), ElementType::Int32);
        assert_eq!(reader.read_name().unwrap(), "a");
    }

    #[test]
    fn test_find_missing_element() {
        let bytes = sample();
        let mut reader = BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert!(!reader.find_element("zzz").unwrap());
        assert_eq!(reader.state(), ReaderState::EndOfDocument);
        reader.read_end_document().unwrap();
    }

    #[test]
    fn test_size_mismatch_detected() {
        let mut bytes = doc! { "a": 1 }.to_vec().unwrap();
        // 长度前缀多报 1 字节, 结尾补一个 0
        bytes[0] += 1;
        bytes.push(0);
        let mut reader = BinaryReader::new(&bytes);
        let err = reader.read_document().unwrap_err();
        assert!(matches!(err, BsonError::InvalidSize { .. }));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = sample();
        let mut reader = BinaryReader::new(&bytes[..bytes.len() - 3]);
        let err = reader.read_document().unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Format);
    }

    #[test]
    fn test_invalid_type_tag() {
        let bytes = vec![8, 0, 0, 0, 0x0C, b'a', 0, 0];
        let mut reader = BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert!(matches!(
            reader.read_bson_type(),
            Err(BsonError::InvalidElementType { byte: 0x0C, .. })
        ));
    }

    #[test]
    fn test_old_datetime_max_fixed() {
        let mut bytes = doc! { "d": (BsonValue::DateTime(crate::BsonDateTime::from_millis(0))) }
            .to_vec()
            .unwrap();
        let value = (DATE_TIME_MAX_MILLIS + 1).to_le_bytes();
        bytes[7..15].copy_from_slice(&value);
        let doc = crate::Document::from_slice(&bytes).unwrap();
        assert_eq!(
            doc.get_datetime("d").map(|d| d.timestamp_millis()),
            Some(DATE_TIME_MAX_MILLIS)
        );

        let settings = BinaryReaderSettings {
            fix_old_date_time_max_value_on_input: false,
            ..Default::default()
        };
        let mut reader = BinaryReader::with_settings(&bytes, settings);
        let doc = reader.read_document().unwrap();
        assert_eq!(
            doc.get_datetime("d").map(|d| d.timestamp_millis()),
            Some(DATE_TIME_MAX_MILLIS + 1)
        );
    }

    #[test]
    fn test_old_binary_subtype() {
        // 外层长度 6 = 内层长度 2 + 4
        let fixed = vec![
            19, 0, 0, 0, 0x05, b'b', 0, 6, 0, 0, 0, 0x02, 2, 0, 0, 0, 0xAA, 0xBB, 0,
        ];
        let doc = crate::Document::from_slice(&fixed).unwrap();
        let bin = doc.get("b").and_then(|v| v.as_binary()).unwrap();
        assert_eq!(bin.subtype, BinarySubtype::Generic);
        assert_eq!(bin.bytes, vec![0xAA, 0xBB]);

        let mut broken = fixed.clone();
        broken[12] = 3;
        assert!(crate::Document::from_slice(&broken).is_err());
    }

    #[test]
    fn test_raw_document_slice() {
        let bytes = sample();
        let mut reader = BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert!(reader.find_element("nested").unwrap());
        let raw = reader.read_raw_document().unwrap();
        let nested = crate::Document::from_slice(&raw).unwrap();
        assert_eq!(nested.get_str("x"), Some("y"));
        assert_eq!(reader.read_bson_type().unwrap(), ElementType::String);
    }

    #[test]
    fn test_sequence_of_documents() {
        let mut bytes = doc! { "n": 1 }.to_vec().unwrap();
        bytes.extend(doc! { "n": 2 }.to_vec().unwrap());
        let mut reader = BinaryReader::new(&bytes);
        let mut seen = Vec::new();
        while !reader.is_at_end_of_file() {
            seen.push(reader.read_document().unwrap().get_i32("n").unwrap());
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_nested_size_exceeding_parent() {
        // 内层文档声明 12 字节, 但外层只剩 6 字节
        let bytes = vec![
            13, 0, 0, 0, 0x03, b'd', 0, 12, 0, 0, 0, 0, 0,
        ];
        let err = crate::Document::from_slice(&bytes).unwrap_err();
        assert!(matches!(
            err,
            BsonError::InvalidSize { .. } | BsonError::UnexpectedEof { .. }
        ));
    }

    fn nested_value() -> impl Strategy<Value = BsonValue> {
        let leaf = prop_oneof![
            any::<i32>().prop_map(BsonValue::Int32),
            any::<i64>().prop_map(BsonValue::Int64),
            any::<bool>().prop_map(BsonValue::Boolean),
            "[a-z]{0,8}".prop_map(BsonValue::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(BsonValue::Array),
                prop::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(|fields| {
                    let mut doc = crate::Document::new();
                    for (name, value) in fields {
                        doc.insert(name, value);
                    }
                    BsonValue::Document(doc)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_skip_value_lands_on_next_element(value in nested_value()) {
            let mut doc = crate::Document::new();
            doc.insert("v", value);
            doc.insert("marker", 7);
            let bytes = doc.to_vec().unwrap();

            let mut reader = BinaryReader::new(&bytes);
            reader.read_start_document().unwrap();
            reader.read_bson_type().unwrap();
            reader.read_name().unwrap();
            reader.skip_value().unwrap();
            prop_assert_eq!(reader.read_bson_type().unwrap(), ElementType::Int32);
            prop_assert_eq!(reader.read_name().unwrap(), "marker");
            prop_assert_eq!(reader.read_int32().unwrap(), 7);
        }
    }
}
