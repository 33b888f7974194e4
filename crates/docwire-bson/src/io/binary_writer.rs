//! BSON 二进制写入器
//!
//! 文档与数组开始时预留 4 字节长度, 结束时回填实际大小。

use super::{BsonWriter, ContextType, NameValidation, WriterState};
use crate::binary::Binary;
use crate::decimal128::Decimal128;
use crate::spec::{BinarySubtype, ElementType, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
use crate::value::{Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bytes::{BufMut, BytesMut};
use docwire_common::{CodecConfig, GuidRepresentation, ObjectId};
use smallvec::SmallVec;

/// 二进制写入器设置
#[derive(Debug, Clone)]
pub struct BinaryWriterSettings {
    pub max_document_size: usize,
    pub max_nesting_depth: usize,
    pub guid_representation: GuidRepresentation,
    /// 把旧二进制子类型 0x02 改写为 0x00 输出
    pub fix_old_binary_subtype_on_output: bool,
    pub name_validation: NameValidation,
}

impl Default for BinaryWriterSettings {
    fn default() -> Self {
        Self {
            max_document_size: MAX_DOCUMENT_SIZE,
            max_nesting_depth: MAX_NESTING_DEPTH,
            guid_representation: GuidRepresentation::Standard,
            fix_old_binary_subtype_on_output: true,
            name_validation: NameValidation::Any,
        }
    }
}

impl From<&CodecConfig> for BinaryWriterSettings {
    fn from(config: &CodecConfig) -> Self {
        Self {
            max_document_size: config.max_document_size,
            max_nesting_depth: config.max_nesting_depth,
            guid_representation: config.guid_representation,
            fix_old_binary_subtype_on_output: config.fix_old_binary_subtype_on_output,
            name_validation: NameValidation::Any,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WriterContext {
    context_type: ContextType,
    start_position: usize,
    /// 数组中下一个元素的下标
    index: usize,
}

/// BSON 二进制写入器
pub struct BinaryWriter {
    buffer: BytesMut,
    settings: BinaryWriterSettings,
    state: WriterState,
    contexts: SmallVec<[WriterContext; 8]>,
    pending_name: Option<String>,
    max_document_sizes: SmallVec<[usize; 4]>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::with_settings(BinaryWriterSettings::default())
    }

    pub fn with_settings(settings: BinaryWriterSettings) -> Self {
        Self::with_buffer(BytesMut::with_capacity(256), settings)
    }

    /// 追加写入到已有缓冲区, 可用于在消息头之后直接写文档
    pub fn with_buffer(buffer: BytesMut, settings: BinaryWriterSettings) -> Self {
        Self {
            buffer,
            settings,
            state: WriterState::Initial,
            contexts: SmallVec::new(),
            pending_name: None,
            max_document_sizes: SmallVec::new(),
        }
    }

    pub fn settings(&self) -> &BinaryWriterSettings {
        &self.settings
    }

    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    pub fn name_validation(&self) -> NameValidation {
        self.settings.name_validation
    }

    pub fn set_name_validation(&mut self, validation: NameValidation) {
        self.settings.name_validation = validation;
    }

    /// # Brief
    /// 临时调整文档大小上限
    ///
    /// 与 `pop_max_document_size` 成对使用, 例如命令消息允许比普通文档
    /// 多出一段开销。
    pub fn push_max_document_size(&mut self, max: usize) {
        self.max_document_sizes.push(max);
    }

    pub fn pop_max_document_size(&mut self) -> BsonResult<()> {
        self.max_document_sizes
            .pop()
            .map(|_| ())
            .ok_or_else(|| BsonError::invalid_state("PopMaxDocumentSize", "the stack is empty"))
    }

    fn max_document_size(&self) -> usize {
        self.max_document_sizes
            .last()
            .copied()
            .unwrap_or(self.settings.max_document_size)
    }

    pub fn close(&mut self) {
        self.state = WriterState::Closed;
    }

    fn top_context_type(&self) -> Option<ContextType> {
        self.contexts.last().map(|c| c.context_type)
    }

    /// 写完一个值之后的状态
    fn next_state(&self) -> WriterState {
        match self.top_context_type() {
            Some(ContextType::Array) => WriterState::Value,
            Some(_) => WriterState::Name,
            None => WriterState::Done,
        }
    }

    fn check_cstring(value: &str) -> BsonResult<()> {
        if value.contains('\0') {
            return Err(BsonError::InvalidElementName {
                name: value.to_string(),
                reason: "C strings cannot contain null bytes".to_string(),
            });
        }
        Ok(())
    }

    fn write_cstring(&mut self, value: &str) -> BsonResult<()> {
        Self::check_cstring(value)?;
        self.buffer.put_slice(value.as_bytes());
        self.buffer.put_u8(0);
        Ok(())
    }

    fn write_bson_string(&mut self, value: &str) {
        self.buffer.put_i32_le(value.len() as i32 + 1);
        self.buffer.put_slice(value.as_bytes());
        self.buffer.put_u8(0);
    }

    /// 校验状态并写入类型标记与元素名; 数组中自动写入下标
    fn begin_value(&mut self, operation: &'static str, ty: ElementType) -> BsonResult<()> {
        if self.state != WriterState::Value {
            return Err(BsonError::invalid_state(
                operation,
                format!("the writer state is {}", self.state),
            ));
        }
        let name = match self.contexts.last_mut() {
            Some(ctx) if ctx.context_type == ContextType::Array => {
                let index = ctx.index;
                ctx.index += 1;
                index.to_string()
            }
            Some(_) => self.pending_name.take().ok_or_else(|| {
                BsonError::invalid_state(operation, "no element name has been written")
            })?,
            None => {
                return Err(BsonError::invalid_state(
                    operation,
                    "only documents can be written at the top level",
                ))
            }
        };
        self.buffer.put_u8(ty as u8);
        self.write_cstring(&name)
    }

    fn finish_value(&mut self) {
        self.state = self.next_state();
    }

    fn push_context(&mut self, context_type: ContextType) -> BsonResult<()> {
        if self.contexts.len() >= self.settings.max_nesting_depth {
            return Err(BsonError::MaxDepthExceeded(self.settings.max_nesting_depth));
        }
        self.contexts.push(WriterContext {
            context_type,
            start_position: self.buffer.len(),
            index: 0,
        });
        self.buffer.put_i32_le(0);
        Ok(())
    }

    /// 回填栈顶上下文的长度前缀并出栈
    fn pop_and_backpatch(&mut self) -> BsonResult<WriterContext> {
        let ctx = self
            .contexts
            .pop()
            .ok_or_else(|| BsonError::invalid_state("WriteEnd", "no open context"))?;
        let size = self.buffer.len() - ctx.start_position;
        let max = self.max_document_size();
        if ctx.context_type != ContextType::JavaScriptWithScope && size > max {
            return Err(BsonError::DocumentTooLarge { size, max });
        }
        let prefix = (size as i32).to_le_bytes();
        self.buffer[ctx.start_position..ctx.start_position + 4].copy_from_slice(&prefix);
        Ok(ctx)
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BsonWriter for BinaryWriter {
    fn state(&self) -> WriterState {
        self.state
    }

    fn guid_representation(&self) -> GuidRepresentation {
        self.settings.guid_representation
    }

    fn write_name(&mut self, name: &str) -> BsonResult<()> {
        if self.state != WriterState::Name {
            return Err(BsonError::invalid_state(
                "WriteName",
                format!("the writer state is {}", self.state),
            ));
        }
        self.settings.name_validation.validate(name)?;
        self.pending_name = Some(name.to_string());
        self.state = WriterState::Value;
        Ok(())
    }

    fn write_start_document(&mut self) -> BsonResult<()> {
        let context_type = match self.state {
            WriterState::Initial | WriterState::Done => ContextType::Document,
            WriterState::ScopeDocument => ContextType::ScopeDocument,
            WriterState::Value => {
                self.begin_value("WriteStartDocument", ElementType::Document)?;
                ContextType::Document
            }
            other => {
                return Err(BsonError::invalid_state(
                    "WriteStartDocument",
                    format!("the writer state is {}", other),
                ))
            }
        };
        self.push_context(context_type)?;
        self.state = WriterState::Name;
        Ok(())
    }

    fn write_end_document(&mut self) -> BsonResult<()> {
        if self.state != WriterState::Name
            || !matches!(
                self.top_context_type(),
                Some(ContextType::Document) | Some(ContextType::ScopeDocument)
            )
        {
            return Err(BsonError::invalid_state(
                "WriteEndDocument",
                format!(
                    "the writer state is {} in context {:?}",
                    self.state,
                    self.top_context_type()
                ),
            ));
        }
        self.buffer.put_u8(0);
        let ctx = self.pop_and_backpatch()?;
        if ctx.context_type == ContextType::ScopeDocument {
            self.pop_and_backpatch()?;
        }
        self.finish_value();
        Ok(())
    }

    fn write_start_array(&mut self) -> BsonResult<()> {
        self.begin_value("WriteStartArray", ElementType::Array)?;
        self.push_context(ContextType::Array)?;
        self.state = WriterState::Value;
        Ok(())
    }

    fn write_end_array(&mut self) -> BsonResult<()> {
        if self.state != WriterState::Value || self.top_context_type() != Some(ContextType::Array)
        {
            return Err(BsonError::invalid_state(
                "WriteEndArray",
                format!("the writer state is {}", self.state),
            ));
        }
        self.buffer.put_u8(0);
        self.pop_and_backpatch()?;
        self.finish_value();
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> BsonResult<()> {
        self.begin_value("WriteDouble", ElementType::Double)?;
        self.buffer.put_f64_le(value);
        self.finish_value();
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> BsonResult<()> {
        self.begin_value("WriteString", ElementType::String)?;
        self.write_bson_string(value);
        self.finish_value();
        Ok(())
    }

    fn write_binary(&mut self, value: &Binary) -> BsonResult<()> {
        self.begin_value("WriteBinaryData", ElementType::Binary)?;
        let len = value.bytes.len() as i32;
        if value.subtype == BinarySubtype::BinaryOld {
            if self.settings.fix_old_binary_subtype_on_output {
                self.buffer.put_i32_le(len);
                self.buffer.put_u8(BinarySubtype::Generic.into());
            } else {
                self.buffer.put_i32_le(len + 4);
                self.buffer.put_u8(BinarySubtype::BinaryOld.into());
                self.buffer.put_i32_le(len);
            }
        } else {
            self.buffer.put_i32_le(len);
            self.buffer.put_u8(value.subtype.into());
        }
        self.buffer.put_slice(&value.bytes);
        self.finish_value();
        Ok(())
    }

    fn write_undefined(&mut self) -> BsonResult<()> {
        self.begin_value("WriteUndefined", ElementType::Undefined)?;
        self.finish_value();
        Ok(())
    }

    fn write_object_id(&mut self, value: ObjectId) -> BsonResult<()> {
        self.begin_value("WriteObjectId", ElementType::ObjectId)?;
        self.buffer.put_slice(value.as_bytes());
        self.finish_value();
        Ok(())
    }

    fn write_boolean(&mut self, value: bool) -> BsonResult<()> {
        self.begin_value("WriteBoolean", ElementType::Boolean)?;
        self.buffer.put_u8(value as u8);
        self.finish_value();
        Ok(())
    }

    fn write_date_time(&mut self, millis: i64) -> BsonResult<()> {
        self.begin_value("WriteDateTime", ElementType::DateTime)?;
        self.buffer.put_i64_le(millis);
        self.finish_value();
        Ok(())
    }

    fn write_null(&mut self) -> BsonResult<()> {
        self.begin_value("WriteNull", ElementType::Null)?;
        self.finish_value();
        Ok(())
    }

    fn write_regular_expression(&mut self, value: &Regex) -> BsonResult<()> {
        // 先校验, 失败时缓冲区中不留下半个元素
        Self::check_cstring(&value.pattern)?;
        Self::check_cstring(&value.options)?;
        self.begin_value("WriteRegularExpression", ElementType::RegularExpression)?;
        self.write_cstring(&value.pattern)?;
        self.write_cstring(&value.options)?;
        self.finish_value();
        Ok(())
    }

    fn write_javascript(&mut self, code: &str) -> BsonResult<()> {
        self.begin_value("WriteJavaScript", ElementType::JavaScript)?;
        self.write_bson_string(code);
        self.finish_value();
        Ok(())
    }

    fn write_javascript_with_scope(&mut self, code: &str) -> BsonResult<()> {
        self.begin_value("WriteJavaScriptWithScope", ElementType::JavaScriptWithScope)?;
        self.push_context(ContextType::JavaScriptWithScope)?;
        self.write_bson_string(code);
        self.state = WriterState::ScopeDocument;
        Ok(())
    }

    fn write_symbol(&mut self, value: &str) -> BsonResult<()> {
        self.begin_value("WriteSymbol", ElementType::Symbol)?;
        self.write_bson_string(value);
        self.finish_value();
        Ok(())
    }

    fn write_int32(&mut self, value: i32) -> BsonResult<()> {
        self.begin_value("WriteInt32", ElementType::Int32)?;
        self.buffer.put_i32_le(value);
        self.finish_value();
        Ok(())
    }

    fn write_timestamp(&mut self, value: Timestamp) -> BsonResult<()> {
        self.begin_value("WriteTimestamp", ElementType::Timestamp)?;
        self.buffer.put_u64_le(value.to_u64());
        self.finish_value();
        Ok(())
    }

    fn write_int64(&mut self, value: i64) -> BsonResult<()> {
        self.begin_value("WriteInt64", ElementType::Int64)?;
        self.buffer.put_i64_le(value);
        self.finish_value();
        Ok(())
    }

    fn write_decimal128(&mut self, value: Decimal128) -> BsonResult<()> {
        self.begin_value("WriteDecimal128", ElementType::Decimal128)?;
        self.buffer.put_slice(&value.to_bytes());
        self.finish_value();
        Ok(())
    }

    fn write_min_key(&mut self) -> BsonResult<()> {
        self.begin_value("WriteMinKey", ElementType::MinKey)?;
        self.finish_value();
        Ok(())
    }

    fn write_max_key(&mut self) -> BsonResult<()> {
        self.begin_value("WriteMaxKey", ElementType::MaxKey)?;
        self.finish_value();
        Ok(())
    }

    /// 直接拷贝已编码的文档, 只校验长度前缀与结尾字节
    fn write_raw_document(&mut self, bytes: &[u8]) -> BsonResult<()> {
        if bytes.len() < MIN_DOCUMENT_SIZE
            || i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize != bytes.len()
            || bytes[bytes.len() - 1] != 0
        {
            return Err(BsonError::InvalidDocument(
                "raw document bytes have an inconsistent length prefix".to_string(),
            ));
        }
        let max = self.max_document_size();
        if bytes.len() > max {
            return Err(BsonError::DocumentTooLarge {
                size: bytes.len(),
                max,
            });
        }
        match self.state {
            WriterState::Initial | WriterState::Done => {}
            WriterState::ScopeDocument => {
                self.buffer.put_slice(bytes);
                self.pop_and_backpatch()?;
                self.finish_value();
                return Ok(());
            }
            _ => self.begin_value("WriteRawBsonDocument", ElementType::Document)?,
        }
        self.buffer.put_slice(bytes);
        self.finish_value();
        Ok(())
    }
}
