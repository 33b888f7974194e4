//! JSON 文本写入器
//!
//! 输出格式:
//! - **Strict**: 只用合法 JSON 与 `$` 包装对象表示 BSON 专有类型
//! - **Shell**: 使用 shell 构造函数, 如 `ObjectId("...")`、`NumberLong(5)`
//! - **Canonical**: 规范扩展 JSON, 所有数值都带类型包装
//! - **Relaxed**: 宽松扩展 JSON, 数值直接输出

use super::{BsonWriter, ContextType, WriterState};
use crate::binary::Binary;
use crate::datetime::{BsonDateTime, DATE_TIME_MAX_MILLIS};
use crate::decimal128::Decimal128;
use crate::spec::{BinarySubtype, MAX_NESTING_DEPTH};
use crate::value::{BsonValue, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use docwire_common::{GuidRepresentation, JsonConfig, JsonOutputMode, ObjectId};
use smallvec::SmallVec;
use std::fmt::Write as _;

/// JSON 写入器设置
#[derive(Debug, Clone)]
pub struct JsonWriterSettings {
    pub output_mode: JsonOutputMode,
    pub indent: bool,
    pub indent_chars: String,
    pub new_line_chars: String,
    pub guid_representation: GuidRepresentation,
    pub max_nesting_depth: usize,
}

impl Default for JsonWriterSettings {
    fn default() -> Self {
        Self {
            output_mode: JsonOutputMode::Shell,
            indent: false,
            indent_chars: "  ".to_string(),
            new_line_chars: "\n".to_string(),
            guid_representation: GuidRepresentation::Standard,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl From<&JsonConfig> for JsonWriterSettings {
    fn from(config: &JsonConfig) -> Self {
        Self {
            output_mode: config.output_mode,
            indent: config.indent,
            indent_chars: config.indent_chars.clone(),
            new_line_chars: config.new_line_chars.clone(),
            ..Default::default()
        }
    }
}

impl JsonWriterSettings {
    pub fn with_mode(output_mode: JsonOutputMode) -> Self {
        Self {
            output_mode,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct JsonContext {
    context_type: ContextType,
    indentation: String,
    has_elements: bool,
}

/// JSON 写入器
pub struct JsonWriter {
    out: String,
    settings: JsonWriterSettings,
    state: WriterState,
    contexts: SmallVec<[JsonContext; 8]>,
    pending_name: Option<String>,
}

impl JsonWriter {
    pub fn new(settings: JsonWriterSettings) -> Self {
        Self {
            out: String::new(),
            settings,
            state: WriterState::Initial,
            contexts: SmallVec::new(),
            pending_name: None,
        }
    }

    pub fn settings(&self) -> &JsonWriterSettings {
        &self.settings
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    /// 把单个值格式化为 JSON 文本
    pub fn value_to_string(value: &BsonValue, settings: &JsonWriterSettings) -> BsonResult<String> {
        let mut writer = JsonWriter::new(settings.clone());
        writer.write_value(value)?;
        Ok(writer.into_string())
    }

    fn mode(&self) -> JsonOutputMode {
        self.settings.output_mode
    }

    fn top_context_type(&self) -> Option<ContextType> {
        self.contexts.last().map(|c| c.context_type)
    }

    fn next_state(&self) -> WriterState {
        match self.top_context_type() {
            None => WriterState::Done,
            Some(ContextType::Array) => WriterState::Value,
            Some(_) => WriterState::Name,
        }
    }

    /// 校验状态并写出分隔符与元素名
    fn begin_value(&mut self, operation: &'static str) -> BsonResult<()> {
        match self.state {
            WriterState::Value => {}
            WriterState::Initial | WriterState::Done if self.contexts.is_empty() => {}
            other => {
                return Err(BsonError::invalid_state(
                    operation,
                    format!("the writer state is {}", other),
                ))
            }
        }
        let name = self.pending_name.take();
        let indent = self.settings.indent;
        let new_line = &self.settings.new_line_chars;
        if let Some(ctx) = self.contexts.last_mut() {
            match ctx.context_type {
                ContextType::Array => {
                    if ctx.has_elements {
                        self.out.push_str(", ");
                    }
                }
                ContextType::Document | ContextType::ScopeDocument => {
                    if ctx.has_elements {
                        self.out.push(',');
                    }
                    if indent {
                        self.out.push_str(new_line);
                        self.out.push_str(&ctx.indentation);
                    } else {
                        self.out.push(' ');
                    }
                    write_quoted_string(&mut self.out, name.as_deref().unwrap_or_default());
                    self.out.push_str(" : ");
                }
                ContextType::TopLevel | ContextType::JavaScriptWithScope => {}
            }
            ctx.has_elements = true;
        }
        Ok(())
    }

    fn finish_value(&mut self) {
        self.state = self.next_state();
    }

    fn push_context(&mut self, context_type: ContextType) -> BsonResult<()> {
        if self.contexts.len() >= self.settings.max_nesting_depth {
            return Err(BsonError::MaxDepthExceeded(self.settings.max_nesting_depth));
        }
        let mut indentation = self
            .contexts
            .last()
            .map(|c| c.indentation.clone())
            .unwrap_or_default();
        indentation.push_str(&self.settings.indent_chars);
        self.contexts.push(JsonContext {
            context_type,
            indentation,
            has_elements: false,
        });
        Ok(())
    }

    fn write_scalar(&mut self, operation: &'static str, text: &str) -> BsonResult<()> {
        self.begin_value(operation)?;
        self.out.push_str(text);
        self.finish_value();
        Ok(())
    }

    fn date_time_text(&self, millis: i64) -> String {
        let dt = BsonDateTime::from_millis(millis);
        match self.mode() {
            JsonOutputMode::Strict => format!("{{ \"$date\" : {} }}", millis),
            JsonOutputMode::Shell => match dt.to_iso_string() {
                Ok(iso) => format!("ISODate(\"{}\")", iso),
                Err(_) => format!("new Date({})", millis),
            },
            JsonOutputMode::Canonical => {
                format!("{{ \"$date\" : {{ \"$numberLong\" : \"{}\" }} }}", millis)
            }
            JsonOutputMode::Relaxed => match dt.to_iso_string() {
                Ok(iso) if (0..=DATE_TIME_MAX_MILLIS).contains(&millis) => {
                    format!("{{ \"$date\" : \"{}\" }}", iso)
                }
                _ => format!("{{ \"$date\" : {{ \"$numberLong\" : \"{}\" }} }}", millis),
            },
        }
    }

    fn binary_text(&self, value: &Binary) -> String {
        let subtype = u8::from(value.subtype);
        let base64 = value.to_base64();
        match self.mode() {
            JsonOutputMode::Shell => {
                if value.subtype == BinarySubtype::Uuid && value.bytes.len() == 16 {
                    if let Ok(uuid) = value.to_uuid(GuidRepresentation::Standard) {
                        return format!("UUID(\"{}\")", uuid);
                    }
                }
                format!("new BinData({}, \"{}\")", subtype, base64)
            }
            JsonOutputMode::Strict => {
                format!("{{ \"$binary\" : \"{}\", \"$type\" : \"{:02x}\" }}", base64, subtype)
            }
            JsonOutputMode::Canonical | JsonOutputMode::Relaxed => format!(
                "{{ \"$binary\" : {{ \"base64\" : \"{}\", \"subType\" : \"{:02x}\" }} }}",
                base64, subtype
            ),
        }
    }

    fn regex_text(&self, value: &Regex) -> String {
        let mut text = String::new();
        match self.mode() {
            JsonOutputMode::Shell => {
                text.push('/');
                if value.pattern.is_empty() {
                    text.push_str("(?:)");
                } else {
                    text.push_str(&escape_regex_slashes(&value.pattern));
                }
                text.push('/');
                text.push_str(&value.options);
            }
            JsonOutputMode::Strict => {
                text.push_str("{ \"$regex\" : ");
                write_quoted_string(&mut text, &value.pattern);
                text.push_str(", \"$options\" : ");
                write_quoted_string(&mut text, &value.options);
                text.push_str(" }");
            }
            JsonOutputMode::Canonical | JsonOutputMode::Relaxed => {
                text.push_str("{ \"$regularExpression\" : { \"pattern\" : ");
                write_quoted_string(&mut text, &value.pattern);
                text.push_str(", \"options\" : ");
                write_quoted_string(&mut text, &value.options);
                text.push_str(" } }");
            }
        }
        text
    }
}

impl BsonWriter for JsonWriter {
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
        self.pending_name = Some(name.to_string());
        self.state = WriterState::Value;
        Ok(())
    }

    fn write_start_document(&mut self) -> BsonResult<()> {
        let context_type = if self.state == WriterState::ScopeDocument {
            ContextType::ScopeDocument
        } else {
            self.begin_value("WriteStartDocument")?;
            ContextType::Document
        };
        self.out.push('{');
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
                format!("the writer state is {}", self.state),
            ));
        }
        let ctx = self
            .contexts
            .pop()
            .ok_or_else(|| BsonError::invalid_state("WriteEndDocument", "no open context"))?;
        if self.settings.indent && ctx.has_elements {
            self.out.push_str(&self.settings.new_line_chars);
            if let Some(parent) = self.contexts.last() {
                self.out.push_str(&parent.indentation);
            }
        } else {
            self.out.push(' ');
        }
        self.out.push('}');
        if ctx.context_type == ContextType::ScopeDocument {
            self.contexts.pop();
            self.out.push_str(" }");
        }
        self.finish_value();
        Ok(())
    }

    fn write_start_array(&mut self) -> BsonResult<()> {
        self.begin_value("WriteStartArray")?;
        self.out.push('[');
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
        self.contexts.pop();
        self.out.push(']');
        self.finish_value();
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> BsonResult<()> {
        let text = format_double(value);
        let text = match self.mode() {
            JsonOutputMode::Canonical => format!("{{ \"$numberDouble\" : \"{}\" }}", text),
            JsonOutputMode::Strict | JsonOutputMode::Relaxed if !value.is_finite() => {
                format!("{{ \"$numberDouble\" : \"{}\" }}", text)
            }
            _ => text,
        };
        self.write_scalar("WriteDouble", &text)
    }

    fn write_string(&mut self, value: &str) -> BsonResult<()> {
        let mut text = String::with_capacity(value.len() + 2);
        write_quoted_string(&mut text, value);
        self.write_scalar("WriteString", &text)
    }

    fn write_binary(&mut self, value: &Binary) -> BsonResult<()> {
        let text = self.binary_text(value);
        self.write_scalar("WriteBinaryData", &text)
    }

    fn write_undefined(&mut self) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => "undefined",
            _ => "{ \"$undefined\" : true }",
        };
        self.write_scalar("WriteUndefined", text)
    }

    fn write_object_id(&mut self, value: ObjectId) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => format!("ObjectId(\"{}\")", value.to_hex()),
            _ => format!("{{ \"$oid\" : \"{}\" }}", value.to_hex()),
        };
        self.write_scalar("WriteObjectId", &text)
    }

    fn write_boolean(&mut self, value: bool) -> BsonResult<()> {
        self.write_scalar("WriteBoolean", if value { "true" } else { "false" })
    }

    fn write_date_time(&mut self, millis: i64) -> BsonResult<()> {
        let text = self.date_time_text(millis);
        self.write_scalar("WriteDateTime", &text)
    }

    fn write_null(&mut self) -> BsonResult<()> {
        self.write_scalar("WriteNull", "null")
    }

    fn write_regular_expression(&mut self, value: &Regex) -> BsonResult<()> {
        let text = self.regex_text(value);
        self.write_scalar("WriteRegularExpression", &text)
    }

    fn write_javascript(&mut self, code: &str) -> BsonResult<()> {
        let mut text = String::from("{ \"$code\" : ");
        write_quoted_string(&mut text, code);
        text.push_str(" }");
        self.write_scalar("WriteJavaScript", &text)
    }

    fn write_javascript_with_scope(&mut self, code: &str) -> BsonResult<()> {
        self.begin_value("WriteJavaScriptWithScope")?;
        self.out.push_str("{ \"$code\" : ");
        write_quoted_string(&mut self.out, code);
        self.out.push_str(", \"$scope\" : ");
        self.push_context(ContextType::JavaScriptWithScope)?;
        self.state = WriterState::ScopeDocument;
        Ok(())
    }

    fn write_symbol(&mut self, value: &str) -> BsonResult<()> {
        let mut text = String::from("{ \"$symbol\" : ");
        write_quoted_string(&mut text, value);
        text.push_str(" }");
        self.write_scalar("WriteSymbol", &text)
    }

    fn write_int32(&mut self, value: i32) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Canonical => format!("{{ \"$numberInt\" : \"{}\" }}", value),
            _ => value.to_string(),
        };
        self.write_scalar("WriteInt32", &text)
    }

    fn write_timestamp(&mut self, value: Timestamp) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => format!("Timestamp({}, {})", value.time, value.increment),
            _ => format!(
                "{{ \"$timestamp\" : {{ \"t\" : {}, \"i\" : {} }} }}",
                value.time, value.increment
            ),
        };
        self.write_scalar("WriteTimestamp", &text)
    }

    fn write_int64(&mut self, value: i64) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => {
                if i32::try_from(value).is_ok() {
                    format!("NumberLong({})", value)
                } else {
                    format!("NumberLong(\"{}\")", value)
                }
            }
            JsonOutputMode::Canonical => format!("{{ \"$numberLong\" : \"{}\" }}", value),
            JsonOutputMode::Strict | JsonOutputMode::Relaxed => value.to_string(),
        };
        self.write_scalar("WriteInt64", &text)
    }

    fn write_decimal128(&mut self, value: Decimal128) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => format!("NumberDecimal(\"{}\")", value),
            _ => format!("{{ \"$numberDecimal\" : \"{}\" }}", value),
        };
        self.write_scalar("WriteDecimal128", &text)
    }

    fn write_min_key(&mut self) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => "MinKey",
            _ => "{ \"$minKey\" : 1 }",
        };
        self.write_scalar("WriteMinKey", text)
    }

    fn write_max_key(&mut self) -> BsonResult<()> {
        let text = match self.mode() {
            JsonOutputMode::Shell => "MaxKey",
            _ => "{ \"$maxKey\" : 1 }",
        };
        self.write_scalar("WriteMaxKey", text)
    }
}

/// 最短往返表示, 整数值补 ".0"
pub(crate) fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let mut text = format!("{:?}", value);
    if !text.contains(|c: char| c == '.' || c == 'e' || c == 'E') {
        text.push_str(".0");
    }
    text
}

pub(crate) fn write_quoted_string(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn escape_regex_slashes(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    let mut previous_backslash = false;
    for c in pattern.chars() {
        if c == '/' && !previous_backslash {
            escaped.push('\\');
        }
        previous_backslash = c == '\\' && !previous_backslash;
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bson, doc};

    fn render(value: &BsonValue, mode: JsonOutputMode) -> String {
        JsonWriter::value_to_string(value, &JsonWriterSettings::with_mode(mode)).unwrap()
    }

    #[test]
    fn test_document_layout() {
        let value = bson!({ "a": 1, "b": { }, "c": [] });
        assert_eq!(
            render(&value, JsonOutputMode::Shell),
            "{ \"a\" : 1, \"b\" : { }, \"c\" : [] }"
        );
    }

    #[test]
    fn test_indented_layout() {
        let settings = JsonWriterSettings {
            indent: true,
            ..Default::default()
        };
        let text = doc! { "a": 1, "b": { "c": 2 } }.to_json_with(&settings).unwrap();
        assert_eq!(text, "{\n  \"a\" : 1,\n  \"b\" : {\n    \"c\" : 2\n  }\n}");
    }

    #[test]
    fn test_int64_per_mode() {
        let small = BsonValue::Int64(5);
        let large = BsonValue::Int64(5_000_000_000);
        assert_eq!(render(&small, JsonOutputMode::Shell), "NumberLong(5)");
        assert_eq!(render(&large, JsonOutputMode::Shell), "NumberLong(\"5000000000\")");
        assert_eq!(render(&small, JsonOutputMode::Strict), "5");
        assert_eq!(
            render(&small, JsonOutputMode::Canonical),
            "{ \"$numberLong\" : \"5\" }"
        );
    }

    #[test]
    fn test_doubles() {
        assert_eq!(render(&BsonValue::Double(1.0), JsonOutputMode::Shell), "1.0");
        assert_eq!(render(&BsonValue::Double(-2.5), JsonOutputMode::Strict), "-2.5");
        assert_eq!(render(&BsonValue::Double(f64::NAN), JsonOutputMode::Shell), "NaN");
        assert_eq!(
            render(&BsonValue::Double(f64::INFINITY), JsonOutputMode::Relaxed),
            "{ \"$numberDouble\" : \"Infinity\" }"
        );
        assert_eq!(
            render(&BsonValue::Double(1.0), JsonOutputMode::Canonical),
            "{ \"$numberDouble\" : \"1.0\" }"
        );
    }

    #[test]
    fn test_dates() {
        let dt = BsonValue::DateTime(BsonDateTime::from_millis(0));
        assert_eq!(
            render(&dt, JsonOutputMode::Shell),
            "ISODate(\"1970-01-01T00:00:00.000Z\")"
        );
        assert_eq!(render(&dt, JsonOutputMode::Strict), "{ \"$date\" : 0 }");
        assert_eq!(
            render(&dt, JsonOutputMode::Relaxed),
            "{ \"$date\" : \"1970-01-01T00:00:00.000Z\" }"
        );
        let before_epoch = BsonValue::DateTime(BsonDateTime::from_millis(-1));
        assert_eq!(
            render(&before_epoch, JsonOutputMode::Relaxed),
            "{ \"$date\" : { \"$numberLong\" : \"-1\" } }"
        );
        let huge = BsonValue::DateTime(BsonDateTime::from_millis(i64::MAX));
        assert_eq!(
            render(&huge, JsonOutputMode::Shell),
            format!("new Date({})", i64::MAX)
        );
    }

    #[test]
    fn test_binary_and_uuid() {
        let bin = BsonValue::Binary(Binary::generic(vec![1, 2, 3]));
        assert_eq!(render(&bin, JsonOutputMode::Shell), "new BinData(0, \"AQID\")");
        assert_eq!(
            render(&bin, JsonOutputMode::Strict),
            "{ \"$binary\" : \"AQID\", \"$type\" : \"00\" }"
        );
        let uuid = uuid::Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(
            render(&BsonValue::from(uuid), JsonOutputMode::Shell),
            "UUID(\"00112233-4455-6677-8899-aabbccddeeff\")"
        );
    }

    #[test]
    fn test_regex_and_specials() {
        let re = BsonValue::RegularExpression(Regex::new("a/b", "i"));
        assert_eq!(render(&re, JsonOutputMode::Shell), "/a\\/b/i");
        assert_eq!(
            render(&re, JsonOutputMode::Strict),
            "{ \"$regex\" : \"a/b\", \"$options\" : \"i\" }"
        );
        assert_eq!(render(&BsonValue::MinKey, JsonOutputMode::Shell), "MinKey");
        assert_eq!(
            render(&BsonValue::MaxKey, JsonOutputMode::Strict),
            "{ \"$maxKey\" : 1 }"
        );
        assert_eq!(
            render(&BsonValue::Timestamp(Timestamp::new(1, 2)), JsonOutputMode::Shell),
            "Timestamp(1, 2)"
        );
    }

    #[test]
    fn test_string_escaping() {
        let value = BsonValue::from("a\"b\\c\n\u{1}");
        assert_eq!(
            render(&value, JsonOutputMode::Strict),
            "\"a\\\"b\\\\c\\n\\u0001\""
        );
    }

    #[test]
    fn test_code_with_scope() {
        let value = BsonValue::JavaScriptWithScope(crate::JavaScriptCodeWithScope {
            code: "x".to_string(),
            scope: doc! { "x": 1 },
        });
        assert_eq!(
            render(&value, JsonOutputMode::Shell),
            "{ \"$code\" : \"x\", \"$scope\" : { \"x\" : 1 } }"
        );
    }
}
