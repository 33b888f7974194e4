//! BSON 值类型定义模块
//!
//! 定义了 BSON 格式支持的全部值类型。数值类型保持区分:
//! Int32 与 Int64 不会互相替换, 双精度浮点数不会被改写为整数。

use crate::binary::Binary;
use crate::datetime::BsonDateTime;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};
use chrono::{DateTime, Utc};
use docwire_common::ObjectId;
use std::fmt;

/// BSON 值的枚举类型
///
/// # 支持的类型
///
/// - **数值类型**: Double, Int32, Int64, Decimal128
/// - **文本类型**: String, Symbol, JavaScript
/// - **复合类型**: Document, Array, JavaScriptWithScope
/// - **特殊类型**: Binary, ObjectId, DateTime, Timestamp, RegularExpression
/// - **标记类型**: Null, Undefined, MinKey, MaxKey
///
/// # 示例
///
/// ```rust,ignore
/// use docwire_bson::BsonValue;
///
/// let value = BsonValue::from("hello");
/// assert_eq!(value.element_type(), ElementType::String);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum BsonValue {
    /// 64 位浮点数
    Double(f64),
    /// UTF-8 字符串
    String(String),
    /// 嵌入文档
    Document(Document),
    /// 数组
    Array(Vec<BsonValue>),
    /// 二进制数据
    Binary(Binary),
    /// 已废弃的 undefined
    Undefined,
    /// 12 字节对象标识符
    ObjectId(ObjectId),
    Boolean(bool),
    /// 自 Unix 纪元起的毫秒数
    DateTime(BsonDateTime),
    Null,
    /// 正则表达式
    RegularExpression(Regex),
    /// JavaScript 代码
    JavaScript(String),
    /// 带作用域的 JavaScript 代码
    JavaScriptWithScope(JavaScriptCodeWithScope),
    /// 已废弃的符号类型
    Symbol(String),
    Int32(i32),
    /// 复制集内部时间戳
    Timestamp(Timestamp),
    Int64(i64),
    /// IEEE 754-2008 十进制浮点数
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

impl BsonValue {
    /// 获取值对应的元素类型标记
    pub fn element_type(&self) -> ElementType {
        match self {
            BsonValue::Double(_) => ElementType::Double,
            BsonValue::String(_) => ElementType::String,
            BsonValue::Document(_) => ElementType::Document,
            BsonValue::Array(_) => ElementType::Array,
            BsonValue::Binary(_) => ElementType::Binary,
            BsonValue::Undefined => ElementType::Undefined,
            BsonValue::ObjectId(_) => ElementType::ObjectId,
            BsonValue::Boolean(_) => ElementType::Boolean,
            BsonValue::DateTime(_) => ElementType::DateTime,
            BsonValue::Null => ElementType::Null,
            BsonValue::RegularExpression(_) => ElementType::RegularExpression,
            BsonValue::JavaScript(_) => ElementType::JavaScript,
            BsonValue::JavaScriptWithScope(_) => ElementType::JavaScriptWithScope,
            BsonValue::Symbol(_) => ElementType::Symbol,
            BsonValue::Int32(_) => ElementType::Int32,
            BsonValue::Timestamp(_) => ElementType::Timestamp,
            BsonValue::Int64(_) => ElementType::Int64,
            BsonValue::Decimal128(_) => ElementType::Decimal128,
            BsonValue::MinKey => ElementType::MinKey,
            BsonValue::MaxKey => ElementType::MaxKey,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.element_type().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BsonValue::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            BsonValue::Double(_)
                | BsonValue::Int32(_)
                | BsonValue::Int64(_)
                | BsonValue::Decimal128(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BsonValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            BsonValue::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// # Brief
    /// 获取 64 位整数值
    ///
    /// Int32 会被无损扩宽, 其他类型返回 None
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BsonValue::Int32(n) => Some(*n as i64),
            BsonValue::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// # Brief
    /// 获取浮点数值
    ///
    /// Int32 与 Int64 会被转换, 其他类型返回 None
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BsonValue::Double(n) => Some(*n),
            BsonValue::Int32(n) => Some(*n as f64),
            BsonValue::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BsonValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<BsonValue>> {
        match self {
            BsonValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            BsonValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            BsonValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            BsonValue::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<BsonDateTime> {
        match self {
            BsonValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Binary> {
        match self {
            BsonValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// # Brief
    /// 获取文档中的字段值
    ///
    /// # Arguments
    /// * `key` - 字段名
    ///
    /// # Returns
    /// 值不是文档或字段不存在时返回 None
    pub fn get(&self, key: &str) -> Option<&BsonValue> {
        self.as_document().and_then(|doc| doc.get(key))
    }

    /// # Brief
    /// 按点分路径获取嵌套值
    ///
    /// 路径分段为纯数字时在数组中按下标取值, 例如 "items.0.name"。
    pub fn get_path(&self, path: &str) -> Option<&BsonValue> {
        let mut current = self;
        for part in path.split('.') {
            current = match current {
                BsonValue::Document(doc) => doc.get(part)?,
                BsonValue::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// 以 shell 模式 JSON 文本表示
    pub fn to_json(&self) -> String {
        self.to_string()
    }
}

impl Default for BsonValue {
    fn default() -> Self {
        BsonValue::Null
    }
}

impl fmt::Display for BsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match crate::io::JsonWriter::value_to_string(self, &Default::default()) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// BSON 正则表达式
///
/// 模式与选项都以 C 字符串存储, 不能包含 0x00。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

impl Regex {
    /// 创建正则表达式, 选项字符按字母序规范化
    pub fn new(pattern: impl Into<String>, options: impl AsRef<str>) -> Self {
        let mut chars: Vec<char> = options.as_ref().chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self {
            pattern: pattern.into(),
            options: chars.into_iter().collect(),
        }
    }

    /// # Brief
    /// 编译为 `regex::Regex`
    ///
    /// 支持 i、m、s、x 四个选项, 其余选项 (如 l、u) 被忽略。
    pub fn to_regex(&self) -> BsonResult<regex::Regex> {
        regex::RegexBuilder::new(&self.pattern)
            .case_insensitive(self.options.contains('i'))
            .multi_line(self.options.contains('m'))
            .dot_matches_new_line(self.options.contains('s'))
            .ignore_whitespace(self.options.contains('x'))
            .build()
            .map_err(|e| {
                BsonError::InvalidDocument(format!("Invalid regular expression /{}/: {}", self.pattern, e))
            })
    }
}

/// BSON 时间戳: 高 32 位为秒, 低 32 位为递增序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }

    pub fn to_u64(&self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            time: (value >> 32) as u32,
            increment: value as u32,
        }
    }
}

/// 带作用域文档的 JavaScript 代码
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JavaScriptCodeWithScope {
    pub code: String,
    pub scope: Document,
}

impl From<bool> for BsonValue {
    fn from(v: bool) -> Self {
        BsonValue::Boolean(v)
    }
}

impl From<i32> for BsonValue {
    fn from(v: i32) -> Self {
        BsonValue::Int32(v)
    }
}

impl From<i64> for BsonValue {
    fn from(v: i64) -> Self {
        BsonValue::Int64(v)
    }
}

impl From<f32> for BsonValue {
    fn from(v: f32) -> Self {
        BsonValue::Double(v as f64)
    }
}

impl From<f64> for BsonValue {
    fn from(v: f64) -> Self {
        BsonValue::Double(v)
    }
}

impl From<&str> for BsonValue {
    fn from(v: &str) -> Self {
        BsonValue::String(v.to_string())
    }
}

impl From<String> for BsonValue {
    fn from(v: String) -> Self {
        BsonValue::String(v)
    }
}

impl From<Document> for BsonValue {
    fn from(v: Document) -> Self {
        BsonValue::Document(v)
    }
}

impl From<Binary> for BsonValue {
    fn from(v: Binary) -> Self {
        BsonValue::Binary(v)
    }
}

impl From<ObjectId> for BsonValue {
    fn from(v: ObjectId) -> Self {
        BsonValue::ObjectId(v)
    }
}

impl From<BsonDateTime> for BsonValue {
    fn from(v: BsonDateTime) -> Self {
        BsonValue::DateTime(v)
    }
}

impl From<DateTime<Utc>> for BsonValue {
    fn from(v: DateTime<Utc>) -> Self {
        BsonValue::DateTime(BsonDateTime::from(v))
    }
}

impl From<Decimal128> for BsonValue {
    fn from(v: Decimal128) -> Self {
        BsonValue::Decimal128(v)
    }
}

impl From<Regex> for BsonValue {
    fn from(v: Regex) -> Self {
        BsonValue::RegularExpression(v)
    }
}

impl From<Timestamp> for BsonValue {
    fn from(v: Timestamp) -> Self {
        BsonValue::Timestamp(v)
    }
}

impl From<JavaScriptCodeWithScope> for BsonValue {
    fn from(v: JavaScriptCodeWithScope) -> Self {
        BsonValue::JavaScriptWithScope(v)
    }
}

impl From<uuid::Uuid> for BsonValue {
    /// 按标准表示法 (子类型 4) 编码
    fn from(v: uuid::Uuid) -> Self {
        BsonValue::Binary(Binary::new(
            crate::spec::BinarySubtype::Uuid,
            v.as_bytes().to_vec(),
        ))
    }
}

impl<T: Into<BsonValue>> From<Vec<T>> for BsonValue {
    fn from(v: Vec<T>) -> Self {
        BsonValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<BsonValue>> From<Option<T>> for BsonValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => BsonValue::Null,
        }
    }
}

/// 构造 BsonValue 的宏
///
/// 负数与复杂表达式需要加括号, 例如 `bson!((-1))`。
///
/// ```rust,ignore
/// let v = bson!({ "name": "x", "tags": ["a", "b"], "n": (-1) });
/// ```
#[macro_export]
macro_rules! bson {
    (null) => {
        $crate::BsonValue::Null
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::BsonValue::Array(vec![ $($crate::bson!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::BsonValue::Document($crate::doc! { $($key : $value),* })
    };
    ($e:expr) => {
        $crate::BsonValue::from($e)
    };
}

/// 构造 Document 的宏, 字段按书写顺序排列
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ( $($key:tt : $value:tt),* $(,)? ) => {{
        let mut doc = $crate::Document::new();
        $(
            doc.insert($key, $crate::bson!($value));
        )*
        doc
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types_stay_distinct() {
        assert_eq!(BsonValue::from(1i32).element_type(), ElementType::Int32);
        assert_eq!(BsonValue::from(1i64).element_type(), ElementType::Int64);
        assert_eq!(BsonValue::from(1.0f64).element_type(), ElementType::Double);
        assert_ne!(BsonValue::Int32(1), BsonValue::Int64(1));
        assert_eq!(BsonValue::Int32(7).as_i64(), Some(7));
        assert_eq!(BsonValue::Int64(7).as_i32(), None);
    }

    #[test]
    fn test_macros() {
        let value = bson!({
            "name": "widget",
            "tags": ["a", "b"],
            "nested": { "n": (-3) },
            "missing": null
        });
        assert_eq!(value.get("name").and_then(|v| v.as_str()), Some("widget"));
        assert_eq!(value.get_path("tags.1").and_then(|v| v.as_str()), Some("b"));
        assert_eq!(value.get_path("nested.n"), Some(&BsonValue::Int32(-3)));
        assert!(value.get("missing").map(|v| v.is_null()).unwrap_or(false));
        assert_eq!(value.get_path("tags.9"), None);
    }

    #[test]
    fn test_regex_options_sorted() {
        let re = Regex::new("^ab", "xmi");
        assert_eq!(re.options, "imx");
        let compiled = re.to_regex().unwrap();
        assert!(compiled.is_match("AB"));
    }

    #[test]
    fn test_timestamp_layout() {
        let ts = Timestamp::new(5, 1);
        assert_eq!(ts.to_u64(), (5u64 << 32) | 1);
        assert_eq!(Timestamp::from_u64(ts.to_u64()), ts);
    }

    #[test]
    fn test_display_uses_shell_json() {
        let value = bson!({ "a": 1, "b": [true, null] });
        assert_eq!(value.to_string(), "{ \"a\" : 1, \"b\" : [true, null] }");
    }
}
