//! BSON 与 serde_json 互转模块
//!
//! JSON 类型系统较简单, BSON 特有类型以扩展 JSON 包装文档表示,
//! 例如 `{"$oid": "..."}`、`{"$date": {"$numberLong": "..."}}`。
//! 文本读取器与 `serde_json::Value` 转换共用同一套包装识别逻辑。

use crate::binary::Binary;
use crate::datetime::BsonDateTime;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::io::{JsonReader, JsonWriter, JsonWriterSettings};
use crate::spec::BinarySubtype;
use crate::value::{BsonValue, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use docwire_common::{GuidRepresentation, JsonOutputMode, ObjectId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// 将 BsonValue 转换为 JSON
///
/// # Brief
/// 按指定模式生成扩展 JSON 结构
///
/// shell 模式的构造函数语法不是合法 JSON, 因此只接受
/// strict、canonical 与 relaxed 三种模式。
///
/// # Arguments
/// * `value` - 要转换的 BSON 值
/// * `mode` - 输出模式
///
/// # Returns
/// 成功返回 JSON 值, 失败返回错误
pub fn to_json(value: &BsonValue, mode: JsonOutputMode) -> BsonResult<JsonValue> {
    if mode == JsonOutputMode::Shell {
        return Err(BsonError::Configuration(
            "shell output mode does not produce valid JSON".to_string(),
        ));
    }
    let text = JsonWriter::value_to_string(value, &JsonWriterSettings::with_mode(mode))?;
    serde_json::from_str(&text).map_err(|e| BsonError::JsonSyntax {
        position: e.column(),
        message: e.to_string(),
    })
}

/// 将 JSON 转换为 BsonValue
///
/// # Brief
/// 递归转换 JSON 值, 识别扩展 JSON 包装文档
///
/// 整数优先映射为 Int32, 超出范围时为 Int64; 超出 i64 的整数与小数映射为 Double。
///
/// # Arguments
/// * `value` - JSON 值
///
/// # Returns
/// 成功返回 BSON 值, 包装文档内容非法时返回错误
pub fn from_json(value: &JsonValue) -> BsonResult<BsonValue> {
    Ok(match value {
        JsonValue::Null => BsonValue::Null,
        JsonValue::Bool(b) => BsonValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => BsonValue::Int32(small),
                    Err(_) => BsonValue::Int64(i),
                }
            } else {
                BsonValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => BsonValue::String(s.clone()),
        JsonValue::Array(items) => {
            BsonValue::Array(items.iter().map(from_json).collect::<BsonResult<_>>()?)
        }
        JsonValue::Object(map) => {
            let mut doc = Document::with_capacity(map.len());
            for (key, item) in map {
                doc.push_unchecked(key.as_str(), from_json(item)?);
            }
            from_extended_document(doc)?
        }
    })
}

/// 将 BsonValue 转换为 JSON 字符串 (relaxed 模式)
pub fn to_json_string(value: &BsonValue) -> BsonResult<String> {
    JsonWriter::value_to_string(value, &JsonWriterSettings::with_mode(JsonOutputMode::Relaxed))
}

/// 解析任意模式的 JSON 文本
pub fn from_json_string(json_str: &str) -> BsonResult<BsonValue> {
    JsonReader::new(json_str).parse_value()
}

/// 识别扩展 JSON 包装文档
///
/// 第一个键以 `$` 开头且结构与某个包装形式完全吻合时转换为对应类型,
/// 否则原样返回文档 (例如查询操作符 `{"$gt": 1}`)。
pub(crate) fn from_extended_document(doc: Document) -> BsonResult<BsonValue> {
    let is_candidate = doc
        .first()
        .map(|(key, _)| key.starts_with('$'))
        .unwrap_or(false);
    if !is_candidate {
        return Ok(BsonValue::Document(doc));
    }
    let converted = match doc.len() {
        1 => convert_single(&doc)?,
        2 => convert_pair(&doc)?,
        _ => None,
    };
    Ok(converted.unwrap_or(BsonValue::Document(doc)))
}

fn convert_single(doc: &Document) -> BsonResult<Option<BsonValue>> {
    let Some((key, value)) = doc.first() else {
        return Ok(None);
    };
    let converted = match (key, value) {
        ("$oid", BsonValue::String(hex)) => BsonValue::ObjectId(ObjectId::parse(hex)?),
        ("$date", BsonValue::String(iso)) => BsonValue::DateTime(BsonDateTime::parse_iso(iso)?),
        ("$date", BsonValue::Int32(_) | BsonValue::Int64(_)) => {
            BsonValue::DateTime(BsonDateTime::from_millis(value.as_i64().unwrap_or_default()))
        }
        ("$date", BsonValue::Double(ms)) => BsonValue::DateTime(BsonDateTime::from_millis(*ms as i64)),
        ("$numberInt", BsonValue::String(text)) => BsonValue::Int32(
            text.parse()
                .map_err(|_| BsonError::OutOfRange(format!("invalid $numberInt {:?}", text)))?,
        ),
        ("$numberLong", BsonValue::String(text)) => BsonValue::Int64(
            text.parse()
                .map_err(|_| BsonError::OutOfRange(format!("invalid $numberLong {:?}", text)))?,
        ),
        ("$numberDouble", BsonValue::String(text)) => BsonValue::Double(parse_double(text)?),
        ("$numberDecimal", BsonValue::String(text)) => {
            BsonValue::Decimal128(Decimal128::parse(text)?)
        }
        ("$binary", BsonValue::Document(inner)) => {
            let (Some(base64), Some(subtype)) = (inner.get_str("base64"), inner.get_str("subType"))
            else {
                return Ok(None);
            };
            BsonValue::Binary(Binary::from_base64(parse_subtype(subtype)?, base64)?)
        }
        ("$uuid", BsonValue::String(text)) => {
            let uuid = uuid::Uuid::parse_str(text)
                .map_err(|e| BsonError::InvalidDocument(format!("invalid $uuid: {}", e)))?;
            BsonValue::Binary(Binary::from_uuid(uuid, GuidRepresentation::Standard)?)
        }
        ("$regularExpression", BsonValue::Document(inner)) => {
            let (Some(pattern), Some(options)) = (inner.get_str("pattern"), inner.get_str("options"))
            else {
                return Ok(None);
            };
            BsonValue::RegularExpression(Regex::new(pattern, options))
        }
        ("$timestamp", BsonValue::Document(inner)) => {
            let (Some(t), Some(i)) = (
                inner.get("t").and_then(BsonValue::as_i64),
                inner.get("i").and_then(BsonValue::as_i64),
            ) else {
                return Ok(None);
            };
            let time = u32::try_from(t)
                .map_err(|_| BsonError::OutOfRange(format!("$timestamp t {}", t)))?;
            let increment = u32::try_from(i)
                .map_err(|_| BsonError::OutOfRange(format!("$timestamp i {}", i)))?;
            BsonValue::Timestamp(Timestamp::new(time, increment))
        }
        ("$minKey", _) => BsonValue::MinKey,
        ("$maxKey", _) => BsonValue::MaxKey,
        ("$undefined", BsonValue::Boolean(true)) => BsonValue::Undefined,
        ("$symbol", BsonValue::String(s)) => BsonValue::Symbol(s.clone()),
        ("$code", BsonValue::String(code)) => BsonValue::JavaScript(code.clone()),
        _ => return Ok(None),
    };
    Ok(Some(converted))
}

fn convert_pair(doc: &Document) -> BsonResult<Option<BsonValue>> {
    if let (Some(base64), Some(subtype)) = (doc.get_str("$binary"), doc.get_str("$type")) {
        let bin = Binary::from_base64(parse_subtype(subtype)?, base64)?;
        return Ok(Some(BsonValue::Binary(bin)));
    }
    if let (Some(pattern), Some(options)) = (doc.get_str("$regex"), doc.get_str("$options")) {
        return Ok(Some(BsonValue::RegularExpression(Regex::new(pattern, options))));
    }
    if let (Some(code), Some(scope)) = (doc.get_str("$code"), doc.get_document("$scope")) {
        return Ok(Some(BsonValue::JavaScriptWithScope(JavaScriptCodeWithScope {
            code: code.to_string(),
            scope: scope.clone(),
        })));
    }
    Ok(None)
}

fn parse_subtype(text: &str) -> BsonResult<BinarySubtype> {
    u8::from_str_radix(text, 16)
        .map(BinarySubtype::from)
        .map_err(|_| BsonError::InvalidDocument(format!("invalid binary subtype {:?}", text)))
}

fn parse_double(text: &str) -> BsonResult<f64> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .map_err(|_| BsonError::OutOfRange(format!("invalid $numberDouble {:?}", text))),
    }
}

impl Serialize for BsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self, JsonOutputMode::Relaxed)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BsonValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        from_json(&json).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match BsonValue::deserialize(deserializer)? {
            BsonValue::Document(doc) => Ok(doc),
            other => Err(serde::de::Error::custom(format!(
                "expected a document, found a {}",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde_json::json;

    #[test]
    fn test_basic_types() {
        assert_eq!(from_json(&json!(null)).unwrap(), BsonValue::Null);
        assert_eq!(from_json(&json!(true)).unwrap(), BsonValue::Boolean(true));
        assert_eq!(from_json(&json!(42)).unwrap(), BsonValue::Int32(42));
        assert_eq!(from_json(&json!(1u64 << 40)).unwrap(), BsonValue::Int64(1 << 40));
        assert_eq!(from_json(&json!(u64::MAX)).unwrap(), BsonValue::Double(u64::MAX as f64));
        assert_eq!(from_json(&json!(1.5)).unwrap(), BsonValue::Double(1.5));
    }

    #[test]
    fn test_wrappers() {
        let value = from_json(&json!({
            "_id": { "$oid": "507f1f77bcf86cd799439011" },
            "when": { "$date": { "$numberLong": "-1" } },
            "n": { "$numberDouble": "-Infinity" },
            "ts": { "$timestamp": { "t": 4294967295u32, "i": 1 } },
            "re": { "$regex": "^a", "$options": "i" },
            "op": { "$in": [1, 2] },
            "not_wrapper": { "$oid": "507f1f77bcf86cd799439011", "extra": 1 }
        }))
        .unwrap();
        let doc = value.as_document().unwrap();
        assert!(doc.get_object_id("_id").is_some());
        assert_eq!(doc.get_datetime("when").map(|d| d.timestamp_millis()), Some(-1));
        assert_eq!(doc.get_f64("n"), Some(f64::NEG_INFINITY));
        assert_eq!(
            doc.get("ts"),
            Some(&BsonValue::Timestamp(Timestamp::new(u32::MAX, 1)))
        );
        assert_eq!(doc.get("re"), Some(&BsonValue::RegularExpression(Regex::new("^a", "i"))));
        assert!(doc.get_document("op").is_some());
        assert!(doc.get_document("not_wrapper").is_some());
    }

    #[test]
    fn test_malformed_wrapper_is_an_error() {
        assert!(from_json(&json!({ "$oid": "xyz" })).is_err());
        assert!(from_json(&json!({ "$numberLong": "1.5" })).is_err());
    }

    #[test]
    fn test_canonical_round_trip() {
        let original = BsonValue::Document(doc! {
            "i": 1,
            "l": 2i64,
            "d": 0.5,
            "dt": (BsonDateTime::from_millis(42)),
            "bin": (Binary::generic(vec![9, 8]))
        });
        let json = to_json(&original, JsonOutputMode::Canonical).unwrap();
        assert_eq!(json["l"], json!({ "$numberLong": "2" }));
        assert_eq!(from_json(&json).unwrap(), original);
    }

    #[test]
    fn test_key_order_is_preserved() {
        let json = to_json(&BsonValue::Document(doc! { "z": 1, "a": 2 }), JsonOutputMode::Relaxed).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_shell_mode_rejected() {
        assert!(to_json(&BsonValue::Null, JsonOutputMode::Shell).is_err());
    }

    #[test]
    fn test_serde_impls() {
        let doc = doc! { "name": "x", "id": (ObjectId::from_bytes([1; 12])) };
        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.contains("$oid"));
        let back: Document = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc);
    }
}
