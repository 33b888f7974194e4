//! 与 `bson` crate 互转模块
//!
//! 在 `BsonValue`/`Document` 与 `bson::Bson`/`bson::Document` 之间逐类型转换,
//! 便于与使用官方驱动类型的代码交换数据。两边的二进制编码逐字节一致。

use crate::binary::Binary;
use crate::datetime::BsonDateTime;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::spec::BinarySubtype;
use crate::value::{BsonValue, JavaScriptCodeWithScope, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bson::Bson;
use docwire_common::ObjectId;

/// 将 BsonValue 转换为 `bson::Bson`
///
/// # Brief
/// 所有 BSON 类型一一对应, 二进制子类型按字节值保留
///
/// # Arguments
/// * `value` - 要转换的值
///
/// # Returns
/// 成功返回 `bson::Bson`; 文档含重复元素名时返回错误
pub fn to_bson(value: &BsonValue) -> BsonResult<Bson> {
    Ok(match value {
        BsonValue::Double(f) => Bson::Double(*f),
        BsonValue::String(s) => Bson::String(s.clone()),
        BsonValue::Document(doc) => Bson::Document(to_bson_document(doc)?),
        BsonValue::Array(arr) => Bson::Array(arr.iter().map(to_bson).collect::<BsonResult<_>>()?),
        BsonValue::Binary(b) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::from(u8::from(b.subtype)),
            bytes: b.bytes.clone(),
        }),
        BsonValue::Undefined => Bson::Undefined,
        BsonValue::ObjectId(oid) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(oid.bytes())),
        BsonValue::Boolean(b) => Bson::Boolean(*b),
        BsonValue::DateTime(dt) => Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis())),
        BsonValue::Null => Bson::Null,
        BsonValue::RegularExpression(r) => Bson::RegularExpression(bson::Regex {
            pattern: r.pattern.clone(),
            options: r.options.clone(),
        }),
        BsonValue::JavaScript(code) => Bson::JavaScriptCode(code.clone()),
        BsonValue::JavaScriptWithScope(js) => {
            Bson::JavaScriptCodeWithScope(bson::JavaScriptCodeWithScope {
                code: js.code.clone(),
                scope: to_bson_document(&js.scope)?,
            })
        }
        BsonValue::Symbol(s) => Bson::Symbol(s.clone()),
        BsonValue::Int32(n) => Bson::Int32(*n),
        BsonValue::Timestamp(ts) => Bson::Timestamp(bson::Timestamp {
            time: ts.time,
            increment: ts.increment,
        }),
        BsonValue::Int64(n) => Bson::Int64(*n),
        BsonValue::Decimal128(d) => Bson::Decimal128(bson::Decimal128::from_bytes(d.to_bytes())),
        BsonValue::MinKey => Bson::MinKey,
        BsonValue::MaxKey => Bson::MaxKey,
    })
}

/// 从 `bson::Bson` 转换为 BsonValue
///
/// # Brief
/// DBPointer 已废弃且没有对应的值类型, 遇到时返回错误
pub fn from_bson(value: &Bson) -> BsonResult<BsonValue> {
    Ok(match value {
        Bson::Double(f) => BsonValue::Double(*f),
        Bson::String(s) => BsonValue::String(s.clone()),
        Bson::Array(arr) => BsonValue::Array(arr.iter().map(from_bson).collect::<BsonResult<_>>()?),
        Bson::Document(doc) => BsonValue::Document(from_bson_document(doc)?),
        Bson::Boolean(b) => BsonValue::Boolean(*b),
        Bson::Null => BsonValue::Null,
        Bson::RegularExpression(r) => BsonValue::RegularExpression(Regex {
            pattern: r.pattern.clone(),
            options: r.options.clone(),
        }),
        Bson::JavaScriptCode(code) => BsonValue::JavaScript(code.clone()),
        Bson::JavaScriptCodeWithScope(js) => {
            BsonValue::JavaScriptWithScope(JavaScriptCodeWithScope {
                code: js.code.clone(),
                scope: from_bson_document(&js.scope)?,
            })
        }
        Bson::Int32(n) => BsonValue::Int32(*n),
        Bson::Int64(n) => BsonValue::Int64(*n),
        Bson::Timestamp(ts) => BsonValue::Timestamp(Timestamp::new(ts.time, ts.increment)),
        Bson::Binary(b) => BsonValue::Binary(Binary::new(
            BinarySubtype::from(u8::from(b.subtype)),
            b.bytes.clone(),
        )),
        Bson::ObjectId(oid) => BsonValue::ObjectId(ObjectId::from_bytes(oid.bytes())),
        Bson::DateTime(dt) => BsonValue::DateTime(BsonDateTime::from_millis(dt.timestamp_millis())),
        Bson::Symbol(s) => BsonValue::Symbol(s.clone()),
        Bson::Decimal128(d) => BsonValue::Decimal128(Decimal128::from_bytes(d.bytes())),
        Bson::Undefined => BsonValue::Undefined,
        Bson::MaxKey => BsonValue::MaxKey,
        Bson::MinKey => BsonValue::MinKey,
        Bson::DbPointer(_) => {
            return Err(BsonError::InvalidDocument(
                "DBPointer values are not supported".to_string(),
            ))
        }
    })
}

/// 将 Document 转换为 `bson::Document`
///
/// # Brief
/// `bson::Document` 不允许重复元素名, 遇到重复时返回错误而不是静默覆盖
pub fn to_bson_document(doc: &Document) -> BsonResult<bson::Document> {
    let mut out = bson::Document::new();
    for (key, value) in doc.iter() {
        if out.contains_key(key) {
            return Err(BsonError::InvalidDocument(format!(
                "Duplicate element name '{}' cannot be represented",
                key
            )));
        }
        out.insert(key.to_string(), to_bson(value)?);
    }
    Ok(out)
}

/// 从 `bson::Document` 转换为 Document
pub fn from_bson_document(doc: &bson::Document) -> BsonResult<Document> {
    let mut out = Document::with_capacity(doc.len());
    for (key, value) in doc {
        out.insert(key.as_str(), from_bson(value)?);
    }
    Ok(out)
}

/// 用 `bson` crate 编码文档
///
/// # Brief
/// 主要用于校验两种实现对同一文档的编码结果
pub fn encode_with_bson_crate(doc: &Document) -> BsonResult<Vec<u8>> {
    let bson_doc = to_bson_document(doc)?;
    let mut bytes = Vec::new();
    bson_doc
        .to_writer(&mut bytes)
        .map_err(|e| BsonError::Serialization(e.to_string()))?;
    Ok(bytes)
}

/// 用 `bson` crate 解码字节
pub fn decode_with_bson_crate(bytes: &[u8]) -> BsonResult<Document> {
    let bson_doc = bson::Document::from_reader(&mut &bytes[..])
        .map_err(|e| BsonError::InvalidDocument(e.to_string()))?;
    from_bson_document(&bson_doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn sample() -> Document {
        let mut scope = Document::new();
        scope.insert("x", 1);
        let mut doc = doc! {
            "_id": (BsonValue::ObjectId(ObjectId::from_bytes([7u8; 12]))),
            "name": "widget",
            "count": 42,
            "big": 9_000_000_000i64,
            "ratio": 0.25,
            "tags": ["a", "b"],
            "nested": { "ok": true, "none": null }
        };
        doc.insert("when", BsonValue::DateTime(BsonDateTime::from_millis(1_700_000_000_000)));
        doc.insert("bin", BsonValue::Binary(Binary::new(BinarySubtype::UserDefined(0x80), vec![1, 2, 3])));
        doc.insert("re", BsonValue::RegularExpression(Regex::new("^a", "i")));
        doc.insert("ts", BsonValue::Timestamp(Timestamp::new(5, 6)));
        doc.insert("dec", BsonValue::Decimal128(Decimal128::from_bits(0x3040_0000_0000_0000, 15)));
        doc.insert(
            "code",
            BsonValue::JavaScriptWithScope(JavaScriptCodeWithScope {
                code: "x + 1".to_string(),
                scope,
            }),
        );
        doc.insert("sym", BsonValue::Symbol("s".to_string()));
        doc.insert("min", BsonValue::MinKey);
        doc.insert("max", BsonValue::MaxKey);
        doc.insert("undef", BsonValue::Undefined);
        doc
    }

    #[test]
    fn test_value_conversion_round_trip() {
        let doc = sample();
        let converted = to_bson_document(&doc).unwrap();
        assert_eq!(converted.get_str("name").unwrap(), "widget");
        assert_eq!(converted.get_i64("big").unwrap(), 9_000_000_000);
        assert_eq!(from_bson_document(&converted).unwrap(), doc);
    }

    #[test]
    fn test_encoding_matches_bson_crate() {
        let doc = sample();
        let ours = doc.to_vec().unwrap();
        let theirs = encode_with_bson_crate(&doc).unwrap();
        assert_eq!(ours, theirs);
        assert_eq!(decode_with_bson_crate(&ours).unwrap(), doc);
        assert_eq!(Document::from_slice(&theirs).unwrap(), doc);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut doc = Document::allowing_duplicates();
        doc.push("a", 1).unwrap();
        doc.push("a", 2).unwrap();
        assert!(matches!(to_bson_document(&doc), Err(BsonError::InvalidDocument(_))));
    }
}
