//! JSON 文本读取器
//!
//! 递归下降解析 strict、shell、canonical 与 relaxed 四种文本形式,
//! 结果物化为 `BsonValue`。扩展 JSON 包装对象 (如 `{ "$oid" : ... }`)
//! 在对象闭合时转换为对应的 BSON 类型。

use super::json_scanner::{tokenize, JsonToken};
use crate::binary::Binary;
use crate::datetime::BsonDateTime;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::spec::{BinarySubtype, MAX_NESTING_DEPTH};
use crate::value::{BsonValue, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use docwire_common::{GuidRepresentation, ObjectId};
use std::ops::Range;

/// JSON 文本读取器
pub struct JsonReader<'a> {
    input: &'a str,
    tokens: Vec<(JsonToken, Range<usize>)>,
    pos: usize,
    lex_error: Option<usize>,
    max_nesting_depth: usize,
}

impl<'a> JsonReader<'a> {
    pub fn new(input: &'a str) -> Self {
        let (tokens, lex_error) = match tokenize(input) {
            Ok(tokens) => (tokens, None),
            Err(offset) => (Vec::new(), Some(offset)),
        };
        Self {
            input,
            tokens,
            pos: 0,
            lex_error,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// 解析单个文档, 之后只能是输入结尾
    pub fn parse_document(&mut self) -> BsonResult<Document> {
        match self.parse_value()? {
            BsonValue::Document(doc) => Ok(doc),
            other => Err(self.syntax_error(
                0,
                format!("Expected a document, got a {}", other.type_name()),
            )),
        }
    }

    /// 解析单个值, 之后只能是输入结尾
    pub fn parse_value(&mut self) -> BsonResult<BsonValue> {
        if let Some(offset) = self.lex_error {
            return Err(self.syntax_error(offset, "Unrecognized character".to_string()));
        }
        let value = self.parse_value_at(0)?;
        if let Some((token, span)) = self.tokens.get(self.pos) {
            return Err(self.syntax_error(
                span.start,
                format!("Unexpected {} after the end of the value", token),
            ));
        }
        Ok(value)
    }

    fn syntax_error(&self, position: usize, message: String) -> BsonError {
        BsonError::JsonSyntax { position, message }
    }

    fn peek(&self) -> Option<&JsonToken> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.input.len())
    }

    fn next(&mut self) -> BsonResult<(JsonToken, usize)> {
        match self.tokens.get(self.pos) {
            Some((token, span)) => {
                let item = (token.clone(), span.start);
                self.pos += 1;
                Ok(item)
            }
            None => Err(self.syntax_error(self.input.len(), "Unexpected end of input".to_string())),
        }
    }

    fn expect(&mut self, expected: JsonToken) -> BsonResult<()> {
        let (token, offset) = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(self.syntax_error(offset, format!("Expected {:?}, got {}", expected, token)))
        }
    }

    fn skip_if(&mut self, token: JsonToken) -> bool {
        if self.peek() == Some(&token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_string(&mut self) -> BsonResult<(String, usize)> {
        match self.next()? {
            (JsonToken::String(s), offset) => Ok((s, offset)),
            (other, offset) => Err(self.syntax_error(offset, format!("Expected a string, got {}", other))),
        }
    }

    fn expect_integer(&mut self) -> BsonResult<(i64, usize)> {
        match self.next()? {
            (JsonToken::Number(text), offset) => text
                .parse::<i64>()
                .map(|n| (n, offset))
                .map_err(|_| self.syntax_error(offset, format!("Expected an integer, got {}", text))),
            (other, offset) => Err(self.syntax_error(offset, format!("Expected an integer, got {}", other))),
        }
    }

    fn parse_value_at(&mut self, depth: usize) -> BsonResult<BsonValue> {
        let (token, offset) = self.next()?;
        match token {
            JsonToken::LBrace => {
                self.check_depth(depth, offset)?;
                let doc = self.parse_document_body(depth + 1)?;
                crate::json::from_extended_document(doc)
                    .map_err(|e| self.syntax_error(offset, e.to_string()))
            }
            JsonToken::LBracket => {
                self.check_depth(depth, offset)?;
                self.parse_array_body(depth + 1)
            }
            JsonToken::String(s) => Ok(BsonValue::String(s)),
            JsonToken::Number(text) => self.parse_number(&text, offset),
            JsonToken::NegativeInfinity => Ok(BsonValue::Double(f64::NEG_INFINITY)),
            JsonToken::Regex(text) => Ok(BsonValue::RegularExpression(parse_regex_literal(&text))),
            JsonToken::Identifier(name) => self.parse_identifier_value(&name, offset),
            other => Err(self.syntax_error(offset, format!("Unexpected {}", other))),
        }
    }

    fn check_depth(&self, depth: usize, offset: usize) -> BsonResult<()> {
        if depth >= self.max_nesting_depth {
            return Err(self.syntax_error(
                offset,
                format!("Maximum nesting depth of {} exceeded", self.max_nesting_depth),
            ));
        }
        Ok(())
    }

    fn parse_document_body(&mut self, depth: usize) -> BsonResult<Document> {
        let mut doc = Document::new();
        if self.skip_if(JsonToken::RBrace) {
            return Ok(doc);
        }
        loop {
            let name = match self.next()? {
                (JsonToken::String(s), _) | (JsonToken::Identifier(s), _) => s,
                (other, offset) => {
                    return Err(self.syntax_error(offset, format!("Expected an element name, got {}", other)))
                }
            };
            self.expect(JsonToken::Colon)?;
            let value = self.parse_value_at(depth)?;
            doc.push_unchecked(name, value);
            if self.skip_if(JsonToken::Comma) {
                continue;
            }
            self.expect(JsonToken::RBrace)?;
            return Ok(doc);
        }
    }

    fn parse_array_body(&mut self, depth: usize) -> BsonResult<BsonValue> {
        let mut items = Vec::new();
        if self.skip_if(JsonToken::RBracket) {
            return Ok(BsonValue::Array(items));
        }
        loop {
            items.push(self.parse_value_at(depth)?);
            if self.skip_if(JsonToken::Comma) {
                continue;
            }
            self.expect(JsonToken::RBracket)?;
            return Ok(BsonValue::Array(items));
        }
    }

    fn parse_number(&self, text: &str, offset: usize) -> BsonResult<BsonValue> {
        let is_integral = !text.contains(|c: char| c == '.' || c == 'e' || c == 'E');
        if is_integral {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(match i32::try_from(n) {
                    Ok(small) => BsonValue::Int32(small),
                    Err(_) => BsonValue::Int64(n),
                });
            }
        }
        text.parse::<f64>()
            .map(BsonValue::Double)
            .map_err(|_| self.syntax_error(offset, format!("Invalid number {}", text)))
    }

    fn parse_identifier_value(&mut self, name: &str, offset: usize) -> BsonResult<BsonValue> {
        match name {
            "true" => Ok(BsonValue::Boolean(true)),
            "false" => Ok(BsonValue::Boolean(false)),
            "null" => Ok(BsonValue::Null),
            "undefined" => Ok(BsonValue::Undefined),
            "NaN" => Ok(BsonValue::Double(f64::NAN)),
            "Infinity" => Ok(BsonValue::Double(f64::INFINITY)),
            "MinKey" | "MaxKey" => {
                if self.skip_if(JsonToken::LParen) {
                    self.expect(JsonToken::RParen)?;
                }
                Ok(if name == "MinKey" {
                    BsonValue::MinKey
                } else {
                    BsonValue::MaxKey
                })
            }
            "new" => match self.next()? {
                (JsonToken::Identifier(ctor), ctor_offset) => self.parse_constructor(&ctor, ctor_offset),
                (other, offset) => Err(self.syntax_error(offset, format!("Expected a constructor name, got {}", other))),
            },
            _ => self.parse_constructor(name, offset),
        }
    }

    /// shell 构造函数: ObjectId("..")、ISODate("..")、NumberLong(..) 等
    fn parse_constructor(&mut self, name: &str, offset: usize) -> BsonResult<BsonValue> {
        if self.peek() != Some(&JsonToken::LParen) {
            return Err(self.syntax_error(offset, format!("Unexpected identifier {}", name)));
        }
        self.expect(JsonToken::LParen)?;
        let value = match name {
            "ObjectId" => {
                let (hex, at) = self.expect_string()?;
                let oid = ObjectId::parse(&hex).map_err(|e| self.syntax_error(at, e.to_string()))?;
                BsonValue::ObjectId(oid)
            }
            "ISODate" => {
                let (text, at) = self.expect_string()?;
                let dt = BsonDateTime::parse_iso(&text).map_err(|e| self.syntax_error(at, e.to_string()))?;
                BsonValue::DateTime(dt)
            }
            "Date" => match self.peek() {
                Some(JsonToken::RParen) => BsonValue::DateTime(BsonDateTime::now()),
                Some(JsonToken::String(_)) => {
                    let (text, at) = self.expect_string()?;
                    let dt = BsonDateTime::parse_iso(&text)
                        .map_err(|e| self.syntax_error(at, e.to_string()))?;
                    BsonValue::DateTime(dt)
                }
                _ => {
                    let (millis, _) = self.expect_integer()?;
                    BsonValue::DateTime(BsonDateTime::from_millis(millis))
                }
            },
            "NumberLong" => {
                let (n, _) = self.numeric_argument()?;
                BsonValue::Int64(n)
            }
            "NumberInt" => {
                let (n, at) = self.numeric_argument()?;
                let small = i32::try_from(n)
                    .map_err(|_| self.syntax_error(at, format!("{} does not fit in an Int32", n)))?;
                BsonValue::Int32(small)
            }
            "NumberDecimal" => {
                let (text, at) = match self.next()? {
                    (JsonToken::String(s), at) | (JsonToken::Number(s), at) => (s, at),
                    (other, at) => {
                        return Err(self.syntax_error(at, format!("Expected a decimal, got {}", other)))
                    }
                };
                let dec = Decimal128::parse(&text).map_err(|e| self.syntax_error(at, e.to_string()))?;
                BsonValue::Decimal128(dec)
            }
            "BinData" | "HexData" => {
                let (subtype, at) = self.expect_integer()?;
                let subtype = u8::try_from(subtype)
                    .map_err(|_| self.syntax_error(at, format!("Invalid binary subtype {}", subtype)))?;
                self.expect(JsonToken::Comma)?;
                let (payload, at) = self.expect_string()?;
                let bin = if name == "BinData" {
                    Binary::from_base64(BinarySubtype::from(subtype), &payload)
                        .map_err(|e| self.syntax_error(at, e.to_string()))?
                } else {
                    let bytes = hex::decode(&payload)
                        .map_err(|e| self.syntax_error(at, format!("Invalid hex data: {}", e)))?;
                    Binary::new(BinarySubtype::from(subtype), bytes)
                };
                BsonValue::Binary(bin)
            }
            "UUID" => {
                let (text, at) = self.expect_string()?;
                let uuid = uuid::Uuid::parse_str(&text)
                    .map_err(|e| self.syntax_error(at, format!("Invalid UUID: {}", e)))?;
                BsonValue::Binary(Binary::from_uuid(uuid, GuidRepresentation::Standard)?)
            }
            "Timestamp" => {
                let (time, at) = self.expect_integer()?;
                self.expect(JsonToken::Comma)?;
                let (increment, _) = self.expect_integer()?;
                let time = u32::try_from(time)
                    .map_err(|_| self.syntax_error(at, format!("Invalid timestamp seconds {}", time)))?;
                let increment = u32::try_from(increment)
                    .map_err(|_| self.syntax_error(at, format!("Invalid timestamp increment {}", increment)))?;
                BsonValue::Timestamp(Timestamp::new(time, increment))
            }
            other => {
                return Err(self.syntax_error(offset, format!("Unknown constructor {}", other)))
            }
        };
        self.expect(JsonToken::RParen)?;
        Ok(value)
    }

    /// NumberLong/NumberInt 的参数可以是数字或数字字符串
    fn numeric_argument(&mut self) -> BsonResult<(i64, usize)> {
        let (text, at) = match self.next()? {
            (JsonToken::String(s), at) | (JsonToken::Number(s), at) => (s, at),
            (other, at) => return Err(self.syntax_error(at, format!("Expected a number, got {}", other))),
        };
        text.parse::<i64>()
            .map(|n| (n, at))
            .map_err(|_| self.syntax_error(at, format!("Invalid integer {}", text)))
    }

    pub fn position(&self) -> usize {
        self.current_offset()
    }
}

/// "/pattern/options" 形式的正则字面量
fn parse_regex_literal(text: &str) -> Regex {
    let close = text.rfind('/').unwrap_or(text.len() - 1);
    let pattern = text[1..close].replace("\\/", "/");
    Regex::new(pattern, &text[close + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{JsonWriter, JsonWriterSettings};
    use crate::doc;
    use docwire_common::JsonOutputMode;

    fn parse(text: &str) -> BsonValue {
        JsonReader::new(text).parse_value().unwrap()
    }

    #[test]
    fn test_plain_json() {
        let doc = JsonReader::new(r#"{ "a" : 1, "b" : [1.5, "x", null, true] }"#)
            .parse_document()
            .unwrap();
        assert_eq!(doc.get("a"), Some(&BsonValue::Int32(1)));
        let items = doc.get_array("b").unwrap();
        assert_eq!(items[0], BsonValue::Double(1.5));
        assert_eq!(items[2], BsonValue::Null);
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(parse("2147483647"), BsonValue::Int32(i32::MAX));
        assert_eq!(parse("2147483648"), BsonValue::Int64(2_147_483_648));
        assert_eq!(parse("1.0"), BsonValue::Double(1.0));
        assert_eq!(parse("1e3"), BsonValue::Double(1000.0));
    }

    #[test]
    fn test_shell_syntax() {
        let doc = JsonReader::new(
            r#"{ _id: ObjectId("507f1f77bcf86cd799439011"), n: NumberLong(5),
                 big: NumberLong("5000000000"), d: ISODate("2011-03-18T14:27:53.123Z"),
                 e: new Date(0), re: /ab\/c/i, b: new BinData(0, "AQID"),
                 ts: Timestamp(1, 2), dec: NumberDecimal("1.5"), k: MinKey, u: undefined }"#,
        )
        .parse_document()
        .unwrap();
        assert_eq!(
            doc.get_object_id("_id").map(|o| o.to_hex()),
            Some("507f1f77bcf86cd799439011".to_string())
        );
        assert_eq!(doc.get("n"), Some(&BsonValue::Int64(5)));
        assert_eq!(doc.get("big"), Some(&BsonValue::Int64(5_000_000_000)));
        assert_eq!(doc.get_datetime("e").map(|d| d.timestamp_millis()), Some(0));
        assert_eq!(
            doc.get("re"),
            Some(&BsonValue::RegularExpression(Regex::new("ab/c", "i")))
        );
        assert_eq!(
            doc.get("b").and_then(|v| v.as_binary()).map(|b| b.bytes.clone()),
            Some(vec![1, 2, 3])
        );
        assert_eq!(doc.get("ts"), Some(&BsonValue::Timestamp(Timestamp::new(1, 2))));
        assert_eq!(doc.get("k"), Some(&BsonValue::MinKey));
        assert_eq!(doc.get("u"), Some(&BsonValue::Undefined));
    }

    #[test]
    fn test_extended_json_wrappers() {
        let doc = JsonReader::new(
            r#"{ "i" : { "$numberInt" : "7" }, "l" : { "$numberLong" : "7" },
                 "d" : { "$date" : { "$numberLong" : "1000" } },
                 "s" : { "$date" : 5 },
                 "bin" : { "$binary" : { "base64" : "AQID", "subType" : "05" } },
                 "old" : { "$binary" : "AQID", "$type" : "00" },
                 "q" : { "$gt" : 1 } }"#,
        )
        .parse_document()
        .unwrap();
        assert_eq!(doc.get("i"), Some(&BsonValue::Int32(7)));
        assert_eq!(doc.get("l"), Some(&BsonValue::Int64(7)));
        assert_eq!(doc.get_datetime("d").map(|d| d.timestamp_millis()), Some(1000));
        assert_eq!(doc.get_datetime("s").map(|d| d.timestamp_millis()), Some(5));
        assert_eq!(
            doc.get("bin").and_then(|v| v.as_binary()).map(|b| b.subtype),
            Some(BinarySubtype::Md5)
        );
        assert!(doc.get("old").and_then(|v| v.as_binary()).is_some());
        // 查询操作符不是包装对象
        assert_eq!(doc.get_document("q").and_then(|q| q.get_i32("$gt")), Some(1));
    }

    #[test]
    fn test_round_trip_through_every_mode() {
        let original = doc! {
            "oid": (ObjectId::parse("507f1f77bcf86cd799439011").unwrap()),
            "i": 1,
            "l": 5_000_000_000i64,
            "small_long": 3i64,
            "f": 2.0,
            "s": "text",
            "dt": (BsonDateTime::from_millis(1_300_000_000_000)),
            "dec": (Decimal128::parse("12.50").unwrap()),
            "ts": (Timestamp::new(9, 1)),
            "arr": [1, "two"]
        };
        for mode in [
            JsonOutputMode::Strict,
            JsonOutputMode::Shell,
            JsonOutputMode::Canonical,
            JsonOutputMode::Relaxed,
        ] {
            let text = original.to_json_with(&JsonWriterSettings::with_mode(mode)).unwrap();
            let parsed = JsonReader::new(&text).parse_document().unwrap();
            if mode == JsonOutputMode::Strict || mode == JsonOutputMode::Relaxed {
                // 这两种模式不区分 Int32 与 Int64
                assert_eq!(parsed.get("small_long"), Some(&BsonValue::Int32(3)), "{:?}", mode);
            } else {
                assert_eq!(parsed, original, "{:?}: {}", mode, text);
            }
        }
    }

    #[test]
    fn test_syntax_errors_report_position() {
        let err = JsonReader::new(r#"{ "a" : }"#).parse_document().unwrap_err();
        assert!(matches!(err, BsonError::JsonSyntax { position: 8, .. }));
        let err = JsonReader::new(r#"{ "a" : 1 } x"#).parse_document().unwrap_err();
        assert!(matches!(err, BsonError::JsonSyntax { position: 12, .. }));
        assert!(JsonReader::new("{ \"a\" : 1").parse_document().is_err());
        assert!(JsonReader::new("[1, 2]").parse_document().is_err());
        assert!(JsonReader::new(r#"{ "x" : ObjectId("zz") }"#).parse_document().is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let text = "[".repeat(5) + &"]".repeat(5);
        assert!(JsonReader::new(&text).with_max_nesting_depth(4).parse_value().is_err());
        assert!(JsonReader::new(&text).with_max_nesting_depth(5).parse_value().is_ok());
    }

    #[test]
    fn test_writer_output_parses_back() {
        let value = BsonValue::from(uuid::Uuid::nil());
        let text = JsonWriter::value_to_string(&value, &JsonWriterSettings::default()).unwrap();
        assert_eq!(parse(&text), value);
    }
}
