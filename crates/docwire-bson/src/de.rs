//! Serde 反序列化模块
//!
//! 实现 Serde Deserializer trait, 将 `BsonValue` 反序列化为 Rust 数据结构。
//!
//! - 数值在不丢失信息时互相转换: Int32 -> i64, Int64 -> i32 (如果在范围内)
//! - 通用子类型的二进制交给 `visit_bytes`
//! - 其余 BSON 专有类型以规范扩展 JSON 形式交给访问者

use crate::document::Document;
use crate::json;
use crate::value::BsonValue;
use crate::BsonError;
use crate::BinarySubtype;
use docwire_common::JsonOutputMode;
use serde::de::{self, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;

pub struct Deserializer<'de> {
    input: &'de BsonValue,
}

impl<'de> Deserializer<'de> {
    pub fn new(input: &'de BsonValue) -> Self {
        Deserializer { input }
    }

    fn mismatch(&self, expected: &str) -> BsonError {
        BsonError::Deserialization(format!(
            "Expected {}, got {}",
            expected,
            self.input.element_type()
        ))
    }
}

/// 从 `BsonValue` 反序列化
pub fn from_bson_value<'a, T: Deserialize<'a>>(value: &'a BsonValue) -> Result<T, BsonError> {
    T::deserialize(Deserializer::new(value))
}

/// 从文档反序列化
pub fn from_document<T: for<'a> Deserialize<'a>>(doc: &Document) -> Result<T, BsonError> {
    let value = BsonValue::Document(doc.clone());
    from_bson_value(&value)
}

impl de::Error for BsonError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        BsonError::Deserialization(msg.to_string())
    }
}

fn integer_of(value: &BsonValue) -> Option<i64> {
    match value {
        BsonValue::Int32(n) => Some(*n as i64),
        BsonValue::Int64(n) => Some(*n),
        _ => None,
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = BsonError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null | BsonValue::Undefined => visitor.visit_unit(),
            BsonValue::Boolean(b) => visitor.visit_bool(*b),
            BsonValue::Int32(n) => visitor.visit_i32(*n),
            BsonValue::Int64(n) => visitor.visit_i64(*n),
            BsonValue::Double(n) => visitor.visit_f64(*n),
            BsonValue::String(s) | BsonValue::Symbol(s) => visitor.visit_str(s),
            BsonValue::Binary(b) if b.subtype == BinarySubtype::Generic => visitor.visit_bytes(&b.bytes),
            BsonValue::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            BsonValue::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            other => {
                let json = json::to_json(other, JsonOutputMode::Canonical)?;
                de::Deserializer::deserialize_any(json, visitor)
                    .map_err(|e| BsonError::Deserialization(e.to_string()))
            }
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Boolean(b) => visitor.visit_bool(*b),
            _ => Err(self.mismatch("boolean")),
        }
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i32(visitor)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i32(visitor)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Int32(n) => visitor.visit_i32(*n),
            BsonValue::Int64(n) => visitor.visit_i64(*n),
            _ => Err(self.mismatch("integer")),
        }
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match integer_of(self.input) {
            Some(n) => visitor.visit_i64(n),
            None => Err(self.mismatch("integer")),
        }
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match integer_of(self.input) {
            Some(n) => visitor.visit_i128(n as i128),
            None => Err(self.mismatch("integer")),
        }
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u32(visitor)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u32(visitor)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match integer_of(self.input) {
            Some(n) if (0..=u32::MAX as i64).contains(&n) => visitor.visit_u32(n as u32),
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match integer_of(self.input) {
            Some(n) if n >= 0 => visitor.visit_u64(n as u64),
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match integer_of(self.input) {
            Some(n) if n >= 0 => visitor.visit_u128(n as u128),
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Double(n) => visitor.visit_f32(*n as f32),
            BsonValue::Int32(n) => visitor.visit_f32(*n as f32),
            _ => Err(self.mismatch("float")),
        }
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Double(n) => visitor.visit_f64(*n),
            BsonValue::Int32(n) => visitor.visit_f64(*n as f64),
            BsonValue::Int64(n) => visitor.visit_f64(*n as f64),
            _ => Err(self.mismatch("float")),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if let BsonValue::String(s) = self.input {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return visitor.visit_char(c);
            }
        }
        Err(self.mismatch("char"))
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::String(s) | BsonValue::Symbol(s) => visitor.visit_borrowed_str(s),
            _ => Err(self.mismatch("string")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Binary(b) => visitor.visit_borrowed_bytes(&b.bytes),
            _ => Err(self.mismatch("binary")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null | BsonValue::Undefined => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null => visitor.visit_unit(),
            _ => Err(self.mismatch("null")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            _ => Err(self.mismatch("array")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            _ => Err(self.mismatch("document")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            BsonValue::Document(doc) if doc.len() == 1 => match doc.first() {
                Some((variant, value)) => visitor.visit_enum(EnumDeserializer { variant, value }),
                None => Err(self.mismatch("single-entry document")),
            },
            _ => Err(self.mismatch("string or single-entry document for enum")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer<I> {
    iter: I,
}

impl<I> SeqDeserializer<I> {
    fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<'de, I: Iterator<Item = &'de BsonValue>> SeqAccess<'de> for SeqDeserializer<I> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }
}

struct MapDeserializer<'de, I> {
    iter: I,
    value: Option<&'de BsonValue>,
}

impl<'de, I: Iterator<Item = (&'de str, &'de BsonValue)>> MapDeserializer<'de, I> {
    fn new(iter: I) -> Self {
        Self { iter, value: None }
    }
}

impl<'de, I: Iterator<Item = (&'de str, &'de BsonValue)>> MapAccess<'de> for MapDeserializer<'de, I> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(de::value::BorrowedStrDeserializer::new(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("No value".to_string()))?;
        seed.deserialize(Deserializer::new(value))
    }
}

struct EnumDeserializer<'de> {
    variant: &'de str,
    value: &'de BsonValue,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer<'de> {
    type Error = BsonError;
    type Variant = VariantDeserializer<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        let deserializer = de::value::BorrowedStrDeserializer::<BsonError>::new(self.variant);
        let variant = seed.deserialize(deserializer)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer<'de> {
    value: &'de BsonValue,
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer<'de> {
    type Error = BsonError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(Deserializer::new(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(Deserializer::new(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_map(Deserializer::new(self.value), visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::{to_bson_value, to_document};
    use crate::{bson, doc};
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestStruct {
        name: String,
        value: i32,
        active: bool,
        ratio: Option<f64>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Command {
        Stop,
        Move { x: i32, y: i32 },
        Say(String),
        Pair(u8, u8),
    }

    #[test]
    fn test_roundtrip_struct() {
        let original = TestStruct {
            name: "test".to_string(),
            value: 42,
            active: true,
            ratio: Some(0.5),
        };
        let doc = to_document(&original).unwrap();
        let restored: TestStruct = from_document(&doc).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_roundtrip_enums() {
        for command in [
            Command::Stop,
            Command::Move { x: 1, y: -2 },
            Command::Say("hi".to_string()),
            Command::Pair(3, 4),
        ] {
            let value = to_bson_value(&command).unwrap();
            let restored: Command = from_bson_value(&value).unwrap();
            assert_eq!(restored, command);
        }
    }

    #[test]
    fn test_numeric_widening() {
        let value: i64 = from_bson_value(&BsonValue::Int32(5)).unwrap();
        assert_eq!(value, 5);
        let value: f64 = from_bson_value(&BsonValue::Int64(7)).unwrap();
        assert_eq!(value, 7.0);
        assert!(from_bson_value::<u32>(&BsonValue::Int32(-1)).is_err());
        assert!(from_bson_value::<String>(&BsonValue::Int32(1)).is_err());
    }

    #[test]
    fn test_bson_value_passthrough() {
        let oid = docwire_common::ObjectId::new();
        let original = bson!({ "id": (BsonValue::ObjectId(oid)), "n": 1 });
        let restored: BsonValue = from_bson_value(&original).unwrap();
        assert_eq!(restored, original);
        let map: HashMap<String, i32> = from_document(&doc! { "a": 1, "b": 2 }).unwrap();
        assert_eq!(map.get("b"), Some(&2));
    }
}
