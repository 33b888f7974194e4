//! BSON 格式常量与类型标记

use std::fmt;

pub const MAX_DOCUMENT_SIZE: usize = docwire_common::DEFAULT_MAX_DOCUMENT_SIZE;
pub const MAX_NESTING_DEPTH: usize = docwire_common::DEFAULT_MAX_NESTING_DEPTH;

/// 最小文档: 4 字节长度 + 结尾 0x00
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// 元素类型标记
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    EndOfDocument = 0x00,
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    RegularExpression = 0x0B,
    JavaScript = 0x0D,
    Symbol = 0x0E,
    JavaScriptWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    Decimal128 = 0x13,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl ElementType {
    /// DBPointer (0x0C) 已废弃, 不在支持范围内
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::EndOfDocument),
            0x01 => Some(Self::Double),
            0x02 => Some(Self::String),
            0x03 => Some(Self::Document),
            0x04 => Some(Self::Array),
            0x05 => Some(Self::Binary),
            0x06 => Some(Self::Undefined),
            0x07 => Some(Self::ObjectId),
            0x08 => Some(Self::Boolean),
            0x09 => Some(Self::DateTime),
            0x0A => Some(Self::Null),
            0x0B => Some(Self::RegularExpression),
            0x0D => Some(Self::JavaScript),
            0x0E => Some(Self::Symbol),
            0x0F => Some(Self::JavaScriptWithScope),
            0x10 => Some(Self::Int32),
            0x11 => Some(Self::Timestamp),
            0x12 => Some(Self::Int64),
            0x13 => Some(Self::Decimal128),
            0x7F => Some(Self::MaxKey),
            0xFF => Some(Self::MinKey),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::EndOfDocument => "EndOfDocument",
            Self::Double => "Double",
            Self::String => "String",
            Self::Document => "Document",
            Self::Array => "Array",
            Self::Binary => "Binary",
            Self::Undefined => "Undefined",
            Self::ObjectId => "ObjectId",
            Self::Boolean => "Boolean",
            Self::DateTime => "DateTime",
            Self::Null => "Null",
            Self::RegularExpression => "RegularExpression",
            Self::JavaScript => "JavaScript",
            Self::Symbol => "Symbol",
            Self::JavaScriptWithScope => "JavaScriptWithScope",
            Self::Int32 => "Int32",
            Self::Timestamp => "Timestamp",
            Self::Int64 => "Int64",
            Self::Decimal128 => "Decimal128",
            Self::MaxKey => "MaxKey",
            Self::MinKey => "MinKey",
        }
    }

    /// 定长值的字节数, 变长类型返回 None
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Undefined | Self::Null | Self::MinKey | Self::MaxKey => Some(0),
            Self::Boolean => Some(1),
            Self::Int32 => Some(4),
            Self::Double | Self::DateTime | Self::Timestamp | Self::Int64 => Some(8),
            Self::ObjectId => Some(12),
            Self::Decimal128 => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 二进制子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinarySubtype {
    Generic,
    Function,
    /// 旧二进制格式, 载荷前多一个 int32 长度
    BinaryOld,
    /// 旧 UUID 格式, 字节序取决于 GuidRepresentation
    UuidOld,
    Uuid,
    Md5,
    Encrypted,
    Column,
    Sensitive,
    UserDefined(u8),
    Reserved(u8),
}

impl BinarySubtype {
    pub fn is_uuid(&self) -> bool {
        matches!(self, Self::Uuid | Self::UuidOld)
    }
}

impl From<u8> for BinarySubtype {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Self::Generic,
            0x01 => Self::Function,
            0x02 => Self::BinaryOld,
            0x03 => Self::UuidOld,
            0x04 => Self::Uuid,
            0x05 => Self::Md5,
            0x06 => Self::Encrypted,
            0x07 => Self::Column,
            0x08 => Self::Sensitive,
            b if b >= 0x80 => Self::UserDefined(b),
            b => Self::Reserved(b),
        }
    }
}

impl From<BinarySubtype> for u8 {
    fn from(subtype: BinarySubtype) -> u8 {
        match subtype {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidOld => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::Encrypted => 0x06,
            BinarySubtype::Column => 0x07,
            BinarySubtype::Sensitive => 0x08,
            BinarySubtype::UserDefined(b) | BinarySubtype::Reserved(b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_tags() {
        for byte in 0u8..=255 {
            if let Some(t) = ElementType::from_u8(byte) {
                assert_eq!(t as u8, byte);
            }
        }
        assert_eq!(ElementType::from_u8(0x0C), None);
        assert_eq!(ElementType::from_u8(0x7F), Some(ElementType::MaxKey));
    }

    #[test]
    fn test_binary_subtype_bytes() {
        assert_eq!(BinarySubtype::from(0x04), BinarySubtype::Uuid);
        assert_eq!(BinarySubtype::from(0x85), BinarySubtype::UserDefined(0x85));
        assert_eq!(u8::from(BinarySubtype::Reserved(0x20)), 0x20);
        assert!(BinarySubtype::UuidOld.is_uuid());
    }
}
