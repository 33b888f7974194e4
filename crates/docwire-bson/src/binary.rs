//! 二进制值与 GUID 字节序转换

use crate::spec::BinarySubtype;
use crate::{BsonError, BsonResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use docwire_common::GuidRepresentation;
use uuid::Uuid;

/// BSON 二进制值
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: BinarySubtype, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            bytes: bytes.into(),
        }
    }

    pub fn generic(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(BinarySubtype::Generic, bytes)
    }

    /// # Brief
    /// 按指定表示法把 GUID 编码为二进制值
    ///
    /// # Arguments
    /// * `uuid` - GUID
    /// * `representation` - 字节序与子类型的选择
    ///
    /// # Returns
    /// Unspecified 表示法返回配置错误
    pub fn from_uuid(uuid: Uuid, representation: GuidRepresentation) -> BsonResult<Self> {
        let standard = *uuid.as_bytes();
        let (subtype, bytes) = match representation {
            GuidRepresentation::Standard => (BinarySubtype::Uuid, standard),
            GuidRepresentation::CSharpLegacy => (BinarySubtype::UuidOld, uuid.to_bytes_le()),
            GuidRepresentation::JavaLegacy => (BinarySubtype::UuidOld, java_swap(standard)),
            GuidRepresentation::PythonLegacy => (BinarySubtype::UuidOld, standard),
            GuidRepresentation::Unspecified => {
                return Err(BsonError::Configuration(
                    "GuidRepresentation Unspecified cannot be used to encode a GUID".to_string(),
                ))
            }
        };
        Ok(Self::new(subtype, bytes.to_vec()))
    }

    /// # Brief
    /// 按指定表示法把二进制值解码为 GUID
    ///
    /// 子类型 4 总是标准字节序; 子类型 3 的字节序由 representation 决定,
    /// 这时 Standard 与 Unspecified 都无法判断, 返回错误。
    pub fn to_uuid(&self, representation: GuidRepresentation) -> BsonResult<Uuid> {
        if self.bytes.len() != 16 {
            return Err(BsonError::InvalidDocument(format!(
                "A GUID binary value must be 16 bytes long, got {}",
                self.bytes.len()
            )));
        }
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&self.bytes);
        match self.subtype {
            BinarySubtype::Uuid => {
                if matches!(
                    representation,
                    GuidRepresentation::Standard | GuidRepresentation::Unspecified
                ) {
                    Ok(Uuid::from_bytes(raw))
                } else {
                    Err(BsonError::Configuration(format!(
                        "Binary subtype 4 requires GuidRepresentation Standard, not {:?}",
                        representation
                    )))
                }
            }
            BinarySubtype::UuidOld => match representation {
                GuidRepresentation::CSharpLegacy => Ok(Uuid::from_bytes_le(raw)),
                GuidRepresentation::JavaLegacy => Ok(Uuid::from_bytes(java_swap(raw))),
                GuidRepresentation::PythonLegacy => Ok(Uuid::from_bytes(raw)),
                other => Err(BsonError::Configuration(format!(
                    "Binary subtype 3 cannot be decoded with GuidRepresentation {:?}",
                    other
                ))),
            },
            other => Err(BsonError::InvalidDocument(format!(
                "Binary subtype {:?} does not hold a GUID",
                other
            ))),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn from_base64(subtype: BinarySubtype, text: &str) -> BsonResult<Self> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| BsonError::InvalidDocument(format!("Invalid base64: {}", e)))?;
        Ok(Self::new(subtype, bytes))
    }
}

impl Default for Binary {
    fn default() -> Self {
        Self::generic(Vec::new())
    }
}

/// Java 旧驱动: 前后两个 8 字节分别反转
fn java_swap(mut bytes: [u8; 16]) -> [u8; 16] {
    bytes[0..8].reverse();
    bytes[8..16].reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00112233-4455-6677-8899-aabbccddeeff";

    fn sample() -> Uuid {
        Uuid::parse_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_standard_layout() {
        let bin = Binary::from_uuid(sample(), GuidRepresentation::Standard).unwrap();
        assert_eq!(bin.subtype, BinarySubtype::Uuid);
        assert_eq!(bin.bytes[0], 0x00);
        assert_eq!(bin.bytes[15], 0xff);
    }

    #[test]
    fn test_csharp_legacy_layout() {
        let bin = Binary::from_uuid(sample(), GuidRepresentation::CSharpLegacy).unwrap();
        assert_eq!(bin.subtype, BinarySubtype::UuidOld);
        assert_eq!(
            bin.bytes,
            vec![
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert_eq!(bin.to_uuid(GuidRepresentation::CSharpLegacy).unwrap(), sample());
    }

    #[test]
    fn test_java_legacy_layout() {
        let bin = Binary::from_uuid(sample(), GuidRepresentation::JavaLegacy).unwrap();
        assert_eq!(
            bin.bytes,
            vec![
                0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x00, 0xff, 0xee, 0xdd, 0xcc, 0xbb,
                0xaa, 0x99, 0x88
            ]
        );
        assert_eq!(bin.to_uuid(GuidRepresentation::JavaLegacy).unwrap(), sample());
    }

    #[test]
    fn test_representation_mismatch() {
        let legacy = Binary::from_uuid(sample(), GuidRepresentation::PythonLegacy).unwrap();
        assert!(legacy.to_uuid(GuidRepresentation::Standard).is_err());
        assert!(Binary::from_uuid(sample(), GuidRepresentation::Unspecified).is_err());
        assert!(Binary::generic(vec![1, 2]).to_uuid(GuidRepresentation::Standard).is_err());
    }
}
