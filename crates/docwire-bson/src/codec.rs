//! BSON 编解码入口
//!
//! 在 `BinaryWriter`/`BinaryReader` 之上提供整文档的一次性编解码。
//! 需要逐元素控制时直接使用 `io` 模块中的读写器。

use crate::document::Document;
use crate::io::{BinaryReader, BinaryReaderSettings, BinaryWriter, BinaryWriterSettings, BsonReader, BsonWriter};
use crate::spec::MIN_DOCUMENT_SIZE;
use crate::{BsonError, BsonResult};

/// 编码文档
///
/// # Brief
/// 使用默认设置把文档编码为 BSON 字节
///
/// # Arguments
/// * `doc` - 要编码的文档
///
/// # Returns
/// 成功返回字节数组, 超出体积或深度限制时返回错误
pub fn encode_document(doc: &Document) -> BsonResult<Vec<u8>> {
    encode_document_with(doc, BinaryWriterSettings::default())
}

/// 使用指定设置编码文档
pub fn encode_document_with(doc: &Document, settings: BinaryWriterSettings) -> BsonResult<Vec<u8>> {
    let mut writer = BinaryWriter::with_settings(settings);
    writer.write_document(doc)?;
    Ok(writer.into_vec())
}

/// 解码文档
///
/// # Brief
/// 解码恰好一个文档, 文档之后存在多余字节视为格式错误
///
/// # Arguments
/// * `data` - BSON 字节
///
/// # Returns
/// 成功返回文档, 失败返回错误
pub fn decode_document(data: &[u8]) -> BsonResult<Document> {
    decode_document_with(data, BinaryReaderSettings::default())
}

/// 使用指定设置解码文档
pub fn decode_document_with(data: &[u8], settings: BinaryReaderSettings) -> BsonResult<Document> {
    let mut reader = BinaryReader::with_settings(data, settings);
    let doc = reader.read_document()?;
    if !reader.is_at_end_of_file() {
        return Err(BsonError::InvalidDocument(format!(
            "{} trailing bytes after the document",
            reader.remaining()
        )));
    }
    Ok(doc)
}

/// 解码首尾相接的文档序列
///
/// # Brief
/// 依次解码直到输入耗尽, 空输入返回空序列
pub fn decode_documents(data: &[u8]) -> BsonResult<Vec<Document>> {
    let mut reader = BinaryReader::new(data);
    let mut docs = Vec::new();
    while !reader.is_at_end_of_file() {
        docs.push(reader.read_document()?);
    }
    Ok(docs)
}

/// 读取长度前缀, 不校验文档内容
pub fn document_size(data: &[u8]) -> BsonResult<usize> {
    if data.len() < 4 {
        return Err(BsonError::UnexpectedEof {
            offset: 0,
            needed: 4 - data.len(),
        });
    }
    let size = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if size < MIN_DOCUMENT_SIZE as i32 {
        return Err(BsonError::InvalidSize {
            size: size as i64,
            offset: 0,
            reason: "document size is smaller than the minimum",
        });
    }
    Ok(size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::value::BsonValue;

    #[test]
    fn test_encode_decode_document() {
        let doc = doc! { "hello": "world", "n": [1, 2i64, 3.5], "nested": { "flag": true } };
        let bytes = encode_document(&doc).unwrap();
        assert_eq!(document_size(&bytes).unwrap(), bytes.len());
        assert_eq!(decode_document(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_known_bytes() {
        // {"hello": "world"}
        let bytes = b"\x16\x00\x00\x00\x02hello\x00\x06\x00\x00\x00world\x00\x00";
        let doc = decode_document(bytes).unwrap();
        assert_eq!(doc.get_str("hello"), Some("world"));
        assert_eq!(encode_document(&doc).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_document(&doc! { "a": 1 }).unwrap();
        bytes.push(0);
        assert!(matches!(decode_document(&bytes), Err(BsonError::InvalidDocument(_))));
    }

    #[test]
    fn test_document_sequence() {
        let mut bytes = encode_document(&doc! { "i": 1 }).unwrap();
        bytes.extend(encode_document(&doc! { "i": 2 }).unwrap());
        let docs = decode_documents(&bytes).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("i"), Some(&BsonValue::Int32(2)));
        assert!(decode_documents(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_size_limit_applies() {
        let settings = BinaryWriterSettings {
            max_document_size: 16,
            ..Default::default()
        };
        let doc = doc! { "long": "this string does not fit" };
        assert!(matches!(
            encode_document_with(&doc, settings),
            Err(BsonError::DocumentTooLarge { .. })
        ));
    }
}
