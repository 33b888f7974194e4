//! 未解码的原始 BSON 文档
//!
//! `RawDocument` 借用一段已校验边界的字节, 按需查找单个元素而不物化整个文档;
//! `RawDocumentBuf` 是其拥有所有权的版本, 可作为类映射成员原样透传。

use crate::document::Document;
use crate::io::{BinaryReader, BsonReader};
use crate::spec::{ElementType, MIN_DOCUMENT_SIZE};
use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use bytes::Bytes;

/// 借用的原始文档
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDocument<'a> {
    data: &'a [u8],
}

impl<'a> RawDocument<'a> {
    /// 校验长度前缀与结尾字节后包装, 元素内容不做校验
    pub fn new(data: &'a [u8]) -> BsonResult<Self> {
        let size = crate::codec::document_size(data)?;
        if size != data.len() {
            return Err(BsonError::InvalidSize {
                size: size as i64,
                offset: 0,
                reason: "document size does not match the buffer length",
            });
        }
        if data[size - 1] != 0 {
            return Err(BsonError::InvalidDocument(
                "document is not terminated by a null byte".to_string(),
            ));
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == MIN_DOCUMENT_SIZE
    }

    /// 按顺序遍历元素, 每个元素的范围通过长度前缀跳过得到
    pub fn iter(&self) -> RawIter<'a> {
        RawIter {
            reader: BinaryReader::new(self.data),
            data: self.data,
            started: false,
            done: false,
        }
    }

    /// # Brief
    /// 查找单个元素, 其余元素直接跳过
    ///
    /// # Arguments
    /// * `name` - 元素名
    ///
    /// # Returns
    /// 元素存在时返回其原始视图
    pub fn get(&self, name: &str) -> BsonResult<Option<RawElement<'a>>> {
        for element in self.iter() {
            let element = element?;
            if element.name == name {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// 查找并解码单个元素
    pub fn get_value(&self, name: &str) -> BsonResult<Option<BsonValue>> {
        self.get(name)?.map(|e| e.to_value()).transpose()
    }

    pub fn to_document(&self) -> BsonResult<Document> {
        crate::codec::decode_document(self.data)
    }

    pub fn to_raw_document_buf(&self) -> RawDocumentBuf {
        RawDocumentBuf {
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

impl<'a> IntoIterator for RawDocument<'a> {
    type Item = BsonResult<RawElement<'a>>;
    type IntoIter = RawIter<'a>;

    fn into_iter(self) -> RawIter<'a> {
        self.iter()
    }
}

/// 原始文档的元素迭代器
pub struct RawIter<'a> {
    reader: BinaryReader<'a>,
    data: &'a [u8],
    started: bool,
    done: bool,
}

impl<'a> RawIter<'a> {
    fn next_element(&mut self) -> BsonResult<Option<RawElement<'a>>> {
        if !self.started {
            self.started = true;
            self.reader.read_start_document()?;
        }
        let element_type = self.reader.read_bson_type()?;
        if element_type == ElementType::EndOfDocument {
            self.reader.read_end_document()?;
            return Ok(None);
        }
        let name = self.reader.read_name()?;
        let start = self.reader.position();
        self.reader.skip_value()?;
        Ok(Some(RawElement {
            name,
            element_type,
            bytes: &self.data[start..self.reader.position()],
        }))
    }
}

impl<'a> Iterator for RawIter<'a> {
    type Item = BsonResult<RawElement<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// 原始文档中的一个元素, `bytes` 为值的编码 (不含类型与名称)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawElement<'a> {
    pub name: String,
    pub element_type: ElementType,
    pub bytes: &'a [u8],
}

impl<'a> RawElement<'a> {
    fn expect_type(&self, expected: ElementType) -> BsonResult<()> {
        if self.element_type != expected {
            return Err(BsonError::unexpected_type(expected.name(), self.element_type));
        }
        Ok(())
    }

    pub fn as_i32(&self) -> BsonResult<i32> {
        self.expect_type(ElementType::Int32)?;
        let b = self.bytes;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn as_i64(&self) -> BsonResult<i64> {
        self.expect_type(ElementType::Int64)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[..8]);
        Ok(i64::from_le_bytes(buf))
    }

    pub fn as_f64(&self) -> BsonResult<f64> {
        self.expect_type(ElementType::Double)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[..8]);
        Ok(f64::from_le_bytes(buf))
    }

    pub fn as_bool(&self) -> BsonResult<bool> {
        self.expect_type(ElementType::Boolean)?;
        Ok(self.bytes[0] != 0)
    }

    /// 字符串值直接借用底层字节
    pub fn as_str(&self) -> BsonResult<&'a str> {
        self.expect_type(ElementType::String)?;
        let body = &self.bytes[4..self.bytes.len() - 1];
        std::str::from_utf8(body).map_err(|_| BsonError::InvalidUtf8 { offset: 4 })
    }

    pub fn as_document(&self) -> BsonResult<RawDocument<'a>> {
        self.expect_type(ElementType::Document)?;
        RawDocument::new(self.bytes)
    }

    /// 数组与文档编码相同, 名称为下标
    pub fn as_array(&self) -> BsonResult<RawDocument<'a>> {
        self.expect_type(ElementType::Array)?;
        RawDocument::new(self.bytes)
    }

    /// 解码为 `BsonValue`
    pub fn to_value(&self) -> BsonResult<BsonValue> {
        // 包装成单元素文档 { "": value } 再解码
        let size = 4 + 1 + 1 + self.bytes.len() + 1;
        let mut doc = Vec::with_capacity(size);
        doc.extend_from_slice(&(size as i32).to_le_bytes());
        doc.push(self.element_type as u8);
        doc.push(0);
        doc.extend_from_slice(self.bytes);
        doc.push(0);
        let mut reader = BinaryReader::new(&doc);
        reader.read_start_document()?;
        reader.read_bson_type()?;
        reader.skip_name()?;
        reader.read_value()
    }
}

/// 拥有所有权的原始文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocumentBuf {
    data: Bytes,
}

impl Default for RawDocumentBuf {
    fn default() -> Self {
        Self {
            data: Bytes::from_static(&[5, 0, 0, 0, 0]),
        }
    }
}

impl RawDocumentBuf {
    pub fn from_bytes(data: impl Into<Bytes>) -> BsonResult<Self> {
        let data = data.into();
        RawDocument::new(&data)?;
        Ok(Self { data })
    }

    pub fn from_document(doc: &Document) -> BsonResult<Self> {
        Ok(Self {
            data: Bytes::from(crate::codec::encode_document(doc)?),
        })
    }

    pub fn as_raw(&self) -> RawDocument<'_> {
        RawDocument { data: &self.data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn get(&self, name: &str) -> BsonResult<Option<RawElement<'_>>> {
        self.as_raw().get(name)
    }

    pub fn to_document(&self) -> BsonResult<Document> {
        self.as_raw().to_document()
    }
}

impl TryFrom<&Document> for RawDocumentBuf {
    type Error = BsonError;

    fn try_from(doc: &Document) -> BsonResult<Self> {
        Self::from_document(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_lookup_without_materializing() {
        let raw = RawDocumentBuf::from_document(&doc! {
            "skip": { "deep": [1, 2, 3] },
            "name": "raw",
            "n": 5i64
        })
        .unwrap();
        assert_eq!(raw.get("name").unwrap().unwrap().as_str().unwrap(), "raw");
        assert_eq!(raw.get("n").unwrap().unwrap().as_i64().unwrap(), 5);
        assert!(raw.get("missing").unwrap().is_none());
        let inner = raw.get("skip").unwrap().unwrap().as_document().unwrap();
        let deep = inner.get("deep").unwrap().unwrap();
        assert_eq!(deep.as_array().unwrap().iter().count(), 3);
        assert!(raw.get("name").unwrap().unwrap().as_i32().is_err());
    }

    #[test]
    fn test_iteration() {
        let raw = RawDocumentBuf::from_document(&doc! { "a": 1, "b": "xy" }).unwrap();
        let elements: Vec<_> = raw.as_raw().iter().collect::<BsonResult<_>>().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].element_type, ElementType::Int32);
        assert_eq!(elements[0].bytes, &[1, 0, 0, 0]);
        assert_eq!(elements[1].bytes.len(), 4 + 3);
        assert_eq!(elements[1].to_value().unwrap(), BsonValue::String("xy".to_string()));
    }

    #[test]
    fn test_truncated_element_reports_error() {
        // 外层长度正确, 内部字符串长度越界
        let bytes = [13u8, 0, 0, 0, 2, b'a', 0, 50, 0, 0, 0, 0, 0];
        let doc = RawDocument::new(&bytes).unwrap();
        let mut iter = doc.iter();
        assert!(matches!(iter.next(), Some(Err(_))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_validation() {
        assert!(RawDocument::new(&[5, 0, 0, 0, 0]).unwrap().is_empty());
        assert!(RawDocument::new(&[6, 0, 0, 0, 0]).is_err());
        assert!(RawDocument::new(&[5, 0, 0, 0, 1]).is_err());
        assert!(RawDocumentBuf::from_bytes(vec![1u8, 2]).is_err());
        assert_eq!(RawDocumentBuf::default().to_document().unwrap(), Document::new());
    }
}
