//! BSON 文档结构模块
//!
//! 文档是有序的 (名称, 值) 列表。默认情况下名称唯一,
//! 开启 `allow_duplicate_names` 后可以保存重复名称; 从线上解码的文档
//! 原样保留元素顺序与重复项。

use crate::io::{JsonReader, JsonWriter, JsonWriterSettings};
use crate::value::BsonValue;
use crate::{BsonDateTime, BsonError, BsonResult};
use compact_str::CompactString;
use docwire_common::ObjectId;
use std::fmt;

/// BSON 文档
#[derive(Clone, Default)]
pub struct Document {
    elements: Vec<(CompactString, BsonValue)>,
    allow_duplicate_names: bool,
}

impl Document {
    /// 创建空文档
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
            allow_duplicate_names: false,
        }
    }

    /// 创建允许重复名称的空文档
    pub fn allowing_duplicates() -> Self {
        Self {
            elements: Vec::new(),
            allow_duplicate_names: true,
        }
    }

    pub fn allow_duplicate_names(&self) -> bool {
        self.allow_duplicate_names
    }

    pub fn set_allow_duplicate_names(&mut self, allow: bool) {
        self.allow_duplicate_names = allow;
    }

    /// 插入字段
    ///
    /// # Brief
    /// 替换第一个同名元素的值; 名称不存在时追加到末尾
    ///
    /// # Arguments
    /// * `key` - 字段名
    /// * `value` - 字段值
    ///
    /// # Returns
    /// 被替换的旧值
    pub fn insert(
        &mut self,
        key: impl Into<CompactString>,
        value: impl Into<BsonValue>,
    ) -> Option<BsonValue> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(index) => Some(std::mem::replace(&mut self.elements[index].1, value)),
            None => {
                self.elements.push((key, value));
                None
            }
        }
    }

    /// 追加元素
    ///
    /// # Brief
    /// 总是追加到末尾; 名称已存在且不允许重复时返回错误
    pub fn push(
        &mut self,
        key: impl Into<CompactString>,
        value: impl Into<BsonValue>,
    ) -> BsonResult<()> {
        let key = key.into();
        if !self.allow_duplicate_names && self.contains_key(&key) {
            return Err(BsonError::InvalidDocument(format!(
                "Duplicate element name '{}'",
                key
            )));
        }
        self.elements.push((key, value.into()));
        Ok(())
    }

    /// 解码时使用: 不检查重复, 保持线上原样
    pub(crate) fn push_unchecked(&mut self, key: impl Into<CompactString>, value: BsonValue) {
        self.elements.push((key.into(), value));
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.elements.iter().position(|(k, _)| k.as_str() == key)
    }

    /// 获取第一个同名元素的值
    pub fn get(&self, key: &str) -> Option<&BsonValue> {
        self.elements
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    /// 获取全部同名元素的值
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a BsonValue> + 'a {
        self.elements
            .iter()
            .filter(move |(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut BsonValue> {
        self.elements
            .iter_mut()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    /// 删除第一个同名元素, 其余元素保持顺序
    pub fn remove(&mut self, key: &str) -> Option<BsonValue> {
        let index = self.position(key)?;
        Some(self.elements.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// 按下标获取元素
    pub fn element_at(&self, index: usize) -> Option<(&str, &BsonValue)> {
        self.elements.get(index).map(|(k, v)| (k.as_str(), v))
    }

    pub fn first(&self) -> Option<(&str, &BsonValue)> {
        self.element_at(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &BsonValue> {
        self.elements.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BsonValue)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut BsonValue)> {
        self.elements.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.as_i32())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<BsonValue>> {
        self.get(key).and_then(|v| v.as_array())
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(|v| v.as_document())
    }

    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(|v| v.as_object_id())
    }

    pub fn get_datetime(&self, key: &str) -> Option<BsonDateTime> {
        self.get(key).and_then(|v| v.as_datetime())
    }

    /// 按路径获取嵌套字段
    ///
    /// # Brief
    /// 支持点分路径, 如 "address.city" 或 "items.0"
    ///
    /// # Arguments
    /// * `path` - 字段路径
    pub fn get_path(&self, path: &str) -> Option<&BsonValue> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.get(head)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }

    /// 合并文档
    ///
    /// 同名字段被 `other` 中的值覆盖, 新字段追加到末尾。
    pub fn merge(&mut self, other: Document) {
        for (key, value) in other.elements {
            self.insert(key, value);
        }
    }

    /// 编码为 BSON 字节
    pub fn to_vec(&self) -> BsonResult<Vec<u8>> {
        crate::codec::encode_document(self)
    }

    /// 从 BSON 字节解码
    pub fn from_slice(bytes: &[u8]) -> BsonResult<Self> {
        crate::codec::decode_document(bytes)
    }

    /// 解析 JSON 文本 (支持扩展 JSON 与 shell 语法)
    pub fn from_json(json: &str) -> BsonResult<Self> {
        JsonReader::new(json).parse_document()
    }

    /// 按 shell 模式输出 JSON
    pub fn to_json(&self) -> String {
        self.to_string()
    }

    /// 按给定设置输出 JSON
    pub fn to_json_with(&self, settings: &JsonWriterSettings) -> BsonResult<String> {
        let mut writer = JsonWriter::new(settings.clone());
        crate::io::BsonWriter::write_document(&mut writer, self)?;
        Ok(writer.into_string())
    }

    pub fn to_json_pretty(&self) -> String {
        let settings = JsonWriterSettings {
            indent: true,
            ..Default::default()
        };
        self.to_json_with(&settings)
            .unwrap_or_else(|_| self.to_string())
    }
}

impl PartialEq for Document {
    /// 只比较元素序列, 不比较重复名称开关
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json_with(&JsonWriterSettings::default()) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.debug_list().entries(self.elements.iter()).finish(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.elements.iter().map(|(k, v)| (k.as_str(), v)))
            .finish()
    }
}

impl<K: Into<CompactString>, V: Into<BsonValue>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (key, value) in iter {
            doc.insert(key, value);
        }
        doc
    }
}

impl<K: Into<CompactString>, V: Into<BsonValue>> Extend<(K, V)> for Document {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl IntoIterator for Document {
    type Item = (CompactString, BsonValue);
    type IntoIter = std::vec::IntoIter<(CompactString, BsonValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a str, &'a BsonValue);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (CompactString, BsonValue)>,
        fn(&'a (CompactString, BsonValue)) -> (&'a str, &'a BsonValue),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn split(entry: &(CompactString, BsonValue)) -> (&str, &BsonValue) {
            (entry.0.as_str(), &entry.1)
        }
        self.elements.iter().map(split)
    }
}

impl TryFrom<BsonValue> for Document {
    type Error = BsonError;

    fn try_from(value: BsonValue) -> BsonResult<Self> {
        match value {
            BsonValue::Document(doc) => Ok(doc),
            other => Err(BsonError::unexpected_type("Document", other.element_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insert_keeps_order_and_replaces() {
        let mut doc = Document::new();
        doc.insert("b", 1);
        doc.insert("a", 2);
        assert_eq!(doc.insert("b", 3), Some(BsonValue::Int32(1)));
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(doc.get_i32("b"), Some(3));
    }

    #[test]
    fn test_push_duplicates() {
        let mut doc = Document::new();
        doc.push("x", 1).unwrap();
        assert!(doc.push("x", 2).is_err());

        let mut dup = Document::allowing_duplicates();
        dup.push("x", 1).unwrap();
        dup.push("x", 2).unwrap();
        assert_eq!(dup.len(), 2);
        assert_eq!(dup.get_all("x").count(), 2);
        assert_eq!(dup.get_i32("x"), Some(1));
    }

    #[test]
    fn test_remove_and_path() {
        let mut doc = doc! {
            "user": { "name": "Alice", "tags": ["x", "y"] },
            "age": 30
        };
        assert_eq!(doc.get_path("user.name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(doc.get_path("user.tags.1").and_then(|v| v.as_str()), Some("y"));
        assert_eq!(doc.remove("user").map(|v| v.element_type()), Some(crate::ElementType::Document));
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["age"]);
    }

    #[test]
    fn test_lookup_by_borrowed_name() {
        let name = String::from("count");
        let mut doc = Document::allowing_duplicates();
        doc.push(name.as_str(), 1).unwrap();
        doc.push("other", 2).unwrap();
        doc.push(name.as_str(), 3).unwrap();

        assert!(doc.contains_key(&name));
        assert_eq!(doc.get(&name), Some(&BsonValue::Int32(1)));
        assert_eq!(doc.get_all(&name).cloned().collect::<Vec<_>>(), vec![BsonValue::Int32(1), BsonValue::Int32(3)]);
        if let Some(value) = doc.get_mut(&name) {
            *value = BsonValue::Int32(10);
        }
        assert_eq!(doc.remove(&name), Some(BsonValue::Int32(10)));
        assert_eq!(doc.get(&name), Some(&BsonValue::Int32(3)));
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn test_merge() {
        let mut a = doc! { "x": 1, "y": 2 };
        a.merge(doc! { "y": 20, "z": 30 });
        assert_eq!(a.keys().collect::<Vec<_>>(), vec!["x", "y", "z"]);
        assert_eq!(a.get_i32("y"), Some(20));
    }

    #[test]
    fn test_json_text() {
        let doc = doc! { "a": 1, "s": "hi" };
        assert_eq!(doc.to_json(), "{ \"a\" : 1, \"s\" : \"hi\" }");
        assert_eq!(Document::new().to_json(), "{ }");
        let parsed = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(parsed, doc);
    }
}
