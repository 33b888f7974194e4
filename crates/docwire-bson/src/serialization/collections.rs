//! 容器序列化器: `Option`、`Vec` 与以字符串为键的字典
//!
//! 元素序列化器在第一次使用时才从注册表解析, 这样递归类型
//! (`struct Node { children: Vec<Node> }`) 的类映射可以正常冻结。

use super::context::{DeserializationContext, SerializationContext};
use super::options::{DictionaryOptions, DictionaryRepresentation, SerializationOptions};
use super::primitives::unsupported_options;
use super::registry::SerializerRegistry;
use super::serializer::{
    deserialize_value, erase, serialize_value, BsonMapped, BsonSerializer, MemberSerializationInfo,
    SerializerRef,
};
use crate::io::BsonWriter;
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::OnceLock;

/// 延迟解析的元素序列化器
struct LazySerializer<T> {
    options: Option<SerializationOptions>,
    cell: OnceLock<SerializerRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: BsonMapped> LazySerializer<T> {
    fn new(options: Option<SerializationOptions>) -> Self {
        Self {
            options,
            cell: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    fn get(&self, registry: &SerializerRegistry) -> BsonResult<SerializerRef> {
        if let Some(serializer) = self.cell.get() {
            return Ok(serializer.clone());
        }
        let serializer = registry.lookup_with_options::<T>(self.options.as_ref())?;
        Ok(self.cell.get_or_init(|| serializer).clone())
    }
}

// ---------------------------------------------------------------------------
// Option
// ---------------------------------------------------------------------------

/// `None` 写为 BSON null, 读到 null 时得到 `None`
pub struct OptionSerializer<T> {
    inner: LazySerializer<T>,
}

impl<T: BsonMapped> BsonSerializer<Option<T>> for OptionSerializer<T> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Option<T>) -> BsonResult<()> {
        match value {
            None => ctx.writer().write_null(),
            Some(inner) => {
                let serializer = self.inner.get(ctx.registry())?;
                serialize_value(&*serializer, ctx, inner)
            }
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Option<T>> {
        if ctx.current_bson_type()? == ElementType::Null {
            ctx.reader().read_null()?;
            return Ok(None);
        }
        let serializer = self.inner.get(ctx.registry())?;
        deserialize_value(&*serializer, ctx).map(Some)
    }

    fn member_serialization_info(
        &self,
        registry: &SerializerRegistry,
        member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        self.inner
            .get(registry)
            .ok()?
            .member_serialization_info(registry, member_name)
    }
}

impl<T: BsonMapped> BsonMapped for Option<T> {
    /// 选项原样传给内部类型
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        Ok(erase::<Option<T>, _>(OptionSerializer {
            inner: LazySerializer::new(options.cloned()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Vec
// ---------------------------------------------------------------------------

pub struct VecSerializer<T> {
    items: LazySerializer<T>,
}

impl<T: BsonMapped> BsonSerializer<Vec<T>> for VecSerializer<T> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Vec<T>) -> BsonResult<()> {
        let serializer = self.items.get(ctx.registry())?;
        ctx.writer().write_start_array()?;
        for item in value {
            serialize_value(&*serializer, ctx, item)?;
        }
        ctx.writer().write_end_array()
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Vec<T>> {
        match ctx.current_bson_type()? {
            ElementType::Array => {}
            other => return Err(BsonError::unexpected_type("Vec", other)),
        }
        let serializer = self.items.get(ctx.registry())?;
        ctx.reader().read_start_array()?;
        let mut items = Vec::new();
        while ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
            items.push(deserialize_value::<T>(&*serializer, ctx)?);
        }
        ctx.reader().read_end_array()?;
        Ok(items)
    }

    /// 数组成员路径上的下一段指向元素类型的成员
    fn member_serialization_info(
        &self,
        registry: &SerializerRegistry,
        member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        self.items
            .get(registry)
            .ok()?
            .member_serialization_info(registry, member_name)
    }
}

impl<T: BsonMapped> BsonMapped for Vec<T> {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let item_options = match options {
            None => None,
            Some(SerializationOptions::Array(array)) => Some((*array.items).clone()),
            Some(other) => return Err(unsupported_options::<Vec<T>>(other)),
        };
        Ok(erase::<Vec<T>, _>(VecSerializer {
            items: LazySerializer::new(item_options),
        }))
    }
}

// ---------------------------------------------------------------------------
// 字典
// ---------------------------------------------------------------------------

/// 以字符串为键的映射容器
pub trait StringKeyedMap: Default + Send + Sync + 'static {
    type Value: BsonMapped;

    fn entries(&self) -> Box<dyn Iterator<Item = (&String, &Self::Value)> + '_>;

    fn insert_entry(&mut self, key: String, value: Self::Value);
}

impl<V: BsonMapped + Send + Sync> StringKeyedMap for HashMap<String, V> {
    type Value = V;

    fn entries(&self) -> Box<dyn Iterator<Item = (&String, &V)> + '_> {
        Box::new(self.iter())
    }

    fn insert_entry(&mut self, key: String, value: V) {
        self.insert(key, value);
    }
}

impl<V: BsonMapped + Send + Sync> StringKeyedMap for BTreeMap<String, V> {
    type Value = V;

    fn entries(&self) -> Box<dyn Iterator<Item = (&String, &V)> + '_> {
        Box::new(self.iter())
    }

    fn insert_entry(&mut self, key: String, value: V) {
        self.insert(key, value);
    }
}

impl<V: BsonMapped + Send + Sync> StringKeyedMap for IndexMap<String, V> {
    type Value = V;

    fn entries(&self) -> Box<dyn Iterator<Item = (&String, &V)> + '_> {
        Box::new(self.iter())
    }

    fn insert_entry(&mut self, key: String, value: V) {
        self.insert(key, value);
    }
}

/// 字典序列化器
///
/// 写入按配置的表示进行; 读取时根据实际 BSON 类型自动识别三种表示。
pub struct DictionarySerializer<M: StringKeyedMap> {
    representation: DictionaryRepresentation,
    values: LazySerializer<M::Value>,
}

impl<M: StringKeyedMap> DictionarySerializer<M> {
    fn write_key<W: BsonWriter + ?Sized>(writer: &mut W, key: &str) -> BsonResult<()> {
        writer.write_string(key)
    }

    fn read_key(ctx: &mut DeserializationContext<'_>) -> BsonResult<String> {
        match ctx.current_bson_type()? {
            ElementType::String => ctx.reader().read_string(),
            other => Err(BsonError::unexpected_type("dictionary key", other)),
        }
    }

    fn read_array_form(
        &self,
        ctx: &mut DeserializationContext<'_>,
        serializer: &SerializerRef,
        map: &mut M,
    ) -> BsonResult<()> {
        ctx.reader().read_start_array()?;
        while ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
            match ctx.current_bson_type()? {
                ElementType::Array => {
                    ctx.reader().read_start_array()?;
                    ctx.reader().read_bson_type()?;
                    let key = Self::read_key(ctx)?;
                    ctx.reader().read_bson_type()?;
                    let value = deserialize_value(&**serializer, ctx)?;
                    if ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
                        return Err(BsonError::InvalidDocument(
                            "dictionary entry array must contain exactly two elements".to_string(),
                        ));
                    }
                    ctx.reader().read_end_array()?;
                    map.insert_entry(key, value);
                }
                ElementType::Document => {
                    ctx.reader().read_start_document()?;
                    let mut key = None;
                    let mut value = None;
                    while ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
                        let name = ctx.reader().read_name()?;
                        match name.as_str() {
                            "k" => key = Some(Self::read_key(ctx)?),
                            "v" => value = Some(deserialize_value(&**serializer, ctx)?),
                            _ => {
                                return Err(BsonError::UnexpectedElement {
                                    class: "dictionary entry".to_string(),
                                    element: name,
                                })
                            }
                        }
                    }
                    ctx.reader().read_end_document()?;
                    match (key, value) {
                        (Some(key), Some(value)) => map.insert_entry(key, value),
                        (None, _) => return Err(missing_entry_part("k")),
                        (_, None) => return Err(missing_entry_part("v")),
                    }
                }
                other => return Err(BsonError::unexpected_type("dictionary entry", other)),
            }
        }
        ctx.reader().read_end_array()
    }
}

fn missing_entry_part(name: &str) -> BsonError {
    BsonError::MissingRequiredElement {
        class: "dictionary entry".to_string(),
        element: name.to_string(),
    }
}

impl<M: StringKeyedMap> BsonSerializer<M> for DictionarySerializer<M> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &M) -> BsonResult<()> {
        let serializer = self.values.get(ctx.registry())?;
        match self.representation {
            DictionaryRepresentation::Document => {
                ctx.writer().write_start_document()?;
                for (key, item) in value.entries() {
                    ctx.writer().write_name(key)?;
                    serialize_value(&*serializer, ctx, item)?;
                }
                ctx.writer().write_end_document()
            }
            DictionaryRepresentation::ArrayOfArrays => {
                ctx.writer().write_start_array()?;
                for (key, item) in value.entries() {
                    ctx.writer().write_start_array()?;
                    Self::write_key(ctx.writer(), key)?;
                    serialize_value(&*serializer, ctx, item)?;
                    ctx.writer().write_end_array()?;
                }
                ctx.writer().write_end_array()
            }
            DictionaryRepresentation::ArrayOfDocuments => {
                ctx.writer().write_start_array()?;
                for (key, item) in value.entries() {
                    let writer = ctx.writer();
                    writer.write_start_document()?;
                    writer.write_name("k")?;
                    Self::write_key(writer, key)?;
                    writer.write_name("v")?;
                    serialize_value(&*serializer, ctx, item)?;
                    ctx.writer().write_end_document()?;
                }
                ctx.writer().write_end_array()
            }
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<M> {
        let serializer = self.values.get(ctx.registry())?;
        let mut map = M::default();
        match ctx.current_bson_type()? {
            ElementType::Document => {
                ctx.reader().read_start_document()?;
                while ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
                    let key = ctx.reader().read_name()?;
                    let value = deserialize_value(&*serializer, ctx)?;
                    map.insert_entry(key, value);
                }
                ctx.reader().read_end_document()?;
            }
            ElementType::Array => self.read_array_form(ctx, &serializer, &mut map)?,
            other => return Err(BsonError::unexpected_type("dictionary", other)),
        }
        Ok(map)
    }
}

fn dictionary_options<M>(options: Option<&SerializationOptions>) -> BsonResult<DictionaryOptions> {
    match options {
        None => Ok(DictionaryOptions::default()),
        Some(SerializationOptions::Dictionary(dict)) => Ok(dict.clone()),
        Some(other) => Err(unsupported_options::<M>(other)),
    }
}

macro_rules! dictionary_mapped {
    ($($map:ident),*) => {
        $(
            impl<V: BsonMapped + Send + Sync> BsonMapped for $map<String, V> {
                fn create_serializer(
                    _registry: &SerializerRegistry,
                    options: Option<&SerializationOptions>,
                ) -> BsonResult<SerializerRef> {
                    let options = dictionary_options::<$map<String, V>>(options)?;
                    Ok(erase::<$map<String, V>, _>(DictionarySerializer::<$map<String, V>> {
                        representation: options.representation,
                        values: LazySerializer::new(options.value_options.map(|o| *o)),
                    }))
                }
            }
        )*
    };
}

dictionary_mapped!(HashMap, BTreeMap, IndexMap);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::value::BsonValue;
    use crate::{bson, doc};

    fn write_member<T: BsonMapped>(
        registry: &SerializerRegistry,
        value: &T,
        options: Option<&SerializationOptions>,
    ) -> Document {
        let serializer = registry.lookup_with_options::<T>(options).unwrap();
        let mut writer = crate::io::BinaryWriter::new();
        {
            let mut ctx = SerializationContext::new(&mut writer, registry);
            ctx.writer().write_start_document().unwrap();
            ctx.writer().write_name("v").unwrap();
            serialize_value(&*serializer, &mut ctx, value).unwrap();
            ctx.writer().write_end_document().unwrap();
        }
        Document::from_slice(&writer.into_vec()).unwrap()
    }

    fn read_member<T: BsonMapped>(
        registry: &SerializerRegistry,
        doc: &Document,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<T> {
        let serializer = registry.lookup_with_options::<T>(options).unwrap();
        let bytes = doc.to_vec().unwrap();
        let mut reader = crate::io::BinaryReader::new(&bytes);
        use crate::io::BsonReader;
        reader.read_start_document()?;
        reader.read_bson_type()?;
        reader.read_name()?;
        let mut ctx = DeserializationContext::new(&mut reader, registry);
        deserialize_value::<T>(&*serializer, &mut ctx)
    }

    #[test]
    fn test_option() {
        let registry = SerializerRegistry::new();
        let doc = write_member(&registry, &None::<i32>, None);
        assert_eq!(doc, doc! { "v": null });
        assert_eq!(read_member::<Option<i32>>(&registry, &doc, None).unwrap(), None);
        let doc = write_member(&registry, &Some(3i64), None);
        assert_eq!(doc, doc! { "v": 3i64 });
        assert_eq!(read_member::<Option<i64>>(&registry, &doc, None).unwrap(), Some(3));
    }

    #[test]
    fn test_vec_with_item_options() {
        let registry = SerializerRegistry::new();
        let options = SerializationOptions::array_items(SerializationOptions::representation(
            ElementType::String,
        ));
        let doc = write_member(&registry, &vec![1i32, 2], Some(&options));
        assert_eq!(doc, doc! { "v": ["1", "2"] });
        let back: Vec<i32> = read_member(&registry, &doc, Some(&options)).unwrap();
        assert_eq!(back, vec![1, 2]);

        let nested = vec![vec![1i32], vec![], vec![2, 3]];
        let doc = write_member(&registry, &nested, None);
        assert_eq!(read_member::<Vec<Vec<i32>>>(&registry, &doc, None).unwrap(), nested);
    }

    #[test]
    fn test_vec_rejects_scalar_options() {
        let registry = SerializerRegistry::new();
        let options = SerializationOptions::representation(ElementType::String);
        assert!(matches!(
            registry.lookup_with_options::<Vec<i32>>(Some(&options)),
            Err(BsonError::UnsupportedOptions { .. })
        ));
    }

    #[test]
    fn test_dictionary_representations() {
        let registry = SerializerRegistry::new();
        let mut map = IndexMap::new();
        map.insert("a".to_string(), 1i32);
        map.insert("b".to_string(), 2i32);

        let doc = write_member(&registry, &map, None);
        assert_eq!(doc, doc! { "v": { "a": 1, "b": 2 } });

        let arrays = SerializationOptions::dictionary(DictionaryRepresentation::ArrayOfArrays);
        let doc = write_member(&registry, &map, Some(&arrays));
        assert_eq!(doc, doc! { "v": [["a", 1], ["b", 2]] });
        let back: IndexMap<String, i32> = read_member(&registry, &doc, None).unwrap();
        assert_eq!(back, map);

        let docs = SerializationOptions::dictionary(DictionaryRepresentation::ArrayOfDocuments);
        let doc = write_member(&registry, &map, Some(&docs));
        assert_eq!(
            doc.get("v"),
            Some(&bson!([{ "k": "a", "v": 1 }, { "k": "b", "v": 2 }]))
        );
        let back: BTreeMap<String, i32> = read_member(&registry, &doc, None).unwrap();
        assert_eq!(back.get("b"), Some(&2));
    }

    #[test]
    fn test_dictionary_value_options() {
        let registry = SerializerRegistry::new();
        let options = SerializationOptions::Dictionary(DictionaryOptions {
            representation: DictionaryRepresentation::Document,
            value_options: Some(Box::new(SerializationOptions::representation(
                ElementType::Int64,
            ))),
        });
        let mut map = HashMap::new();
        map.insert("n".to_string(), 5i32);
        let doc = write_member(&registry, &map, Some(&options));
        assert_eq!(doc.get_document("v").and_then(|d| d.get("n")), Some(&BsonValue::Int64(5)));
    }

    #[test]
    fn test_malformed_entries() {
        let registry = SerializerRegistry::new();
        let doc = doc! { "v": [["a", 1, 2]] };
        assert!(read_member::<HashMap<String, i32>>(&registry, &doc, None).is_err());
        let doc = doc! { "v": [{ "k": "a" }] };
        assert!(matches!(
            read_member::<HashMap<String, i32>>(&registry, &doc, None),
            Err(BsonError::MissingRequiredElement { .. })
        ));
        let doc = doc! { "v": 5 };
        assert!(read_member::<HashMap<String, i32>>(&registry, &doc, None).is_err());
    }
}
