//! serde 桥接
//!
//! 已经实现了 `Serialize`/`Deserialize` 的类型可以不写类映射, 经由
//! `BsonValue` 中转参与注册表序列化。

use super::context::{DeserializationContext, SerializationContext};
use super::options::SerializationOptions;
use super::primitives::unsupported_options;
use super::registry::SerializerRegistry;
use super::serializer::{erase, BsonMapped, BsonSerializer, SerializerRef};
use crate::de::from_bson_value;
use crate::ser::to_bson_value;
use crate::BsonResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// 通过 serde 读写 `T` 的序列化器
pub struct SerdeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for SerdeSerializer<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> SerdeSerializer<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> BsonSerializer<T> for SerdeSerializer<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &T) -> BsonResult<()> {
        let value = to_bson_value(value)?;
        ctx.writer().write_value(&value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<T> {
        ctx.current_bson_type()?;
        let value = ctx.reader().read_value()?;
        from_bson_value(&value)
    }
}

/// 把 serde 类型用作类映射成员的包装
///
/// ```rust,ignore
/// cm.map_member("Settings", |u| &u.settings, |u, v| u.settings = v);
/// // settings: Serde<Preferences>
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Serde<T>(pub T);

impl<T> Serde<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Serde<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Serde<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> From<T> for Serde<T> {
    fn from(value: T) -> Self {
        Serde(value)
    }
}

struct WrappedSerdeSerializer<T> {
    inner: SerdeSerializer<T>,
}

impl<T> BsonSerializer<Serde<T>> for WrappedSerdeSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Serde<T>) -> BsonResult<()> {
        self.inner.serialize(ctx, &value.0)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Serde<T>> {
        self.inner.deserialize(ctx).map(Serde)
    }
}

impl<T> BsonMapped for Serde<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        if let Some(options) = options {
            return Err(unsupported_options::<Serde<T>>(options));
        }
        Ok(erase::<Serde<T>, _>(WrappedSerdeSerializer {
            inner: SerdeSerializer::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::serialization::{ClassMapBuilder, ClassMapped};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Preferences {
        theme: String,
        font_size: u8,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct User {
        name: String,
        preferences: Serde<Preferences>,
    }

    impl ClassMapped for User {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("Name", |u| &u.name, |u, v| u.name = v);
            cm.map_member("Preferences", |u| &u.preferences, |u, v| u.preferences = v);
        }
    }

    #[test]
    fn test_serde_member() {
        let registry = SerializerRegistry::new();
        let user = User {
            name: "ann".to_string(),
            preferences: Serde(Preferences {
                theme: "dark".to_string(),
                font_size: 12,
            }),
        };
        let doc = registry.to_document(&user).unwrap();
        assert_eq!(
            doc,
            doc! { "Name": "ann", "Preferences": { "theme": "dark", "font_size": 12 } }
        );
        let back: User = registry.from_document(&doc).unwrap();
        assert_eq!(back, user);
        assert_eq!(back.preferences.theme, "dark");
    }

    #[test]
    fn test_registered_serde_serializer() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }

        let registry = SerializerRegistry::new();
        registry
            .register_serializer::<Point>(SerdeSerializer::new())
            .unwrap();
        let serializer = SerdeSerializer::<Point>::new();
        let mut writer = crate::io::BinaryWriter::new();
        {
            let mut ctx = SerializationContext::new(&mut writer, &registry);
            serializer.serialize(&mut ctx, &Point { x: 1, y: 2 }).unwrap();
        }
        let bytes = writer.into_vec();
        assert_eq!(crate::Document::from_slice(&bytes).unwrap(), doc! { "x": 1, "y": 2 });

        let mut reader = crate::io::BinaryReader::new(&bytes);
        let mut ctx = DeserializationContext::new(&mut reader, &registry);
        assert_eq!(serializer.deserialize(&mut ctx).unwrap(), Point { x: 1, y: 2 });
    }
}
