//! 序列化器抽象
//!
//! `BsonSerializer<T>` 是面向具体类型的强类型接口; 注册表缓存的是擦除了
//! 类型参数的 `DynSerializer`, 两者之间通过 `erase` 转换。

use super::context::{DeserializationContext, SerializationContext};
use super::options::SerializationOptions;
use super::registry::SerializerRegistry;
use crate::{BsonError, BsonResult};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// 运行时类型标识
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// 去掉模块路径与泛型参数后的类型名, 用作默认鉴别器
    ///
    /// `app::model::Dog` -> `Dog`, `alloc::vec::Vec<i32>` -> `Vec`
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// 强类型序列化器
pub trait BsonSerializer<T>: Send + Sync + 'static {
    /// 把值写到上下文中的写入器
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &T) -> BsonResult<()>;

    /// 从上下文中的读取器读出一个值
    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<T>;

    /// 文档型序列化器按成员名返回对应元素的信息
    fn member_serialization_info(
        &self,
        _registry: &SerializerRegistry,
        _member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        None
    }
}

/// 擦除类型参数的序列化器, 注册表按 `TypeId` 缓存
pub trait DynSerializer: Send + Sync {
    fn value_type(&self) -> TypeInfo;

    fn serialize_dyn(&self, ctx: &mut SerializationContext<'_>, value: &dyn Any) -> BsonResult<()>;

    fn deserialize_dyn(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Box<dyn Any>>;

    fn member_serialization_info(
        &self,
        registry: &SerializerRegistry,
        member_name: &str,
    ) -> Option<MemberSerializationInfo>;
}

pub type SerializerRef = Arc<dyn DynSerializer>;

/// `BsonSerializer<T>` 到 `DynSerializer` 的适配器
pub struct Erased<T, S> {
    inner: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static, S: BsonSerializer<T>> DynSerializer for Erased<T, S> {
    fn value_type(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn serialize_dyn(&self, ctx: &mut SerializationContext<'_>, value: &dyn Any) -> BsonResult<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| BsonError::ValueTypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
            })?;
        self.inner.serialize(ctx, value)
    }

    fn deserialize_dyn(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(self.inner.deserialize(ctx)?))
    }

    fn member_serialization_info(
        &self,
        registry: &SerializerRegistry,
        member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        self.inner.member_serialization_info(registry, member_name)
    }
}

/// 擦除序列化器的类型参数
pub fn erase<T: 'static, S: BsonSerializer<T>>(serializer: S) -> SerializerRef {
    Arc::new(Erased {
        inner: serializer,
        _marker: PhantomData,
    })
}

/// 用擦除后的序列化器写一个强类型值
pub fn serialize_value<T: 'static>(
    serializer: &dyn DynSerializer,
    ctx: &mut SerializationContext<'_>,
    value: &T,
) -> BsonResult<()> {
    serializer.serialize_dyn(ctx, value)
}

/// 用擦除后的序列化器读一个强类型值
pub fn deserialize_value<T: 'static>(
    serializer: &dyn DynSerializer,
    ctx: &mut DeserializationContext<'_>,
) -> BsonResult<T> {
    let boxed = serializer.deserialize_dyn(ctx)?;
    boxed
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| BsonError::ValueTypeMismatch {
            expected: serializer.value_type().name.to_string(),
        })
}

/// 成员到元素的映射信息, 供查询翻译等组件把成员路径转换为元素路径
#[derive(Clone)]
pub struct MemberSerializationInfo {
    pub element_name: String,
    pub nominal_type: TypeInfo,
    pub serializer: SerializerRef,
}

impl fmt::Debug for MemberSerializationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberSerializationInfo")
            .field("element_name", &self.element_name)
            .field("nominal_type", &self.nominal_type)
            .finish()
    }
}

/// 可由注册表自动创建序列化器的类型
///
/// 标量、BSON 类型与容器在本 crate 中实现; 实现了 `ClassMapped`
/// 的类型自动获得基于类映射的实现。
pub trait BsonMapped: Sized + 'static {
    fn create_serializer(
        registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(TypeInfo::of::<String>().short_name(), "String");
        assert_eq!(TypeInfo::of::<Vec<Option<i32>>>().short_name(), "Vec");
        assert_eq!(TypeInfo::of::<i64>().short_name(), "i64");
        assert_eq!(TypeInfo::of::<i64>(), TypeInfo::of::<i64>());
        assert_ne!(TypeInfo::of::<i64>(), TypeInfo::of::<i32>());
    }
}
