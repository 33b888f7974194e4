//! 成员映射
//!
//! 每个成员由一对显式注册的存取函数描述, 取代运行时反射。
//! `MemberSettings` 是约定管线可见的非泛型部分, `MemberMap` 是冻结后的结果。

use super::context::{DeserializationContext, SerializationContext};
use super::id_generators::IdGenerator;
use super::options::SerializationOptions;
use super::registry::SerializerRegistry;
use super::serializer::{BsonMapped, SerializerRef, TypeInfo};
use crate::{BsonError, BsonResult};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 可作为类成员的值类型
///
/// 忽略默认值与默认值回填需要比较与复制成员值。
pub trait MemberValue: BsonMapped + Clone + PartialEq + Default + Send + Sync {}

impl<M: BsonMapped + Clone + PartialEq + Default + Send + Sync> MemberValue for M {}

pub(crate) type Getter<T, M> = Arc<dyn Fn(&T) -> &M + Send + Sync>;
pub(crate) type Setter<T, M> = Arc<dyn Fn(&mut T, M) + Send + Sync>;
pub(crate) type ShouldSerialize<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub(crate) type DefaultValue = Arc<dyn Any + Send + Sync>;

/// 擦除成员类型的存取器
pub(crate) trait MemberAccessor<T>: Send + Sync {
    fn member_type(&self) -> TypeInfo;

    fn is_read_only(&self) -> bool;

    fn get<'a>(&self, obj: &'a T) -> &'a dyn Any;

    fn set(&self, obj: &mut T, value: Box<dyn Any>) -> BsonResult<()>;

    /// 成员当前值是否等于 `value`; `value` 为 None 时与类型默认值比较
    fn is_default(&self, obj: &T, value: Option<&dyn Any>) -> bool;

    /// 把默认值的副本写入成员
    fn apply_default(&self, obj: &mut T, value: Option<&dyn Any>) -> BsonResult<()>;

    fn create_serializer(
        &self,
        registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef>;
}

/// 通过 `impl Fn` 约束让闭包获得高阶生命周期签名
pub(crate) fn getter<T, M>(f: impl Fn(&T) -> &M + Send + Sync + 'static) -> Getter<T, M> {
    Arc::new(f)
}

pub(crate) fn setter<T, M>(f: impl Fn(&mut T, M) + Send + Sync + 'static) -> Setter<T, M> {
    Arc::new(f)
}

pub(crate) struct TypedMember<T, M> {
    get: Getter<T, M>,
    set: Option<Setter<T, M>>,
    _marker: PhantomData<fn() -> M>,
}

impl<T, M> TypedMember<T, M> {
    pub(crate) fn new(get: Getter<T, M>, set: Option<Setter<T, M>>) -> Self {
        Self {
            get,
            set,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static, M: MemberValue> MemberAccessor<T> for TypedMember<T, M> {
    fn member_type(&self) -> TypeInfo {
        TypeInfo::of::<M>()
    }

    fn is_read_only(&self) -> bool {
        self.set.is_none()
    }

    fn get<'a>(&self, obj: &'a T) -> &'a dyn Any {
        (self.get)(obj)
    }

    fn set(&self, obj: &mut T, value: Box<dyn Any>) -> BsonResult<()> {
        let setter = match &self.set {
            Some(setter) => setter,
            None => return Ok(()),
        };
        let value = value.downcast::<M>().map_err(|_| BsonError::ValueTypeMismatch {
            expected: std::any::type_name::<M>().to_string(),
        })?;
        setter(obj, *value);
        Ok(())
    }

    fn is_default(&self, obj: &T, value: Option<&dyn Any>) -> bool {
        let current = (self.get)(obj);
        match value {
            Some(default) => default.downcast_ref::<M>() == Some(current),
            None => *current == M::default(),
        }
    }

    fn apply_default(&self, obj: &mut T, value: Option<&dyn Any>) -> BsonResult<()> {
        let default = match value {
            Some(default) => default
                .downcast_ref::<M>()
                .cloned()
                .ok_or_else(|| BsonError::ValueTypeMismatch {
                    expected: std::any::type_name::<M>().to_string(),
                })?,
            None => M::default(),
        };
        if let Some(setter) = &self.set {
            setter(obj, default);
        }
        Ok(())
    }

    fn create_serializer(
        &self,
        registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        registry.lookup_with_options::<M>(options)
    }
}

/// 成员的非泛型配置, 约定管线读写这一部分
#[derive(Clone)]
pub struct MemberSettings {
    pub member_name: String,
    pub member_type: TypeInfo,
    pub read_only: bool,
    /// 在 `map_class` 中声明, 需经过成员查找约定筛选
    pub auto_mapped: bool,
    pub declaration_index: usize,
    /// None 表示由命名约定决定
    pub element_name: Option<String>,
    /// None 排在最后
    pub order: Option<i32>,
    /// None 表示由约定决定
    pub ignore_if_default: Option<bool>,
    pub is_required: bool,
    pub has_default_value: bool,
    pub options: Option<SerializationOptions>,
    pub id_generator: Option<Arc<dyn IdGenerator>>,
}

impl MemberSettings {
    pub(crate) fn new(member_name: String, member_type: TypeInfo, read_only: bool) -> Self {
        Self {
            member_name,
            member_type,
            read_only,
            auto_mapped: false,
            declaration_index: 0,
            element_name: None,
            order: None,
            ignore_if_default: None,
            is_required: false,
            has_default_value: false,
            options: None,
            id_generator: None,
        }
    }
}

impl fmt::Debug for MemberSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberSettings")
            .field("member_name", &self.member_name)
            .field("member_type", &self.member_type)
            .field("element_name", &self.element_name)
            .field("order", &self.order)
            .field("ignore_if_default", &self.ignore_if_default)
            .field("is_required", &self.is_required)
            .finish()
    }
}

/// 构建中的成员
pub(crate) struct MemberDraft<T> {
    pub settings: MemberSettings,
    pub accessor: Arc<dyn MemberAccessor<T>>,
    pub serializer: Option<SerializerRef>,
    pub default_value: Option<DefaultValue>,
    pub should_serialize: Option<ShouldSerialize<T>>,
}

/// 冻结后的成员映射
pub struct MemberMap<T> {
    pub(crate) settings: MemberSettings,
    pub(crate) element_name: String,
    pub(crate) accessor: Arc<dyn MemberAccessor<T>>,
    pub(crate) serializer: SerializerRef,
    pub(crate) default_value: Option<DefaultValue>,
    pub(crate) ignore_if_default: bool,
    pub(crate) should_serialize: Option<ShouldSerialize<T>>,
}

impl<T: 'static> MemberMap<T> {
    pub fn member_name(&self) -> &str {
        &self.settings.member_name
    }

    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    pub fn member_type(&self) -> TypeInfo {
        self.settings.member_type
    }

    pub fn order(&self) -> Option<i32> {
        self.settings.order
    }

    pub fn is_required(&self) -> bool {
        self.settings.is_required
    }

    pub fn ignore_if_default(&self) -> bool {
        self.ignore_if_default
    }

    pub fn is_read_only(&self) -> bool {
        self.accessor.is_read_only()
    }

    pub fn has_default_value(&self) -> bool {
        self.settings.has_default_value
    }

    /// 显式配置的默认值
    pub fn default_value<M: 'static>(&self) -> Option<&M> {
        self.default_value.as_ref().and_then(|v| v.downcast_ref::<M>())
    }

    pub fn serializer(&self) -> &SerializerRef {
        &self.serializer
    }

    pub fn options(&self) -> Option<&SerializationOptions> {
        self.settings.options.as_ref()
    }

    pub fn id_generator(&self) -> Option<&Arc<dyn IdGenerator>> {
        self.settings.id_generator.as_ref()
    }

    /// 读取成员当前值
    pub fn get_value<'a>(&self, obj: &'a T) -> &'a dyn Any {
        self.accessor.get(obj)
    }

    pub(crate) fn set_value(&self, obj: &mut T, value: Box<dyn Any>) -> BsonResult<()> {
        self.accessor.set(obj, value)
    }

    fn default_ref(&self) -> Option<&dyn Any> {
        self.default_value.as_ref().map(|v| {
            let v: &(dyn Any + Send + Sync) = v.as_ref();
            v as &dyn Any
        })
    }

    /// 成员是否应当写出
    pub fn should_serialize(&self, obj: &T) -> bool {
        if self.ignore_if_default && self.accessor.is_default(obj, self.default_ref()) {
            return false;
        }
        match &self.should_serialize {
            Some(predicate) => predicate(obj),
            None => true,
        }
    }

    /// 文档中缺少该元素时回填默认值
    pub(crate) fn apply_default(&self, obj: &mut T) -> BsonResult<()> {
        self.accessor.apply_default(obj, self.default_ref())
    }

    pub(crate) fn serialize_member(&self, ctx: &mut SerializationContext<'_>, obj: &T) -> BsonResult<()> {
        self.serializer.serialize_dyn(ctx, self.accessor.get(obj))
    }

    /// 只读成员的值被跳过
    pub(crate) fn deserialize_member(
        &self,
        ctx: &mut DeserializationContext<'_>,
        obj: &mut T,
    ) -> BsonResult<()> {
        if self.accessor.is_read_only() {
            return ctx.reader().skip_value();
        }
        let value = self.serializer.deserialize_dyn(ctx)?;
        self.accessor.set(obj, value)
    }
}

impl<T> fmt::Debug for MemberMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberMap")
            .field("member_name", &self.settings.member_name)
            .field("element_name", &self.element_name)
            .field("member_type", &self.settings.member_type)
            .field("ignore_if_default", &self.ignore_if_default)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample {
        count: i32,
        label: String,
    }

    fn count_member() -> TypedMember<Sample, i32> {
        TypedMember::new(
            getter(|s: &Sample| &s.count),
            Some(setter(|s: &mut Sample, v: i32| s.count = v)),
        )
    }

    #[test]
    fn test_get_and_set() {
        let member = count_member();
        let mut sample = Sample::default();
        member.set(&mut sample, Box::new(5i32)).unwrap();
        assert_eq!(member.get(&sample).downcast_ref::<i32>(), Some(&5));
        assert!(member.set(&mut sample, Box::new("x")).is_err());
        assert_eq!(member.member_type(), TypeInfo::of::<i32>());
    }

    #[test]
    fn test_defaults() {
        let member = count_member();
        let mut sample = Sample::default();
        assert!(member.is_default(&sample, None));
        let seven = 7i32;
        assert!(!member.is_default(&sample, Some(&seven)));
        member.apply_default(&mut sample, Some(&seven)).unwrap();
        assert_eq!(sample.count, 7);
        assert!(member.is_default(&sample, Some(&seven)));
    }

    #[test]
    fn test_read_only_member_ignores_set() {
        let member: TypedMember<Sample, String> = TypedMember::new(getter(|s: &Sample| &s.label), None);
        let mut sample = Sample::default();
        assert!(member.is_read_only());
        member.set(&mut sample, Box::new("ignored".to_string())).unwrap();
        assert_eq!(sample.label, "");
    }
}
