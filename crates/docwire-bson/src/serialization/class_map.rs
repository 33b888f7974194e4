//! 类映射
//!
//! `ClassMapBuilder` 收集成员与类级别配置, 经约定管线补全后冻结为不可变的
//! `ClassMap`。冻结时完成全部校验, 配置错误在任何数据流动之前暴露。

use super::conventions::{ClassSettings, ConventionProfile};
use super::discriminator::DiscriminatorConvention;
use super::id_generators::IdGenerator;
use super::member_map::{
    getter, setter, DefaultValue, MemberDraft, MemberMap, MemberSettings, MemberValue, TypedMember,
};
use super::options::SerializationOptions;
use super::registry::SerializerRegistry;
use super::serializer::{erase, BsonSerializer, SerializerRef, TypeInfo};
use crate::document::Document;
use crate::{BsonError, BsonResult};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

const ID_ELEMENT_NAME: &str = "_id";

/// 通过类映射序列化的类型
///
/// ```rust,ignore
/// impl ClassMapped for Order {
///     fn map_class(cm: &mut ClassMapBuilder<Self>) {
///         cm.map_id_member("Id", |o| &o.id, |o, v| o.id = v);
///         cm.map_member("Total", |o| &o.total, |o, v| o.total = v)
///             .ignore_if_default(true);
///     }
/// }
/// ```
pub trait ClassMapped: Default + Send + Sync + 'static {
    fn map_class(cm: &mut ClassMapBuilder<Self>);
}

/// 已知子类型的包装与拆包
pub(crate) trait KnownTypeAdapter<T>: Send + Sync {
    fn wrap(&self, value: Box<dyn Any>) -> Option<T>;

    fn unwrap<'a>(&self, value: &'a T) -> Option<&'a dyn Any>;
}

struct Adapter<T, S> {
    wrap: fn(S) -> T,
    unwrap: fn(&T) -> Option<&S>,
}

impl<T: 'static, S: 'static> KnownTypeAdapter<T> for Adapter<T, S> {
    fn wrap(&self, value: Box<dyn Any>) -> Option<T> {
        value.downcast::<S>().ok().map(|s| (self.wrap)(*s))
    }

    fn unwrap<'a>(&self, value: &'a T) -> Option<&'a dyn Any> {
        (self.unwrap)(value).map(|s| s as &dyn Any)
    }
}

type KnownTypeResolver = fn(&SerializerRegistry) -> BsonResult<(ResolvedKnownType, SerializerRef)>;

pub(crate) struct ResolvedKnownType {
    discriminator: String,
    all_discriminators: Vec<String>,
}

fn resolve_known_type<S: ClassMapped>(
    registry: &SerializerRegistry,
) -> BsonResult<(ResolvedKnownType, SerializerRef)> {
    let class_map = registry.class_map::<S>()?;
    let serializer = registry.lookup::<S>()?;
    Ok((
        ResolvedKnownType {
            discriminator: class_map.discriminator().to_string(),
            all_discriminators: class_map.all_discriminators(),
        },
        serializer,
    ))
}

struct KnownTypeDraft<T> {
    type_info: TypeInfo,
    adapter: Arc<dyn KnownTypeAdapter<T>>,
    resolve: KnownTypeResolver,
}

/// 冻结后的已知子类型
pub(crate) struct KnownType<T> {
    pub type_info: TypeInfo,
    pub discriminator: String,
    pub serializer: SerializerRef,
    pub adapter: Arc<dyn KnownTypeAdapter<T>>,
}

/// 类映射构建器
pub struct ClassMapBuilder<T> {
    class: ClassSettings,
    members: Vec<MemberDraft<T>>,
    known_types: Vec<KnownTypeDraft<T>>,
    creator: Option<Arc<dyn Fn() -> T + Send + Sync>>,
    auto_mapping: bool,
    deferred_error: Option<BsonError>,
}

impl<T: ClassMapped> Default for ClassMapBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ClassMapped> ClassMapBuilder<T> {
    pub fn new() -> Self {
        Self {
            class: ClassSettings::new(TypeInfo::of::<T>()),
            members: Vec::new(),
            known_types: Vec::new(),
            creator: None,
            auto_mapping: false,
            deferred_error: None,
        }
    }

    /// 由 `ClassMapped::map_class` 声明成员, 这些成员需经过成员查找约定
    pub fn auto_map(&mut self) -> &mut Self {
        let previous = self.auto_mapping;
        self.auto_mapping = true;
        T::map_class(self);
        self.auto_mapping = previous;
        self
    }

    pub fn type_info(&self) -> TypeInfo {
        self.class.type_info
    }

    fn defer(&mut self, err: BsonError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(err);
        }
    }

    fn class_name(&self) -> String {
        self.class.type_info.short_name().to_string()
    }

    fn push_member<M: MemberValue>(
        &mut self,
        name: &str,
        accessor: TypedMember<T, M>,
        read_only: bool,
    ) -> MemberHandle<'_, T, M> {
        // 重复声明时以后一次为准
        self.members.retain(|m| m.settings.member_name != name);
        let mut settings = MemberSettings::new(name.to_string(), TypeInfo::of::<M>(), read_only);
        settings.auto_mapped = self.auto_mapping;
        settings.declaration_index = self.members.len();
        self.members.push(MemberDraft {
            settings,
            accessor: Arc::new(accessor),
            serializer: None,
            default_value: None,
            should_serialize: None,
        });
        let index = self.members.len() - 1;
        MemberHandle {
            builder: self,
            index: Some(index),
            _marker: PhantomData,
        }
    }

    /// # Brief
    /// 映射一个可读写成员
    ///
    /// # Arguments
    /// * `name` - 成员名, 元素名默认由命名约定推导
    /// * `get` - 读取成员的引用
    /// * `set` - 写入成员
    pub fn map_member<M: MemberValue>(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> &M + Send + Sync + 'static,
        set: impl Fn(&mut T, M) + Send + Sync + 'static,
    ) -> MemberHandle<'_, T, M> {
        self.push_member(name, TypedMember::new(getter(get), Some(setter(set))), false)
    }

    /// 只读成员只写出, 读取时跳过对应元素
    pub fn map_read_only_member<M: MemberValue>(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> &M + Send + Sync + 'static,
    ) -> MemberHandle<'_, T, M> {
        self.push_member(name, TypedMember::new(getter(get), None), true)
    }

    /// 映射成员并设为 id, 元素名固定为 `_id`
    pub fn map_id_member<M: MemberValue>(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> &M + Send + Sync + 'static,
        set: impl Fn(&mut T, M) + Send + Sync + 'static,
    ) -> MemberHandle<'_, T, M> {
        if let Some(existing) = self.class.id_member.clone() {
            if existing != name {
                let err = BsonError::DuplicateIdMember {
                    class: self.class_name(),
                    existing,
                };
                self.defer(err);
            }
        }
        self.class.id_member = Some(name.to_string());
        self.map_member(name, get, set)
    }

    /// 映射接收未知元素的成员, 成员类型必须为 `Document`
    pub fn map_extra_elements_member<M: MemberValue>(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> &M + Send + Sync + 'static,
        set: impl Fn(&mut T, M) + Send + Sync + 'static,
    ) -> MemberHandle<'_, T, M> {
        if let Some(existing) = self.class.extra_elements_member.clone() {
            if existing != name {
                let err = BsonError::DuplicateExtraElementsMember {
                    class: self.class_name(),
                    existing,
                };
                self.defer(err);
            }
        }
        self.class.extra_elements_member = Some(name.to_string());
        self.map_member(name, get, set)
    }

    /// 取消映射已声明的成员
    pub fn unmap_member(&mut self, name: &str) -> &mut Self {
        self.members.retain(|m| m.settings.member_name != name);
        if self.class.id_member.as_deref() == Some(name) {
            self.class.id_member = None;
        }
        if self.class.extra_elements_member.as_deref() == Some(name) {
            self.class.extra_elements_member = None;
        }
        self
    }

    /// # Brief
    /// 取得已声明成员的句柄以修改配置
    ///
    /// # Returns
    /// 成员不存在或类型不符时记录错误, 冻结时报告
    pub fn member<M: MemberValue>(&mut self, name: &str) -> MemberHandle<'_, T, M> {
        let position = self.members.iter().position(|m| m.settings.member_name == name);
        let index = match position {
            None => {
                let err = BsonError::UnknownMember {
                    class: self.class_name(),
                    member: name.to_string(),
                };
                self.defer(err);
                None
            }
            Some(i) if !self.members[i].settings.member_type.is::<M>() => {
                let err = BsonError::MemberTypeMismatch {
                    class: self.class_name(),
                    member: name.to_string(),
                    requested: std::any::type_name::<M>().to_string(),
                };
                self.defer(err);
                None
            }
            Some(i) => Some(i),
        };
        MemberHandle {
            builder: self,
            index,
            _marker: PhantomData,
        }
    }

    /// 将已声明的成员设为 id
    pub fn set_id_member(&mut self, name: &str) -> &mut Self {
        if !self.members.iter().any(|m| m.settings.member_name == name) {
            let err = BsonError::UnknownMember {
                class: self.class_name(),
                member: name.to_string(),
            };
            self.defer(err);
            return self;
        }
        if let Some(existing) = self.class.id_member.clone() {
            if existing != name {
                let err = BsonError::DuplicateIdMember {
                    class: self.class_name(),
                    existing,
                };
                self.defer(err);
            }
        }
        self.class.id_member = Some(name.to_string());
        self
    }

    pub fn set_discriminator(&mut self, discriminator: impl Into<String>) -> &mut Self {
        self.class.discriminator = Some(discriminator.into());
        self
    }

    /// 即使不是多态派发也写出鉴别器
    pub fn set_discriminator_is_required(&mut self, required: bool) -> &mut Self {
        self.class.discriminator_is_required = required;
        self
    }

    /// 根类之下使用层级鉴别器
    pub fn set_is_root_class(&mut self, root: bool) -> &mut Self {
        self.class.is_root = root;
        self
    }

    pub fn set_discriminator_convention(
        &mut self,
        convention: impl DiscriminatorConvention + 'static,
    ) -> &mut Self {
        self.class.discriminator_convention = Some(Arc::new(convention));
        self
    }

    pub fn set_ignore_extra_elements(&mut self, ignore: bool) -> &mut Self {
        self.class.ignore_extra_elements = Some(ignore);
        self
    }

    /// 反序列化时创建实例的函数, 默认 `T::default()`
    pub fn set_creator(&mut self, creator: impl Fn() -> T + Send + Sync + 'static) -> &mut Self {
        self.creator = Some(Arc::new(creator));
        self
    }

    /// # Brief
    /// 登记一个已知子类型
    ///
    /// # Arguments
    /// * `wrap` - 把子类型值包装为 `T`
    /// * `unwrap` - 若 `T` 持有该子类型则返回其引用
    pub fn add_known_type<S: ClassMapped>(
        &mut self,
        wrap: fn(S) -> T,
        unwrap: fn(&T) -> Option<&S>,
    ) -> &mut Self {
        let type_info = TypeInfo::of::<S>();
        if self.known_types.iter().any(|k| k.type_info == type_info) {
            return self;
        }
        self.known_types.push(KnownTypeDraft {
            type_info,
            adapter: Arc::new(Adapter { wrap, unwrap }),
            resolve: resolve_known_type::<S>,
        });
        self
    }

    /// 应用约定并冻结
    pub(crate) fn freeze(
        mut self,
        registry: &SerializerRegistry,
        profile: &ConventionProfile,
    ) -> BsonResult<ClassMap<T>> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }
        let class_name = self.class_name();

        self.members.retain(|m| profile.includes(&m.settings));
        {
            let mut settings: Vec<&mut MemberSettings> =
                self.members.iter_mut().map(|m| &mut m.settings).collect();
            profile.apply(registry, &mut self.class, &mut settings);
        }

        let class = self.class;
        if let Some(extra) = &class.extra_elements_member {
            let member = self
                .members
                .iter()
                .find(|m| &m.settings.member_name == extra)
                .ok_or_else(|| BsonError::UnknownMember {
                    class: class_name.clone(),
                    member: extra.clone(),
                })?;
            if !member.settings.member_type.is::<Document>() {
                return Err(BsonError::InvalidExtraElementsMember {
                    class: class_name,
                    member: extra.clone(),
                });
            }
        }
        if let Some(id) = &class.id_member {
            if !self.members.iter().any(|m| &m.settings.member_name == id) {
                return Err(BsonError::UnknownMember {
                    class: class_name,
                    member: id.clone(),
                });
            }
        }

        // 稳定排序: order 升序, 未指定的排在最后, 相同时按声明顺序
        self.members.sort_by_key(|m| {
            (
                m.settings.order.map_or((1, 0), |o| (0, o)),
                m.settings.declaration_index,
            )
        });

        let mut members = Vec::with_capacity(self.members.len());
        let mut element_index: IndexMap<String, usize> = IndexMap::new();
        let mut id_member = None;
        let mut extra_elements_member = None;
        for draft in self.members {
            let is_id = class.id_member.as_deref() == Some(draft.settings.member_name.as_str());
            let is_extra =
                class.extra_elements_member.as_deref() == Some(draft.settings.member_name.as_str());
            let element_name = if is_id {
                ID_ELEMENT_NAME.to_string()
            } else {
                draft
                    .settings
                    .element_name
                    .clone()
                    .unwrap_or_else(|| draft.settings.member_name.clone())
            };
            let index = members.len();

            if !is_extra {
                if let Some(&other) = element_index.get(&element_name) {
                    let other: &MemberMap<T> = &members[other];
                    return Err(BsonError::DuplicateElementName {
                        class: class_name,
                        element: element_name,
                        member: draft.settings.member_name.clone(),
                        other: other.member_name().to_string(),
                    });
                }
                element_index.insert(element_name.clone(), index);
            }

            let serializer = match draft.serializer {
                Some(serializer) => {
                    if draft.settings.options.is_some() {
                        return Err(BsonError::Configuration(format!(
                            "member {} of class {} has both a custom serializer and serialization options",
                            draft.settings.member_name, class_name
                        )));
                    }
                    serializer
                }
                None => draft
                    .accessor
                    .create_serializer(registry, draft.settings.options.as_ref())?,
            };
            if serializer.value_type() != draft.settings.member_type {
                return Err(BsonError::MemberTypeMismatch {
                    class: class_name,
                    member: draft.settings.member_name.clone(),
                    requested: serializer.value_type().name.to_string(),
                });
            }

            if is_id {
                id_member = Some(index);
            }
            if is_extra {
                extra_elements_member = Some(index);
            }
            let ignore_if_default = draft.settings.ignore_if_default.unwrap_or(false);
            members.push(MemberMap {
                settings: draft.settings,
                element_name,
                accessor: draft.accessor,
                serializer,
                default_value: draft.default_value,
                ignore_if_default,
                should_serialize: draft.should_serialize,
            });
        }

        let discriminator = class
            .discriminator
            .clone()
            .unwrap_or_else(|| class.type_info.short_name().to_string());
        let discriminator_convention = class
            .discriminator_convention
            .clone()
            .unwrap_or_else(|| profile.discriminator.clone());

        let mut known_types = Vec::with_capacity(self.known_types.len());
        let mut discriminator_table = HashMap::new();
        let mut all_discriminators = vec![discriminator.clone()];
        for draft in self.known_types {
            let (resolved, serializer) = (draft.resolve)(registry)?;
            let index = known_types.len();
            for d in &resolved.all_discriminators {
                if *d == discriminator {
                    continue;
                }
                if !discriminator_table.contains_key(d) {
                    discriminator_table.insert(d.clone(), index);
                    all_discriminators.push(d.clone());
                }
            }
            known_types.push(KnownType {
                type_info: draft.type_info,
                discriminator: resolved.discriminator,
                serializer,
                adapter: draft.adapter,
            });
        }

        debug!(
            "Frozen class map for {}: {} members, discriminator {}, {} known types",
            class.type_info.name,
            members.len(),
            discriminator,
            known_types.len()
        );

        Ok(ClassMap {
            type_info: class.type_info,
            discriminator,
            discriminator_is_required: class.discriminator_is_required,
            is_root: class.is_root,
            discriminator_convention,
            ignore_extra_elements: class.ignore_extra_elements.unwrap_or(false),
            serialize_id_first: profile.serialize_id_first,
            members,
            element_index,
            id_member,
            extra_elements_member,
            known_types,
            discriminator_table,
            all_discriminators,
            creator: self.creator,
        })
    }
}

/// 成员配置句柄, 设置项按值链式调用
pub struct MemberHandle<'a, T, M> {
    builder: &'a mut ClassMapBuilder<T>,
    index: Option<usize>,
    _marker: PhantomData<fn() -> M>,
}

impl<'a, T: ClassMapped, M: MemberValue> MemberHandle<'a, T, M> {
    fn draft(&mut self) -> Option<&mut MemberDraft<T>> {
        let index = self.index?;
        self.builder.members.get_mut(index)
    }

    fn update(mut self, f: impl FnOnce(&mut MemberDraft<T>)) -> Self {
        if let Some(draft) = self.draft() {
            f(draft);
        }
        self
    }

    pub fn element_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.update(|d| d.settings.element_name = Some(name))
    }

    /// 越小越靠前, 未指定的排在最后
    pub fn order(self, order: i32) -> Self {
        self.update(|d| d.settings.order = Some(order))
    }

    /// 缺少对应元素时回填的值; 同时作为忽略默认值的比较基准
    pub fn default_value(self, value: M) -> Self {
        let value: DefaultValue = Arc::new(value);
        self.update(|d| {
            d.default_value = Some(value);
            d.settings.has_default_value = true;
        })
    }

    pub fn ignore_if_default(self, ignore: bool) -> Self {
        self.update(|d| d.settings.ignore_if_default = Some(ignore))
    }

    pub fn required(self, required: bool) -> Self {
        self.update(|d| d.settings.is_required = required)
    }

    pub fn serializer(self, serializer: impl BsonSerializer<M>) -> Self {
        let serializer = erase::<M, _>(serializer);
        self.update(|d| d.serializer = Some(serializer))
    }

    pub fn options(self, options: SerializationOptions) -> Self {
        self.update(|d| d.settings.options = Some(options))
    }

    pub fn id_generator(self, generator: impl IdGenerator + 'static) -> Self {
        let generator: Arc<dyn IdGenerator> = Arc::new(generator);
        self.update(|d| d.settings.id_generator = Some(generator))
    }

    /// 额外的写出条件
    pub fn should_serialize(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let predicate: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(predicate);
        self.update(|d| d.should_serialize = Some(predicate))
    }

    /// 回到构建器继续声明
    pub fn done(self) -> &'a mut ClassMapBuilder<T> {
        self.builder
    }
}

/// 类型擦除后的类映射视图
pub trait ClassMapInfo: Send + Sync {
    fn type_info(&self) -> TypeInfo;

    fn discriminator(&self) -> &str;

    /// 自身及全部可达子类型的鉴别器
    fn all_discriminators(&self) -> Vec<String>;

    fn member_names(&self) -> Vec<String>;

    fn element_name_of(&self, member_name: &str) -> Option<String>;
}

/// 冻结的类映射
pub struct ClassMap<T> {
    pub(crate) type_info: TypeInfo,
    pub(crate) discriminator: String,
    pub(crate) discriminator_is_required: bool,
    pub(crate) is_root: bool,
    pub(crate) discriminator_convention: Arc<dyn DiscriminatorConvention>,
    pub(crate) ignore_extra_elements: bool,
    pub(crate) serialize_id_first: bool,
    /// 已按写出顺序排列
    pub(crate) members: Vec<MemberMap<T>>,
    pub(crate) element_index: IndexMap<String, usize>,
    pub(crate) id_member: Option<usize>,
    pub(crate) extra_elements_member: Option<usize>,
    pub(crate) known_types: Vec<KnownType<T>>,
    /// 鉴别器 -> 处理它的直接已知子类型
    pub(crate) discriminator_table: HashMap<String, usize>,
    pub(crate) all_discriminators: Vec<String>,
    pub(crate) creator: Option<Arc<dyn Fn() -> T + Send + Sync>>,
}

impl<T: ClassMapped> ClassMap<T> {
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub fn discriminator_is_required(&self) -> bool {
        self.discriminator_is_required
    }

    pub fn is_root_class(&self) -> bool {
        self.is_root
    }

    pub fn discriminator_convention(&self) -> &Arc<dyn DiscriminatorConvention> {
        &self.discriminator_convention
    }

    pub fn ignore_extra_elements(&self) -> bool {
        self.ignore_extra_elements
    }

    /// 按写出顺序排列的成员
    pub fn members(&self) -> &[MemberMap<T>] {
        &self.members
    }

    pub fn member(&self, member_name: &str) -> Option<&MemberMap<T>> {
        self.members.iter().find(|m| m.member_name() == member_name)
    }

    pub fn member_by_element(&self, element_name: &str) -> Option<&MemberMap<T>> {
        self.element_index.get(element_name).map(|&i| &self.members[i])
    }

    pub fn id_member(&self) -> Option<&MemberMap<T>> {
        self.id_member.map(|i| &self.members[i])
    }

    pub fn extra_elements_member(&self) -> Option<&MemberMap<T>> {
        self.extra_elements_member.map(|i| &self.members[i])
    }

    pub fn known_types(&self) -> Vec<TypeInfo> {
        self.known_types.iter().map(|k| k.type_info).collect()
    }

    pub fn all_discriminators(&self) -> Vec<String> {
        self.all_discriminators.clone()
    }

    pub(crate) fn create_instance(&self) -> T {
        match &self.creator {
            Some(creator) => creator(),
            None => T::default(),
        }
    }
}

impl<T: ClassMapped> ClassMapInfo for ClassMap<T> {
    fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    fn discriminator(&self) -> &str {
        &self.discriminator
    }

    fn all_discriminators(&self) -> Vec<String> {
        self.all_discriminators.clone()
    }

    fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.member_name().to_string()).collect()
    }

    fn element_name_of(&self, member_name: &str) -> Option<String> {
        self.member(member_name).map(|m| m.element_name().to_string())
    }
}

impl<T> fmt::Debug for ClassMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMap")
            .field("type_info", &self.type_info)
            .field("discriminator", &self.discriminator)
            .field("is_root", &self.is_root)
            .field("ignore_extra_elements", &self.ignore_extra_elements)
            .field("members", &self.members)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_common::ObjectId;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Person {
        id: ObjectId,
        first_name: String,
        age: i32,
        nickname: Option<String>,
        extra: Document,
    }

    impl ClassMapped for Person {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("Id", |p| &p.id, |p, v| p.id = v);
            cm.map_member("FirstName", |p| &p.first_name, |p, v| p.first_name = v);
            cm.map_member("Age", |p| &p.age, |p, v| p.age = v).order(1);
            cm.map_member("Nickname", |p| &p.nickname, |p, v| p.nickname = v)
                .ignore_if_default(true);
            cm.map_member("ExtraElements", |p| &p.extra, |p, v| p.extra = v);
            cm.map_read_only_member("Summary", |p| &p.first_name);
        }
    }

    fn freeze<T: ClassMapped>(registry: &SerializerRegistry, builder: ClassMapBuilder<T>) -> BsonResult<ClassMap<T>> {
        builder.freeze(registry, &ConventionProfile::default())
    }

    #[test]
    fn test_auto_map_with_conventions() {
        let registry = SerializerRegistry::new();
        let mut builder = ClassMapBuilder::<Person>::new();
        builder.auto_map();
        let cm = freeze(&registry, builder).unwrap();
        assert_eq!(cm.id_member().map(|m| m.element_name()), Some("_id"));
        assert!(cm.id_member().and_then(|m| m.id_generator()).is_some());
        assert_eq!(cm.extra_elements_member().map(|m| m.member_name()), Some("ExtraElements"));
        assert!(cm.member("Summary").is_none());
        let order: Vec<_> = cm.members().iter().map(|m| m.member_name()).collect();
        assert_eq!(order, vec!["Age", "Id", "FirstName", "Nickname", "ExtraElements"]);
        assert!(cm.member("Nickname").map(|m| m.ignore_if_default()).unwrap_or(false));
        assert_eq!(cm.discriminator(), "Person");
        assert!(cm.member_by_element("ExtraElements").is_none());
    }

    #[test]
    fn test_explicit_members_bypass_finder() {
        let registry = SerializerRegistry::new();
        let mut builder = ClassMapBuilder::<Person>::new();
        builder.map_read_only_member("Summary", |p| &p.first_name);
        let cm = freeze(&registry, builder).unwrap();
        assert!(cm.member("Summary").map(|m| m.is_read_only()).unwrap_or(false));
    }

    #[test]
    fn test_member_handle_overrides() {
        let registry = SerializerRegistry::new();
        let mut builder = ClassMapBuilder::<Person>::new();
        builder.auto_map();
        builder.member::<i32>("Age").element_name("age").default_value(18).required(true);
        builder.set_discriminator("P").set_ignore_extra_elements(true);
        let cm = freeze(&registry, builder).unwrap();
        let age = cm.member("Age").unwrap();
        assert_eq!(age.element_name(), "age");
        assert_eq!(age.default_value::<i32>(), Some(&18));
        assert!(age.is_required());
        assert_eq!(cm.discriminator(), "P");
        assert!(cm.ignore_extra_elements());
    }

    #[test]
    fn test_configuration_errors() {
        let registry = SerializerRegistry::new();

        let mut builder = ClassMapBuilder::<Person>::new();
        builder.map_member("FirstName", |p| &p.first_name, |p, v| p.first_name = v);
        builder.map_member("Age", |p| &p.age, |p, v| p.age = v).element_name("FirstName");
        assert!(matches!(
            freeze(&registry, builder),
            Err(BsonError::DuplicateElementName { .. })
        ));

        let mut builder = ClassMapBuilder::<Person>::new();
        builder.map_extra_elements_member("FirstName", |p| &p.first_name, |p, v| p.first_name = v);
        assert!(matches!(
            freeze(&registry, builder),
            Err(BsonError::InvalidExtraElementsMember { .. })
        ));

        let mut builder = ClassMapBuilder::<Person>::new();
        builder.map_id_member("Id", |p| &p.id, |p, v| p.id = v);
        builder.map_id_member("Age", |p| &p.age, |p, v| p.age = v);
        assert!(matches!(
            freeze(&registry, builder),
            Err(BsonError::DuplicateIdMember { .. })
        ));

        let mut builder = ClassMapBuilder::<Person>::new();
        builder.auto_map();
        builder.member::<String>("Age").order(3);
        assert!(matches!(
            freeze(&registry, builder),
            Err(BsonError::MemberTypeMismatch { .. })
        ));

        let mut builder = ClassMapBuilder::<Person>::new();
        builder
            .map_member("Age", |p| &p.age, |p, v| p.age = v)
            .options(SerializationOptions::date_time(Default::default()));
        assert!(matches!(
            freeze(&registry, builder),
            Err(BsonError::UnsupportedOptions { .. })
        ));
    }

    #[test]
    fn test_order_ties_keep_declaration_order() {
        let registry = SerializerRegistry::new();
        let mut builder = ClassMapBuilder::<Person>::new();
        builder.map_member("FirstName", |p| &p.first_name, |p, v| p.first_name = v).order(2);
        builder.map_member("Age", |p| &p.age, |p, v| p.age = v).order(2);
        builder.map_member("Nickname", |p| &p.nickname, |p, v| p.nickname = v).order(1);
        let cm = freeze(&registry, builder).unwrap();
        let order: Vec<_> = cm.members().iter().map(|m| m.member_name()).collect();
        assert_eq!(order, vec!["Nickname", "FirstName", "Age"]);
    }
}
