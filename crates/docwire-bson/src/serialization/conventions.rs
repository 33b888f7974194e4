//! 约定管线
//!
//! 自动推导类映射时按固定顺序应用约定:
//! 成员查找 -> id 识别 -> 元素命名 -> 额外元素成员 -> 忽略未知元素 ->
//! 忽略默认值 -> id 生成器 -> 鉴别器。显式配置总是优先, 约定只填补空缺。

use super::discriminator::{DiscriminatorConvention, HierarchicalDiscriminatorConvention};
use super::id_generators::{IdGenerator, StringObjectIdGenerator};
use super::member_map::MemberSettings;
use super::options::SerializationOptions;
use super::registry::SerializerRegistry;
use super::serializer::TypeInfo;
use crate::document::Document;
use crate::spec::ElementType;
use docwire_common::{ElementNaming, SerializationConfig};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// 类级别配置, 约定管线与构建器共享
#[derive(Clone)]
pub struct ClassSettings {
    pub type_info: TypeInfo,
    pub id_member: Option<String>,
    pub extra_elements_member: Option<String>,
    pub ignore_extra_elements: Option<bool>,
    pub discriminator: Option<String>,
    pub discriminator_is_required: bool,
    pub is_root: bool,
    pub discriminator_convention: Option<Arc<dyn DiscriminatorConvention>>,
}

impl ClassSettings {
    pub(crate) fn new(type_info: TypeInfo) -> Self {
        Self {
            type_info,
            id_member: None,
            extra_elements_member: None,
            ignore_extra_elements: None,
            discriminator: None,
            discriminator_is_required: false,
            is_root: false,
            discriminator_convention: None,
        }
    }
}

impl fmt::Debug for ClassSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSettings")
            .field("type_info", &self.type_info)
            .field("id_member", &self.id_member)
            .field("extra_elements_member", &self.extra_elements_member)
            .field("ignore_extra_elements", &self.ignore_extra_elements)
            .field("discriminator", &self.discriminator)
            .field("is_root", &self.is_root)
            .finish()
    }
}

/// 决定 `map_class` 中声明的成员是否保留
pub trait MemberFinderConvention: Send + Sync {
    fn include(&self, member: &MemberSettings) -> bool;
}

/// 只保留可读写成员
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadWriteMemberFinder;

impl MemberFinderConvention for ReadWriteMemberFinder {
    fn include(&self, member: &MemberSettings) -> bool {
        !member.read_only
    }
}

/// 保留全部成员, 包括只读成员
#[derive(Debug, Default, Clone, Copy)]
pub struct AllMembersFinder;

impl MemberFinderConvention for AllMembersFinder {
    fn include(&self, _member: &MemberSettings) -> bool {
        true
    }
}

/// 识别 id 成员
pub trait IdMemberConvention: Send + Sync {
    fn find_id_member(&self, members: &[&mut MemberSettings]) -> Option<String>;
}

/// 按名称列表识别 id 成员, 靠前的名称优先
#[derive(Debug, Clone)]
pub struct NamedIdMemberConvention {
    names: Vec<String>,
}

impl NamedIdMemberConvention {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for NamedIdMemberConvention {
    fn default() -> Self {
        Self::new(["Id", "id", "_id"])
    }
}

impl IdMemberConvention for NamedIdMemberConvention {
    fn find_id_member(&self, members: &[&mut MemberSettings]) -> Option<String> {
        self.names
            .iter()
            .find(|name| members.iter().any(|m| m.member_name == **name))
            .cloned()
    }
}

/// 由成员名推导元素名
pub trait ElementNameConvention: Send + Sync {
    fn element_name(&self, member_name: &str) -> String;
}

/// 元素名与成员名相同
#[derive(Debug, Default, Clone, Copy)]
pub struct MemberNameElementNameConvention;

impl ElementNameConvention for MemberNameElementNameConvention {
    fn element_name(&self, member_name: &str) -> String {
        member_name.to_string()
    }
}

/// camelCase 元素名: `FirstName` -> `firstName`, `first_name` -> `firstName`
#[derive(Debug, Default, Clone, Copy)]
pub struct CamelCaseElementNameConvention;

impl ElementNameConvention for CamelCaseElementNameConvention {
    fn element_name(&self, member_name: &str) -> String {
        let mut out = String::with_capacity(member_name.len());
        let mut upper_next = false;
        for (i, c) in member_name.chars().enumerate() {
            if c == '_' && i > 0 {
                upper_next = true;
                continue;
            }
            if i == 0 {
                out.extend(c.to_lowercase());
            } else if upper_next {
                out.extend(c.to_uppercase());
                upper_next = false;
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// 识别接收未知元素的成员
pub trait ExtraElementsConvention: Send + Sync {
    fn find_extra_elements_member(&self, members: &[&mut MemberSettings]) -> Option<String>;
}

/// 按名称识别, 成员必须是 `Document` 类型
#[derive(Debug, Clone)]
pub struct NamedExtraElementsMemberConvention {
    names: Vec<String>,
}

impl NamedExtraElementsMemberConvention {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for NamedExtraElementsMemberConvention {
    fn default() -> Self {
        Self::new(["ExtraElements", "extra_elements"])
    }
}

impl ExtraElementsConvention for NamedExtraElementsMemberConvention {
    fn find_extra_elements_member(&self, members: &[&mut MemberSettings]) -> Option<String> {
        self.names
            .iter()
            .find(|name| {
                members
                    .iter()
                    .any(|m| m.member_name == **name && m.member_type.is::<Document>())
            })
            .cloned()
    }
}

/// 类没有显式设置时的忽略未知元素取值
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreExtraElementsConvention {
    pub ignore: bool,
}

/// 成员没有显式设置时的忽略默认值取值
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreIfDefaultConvention {
    pub ignore: bool,
}

/// 为 id 成员查找生成器
///
/// 字符串 id 按 ObjectId 表示保存时使用 `StringObjectIdGenerator`,
/// 其余按成员类型在注册表中查找。
#[derive(Debug, Default, Clone, Copy)]
pub struct LookupIdGeneratorConvention;

impl LookupIdGeneratorConvention {
    pub fn id_generator(
        &self,
        registry: &SerializerRegistry,
        member: &MemberSettings,
    ) -> Option<Arc<dyn IdGenerator>> {
        if member.member_type.is::<String>() {
            if let Some(SerializationOptions::Representation(rep)) = &member.options {
                if rep.representation == ElementType::ObjectId {
                    return Some(Arc::new(StringObjectIdGenerator));
                }
            }
        }
        registry.lookup_id_generator(member.member_type)
    }
}

/// 一组约定
#[derive(Clone)]
pub struct ConventionProfile {
    pub member_finder: Arc<dyn MemberFinderConvention>,
    pub id_member: Arc<dyn IdMemberConvention>,
    pub element_name: Arc<dyn ElementNameConvention>,
    pub extra_elements: Arc<dyn ExtraElementsConvention>,
    pub ignore_extra_elements: IgnoreExtraElementsConvention,
    pub ignore_if_default: IgnoreIfDefaultConvention,
    pub id_generator: LookupIdGeneratorConvention,
    pub discriminator: Arc<dyn DiscriminatorConvention>,
    pub serialize_id_first: bool,
}

impl Default for ConventionProfile {
    fn default() -> Self {
        Self::from_config(&SerializationConfig::default())
    }
}

impl ConventionProfile {
    pub fn from_config(config: &SerializationConfig) -> Self {
        let element_name: Arc<dyn ElementNameConvention> = match config.element_naming {
            ElementNaming::MemberName => Arc::new(MemberNameElementNameConvention),
            ElementNaming::CamelCase => Arc::new(CamelCaseElementNameConvention),
        };
        Self {
            member_finder: Arc::new(ReadWriteMemberFinder),
            id_member: Arc::new(NamedIdMemberConvention::default()),
            element_name,
            extra_elements: Arc::new(NamedExtraElementsMemberConvention::default()),
            ignore_extra_elements: IgnoreExtraElementsConvention {
                ignore: config.ignore_extra_elements,
            },
            ignore_if_default: IgnoreIfDefaultConvention::default(),
            id_generator: LookupIdGeneratorConvention,
            discriminator: Arc::new(HierarchicalDiscriminatorConvention::new(
                config.discriminator_element_name.clone(),
            )),
            serialize_id_first: config.serialize_id_first,
        }
    }

    pub fn with_member_finder(mut self, convention: impl MemberFinderConvention + 'static) -> Self {
        self.member_finder = Arc::new(convention);
        self
    }

    pub fn with_id_member(mut self, convention: impl IdMemberConvention + 'static) -> Self {
        self.id_member = Arc::new(convention);
        self
    }

    pub fn with_element_name(mut self, convention: impl ElementNameConvention + 'static) -> Self {
        self.element_name = Arc::new(convention);
        self
    }

    pub fn with_extra_elements(mut self, convention: impl ExtraElementsConvention + 'static) -> Self {
        self.extra_elements = Arc::new(convention);
        self
    }

    pub fn with_ignore_extra_elements(mut self, ignore: bool) -> Self {
        self.ignore_extra_elements = IgnoreExtraElementsConvention { ignore };
        self
    }

    pub fn with_ignore_if_default(mut self, ignore: bool) -> Self {
        self.ignore_if_default = IgnoreIfDefaultConvention { ignore };
        self
    }

    pub fn with_discriminator(mut self, convention: impl DiscriminatorConvention + 'static) -> Self {
        self.discriminator = Arc::new(convention);
        self
    }

    pub fn with_serialize_id_first(mut self, first: bool) -> Self {
        self.serialize_id_first = first;
        self
    }

    /// 成员查找约定: 显式声明的成员总是保留
    pub(crate) fn includes(&self, member: &MemberSettings) -> bool {
        !member.auto_mapped || self.member_finder.include(member)
    }

    /// # Brief
    /// 按顺序对草稿应用其余约定
    ///
    /// # Arguments
    /// * `registry` - 查找 id 生成器
    /// * `class` - 类级别配置
    /// * `members` - 已通过成员查找约定的成员
    pub(crate) fn apply(
        &self,
        registry: &SerializerRegistry,
        class: &mut ClassSettings,
        members: &mut [&mut MemberSettings],
    ) {
        if class.id_member.is_none() {
            class.id_member = self.id_member.find_id_member(members);
            if let Some(id) = &class.id_member {
                trace!("{}: id member {} found by convention", class.type_info, id);
            }
        }

        for member in members.iter_mut() {
            if member.element_name.is_none() {
                let name = self.element_name.element_name(&member.member_name);
                trace!("{}: element name of {} set to {}", class.type_info, member.member_name, name);
                member.element_name = Some(name);
            }
        }

        if class.extra_elements_member.is_none() {
            class.extra_elements_member = self.extra_elements.find_extra_elements_member(members);
        }

        if class.ignore_extra_elements.is_none() {
            class.ignore_extra_elements = Some(self.ignore_extra_elements.ignore);
        }

        for member in members.iter_mut() {
            if member.ignore_if_default.is_none() {
                member.ignore_if_default = Some(self.ignore_if_default.ignore);
            }
        }

        if let Some(id) = class.id_member.clone() {
            if let Some(member) = members.iter_mut().find(|m| m.member_name == id) {
                if member.id_generator.is_none() {
                    member.id_generator = self.id_generator.id_generator(registry, member);
                    if member.id_generator.is_some() {
                        trace!("{}: id generator for {} found by convention", class.type_info, id);
                    }
                }
            }
        }

        if class.discriminator.is_none() {
            class.discriminator = Some(class.type_info.short_name().to_string());
        }
        if class.discriminator_convention.is_none() {
            class.discriminator_convention = Some(self.discriminator.clone());
        }
    }
}

impl fmt::Debug for ConventionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConventionProfile")
            .field("ignore_extra_elements", &self.ignore_extra_elements)
            .field("ignore_if_default", &self.ignore_if_default)
            .field("discriminator", &self.discriminator)
            .field("serialize_id_first", &self.serialize_id_first)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(name: &str, ty: TypeInfo, read_only: bool) -> MemberSettings {
        let mut s = MemberSettings::new(name.to_string(), ty, read_only);
        s.auto_mapped = true;
        s
    }

    #[test]
    fn test_camel_case() {
        let c = CamelCaseElementNameConvention;
        assert_eq!(c.element_name("FirstName"), "firstName");
        assert_eq!(c.element_name("first_name"), "firstName");
        assert_eq!(c.element_name("x"), "x");
        assert_eq!(c.element_name("_private"), "_private");
        assert_eq!(MemberNameElementNameConvention.element_name("First"), "First");
    }

    #[test]
    fn test_member_finders() {
        let ro = settings("Total", TypeInfo::of::<i32>(), true);
        let rw = settings("Count", TypeInfo::of::<i32>(), false);
        assert!(!ReadWriteMemberFinder.include(&ro));
        assert!(ReadWriteMemberFinder.include(&rw));
        assert!(AllMembersFinder.include(&ro));
        let mut explicit = ro.clone();
        explicit.auto_mapped = false;
        assert!(ConventionProfile::default().includes(&explicit));
    }

    #[test]
    fn test_pipeline_fills_gaps_only() {
        let registry = SerializerRegistry::new();
        let profile = ConventionProfile::default()
            .with_element_name(CamelCaseElementNameConvention)
            .with_ignore_if_default(true);
        let mut id = settings("Id", TypeInfo::of::<docwire_common::ObjectId>(), false);
        let mut name = settings("Name", TypeInfo::of::<String>(), false);
        name.element_name = Some("n".to_string());
        let mut extra = settings("ExtraElements", TypeInfo::of::<Document>(), false);
        extra.ignore_if_default = Some(false);
        let mut class = ClassSettings::new(TypeInfo::of::<String>());
        {
            let mut members = vec![&mut id, &mut name, &mut extra];
            profile.apply(&registry, &mut class, &mut members);
        }
        assert_eq!(class.id_member.as_deref(), Some("Id"));
        assert_eq!(class.extra_elements_member.as_deref(), Some("ExtraElements"));
        assert_eq!(class.ignore_extra_elements, Some(false));
        assert_eq!(class.discriminator.as_deref(), Some("String"));
        assert_eq!(id.element_name.as_deref(), Some("id"));
        assert!(id.id_generator.is_some());
        assert_eq!(name.element_name.as_deref(), Some("n"));
        assert_eq!(name.ignore_if_default, Some(true));
        assert_eq!(extra.ignore_if_default, Some(false));
    }

    #[test]
    fn test_string_object_id_generator() {
        let registry = SerializerRegistry::new();
        let mut id = settings("Id", TypeInfo::of::<String>(), false);
        let profile = ConventionProfile::default();
        assert!(profile.id_generator.id_generator(&registry, &id).is_none());
        id.options = Some(SerializationOptions::representation(ElementType::ObjectId));
        assert!(profile.id_generator.id_generator(&registry, &id).is_some());
    }

    #[test]
    fn test_extra_elements_requires_document() {
        let mut wrong = settings("ExtraElements", TypeInfo::of::<String>(), false);
        let members = vec![&mut wrong];
        assert!(NamedExtraElementsMemberConvention::default()
            .find_extra_elements_member(&members)
            .is_none());
    }
}
