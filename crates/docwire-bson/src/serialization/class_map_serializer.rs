//! 基于类映射的文档序列化器

use super::class_map::{ClassMap, ClassMapped};
use super::context::{DeserializationContext, DiscriminatorRequest, SerializationContext};
use super::discriminator::DiscriminatorConvention;
use super::options::SerializationOptions;
use super::primitives::unsupported_options;
use super::registry::SerializerRegistry;
use super::serializer::{erase, BsonMapped, BsonSerializer, MemberSerializationInfo, SerializerRef};
use crate::document::Document;
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};
use std::sync::Arc;

/// 按冻结的类映射读写 `T`
pub struct ClassMapSerializer<T> {
    class_map: Arc<ClassMap<T>>,
}

impl<T: ClassMapped> ClassMapSerializer<T> {
    pub fn new(class_map: Arc<ClassMap<T>>) -> Self {
        Self { class_map }
    }

    pub fn class_map(&self) -> &Arc<ClassMap<T>> {
        &self.class_map
    }

    fn class_name(&self) -> String {
        self.class_map.type_info.short_name().to_string()
    }

    /// 值持有已知子类型时交给子类型的序列化器
    fn serialize_known_type(
        &self,
        ctx: &mut SerializationContext<'_>,
        value: &T,
        request: &Option<DiscriminatorRequest>,
    ) -> BsonResult<bool> {
        let cm = &self.class_map;
        for known in &cm.known_types {
            let inner = match known.adapter.unwrap(value) {
                Some(inner) => inner,
                None => continue,
            };
            let (mut chain, rooted, convention) = match request {
                Some(req) if !cm.is_root => (req.chain.clone(), req.rooted, req.convention.clone()),
                _ => (
                    vec![cm.discriminator.clone()],
                    cm.is_root,
                    cm.discriminator_convention.clone(),
                ),
            };
            chain.push(known.discriminator.clone());
            ctx.discriminator_request = Some(DiscriminatorRequest {
                convention,
                chain,
                rooted,
            });
            let result = known.serializer.serialize_dyn(ctx, inner);
            ctx.discriminator_request = None;
            result?;
            return Ok(true);
        }
        Ok(false)
    }

    fn write_discriminator(
        &self,
        ctx: &mut SerializationContext<'_>,
        request: Option<DiscriminatorRequest>,
    ) -> BsonResult<()> {
        let cm = &self.class_map;
        let (convention, chain, rooted) = match request {
            Some(req) => (req.convention, req.chain, req.rooted),
            None if cm.discriminator_is_required || cm.is_root => (
                cm.discriminator_convention.clone(),
                vec![cm.discriminator.clone()],
                cm.is_root,
            ),
            None => return Ok(()),
        };
        let name = match convention.element_name() {
            Some(name) => name,
            None => return Ok(()),
        };
        if let Some(value) = convention.discriminator_value(&chain, rooted) {
            ctx.writer().write_element(name, &value)?;
        }
        Ok(())
    }

    fn write_extra_elements(&self, ctx: &mut SerializationContext<'_>, value: &T) -> BsonResult<()> {
        let member = match self.class_map.extra_elements_member() {
            Some(member) => member,
            None => return Ok(()),
        };
        if let Some(extra) = member.get_value(value).downcast_ref::<Document>() {
            for (name, element) in extra.iter() {
                ctx.writer().write_element(name, element)?;
            }
        }
        Ok(())
    }

    /// 前瞻鉴别器, 命中其他已知类型时返回其下标
    fn find_known_type(
        &self,
        ctx: &mut DeserializationContext<'_>,
        convention: &Arc<dyn DiscriminatorConvention>,
    ) -> BsonResult<Option<usize>> {
        let cm = &self.class_map;
        if cm.known_types.is_empty() {
            return Ok(None);
        }
        let bookmark = ctx.reader().get_bookmark();
        let discriminator = convention.read_discriminator(ctx.reader());
        ctx.reader().return_to_bookmark(&bookmark)?;
        let discriminator = match discriminator? {
            Some(d) if d != cm.discriminator => d,
            _ => return Ok(None),
        };
        match cm.discriminator_table.get(&discriminator) {
            Some(&index) => Ok(Some(index)),
            None => Err(BsonError::UnknownDiscriminator {
                class: self.class_name(),
                discriminator,
            }),
        }
    }

    fn deserialize_members(
        &self,
        ctx: &mut DeserializationContext<'_>,
        convention: &Arc<dyn DiscriminatorConvention>,
    ) -> BsonResult<T> {
        let cm = &self.class_map;
        let mut obj = cm.create_instance();
        let mut seen = vec![false; cm.members.len()];
        let mut extra = cm.extra_elements_member.map(|_| Document::new());
        let discriminator_element = convention.element_name();

        ctx.reader().read_start_document()?;
        while ctx.reader().read_bson_type()? != ElementType::EndOfDocument {
            let name = ctx.reader().read_name()?;
            if let Some(&index) = cm.element_index.get(name.as_str()) {
                let member = &cm.members[index];
                member
                    .deserialize_member(ctx, &mut obj)
                    .map_err(|source| BsonError::Member {
                        class: self.class_name(),
                        member: member.member_name().to_string(),
                        source: Box::new(source),
                    })?;
                seen[index] = true;
                continue;
            }
            if discriminator_element == Some(name.as_str()) {
                ctx.reader().skip_value()?;
                continue;
            }
            match extra.as_mut() {
                Some(extra) => {
                    let value = ctx.reader().read_value()?;
                    extra.push_unchecked(name, value);
                }
                None if cm.ignore_extra_elements => ctx.reader().skip_value()?,
                None => {
                    return Err(BsonError::UnexpectedElement {
                        class: self.class_name(),
                        element: name,
                    })
                }
            }
        }
        ctx.reader().read_end_document()?;

        for (index, member) in cm.members.iter().enumerate() {
            if seen[index] || Some(index) == cm.extra_elements_member {
                continue;
            }
            if member.is_required() {
                return Err(BsonError::MissingRequiredElement {
                    class: self.class_name(),
                    element: member.element_name().to_string(),
                });
            }
            if member.has_default_value() {
                member.apply_default(&mut obj)?;
            }
        }
        if let (Some(index), Some(extra)) = (cm.extra_elements_member, extra) {
            cm.members[index].set_value(&mut obj, Box::new(extra))?;
        }
        Ok(obj)
    }
}

impl<T: ClassMapped> BsonSerializer<T> for ClassMapSerializer<T> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &T) -> BsonResult<()> {
        let request = ctx.discriminator_request.take();
        if self.serialize_known_type(ctx, value, &request)? {
            return Ok(());
        }

        let cm = &self.class_map;
        ctx.writer().write_start_document()?;

        let id_first = if cm.serialize_id_first { cm.id_member } else { None };
        if let Some(index) = id_first {
            let id = &cm.members[index];
            if id.should_serialize(value) {
                ctx.writer().write_name(id.element_name())?;
                id.serialize_member(ctx, value)?;
            }
        }

        self.write_discriminator(ctx, request)?;

        for (index, member) in cm.members.iter().enumerate() {
            if Some(index) == id_first || Some(index) == cm.extra_elements_member {
                continue;
            }
            if !member.should_serialize(value) {
                continue;
            }
            ctx.writer().write_name(member.element_name())?;
            member.serialize_member(ctx, value)?;
        }
        self.write_extra_elements(ctx, value)?;

        ctx.writer().write_end_document()
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<T> {
        let actual = ctx.current_bson_type()?;
        if actual != ElementType::Document {
            return Err(BsonError::unexpected_type(self.class_name(), actual));
        }
        let convention = ctx
            .discriminator_convention
            .take()
            .unwrap_or_else(|| self.class_map.discriminator_convention.clone());

        if let Some(index) = self.find_known_type(ctx, &convention)? {
            let known = &self.class_map.known_types[index];
            ctx.discriminator_convention = Some(convention);
            let boxed = known.serializer.deserialize_dyn(ctx);
            ctx.discriminator_convention = None;
            return known
                .adapter
                .wrap(boxed?)
                .ok_or_else(|| BsonError::ValueTypeMismatch {
                    expected: known.type_info.name.to_string(),
                });
        }
        self.deserialize_members(ctx, &convention)
    }

    fn member_serialization_info(
        &self,
        registry: &SerializerRegistry,
        member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        if let Some(member) = self.class_map.member(member_name) {
            return Some(MemberSerializationInfo {
                element_name: member.element_name().to_string(),
                nominal_type: member.member_type(),
                serializer: member.serializer().clone(),
            });
        }
        self.class_map
            .known_types
            .iter()
            .find_map(|known| known.serializer.member_serialization_info(registry, member_name))
    }
}

impl<T: ClassMapped> BsonMapped for T {
    fn create_serializer(
        registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        if let Some(options) = options {
            return Err(unsupported_options::<T>(options));
        }
        let class_map = registry.class_map::<T>()?;
        Ok(erase::<T, _>(ClassMapSerializer::new(class_map)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::class_map::ClassMapBuilder;
    use super::*;
    use crate::doc;
    use crate::value::BsonValue;
    use docwire_common::ObjectId;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    impl ClassMapped for Address {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("City", |a| &a.city, |a, v| a.city = v).element_name("city");
            cm.map_member("Zip", |a| &a.zip, |a, v| a.zip = v)
                .element_name("zip")
                .ignore_if_default(true);
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Customer {
        id: ObjectId,
        name: String,
        level: i32,
        address: Address,
        tags: Vec<String>,
        extra: Document,
    }

    impl ClassMapped for Customer {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("Id", |c| &c.id, |c, v| c.id = v);
            cm.map_member("Name", |c| &c.name, |c, v| c.name = v).required(true);
            cm.map_member("Level", |c| &c.level, |c, v| c.level = v).default_value(1);
            cm.map_member("Address", |c| &c.address, |c, v| c.address = v);
            cm.map_member("Tags", |c| &c.tags, |c, v| c.tags = v);
            cm.map_member("ExtraElements", |c| &c.extra, |c, v| c.extra = v);
        }
    }

    fn customer() -> Customer {
        Customer {
            id: ObjectId::parse("5f1e1b9a8c3d2e4f5a6b7c8d").unwrap(),
            name: "Ada".to_string(),
            level: 3,
            address: Address {
                city: "London".to_string(),
                zip: None,
            },
            tags: vec!["vip".to_string()],
            extra: doc! { "legacy": true },
        }
    }

    #[test]
    fn test_document_shape() {
        let registry = SerializerRegistry::new();
        let doc = registry.to_document(&customer()).unwrap();
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["_id", "Name", "Level", "Address", "Tags", "legacy"]);
        assert_eq!(doc.get_document("Address"), Some(&doc! { "city": "London" }));
        assert_eq!(doc.get_bool("legacy"), Some(true));
    }

    #[test]
    fn test_round_trip_keeps_extra_elements() {
        let registry = SerializerRegistry::new();
        let original = customer();
        let bytes = registry.to_vec(&original).unwrap();
        let back: Customer = registry.from_slice(&bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_missing_members() {
        let registry = SerializerRegistry::new();
        let back: Customer = registry.from_document(&doc! { "Name": "Bob" }).unwrap();
        assert_eq!(back.level, 1);
        assert!(back.tags.is_empty());

        let err = registry.from_document::<Customer>(&doc! { "Level": 2 }).unwrap_err();
        assert!(matches!(err, BsonError::MissingRequiredElement { ref element, .. } if element == "Name"));
    }

    #[test]
    fn test_unexpected_element() {
        let registry = SerializerRegistry::new();
        let err = registry
            .from_document::<Address>(&doc! { "city": "Paris", "country": "FR" })
            .unwrap_err();
        assert!(matches!(err, BsonError::UnexpectedElement { ref element, .. } if element == "country"));

        let registry = SerializerRegistry::new();
        registry
            .register_class_map::<Address>(|cm| {
                cm.auto_map();
                cm.set_ignore_extra_elements(true);
            })
            .unwrap();
        let back: Address = registry
            .from_document(&doc! { "city": "Paris", "country": "FR" })
            .unwrap();
        assert_eq!(back.city, "Paris");
    }

    #[test]
    fn test_member_error_is_wrapped() {
        let registry = SerializerRegistry::new();
        let err = registry
            .from_document::<Customer>(&doc! { "Name": "x", "Level": true })
            .unwrap_err();
        match &err {
            BsonError::Member { member, .. } => assert_eq!(member, "Level"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root_cause(), BsonError::UnexpectedBsonType { .. }));
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Dog {
        name: String,
        bark: i32,
    }

    impl ClassMapped for Dog {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("name", |d| &d.name, |d, v| d.name = v);
            cm.map_member("bark", |d| &d.bark, |d, v| d.bark = v);
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Cat {
        name: String,
        lives: i32,
    }

    impl ClassMapped for Cat {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("name", |c| &c.name, |c, v| c.name = v);
            cm.map_member("lives", |c| &c.lives, |c, v| c.lives = v);
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Animal {
        Dog(Dog),
        Cat(Cat),
        Unknown(Document),
    }

    impl Default for Animal {
        fn default() -> Self {
            Animal::Unknown(Document::new())
        }
    }

    impl ClassMapped for Animal {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.set_is_root_class(true);
            cm.add_known_type(Animal::Dog, |a| match a {
                Animal::Dog(d) => Some(d),
                _ => None,
            });
            cm.add_known_type(Animal::Cat, |a| match a {
                Animal::Cat(c) => Some(c),
                _ => None,
            });
        }
    }

    #[test]
    fn test_polymorphic_round_trip() {
        let registry = SerializerRegistry::new();
        let dog = Animal::Dog(Dog {
            name: "Rex".to_string(),
            bark: 7,
        });
        let doc = registry.to_document(&dog).unwrap();
        assert_eq!(doc.get("_t"), Some(&crate::bson!(["Animal", "Dog"])));
        let back: Animal = registry.from_document(&doc).unwrap();
        assert_eq!(back, dog);

        let cat: Animal = registry
            .from_document(&doc! { "name": "Tom", "_t": ["Animal", "Cat"], "lives": 9 })
            .unwrap();
        assert_eq!(
            cat,
            Animal::Cat(Cat {
                name: "Tom".to_string(),
                lives: 9
            })
        );
    }

    #[test]
    fn test_unknown_discriminator() {
        let registry = SerializerRegistry::new();
        let err = registry
            .from_document::<Animal>(&doc! { "_t": "Horse" })
            .unwrap_err();
        assert!(matches!(err, BsonError::UnknownDiscriminator { .. }));
        assert_eq!(
            registry.class_map::<Animal>().unwrap().all_discriminators(),
            vec!["Animal".to_string(), "Dog".to_string(), "Cat".to_string()]
        );
    }

    #[test]
    fn test_direct_subclass_writes_no_discriminator() {
        let registry = SerializerRegistry::new();
        let doc = registry
            .to_document(&Dog {
                name: "Rex".to_string(),
                bark: 1,
            })
            .unwrap();
        assert!(doc.get("_t").is_none());
        assert!(matches!(doc.get("bark"), Some(BsonValue::Int32(1))));
    }
}
