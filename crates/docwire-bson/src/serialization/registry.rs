//! 序列化器注册表
//!
//! 注册表按类型缓存序列化器与冻结的类映射, 是整个序列化框架的入口。
//! 查找是并发安全的; 类映射在第一次使用时构建, 构建过程持有可重入锁,
//! 同一线程内的嵌套构建可以继续, 已知类型之间的环会被检测出来。

use super::class_map::{ClassMap, ClassMapBuilder, ClassMapped};
use super::context::{DeserializationContext, SerializationContext};
use super::conventions::ConventionProfile;
use super::id_generators::{BsonObjectIdGenerator, GuidGenerator, IdGenerator, ObjectIdGenerator};
use super::options::SerializationOptions;
use super::serializer::{
    deserialize_value, erase, serialize_value, BsonMapped, BsonSerializer, MemberSerializationInfo,
    SerializerRef, TypeInfo,
};
use crate::document::Document;
use crate::io::{BinaryReader, BinaryWriter, BsonReader, BsonWriter, JsonWriter, JsonWriterSettings};
use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use dashmap::DashMap;
use docwire_common::{ObjectId, SerializationConfig};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

type ConventionFilter = Arc<dyn Fn(TypeInfo) -> bool + Send + Sync>;

/// 序列化器注册表
pub struct SerializerRegistry {
    config: SerializationConfig,
    serializers: DashMap<TypeId, SerializerRef>,
    /// 值为 `Arc<ClassMap<T>>`
    class_maps: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// 已注册但尚未冻结的构建器, 值为 `ClassMapBuilder<T>`
    pending: Mutex<HashMap<TypeId, Box<dyn Any + Send>>>,
    /// 构建失败的类映射, 之后的查找返回同一错误
    failed: DashMap<TypeId, BsonError>,
    id_generators: DashMap<TypeId, Arc<dyn IdGenerator>>,
    conventions: RwLock<Vec<(Arc<ConventionProfile>, ConventionFilter)>>,
    default_conventions: Arc<ConventionProfile>,
    /// 当前线程正在构建的类映射
    building: ReentrantMutex<RefCell<Vec<TypeInfo>>>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::with_config(&SerializationConfig::default())
    }

    /// 按配置创建注册表, 默认约定由配置决定
    pub fn with_config(config: &SerializationConfig) -> Self {
        let id_generators: DashMap<TypeId, Arc<dyn IdGenerator>> = DashMap::new();
        id_generators.insert(TypeId::of::<ObjectId>(), Arc::new(ObjectIdGenerator));
        id_generators.insert(TypeId::of::<Uuid>(), Arc::new(GuidGenerator));
        id_generators.insert(TypeId::of::<BsonValue>(), Arc::new(BsonObjectIdGenerator));
        Self {
            config: config.clone(),
            serializers: DashMap::new(),
            class_maps: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            failed: DashMap::new(),
            id_generators,
            conventions: RwLock::new(Vec::new()),
            default_conventions: Arc::new(ConventionProfile::from_config(config)),
            building: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &SerializationConfig {
        &self.config
    }

    /// 查找 `T` 的默认序列化器, 不存在时创建并缓存
    pub fn lookup<T: BsonMapped>(&self) -> BsonResult<SerializerRef> {
        let key = TypeId::of::<T>();
        if let Some(serializer) = self.serializers.get(&key) {
            return Ok(serializer.value().clone());
        }
        // 创建过程可能递归查找其他类型, 不能持有分片锁
        let serializer = T::create_serializer(self, None)?;
        Ok(self.serializers.entry(key).or_insert(serializer).value().clone())
    }

    /// # Brief
    /// 按选项查找序列化器
    ///
    /// # Arguments
    /// * `options` - 为 None 时等同于 `lookup`; 带选项的序列化器不缓存
    pub fn lookup_with_options<T: BsonMapped>(
        &self,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        match options {
            None => self.lookup::<T>(),
            Some(options) => T::create_serializer(self, Some(options)),
        }
    }

    /// 为 `T` 注册自定义序列化器, 每个类型只能注册一次
    pub fn register_serializer<T: 'static>(&self, serializer: impl BsonSerializer<T>) -> BsonResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.serializers.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(BsonError::SerializerAlreadyRegistered(
                std::any::type_name::<T>().to_string(),
            )),
            Entry::Vacant(entry) => {
                entry.insert(erase::<T, _>(serializer));
                debug!("Registered serializer for {}", std::any::type_name::<T>());
                Ok(())
            }
        }
    }

    /// # Brief
    /// 注册类映射
    ///
    /// 构建器在第一次使用时才冻结, 因此约定可以在类映射之后注册。
    ///
    /// # Arguments
    /// * `configure` - 配置构建器; 需要自动映射时在其中调用 `auto_map`
    pub fn register_class_map<T: ClassMapped>(
        &self,
        configure: impl FnOnce(&mut ClassMapBuilder<T>),
    ) -> BsonResult<()> {
        let key = TypeId::of::<T>();
        let name = std::any::type_name::<T>();
        if self.class_maps.contains_key(&key) || self.failed.contains_key(&key) {
            return Err(BsonError::ClassMapFrozen(name.to_string()));
        }
        let mut builder = ClassMapBuilder::<T>::new();
        configure(&mut builder);
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return Err(BsonError::ClassMapAlreadyRegistered(name.to_string()));
        }
        pending.insert(key, Box::new(builder));
        debug!("Registered class map for {}", name);
        Ok(())
    }

    /// 类映射是否已注册或已构建
    pub fn is_class_map_registered<T: 'static>(&self) -> bool {
        let key = TypeId::of::<T>();
        self.class_maps.contains_key(&key)
            || self.failed.contains_key(&key)
            || self.pending.lock().contains_key(&key)
    }

    /// # Brief
    /// 取得 `T` 冻结后的类映射
    ///
    /// # Returns
    /// 未注册的类型通过 `ClassMapped::map_class` 自动映射
    pub fn class_map<T: ClassMapped>(&self) -> BsonResult<Arc<ClassMap<T>>> {
        let key = TypeId::of::<T>();
        if let Some(class_map) = self.cached_class_map::<T>()? {
            return Ok(class_map);
        }

        let guard = self.building.lock();
        // 其他线程可能已经完成构建
        if let Some(class_map) = self.cached_class_map::<T>()? {
            return Ok(class_map);
        }
        let type_info = TypeInfo::of::<T>();
        if guard.borrow().contains(&type_info) {
            return Err(BsonError::CircularClassMap(type_info.name.to_string()));
        }
        guard.borrow_mut().push(type_info);

        let builder = self
            .pending
            .lock()
            .remove(&key)
            .and_then(|b| b.downcast::<ClassMapBuilder<T>>().ok())
            .map(|b| *b);
        let builder = builder.unwrap_or_else(|| {
            let mut builder = ClassMapBuilder::<T>::new();
            builder.auto_map();
            builder
        });
        let profile = self.conventions_for(type_info);
        let result = builder.freeze(self, &profile);
        guard.borrow_mut().retain(|t| *t != type_info);

        let class_map = match result {
            Ok(class_map) => Arc::new(class_map),
            Err(err) => {
                warn!("Failed to build class map for {}: {}", type_info.name, err);
                self.failed.insert(key, err.clone());
                return Err(err);
            }
        };
        let stored: Arc<dyn Any + Send + Sync> = class_map.clone();
        self.class_maps.insert(key, stored);
        Ok(class_map)
    }

    fn cached_class_map<T: ClassMapped>(&self) -> BsonResult<Option<Arc<ClassMap<T>>>> {
        let key = TypeId::of::<T>();
        if let Some(err) = self.failed.get(&key) {
            return Err(err.value().clone());
        }
        Ok(self
            .class_maps
            .get(&key)
            .and_then(|stored| stored.value().clone().downcast::<ClassMap<T>>().ok()))
    }

    /// # Brief
    /// 注册一组约定
    ///
    /// # Arguments
    /// * `profile` - 约定集合
    /// * `filter` - 决定约定作用于哪些类型; 后注册的优先
    pub fn register_conventions(
        &self,
        profile: ConventionProfile,
        filter: impl Fn(TypeInfo) -> bool + Send + Sync + 'static,
    ) {
        self.conventions
            .write()
            .push((Arc::new(profile), Arc::new(filter)));
    }

    /// 作用于指定类型的约定
    pub fn conventions_for(&self, type_info: TypeInfo) -> Arc<ConventionProfile> {
        self.conventions
            .read()
            .iter()
            .rev()
            .find(|(_, filter)| filter(type_info))
            .map(|(profile, _)| profile.clone())
            .unwrap_or_else(|| self.default_conventions.clone())
    }

    /// 为 id 类型 `T` 注册生成器, 覆盖已有的
    pub fn register_id_generator<T: 'static>(&self, generator: impl IdGenerator + 'static) {
        self.id_generators.insert(TypeId::of::<T>(), Arc::new(generator));
    }

    pub fn lookup_id_generator(&self, id_type: TypeInfo) -> Option<Arc<dyn IdGenerator>> {
        self.id_generators.get(&id_type.id).map(|g| g.value().clone())
    }

    /// # Brief
    /// 插入前为文档补全 id
    ///
    /// # Arguments
    /// * `document` - 待插入的对象
    /// * `container` - 目标集合名, 传给生成器
    ///
    /// # Returns
    /// 生成了新 id 时返回 true
    pub fn ensure_document_id<T: ClassMapped>(
        &self,
        document: &mut T,
        container: Option<&str>,
    ) -> BsonResult<bool> {
        let class_map = self.class_map::<T>()?;
        let id = match class_map.id_member() {
            Some(id) => id,
            None => return Ok(false),
        };
        let generator = match id.id_generator() {
            Some(generator) => generator,
            None => return Ok(false),
        };
        if !generator.is_empty(id.get_value(document)) {
            return Ok(false);
        }
        let value = generator.generate_id(container, &*document)?;
        id.set_value(document, value)?;
        Ok(true)
    }

    /// 成员到元素的映射信息
    pub fn try_get_member_serialization_info<T: BsonMapped>(
        &self,
        member_name: &str,
    ) -> Option<MemberSerializationInfo> {
        self.lookup::<T>()
            .ok()?
            .member_serialization_info(self, member_name)
    }

    /// # Brief
    /// 把点分成员路径转换为元素路径
    ///
    /// 数字段 (数组下标) 与 `$` 原样保留, 并继续沿元素类型解析。
    ///
    /// # Arguments
    /// * `path` - 如 `"Orders.0.Total"`
    pub fn resolve_element_path<T: BsonMapped>(&self, path: &str) -> BsonResult<String> {
        let mut serializer = self.lookup::<T>()?;
        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment == "$" || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())) {
                segments.push(segment.to_string());
                continue;
            }
            let info = serializer
                .member_serialization_info(self, segment)
                .ok_or_else(|| BsonError::UnknownMember {
                    class: serializer.value_type().short_name().to_string(),
                    member: segment.to_string(),
                })?;
            segments.push(info.element_name);
            serializer = info.serializer;
        }
        Ok(segments.join("."))
    }

    /// 把值写入任意写入器
    pub fn serialize<T: BsonMapped>(&self, writer: &mut dyn BsonWriter, value: &T) -> BsonResult<()> {
        let serializer = self.lookup::<T>()?;
        let mut ctx = SerializationContext::new(writer, self);
        serialize_value(&*serializer, &mut ctx, value)
    }

    /// 从任意读取器读出值
    pub fn deserialize<T: BsonMapped>(&self, reader: &mut dyn BsonReader) -> BsonResult<T> {
        let serializer = self.lookup::<T>()?;
        let mut ctx = DeserializationContext::new(reader, self);
        deserialize_value(&*serializer, &mut ctx)
    }

    pub fn to_vec<T: BsonMapped>(&self, value: &T) -> BsonResult<Vec<u8>> {
        let mut writer = BinaryWriter::new();
        self.serialize(&mut writer, value)?;
        Ok(writer.into_vec())
    }

    pub fn from_slice<T: BsonMapped>(&self, bytes: &[u8]) -> BsonResult<T> {
        let mut reader = BinaryReader::new(bytes);
        self.deserialize(&mut reader)
    }

    pub fn to_document<T: BsonMapped>(&self, value: &T) -> BsonResult<Document> {
        Document::from_slice(&self.to_vec(value)?)
    }

    pub fn from_document<T: BsonMapped>(&self, doc: &Document) -> BsonResult<T> {
        self.from_slice(&doc.to_vec()?)
    }

    /// 按默认 JSON 设置输出
    pub fn to_json<T: BsonMapped>(&self, value: &T) -> BsonResult<String> {
        self.to_json_with(value, &JsonWriterSettings::default())
    }

    pub fn to_json_with<T: BsonMapped>(&self, value: &T, settings: &JsonWriterSettings) -> BsonResult<String> {
        let mut writer = JsonWriter::new(settings.clone());
        self.serialize(&mut writer, value)?;
        Ok(writer.into_string())
    }

    /// 解析 JSON 文本 (扩展 JSON 或 shell 语法) 后按二进制路径读取
    pub fn from_json<T: BsonMapped>(&self, json: &str) -> BsonResult<T> {
        self.from_document(&Document::from_json(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::serialization::conventions::CamelCaseElementNameConvention;
    use crate::serialization::id_generators::StringObjectIdGenerator;
    use docwire_common::JsonOutputMode;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Line {
        sku: String,
        quantity: i32,
    }

    impl ClassMapped for Line {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("Sku", |l| &l.sku, |l, v| l.sku = v);
            cm.map_member("Quantity", |l| &l.quantity, |l, v| l.quantity = v);
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Order {
        id: ObjectId,
        lines: Vec<Line>,
    }

    impl ClassMapped for Order {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("Id", |o| &o.id, |o, v| o.id = v);
            cm.map_member("Lines", |o| &o.lines, |o, v| o.lines = v);
        }
    }

    #[test]
    fn test_lookup_is_cached() {
        let registry = SerializerRegistry::new();
        let a = registry.lookup::<Order>().unwrap();
        let b = registry.lookup::<Order>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.is_class_map_registered::<Order>());
    }

    #[test]
    fn test_register_class_map_rules() {
        let registry = SerializerRegistry::new();
        registry.register_class_map::<Line>(|cm| {
            cm.auto_map();
        }).unwrap();
        assert!(matches!(
            registry.register_class_map::<Line>(|cm| {
                cm.auto_map();
            }),
            Err(BsonError::ClassMapAlreadyRegistered(_))
        ));
        registry.class_map::<Line>().unwrap();
        assert!(matches!(
            registry.register_class_map::<Line>(|_| {}),
            Err(BsonError::ClassMapFrozen(_))
        ));
    }

    #[test]
    fn test_failed_class_map_build_is_not_replaced() {
        let registry = SerializerRegistry::new();
        registry
            .register_class_map::<Line>(|cm| {
                cm.auto_map();
                cm.set_ignore_extra_elements(true);
                cm.member::<String>("Nope").element_name("n");
            })
            .unwrap();

        for _ in 0..3 {
            match registry.class_map::<Line>() {
                Err(BsonError::UnknownMember { member, .. }) => assert_eq!(member, "Nope"),
                other => panic!("unexpected result {:?}", other.map(|_| ())),
            }
        }
        assert!(matches!(
            registry.lookup::<Line>(),
            Err(BsonError::UnknownMember { .. })
        ));
        assert!(registry.to_vec(&Line::default()).is_err());
        assert!(registry.is_class_map_registered::<Line>());
        assert!(matches!(
            registry.register_class_map::<Line>(|cm| {
                cm.auto_map();
            }),
            Err(BsonError::ClassMapFrozen(_))
        ));
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let registry = SerializerRegistry::new();
        let (serializers, class_maps): (Vec<_>, Vec<_>) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let serializer = registry.lookup::<Order>().unwrap();
                        let class_map = registry.class_map::<Order>().unwrap();
                        (serializer, class_map)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).unzip()
        });
        assert!(serializers.iter().all(|s| Arc::ptr_eq(s, &serializers[0])));
        assert!(class_maps.iter().all(|c| Arc::ptr_eq(c, &class_maps[0])));
        assert!(class_maps.iter().all(|c| Arc::ptr_eq(c, &registry.class_map::<Order>().unwrap())));
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Numbers {
        int_array: Option<Vec<i32>>,
    }

    impl ClassMapped for Numbers {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("IntArray", |n| &n.int_array, |n, v| n.int_array = v);
        }
    }

    #[test]
    fn test_int_array_text_forms() {
        let registry = SerializerRegistry::new();
        let filled = Numbers {
            int_array: Some(vec![1, 2]),
        };
        assert_eq!(registry.to_json(&filled).unwrap(), r#"{ "IntArray" : [1, 2] }"#);
        assert_eq!(registry.from_json::<Numbers>(r#"{ "IntArray" : [1, 2] }"#).unwrap(), filled);

        let null = Numbers { int_array: None };
        assert_eq!(registry.to_json(&null).unwrap(), r#"{ "IntArray" : null }"#);
        assert_eq!(registry.from_json::<Numbers>(r#"{ "IntArray" : null }"#).unwrap(), null);

        let empty = Numbers {
            int_array: Some(Vec::new()),
        };
        assert_eq!(registry.to_json(&empty).unwrap(), r#"{ "IntArray" : [] }"#);
        assert_eq!(registry.from_json::<Numbers>(r#"{ "IntArray" : [] }"#).unwrap(), empty);
    }

    #[test]
    fn test_register_serializer_once() {
        struct Upper;

        impl BsonSerializer<String> for Upper {
            fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &String) -> BsonResult<()> {
                ctx.writer().write_string(&value.to_uppercase())
            }

            fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<String> {
                ctx.current_bson_type()?;
                ctx.reader().read_string()
            }
        }

        let registry = SerializerRegistry::new();
        registry.register_serializer::<String>(Upper).unwrap();
        assert!(matches!(
            registry.register_serializer::<String>(Upper),
            Err(BsonError::SerializerAlreadyRegistered(_))
        ));
        let doc = registry
            .to_document(&Line {
                sku: "ab-1".to_string(),
                quantity: 2,
            })
            .unwrap();
        assert_eq!(doc.get_str("Sku"), Some("AB-1"));
    }

    #[test]
    fn test_conventions_by_filter() {
        let registry = SerializerRegistry::new();
        registry.register_conventions(
            ConventionProfile::default().with_element_name(CamelCaseElementNameConvention),
            |t| t.is::<Line>(),
        );
        let doc = registry
            .to_document(&Order {
                id: ObjectId::new(),
                lines: vec![Line {
                    sku: "x".to_string(),
                    quantity: 1,
                }],
            })
            .unwrap();
        assert!(doc.contains_key("Lines"));
        assert_eq!(
            doc.get_array("Lines").and_then(|a| a.first()).cloned(),
            Some(BsonValue::Document(doc! { "sku": "x", "quantity": 1 }))
        );
    }

    #[test]
    fn test_ensure_document_id() {
        let registry = SerializerRegistry::new();
        let mut order = Order::default();
        assert!(registry.ensure_document_id(&mut order, Some("orders")).unwrap());
        assert!(!order.id.is_empty());
        let id = order.id;
        assert!(!registry.ensure_document_id(&mut order, Some("orders")).unwrap());
        assert_eq!(order.id, id);
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tagged {
        id: String,
    }

    impl ClassMapped for Tagged {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_id_member("Id", |t| &t.id, |t, v| t.id = v)
                .id_generator(StringObjectIdGenerator);
        }
    }

    #[test]
    fn test_custom_id_generator() {
        let registry = SerializerRegistry::new();
        let mut tagged = Tagged::default();
        assert!(registry.ensure_document_id(&mut tagged, None).unwrap());
        assert_eq!(tagged.id.len(), 24);
    }

    #[test]
    fn test_element_paths() {
        let registry = SerializerRegistry::new();
        registry
            .register_class_map::<Line>(|cm| {
                cm.auto_map();
                cm.member::<String>("Sku").element_name("s");
            })
            .unwrap();
        assert_eq!(registry.resolve_element_path::<Order>("Lines.0.Sku").unwrap(), "Lines.0.s");
        assert_eq!(registry.resolve_element_path::<Order>("Lines.$.Quantity").unwrap(), "Lines.$.Quantity");
        assert_eq!(registry.resolve_element_path::<Order>("Id").unwrap(), "_id");
        assert!(matches!(
            registry.resolve_element_path::<Order>("Lines.Missing"),
            Err(BsonError::UnknownMember { .. })
        ));
        let info = registry.try_get_member_serialization_info::<Order>("Lines").unwrap();
        assert!(info.nominal_type.is::<Vec<Line>>());
    }

    #[test]
    fn test_json_entry_points() {
        let registry = SerializerRegistry::new();
        let line = Line {
            sku: "k".to_string(),
            quantity: 4,
        };
        let json = registry
            .to_json_with(&line, &JsonWriterSettings::with_mode(JsonOutputMode::Relaxed))
            .unwrap();
        assert_eq!(json, r#"{ "Sku" : "k", "Quantity" : 4 }"#);
        let back: Line = registry.from_json(&json).unwrap();
        assert_eq!(back, line);
        let canonical: Line = registry
            .from_json(r#"{"Sku": "k", "Quantity": {"$numberInt": "4"}}"#)
            .unwrap();
        assert_eq!(canonical, line);
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Loop {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Cycle {
        Loop(Loop),
    }

    impl Default for Cycle {
        fn default() -> Self {
            Cycle::Loop(Loop::default())
        }
    }

    impl ClassMapped for Loop {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.map_member("name", |l| &l.name, |l, v| l.name = v);
        }
    }

    impl ClassMapped for Cycle {
        fn map_class(cm: &mut ClassMapBuilder<Self>) {
            cm.add_known_type(Cycle::Loop, |c| match c {
                Cycle::Loop(l) => Some(l),
            });
        }
    }

    #[test]
    fn test_circular_known_types_detected() {
        let registry = SerializerRegistry::new();
        registry
            .register_class_map::<Loop>(|cm| {
                cm.auto_map();
                cm.add_known_type(|_: Cycle| Loop::default(), |_| None);
            })
            .unwrap();
        assert!(matches!(
            registry.class_map::<Cycle>(),
            Err(BsonError::CircularClassMap(_))
        ));
    }
}
