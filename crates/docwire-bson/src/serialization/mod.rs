//! 类映射序列化框架
//!
//! - `SerializerRegistry`: 按类型缓存序列化器与类映射, 提供读写入口
//! - `ClassMapped` / `ClassMapBuilder`: 用显式存取函数描述类型的成员
//! - `ConventionProfile`: 自动补全元素名、id、额外元素等配置
//! - 鉴别器约定与已知类型: 多态值的写出与还原
//! - id 生成器: 插入前补全空 id

mod class_map;
mod class_map_serializer;
mod collections;
mod context;
pub mod conventions;
pub mod discriminator;
pub mod id_generators;
mod member_map;
mod options;
mod primitives;
mod registry;
mod serde_bridge;
mod serializer;

pub use class_map::{ClassMap, ClassMapBuilder, ClassMapInfo, ClassMapped, MemberHandle};
pub use class_map_serializer::ClassMapSerializer;
pub use collections::{DictionarySerializer, OptionSerializer, StringKeyedMap, VecSerializer};
pub use context::{DeserializationContext, SerializationContext};
pub use conventions::{ClassSettings, ConventionProfile};
pub use discriminator::{
    DiscriminatorConvention, HierarchicalDiscriminatorConvention,
    MemberPresenceDiscriminatorConvention, ScalarDiscriminatorConvention,
};
pub use id_generators::IdGenerator;
pub use member_map::{MemberMap, MemberSettings, MemberValue};
pub use options::{
    ArrayOptions, DateTimeOptions, DateTimeRepresentation, DictionaryOptions,
    DictionaryRepresentation, GuidOptions, RepresentationOptions, SerializationOptions,
};
pub use primitives::{
    BooleanSerializer, DateTimeSerializer, DateTimeValue, Decimal128Serializer, DecimalSerializer,
    GuidSerializer, Number, NumericSerializer, NumericValue, ObjectIdSerializer, StringSerializer,
};
pub use registry::SerializerRegistry;
pub use serde_bridge::{Serde, SerdeSerializer};
pub use serializer::{
    deserialize_value, erase, serialize_value, BsonMapped, BsonSerializer, DynSerializer,
    MemberSerializationInfo, SerializerRef, TypeInfo,
};
