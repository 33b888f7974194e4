//! 序列化上下文
//!
//! 上下文把读写器与注册表绑在一起传给每一层序列化器, 并在多态派发时
//! 携带鉴别器信息。

use super::discriminator::DiscriminatorConvention;
use super::registry::SerializerRegistry;
use super::serializer::{deserialize_value, serialize_value, BsonMapped};
use crate::io::{BsonReader, BsonWriter, ReaderState};
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};
use std::sync::Arc;

/// 基类派发到已知子类型时传递的鉴别器请求
#[derive(Clone)]
pub(crate) struct DiscriminatorRequest {
    pub convention: Arc<dyn DiscriminatorConvention>,
    /// 从根类开始的鉴别器链
    pub chain: Vec<String>,
    pub rooted: bool,
}

/// 序列化上下文
pub struct SerializationContext<'a> {
    writer: &'a mut (dyn BsonWriter + 'a),
    registry: &'a SerializerRegistry,
    pub(crate) discriminator_request: Option<DiscriminatorRequest>,
}

impl<'a> SerializationContext<'a> {
    pub fn new(writer: &'a mut (dyn BsonWriter + 'a), registry: &'a SerializerRegistry) -> Self {
        Self {
            writer,
            registry,
            discriminator_request: None,
        }
    }

    pub fn writer(&mut self) -> &mut (dyn BsonWriter + 'a) {
        &mut *self.writer
    }

    pub fn registry(&self) -> &'a SerializerRegistry {
        self.registry
    }

    /// 用注册表中 `T` 的默认序列化器写一个值
    pub fn serialize<T: BsonMapped>(&mut self, value: &T) -> BsonResult<()> {
        let serializer = self.registry.lookup::<T>()?;
        serialize_value(&*serializer, self, value)
    }
}

/// 反序列化上下文
pub struct DeserializationContext<'a> {
    reader: &'a mut (dyn BsonReader + 'a),
    registry: &'a SerializerRegistry,
    /// 基类已解析鉴别器后派发给子类型时使用的约定
    pub(crate) discriminator_convention: Option<Arc<dyn DiscriminatorConvention>>,
}

impl<'a> DeserializationContext<'a> {
    pub fn new(reader: &'a mut (dyn BsonReader + 'a), registry: &'a SerializerRegistry) -> Self {
        Self {
            reader,
            registry,
            discriminator_convention: None,
        }
    }

    pub fn reader(&mut self) -> &mut (dyn BsonReader + 'a) {
        &mut *self.reader
    }

    pub fn registry(&self) -> &'a SerializerRegistry {
        self.registry
    }

    /// 当前值的 BSON 类型
    ///
    /// 在顶层或名称之前调用时会先读入类型与名称。
    pub fn current_bson_type(&mut self) -> BsonResult<ElementType> {
        match self.reader.state() {
            ReaderState::Initial | ReaderState::Done | ReaderState::ScopeDocument => {
                self.reader.read_bson_type()?;
            }
            ReaderState::Name => self.reader.skip_name()?,
            _ => {}
        }
        self.reader
            .current_bson_type()
            .ok_or_else(|| BsonError::invalid_state("GetCurrentBsonType", "no current BSON type"))
    }

    /// 用注册表中 `T` 的默认序列化器读一个值
    pub fn deserialize<T: BsonMapped>(&mut self) -> BsonResult<T> {
        let serializer = self.registry.lookup::<T>()?;
        deserialize_value(&*serializer, self)
    }
}
