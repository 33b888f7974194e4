//! 鉴别器约定
//!
//! 多态值写出时附带一个标记元素, 读取时先前瞻该元素确定具体类型,
//! 再回到书签处按具体类型的类映射重新读取。

use crate::io::BsonReader;
use crate::spec::ElementType;
use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use std::fmt;

/// 鉴别器约定
pub trait DiscriminatorConvention: Send + Sync + fmt::Debug {
    /// 鉴别器元素名, 不写元素的约定返回 None
    fn element_name(&self) -> Option<&str>;

    /// # Brief
    /// 在当前文档中查找鉴别器
    ///
    /// 调用时读取器位于文档值之前 (状态 Value, 类型 Document),
    /// 调用方负责事先保存书签并在之后回退。
    ///
    /// # Returns
    /// 找到时返回最具体的鉴别器值
    fn read_discriminator(&self, reader: &mut dyn BsonReader) -> BsonResult<Option<String>>;

    /// # Brief
    /// 计算要写出的鉴别器值
    ///
    /// # Arguments
    /// * `chain` - 从最外层已知基类到实际类型的鉴别器链
    /// * `rooted` - 链的起点是否为根类
    fn discriminator_value(&self, chain: &[String], rooted: bool) -> Option<BsonValue>;
}

/// 扫描文档元素, 返回指定名称元素中最后一个字符串
fn scan_for_element(reader: &mut dyn BsonReader, element_name: &str) -> BsonResult<Option<String>> {
    reader.read_start_document()?;
    while reader.read_bson_type()? != ElementType::EndOfDocument {
        let name = reader.read_name()?;
        if name != element_name {
            reader.skip_value()?;
            continue;
        }
        return match reader.read_value()? {
            BsonValue::String(s) => Ok(Some(s)),
            BsonValue::Array(items) => match items.last() {
                Some(BsonValue::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(BsonError::unexpected_type("discriminator", other.element_type())),
                None => Ok(None),
            },
            BsonValue::Null => Ok(None),
            other => Err(BsonError::unexpected_type("discriminator", other.element_type())),
        };
    }
    Ok(None)
}

/// 写出实际类型的单个鉴别器: `_t: "Dog"`
#[derive(Debug, Clone)]
pub struct ScalarDiscriminatorConvention {
    element_name: String,
}

impl ScalarDiscriminatorConvention {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
        }
    }
}

impl Default for ScalarDiscriminatorConvention {
    fn default() -> Self {
        Self::new("_t")
    }
}

impl DiscriminatorConvention for ScalarDiscriminatorConvention {
    fn element_name(&self) -> Option<&str> {
        Some(&self.element_name)
    }

    fn read_discriminator(&self, reader: &mut dyn BsonReader) -> BsonResult<Option<String>> {
        scan_for_element(reader, &self.element_name)
    }

    fn discriminator_value(&self, chain: &[String], _rooted: bool) -> Option<BsonValue> {
        chain.last().map(|d| BsonValue::String(d.clone()))
    }
}

/// 根类之下写出完整鉴别器链: `_t: ["Animal", "Dog"]`
///
/// 没有根类时退化为单个鉴别器。
#[derive(Debug, Clone)]
pub struct HierarchicalDiscriminatorConvention {
    element_name: String,
}

impl HierarchicalDiscriminatorConvention {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
        }
    }
}

impl Default for HierarchicalDiscriminatorConvention {
    fn default() -> Self {
        Self::new("_t")
    }
}

impl DiscriminatorConvention for HierarchicalDiscriminatorConvention {
    fn element_name(&self) -> Option<&str> {
        Some(&self.element_name)
    }

    fn read_discriminator(&self, reader: &mut dyn BsonReader) -> BsonResult<Option<String>> {
        scan_for_element(reader, &self.element_name)
    }

    fn discriminator_value(&self, chain: &[String], rooted: bool) -> Option<BsonValue> {
        if rooted && chain.len() > 1 {
            return Some(BsonValue::Array(
                chain.iter().map(|d| BsonValue::String(d.clone())).collect(),
            ));
        }
        chain.last().map(|d| BsonValue::String(d.clone()))
    }
}

/// 按特征元素是否存在判断类型, 写出时不附加任何元素
///
/// ```rust,ignore
/// let convention = MemberPresenceDiscriminatorConvention::new()
///     .with_marker("bark_volume", "Dog")
///     .with_marker("lives", "Cat");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemberPresenceDiscriminatorConvention {
    markers: Vec<(String, String)>,
}

impl MemberPresenceDiscriminatorConvention {
    pub fn new() -> Self {
        Self::default()
    }

    /// 文档中出现 `element` 时解析为 `discriminator`, 先登记的优先
    pub fn with_marker(mut self, element: impl Into<String>, discriminator: impl Into<String>) -> Self {
        self.markers.push((element.into(), discriminator.into()));
        self
    }
}

impl DiscriminatorConvention for MemberPresenceDiscriminatorConvention {
    fn element_name(&self) -> Option<&str> {
        None
    }

    fn read_discriminator(&self, reader: &mut dyn BsonReader) -> BsonResult<Option<String>> {
        let mut best: Option<usize> = None;
        reader.read_start_document()?;
        while reader.read_bson_type()? != ElementType::EndOfDocument {
            let name = reader.read_name()?;
            if let Some(index) = self.markers.iter().position(|(element, _)| *element == name) {
                best = Some(best.map_or(index, |b| b.min(index)));
            }
            reader.skip_value()?;
        }
        Ok(best.map(|index| self.markers[index].1.clone()))
    }

    fn discriminator_value(&self, _chain: &[String], _rooted: bool) -> Option<BsonValue> {
        None
    }
}
