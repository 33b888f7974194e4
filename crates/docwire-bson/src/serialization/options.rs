//! 序列化选项
//!
//! 选项附加在成员或注册表查找上, 决定同一种 Rust 类型以何种 BSON 形式出现。
//! 类型不支持的选项在类映射冻结时报配置错误。

use crate::spec::ElementType;
use docwire_common::GuidRepresentation;
use std::fmt;

/// 序列化选项
#[derive(Debug, Clone, PartialEq)]
pub enum SerializationOptions {
    /// 目标 BSON 类型, 用于数值、字符串、ObjectId 等
    Representation(RepresentationOptions),
    DateTime(DateTimeOptions),
    Guid(GuidOptions),
    Dictionary(DictionaryOptions),
    /// 数组元素使用的选项
    Array(ArrayOptions),
}

impl SerializationOptions {
    pub fn representation(representation: ElementType) -> Self {
        Self::Representation(RepresentationOptions::new(representation))
    }

    pub fn date_time(representation: DateTimeRepresentation) -> Self {
        Self::DateTime(DateTimeOptions {
            representation,
            date_only: false,
        })
    }

    pub fn guid(representation: GuidRepresentation) -> Self {
        Self::Guid(GuidOptions {
            representation: Some(representation),
            as_string: false,
        })
    }

    pub fn dictionary(representation: DictionaryRepresentation) -> Self {
        Self::Dictionary(DictionaryOptions {
            representation,
            value_options: None,
        })
    }

    pub fn array_items(items: SerializationOptions) -> Self {
        Self::Array(ArrayOptions {
            items: Box::new(items),
        })
    }
}

impl fmt::Display for SerializationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 目标表示与数值转换规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepresentationOptions {
    pub representation: ElementType,
    /// 超出目标范围时按位截断而不是报错
    pub allow_overflow: bool,
    /// 允许丢失小数部分或精度
    pub allow_truncation: bool,
}

impl RepresentationOptions {
    pub fn new(representation: ElementType) -> Self {
        Self {
            representation,
            allow_overflow: false,
            allow_truncation: false,
        }
    }

    pub fn with_allow_overflow(mut self, allow: bool) -> Self {
        self.allow_overflow = allow;
        self
    }

    pub fn with_allow_truncation(mut self, allow: bool) -> Self {
        self.allow_truncation = allow;
        self
    }
}

/// 时间的 BSON 表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeRepresentation {
    /// BSON DateTime, 毫秒精度
    #[default]
    DateTime,
    /// Int64 ticks (100 纳秒, 自 0001-01-01 起)
    Int64,
    /// ISO-8601 字符串
    String,
    /// `{ DateTime: <date>, Ticks: <int64> }`
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeOptions {
    pub representation: DateTimeRepresentation,
    /// 只保存日期, 写入时要求时间部分为零
    pub date_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuidOptions {
    /// None 表示沿用读写器设置
    pub representation: Option<GuidRepresentation>,
    /// 以 "xxxxxxxx-xxxx-..." 字符串形式保存
    pub as_string: bool,
}

/// 字典的 BSON 表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictionaryRepresentation {
    /// `{ key: value, ... }`
    #[default]
    Document,
    /// `[[key, value], ...]`
    ArrayOfArrays,
    /// `[{ k: key, v: value }, ...]`
    ArrayOfDocuments,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DictionaryOptions {
    pub representation: DictionaryRepresentation,
    pub value_options: Option<Box<SerializationOptions>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayOptions {
    pub items: Box<SerializationOptions>,
}
