//! 标量与 BSON 内建类型的序列化器
//!
//! 数值类型共享一套转换规则: 读取时接受任意数值表示, 写入时按
//! `RepresentationOptions` 转换, 溢出与截断默认报范围错误。

use super::context::{DeserializationContext, SerializationContext};
use super::options::{
    DateTimeOptions, DateTimeRepresentation, GuidOptions, RepresentationOptions, SerializationOptions,
};
use super::registry::SerializerRegistry;
use super::serializer::{erase, BsonMapped, BsonSerializer, SerializerRef};
use crate::binary::Binary;
use crate::datetime::BsonDateTime;
use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::io::{BsonReader, BsonWriter};
use crate::raw::RawDocumentBuf;
use crate::spec::ElementType;
use crate::value::{BsonValue, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use docwire_common::ObjectId;
use rust_decimal::Decimal;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

const MILLIS_PER_DAY: i64 = 86_400_000;

pub(crate) fn unsupported_options<T>(options: &SerializationOptions) -> BsonError {
    BsonError::UnsupportedOptions {
        type_name: std::any::type_name::<T>().to_string(),
        options: options.to_string(),
    }
}

/// 不接受任何选项的类型
pub(crate) fn reject_options<T>(options: Option<&SerializationOptions>) -> BsonResult<()> {
    match options {
        Some(options) => Err(unsupported_options::<T>(options)),
        None => Ok(()),
    }
}

/// 取出 Representation 选项并校验目标类型在允许列表中
fn representation_options<T>(
    options: Option<&SerializationOptions>,
    default: ElementType,
    allowed: &[ElementType],
) -> BsonResult<RepresentationOptions> {
    match options {
        None => Ok(RepresentationOptions::new(default)),
        Some(SerializationOptions::Representation(rep)) if allowed.contains(&rep.representation) => {
            Ok(*rep)
        }
        Some(other) => Err(unsupported_options::<T>(other)),
    }
}

// ---------------------------------------------------------------------------
// 数值
// ---------------------------------------------------------------------------

/// 数值转换的中间形式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i128),
    Float(f64),
}

impl Number {
    fn parse(text: &str) -> BsonResult<Self> {
        if let Ok(i) = text.parse::<i128>() {
            return Ok(Number::Integer(i));
        }
        text.parse::<f64>()
            .map(Number::Float)
            .map_err(|_| BsonError::OutOfRange(format!("'{}' is not a number", text)))
    }

    fn to_text(self) -> String {
        match self {
            Number::Integer(i) => i.to_string(),
            Number::Float(f) => format!("{:?}", f),
        }
    }

    fn to_decimal128(self) -> BsonResult<Decimal128> {
        match self {
            Number::Integer(i) => Decimal128::parse(&i.to_string()),
            Number::Float(f) if f.is_nan() => Ok(Decimal128::NAN),
            Number::Float(f) if f.is_infinite() => Ok(if f > 0.0 {
                Decimal128::INFINITY
            } else {
                Decimal128::NEG_INFINITY
            }),
            Number::Float(f) => Decimal128::parse(&format!("{:e}", f)),
        }
    }

    fn to_integer(self, conv: &RepresentationOptions) -> BsonResult<i128> {
        match self {
            Number::Integer(i) => Ok(i),
            Number::Float(f) => {
                if !f.is_finite() {
                    return Err(BsonError::OutOfRange(format!("{} cannot be converted to an integer", f)));
                }
                if f.fract() != 0.0 && !conv.allow_truncation {
                    return Err(BsonError::OutOfRange(format!(
                        "{} would be truncated when converted to an integer",
                        f
                    )));
                }
                Ok(f.trunc() as i128)
            }
        }
    }

    fn to_f64(self, conv: &RepresentationOptions) -> BsonResult<f64> {
        match self {
            Number::Float(f) => Ok(f),
            Number::Integer(i) => {
                let f = i as f64;
                if f as i128 != i && !conv.allow_truncation {
                    return Err(BsonError::OutOfRange(format!(
                        "{} cannot be represented exactly as a Double",
                        i
                    )));
                }
                Ok(f)
            }
        }
    }
}

/// 可按数值规则转换的 Rust 类型
pub trait NumericValue: Copy + Send + Sync + 'static {
    const DEFAULT_REPRESENTATION: ElementType;
    fn to_number(self) -> Number;
    fn from_number(n: Number, conv: &RepresentationOptions) -> BsonResult<Self>;
}

macro_rules! integer_value {
    ($($t:ty => $default:expr),* $(,)?) => {
        $(
            impl NumericValue for $t {
                const DEFAULT_REPRESENTATION: ElementType = $default;

                fn to_number(self) -> Number {
                    Number::Integer(self as i128)
                }

                fn from_number(n: Number, conv: &RepresentationOptions) -> BsonResult<Self> {
                    let i = n.to_integer(conv)?;
                    match <$t>::try_from(i) {
                        Ok(v) => Ok(v),
                        Err(_) if conv.allow_overflow => Ok(i as $t),
                        Err(_) => Err(BsonError::OutOfRange(format!(
                            "{} is outside the range of {}",
                            i,
                            stringify!($t)
                        ))),
                    }
                }
            }
        )*
    };
}

integer_value! {
    i32 => ElementType::Int32,
    i64 => ElementType::Int64,
    u32 => ElementType::Int64,
    u64 => ElementType::Int64,
}

impl NumericValue for f64 {
    const DEFAULT_REPRESENTATION: ElementType = ElementType::Double;

    fn to_number(self) -> Number {
        Number::Float(self)
    }

    fn from_number(n: Number, conv: &RepresentationOptions) -> BsonResult<Self> {
        n.to_f64(conv)
    }
}

impl NumericValue for f32 {
    const DEFAULT_REPRESENTATION: ElementType = ElementType::Double;

    fn to_number(self) -> Number {
        Number::Float(self as f64)
    }

    fn from_number(n: Number, conv: &RepresentationOptions) -> BsonResult<Self> {
        let wide = n.to_f64(conv)?;
        let narrow = wide as f32;
        if wide.is_finite() && narrow.is_infinite() && !conv.allow_overflow {
            return Err(BsonError::OutOfRange(format!("{} is outside the range of f32", wide)));
        }
        if narrow.is_finite() && narrow as f64 != wide && !conv.allow_truncation {
            return Err(BsonError::OutOfRange(format!(
                "{} cannot be represented exactly as f32",
                wide
            )));
        }
        Ok(narrow)
    }
}

const NUMERIC_REPRESENTATIONS: &[ElementType] = &[
    ElementType::Int32,
    ElementType::Int64,
    ElementType::Double,
    ElementType::String,
    ElementType::Decimal128,
];

fn write_number<W: BsonWriter + ?Sized>(
    writer: &mut W,
    n: Number,
    conv: &RepresentationOptions,
) -> BsonResult<()> {
    match conv.representation {
        ElementType::Int32 => writer.write_int32(i32::from_number(n, conv)?),
        ElementType::Int64 => writer.write_int64(i64::from_number(n, conv)?),
        ElementType::Double => writer.write_double(f64::from_number(n, conv)?),
        ElementType::String => writer.write_string(&n.to_text()),
        ElementType::Decimal128 => writer.write_decimal128(n.to_decimal128()?),
        other => Err(BsonError::Configuration(format!(
            "{} is not a numeric representation",
            other.name()
        ))),
    }
}

fn read_number(ctx: &mut DeserializationContext<'_>, target: &'static str) -> BsonResult<Number> {
    let ty = ctx.current_bson_type()?;
    let reader = ctx.reader();
    match ty {
        ElementType::Int32 => Ok(Number::Integer(reader.read_int32()? as i128)),
        ElementType::Int64 => Ok(Number::Integer(reader.read_int64()? as i128)),
        ElementType::Double => Ok(Number::Float(reader.read_double()?)),
        ElementType::String => Number::parse(&reader.read_string()?),
        ElementType::Decimal128 => Number::parse(&reader.read_decimal128()?.to_string()),
        other => Err(BsonError::unexpected_type(target, other)),
    }
}

/// 数值序列化器
pub struct NumericSerializer<N> {
    options: RepresentationOptions,
    _marker: PhantomData<fn() -> N>,
}

impl<N: NumericValue> NumericSerializer<N> {
    pub fn new(options: Option<&SerializationOptions>) -> BsonResult<Self> {
        Ok(Self {
            options: representation_options::<N>(
                options,
                N::DEFAULT_REPRESENTATION,
                NUMERIC_REPRESENTATIONS,
            )?,
            _marker: PhantomData,
        })
    }
}

impl<N: NumericValue> BsonSerializer<N> for NumericSerializer<N> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &N) -> BsonResult<()> {
        write_number(ctx.writer(), value.to_number(), &self.options)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<N> {
        let n = read_number(ctx, std::any::type_name::<N>())?;
        N::from_number(n, &self.options)
    }
}

macro_rules! numeric_mapped {
    ($($t:ty),*) => {
        $(
            impl BsonMapped for $t {
                fn create_serializer(
                    _registry: &SerializerRegistry,
                    options: Option<&SerializationOptions>,
                ) -> BsonResult<SerializerRef> {
                    Ok(erase::<$t, _>(NumericSerializer::<$t>::new(options)?))
                }
            }
        )*
    };
}

numeric_mapped!(i32, i64, u32, u64, f32, f64);

// ---------------------------------------------------------------------------
// 布尔与字符串
// ---------------------------------------------------------------------------

pub struct BooleanSerializer {
    representation: ElementType,
}

impl BsonSerializer<bool> for BooleanSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &bool) -> BsonResult<()> {
        let writer = ctx.writer();
        match self.representation {
            ElementType::Int32 => writer.write_int32(i32::from(*value)),
            ElementType::Int64 => writer.write_int64(i64::from(*value)),
            ElementType::Double => writer.write_double(if *value { 1.0 } else { 0.0 }),
            ElementType::String => writer.write_string(if *value { "true" } else { "false" }),
            _ => writer.write_boolean(*value),
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<bool> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::Boolean => reader.read_boolean(),
            ElementType::Int32 => Ok(reader.read_int32()? != 0),
            ElementType::Int64 => Ok(reader.read_int64()? != 0),
            ElementType::Double => Ok(reader.read_double()? != 0.0),
            ElementType::String => {
                let text = reader.read_string()?;
                bool::from_str(&text.to_ascii_lowercase())
                    .map_err(|_| BsonError::OutOfRange(format!("'{}' is not a boolean", text)))
            }
            other => Err(BsonError::unexpected_type("bool", other)),
        }
    }
}

impl BsonMapped for bool {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let rep = representation_options::<bool>(
            options,
            ElementType::Boolean,
            &[
                ElementType::Boolean,
                ElementType::Int32,
                ElementType::Int64,
                ElementType::Double,
                ElementType::String,
            ],
        )?;
        Ok(erase::<bool, _>(BooleanSerializer {
            representation: rep.representation,
        }))
    }
}

/// 字符串可以按 ObjectId 或 Symbol 保存
pub struct StringSerializer {
    representation: ElementType,
}

impl BsonSerializer<String> for StringSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &String) -> BsonResult<()> {
        let writer = ctx.writer();
        match self.representation {
            ElementType::ObjectId => writer.write_object_id(ObjectId::parse(value)?),
            ElementType::Symbol => writer.write_symbol(value),
            _ => writer.write_string(value),
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<String> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::String => reader.read_string(),
            ElementType::Symbol => reader.read_symbol(),
            ElementType::ObjectId => Ok(reader.read_object_id()?.to_hex()),
            other => Err(BsonError::unexpected_type("String", other)),
        }
    }
}

impl BsonMapped for String {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let rep = representation_options::<String>(
            options,
            ElementType::String,
            &[ElementType::String, ElementType::ObjectId, ElementType::Symbol],
        )?;
        Ok(erase::<String, _>(StringSerializer {
            representation: rep.representation,
        }))
    }
}

// ---------------------------------------------------------------------------
// ObjectId 与 GUID
// ---------------------------------------------------------------------------

pub struct ObjectIdSerializer {
    as_string: bool,
}

impl BsonSerializer<ObjectId> for ObjectIdSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &ObjectId) -> BsonResult<()> {
        if self.as_string {
            ctx.writer().write_string(&value.to_hex())
        } else {
            ctx.writer().write_object_id(*value)
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<ObjectId> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::ObjectId => reader.read_object_id(),
            ElementType::String => Ok(ObjectId::parse(&reader.read_string()?)?),
            other => Err(BsonError::unexpected_type("ObjectId", other)),
        }
    }
}

impl BsonMapped for ObjectId {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let rep = representation_options::<ObjectId>(
            options,
            ElementType::ObjectId,
            &[ElementType::ObjectId, ElementType::String],
        )?;
        Ok(erase::<ObjectId, _>(ObjectIdSerializer {
            as_string: rep.representation == ElementType::String,
        }))
    }
}

/// GUID 序列化器, 未指定表示法时沿用读写器的设置
pub struct GuidSerializer {
    options: GuidOptions,
}

impl BsonSerializer<Uuid> for GuidSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Uuid) -> BsonResult<()> {
        let writer = ctx.writer();
        if self.options.as_string {
            return writer.write_string(&value.hyphenated().to_string());
        }
        let representation = self
            .options
            .representation
            .unwrap_or_else(|| writer.guid_representation());
        writer.write_binary(&Binary::from_uuid(*value, representation)?)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Uuid> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::Binary => {
                let representation = self
                    .options
                    .representation
                    .unwrap_or_else(|| reader.guid_representation());
                reader.read_binary()?.to_uuid(representation)
            }
            ElementType::String => {
                let text = reader.read_string()?;
                Uuid::parse_str(&text)
                    .map_err(|e| BsonError::InvalidDocument(format!("'{}' is not a GUID: {}", text, e)))
            }
            other => Err(BsonError::unexpected_type("Uuid", other)),
        }
    }
}

impl BsonMapped for Uuid {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let options = match options {
            None => GuidOptions::default(),
            Some(SerializationOptions::Guid(guid)) => *guid,
            Some(SerializationOptions::Representation(rep))
                if rep.representation == ElementType::String =>
            {
                GuidOptions {
                    representation: None,
                    as_string: true,
                }
            }
            Some(other) => return Err(unsupported_options::<Uuid>(other)),
        };
        Ok(erase::<Uuid, _>(GuidSerializer { options }))
    }
}

// ---------------------------------------------------------------------------
// 时间
// ---------------------------------------------------------------------------

/// 可与 `BsonDateTime` 互转的时间类型
pub trait DateTimeValue: Sized + Send + Sync + 'static {
    fn to_bson_date_time(&self) -> BsonResult<BsonDateTime>;
    fn from_bson_date_time(dt: BsonDateTime) -> BsonResult<Self>;
}

impl DateTimeValue for BsonDateTime {
    fn to_bson_date_time(&self) -> BsonResult<BsonDateTime> {
        Ok(*self)
    }

    fn from_bson_date_time(dt: BsonDateTime) -> BsonResult<Self> {
        Ok(dt)
    }
}

impl DateTimeValue for DateTime<Utc> {
    fn to_bson_date_time(&self) -> BsonResult<BsonDateTime> {
        BsonDateTime::from_chrono(*self)
    }

    fn from_bson_date_time(dt: BsonDateTime) -> BsonResult<Self> {
        dt.to_chrono()
    }
}

pub struct DateTimeSerializer<D> {
    options: DateTimeOptions,
    _marker: PhantomData<fn() -> D>,
}

impl<D: DateTimeValue> DateTimeSerializer<D> {
    pub fn new(options: Option<&SerializationOptions>) -> BsonResult<Self> {
        let options = match options {
            None => DateTimeOptions::default(),
            Some(SerializationOptions::DateTime(dt)) => *dt,
            Some(other) => return Err(unsupported_options::<D>(other)),
        };
        Ok(Self {
            options,
            _marker: PhantomData,
        })
    }

    fn read_document_form(reader: &mut (dyn BsonReader + '_)) -> BsonResult<BsonDateTime> {
        reader.read_start_document()?;
        let mut millis = None;
        let mut ticks = None;
        while reader.read_bson_type()? != ElementType::EndOfDocument {
            let name = reader.read_name()?;
            match name.as_str() {
                "DateTime" => millis = Some(reader.read_date_time()?),
                "Ticks" => ticks = Some(reader.read_int64()?),
                _ => {
                    return Err(BsonError::UnexpectedElement {
                        class: "DateTime".to_string(),
                        element: name,
                    })
                }
            }
        }
        reader.read_end_document()?;
        match (ticks, millis) {
            (Some(ticks), _) => BsonDateTime::from_ticks(ticks),
            (None, Some(millis)) => Ok(BsonDateTime::from_millis(millis)),
            (None, None) => Err(BsonError::MissingRequiredElement {
                class: "DateTime".to_string(),
                element: "Ticks".to_string(),
            }),
        }
    }
}

impl<D: DateTimeValue> BsonSerializer<D> for DateTimeSerializer<D> {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &D) -> BsonResult<()> {
        let dt = value.to_bson_date_time()?;
        let millis = dt.timestamp_millis();
        if self.options.date_only && millis.rem_euclid(MILLIS_PER_DAY) != 0 {
            return Err(BsonError::OutOfRange(format!(
                "{} has a time component but the member is date-only",
                dt
            )));
        }
        let writer = ctx.writer();
        match self.options.representation {
            DateTimeRepresentation::DateTime => writer.write_date_time(millis),
            DateTimeRepresentation::Int64 => writer.write_int64(dt.to_ticks()?),
            DateTimeRepresentation::String => {
                let text = if self.options.date_only {
                    dt.to_chrono()?.format("%Y-%m-%d").to_string()
                } else {
                    dt.to_iso_string()?
                };
                writer.write_string(&text)
            }
            DateTimeRepresentation::Document => {
                writer.write_start_document()?;
                writer.write_name("DateTime")?;
                writer.write_date_time(millis)?;
                writer.write_name("Ticks")?;
                writer.write_int64(dt.to_ticks()?)?;
                writer.write_end_document()
            }
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<D> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        let dt = match ty {
            ElementType::DateTime => BsonDateTime::from_millis(reader.read_date_time()?),
            ElementType::Int64 => BsonDateTime::from_ticks(reader.read_int64()?)?,
            ElementType::String => BsonDateTime::parse_iso(&reader.read_string()?)?,
            ElementType::Document => Self::read_document_form(reader)?,
            other => return Err(BsonError::unexpected_type("DateTime", other)),
        };
        let dt = if self.options.date_only {
            let millis = dt.timestamp_millis();
            BsonDateTime::from_millis(millis - millis.rem_euclid(MILLIS_PER_DAY))
        } else {
            dt
        };
        D::from_bson_date_time(dt)
    }
}

impl BsonMapped for BsonDateTime {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        Ok(erase::<BsonDateTime, _>(DateTimeSerializer::<BsonDateTime>::new(options)?))
    }
}

impl BsonMapped for DateTime<Utc> {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        Ok(erase::<DateTime<Utc>, _>(DateTimeSerializer::<DateTime<Utc>>::new(options)?))
    }
}

// ---------------------------------------------------------------------------
// 十进制
// ---------------------------------------------------------------------------

fn read_decimal128(ctx: &mut DeserializationContext<'_>, target: &'static str) -> BsonResult<Decimal128> {
    let ty = ctx.current_bson_type()?;
    let reader = ctx.reader();
    match ty {
        ElementType::Decimal128 => reader.read_decimal128(),
        ElementType::String => Decimal128::parse(&reader.read_string()?),
        ElementType::Int32 => Ok(Decimal128::from(reader.read_int32()?)),
        ElementType::Int64 => Ok(Decimal128::from(reader.read_int64()?)),
        ElementType::Double => Number::Float(reader.read_double()?).to_decimal128(),
        other => Err(BsonError::unexpected_type(target, other)),
    }
}

pub struct Decimal128Serializer {
    as_string: bool,
}

impl BsonSerializer<Decimal128> for Decimal128Serializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Decimal128) -> BsonResult<()> {
        if self.as_string {
            ctx.writer().write_string(&value.to_string())
        } else {
            ctx.writer().write_decimal128(*value)
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Decimal128> {
        read_decimal128(ctx, "Decimal128")
    }
}

impl BsonMapped for Decimal128 {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let rep = representation_options::<Decimal128>(
            options,
            ElementType::Decimal128,
            &[ElementType::Decimal128, ElementType::String],
        )?;
        Ok(erase::<Decimal128, _>(Decimal128Serializer {
            as_string: rep.representation == ElementType::String,
        }))
    }
}

/// `rust_decimal::Decimal`, 默认保存为 Decimal128
pub struct DecimalSerializer {
    as_string: bool,
}

impl BsonSerializer<Decimal> for DecimalSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Decimal) -> BsonResult<()> {
        if self.as_string {
            ctx.writer().write_string(&value.to_string())
        } else {
            ctx.writer().write_decimal128(Decimal128::from(*value))
        }
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Decimal> {
        let ty = ctx.current_bson_type()?;
        if ty == ElementType::String {
            let text = ctx.reader().read_string()?;
            return Decimal::from_str(&text)
                .map_err(|e| BsonError::OutOfRange(format!("'{}' is not a decimal: {}", text, e)));
        }
        Decimal::try_from(read_decimal128(ctx, "Decimal")?)
    }
}

impl BsonMapped for Decimal {
    fn create_serializer(
        _registry: &SerializerRegistry,
        options: Option<&SerializationOptions>,
    ) -> BsonResult<SerializerRef> {
        let rep = representation_options::<Decimal>(
            options,
            ElementType::Decimal128,
            &[ElementType::Decimal128, ElementType::String],
        )?;
        Ok(erase::<Decimal, _>(DecimalSerializer {
            as_string: rep.representation == ElementType::String,
        }))
    }
}

// ---------------------------------------------------------------------------
// 其余 BSON 类型
// ---------------------------------------------------------------------------

pub struct TimestampSerializer;

impl BsonSerializer<Timestamp> for TimestampSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Timestamp) -> BsonResult<()> {
        ctx.writer().write_timestamp(*value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Timestamp> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::Timestamp => reader.read_timestamp(),
            ElementType::Int64 => Ok(Timestamp::from_u64(reader.read_int64()? as u64)),
            other => Err(BsonError::unexpected_type("Timestamp", other)),
        }
    }
}

pub struct RegexSerializer;

impl BsonSerializer<Regex> for RegexSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Regex) -> BsonResult<()> {
        ctx.writer().write_regular_expression(value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Regex> {
        let ty = ctx.current_bson_type()?;
        let reader = ctx.reader();
        match ty {
            ElementType::RegularExpression => reader.read_regular_expression(),
            ElementType::String => Ok(Regex::new(reader.read_string()?, "")),
            other => Err(BsonError::unexpected_type("Regex", other)),
        }
    }
}

pub struct BinarySerializer;

impl BsonSerializer<Binary> for BinarySerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Binary) -> BsonResult<()> {
        ctx.writer().write_binary(value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Binary> {
        match ctx.current_bson_type()? {
            ElementType::Binary => ctx.reader().read_binary(),
            other => Err(BsonError::unexpected_type("Binary", other)),
        }
    }
}

/// 字节串保存为通用子类型的二进制值
pub struct BytesSerializer;

impl BsonSerializer<Bytes> for BytesSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Bytes) -> BsonResult<()> {
        ctx.writer().write_binary(&Binary::generic(value.to_vec()))
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Bytes> {
        match ctx.current_bson_type()? {
            ElementType::Binary => Ok(Bytes::from(ctx.reader().read_binary()?.bytes)),
            other => Err(BsonError::unexpected_type("Bytes", other)),
        }
    }
}

/// 任意 BSON 值, 原样读写
pub struct BsonValueSerializer;

impl BsonSerializer<BsonValue> for BsonValueSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &BsonValue) -> BsonResult<()> {
        ctx.writer().write_value(value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<BsonValue> {
        ctx.reader().read_value()
    }
}

pub struct DocumentSerializer;

impl BsonSerializer<Document> for DocumentSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &Document) -> BsonResult<()> {
        ctx.writer().write_document(value)
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<Document> {
        match ctx.current_bson_type()? {
            ElementType::Document => ctx.reader().read_document(),
            other => Err(BsonError::unexpected_type("Document", other)),
        }
    }
}

/// 子文档不解码, 按原始字节透传
pub struct RawDocumentSerializer;

impl BsonSerializer<RawDocumentBuf> for RawDocumentSerializer {
    fn serialize(&self, ctx: &mut SerializationContext<'_>, value: &RawDocumentBuf) -> BsonResult<()> {
        ctx.writer().write_raw_document(value.as_bytes())
    }

    fn deserialize(&self, ctx: &mut DeserializationContext<'_>) -> BsonResult<RawDocumentBuf> {
        match ctx.current_bson_type()? {
            ElementType::Document => RawDocumentBuf::from_bytes(ctx.reader().read_raw_document()?),
            other => Err(BsonError::unexpected_type("RawDocumentBuf", other)),
        }
    }
}

macro_rules! plain_mapped {
    ($($t:ty => $serializer:expr),* $(,)?) => {
        $(
            impl BsonMapped for $t {
                fn create_serializer(
                    _registry: &SerializerRegistry,
                    options: Option<&SerializationOptions>,
                ) -> BsonResult<SerializerRef> {
                    reject_options::<$t>(options)?;
                    Ok(erase::<$t, _>($serializer))
                }
            }
        )*
    };
}

plain_mapped! {
    Timestamp => TimestampSerializer,
    Regex => RegexSerializer,
    Binary => BinarySerializer,
    Bytes => BytesSerializer,
    BsonValue => BsonValueSerializer,
    Document => DocumentSerializer,
    RawDocumentBuf => RawDocumentSerializer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::serialization::SerializerRegistry;

    fn round_trip<T: BsonMapped>(
        registry: &SerializerRegistry,
        value: &T,
        options: Option<&SerializationOptions>,
    ) -> (BsonValue, T) {
        let serializer = registry.lookup_with_options::<T>(options).unwrap();
        let mut writer = crate::io::BinaryWriter::new();
        {
            let mut ctx = SerializationContext::new(&mut writer, registry);
            ctx.writer().write_start_document().unwrap();
            ctx.writer().write_name("v").unwrap();
            crate::serialization::serialize_value(&*serializer, &mut ctx, value).unwrap();
            ctx.writer().write_end_document().unwrap();
        }
        let bytes = writer.into_vec();
        let doc = Document::from_slice(&bytes).unwrap();
        let mut reader = crate::io::BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        reader.read_bson_type().unwrap();
        reader.read_name().unwrap();
        let mut ctx = DeserializationContext::new(&mut reader, registry);
        let back = crate::serialization::deserialize_value::<T>(&*serializer, &mut ctx).unwrap();
        (doc.get("v").cloned().unwrap_or_default(), back)
    }

    #[test]
    fn test_numeric_defaults() {
        let registry = SerializerRegistry::new();
        assert_eq!(round_trip(&registry, &7i32, None), (BsonValue::Int32(7), 7));
        assert_eq!(round_trip(&registry, &7u32, None), (BsonValue::Int64(7), 7));
        assert_eq!(round_trip(&registry, &1.5f32, None), (BsonValue::Double(1.5), 1.5));
    }

    #[test]
    fn test_numeric_representation() {
        let registry = SerializerRegistry::new();
        let as_string = SerializationOptions::representation(ElementType::String);
        assert_eq!(
            round_trip(&registry, &42i64, Some(&as_string)),
            (BsonValue::String("42".to_string()), 42)
        );
        let as_decimal = SerializationOptions::representation(ElementType::Decimal128);
        let (stored, back) = round_trip(&registry, &2.5f64, Some(&as_decimal));
        assert_eq!(stored, BsonValue::Decimal128(Decimal128::parse("2.5").unwrap()));
        assert_eq!(back, 2.5);
    }

    #[test]
    fn test_overflow_and_truncation() {
        let registry = SerializerRegistry::new();
        let int32 = SerializationOptions::representation(ElementType::Int32);
        let serializer = registry.lookup_with_options::<i64>(Some(&int32)).unwrap();
        let mut writer = crate::io::BinaryWriter::new();
        let mut ctx = SerializationContext::new(&mut writer, &registry);
        ctx.writer().write_start_document().unwrap();
        ctx.writer().write_name("v").unwrap();
        let err = crate::serialization::serialize_value(&*serializer, &mut ctx, &(i64::MAX)).unwrap_err();
        assert!(matches!(err, BsonError::OutOfRange(_)));

        let lenient = SerializationOptions::Representation(
            RepresentationOptions::new(ElementType::Int32).with_allow_overflow(true),
        );
        let (stored, _) = round_trip(&registry, &(1i64 << 32 | 5), Some(&lenient));
        assert_eq!(stored, BsonValue::Int32(5));

        let conv = RepresentationOptions::new(ElementType::Int32);
        assert!(i32::from_number(Number::Float(1.5), &conv).is_err());
        assert_eq!(
            i32::from_number(Number::Float(1.5), &conv.with_allow_truncation(true)).unwrap(),
            1
        );
        assert!(f32::from_number(Number::Float(0.1), &conv).is_err());
    }

    #[test]
    fn test_unsupported_options() {
        let registry = SerializerRegistry::new();
        let opts = SerializationOptions::representation(ElementType::Binary);
        assert!(matches!(
            registry.lookup_with_options::<i32>(Some(&opts)),
            Err(BsonError::UnsupportedOptions { .. })
        ));
        let dt = SerializationOptions::date_time(DateTimeRepresentation::Int64);
        assert!(registry.lookup_with_options::<Document>(Some(&dt)).is_err());
    }

    #[test]
    fn test_object_id_as_string() {
        let registry = SerializerRegistry::new();
        let oid = ObjectId::parse("507f1f77bcf86cd799439011").unwrap();
        let opts = SerializationOptions::representation(ElementType::String);
        let (stored, back) = round_trip(&registry, &oid, Some(&opts));
        assert_eq!(stored, BsonValue::String("507f1f77bcf86cd799439011".to_string()));
        assert_eq!(back, oid);
        let as_oid = SerializationOptions::representation(ElementType::ObjectId);
        let (stored, back) = round_trip(&registry, &oid.to_hex(), Some(&as_oid));
        assert_eq!(stored, BsonValue::ObjectId(oid));
        assert_eq!(back, oid.to_hex());
    }

    #[test]
    fn test_guid_representations() {
        let registry = SerializerRegistry::new();
        let uuid = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let (stored, back) = round_trip(&registry, &uuid, None);
        assert_eq!(stored.as_binary().map(|b| b.subtype), Some(crate::BinarySubtype::Uuid));
        assert_eq!(back, uuid);

        let legacy = SerializationOptions::guid(docwire_common::GuidRepresentation::CSharpLegacy);
        let (stored, back) = round_trip(&registry, &uuid, Some(&legacy));
        let bin = stored.as_binary().unwrap();
        assert_eq!(bin.subtype, crate::BinarySubtype::UuidOld);
        assert_eq!(bin.bytes[0], 0x33);
        assert_eq!(back, uuid);
    }

    #[test]
    fn test_date_time_representations() {
        let registry = SerializerRegistry::new();
        let dt = BsonDateTime::from_millis(1_000);
        let ticks = SerializationOptions::date_time(DateTimeRepresentation::Int64);
        let (stored, back) = round_trip(&registry, &dt, Some(&ticks));
        assert_eq!(stored, BsonValue::Int64(621_355_968_010_000_000));
        assert_eq!(back, dt);

        let document = SerializationOptions::date_time(DateTimeRepresentation::Document);
        let (stored, back) = round_trip(&registry, &dt, Some(&document));
        let stored = stored.as_document().cloned().unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["DateTime", "Ticks"]);
        assert_eq!(back, dt);

        let date_only = SerializationOptions::DateTime(DateTimeOptions {
            representation: DateTimeRepresentation::String,
            date_only: true,
        });
        let day = BsonDateTime::from_millis(MILLIS_PER_DAY * 3);
        let (stored, back) = round_trip(&registry, &day, Some(&date_only));
        assert_eq!(stored, BsonValue::String("1970-01-04".to_string()));
        assert_eq!(back, day);
    }

    #[test]
    fn test_date_only_rejects_time_of_day() {
        let registry = SerializerRegistry::new();
        let date_only = SerializationOptions::DateTime(DateTimeOptions {
            representation: DateTimeRepresentation::DateTime,
            date_only: true,
        });
        let serializer = registry.lookup_with_options::<BsonDateTime>(Some(&date_only)).unwrap();
        let mut writer = crate::io::BinaryWriter::new();
        let mut ctx = SerializationContext::new(&mut writer, &registry);
        ctx.writer().write_start_document().unwrap();
        ctx.writer().write_name("v").unwrap();
        let value = BsonDateTime::from_millis(5);
        assert!(crate::serialization::serialize_value(&*serializer, &mut ctx, &value).is_err());
    }

    #[test]
    fn test_chrono_out_of_range() {
        let registry = SerializerRegistry::new();
        let value = BsonDateTime::from_millis(crate::datetime::DATE_TIME_MAX_MILLIS);
        let (_, back) = round_trip(&registry, &value, None);
        assert_eq!(back, value);
        let doc = doc! { "v": (BsonValue::DateTime(BsonDateTime::from_millis(i64::MAX))) };
        let bytes = doc.to_vec().unwrap();
        let mut reader = crate::io::BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        reader.read_bson_type().unwrap();
        reader.read_name().unwrap();
        let mut ctx = DeserializationContext::new(&mut reader, &registry);
        let err = ctx.deserialize::<DateTime<Utc>>().unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Range);
    }

    #[test]
    fn test_decimal_and_bytes() {
        let registry = SerializerRegistry::new();
        let d = Decimal::from_str("12.345").unwrap();
        let (stored, back) = round_trip(&registry, &d, None);
        assert!(matches!(stored, BsonValue::Decimal128(_)));
        assert_eq!(back, d);
        let bytes = Bytes::from_static(b"abc");
        let (stored, back) = round_trip(&registry, &bytes, None);
        assert_eq!(stored.as_binary().map(|b| b.bytes.clone()), Some(b"abc".to_vec()));
        assert_eq!(back, bytes);
    }

    fn read_element<T: BsonMapped>(registry: &SerializerRegistry, doc: &Document) -> BsonResult<T> {
        let bytes = doc.to_vec().unwrap();
        let mut reader = crate::io::BinaryReader::new(&bytes);
        reader.read_start_document().unwrap();
        reader.read_bson_type().unwrap();
        reader.read_name().unwrap();
        let mut ctx = DeserializationContext::new(&mut reader, registry);
        ctx.deserialize::<T>()
    }

    #[test]
    fn test_type_mismatch() {
        let registry = SerializerRegistry::new();
        let (stored, _) = round_trip(&registry, &"text".to_string(), None);
        assert_eq!(stored, BsonValue::String("text".to_string()));
        assert!(matches!(
            read_element::<i32>(&registry, &doc! { "v": true }),
            Err(BsonError::UnexpectedBsonType { .. })
        ));
        assert!(matches!(
            read_element::<String>(&registry, &doc! { "v": 1 }),
            Err(BsonError::UnexpectedBsonType { .. })
        ));
    }

    #[test]
    fn test_numbers_read_from_strings() {
        let registry = SerializerRegistry::new();
        assert_eq!(read_element::<i32>(&registry, &doc! { "v": "42" }).unwrap(), 42);
        assert!(matches!(
            read_element::<i32>(&registry, &doc! { "v": "text" }),
            Err(BsonError::OutOfRange(_))
        ));
    }
}
