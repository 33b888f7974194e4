//! id 生成器
//!
//! 插入文档前, 如果 id 成员为空则由生成器填充。生成器只通过原子计数器
//! 与进程级随机值协调, 并发插入不加锁。

use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use docwire_common::{process_unique, ObjectId};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// id 生成策略
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// # Brief
    /// 生成新的 id
    ///
    /// # Arguments
    /// * `container` - 文档将要写入的集合名
    /// * `document` - 待插入的文档
    fn generate_id(&self, container: Option<&str>, document: &dyn Any) -> BsonResult<Box<dyn Any>>;

    /// id 是否视为未赋值
    fn is_empty(&self, id: &dyn Any) -> bool;
}

/// `ObjectId` 类型的 id
#[derive(Debug, Default)]
pub struct ObjectIdGenerator;

impl IdGenerator for ObjectIdGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(ObjectId::new()))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<ObjectId>().map_or(true, |oid| oid.is_empty())
    }
}

/// `BsonValue` 类型的 id, 生成 ObjectId 值
#[derive(Debug, Default)]
pub struct BsonObjectIdGenerator;

impl IdGenerator for BsonObjectIdGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(BsonValue::ObjectId(ObjectId::new())))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        match id.downcast_ref::<BsonValue>() {
            None | Some(BsonValue::Null) | Some(BsonValue::Undefined) => true,
            Some(BsonValue::ObjectId(oid)) => oid.is_empty(),
            Some(_) => false,
        }
    }
}

/// 以十六进制字符串保存的 ObjectId
#[derive(Debug, Default)]
pub struct StringObjectIdGenerator;

impl IdGenerator for StringObjectIdGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(ObjectId::new().to_hex()))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<String>().map_or(true, |s| s.is_empty())
    }
}

/// 随机 (v4) GUID
#[derive(Debug, Default)]
pub struct GuidGenerator;

impl IdGenerator for GuidGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(Uuid::new_v4()))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<Uuid>().map_or(true, |u| u.is_nil())
    }
}

const COUNTER_MASK: u32 = 0x00FF_FFFF;
static ASCENDING_COUNTER: AtomicU32 = AtomicU32::new(0);

/// 按生成顺序递增的 GUID
///
/// 布局 (大端):
/// - 字节 0..8: .NET ticks
/// - 字节 8..13: 进程级随机值
/// - 字节 13..16: 24 位计数器
#[derive(Debug, Default)]
pub struct AscendingGuidGenerator;

impl AscendingGuidGenerator {
    /// 由各组成部分拼装 GUID
    pub fn generate_with(ticks: i64, machine: [u8; 5], counter: u32) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&ticks.to_be_bytes());
        bytes[8..13].copy_from_slice(&machine);
        bytes[13..16].copy_from_slice(&(counter & COUNTER_MASK).to_be_bytes()[1..4]);
        Uuid::from_bytes(bytes)
    }

    pub fn generate() -> BsonResult<Uuid> {
        let now = Utc::now();
        let ticks = crate::BsonDateTime::from_chrono(now)?.to_ticks()?
            + i64::from(now.timestamp_subsec_nanos() % 1_000_000) / 100;
        let counter = ASCENDING_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Ok(Self::generate_with(ticks, process_unique(), counter))
    }
}

impl IdGenerator for AscendingGuidGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(Self::generate()?))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<Uuid>().map_or(true, |u| u.is_nil())
    }
}

/// COMB GUID: 随机 GUID 的最后 6 字节替换为时间
///
/// 字节 10..12 为自 1900-01-01 起的天数, 字节 12..16 为当天时间 (1/300 秒)。
#[derive(Debug, Default)]
pub struct CombGuidGenerator;

impl CombGuidGenerator {
    /// # Brief
    /// 把时间写入给定 GUID 的末尾 6 字节
    ///
    /// # Arguments
    /// * `base` - 提供前 10 字节的 GUID
    /// * `timestamp` - 写入的时间, 早于 1900 年时报范围错误
    pub fn new_comb(base: Uuid, timestamp: DateTime<Utc>) -> BsonResult<Uuid> {
        let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)
            .ok_or_else(|| BsonError::OutOfRange("invalid COMB epoch".to_string()))?;
        let days = (timestamp.date_naive() - epoch).num_days();
        let days = u16::try_from(days).map_err(|_| {
            BsonError::OutOfRange(format!("{} is outside the COMB GUID date range", timestamp))
        })?;
        let time = timestamp.time();
        let millis = i64::from(time.num_seconds_from_midnight()) * 1000
            + i64::from(time.nanosecond() / 1_000_000);
        let fractions = (millis * 300 / 1000) as u32;

        let mut bytes = *base.as_bytes();
        bytes[10..12].copy_from_slice(&days.to_be_bytes());
        bytes[12..16].copy_from_slice(&fractions.to_be_bytes());
        Ok(Uuid::from_bytes(bytes))
    }
}

impl IdGenerator for CombGuidGenerator {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Ok(Box::new(Self::new_comb(Uuid::new_v4(), Utc::now())?))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<Uuid>().map_or(true, |u| u.is_nil())
    }
}

/// id 为 `Option<T>`, 由服务端赋值; 为 None 时插入失败
pub struct NullIdChecker<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for NullIdChecker<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for NullIdChecker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullIdChecker")
    }
}

impl<T: 'static> IdGenerator for NullIdChecker<T> {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Err(BsonError::Configuration("Id cannot be null".to_string()))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<Option<T>>().map_or(true, |v| v.is_none())
    }
}

/// id 为数值等类型, 等于默认值时插入失败
pub struct ZeroIdChecker<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for ZeroIdChecker<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ZeroIdChecker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ZeroIdChecker")
    }
}

impl<T: Default + PartialEq + 'static> IdGenerator for ZeroIdChecker<T> {
    fn generate_id(&self, _container: Option<&str>, _document: &dyn Any) -> BsonResult<Box<dyn Any>> {
        Err(BsonError::Configuration("Id cannot be default value".to_string()))
    }

    fn is_empty(&self, id: &dyn Any) -> bool {
        id.downcast_ref::<T>().map_or(true, |v| *v == T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn generate<G: IdGenerator>(generator: &G) -> Box<dyn Any> {
        generator.generate_id(Some("items"), &()).unwrap()
    }

    #[test]
    fn test_object_id_generator() {
        let generator = ObjectIdGenerator;
        let a = *generate(&generator).downcast::<ObjectId>().unwrap();
        let b = *generate(&generator).downcast::<ObjectId>().unwrap();
        assert_ne!(a, b);
        assert!(!generator.is_empty(&a));
        assert!(generator.is_empty(&ObjectId::EMPTY));
    }

    #[test]
    fn test_string_and_bson_generators() {
        let s = *generate(&StringObjectIdGenerator).downcast::<String>().unwrap();
        assert_eq!(s.len(), 24);
        assert!(StringObjectIdGenerator.is_empty(&String::new()));
        let v = *generate(&BsonObjectIdGenerator).downcast::<BsonValue>().unwrap();
        assert!(matches!(v, BsonValue::ObjectId(_)));
        assert!(BsonObjectIdGenerator.is_empty(&BsonValue::Null));
        assert!(!BsonObjectIdGenerator.is_empty(&BsonValue::Int32(0)));
    }

    #[test]
    fn test_ascending_guid_layout() {
        let guid = AscendingGuidGenerator::generate_with(
            0x0102_0304_0506_0708,
            [0x0a, 0x0b, 0x0c, 0x0d, 0x0e],
            0x0123_4567,
        );
        assert_eq!(
            guid.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x23, 0x45, 0x67]
        );
    }

    #[test]
    fn test_ascending_guid_ordering() {
        let a = AscendingGuidGenerator::generate().unwrap();
        let b = AscendingGuidGenerator::generate().unwrap();
        assert_ne!(a, b);
        assert!(a.as_bytes()[0..8] <= b.as_bytes()[0..8]);
    }

    #[test]
    fn test_comb_guid_layout() {
        let base = Uuid::from_bytes([0xff; 16]);
        let ts = Utc.with_ymd_and_hms(1900, 1, 2, 0, 0, 1).unwrap();
        let comb = CombGuidGenerator::new_comb(base, ts).unwrap();
        let bytes = comb.as_bytes();
        assert_eq!(&bytes[0..10], &[0xff; 10]);
        assert_eq!(&bytes[10..12], &[0, 1]);
        assert_eq!(&bytes[12..16], &300u32.to_be_bytes());

        let early = Utc.with_ymd_and_hms(1899, 12, 31, 0, 0, 0).unwrap();
        assert!(CombGuidGenerator::new_comb(base, early).is_err());
    }

    #[test]
    fn test_checkers() {
        let null = NullIdChecker::<i64>::default();
        assert!(null.is_empty(&None::<i64>));
        assert!(!null.is_empty(&Some(5i64)));
        assert!(null.generate_id(None, &()).is_err());
        let zero = ZeroIdChecker::<i32>::default();
        assert!(zero.is_empty(&0i32));
        assert!(!zero.is_empty(&7i32));
        assert!(zero.generate_id(None, &()).is_err());
    }
}
