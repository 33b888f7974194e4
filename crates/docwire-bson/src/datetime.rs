//! BSON 日期时间
//!
//! BSON DateTime 在线上是自 Unix 纪元起的毫秒数 (有符号 64 位)。
//! 可表示范围限定为 0001-01-01T00:00:00Z 到 9999-12-31T23:59:59.999Z,
//! 与 100 纳秒精度的 tick 表示保持一致。

use crate::{BsonError, BsonResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use std::fmt;

/// 最小可表示毫秒数 (0001-01-01T00:00:00Z)
pub const DATE_TIME_MIN_MILLIS: i64 = -62_135_596_800_000;

/// 最大可表示毫秒数 (9999-12-31T23:59:59.999Z)
pub const DATE_TIME_MAX_MILLIS: i64 = 253_402_300_799_999;

/// Unix 纪元对应的 tick 数
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// 最大 tick 数
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// BSON DateTime 值
///
/// 保存原始毫秒数, 线上出现的越界值也能原样往返;
/// 只有转换为 chrono 或 tick 时才做范围检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BsonDateTime(i64);

impl BsonDateTime {
    pub const MIN: BsonDateTime = BsonDateTime(DATE_TIME_MIN_MILLIS);
    pub const MAX: BsonDateTime = BsonDateTime(DATE_TIME_MAX_MILLIS);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0
    }

    pub fn is_in_range(&self) -> bool {
        (DATE_TIME_MIN_MILLIS..=DATE_TIME_MAX_MILLIS).contains(&self.0)
    }

    /// # Brief
    /// 转换为 chrono 时间
    ///
    /// # Returns
    /// 超出 0001..9999 年范围时返回 OutOfRange
    pub fn to_chrono(&self) -> BsonResult<DateTime<Utc>> {
        if !self.is_in_range() {
            return Err(BsonError::OutOfRange(format!(
                "{} milliseconds since the epoch is outside the representable DateTime range",
                self.0
            )));
        }
        Utc.timestamp_millis_opt(self.0).single().ok_or_else(|| {
            BsonError::OutOfRange(format!("{} is not a valid DateTime", self.0))
        })
    }

    /// 从 chrono 时间转换, 亚毫秒部分被截断
    pub fn from_chrono(dt: DateTime<Utc>) -> BsonResult<Self> {
        let value = Self(dt.timestamp_millis());
        if !value.is_in_range() {
            return Err(BsonError::OutOfRange(format!(
                "{} is outside the representable DateTime range",
                dt
            )));
        }
        Ok(value)
    }

    /// 转换为自 0001-01-01 起的 100 纳秒 tick 数
    pub fn to_ticks(&self) -> BsonResult<i64> {
        if !self.is_in_range() {
            return Err(BsonError::OutOfRange(format!(
                "{} milliseconds since the epoch cannot be converted to ticks",
                self.0
            )));
        }
        Ok(self.0 * TICKS_PER_MILLISECOND + UNIX_EPOCH_TICKS)
    }

    /// 从 tick 数转换, 亚毫秒部分向下取整
    pub fn from_ticks(ticks: i64) -> BsonResult<Self> {
        if !(0..=MAX_TICKS).contains(&ticks) {
            return Err(BsonError::OutOfRange(format!(
                "Ticks value {} is outside the range 0..={}",
                ticks, MAX_TICKS
            )));
        }
        Ok(Self((ticks - UNIX_EPOCH_TICKS).div_euclid(TICKS_PER_MILLISECOND)))
    }

    /// 按 ISO-8601 (毫秒精度, Z 结尾) 格式化
    pub fn to_iso_string(&self) -> BsonResult<String> {
        Ok(self
            .to_chrono()?
            .to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// 解析 ISO-8601 / RFC 3339 文本, 也接受仅含日期的 "yyyy-MM-dd"
    pub fn parse_iso(s: &str) -> BsonResult<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Self::from_chrono(dt.with_timezone(&Utc));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Self::from_chrono(Utc.from_utc_datetime(&naive));
            }
        }
        Err(BsonError::InvalidDocument(format!(
            "'{}' is not a valid ISO-8601 date",
            s
        )))
    }
}

impl From<DateTime<Utc>> for BsonDateTime {
    /// 超出范围的时间被钳制到边界
    fn from(dt: DateTime<Utc>) -> Self {
        Self(
            dt.timestamp_millis()
                .clamp(DATE_TIME_MIN_MILLIS, DATE_TIME_MAX_MILLIS),
        )
    }
}

impl fmt::Display for BsonDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_iso_string() {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_match_calendar() {
        let min = BsonDateTime::MIN.to_chrono().unwrap();
        assert_eq!(min.to_rfc3339_opts(SecondsFormat::Millis, true), "0001-01-01T00:00:00.000Z");
        let max = BsonDateTime::MAX.to_chrono().unwrap();
        assert_eq!(max.to_rfc3339_opts(SecondsFormat::Millis, true), "9999-12-31T23:59:59.999Z");
    }

    #[test]
    fn test_out_of_range() {
        let past_max = BsonDateTime::from_millis(DATE_TIME_MAX_MILLIS + 1);
        let err = past_max.to_chrono().unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Range);
        assert!(BsonDateTime::from_millis(DATE_TIME_MIN_MILLIS - 1).to_ticks().is_err());
        assert!(BsonDateTime::from_ticks(-1).is_err());
        assert!(BsonDateTime::from_ticks(MAX_TICKS + 1).is_err());
    }

    #[test]
    fn test_ticks() {
        let epoch = BsonDateTime::from_millis(0);
        assert_eq!(epoch.to_ticks().unwrap(), UNIX_EPOCH_TICKS);
        assert_eq!(BsonDateTime::MIN.to_ticks().unwrap(), 0);
        assert_eq!(BsonDateTime::from_ticks(MAX_TICKS).unwrap(), BsonDateTime::MAX);
        let dt = BsonDateTime::from_millis(1_700_000_000_123);
        assert_eq!(BsonDateTime::from_ticks(dt.to_ticks().unwrap()).unwrap(), dt);
    }

    #[test]
    fn test_iso_parse() {
        let dt = BsonDateTime::parse_iso("2011-03-18T14:27:53.123Z").unwrap();
        assert_eq!(dt.to_iso_string().unwrap(), "2011-03-18T14:27:53.123Z");
        let date = BsonDateTime::parse_iso("1970-01-02").unwrap();
        assert_eq!(date.timestamp_millis(), 86_400_000);
        assert!(BsonDateTime::parse_iso("yesterday").is_err());
    }
}
