//! IEEE 754-2008 decimal128 (BID 编码)
//!
//! 位布局 (高 64 位):
//! - bit 63: 符号
//! - bit 62..49: 14 位偏置指数 (偏置 6176), 系数高 49 位在其后
//! - 组合字段 11110 / 11111 分别表示 Infinity / NaN
//!
//! 线上按小端写出: 低 64 位在前, 高 64 位在后。

use crate::{BsonError, BsonResult};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

const EXPONENT_BIAS: i32 = 6176;
const EXPONENT_MAX: i32 = 6111;
const EXPONENT_MIN: i32 = -6176;
const MAX_SIGNIFICANT_DIGITS: usize = 34;
const MAX_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;

const SIGN_BIT: u64 = 1 << 63;
const INFINITY_HIGH: u64 = 0x7800_0000_0000_0000;
const NAN_HIGH: u64 = 0x7C00_0000_0000_0000;
const COEFFICIENT_HIGH_MASK: u64 = 0x0001_FFFF_FFFF_FFFF;

/// rust_decimal 的最大尾数 (96 位)
const RUST_DECIMAL_MAX_MANTISSA: u128 = (1u128 << 96) - 1;

/// decimal128 值
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    high: u64,
    low: u64,
}

/// 分解后的 decimal128
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decimal128Parts {
    NaN,
    Infinity { negative: bool },
    Finite {
        negative: bool,
        exponent: i32,
        coefficient: u128,
    },
}

impl Decimal128 {
    pub const NAN: Decimal128 = Decimal128 { high: NAN_HIGH, low: 0 };
    pub const INFINITY: Decimal128 = Decimal128 { high: INFINITY_HIGH, low: 0 };
    pub const NEG_INFINITY: Decimal128 = Decimal128 {
        high: INFINITY_HIGH | SIGN_BIT,
        low: 0,
    };
    pub const ZERO: Decimal128 = Decimal128 {
        high: (EXPONENT_BIAS as u64) << 49,
        low: 0,
    };

    /// 由 16 字节小端表示构造
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut low = [0u8; 8];
        let mut high = [0u8; 8];
        low.copy_from_slice(&bytes[0..8]);
        high.copy_from_slice(&bytes[8..16]);
        Self {
            high: u64::from_le_bytes(high),
            low: u64::from_le_bytes(low),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.low.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.high.to_le_bytes());
        bytes
    }

    pub fn from_bits(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub fn high_bits(&self) -> u64 {
        self.high
    }

    pub fn low_bits(&self) -> u64 {
        self.low
    }

    /// # Brief
    /// 由符号、指数、系数构造有限值
    ///
    /// # Arguments
    /// * `negative` - 符号
    /// * `exponent` - 未偏置指数, 范围 -6176..=6111
    /// * `coefficient` - 系数, 至多 34 位十进制
    pub fn from_parts(negative: bool, exponent: i32, coefficient: u128) -> BsonResult<Self> {
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(BsonError::OutOfRange(format!(
                "Decimal128 exponent {} is outside {}..={}",
                exponent, EXPONENT_MIN, EXPONENT_MAX
            )));
        }
        if coefficient > MAX_COEFFICIENT {
            return Err(BsonError::OutOfRange(format!(
                "Decimal128 coefficient {} has more than 34 digits",
                coefficient
            )));
        }
        let biased = (exponent + EXPONENT_BIAS) as u64;
        let mut high = ((coefficient >> 64) as u64) | (biased << 49);
        if negative {
            high |= SIGN_BIT;
        }
        Ok(Self {
            high,
            low: coefficient as u64,
        })
    }

    pub fn parts(&self) -> Decimal128Parts {
        let negative = self.high & SIGN_BIT != 0;
        let combination = (self.high >> 58) & 0x1F;
        if combination == 0x1F {
            return Decimal128Parts::NaN;
        }
        if combination == 0x1E {
            return Decimal128Parts::Infinity { negative };
        }
        if (self.high >> 61) & 0x3 == 0x3 {
            // 系数隐含 100 前缀, 必然超过 34 位, 按规范视为 0
            let exponent = ((self.high >> 47) & 0x3FFF) as i32 - EXPONENT_BIAS;
            return Decimal128Parts::Finite {
                negative,
                exponent,
                coefficient: 0,
            };
        }
        let exponent = ((self.high >> 49) & 0x3FFF) as i32 - EXPONENT_BIAS;
        let mut coefficient =
            (((self.high & COEFFICIENT_HIGH_MASK) as u128) << 64) | self.low as u128;
        if coefficient > MAX_COEFFICIENT {
            coefficient = 0;
        }
        Decimal128Parts::Finite {
            negative,
            exponent,
            coefficient,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self.parts(), Decimal128Parts::NaN)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.parts(), Decimal128Parts::Infinity { .. })
    }

    pub fn is_negative(&self) -> bool {
        self.high & SIGN_BIT != 0
    }

    /// # Brief
    /// 解析十进制文本
    ///
    /// 接受 "[+-]digits[.digits][(e|E)[+-]digits]"、"Infinity"/"Inf"、"NaN" (不区分大小写)。
    /// 超过 34 位有效数字且无法无损截去尾零时报错, 不做舍入。
    pub fn parse(s: &str) -> BsonResult<Self> {
        let invalid = || BsonError::InvalidDecimal128(format!("'{}' is not a valid Decimal128", s));

        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let lower = body.to_ascii_lowercase();
        match lower.as_str() {
            "inf" | "infinity" => {
                return Ok(if negative { Self::NEG_INFINITY } else { Self::INFINITY })
            }
            "nan" => return Ok(Self::NAN),
            _ => {}
        }

        let (mantissa, exponent_text) = match body.find(|c| c == 'e' || c == 'E') {
            Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
            None => (body, None),
        };
        let mut exponent: i64 = match exponent_text {
            Some(text) => {
                if text.is_empty() || text.len() > 12 {
                    return Err(invalid());
                }
                text.parse::<i64>().map_err(|_| invalid())?
            }
            None => 0,
        };

        let mut digits = String::with_capacity(mantissa.len());
        let mut seen_point = false;
        let mut fraction_digits: i64 = 0;
        for c in mantissa.chars() {
            match c {
                '0'..='9' => {
                    digits.push(c);
                    if seen_point {
                        fraction_digits += 1;
                    }
                }
                '.' if !seen_point => seen_point = true,
                _ => return Err(invalid()),
            }
        }
        if digits.is_empty() {
            return Err(invalid());
        }
        exponent -= fraction_digits;

        let mut significant = digits.trim_start_matches('0').to_string();
        if significant.is_empty() {
            // 零: 只需把指数钳制到合法范围
            let exponent = exponent.clamp(EXPONENT_MIN as i64, EXPONENT_MAX as i64) as i32;
            return Self::from_parts(negative, exponent, 0);
        }
        while significant.len() > MAX_SIGNIFICANT_DIGITS && significant.ends_with('0') {
            significant.pop();
            exponent += 1;
        }
        if significant.len() > MAX_SIGNIFICANT_DIGITS {
            return Err(BsonError::InvalidDecimal128(format!(
                "'{}' cannot be represented without rounding",
                s
            )));
        }
        let mut coefficient: u128 = significant.parse().map_err(|_| invalid())?;

        // 指数过大: 用尾零填充系数
        while exponent > EXPONENT_MAX as i64 && coefficient * 10 <= MAX_COEFFICIENT {
            coefficient *= 10;
            exponent -= 1;
        }
        // 指数过小: 去掉系数尾零
        while exponent < EXPONENT_MIN as i64 && coefficient % 10 == 0 {
            coefficient /= 10;
            exponent += 1;
        }
        if exponent > EXPONENT_MAX as i64 {
            return Err(BsonError::OutOfRange(format!("'{}' overflows Decimal128", s)));
        }
        if exponent < EXPONENT_MIN as i64 {
            return Err(BsonError::InvalidDecimal128(format!(
                "'{}' cannot be represented without rounding",
                s
            )));
        }
        Self::from_parts(negative, exponent as i32, coefficient)
    }
}

impl Default for Decimal128 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl FromStr for Decimal128 {
    type Err = BsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, exponent, coefficient) = match self.parts() {
            Decimal128Parts::NaN => return f.write_str("NaN"),
            Decimal128Parts::Infinity { negative: true } => return f.write_str("-Infinity"),
            Decimal128Parts::Infinity { negative: false } => return f.write_str("Infinity"),
            Decimal128Parts::Finite {
                negative,
                exponent,
                coefficient,
            } => (negative, exponent, coefficient),
        };

        let digits = coefficient.to_string();
        let adjusted = exponent + digits.len() as i32 - 1;
        let mut out = String::with_capacity(digits.len() + 8);
        if negative {
            out.push('-');
        }

        if exponent <= 0 && adjusted >= -6 {
            if exponent == 0 {
                out.push_str(&digits);
            } else {
                let point = digits.len() as i32 + exponent;
                if point > 0 {
                    let (int_part, frac_part) = digits.split_at(point as usize);
                    out.push_str(int_part);
                    out.push('.');
                    out.push_str(frac_part);
                } else {
                    out.push_str("0.");
                    for _ in 0..(-point) {
                        out.push('0');
                    }
                    out.push_str(&digits);
                }
            }
        } else {
            out.push_str(&digits[..1]);
            if digits.len() > 1 {
                out.push('.');
                out.push_str(&digits[1..]);
            }
            out.push('E');
            if adjusted >= 0 {
                out.push('+');
            }
            out.push_str(&adjusted.to_string());
        }
        f.write_str(&out)
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128(\"{}\")", self)
    }
}

impl From<i32> for Decimal128 {
    fn from(v: i32) -> Self {
        Self::from(i64::from(v))
    }
}

impl From<i64> for Decimal128 {
    fn from(v: i64) -> Self {
        let mut high = (EXPONENT_BIAS as u64) << 49;
        if v < 0 {
            high |= SIGN_BIT;
        }
        Self {
            high,
            low: v.unsigned_abs(),
        }
    }
}

impl From<Decimal> for Decimal128 {
    fn from(d: Decimal) -> Self {
        let coefficient = d.mantissa().unsigned_abs();
        let mut high = (((coefficient >> 64) as u64) & COEFFICIENT_HIGH_MASK)
            | (((EXPONENT_BIAS - d.scale() as i32) as u64) << 49);
        if d.is_sign_negative() {
            high |= SIGN_BIT;
        }
        Self {
            high,
            low: coefficient as u64,
        }
    }
}

impl TryFrom<Decimal128> for Decimal {
    type Error = BsonError;

    /// 仅当值可被 96 位尾数与 0..=28 小数位精确表示时成功
    fn try_from(value: Decimal128) -> Result<Self, Self::Error> {
        let (negative, mut exponent, mut coefficient) = match value.parts() {
            Decimal128Parts::Finite {
                negative,
                exponent,
                coefficient,
            } => (negative, exponent, coefficient),
            _ => {
                return Err(BsonError::OutOfRange(format!(
                    "{} cannot be converted to a decimal",
                    value
                )))
            }
        };
        let out_of_range =
            || BsonError::OutOfRange(format!("{} is outside the range of a decimal", value));

        while exponent > 0 {
            coefficient = coefficient.checked_mul(10).ok_or_else(out_of_range)?;
            exponent -= 1;
        }
        while exponent < -28 && coefficient % 10 == 0 && coefficient != 0 {
            coefficient /= 10;
            exponent += 1;
        }
        if coefficient == 0 {
            exponent = exponent.max(-28);
        }
        if exponent < -28 || coefficient > RUST_DECIMAL_MAX_MANTISSA {
            return Err(out_of_range());
        }
        let mut d = Decimal::try_from_i128_with_scale(coefficient as i128, (-exponent) as u32)
            .map_err(|_| out_of_range())?;
        d.set_sign_negative(negative);
        Ok(d)
    }
}
