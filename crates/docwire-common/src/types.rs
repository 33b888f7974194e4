//! 公共类型定义模块
//!
//! 定义 docwire 的核心类型:
//! - ObjectId: 12 字节唯一标识符 (4 字节秒级时间戳 + 5 字节进程随机值 + 3 字节计数器)
//! - CollectionName / DatabaseName: 带验证的名称
//! - Namespace: "db.collection" 形式的完整命名空间

use crate::error::{DocwireError, DocwireResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Once, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

const COUNTER_MASK: u32 = 0x00FF_FFFF;

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);
static COUNTER_SEED: Once = Once::new();
static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 字节 0..4: 秒级时间戳(大端)
/// - 字节 4..9: 进程内固定的随机值
/// - 字节 9..12: 原子递增计数器(大端, 2^24 回绕)
///
/// 字节序按大端排列, 因此按字节比较即近似按生成时间排序。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// 全零 ObjectId, 表示 "未赋值"
    pub const EMPTY: ObjectId = ObjectId([0u8; 12]);

    /// 生成新的 ObjectId
    pub fn new() -> Self {
        Self::generate_new_id()
    }

    /// # Brief
    /// 使用当前时间生成新的 ObjectId
    ///
    /// 同一进程内并发调用只通过原子计数器协调, 不加锁。
    ///
    /// # Returns
    /// 新的 ObjectId
    pub fn generate_new_id() -> Self {
        Self::generate_with_timestamp(unix_seconds())
    }

    /// 使用指定时间戳生成 ObjectId, 随机值与计数器仍取自进程状态
    pub fn generate_with_timestamp(timestamp: u32) -> Self {
        Self::from_parts(timestamp, process_unique(), next_counter())
    }

    /// # Brief
    /// 由各组成部分拼装 ObjectId
    ///
    /// # Arguments
    /// * `timestamp` - 秒级时间戳
    /// * `random` - 5 字节随机值
    /// * `counter` - 计数器, 仅取低 24 位
    pub fn from_parts(timestamp: u32, random: [u8; 5], counter: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..12].copy_from_slice(&(counter & COUNTER_MASK).to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 12]
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn random_value(&self) -> [u8; 5] {
        [self.0[4], self.0[5], self.0[6], self.0[7], self.0[8]]
    }

    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.0[9], self.0[10], self.0[11]])
    }

    /// ObjectId 中嵌入的创建时间(秒精度)
    pub fn creation_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.timestamp()), 0)
            .single()
            .unwrap_or_default()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// # Brief
    /// 从 24 位十六进制字符串解析 ObjectId
    ///
    /// # Arguments
    /// * `s` - 十六进制字符串, 大小写均可
    ///
    /// # Returns
    /// 成功返回 ObjectId, 长度或字符非法返回 InvalidObjectId
    pub fn parse(s: &str) -> DocwireResult<Self> {
        if s.len() != 24 {
            return Err(DocwireError::InvalidObjectId(format!(
                "'{}' is not a valid 24 digit hex string",
                s
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| DocwireError::InvalidObjectId(format!("Invalid hex '{}': {}", s, e)))?;
        let mut arr = [0u8; 12];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl FromStr for ObjectId {
    type Err = DocwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

/// 进程内固定的 5 字节随机值
///
/// 由操作系统熵与进程号、启动时刻混合后经 xxh3 压缩得到, 首次调用时计算。
pub fn process_unique() -> [u8; 5] {
    *PROCESS_UNIQUE.get_or_init(|| {
        let entropy: [u8; 8] = random_bytes();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut seed = Vec::with_capacity(20);
        seed.extend_from_slice(&entropy);
        seed.extend_from_slice(&std::process::id().to_le_bytes());
        seed.extend_from_slice(&nanos.to_le_bytes());
        let hash = xxhash_rust::xxh3::xxh3_64(&seed).to_be_bytes();
        [hash[3], hash[4], hash[5], hash[6], hash[7]]
    })
}

fn next_counter() -> u32 {
    COUNTER_SEED.call_once(|| {
        let seed: [u8; 4] = random_bytes();
        OBJECT_ID_COUNTER.store(u32::from_le_bytes(seed) & COUNTER_MASK, Ordering::Relaxed);
    });
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & COUNTER_MASK
}

fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// 读取 N 字节随机数
///
/// 优先使用 /dev/urandom, 不可用时退化为 RandomState 哈希。
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    #[cfg(unix)]
    {
        use std::fs::File;
        use std::io::Read;
        if let Ok(mut f) = File::open("/dev/urandom") {
            if f.read_exact(&mut bytes).is_ok() {
                return bytes;
            }
        }
    }
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let state = RandomState::new();
    for (i, chunk) in bytes.chunks_mut(8).enumerate() {
        let mut hasher = state.build_hasher();
        hasher.write_usize(i);
        let hash = hasher.finish().to_le_bytes();
        let len = chunk.len();
        chunk.copy_from_slice(&hash[..len]);
    }
    bytes
}

/// 集合名称
///
/// 禁止空名称、null 字符与 '$'。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> DocwireResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DocwireError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if name.contains('\0') {
            return Err(DocwireError::Validation(
                "Collection name cannot contain null character".to_string(),
            ));
        }
        if name.contains('$') {
            return Err(DocwireError::Validation(format!(
                "Collection name '{}' cannot contain '$'",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 数据库名称
///
/// 限制:
/// - 不能为空
/// - 最大 64 字节
/// - 不能包含 `/\. "$*<>:|?` 与 null 字符
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseName(String);

impl DatabaseName {
    const INVALID_CHARS: &'static [char] =
        &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

    pub fn new(name: impl Into<String>) -> DocwireResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DocwireError::Validation(
                "Database name cannot be empty".to_string(),
            ));
        }
        if name.len() > 64 {
            return Err(DocwireError::Validation(
                "Database name cannot exceed 64 bytes".to_string(),
            ));
        }
        if let Some(c) = name.chars().find(|c| Self::INVALID_CHARS.contains(c)) {
            return Err(DocwireError::Validation(format!(
                "Database name '{}' contains invalid character {:?}",
                name, c
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 集合命名空间 "database.collection"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: DatabaseName,
    pub collection: CollectionName,
}

impl Namespace {
    pub fn new(database: DatabaseName, collection: CollectionName) -> Self {
        Self {
            database,
            collection,
        }
    }

    /// 以第一个 '.' 拆分完整命名空间, 集合名可以继续包含 '.'
    pub fn parse(full_name: &str) -> DocwireResult<Self> {
        let (db, coll) = full_name.split_once('.').ok_or_else(|| {
            DocwireError::Validation(format!("'{}' is not a valid namespace", full_name))
        })?;
        Ok(Self {
            database: DatabaseName::new(db)?,
            collection: CollectionName::new(coll)?,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_object_id_layout() {
        let id = ObjectId::from_parts(0x01020304, [5, 6, 7, 8, 9], 0x0A0B0C);
        assert_eq!(
            id.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0A, 0x0B, 0x0C]
        );
        assert_eq!(id.timestamp(), 0x01020304);
        assert_eq!(id.random_value(), [5, 6, 7, 8, 9]);
        assert_eq!(id.counter(), 0x0A0B0C);
    }

    #[test]
    fn test_counter_wraps_at_24_bits() {
        let id = ObjectId::from_parts(0, [0; 5], 0x0100_0001);
        assert_eq!(id.counter(), 1);
    }

    #[test]
    fn test_same_second_ids_differ() {
        let a = ObjectId::generate_with_timestamp(1_700_000_000);
        let b = ObjectId::generate_with_timestamp(1_700_000_000);
        assert_ne!(a, b);
        assert_eq!(a.random_value(), b.random_value());
        assert_ne!(a.counter(), b.counter());
    }

    #[test]
    fn test_concurrent_generation_unique() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| (0..1000).map(|_| ObjectId::new()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let parsed: ObjectId = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(ObjectId::parse("xyz").is_err());
        assert!(ObjectId::parse("zz0000000000000000000000").is_err());
    }

    #[test]
    fn test_empty_and_default() {
        assert!(ObjectId::default().is_empty());
        assert!(!ObjectId::new().is_empty());
    }

    #[test]
    fn test_creation_time() {
        let id = ObjectId::from_parts(86_400, [0; 5], 0);
        assert_eq!(id.creation_time().timestamp(), 86_400);
    }

    #[test]
    fn test_names() {
        assert!(CollectionName::new("users").is_ok());
        assert!(CollectionName::new("system.users").is_ok());
        assert!(CollectionName::new("").is_err());
        assert!(CollectionName::new("a$b").is_err());
        assert!(DatabaseName::new("app").is_ok());
        assert!(DatabaseName::new("a.b").is_err());
        assert!(DatabaseName::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_namespace_parse() {
        let ns = Namespace::parse("app.users.archive").unwrap();
        assert_eq!(ns.database.as_str(), "app");
        assert_eq!(ns.collection.as_str(), "users.archive");
        assert_eq!(ns.full_name(), "app.users.archive");
        assert!(Namespace::parse("nodot").is_err());
    }
}
