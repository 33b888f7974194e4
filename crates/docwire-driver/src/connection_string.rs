//! 连接字符串解析模块
//!
//! 解析 `mongodb://[user[:password]@]host1[:port1][,host2...][/database][?options]`。
//! 选项名不区分大小写, 未知选项记录警告后忽略, 已知选项的值非法时报错。

use crate::{DriverError, DriverResult};
use docwire_common::GuidRepresentation;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const SCHEME: &str = "mongodb";
pub const SRV_SCHEME: &str = "mongodb+srv";

/// 解析后的连接字符串
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub scheme: String,
    pub hosts: Vec<Host>,
    pub database: Option<String>,
    pub credentials: Option<Credentials>,
    pub options: ConnectionOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub address: String,
    pub port: u16,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: crate::DEFAULT_PORT,
        }
    }
}

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    pub fn localhost() -> Self {
        Self::default()
    }

    /// # Brief
    /// 解析 `host[:port]`, 支持 `[::1]:27017` 形式的 IPv6 地址
    fn parse(text: &str) -> DriverResult<Self> {
        if text.is_empty() {
            return Err(invalid("empty host"));
        }
        let (address, port) = if let Some(rest) = text.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| invalid(format!("unterminated IPv6 address '{}'", text)))?;
            let port = match &rest[end + 1..] {
                "" => None,
                p => Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| invalid(format!("invalid host '{}'", text)))?,
                ),
            };
            (&rest[..end], port)
        } else {
            match text.rsplit_once(':') {
                Some((address, port)) => (address, Some(port)),
                None => (text, None),
            }
        };
        let port = match port {
            None => crate::DEFAULT_PORT,
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(format!("invalid port '{}' in host '{}'", p, text)))?,
        };
        Ok(Host::new(address.to_ascii_lowercase(), port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub auth_source: Option<String>,
    pub auth_mechanism: Option<AuthMechanism>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    ScramSha1,
    ScramSha256,
    Plain,
    X509,
    GssApi,
}

impl FromStr for AuthMechanism {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCRAM-SHA-1" => Ok(Self::ScramSha1),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "PLAIN" => Ok(Self::Plain),
            "MONGODB-X509" => Ok(Self::X509),
            "GSSAPI" => Ok(Self::GssApi),
            _ => Err(invalid(format!("unknown authMechanism '{}'", s))),
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::Plain => "PLAIN",
            Self::X509 => "MONGODB-X509",
            Self::GssApi => "GSSAPI",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    pub replica_set: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub socket_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    pub heartbeat_frequency: Option<Duration>,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    pub max_idle_time: Option<Duration>,
    pub wait_queue_timeout: Option<Duration>,
    pub retry_writes: Option<bool>,
    pub retry_reads: Option<bool>,
    pub direct_connection: Option<bool>,
    pub tls: Option<TlsOptions>,
    pub compressors: Vec<String>,
    pub app_name: Option<String>,
    pub read_preference: Option<ReadPreference>,
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    pub guid_representation: Option<GuidRepresentation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub certificate_key_file: Option<String>,
    pub allow_invalid_certificates: bool,
    pub allow_invalid_hostnames: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl FromStr for ReadPreferenceMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(invalid(format!("unknown readPreference '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    /// 每组标签按 `key:value` 对列出
    pub tag_sets: Vec<Vec<(String, String)>>,
    pub max_staleness: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcern {
    Local,
    Available,
    Majority,
    Linearizable,
    Snapshot,
}

impl FromStr for ReadConcern {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "available" => Ok(Self::Available),
            "majority" => Ok(Self::Majority),
            "linearizable" => Ok(Self::Linearizable),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(invalid(format!("unknown readConcernLevel '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteConcern {
    pub w: Option<WriteConcernLevel>,
    pub journal: Option<bool>,
    pub w_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteConcernLevel {
    Nodes(u32),
    Majority,
    Tag(String),
}

impl ConnectionString {
    /// # Brief
    /// 解析连接字符串
    ///
    /// # Arguments
    /// * `uri` - `mongodb://` 或 `mongodb+srv://` 开头的字符串
    ///
    /// # Returns
    /// 格式错误时返回 `DriverError::InvalidConnectionString`
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme separator '://'"))?;
        if scheme != SCHEME && scheme != SRV_SCHEME {
            return Err(invalid(format!("unsupported scheme '{}'", scheme)));
        }

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => {
                if rest.contains('?') {
                    return Err(invalid("options must follow a '/' after the host list"));
                }
                (rest, None)
            }
        };

        let (user_info, host_list) = match authority.rfind('@') {
            Some(pos) => (Some(&authority[..pos]), &authority[pos + 1..]),
            None => (None, authority),
        };

        let mut credentials = match user_info {
            Some(info) => Some(parse_credentials(info)?),
            None => None,
        };

        let hosts = host_list
            .split(',')
            .map(Host::parse)
            .collect::<DriverResult<Vec<_>>>()?;
        if scheme == SRV_SCHEME {
            if hosts.len() != 1 {
                return Err(invalid("mongodb+srv requires exactly one host"));
            }
            if host_list.contains(':') {
                return Err(invalid("mongodb+srv host must not include a port"));
            }
        }

        let (database, query) = match path {
            Some(path) => match path.split_once('?') {
                Some((db, query)) => (db, Some(query)),
                None => (path, None),
            },
            None => ("", None),
        };
        let database = if database.is_empty() {
            None
        } else {
            let database = percent_decode(database)?;
            if database.contains(|c: char| matches!(c, '/' | '\\' | ' ' | '"' | '$' | '.')) {
                return Err(invalid(format!("invalid database name '{}'", database)));
            }
            Some(database)
        };

        let mut options = ConnectionOptions::default();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid(format!("option '{}' has no value", pair)))?;
                let value = percent_decode(value)?;
                apply_option(&mut options, &mut credentials, key, &value)?;
            }
        }

        if options.direct_connection == Some(true) && hosts.len() > 1 {
            return Err(invalid("directConnection=true cannot be used with multiple hosts"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            hosts,
            database,
            credentials,
            options,
        })
    }

    pub fn is_srv(&self) -> bool {
        self.scheme == SRV_SCHEME
    }

    /// 认证数据库: 显式 authSource, 否则为路径中的数据库, 再否则为 admin
    pub fn auth_source(&self) -> &str {
        self.credentials
            .as_ref()
            .and_then(|c| c.auth_source.as_deref())
            .or(self.database.as_deref())
            .unwrap_or("admin")
    }

    /// 输出规范形式, 仅包含主机、凭据、数据库与副本集名
    pub fn to_uri(&self) -> String {
        let mut uri = format!("{}://", self.scheme);

        if let Some(creds) = &self.credentials {
            uri.push_str(&percent_encode(&creds.username));
            if let Some(pwd) = &creds.password {
                uri.push(':');
                uri.push_str(&percent_encode(pwd));
            }
            uri.push('@');
        }

        let hosts: Vec<String> = self.hosts.iter().map(|h| h.to_string()).collect();
        uri.push_str(&hosts.join(","));
        uri.push('/');

        if let Some(db) = &self.database {
            uri.push_str(db);
        }
        if let Some(rs) = &self.options.replica_set {
            uri.push_str("?replicaSet=");
            uri.push_str(&percent_encode(rs));
        }

        uri
    }
}

impl FromStr for ConnectionString {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn invalid(message: impl Into<String>) -> DriverError {
    DriverError::InvalidConnectionString(message.into())
}

fn parse_credentials(info: &str) -> DriverResult<Credentials> {
    let (username, password) = match info.split_once(':') {
        Some((user, pwd)) => (user, Some(pwd)),
        None => (info, None),
    };
    for part in std::iter::once(username).chain(password) {
        if part.contains(|c: char| matches!(c, ':' | '/' | '?' | '#' | '[' | ']' | '@')) {
            return Err(invalid("username and password must be percent-encoded"));
        }
    }
    let username = percent_decode(username)?;
    if username.is_empty() {
        return Err(invalid("username must not be empty"));
    }
    Ok(Credentials {
        username,
        password: password.map(percent_decode).transpose()?,
        auth_source: None,
        auth_mechanism: None,
    })
}

fn apply_option(
    options: &mut ConnectionOptions,
    credentials: &mut Option<Credentials>,
    key: &str,
    value: &str,
) -> DriverResult<()> {
    match key.to_ascii_lowercase().as_str() {
        "replicaset" => options.replica_set = Some(value.to_string()),
        "connecttimeoutms" => options.connect_timeout = Some(parse_millis(key, value)?),
        "sockettimeoutms" => options.socket_timeout = Some(parse_millis(key, value)?),
        "serverselectiontimeoutms" => {
            options.server_selection_timeout = Some(parse_millis(key, value)?)
        }
        "heartbeatfrequencyms" => options.heartbeat_frequency = Some(parse_millis(key, value)?),
        "maxidletimems" => options.max_idle_time = Some(parse_millis(key, value)?),
        "waitqueuetimeoutms" => options.wait_queue_timeout = Some(parse_millis(key, value)?),
        "maxpoolsize" => options.max_pool_size = Some(parse_number(key, value)?),
        "minpoolsize" => options.min_pool_size = Some(parse_number(key, value)?),
        "retrywrites" => options.retry_writes = Some(parse_bool(key, value)?),
        "retryreads" => options.retry_reads = Some(parse_bool(key, value)?),
        "directconnection" => options.direct_connection = Some(parse_bool(key, value)?),
        "tls" | "ssl" => tls(options).enabled = parse_bool(key, value)?,
        "tlscafile" => tls(options).ca_file = Some(value.to_string()),
        "tlscertificatekeyfile" => tls(options).certificate_key_file = Some(value.to_string()),
        "tlsallowinvalidcertificates" => {
            tls(options).allow_invalid_certificates = parse_bool(key, value)?
        }
        "tlsallowinvalidhostnames" => {
            tls(options).allow_invalid_hostnames = parse_bool(key, value)?
        }
        "tlsinsecure" => {
            let insecure = parse_bool(key, value)?;
            let tls = tls(options);
            tls.allow_invalid_certificates = insecure;
            tls.allow_invalid_hostnames = insecure;
        }
        "compressors" => {
            options.compressors = value
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        }
        "appname" => options.app_name = Some(value.to_string()),
        "readpreference" => {
            read_preference(options).mode = value.parse()?;
        }
        "readpreferencetags" => {
            let mut set = Vec::new();
            for tag in value.split(',').filter(|t| !t.is_empty()) {
                let (k, v) = tag
                    .split_once(':')
                    .ok_or_else(|| invalid(format!("invalid readPreferenceTags '{}'", value)))?;
                set.push((k.to_string(), v.to_string()));
            }
            read_preference(options).tag_sets.push(set);
        }
        "maxstalenessseconds" => {
            let seconds: i64 = parse_number(key, value)?;
            // -1 表示不限制
            read_preference(options).max_staleness = if seconds < 0 {
                None
            } else {
                Some(Duration::from_secs(seconds as u64))
            };
        }
        "readconcernlevel" => options.read_concern = Some(value.parse()?),
        "w" => {
            let level = if value == "majority" {
                WriteConcernLevel::Majority
            } else if let Ok(n) = value.parse() {
                WriteConcernLevel::Nodes(n)
            } else {
                WriteConcernLevel::Tag(value.to_string())
            };
            write_concern(options).w = Some(level);
        }
        "journal" | "j" => write_concern(options).journal = Some(parse_bool(key, value)?),
        "wtimeoutms" => write_concern(options).w_timeout = Some(parse_millis(key, value)?),
        "uuidrepresentation" => {
            let representation = GuidRepresentation::from_str(value)
                .map_err(|_| invalid(format!("unknown uuidRepresentation '{}'", value)))?;
            options.guid_representation = Some(representation);
        }
        "authsource" => {
            credentials_for(credentials, key)?.auth_source = Some(value.to_string());
        }
        "authmechanism" => {
            credentials_for(credentials, key)?.auth_mechanism = Some(value.parse()?);
        }
        _ => warn!("Ignoring unknown connection string option {}", key),
    }
    Ok(())
}

fn tls(options: &mut ConnectionOptions) -> &mut TlsOptions {
    options.tls.get_or_insert_with(|| TlsOptions {
        enabled: true,
        ..Default::default()
    })
}

fn read_preference(options: &mut ConnectionOptions) -> &mut ReadPreference {
    options.read_preference.get_or_insert_with(ReadPreference::default)
}

fn write_concern(options: &mut ConnectionOptions) -> &mut WriteConcern {
    options.write_concern.get_or_insert_with(WriteConcern::default)
}

fn credentials_for<'a>(
    credentials: &'a mut Option<Credentials>,
    key: &str,
) -> DriverResult<&'a mut Credentials> {
    credentials
        .as_mut()
        .ok_or_else(|| invalid(format!("{} requires credentials", key)))
}

fn parse_bool(key: &str, value: &str) -> DriverResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(format!("{} must be true or false, got '{}'", key, value))),
    }
}

fn parse_number<N: FromStr>(key: &str, value: &str) -> DriverResult<N> {
    value
        .parse()
        .map_err(|_| invalid(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_millis(key: &str, value: &str) -> DriverResult<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

fn percent_decode(s: &str) -> DriverResult<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = s
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| invalid(format!("invalid percent-encoding in '{}'", s)))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| invalid(format!("percent-decoded '{}' is not UTF-8", s)))
}

fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
