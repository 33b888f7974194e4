//! 配置模块
//!
//! 定义编解码、序列化、JSON 输出与日志的配置项:
//! - CodecConfig: 文档大小/嵌套深度上限、GUID 表示法与旧格式修正
//! - SerializationConfig: 类映射序列化的全局行为
//! - JsonConfig: JSON 文本输出模式与缩进
//! - LogConfig: 日志级别与格式
//!
//! 支持从 TOML 文件加载配置。

use crate::error::{DocwireError, DocwireResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// 默认最大文档大小 (16 MiB)
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// 默认最大嵌套深度
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// GUID 的二进制表示方式
///
/// 各旧版驱动的字节序互不兼容, 写入前必须选定其一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GuidRepresentation {
    /// 未指定, 读写 GUID 时报错
    #[serde(rename = "unspecified")]
    Unspecified,
    /// RFC 4122 字节序, 子类型 4
    #[default]
    #[serde(rename = "standard")]
    Standard,
    /// .NET Guid.ToByteArray 字节序, 子类型 3
    #[serde(rename = "csharpLegacy")]
    CSharpLegacy,
    /// 前后 8 字节分别反转, 子类型 3
    #[serde(rename = "javaLegacy")]
    JavaLegacy,
    /// RFC 4122 字节序, 子类型 3
    #[serde(rename = "pythonLegacy")]
    PythonLegacy,
}

impl FromStr for GuidRepresentation {
    type Err = DocwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "standard" => Ok(Self::Standard),
            "csharplegacy" => Ok(Self::CSharpLegacy),
            "javalegacy" => Ok(Self::JavaLegacy),
            "pythonlegacy" => Ok(Self::PythonLegacy),
            other => Err(DocwireError::Config(format!(
                "Unknown GUID representation: {}",
                other
            ))),
        }
    }
}

/// JSON 文本输出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonOutputMode {
    /// 严格 JSON, 特殊类型用 $ 包装文档
    Strict,
    /// shell 语法, 如 ObjectId("...")、ISODate("...")
    #[default]
    Shell,
    /// 类型无损的扩展 JSON v2
    Canonical,
    /// 数值使用原生 JSON 的扩展 JSON v2
    Relaxed,
}

/// 元素名称派生方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementNaming {
    /// 与成员名相同
    #[default]
    MemberName,
    /// 首字母小写, snake_case 转为 camelCase
    CamelCase,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocwireConfig {
    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub serialization: SerializationConfig,

    #[serde(default)]
    pub json: JsonConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// 二进制编解码配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// 单个文档的最大字节数 (默认: 16 MiB)
    #[serde(default = "default_max_document_size")]
    pub max_document_size: usize,

    /// 文档/数组的最大嵌套深度 (默认: 100)
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,

    #[serde(default)]
    pub guid_representation: GuidRepresentation,

    /// 读取时把子类型 0x02 的旧二进制转换为 0x00
    #[serde(default = "default_true")]
    pub fix_old_binary_subtype_on_input: bool,

    /// 写入时把子类型 0x02 的旧二进制转换为 0x00
    #[serde(default = "default_true")]
    pub fix_old_binary_subtype_on_output: bool,

    /// 读取时把 max+1 毫秒的 DateTime 修正为 max
    #[serde(default = "default_true")]
    pub fix_old_date_time_max_value_on_input: bool,
}

fn default_max_document_size() -> usize { DEFAULT_MAX_DOCUMENT_SIZE }
fn default_max_nesting_depth() -> usize { DEFAULT_MAX_NESTING_DEPTH }
fn default_true() -> bool { true }

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_document_size: default_max_document_size(),
            max_nesting_depth: default_max_nesting_depth(),
            guid_representation: GuidRepresentation::default(),
            fix_old_binary_subtype_on_input: true,
            fix_old_binary_subtype_on_output: true,
            fix_old_date_time_max_value_on_input: true,
        }
    }
}

/// 类映射序列化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializationConfig {
    /// id 成员总是第一个写出 (默认: true)
    #[serde(default = "default_true")]
    pub serialize_id_first: bool,

    /// 鉴别器元素名 (默认: _t)
    #[serde(default = "default_discriminator_element_name")]
    pub discriminator_element_name: String,

    #[serde(default)]
    pub element_naming: ElementNaming,

    /// 默认是否忽略未知元素 (默认: false)
    #[serde(default)]
    pub ignore_extra_elements: bool,
}

fn default_discriminator_element_name() -> String { "_t".to_string() }

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            serialize_id_first: true,
            discriminator_element_name: default_discriminator_element_name(),
            element_naming: ElementNaming::default(),
            ignore_extra_elements: false,
        }
    }
}

/// JSON 文本输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonConfig {
    #[serde(default)]
    pub output_mode: JsonOutputMode,

    #[serde(default)]
    pub indent: bool,

    #[serde(default = "default_indent_chars")]
    pub indent_chars: String,

    #[serde(default = "default_new_line_chars")]
    pub new_line_chars: String,
}

fn default_indent_chars() -> String { "  ".to_string() }
fn default_new_line_chars() -> String { "\n".to_string() }

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            output_mode: JsonOutputMode::default(),
            indent: false,
            indent_chars: default_indent_chars(),
            new_line_chars: default_new_line_chars(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别, 未设置 RUST_LOG 时生效 (默认: info)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl DocwireConfig {
    /// # Brief
    /// 从 TOML 文件加载配置并校验
    ///
    /// # Arguments
    /// * `path` - 配置文件路径
    ///
    /// # Returns
    /// 解析后的配置实例
    pub fn from_file(path: &Path) -> DocwireResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DocwireError::Config(format!("Failed to read config: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// 从 TOML 字符串解析配置并校验
    pub fn from_toml_str(content: &str) -> DocwireResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DocwireError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Brief
    /// 将配置序列化为 TOML 字符串
    ///
    /// # Returns
    /// TOML 格式的配置字符串
    pub fn to_toml(&self) -> DocwireResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DocwireError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> DocwireResult<()> {
        if self.codec.max_document_size == 0 || self.codec.max_document_size > i32::MAX as usize {
            return Err(DocwireError::Config(format!(
                "max_document_size must be between 1 and {}",
                i32::MAX
            )));
        }
        if self.codec.max_nesting_depth == 0 {
            return Err(DocwireError::Config(
                "max_nesting_depth must be positive".to_string(),
            ));
        }
        let name = &self.serialization.discriminator_element_name;
        if name.is_empty() {
            return Err(DocwireError::Config(
                "discriminator_element_name cannot be empty".to_string(),
            ));
        }
        if name.contains('\0') {
            return Err(DocwireError::Config(
                "discriminator_element_name cannot contain null character".to_string(),
            ));
        }
        Ok(())
    }
}
