//! 配置管理模块
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. `config.yaml`
//! 3. 同目录下的 `config.development.yaml`（可选）
//! 4. 环境变量 `CHAT_RELAY_*`
//!
//! 必需的配置项通过 `require_*` 方法读取，缺失时返回
//! [`RelayError::ConfigurationMissing`]，在任何流开始之前失败。

use crate::error::RelayError;
use crate::providers::ProviderFlavor;
use crate::stream::parsers::MalformedChunkPolicy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CHAT_RELAY_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const DEFAULT_SYSTEM_PROMPT: &str = "あなたは和歌の名手です。与えられた句を丁寧に解説してください。\n\
さらに、より良い句にするための添削を行い、添削のポイントを丁寧に解説してください。";

const DEFAULT_USER_PROMPT: &str =
    "この世をば　わが世とぞ思ふ　望月の　欠けたることも　なしと思へば";

/// 中继配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// 上游 LLM Provider
    pub upstream: UpstreamConfig,
    /// 自定义中继 API 地址（控制台命令 2 使用）
    pub relay_endpoint: Option<String>,
    /// 提示词
    pub prompts: PromptConfig,
    /// 流解析
    pub stream: StreamConfig,
    /// 控制台
    pub console: ConsoleConfig,
    /// HTTP 服务
    pub server: ServerConfig,
    /// HTTP 客户端
    pub http: HttpConfig,
    /// 日志
    pub logging: LoggingConfig,
    /// 实际读取的配置文件，按叠加顺序
    #[serde(skip)]
    pub loaded_from: Vec<PathBuf>,
}

/// 上游 Provider 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub flavor: ProviderFlavor,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// 部署名（Azure）或模型名（OpenAI）
    pub model: Option<String>,
    /// Azure OpenAI 的 api-version 查询参数
    pub api_version: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            flavor: ProviderFlavor::default(),
            endpoint: None,
            api_key: None,
            model: None,
            api_version: "2024-02-01".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub system: String,
    pub user: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// `data: ` 行解码失败时的处理策略
    pub malformed_chunk_policy: MalformedChunkPolicy,
}

/// 控制台配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// 每个 chunk 输出后的停顿（毫秒），0 表示不停顿
    pub output_delay_ms: u64,
    /// 每条命令执行完后的停顿（毫秒）
    pub command_pause_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            output_delay_ms: 33,
            command_pause_ms: 1000,
        }
    }
}

impl ConsoleConfig {
    pub fn output_delay(&self) -> Duration {
        Duration::from_millis(self.output_delay_ms)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体大小上限（字节）
    pub body_limit_bytes: usize,
    /// 流中途出错时是否发送 `event: error`
    pub emit_error_events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5080,
            body_limit_bytes: 64 * 1024,
            emit_error_events: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// 整个请求的超时（秒）；流式响应通常较长，默认不设置
    pub request_timeout_secs: Option<u64>,
    /// 代理地址（http / https / socks5）
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法，`RUST_LOG` 优先
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// 加载配置
    ///
    /// `explicit_path` 为空时依次尝试 `CHAT_RELAY_CONFIG`、`./config.yaml`、
    /// `~/.chat-relay/config.yaml`；都不存在时使用默认值。
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, RelayError> {
        let path = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => resolve_config_path(),
        };

        let mut config = match path {
            Some(ref p) => Self::load_layers(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 读取基础配置文件，并叠加同目录的 development 配置
    pub fn load_layers(path: &Path) -> Result<Self, RelayError> {
        let mut merged = read_yaml(path)?;
        let mut loaded_from = vec![path.to_path_buf()];

        let overlay_path = development_overlay_path(path);
        if overlay_path.exists() {
            let overlay = read_yaml(&overlay_path)?;
            merge_yaml(&mut merged, overlay);
            loaded_from.push(overlay_path);
        }

        let mut config: Self = serde_yaml::from_value(merged)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))?;
        config.loaded_from = loaded_from;
        Ok(config)
    }

    /// 记录配置来源
    ///
    /// 加载配置时日志尚未初始化，由调用方在 `logger::init` 之后调用。
    pub fn log_sources(&self) {
        if self.loaded_from.is_empty() {
            tracing::info!("[CONFIG] 未找到配置文件，使用默认配置");
        }
        for path in &self.loaded_from {
            tracing::info!("[CONFIG] 已加载配置文件: {}", path.display());
        }
    }

    /// 从 YAML 字符串解析
    pub fn from_yaml_str(s: &str) -> Result<Self, RelayError> {
        serde_yaml::from_str(s).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHAT_RELAY_ENDPOINT") {
            self.upstream.endpoint = Some(v);
        }
        if let Some(v) = lookup("CHAT_RELAY_API_KEY") {
            self.upstream.api_key = Some(v);
        }
        if let Some(v) = lookup("CHAT_RELAY_MODEL") {
            self.upstream.model = Some(v);
        }
        if let Some(v) = lookup("CHAT_RELAY_RELAY_ENDPOINT") {
            self.relay_endpoint = Some(v);
        }
    }

    pub fn require_endpoint(&self) -> Result<&str, RelayError> {
        require(self.upstream.endpoint.as_deref(), "upstream.endpoint")
    }

    pub fn require_api_key(&self) -> Result<&str, RelayError> {
        require(self.upstream.api_key.as_deref(), "upstream.api_key")
    }

    pub fn require_model(&self) -> Result<&str, RelayError> {
        require(self.upstream.model.as_deref(), "upstream.model")
    }

    pub fn require_relay_endpoint(&self) -> Result<&str, RelayError> {
        require(self.relay_endpoint.as_deref(), "relay_endpoint")
    }
}

/// 从命令行参数中取出 `--config <path>` / `--config=<path>`
pub fn config_path_from_args<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn require<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str, RelayError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RelayError::ConfigurationMissing(key.to_string())),
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(p));
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    let home = dirs::home_dir()?
        .join(".chat-relay")
        .join(DEFAULT_CONFIG_FILE);
    home.exists().then_some(home)
}

/// `config.yaml` -> `config.development.yaml`
fn development_overlay_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config");
    let file_name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.development.{ext}"),
        None => format!("{stem}.development"),
    };
    path.with_file_name(file_name)
}

fn read_yaml(path: &Path) -> Result<Value, RelayError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("无法读取 {}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(Value::Mapping(Default::default()));
    }
    serde_yaml::from_str(&content)
        .map_err(|e| RelayError::Config(format!("无法解析 {}: {}", path.display(), e)))
}

/// 深度合并：映射逐键合并，其余类型直接覆盖
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
