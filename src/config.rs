use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "qwen-turbo";
pub const DEFAULT_BATCH_SIZE: usize = 30;

pub const DEFAULT_PROMPT: &str = "我需要你帮我对一批浏览器书签进行分类，将它们分成有意义的类别。
请分析每个书签的标题和URL，然后为每个书签分配一个合适的类别，总共的大类别数不应超过10个，每个大类的小类别数不超过7个，不能有三级分类。
类别应该精确、具体且有意义，比如：
- 编程开发（可进一步细分为：CTF、ACM、Web等）
- 学习教育（可细分为：在线课程、学术资源、教育平台等）
- 实用工具（在线工具、实用导航、软件资源、网盘等）
- 娱乐（有意思、电影、视频、音乐等等）
- 科研（科研工具、科研资源、科研平台等）
- 生活（医疗、各项技能）
- 游戏(游戏资源、在线单人游戏、在线多人游戏、游戏攻略等)
- 等等
";

const ENV_API_KEY: &str = "BOOKMARK_CATEGORIZER_API_KEY";
const ENV_API_URL: &str = "BOOKMARK_CATEGORIZER_API_URL";
const ENV_MODEL: &str = "BOOKMARK_CATEGORIZER_MODEL";

/// User configuration, persisted in the config slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Chat-completions endpoint
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    pub batch_size: usize,
    /// Categorization instructions; the output format instructions are appended to it
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Attempts per batch before it falls back to the sentinel category
    pub max_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model_name: DEFAULT_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            prompt: DEFAULT_PROMPT.to_string(),
            max_tokens: 4000,
            timeout_secs: 120,
            max_attempts: 2,
        }
    }
}

impl AppConfig {
    /// Apply environment overrides on top of the stored values
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            debug!("Using API key from {}", ENV_API_KEY);
            self.api_key = key;
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            debug!("Using API URL from {}", ENV_API_URL);
            self.api_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.is_empty()) {
            debug!("Using model from {}", ENV_MODEL);
            self.model_name = model;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingField("api_url"));
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::MissingField("model_name"));
        }
        Ok(())
    }

    /// Checks needed before any call to the classification service
    pub fn validate_for_classification(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        match chars.len() {
            0 => "(not set)".to_string(),
            n if n <= 8 => "*".repeat(n),
            n => format!("{}…{}", chars[..4].iter().collect::<String>(), chars[n - 4..].iter().collect::<String>()),
        }
    }
}
