//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DUET__*` 覆盖（双下划线表示嵌套，如 `DUET__DISCUSSION__MODE=fixed`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::discussion::{DiscussionPolicy, DiscussionSettings, ParticipantProfile};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub discussion: DiscussionSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
    pub analyst: ParticipantSection,
    pub critic: ParticipantSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiscussionMode {
    #[default]
    AiDriven,
    Fixed,
}

/// [discussion] 段：终止策略与思考预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscussionSection {
    pub mode: DiscussionMode,
    /// fixed 模式下的轮数，至少为 1
    pub fixed_turns: u32,
    /// 是否向后端传思考预算；仅 Gemini 且模型支持时生效
    pub thinking: bool,
    pub thinking_budget: u32,
}

impl Default for DiscussionSection {
    fn default() -> Self {
        Self {
            mode: DiscussionMode::AiDriven,
            fixed_turns: 2,
            thinking: true,
            thinking_budget: 24576,
        }
    }
}

/// [retry] 段：单步重试上限与固定间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

/// [llm] 段：后端选择、端点、密钥与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// gemini / openai / mock
    pub provider: String,
    /// 自定义端点；未设置时用各后端默认值
    pub base_url: Option<String>,
    /// 未设置时回退到环境变量（GEMINI_API_KEY / API_KEY 或 OPENAI_API_KEY）
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 300,
        }
    }
}

impl LlmSection {
    /// 配置中的密钥优先，其次按 provider 查环境变量
    pub fn resolve_api_key(&self) -> Option<String> {
        let from_config = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if from_config.is_some() {
            return from_config;
        }
        let vars: &[&str] = match self.provider.to_lowercase().as_str() {
            "openai" => &["OPENAI_API_KEY"],
            _ => &["GEMINI_API_KEY", "API_KEY"],
        };
        vars.iter()
            .filter_map(|v| std::env::var(v).ok())
            .find(|k| !k.trim().is_empty())
    }
}

/// [analyst] / [critic] 段：模型与可选人设
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParticipantSection {
    pub model: String,
    pub persona: Option<String>,
    /// 覆盖按模型名推断的思考预算支持（gemini-2.5-flash 支持，pro 不支持）
    pub supports_thinking: Option<bool>,
}

impl Default for ParticipantSection {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-pro".to_string(),
            persona: None,
            supports_thinking: None,
        }
    }
}

impl ParticipantSection {
    fn apply_to(&self, profile: &mut ParticipantProfile) {
        if let Some(persona) = &self.persona {
            profile.persona = persona.clone();
        }
        if let Some(supported) = self.supports_thinking {
            profile.supports_thinking = supported;
        }
    }
}

impl AppConfig {
    /// 校验并生成一次会话使用的不可变设置
    pub fn discussion_settings(&self) -> Result<DiscussionSettings, config::ConfigError> {
        let policy = match self.discussion.mode {
            DiscussionMode::AiDriven => DiscussionPolicy::AiDriven,
            DiscussionMode::Fixed if self.discussion.fixed_turns == 0 => {
                return Err(config::ConfigError::Message(
                    "discussion.fixed_turns must be at least 1".to_string(),
                ));
            }
            DiscussionMode::Fixed => DiscussionPolicy::FixedTurns(self.discussion.fixed_turns),
        };
        if self.retry.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        // OpenAI 兼容后端没有 thinkingConfig
        let thinking = self.discussion.thinking && !self.llm.provider.eq_ignore_ascii_case("openai");
        let mut settings = DiscussionSettings::new(policy, &self.analyst.model, &self.critic.model)
            .with_retry(RetryPolicy::new(
                self.retry.max_attempts,
                Duration::from_millis(self.retry.delay_ms),
            ))
            .with_thinking_budget(thinking.then_some(self.discussion.thinking_budget));
        self.analyst.apply_to(&mut settings.analyst);
        self.critic.apply_to(&mut settings.critic);
        Ok(settings)
    }
}

/// 从 config 目录加载配置，环境变量 DUET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DUET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, skipped", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DUET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
