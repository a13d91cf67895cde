//! 编排器：加载配置、选择生成后端、创建 SessionController，并把用户命令分发给它
//!
//! 展示层（CLI）只持有命令发送端与事件接收端；命令在后台任务中顺序消费。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{load_config, AppConfig, DiscussionMode};
use crate::core::{RunOutcome, SessionController};
use crate::discussion::{EventSink, SessionEvent};
use crate::llm::{GeminiGenerator, Generator, ImagePart, MockGenerator, OpenAiGenerator};

/// 从展示层发往编排器的用户命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 提交问题（可附图片），开始新讨论
    Start {
        query: String,
        image: Option<ImagePart>,
    },
    Pause,
    Resume,
    /// 停止并丢弃当前讨论
    Stop,
    /// 退出应用
    Quit,
}

/// 命令行对配置的覆盖
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub mode: Option<DiscussionMode>,
    pub fixed_turns: Option<u32>,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(mode) = self.mode {
            cfg.discussion.mode = mode;
        }
        if let Some(turns) = self.fixed_turns {
            cfg.discussion.fixed_turns = turns;
        }
    }
}

/// 根据配置选择生成后端（Gemini / OpenAI 兼容 / Mock）
pub fn create_generator_from_config(cfg: &AppConfig) -> Arc<dyn Generator> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = cfg.llm.resolve_api_key();
    let base_url = cfg.llm.base_url.as_deref();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock generator");
            Arc::new(MockGenerator::new())
        }
        "openai" => {
            tracing::info!(
                "Using OpenAI-compatible generator ({})",
                base_url.unwrap_or(crate::llm::DEFAULT_OPENAI_BASE_URL)
            );
            Arc::new(OpenAiGenerator::new(base_url, api_key.as_deref()))
        }
        other => {
            if other != "gemini" {
                tracing::warn!("Unknown provider '{}', falling back to Gemini", other);
            }
            if api_key.is_none() {
                // 不提前退出：首个步骤会以 ApiKeyMissing 结束会话并上报
                tracing::warn!("No Gemini API key configured");
            }
            tracing::info!(
                "Using Gemini generator ({})",
                base_url.unwrap_or(crate::llm::DEFAULT_GEMINI_ENDPOINT)
            );
            Arc::new(GeminiGenerator::new(
                base_url,
                api_key.as_deref(),
                Duration::from_secs(cfg.llm.request_timeout_secs),
            ))
        }
    }
}

/// 创建会话控制器：返回控制器与事件接收端
pub fn create_controller(
    config_path: Option<PathBuf>,
    overrides: Overrides,
) -> anyhow::Result<(SessionController, mpsc::UnboundedReceiver<SessionEvent>)> {
    let mut cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    overrides.apply(&mut cfg);

    let settings = cfg
        .discussion_settings()
        .context("Invalid discussion settings")?;

    let generator = create_generator_from_config(&cfg);
    let (events, rx) = EventSink::channel();
    tracing::info!(
        policy = %settings.policy,
        analyst = %settings.analyst.model,
        critic = %settings.critic.model,
        "Session controller ready"
    );
    Ok((SessionController::new(generator, settings, events), rx))
}

/// 执行一条命令；start / resume 返回新的驱动任务句柄。Quit 由调用方处理。
pub async fn dispatch(
    controller: &SessionController,
    command: Command,
) -> Option<JoinHandle<RunOutcome>> {
    let result = match command {
        Command::Start { query, image } => controller.start(&query, image).await.map(Some),
        Command::Pause => controller.pause().await.map(|_| None),
        Command::Resume => controller.resume().await.map(Some),
        Command::Stop => {
            controller.stop().await;
            Ok(None)
        }
        Command::Quit => Ok(None),
    };
    match result {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Command rejected: {}", e);
            None
        }
    }
}

/// 后台消费命令；Quit 或发送端关闭时先 stop 再退出
pub fn spawn_command_loop(
    controller: SessionController,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if cmd == Command::Quit {
                break;
            }
            // 驱动任务独立运行，结局通过事件流体现
            let _ = dispatch(&controller, cmd).await;
        }
        controller.stop().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProcessingState;
    use crate::discussion::{DiscussionPolicy, DiscussionSettings};
    use crate::llm::{ScriptedGenerator, ScriptedReply};

    #[test]
    fn test_overrides_apply() {
        let mut cfg = AppConfig::default();
        Overrides {
            mode: Some(DiscussionMode::Fixed),
            fixed_turns: Some(4),
        }
        .apply(&mut cfg);
        assert_eq!(
            cfg.discussion_settings().unwrap().policy,
            DiscussionPolicy::FixedTurns(4)
        );
    }

    #[test]
    fn test_mock_provider_selected() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        assert_eq!(create_generator_from_config(&cfg).name(), "mock");
    }

    #[test]
    fn test_unknown_provider_falls_back_to_gemini() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "something".to_string();
        cfg.llm.api_key = Some("k".to_string());
        assert_eq!(create_generator_from_config(&cfg).name(), "gemini");
    }

    #[tokio::test]
    async fn test_dispatch_rejected_command_returns_none() {
        let gen = Arc::new(ScriptedGenerator::new(vec![ScriptedReply::Hang]));
        let settings = DiscussionSettings::new(DiscussionPolicy::AiDriven, "a", "c");
        let controller = SessionController::new(gen, settings, EventSink::noop());

        assert!(dispatch(&controller, Command::Resume).await.is_none());
        let start = Command::Start {
            query: "q".into(),
            image: None,
        };
        assert!(dispatch(&controller, start).await.is_some());
        assert!(dispatch(&controller, Command::Pause).await.is_none());
        assert_eq!(controller.processing_state().await, ProcessingState::Paused);
        dispatch(&controller, Command::Stop).await;
        assert_eq!(controller.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_dispatch_start_forwards_image() {
        let gen = Arc::new(ScriptedGenerator::new(vec![ScriptedReply::Hang]));
        let settings = DiscussionSettings::new(DiscussionPolicy::AiDriven, "a", "c");
        let controller = SessionController::new(gen.clone(), settings, EventSink::noop());

        let start = Command::Start {
            query: String::new(),
            image: Some(ImagePart::from_bytes("image/png", b"png")),
        };
        assert!(dispatch(&controller, start).await.is_some());
        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.image.unwrap().mime_type, "image/png");
        controller.stop().await;
    }
}
