//! Mock 生成后端（无需 API）
//!
//! - MockGenerator：确定性回复，带记事本与（第三次调用起）结束标记，便于本地跑通整个讨论流程。
//! - ScriptedGenerator：按脚本逐次返回文本 / 错误 / 挂起直到取消，用于测试。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{ErrorKind, GenerationError};
use crate::discussion::{wrap_notepad, DISCUSSION_COMPLETE_TAG};
use crate::llm::{Generation, GenerationRequest, Generator};

/// 模拟网络延迟
const MOCK_LATENCY: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
pub struct MockGenerator {
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let started = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::cancelled()),
            _ = tokio::time::sleep(MOCK_LATENCY) => {}
        }

        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut text = format!(
            "Mock reply #{} from {} ({} prompt chars).\n{}",
            n,
            request.model,
            request.prompt.chars().count(),
            wrap_notepad(&format!("- mock observation {}", n)),
        );
        if n >= 3 {
            text.push('\n');
            text.push_str(DISCUSSION_COMPLETE_TAG);
        }
        Ok(Generation {
            text,
            elapsed: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 脚本中的一次回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text { text: String, elapsed: Duration },
    Fail {
        kind: ErrorKind,
        message: String,
        elapsed: Duration,
    },
    /// 一直挂起，直到取消令牌触发
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            elapsed: Duration::from_millis(10),
        }
    }

    pub fn fail(kind: ErrorKind) -> Self {
        Self::Fail {
            kind,
            message: format!("scripted {}", kind),
            elapsed: Duration::from_millis(10),
        }
    }

    pub fn elapsed(self, elapsed: Duration) -> Self {
        match self {
            Self::Text { text, .. } => Self::Text { text, elapsed },
            Self::Fail { kind, message, .. } => Self::Fail {
                kind,
                message,
                elapsed,
            },
            Self::Hang => Self::Hang,
        }
    }
}

/// 记录下来的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub has_image: bool,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
    notifier: Option<mpsc::UnboundedSender<usize>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            notifier: None,
        }
    }

    /// 每次 generate 被调用时，向 tx 发送本次调用的序号（从 0 开始）
    pub fn with_call_notifier(mut self, tx: mpsc::UnboundedSender<usize>) -> Self {
        self.notifier = Some(tx);
        self
    }

    /// 追加脚本（例如暂停后换一批回复）
    pub fn push(&self, reply: ScriptedReply) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let index = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(RecordedCall {
                model: request.model.to_string(),
                prompt: request.prompt.to_string(),
                has_image: request.image.is_some(),
                thinking_budget: request.thinking_budget,
            });
            calls.len() - 1
        };
        if let Some(tx) = &self.notifier {
            let _ = tx.send(index);
        }

        let reply = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match reply {
            Some(ScriptedReply::Text { text, elapsed }) => Ok(Generation { text, elapsed }),
            Some(ScriptedReply::Fail {
                kind,
                message,
                elapsed,
            }) => Err(GenerationError::new(kind, message, elapsed)),
            Some(ScriptedReply::Hang) => {
                cancel.cancelled().await;
                Err(GenerationError::cancelled())
            }
            None => Err(GenerationError::new(
                ErrorKind::Unknown,
                "script exhausted",
                Duration::ZERO,
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
