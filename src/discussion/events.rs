//! 会话事件：推送给展示层（CLI / 前端）的消息、记事本、轮次与状态变化

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::ProcessingState;
use crate::discussion::Speaker;

/// 消息用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePurpose {
    UserInput,
    SystemNotification,
    AnalystToCritic,
    CriticToAnalyst,
    FinalResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Ok,
    Missing,
    Invalid,
}

/// 单条会话事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageAppended {
        id: Uuid,
        speaker: Speaker,
        purpose: MessagePurpose,
        text: String,
        /// 生成耗时（仅 AI 消息）
        elapsed_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    NotepadUpdated { content: String },
    TurnAdvanced { turn: u32 },
    ProcessingStateChanged { state: ProcessingState },
    ApiKeyStatusChanged {
        status: ApiKeyStatus,
        message: Option<String>,
    },
    /// 讨论自然结束，记录完成的轮数
    DiscussionCompleted { turns: u32 },
}

impl SessionEvent {
    pub fn message(
        speaker: Speaker,
        purpose: MessagePurpose,
        text: impl Into<String>,
        elapsed_ms: Option<u64>,
    ) -> Self {
        Self::MessageAppended {
            id: Uuid::new_v4(),
            speaker,
            purpose,
            text: text.into(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::message(Speaker::System, MessagePurpose::SystemNotification, text, None)
    }
}

/// 事件出口；接收端关闭后发送静默失败
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 丢弃所有事件
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notify(&self, text: impl Into<String>) {
        self.emit(SessionEvent::system(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::TurnAdvanced { turn: 3 }).unwrap();
        assert_eq!(json["type"], "turn_advanced");
        assert_eq!(json["turn"], 3);
    }

    #[test]
    fn test_message_event_fields() {
        let event = SessionEvent::message(
            Speaker::Critic,
            MessagePurpose::CriticToAnalyst,
            "Is that *all* you've got?",
            Some(42),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_appended");
        assert_eq!(json["speaker"], "critic");
        assert_eq!(json["purpose"], "critic_to_analyst");
        assert_eq!(json["elapsed_ms"], 42);
    }

    #[tokio::test]
    async fn test_sink_delivers_and_noop_drops() {
        let (sink, mut rx) = EventSink::channel();
        sink.notify("hello");
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::MessageAppended { speaker: Speaker::System, .. })
        ));
        EventSink::noop().notify("dropped");
    }
}
