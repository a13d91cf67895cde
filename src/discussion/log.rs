//! 讨论记录：按发言顺序追加的 (发言者, 文本) 序列
//!
//! 顺序有语义：每一步的 prompt 都会逐字回放整个记录。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 消息的发言方（事件与记录共用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Analyst,
    Critic,
    System,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Analyst => write!(f, "Analyst"),
            Self::Critic => write!(f, "Critic"),
            Self::System => write!(f, "System"),
        }
    }
}

/// 讨论双方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Participant {
    /// 逻辑型：构建论证，最终给出答案
    Analyst,
    /// 怀疑型：挑战论证
    Critic,
}

impl Participant {
    pub fn speaker(self) -> Speaker {
        match self {
            Self::Analyst => Speaker::Analyst,
            Self::Critic => Speaker::Critic,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.speaker().fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionLog {
    entries: Vec<LogEntry>,
}

impl DiscussionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(LogEntry {
            speaker,
            text: text.into(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 回放进 prompt 的格式：每条一行 `发言者: 文本`
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
