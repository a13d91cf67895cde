//! 状态定义：ProcessingState 与可暂停的 SessionState 快照
//!
//! SessionState 只由 SessionController 持有；每一步在其克隆上计算，成功后整体提交，
//! 因此被暂停打断的步骤不会留下任何痕迹。

use std::fmt;

use serde::Serialize;

use crate::discussion::{DiscussionLog, DiscussionStep, Notepad};
use crate::llm::ImagePart;

/// 会话处理状态：决定是否接受新输入、状态机能否推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    Idle,
    Processing,
    Paused,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// 可暂停的会话快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub next_step: DiscussionStep,
    pub user_input: String,
    pub image: Option<ImagePart>,
    pub log: DiscussionLog,
    /// 上一位发言者说的话（下一步 prompt 要引用）
    pub last_speaker_text: String,
    /// 已完成的轮数；仅在 Analyst 的主循环回复后 +1
    pub turn: u32,
    /// 上一步是否提议结束讨论
    pub pending_stop: bool,
    pub notepad: Notepad,
}

impl SessionState {
    pub fn new(user_input: impl Into<String>, image: Option<ImagePart>, notepad: Notepad) -> Self {
        Self {
            next_step: DiscussionStep::Opening,
            user_input: user_input.into(),
            image,
            log: DiscussionLog::new(),
            last_speaker_text: String::new(),
            turn: 0,
            pending_stop: false,
            notepad,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_step == DiscussionStep::Finished
    }
}
