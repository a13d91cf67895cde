//! 错误类型：生成失败分类与会话控制错误
//!
//! 与 RecoveryEngine 配合：根据 ErrorKind 决定 Retry / Suspend / Halt。

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::ProcessingState;

/// 一次生成调用失败的分类（由 Generator 给出，StepExecutor 据此决定是否重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ApiKeyMissing,
    ApiKeyInvalid,
    QuotaExceeded,
    ApiCommunication,
    /// 用户暂停 / 停止导致的取消，不算失败
    Cancelled,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKeyMissing => write!(f, "API key missing"),
            Self::ApiKeyInvalid => write!(f, "API key invalid"),
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::ApiCommunication => write!(f, "API communication error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown AI error"),
        }
    }
}

/// 生成失败：分类 + 面向用户的说明 + 耗时（耗时总是上报）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
    pub elapsed: Duration,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            kind,
            message: message.into(),
            elapsed,
        }
    }

    /// 用户取消（耗时记为 0，未发起或已丢弃调用）
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "用户取消操作", Duration::ZERO)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// SessionController 拒绝的操作
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("a discussion is already {0}")]
    NotIdle(ProcessingState),

    #[error("query is empty and no image was attached")]
    EmptyQuery,

    #[error("cannot pause while {0}")]
    NotProcessing(ProcessingState),

    #[error("cannot resume while {0}")]
    NotPaused(ProcessingState),
}
