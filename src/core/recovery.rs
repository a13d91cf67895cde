//! 错误恢复引擎
//!
//! 根据 ErrorKind 返回 RecoveryAction，供 StepExecutor 决定重试、挂起（可恢复）还是终止会话。

use std::time::Duration;

use crate::core::ErrorKind;

/// 单步最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 45;
/// 两次尝试之间的固定间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// 固定次数、固定间隔的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待固定间隔后重试同一步
    Retry,
    /// 用户取消：保留会话快照，可 resume
    Suspend,
    /// 致命错误：会话回到 idle，不再重试
    Halt,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, kind: ErrorKind) -> RecoveryAction {
        match kind {
            ErrorKind::Cancelled => RecoveryAction::Suspend,
            ErrorKind::ApiKeyMissing | ErrorKind::ApiKeyInvalid => RecoveryAction::Halt,
            ErrorKind::QuotaExceeded | ErrorKind::ApiCommunication | ErrorKind::Unknown => {
                RecoveryAction::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(ErrorKind::Cancelled), RecoveryAction::Suspend);
    }

    #[test]
    fn test_recovery_api_key_errors_halt() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(ErrorKind::ApiKeyMissing), RecoveryAction::Halt);
        assert_eq!(engine.handle(ErrorKind::ApiKeyInvalid), RecoveryAction::Halt);
    }

    #[test]
    fn test_recovery_transient_errors_retry() {
        let engine = RecoveryEngine::new();
        for kind in [
            ErrorKind::QuotaExceeded,
            ErrorKind::ApiCommunication,
            ErrorKind::Unknown,
        ] {
            assert_eq!(engine.handle(kind), RecoveryAction::Retry);
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 45);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[test]
    fn test_retry_policy_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
