//! StepExecutor：单步生成调用 + 固定次数 / 固定间隔重试 + 取消感知
//!
//! 每次尝试前检查取消令牌；Cancelled / ApiKeyMissing / ApiKeyInvalid 立即返回，
//! 其余错误发一条系统通知后等待重试；次数用尽返回 ApiCommunication。
//! 重试对讨论记录不可见，成功时只上报最后一次尝试的耗时。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{ErrorKind, GenerationError, RecoveryAction, RecoveryEngine};
use crate::discussion::{parse_response, DiscussionSettings, EventSink, ParsedResponse, Participant};
use crate::llm::{GenerationRequest, Generator, ImagePart};

/// 单步成功结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub response: ParsedResponse,
    /// 最后一次（成功）尝试的耗时
    pub elapsed: Duration,
    /// 共尝试了几次（含成功那次）
    pub attempts: u32,
}

pub type StepResult = Result<StepOutput, GenerationError>;

pub struct StepExecutor {
    generator: Arc<dyn Generator>,
    recovery: RecoveryEngine,
}

impl StepExecutor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// 以 participant 的人设与模型执行一步
    pub async fn execute(
        &self,
        prompt: &str,
        participant: Participant,
        settings: &DiscussionSettings,
        image: Option<&ImagePart>,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> StepResult {
        let profile = settings.profile(participant);
        let policy = settings.retry;
        let full_prompt = format!("{}\n\n{}", profile.persona, prompt);
        let thinking_budget = settings.thinking_budget_for(participant);

        let mut attempt = 0;
        while attempt < policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(GenerationError::cancelled());
            }

            let request = GenerationRequest {
                prompt: &full_prompt,
                model: &profile.model,
                image,
                thinking_budget,
            };
            let result = self.generator.generate(request, cancel).await;

            // 调用返回时已被取消：结果作废
            if cancel.is_cancelled() {
                let elapsed = match &result {
                    Ok(g) => g.elapsed,
                    Err(e) => e.elapsed,
                };
                return Err(GenerationError::new(ErrorKind::Cancelled, "用户取消操作", elapsed));
            }

            let failure = match result {
                Ok(generation) => {
                    return Ok(StepOutput {
                        response: parse_response(&generation.text),
                        elapsed: generation.elapsed,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => e,
            };

            match self.recovery.handle(failure.kind) {
                RecoveryAction::Suspend | RecoveryAction::Halt => return Err(failure),
                RecoveryAction::Retry => {}
            }

            attempt += 1;
            tracing::warn!(
                %participant,
                kind = ?failure.kind,
                attempt,
                max = policy.max_attempts,
                "Generation failed, retrying: {}",
                failure.message
            );
            let reason = if failure.message.trim().is_empty() {
                "AI返回空响应。"
            } else {
                failure.message.as_str()
            };
            events.notify(format!(
                "[{}] 调用失败: {} 将在{}秒后自动重试... ({}/{})",
                participant,
                reason,
                policy.delay.as_secs_f64(),
                attempt,
                policy.max_attempts
            ));

            tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::cancelled()),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }

        tracing::error!(%participant, max = policy.max_attempts, "Retry limit reached");
        events.notify(format!(
            "[{}] 已达到最大重试次数 ({})。",
            participant, policy.max_attempts
        ));
        Err(GenerationError::new(
            ErrorKind::ApiCommunication,
            "已达到最大重试次数",
            Duration::ZERO,
        ))
    }
}
