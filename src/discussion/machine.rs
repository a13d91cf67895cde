//! 讨论状态机
//!
//! Opening -> Reply(Critic) <-> CounterReply(Analyst) -> Synthesis -> Finished。
//! advance 在快照的克隆上计算下一状态，不修改传入的状态；步骤成功后产生的事件
//! 随 Transition 返回，由 SessionController 在提交后统一发出。
//!
//! 终止规则（AI 驱动）：上一步提议结束（pending_stop）且本步也提议结束，才进入 Synthesis；
//! 单方信号只会成为新的 pending_stop。固定轮数策略只看 turn，忽略信号。

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{GenerationError, SessionState};
use crate::discussion::prompts::{
    analyst_reply_prompt, critic_reply_prompt, opening_prompt, synthesis_prompt, PromptContext,
};
use crate::discussion::{
    DiscussionPolicy, DiscussionSettings, EventSink, MessagePurpose, Participant, SessionEvent,
    StepExecutor, StepOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStep {
    /// Analyst 开场
    Opening,
    /// Critic 回应 Analyst
    Reply,
    /// Analyst 回应 Critic（完成后 turn + 1）
    CounterReply,
    /// Analyst 综合全部讨论给出最终答案
    Synthesis,
    Finished,
}

impl fmt::Display for DiscussionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Reply => write!(f, "reply"),
            Self::CounterReply => write!(f, "counter_reply"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// 一次 advance 的结果
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SessionState,
    /// 提交后才可发出的事件（消息、记事本、轮次）
    pub events: Vec<SessionEvent>,
    pub terminal: bool,
}

impl Transition {
    fn new(state: SessionState, events: Vec<SessionEvent>) -> Self {
        let terminal = state.is_finished();
        Self {
            state,
            events,
            terminal,
        }
    }
}

/// 回复步骤结束后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyResolution {
    pub next: DiscussionStep,
    pub pending_stop: bool,
    /// 双方连续两步都提议结束
    pub agreed: bool,
}

pub(crate) fn resolve_reply(
    policy: DiscussionPolicy,
    pending_stop: bool,
    signaled: bool,
    otherwise: DiscussionStep,
) -> ReplyResolution {
    if !policy.is_ai_driven() {
        return ReplyResolution {
            next: otherwise,
            pending_stop: false,
            agreed: false,
        };
    }
    if pending_stop && signaled {
        ReplyResolution {
            next: DiscussionStep::Synthesis,
            pending_stop,
            agreed: true,
        }
    } else {
        ReplyResolution {
            next: otherwise,
            pending_stop: signaled,
            agreed: false,
        }
    }
}

pub struct DiscussionMachine<'a> {
    settings: &'a DiscussionSettings,
    executor: &'a StepExecutor,
    events: &'a EventSink,
}

impl<'a> DiscussionMachine<'a> {
    pub fn new(settings: &'a DiscussionSettings, executor: &'a StepExecutor, events: &'a EventSink) -> Self {
        Self {
            settings,
            executor,
            events,
        }
    }

    fn prompt_context<'s>(&self, state: &'s SessionState) -> PromptContext<'s> {
        let ai_driven = self.settings.policy.is_ai_driven();
        PromptContext {
            user_input: &state.user_input,
            has_image: state.image.is_some(),
            log: &state.log,
            last_speaker_text: &state.last_speaker_text,
            notepad: state.notepad.content(),
            ai_driven,
            ask_for_agreement: ai_driven && state.pending_stop,
        }
    }

    async fn run_step(
        &self,
        state: &SessionState,
        participant: Participant,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, GenerationError> {
        self.executor
            .execute(
                prompt,
                participant,
                self.settings,
                state.image.as_ref(),
                cancel,
                self.events,
            )
            .await
    }

    /// 把一步的成功结果写入新状态：追加消息、记事本、记录与最后发言
    fn record(
        state: &SessionState,
        participant: Participant,
        purpose: MessagePurpose,
        output: &StepOutput,
    ) -> (SessionState, Vec<SessionEvent>) {
        let mut next = state.clone();
        let text = &output.response.spoken_text;
        let mut events = vec![SessionEvent::message(
            participant.speaker(),
            purpose,
            text.clone(),
            Some(output.elapsed.as_millis() as u64),
        )];
        if next
            .notepad
            .apply(output.response.updated_notepad.as_deref())
        {
            events.push(SessionEvent::NotepadUpdated {
                content: next.notepad.content().to_string(),
            });
        }
        next.log.push(participant.speaker(), text.clone());
        next.last_speaker_text = text.clone();
        (next, events)
    }

    fn agreement_notice() -> SessionEvent {
        SessionEvent::system(format!(
            "双方 ({} 和 {}) 已同意结束讨论。",
            Participant::Analyst,
            Participant::Critic
        ))
    }

    /// 执行 state.next_step 对应的一步；失败（含取消）时返回错误，传入状态保持不变
    pub async fn advance(
        &self,
        state: &SessionState,
        cancel: &CancellationToken,
    ) -> Result<Transition, GenerationError> {
        let policy = self.settings.policy;
        let transition = match state.next_step {
            DiscussionStep::Opening => {
                self.events.notify(format!(
                    "{} 正在为 {} 准备第一个观点 (使用 {})...",
                    Participant::Analyst,
                    Participant::Critic,
                    self.settings.analyst.model
                ));
                let prompt = opening_prompt(&self.prompt_context(state));
                let output = self.run_step(state, Participant::Analyst, &prompt, cancel).await?;
                let (mut next, events) =
                    Self::record(state, Participant::Analyst, MessagePurpose::AnalystToCritic, &output);
                next.pending_stop = policy.is_ai_driven() && output.response.discussion_should_end;
                next.next_step = DiscussionStep::Reply;
                Transition::new(next, events)
            }
            DiscussionStep::Reply => {
                if let DiscussionPolicy::FixedTurns(limit) = policy {
                    if state.turn >= limit {
                        let mut next = state.clone();
                        next.next_step = DiscussionStep::Synthesis;
                        tracing::debug!(turn = state.turn, limit, "Fixed turn limit reached");
                        return Ok(Transition::new(next, Vec::new()));
                    }
                }
                self.events.notify(format!(
                    "{} 正在回应 {} (使用 {})...",
                    Participant::Critic,
                    Participant::Analyst,
                    self.settings.critic.model
                ));
                let prompt = critic_reply_prompt(&self.prompt_context(state));
                let output = self.run_step(state, Participant::Critic, &prompt, cancel).await?;
                let (mut next, mut events) =
                    Self::record(state, Participant::Critic, MessagePurpose::CriticToAnalyst, &output);
                let resolution = resolve_reply(
                    policy,
                    state.pending_stop,
                    output.response.discussion_should_end,
                    DiscussionStep::CounterReply,
                );
                if resolution.agreed {
                    events.push(Self::agreement_notice());
                }
                next.pending_stop = resolution.pending_stop;
                next.next_step = resolution.next;
                Transition::new(next, events)
            }
            DiscussionStep::CounterReply => {
                self.events.notify(format!(
                    "{} 正在回应 {} (使用 {})...",
                    Participant::Analyst,
                    Participant::Critic,
                    self.settings.analyst.model
                ));
                let prompt = analyst_reply_prompt(&self.prompt_context(state));
                let output = self.run_step(state, Participant::Analyst, &prompt, cancel).await?;
                let (mut next, mut events) =
                    Self::record(state, Participant::Analyst, MessagePurpose::AnalystToCritic, &output);
                next.turn += 1;
                events.push(SessionEvent::TurnAdvanced { turn: next.turn });
                let resolution = resolve_reply(
                    policy,
                    state.pending_stop,
                    output.response.discussion_should_end,
                    DiscussionStep::Reply,
                );
                if resolution.agreed {
                    events.push(Self::agreement_notice());
                }
                next.pending_stop = resolution.pending_stop;
                next.next_step = resolution.next;
                Transition::new(next, events)
            }
            DiscussionStep::Synthesis => {
                self.events.notify(format!(
                    "{} 正在综合讨论内容，准备最终答案 (使用 {})...",
                    Participant::Analyst,
                    self.settings.analyst.model
                ));
                let prompt = synthesis_prompt(&self.prompt_context(state));
                let output = self.run_step(state, Participant::Analyst, &prompt, cancel).await?;
                let (mut next, events) =
                    Self::record(state, Participant::Analyst, MessagePurpose::FinalResponse, &output);
                next.next_step = DiscussionStep::Finished;
                Transition::new(next, events)
            }
            DiscussionStep::Finished => Transition::new(state.clone(), Vec::new()),
        };

        tracing::debug!(
            from = %state.next_step,
            to = %transition.state.next_step,
            turn = transition.state.turn,
            pending_stop = transition.state.pending_stop,
            "Discussion advanced"
        );
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::core::RetryPolicy;
    use crate::discussion::{Notepad, Speaker, DISCUSSION_COMPLETE_TAG};
    use crate::llm::{ScriptedGenerator, ScriptedReply};

    #[test]
    fn test_fixed_policy_ignores_signals() {
        let r = resolve_reply(DiscussionPolicy::FixedTurns(2), true, true, DiscussionStep::CounterReply);
        assert_eq!(r.next, DiscussionStep::CounterReply);
        assert!(!r.agreed);
        assert!(!r.pending_stop);
    }

    #[test]
    fn test_single_sided_signal_carries_forward() {
        let r = resolve_reply(DiscussionPolicy::AiDriven, false, true, DiscussionStep::Reply);
        assert_eq!(r.next, DiscussionStep::Reply);
        assert!(r.pending_stop);

        let r = resolve_reply(DiscussionPolicy::AiDriven, true, false, DiscussionStep::Reply);
        assert_eq!(r.next, DiscussionStep::Reply);
        assert!(!r.pending_stop);
    }

    #[test]
    fn test_two_consecutive_signals_end() {
        let r = resolve_reply(DiscussionPolicy::AiDriven, true, true, DiscussionStep::CounterReply);
        assert_eq!(r.next, DiscussionStep::Synthesis);
        assert!(r.agreed);
    }

    fn settings(policy: DiscussionPolicy) -> DiscussionSettings {
        DiscussionSettings::new(policy, "a-model", "c-model")
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_advance_does_not_touch_input_state() {
        let gen = Arc::new(ScriptedGenerator::new([ScriptedReply::text(
            "Opening. <notepad>n1</notepad>",
        )]));
        let executor = StepExecutor::new(gen);
        let s = settings(DiscussionPolicy::AiDriven);
        let sink = EventSink::noop();
        let machine = DiscussionMachine::new(&s, &executor, &sink);
        let state = SessionState::new("q", None, Notepad::default());
        let before = state.clone();

        let t = machine.advance(&state, &CancellationToken::new()).await.unwrap();
        assert_eq!(state, before);
        assert_eq!(t.state.next_step, DiscussionStep::Reply);
        assert_eq!(t.state.log.entries()[0].speaker, Speaker::Analyst);
        assert_eq!(t.state.notepad.content(), "n1");
        assert_eq!(t.state.last_speaker_text, "Opening.");
        assert!(!t.terminal);
        assert!(t
            .events
            .iter()
            .any(|e| matches!(e, SessionEvent::NotepadUpdated { content } if content == "n1")));
    }

    #[tokio::test]
    async fn test_fixed_reply_bypasses_call_at_limit() {
        let gen = Arc::new(ScriptedGenerator::new(Vec::new()));
        let executor = StepExecutor::new(gen.clone());
        let s = settings(DiscussionPolicy::FixedTurns(1));
        let sink = EventSink::noop();
        let machine = DiscussionMachine::new(&s, &executor, &sink);
        let mut state = SessionState::new("q", None, Notepad::default());
        state.next_step = DiscussionStep::Reply;
        state.turn = 1;

        let t = machine.advance(&state, &CancellationToken::new()).await.unwrap();
        assert_eq!(t.state.next_step, DiscussionStep::Synthesis);
        assert!(t.events.is_empty());
        assert_eq!(gen.call_count(), 0);
    }

    #[tokio::test]
    async fn test_counter_reply_increments_turn() {
        let reply = format!("Fine. {}", DISCUSSION_COMPLETE_TAG);
        let gen = Arc::new(ScriptedGenerator::new([ScriptedReply::text(reply)]));
        let executor = StepExecutor::new(gen);
        let s = settings(DiscussionPolicy::AiDriven);
        let sink = EventSink::noop();
        let machine = DiscussionMachine::new(&s, &executor, &sink);
        let mut state = SessionState::new("q", None, Notepad::default());
        state.next_step = DiscussionStep::CounterReply;
        state.pending_stop = true;

        let t = machine.advance(&state, &CancellationToken::new()).await.unwrap();
        assert_eq!(t.state.turn, 1);
        assert_eq!(t.state.next_step, DiscussionStep::Synthesis);
        assert!(t
            .events
            .iter()
            .any(|e| matches!(e, SessionEvent::TurnAdvanced { turn: 1 })));
    }

    #[tokio::test]
    async fn test_synthesis_is_terminal() {
        let gen = Arc::new(ScriptedGenerator::new([ScriptedReply::text(format!(
            "Final. {}",
            DISCUSSION_COMPLETE_TAG
        ))]));
        let executor = StepExecutor::new(gen);
        let s = settings(DiscussionPolicy::AiDriven);
        let sink = EventSink::noop();
        let machine = DiscussionMachine::new(&s, &executor, &sink);
        let mut state = SessionState::new("q", None, Notepad::default());
        state.next_step = DiscussionStep::Synthesis;

        let t = machine.advance(&state, &CancellationToken::new()).await.unwrap();
        assert!(t.terminal);
        assert_eq!(t.state.next_step, DiscussionStep::Finished);
        assert!(t.events.iter().any(|e| matches!(
            e,
            SessionEvent::MessageAppended { purpose: MessagePurpose::FinalResponse, .. }
        )));

        let again = machine.advance(&t.state, &CancellationToken::new()).await.unwrap();
        assert!(again.terminal);
        assert!(again.events.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_step_returns_error() {
        let gen = Arc::new(ScriptedGenerator::new([ScriptedReply::text("x")]));
        let executor = StepExecutor::new(gen);
        let s = settings(DiscussionPolicy::AiDriven);
        let sink = EventSink::noop();
        let machine = DiscussionMachine::new(&s, &executor, &sink);
        let state = SessionState::new("q", None, Notepad::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = machine.advance(&state, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
