//! 会话控制：start / pause / resume / stop 与驱动循环
//!
//! SessionController 持有唯一的 SessionState 快照与当前取消令牌。驱动循环在后台任务中
//! 反复调用 DiscussionMachine::advance，直到终态、暂停或出错；每一步的结果只有在
//! 持锁确认令牌未被取消后才会提交，所以被暂停打断的步骤不会留下任何痕迹。

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{
    ControlError, ErrorKind, GenerationError, ProcessingState, RecoveryAction, RecoveryEngine,
    SessionState,
};
use crate::discussion::{
    ApiKeyStatus, DiscussionLog, DiscussionMachine, DiscussionSettings, EventSink,
    MessagePurpose, Notepad, SessionEvent, Speaker, StepExecutor,
};
use crate::llm::{Generator, ImagePart};

/// 一次驱动循环的结局
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// 自然结束（Synthesis 完成）
    Completed {
        log: DiscussionLog,
        turns: u32,
        notepad: Notepad,
    },
    /// 被 pause 打断，会话仍在（可能已被 resume 接手）
    Paused,
    /// 被 stop 打断，状态已丢弃
    Stopped,
    /// 致命错误或重试用尽，回到 idle
    Halted(GenerationError),
}

#[derive(Debug, Default)]
struct ControllerState {
    processing: ProcessingState,
    session: Option<SessionState>,
    cancel: CancellationToken,
    /// 跨会话保留的记事本
    notepad: Notepad,
    last_completed_turns: u32,
    /// 每次 start 递增；驱动任务据此判断自己的会话是否还在
    epoch: u64,
}

struct Shared {
    state: Mutex<ControllerState>,
    executor: StepExecutor,
    settings: DiscussionSettings,
    recovery: RecoveryEngine,
    events: EventSink,
}

/// 会话入口；Clone 共享同一个会话
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(generator: Arc<dyn Generator>, settings: DiscussionSettings, events: EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::default()),
                executor: StepExecutor::new(generator),
                settings,
                recovery: RecoveryEngine::new(),
                events,
            }),
        }
    }

    pub fn settings(&self) -> &DiscussionSettings {
        &self.shared.settings
    }

    pub async fn processing_state(&self) -> ProcessingState {
        self.shared.state.lock().await.processing
    }

    /// 当前会话快照（无会话时为 None）
    pub async fn snapshot(&self) -> Option<SessionState> {
        self.shared.state.lock().await.session.clone()
    }

    pub async fn notepad(&self) -> Notepad {
        self.shared.state.lock().await.notepad.clone()
    }

    /// 用户手动替换记事本；讨论进行中（含暂停）不允许
    pub async fn set_notepad(&self, content: impl Into<String>) -> Result<(), ControlError> {
        let mut g = self.shared.state.lock().await;
        if g.processing != ProcessingState::Idle {
            return Err(ControlError::NotIdle(g.processing));
        }
        if g.notepad.apply(Some(&content.into())) {
            self.shared.events.emit(SessionEvent::NotepadUpdated {
                content: g.notepad.content().to_string(),
            });
        }
        Ok(())
    }

    pub async fn last_completed_turns(&self) -> u32 {
        self.shared.state.lock().await.last_completed_turns
    }

    /// 开始新讨论；返回驱动任务句柄
    pub async fn start(
        &self,
        query: &str,
        image: Option<ImagePart>,
    ) -> Result<JoinHandle<RunOutcome>, ControlError> {
        let query = query.trim();
        let mut g = self.shared.state.lock().await;
        if g.processing != ProcessingState::Idle {
            return Err(ControlError::NotIdle(g.processing));
        }
        if query.is_empty() && image.is_none() {
            return Err(ControlError::EmptyQuery);
        }

        let events = &self.shared.events;
        events.emit(SessionEvent::ApiKeyStatusChanged {
            status: ApiKeyStatus::Ok,
            message: None,
        });
        events.emit(SessionEvent::message(
            Speaker::User,
            MessagePurpose::UserInput,
            query,
            None,
        ));

        let notepad = g.notepad.clone();
        g.session = Some(SessionState::new(query, image, notepad));
        g.processing = ProcessingState::Processing;
        g.cancel = CancellationToken::new();
        g.epoch += 1;
        events.emit(SessionEvent::ProcessingStateChanged {
            state: ProcessingState::Processing,
        });
        tracing::info!(
            policy = %self.shared.settings.policy,
            generator = self.shared.executor.generator_name(),
            "Discussion started"
        );

        Ok(self.spawn_driver(g.cancel.clone(), g.epoch))
    }

    /// 暂停：取消进行中的调用，快照保持在被打断步骤开始前
    pub async fn pause(&self) -> Result<(), ControlError> {
        let mut g = self.shared.state.lock().await;
        if g.processing != ProcessingState::Processing {
            return Err(ControlError::NotProcessing(g.processing));
        }
        g.cancel.cancel();
        g.processing = ProcessingState::Paused;
        self.shared.events.emit(SessionEvent::ProcessingStateChanged {
            state: ProcessingState::Paused,
        });
        self.shared.events.notify("讨论已暂停。");
        tracing::info!("Discussion paused");
        Ok(())
    }

    /// 恢复：换新令牌，从快照记录的 next_step 继续
    pub async fn resume(&self) -> Result<JoinHandle<RunOutcome>, ControlError> {
        let mut g = self.shared.state.lock().await;
        if g.processing != ProcessingState::Paused {
            return Err(ControlError::NotPaused(g.processing));
        }
        g.cancel = CancellationToken::new();
        g.processing = ProcessingState::Processing;
        self.shared.events.emit(SessionEvent::ProcessingStateChanged {
            state: ProcessingState::Processing,
        });
        self.shared.events.notify("正在继续讨论...");
        tracing::info!(
            next_step = ?g.session.as_ref().map(|s| s.next_step),
            "Discussion resumed"
        );
        Ok(self.spawn_driver(g.cancel.clone(), g.epoch))
    }

    /// 停止：任何状态下都可调用，丢弃会话（记事本保留）
    pub async fn stop(&self) {
        let mut g = self.shared.state.lock().await;
        g.cancel.cancel();
        g.session = None;
        g.last_completed_turns = 0;
        if g.processing != ProcessingState::Idle {
            g.processing = ProcessingState::Idle;
            self.shared.events.emit(SessionEvent::ProcessingStateChanged {
                state: ProcessingState::Idle,
            });
        }
        tracing::info!("Discussion stopped");
    }

    fn spawn_driver(&self, token: CancellationToken, epoch: u64) -> JoinHandle<RunOutcome> {
        let controller = self.clone();
        tokio::spawn(async move { controller.drive(token, epoch).await })
    }

    /// 驱动循环：一次只执行一步，直到终态 / 暂停 / 出错
    async fn drive(&self, token: CancellationToken, epoch: u64) -> RunOutcome {
        let shared = &self.shared;
        let machine = DiscussionMachine::new(&shared.settings, &shared.executor, &shared.events);

        loop {
            let state = {
                let g = shared.state.lock().await;
                if token.is_cancelled() {
                    return Self::interrupted(&g, epoch);
                }
                match &g.session {
                    Some(s) => s.clone(),
                    None => return RunOutcome::Stopped,
                }
            };

            let result = machine.advance(&state, &token).await;

            let mut g = shared.state.lock().await;
            if token.is_cancelled() {
                // pause / stop 已生效，结果作废
                tracing::debug!(step = %state.next_step, "Step result discarded");
                return Self::interrupted(&g, epoch);
            }

            match result {
                Ok(transition) => {
                    g.notepad = transition.state.notepad.clone();
                    for event in transition.events {
                        shared.events.emit(event);
                    }
                    if transition.terminal {
                        let finished = transition.state;
                        g.session = None;
                        g.processing = ProcessingState::Idle;
                        g.last_completed_turns = finished.turn;
                        shared
                            .events
                            .emit(SessionEvent::DiscussionCompleted { turns: finished.turn });
                        shared.events.emit(SessionEvent::ProcessingStateChanged {
                            state: ProcessingState::Idle,
                        });
                        tracing::info!(turns = finished.turn, "Discussion completed");
                        return RunOutcome::Completed {
                            log: finished.log,
                            turns: finished.turn,
                            notepad: finished.notepad,
                        };
                    }
                    g.session = Some(transition.state);
                }
                Err(err) => {
                    if shared.recovery.handle(err.kind) == RecoveryAction::Suspend {
                        // 未经 pause 的取消：按暂停处理，保留快照
                        g.processing = ProcessingState::Paused;
                        shared.events.emit(SessionEvent::ProcessingStateChanged {
                            state: ProcessingState::Paused,
                        });
                        return RunOutcome::Paused;
                    }
                    self.halt(&mut g, &err);
                    return RunOutcome::Halted(err);
                }
            }
        }
    }

    /// 出错回到 idle；会话快照保留供查看，但不可 resume
    fn halt(&self, g: &mut ControllerState, err: &GenerationError) {
        let events = &self.shared.events;
        let status = match err.kind {
            ErrorKind::ApiKeyMissing => Some(ApiKeyStatus::Missing),
            ErrorKind::ApiKeyInvalid => Some(ApiKeyStatus::Invalid),
            _ => None,
        };
        if let Some(status) = status {
            tracing::error!(kind = %err.kind, "Fatal API key error: {}", err.message);
            events.emit(SessionEvent::ApiKeyStatusChanged {
                status,
                message: Some(err.message.clone()),
            });
            if !err.message.is_empty() {
                events.notify(err.message.clone());
            }
        } else {
            tracing::error!(kind = %err.kind, "Discussion halted: {}", err.message);
        }
        g.processing = ProcessingState::Idle;
        events.emit(SessionEvent::ProcessingStateChanged {
            state: ProcessingState::Idle,
        });
    }

    /// 令牌被取消后的结局：会话仍是本驱动启动时那一个则为暂停，否则已被 stop 丢弃
    fn interrupted(g: &ControllerState, epoch: u64) -> RunOutcome {
        if g.session.is_some() && g.epoch == epoch {
            RunOutcome::Paused
        } else {
            RunOutcome::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::RetryPolicy;
    use crate::discussion::DiscussionPolicy;
    use crate::llm::{ScriptedGenerator, ScriptedReply};

    fn controller(replies: Vec<ScriptedReply>) -> (SessionController, Arc<ScriptedGenerator>) {
        let gen = Arc::new(ScriptedGenerator::new(replies));
        let settings = DiscussionSettings::new(DiscussionPolicy::FixedTurns(1), "a", "c")
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        (
            SessionController::new(gen.clone(), settings, EventSink::noop()),
            gen,
        )
    }

    #[tokio::test]
    async fn test_start_rejects_empty_query() {
        let (c, _) = controller(vec![]);
        assert_eq!(c.start("   ", None).await.unwrap_err(), ControlError::EmptyQuery);
        assert_eq!(c.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_when_busy() {
        let (c, _) = controller(vec![ScriptedReply::Hang]);
        let _handle = c.start("q", None).await.unwrap();
        assert!(matches!(
            c.start("again", None).await,
            Err(ControlError::NotIdle(ProcessingState::Processing))
        ));
        c.stop().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_guards() {
        let (c, _) = controller(vec![]);
        assert!(matches!(c.pause().await, Err(ControlError::NotProcessing(ProcessingState::Idle))));
        assert!(matches!(c.resume().await, Err(ControlError::NotPaused(ProcessingState::Idle))));
    }

    #[tokio::test]
    async fn test_completion_records_turns_and_keeps_notepad() {
        let (c, gen) = controller(vec![
            ScriptedReply::text("open <notepad>n1</notepad>"),
            ScriptedReply::text("crit"),
            ScriptedReply::text("counter <notepad>n2</notepad>"),
            ScriptedReply::text("final"),
        ]);
        let outcome = c.start("q", None).await.unwrap().await.unwrap();
        match outcome {
            RunOutcome::Completed { turns, log, .. } => {
                assert_eq!(turns, 1);
                assert_eq!(log.len(), 4);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(gen.call_count(), 4);
        assert_eq!(c.last_completed_turns().await, 1);
        assert_eq!(c.notepad().await.content(), "n2");
        assert!(c.snapshot().await.is_none());
        assert_eq!(c.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_pause_then_immediate_resume_reports_paused() {
        let (tx, mut calls) = tokio::sync::mpsc::unbounded_channel();
        let gen = Arc::new(
            ScriptedGenerator::new(vec![ScriptedReply::Hang, ScriptedReply::Hang])
                .with_call_notifier(tx),
        );
        let settings = DiscussionSettings::new(DiscussionPolicy::AiDriven, "a", "c");
        let c = SessionController::new(gen.clone(), settings, EventSink::noop());

        let first = c.start("q", None).await.unwrap();
        assert_eq!(calls.recv().await, Some(0));
        c.pause().await.unwrap();
        let second = c.resume().await.unwrap();

        assert_eq!(first.await.unwrap(), RunOutcome::Paused);
        assert_eq!(c.processing_state().await, ProcessingState::Processing);
        assert!(c.snapshot().await.is_some());

        assert_eq!(calls.recv().await, Some(1));
        c.stop().await;
        assert_eq!(second.await.unwrap(), RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_then_new_start_reports_stopped() {
        let (tx, mut calls) = tokio::sync::mpsc::unbounded_channel();
        let gen = Arc::new(
            ScriptedGenerator::new(vec![ScriptedReply::Hang, ScriptedReply::Hang])
                .with_call_notifier(tx),
        );
        let settings = DiscussionSettings::new(DiscussionPolicy::AiDriven, "a", "c");
        let c = SessionController::new(gen.clone(), settings, EventSink::noop());

        let first = c.start("q1", None).await.unwrap();
        assert_eq!(calls.recv().await, Some(0));
        c.stop().await;
        let second = c.start("q2", None).await.unwrap();

        assert_eq!(first.await.unwrap(), RunOutcome::Stopped);
        assert_eq!(c.snapshot().await.unwrap().user_input, "q2");
        c.stop().await;
        assert_eq!(second.await.unwrap(), RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_set_notepad_only_when_idle() {
        let (c, _) = controller(vec![ScriptedReply::Hang]);
        c.set_notepad("seed").await.unwrap();
        let _handle = c.start("q", None).await.unwrap();
        assert!(c.set_notepad("other").await.is_err());
        assert_eq!(c.snapshot().await.unwrap().notepad.content(), "seed");
        c.stop().await;
        assert_eq!(c.notepad().await.content(), "seed");
    }
}
