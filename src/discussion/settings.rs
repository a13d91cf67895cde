//! 会话设置：讨论策略、双方人设与模型、思考预算、重试策略
//!
//! 在 start 时传入，会话存续期间不可变。

use std::fmt;

use crate::core::RetryPolicy;
use crate::discussion::Participant;

pub const DEFAULT_ANALYST_PERSONA: &str = "你是 Analyst，一个为严谨逻辑推理而生的讨论参与者。\
每一轮你都要构建精确、论据充分的论证，逐条回应 Critic 的质疑，并把 Critic 提出的有效见解\
吸收进改进后的解答。计算与证明要写清每一步。用共享记事本记录已核实的事实与中间结果，\
避免在轮次之间丢失。只有当问题的每个方面都已审视、解答已经完整时，才考虑结束讨论。";

pub const DEFAULT_CRITIC_PERSONA: &str = "你是 Critic，一个富有创造力且高度怀疑的讨论参与者。\
你的职责是站在对立面审视 Analyst 的每一个陈述：质疑前提，复核每一步计算，检查边界与极端情形，\
构造反例。可以步步紧逼（\"你确定吗？\"、\"你遗漏了什么？\"），但要保持专业，忠于用户的原始问题，\
不吹毛求疵，也不偏离主题。同时审查共享记事本，保留经受住检验的结论，标出已过时的条目。";

/// 讨论终止策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionPolicy {
    /// 固定轮数 N（N ≥ 1）后直接进入总结，忽略结束信号
    FixedTurns(u32),
    /// 由双方连续两步的结束信号决定
    AiDriven,
}

impl DiscussionPolicy {
    pub fn is_ai_driven(self) -> bool {
        matches!(self, Self::AiDriven)
    }
}

impl fmt::Display for DiscussionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedTurns(n) => write!(f, "fixed ({} turns)", n),
            Self::AiDriven => write!(f, "ai-driven"),
        }
    }
}

/// 接受思考预算的模型前缀；pro / flash-lite / gemma 会拒绝 thinkingConfig
const THINKING_MODELS: &[&str] = &["gemini-2.5-flash"];

/// 模型是否接受思考预算
pub fn model_supports_thinking(model: &str) -> bool {
    let model = model.trim().to_lowercase();
    let model = model.strip_prefix("models/").unwrap_or(&model);
    THINKING_MODELS.iter().any(|m| {
        model
            .strip_prefix(*m)
            .is_some_and(|rest| !rest.starts_with("-lite"))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantProfile {
    pub persona: String,
    pub model: String,
    /// 是否向该模型传思考预算
    pub supports_thinking: bool,
}

impl ParticipantProfile {
    fn new(persona: &str, model: &str) -> Self {
        Self {
            persona: persona.to_string(),
            model: model.to_string(),
            supports_thinking: model_supports_thinking(model),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionSettings {
    pub policy: DiscussionPolicy,
    pub analyst: ParticipantProfile,
    pub critic: ParticipantProfile,
    /// 思考预算；None 表示不传，只发给 supports_thinking 的一方
    pub thinking_budget: Option<u32>,
    pub retry: RetryPolicy,
}

impl DiscussionSettings {
    pub fn new(policy: DiscussionPolicy, analyst_model: &str, critic_model: &str) -> Self {
        Self {
            policy,
            analyst: ParticipantProfile::new(DEFAULT_ANALYST_PERSONA, analyst_model),
            critic: ParticipantProfile::new(DEFAULT_CRITIC_PERSONA, critic_model),
            thinking_budget: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }

    pub fn profile(&self, participant: Participant) -> &ParticipantProfile {
        match participant {
            Participant::Analyst => &self.analyst,
            Participant::Critic => &self.critic,
        }
    }

    /// participant 这一步实际发送的思考预算
    pub fn thinking_budget_for(&self, participant: Participant) -> Option<u32> {
        self.thinking_budget
            .filter(|_| self.profile(participant).supports_thinking)
    }
}
