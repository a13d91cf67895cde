//! Duet - 双 AI 讨论编排
//!
//! Analyst 与 Critic 两个角色围绕用户问题轮流发言，最后由 Analyst 综合出最终答案。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态、SessionController、命令分发
//! - **discussion**: 回复解析、Prompt、单步执行与重试、记事本、讨论记录、状态机、会话事件
//! - **llm**: 生成后端抽象与实现（Gemini / OpenAI 兼容 / Mock）
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod discussion;
pub mod llm;
pub mod observability;

pub use crate::core::{Command, ProcessingState, RunOutcome, SessionController};
pub use crate::discussion::{DiscussionPolicy, DiscussionSettings, SessionEvent};
