//! 讨论层：回复解析、Prompt、单步执行与重试、记事本、讨论记录、状态机、会话事件

pub mod events;
pub mod executor;
pub mod log;
pub mod machine;
pub mod notepad;
pub mod parser;
pub mod prompts;
pub mod settings;

pub use events::{ApiKeyStatus, EventSink, MessagePurpose, SessionEvent};
pub use executor::{StepExecutor, StepOutput, StepResult};
pub use log::{DiscussionLog, LogEntry, Participant, Speaker};
pub use machine::{DiscussionMachine, DiscussionStep, Transition};
pub use notepad::Notepad;
pub use parser::{
    parse_response, wrap_notepad, ParsedResponse, DISCUSSION_COMPLETE_TAG, EMPTY_END_PLACEHOLDER,
    EMPTY_REPLY_PLACEHOLDER, NOTEPAD_CLOSE_TAG, NOTEPAD_OPEN_TAG,
};
pub use prompts::{PromptContext, IMAGE_HINT};
pub use settings::{
    model_supports_thinking, DiscussionPolicy, DiscussionSettings, ParticipantProfile,
    DEFAULT_ANALYST_PERSONA, DEFAULT_CRITIC_PERSONA,
};
