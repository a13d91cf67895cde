//! 核心编排层：错误与恢复、会话状态、会话控制、命令分发

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod state;

pub use error::{ControlError, ErrorKind, GenerationError};
pub use orchestrator::{
    create_controller, create_generator_from_config, dispatch, spawn_command_loop, Command,
    Overrides,
};
pub use recovery::{RecoveryAction, RecoveryEngine, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use session::{RunOutcome, SessionController};
pub use state::{ProcessingState, SessionState};
