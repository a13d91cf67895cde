//! 生成层：Generator 抽象与实现（Gemini / OpenAI 兼容 / Mock）

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod traits;

pub use gemini::{GeminiGenerator, DEFAULT_GEMINI_ENDPOINT};
pub use mock::{MockGenerator, RecordedCall, ScriptedGenerator, ScriptedReply};
pub use openai::{OpenAiGenerator, DEFAULT_OPENAI_BASE_URL};
pub use traits::{Generation, GenerationRequest, Generator, ImagePart};
