//! LLM 层：推理模型协作者抽象、对话消息与脚本化实现

pub mod message;
pub mod mock;
pub mod traits;

pub use message::{Conversation, Message, Role};
pub use mock::{RecordedCall, ScriptedLlm};
pub use traits::{LlmClient, LlmError};
