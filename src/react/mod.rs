//! 认知层：响应解析、Prompt、确认协作者与 ReAct 主循环

pub mod confirm;
pub mod events;
pub mod loop_;
pub mod parser;
pub mod prompts;

pub use confirm::{AutoApprove, AutoDeny, ConfirmationHandler, ConfirmationRequest};
pub use events::ReactEvent;
pub use loop_::{react_loop, ReactSession, RunState};
pub use parser::{parse_response, ParsedResponse};
