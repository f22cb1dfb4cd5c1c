//! 核心编排层：错误与恢复、状态投影、会话守卫、构建器与编排器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod state;

pub use builder::{create_agent_builder, AgentBuilder, AgentComponents};
pub use error::{
    AgentError, BackupError, LedgerError, ParseError, RecoveryAction, RollbackError, ToolError,
};
pub use orchestrator::Orchestrator;
pub use recovery::{LoopFailure, RecoveryEngine};
pub use session::SessionGuard;
pub use state::{AgentPhase, RunReport, Step};
