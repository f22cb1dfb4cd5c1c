//! 文件工具层：动作枚举、工作区沙箱、执行器与结构化观察

pub mod action;
pub mod executor;
pub mod observation;
pub mod schema;
pub mod search;
pub mod workspace;

pub use action::{
    Action, CopyFileParams, DeleteFileParams, ListDirectoryParams, MoveFileParams, ReadFileParams,
    SearchFilesParams, WriteFileParams, FINISH, TOOL_NAMES,
};
pub use executor::FileExecutor;
pub use observation::{Observation, ObservationError, ToolOutcome};
pub use schema::{response_schema_json, tool_catalogue, ToolSpec};
pub use workspace::Workspace;
