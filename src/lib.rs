//! filekeeper - 文件管理智能体内核
//!
//! 模块划分：
//! - **backup**: 回收站式快照存储（删除 / 覆盖前备份，恢复，过期丢弃）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复引擎、状态、会话守卫、构建器与编排器
//! - **fsutil**: 整树复制、校验、哈希与跨设备移动
//! - **ledger**: 预写操作账本（SQLite / 内存）
//! - **llm**: 推理模型协作者抽象与脚本化实现
//! - **observability**: tracing 初始化
//! - **react**: 响应解析、Prompt、确认协作者、ReAct 主循环
//! - **risk**: 命令风险评分与黑名单
//! - **rollback**: 按账本逆转已成功的操作
//! - **tools**: 动作枚举、工作区沙箱、执行器与观察

pub mod backup;
pub mod config;
pub mod core;
pub mod fsutil;
pub mod ledger;
pub mod llm;
pub mod observability;
pub mod react;
pub mod risk;
pub mod rollback;
pub mod tools;

pub use crate::core::{AgentBuilder, Orchestrator, RunReport};
