//! 风险评分闸门
//!
//! 黑名单短路 + 操作类型 / 目标敏感度 / 影响范围三维评分，产出 0-10 分与分档。

pub mod blacklist;
pub mod scorer;

pub use blacklist::Blacklist;
pub use scorer::{
    BlastRadius, OperationKind, RiskAssessment, RiskScorer, TargetSensitivity, Verdict,
};
