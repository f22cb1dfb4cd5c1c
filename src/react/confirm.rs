//! 高风险动作的确认协作者
//!
//! 评分落在 confirm-required 区间的动作执行前询问 `ConfirmationHandler`；默认实现一律拒绝。

use async_trait::async_trait;
use serde::Serialize;

/// 交给确认方的信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub session_id: String,
    pub tool: String,
    /// 动作的命令行式描述（评分输入）
    pub description: String,
    pub score: u8,
}

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// 返回 true 表示批准执行
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDeny;

#[async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        tracing::info!(
            session_id = %request.session_id,
            tool = %request.tool,
            score = request.score,
            "confirmation denied"
        );
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        tracing::info!(
            session_id = %request.session_id,
            tool = %request.tool,
            score = request.score,
            "confirmation auto-approved"
        );
        true
    }
}
