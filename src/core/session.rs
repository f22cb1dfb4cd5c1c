//! 会话守卫：run 打开的会话在任何退出路径上恰好收尾一次
//!
//! 正常结束调用 `finish(success)`；若 run 的 future 被丢弃或提前返回，Drop 以失败状态收尾。
//! 账本的 finalize_session 只在 Running 状态生效，重复调用无副作用。

use std::sync::Arc;

use crate::core::LedgerError;
use crate::ledger::Ledger;

pub struct SessionGuard {
    ledger: Arc<dyn Ledger>,
    session_id: String,
    finalized: bool,
}

impl SessionGuard {
    pub fn new(ledger: Arc<dyn Ledger>, session_id: impl Into<String>) -> Self {
        Self {
            ledger,
            session_id: session_id.into(),
            finalized: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 以给定结果收尾；返回本次是否生效
    pub fn finish(mut self, success: bool) -> Result<bool, LedgerError> {
        self.finalized = true;
        self.ledger.finalize_session(&self.session_id, success)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        match self.ledger.finalize_session(&self.session_id, false) {
            Ok(true) => tracing::warn!(session_id = %self.session_id, "session finalized as failed on early exit"),
            Ok(false) => {}
            Err(e) => tracing::error!(session_id = %self.session_id, error = %e, "failed to finalize session"),
        }
    }
}
