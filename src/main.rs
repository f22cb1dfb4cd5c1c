//! filekeeper 维护入口
//!
//! 初始化日志、加载配置、打开账本与回收站，执行一次过期备份清理并输出最近会话概况。
//! 用法：`filekeeper [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use filekeeper::backup::BackupStore;
use filekeeper::config::load_config;
use filekeeper::ledger::{Ledger, SqliteLedger};
use filekeeper::observability;
use filekeeper::rollback::RollbackEngine;

const RECENT_SESSIONS: usize = 10;

fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let ledger_path = cfg.ledger_path();
    let ledger: Arc<dyn Ledger> = Arc::new(
        SqliteLedger::open(&ledger_path)
            .with_context(|| format!("Failed to open ledger at {}", ledger_path.display()))?,
    );
    let backups = Arc::new(BackupStore::new(cfg.recycle_bin(), cfg.retention()));
    tracing::info!(
        ledger = %ledger_path.display(),
        recycle_bin = %backups.root().display(),
        retention_days = cfg.backup.retention_days,
        "maintenance started"
    );

    let engine = RollbackEngine::new(Arc::clone(&ledger), backups);
    let removed = engine
        .cleanup_expired_backups(Utc::now())
        .context("Expired backup sweep failed")?;
    tracing::info!(removed, "expired backup sweep complete");

    for session in ledger
        .recent_sessions(RECENT_SESSIONS)
        .context("Failed to list sessions")?
    {
        tracing::info!(
            session_id = %session.id,
            status = %session.status,
            total = session.total_operations,
            success = session.success_count,
            failed = session.failed_count,
            rolled_back = session.rolled_back_count,
            task = %session.task_description,
            "session"
        );
    }
    Ok(())
}
