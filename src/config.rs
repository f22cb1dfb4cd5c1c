//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FILEKEEPER__*` 覆盖（双下划线表示嵌套，如 `FILEKEEPER__AGENT__MAX_STEPS=30`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub backup: BackupSection,
    pub ledger: LedgerSection,
    pub risk: RiskSection,
}

/// [app] 段：应用名、沙箱根目录、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 账本与回收站的默认父目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".filekeeper")
}

/// [agent] 段：ReAct 步数上限与会话归属
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_agent_id() -> String {
    "file-operation-agent".to_string()
}

fn default_max_steps() -> usize {
    20
}

/// [backup] 段：回收站位置与保留天数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub recycle_bin: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            recycle_bin: None,
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

/// [ledger] 段：SQLite 账本路径
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LedgerSection {
    pub db_path: Option<PathBuf>,
}

/// [risk] 段：confirm-required 级别的默认处理
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RiskSection {
    pub auto_approve_confirm: bool,
}

impl AppConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn recycle_bin(&self) -> PathBuf {
        self.backup
            .recycle_bin
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("recycle_bin"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .db_path
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("operations.db"))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.backup.retention_days))
    }
}

/// 从 config 目录加载配置，环境变量 FILEKEEPER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FILEKEEPER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FILEKEEPER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
