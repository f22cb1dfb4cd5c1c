//! 三维风险评分
//!
//! score = round(((操作类型权重 + 目标敏感度权重) / 2) × 影响范围系数)，上限 10；
//! 黑名单命中直接 10 分。纯函数，无副作用，不访问账本。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::blacklist::Blacklist;

/// 操作类型；按破坏性优先顺序检测
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Batch,
    Delete,
    Exec,
}

impl OperationKind {
    pub fn weight(self) -> u8 {
        match self {
            OperationKind::Read => 1,
            OperationKind::Create => 2,
            OperationKind::Update => 4,
            OperationKind::Batch => 5,
            OperationKind::Delete => 6,
            OperationKind::Exec => 7,
        }
    }
}

/// 目标敏感度；System 优先检测
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSensitivity {
    Temp,
    User,
    Project,
    System,
}

impl TargetSensitivity {
    pub fn weight(self) -> u8 {
        match self {
            TargetSensitivity::Temp | TargetSensitivity::User => 2,
            TargetSensitivity::Project => 8,
            TargetSensitivity::System => 9,
        }
    }
}

/// 影响范围
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    SingleFile,
    Directory,
    CrossDir,
    SystemLevel,
}

impl BlastRadius {
    pub fn multiplier(self) -> f64 {
        match self {
            BlastRadius::SingleFile => 1.0,
            BlastRadius::Directory => 1.3,
            BlastRadius::CrossDir => 1.5,
            BlastRadius::SystemLevel => 2.0,
        }
    }
}

/// 评分分档
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Safe,
    Caution,
    ConfirmRequired,
    Blocked,
}

impl Verdict {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => Verdict::Safe,
            4..=6 => Verdict::Caution,
            7..=8 => Verdict::ConfirmRequired,
            _ => Verdict::Blocked,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Caution => "caution",
            Verdict::ConfirmRequired => "confirm-required",
            Verdict::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 单次评分结果（派生数据，不落盘）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub operation: OperationKind,
    pub target: TargetSensitivity,
    pub radius: BlastRadius,
    pub score: u8,
    pub verdict: Verdict,
    pub matched_rule: Option<String>,
}

impl RiskAssessment {
    fn empty() -> Self {
        Self {
            operation: OperationKind::Read,
            target: TargetSensitivity::User,
            radius: BlastRadius::SingleFile,
            score: 0,
            verdict: Verdict::Safe,
            matched_rule: None,
        }
    }
}

struct Classifiers {
    delete: Regex,
    exec: Regex,
    batch: Regex,
    update: Regex,
    create: Regex,
    read: Regex,
    system: Regex,
    project: Regex,
    temp: Regex,
    system_anchor: Regex,
    recursive_flag: Regex,
}

impl Classifiers {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            delete: Regex::new(
                r"(?i)\b(rm|rmdir|del|erase|rd|unlink|delete|remove|shred|deltree|truncate)\b|删除|移除|清空",
            )?,
            exec: Regex::new(
                r"(?i)\b(python[0-9.]*|node|bash|zsh|sh|exec|eval|run|powershell|cmd|npm|npx|cargo|make|perl|ruby|java|kill|pkill|killall|taskkill)\b|执行|运行",
            )?,
            batch: Regex::new(r"(?i)\b(xargs|batch|all files|every file)\b|批量|所有文件|全部")?,
            update: Regex::new(
                r"(?i)\b(mv|move|rename|ren|edit|modify|update|sed|chmod|chown|patch|replace|append|overwrite)\b|修改|编辑|移动|重命名|更新",
            )?,
            create: Regex::new(
                r"(?i)\b(touch|mkdir|cp|copy|write|create|new|echo|tee)\b|>|创建|新建|写入|复制",
            )?,
            read: Regex::new(
                r"(?i)\b(cat|ls|dir|type|head|tail|less|more|grep|rg|find|pwd|stat|read|list|search|view|show|wc|tree)\b|查看|读取|列出|搜索|查找",
            )?,
            system: Regex::new(
                r#"(?i)(^|[\s'"=])(/|/\*|[a-z]:\\?)($|[\s'"])|(^|[\s'"=])/(etc|bin|sbin|usr|boot|dev|proc|sys|lib|lib64|root|var|opt|system|library)(/|$|[\s'"])|[a-z]:\\(windows|program files)|\.ssh\b|id_rsa|\.gnupg|\.aws[/\\]credentials|\.netrc"#,
            )?,
            project: Regex::new(
                r#"(?i)(^|[\s'"/\\])(src|tests?|lib|libs|backend|frontend|app|apps|pkg|cmd|crates|include|scripts)[/\\]|\b(cargo\.toml|cargo\.lock|package\.json|go\.mod|pyproject\.toml|requirements\.txt|makefile|dockerfile)\b|(^|[\s/\\])\.git([/\\\s]|$)|\.(rs|py|go|ts|tsx|js|jsx|java|c|cc|cpp|h|hpp|cs|rb|php|swift|kt)($|[\s'"])"#,
            )?,
            temp: Regex::new(
                r#"(?i)(^|[\s'"/\\])(tmp|temp|cache|\.cache|__pycache__)([/\\.\s]|$)|\.(log|tmp|bak|swp)\b|临时|缓存"#,
            )?,
            system_anchor: Regex::new(
                r"(?i)^(/|/\*|\\|~|~/|[a-z]:|[a-z]:[\\/])$|^/(etc|bin|sbin|usr|boot|dev|proc|sys|lib|lib64|root|var|opt|system|library)/?$|^[a-z]:\\(windows|program files)\\?$",
            )?,
            recursive_flag: Regex::new(r"^(-[a-zA-Z]{0,2}[rR][a-zA-Z]{0,2}|--recursive|/s)$")?,
        })
    }
}

static CLASSIFIERS: OnceLock<Result<Classifiers, regex::Error>> = OnceLock::new();

/// 风险评分器；无状态，构造一次后以 Arc 共享
#[derive(Debug, Default, Clone)]
pub struct RiskScorer {
    blacklist: Blacklist,
}

impl RiskScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只取分数
    pub fn score(&self, command: &str) -> u8 {
        self.assess(command).score
    }

    pub fn assess(&self, command: &str) -> RiskAssessment {
        let text = command.trim();
        if text.is_empty() {
            return RiskAssessment::empty();
        }

        let classifiers = match CLASSIFIERS.get_or_init(Classifiers::compile) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "risk classifiers failed to compile");
                return RiskAssessment {
                    score: 10,
                    verdict: Verdict::Blocked,
                    matched_rule: Some("classifier unavailable".to_string()),
                    ..RiskAssessment::empty()
                };
            }
        };

        let tokens = path_tokens(text);
        let operation = classify_operation(classifiers, text, &tokens);
        let target = classify_target(classifiers, text);
        let radius = classify_radius(classifiers, text, &tokens);

        if let Some(rule) = self.blacklist.check(text) {
            return RiskAssessment {
                operation,
                target,
                radius,
                score: 10,
                verdict: Verdict::Blocked,
                matched_rule: Some(rule),
            };
        }

        let base = f64::from(operation.weight() + target.weight()) / 2.0;
        let score = (base * radius.multiplier()).round().min(10.0) as u8;

        RiskAssessment {
            operation,
            target,
            radius,
            score,
            verdict: Verdict::from_score(score),
            matched_rule: None,
        }
    }
}

/// 命令词之后的非选项参数，去掉引号；视作候选路径
fn path_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .skip(1)
        .filter(|t| !t.starts_with('-'))
        .filter(|t| !matches!(*t, ">" | ">>" | "<" | "|" | "&&" | "||" | ";"))
        .map(|t| t.trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn has_wildcard(tokens: &[String]) -> bool {
    tokens.iter().any(|t| t.contains('*') || t.contains('?'))
}

/// 去掉形似路径的词，避免文件名里的单词被当成动词
fn verb_text(text: &str) -> String {
    text.split_whitespace()
        .filter(|t| !t.contains(|c: char| matches!(c, '/' | '\\' | '.')))
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_operation(c: &Classifiers, text: &str, tokens: &[String]) -> OperationKind {
    let runs_local_script = text.starts_with("./");
    let text = verb_text(text);
    let text = text.as_str();
    if c.delete.is_match(text) {
        OperationKind::Delete
    } else if runs_local_script || c.exec.is_match(text) {
        OperationKind::Exec
    } else if c.batch.is_match(text) || has_wildcard(tokens) {
        OperationKind::Batch
    } else if c.update.is_match(text) {
        OperationKind::Update
    } else if c.create.is_match(text) {
        OperationKind::Create
    } else if c.read.is_match(text) {
        OperationKind::Read
    } else {
        // 意图不明按中等风险处理
        OperationKind::Update
    }
}

fn classify_target(c: &Classifiers, text: &str) -> TargetSensitivity {
    if c.system.is_match(text) {
        TargetSensitivity::System
    } else if c.project.is_match(text) {
        TargetSensitivity::Project
    } else if c.temp.is_match(text) {
        TargetSensitivity::Temp
    } else {
        TargetSensitivity::User
    }
}

fn parent_of(token: &str) -> String {
    let normalized = token.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

fn classify_radius(c: &Classifiers, text: &str, tokens: &[String]) -> BlastRadius {
    if tokens.iter().any(|t| c.system_anchor.is_match(t)) {
        return BlastRadius::SystemLevel;
    }

    let climbs = tokens
        .iter()
        .any(|t| t.replace('\\', "/").split('/').any(|part| part == ".."));
    let parents: BTreeSet<String> = tokens.iter().map(|t| parent_of(t)).collect();
    if climbs || parents.len() > 1 {
        return BlastRadius::CrossDir;
    }

    let recursive = text
        .split_whitespace()
        .skip(1)
        .any(|t| c.recursive_flag.is_match(t));
    let directory_target = tokens
        .iter()
        .any(|t| t == "." || t.ends_with('/') || t.ends_with('\\'));
    if recursive || directory_target || has_wildcard(tokens) {
        return BlastRadius::Directory;
    }

    BlastRadius::SingleFile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(cmd: &str) -> RiskAssessment {
        RiskScorer::new().assess(cmd)
    }

    #[test]
    fn test_root_wipe_is_blocked() {
        let a = assess("rm -rf /");
        assert_eq!(a.score, 10);
        assert_eq!(a.verdict, Verdict::Blocked);
        assert_eq!(a.verdict.label(), "blocked");
        assert!(a.matched_rule.is_some());
    }

    #[test]
    fn test_reading_a_user_file_is_safe() {
        let a = assess("cat readme.txt");
        assert_eq!(a.operation, OperationKind::Read);
        assert_eq!(a.target, TargetSensitivity::User);
        assert_eq!(a.radius, BlastRadius::SingleFile);
        assert!(a.score <= 3, "score was {}", a.score);
        assert_eq!(a.verdict, Verdict::Safe);
    }

    #[test]
    fn test_empty_input_scores_zero() {
        let a = assess("   ");
        assert_eq!(a.score, 0);
        assert_eq!(a.verdict, Verdict::Safe);
    }

    #[test]
    fn test_destructive_keyword_wins_over_benign_one() {
        // "cat" 与 "rm" 同时出现时按删除计
        let a = assess("cat notes.txt && rm notes.txt");
        assert_eq!(a.operation, OperationKind::Delete);
    }

    #[test]
    fn test_calibration_scores() {
        assert_eq!(RiskScorer::new().score("echo 'test' > temp.txt"), 2);
        assert_eq!(RiskScorer::new().score("del temp.log"), 4);
        assert_eq!(RiskScorer::new().score("rm tests/11.txt"), 7);
        assert_eq!(RiskScorer::new().score("find . -name *.txt"), 5);
        assert_eq!(RiskScorer::new().score("编辑配置文件"), 3);
    }

    #[test]
    fn test_project_source_delete_requires_confirmation() {
        let a = assess("rm src/main.rs");
        assert_eq!(a.target, TargetSensitivity::Project);
        assert_eq!(a.verdict, Verdict::ConfirmRequired);
    }

    #[test]
    fn test_chinese_delete_verb_recognised() {
        let a = assess("删除文件 tests/11.txt");
        assert_eq!(a.operation, OperationKind::Delete);
        assert_eq!(a.score, 7);
    }

    #[test]
    fn test_move_across_directories_is_cross_dir() {
        let a = assess("mv notes/a.txt archive/a.txt");
        assert_eq!(a.operation, OperationKind::Update);
        assert_eq!(a.radius, BlastRadius::CrossDir);
        assert_eq!(a.score, 5);
    }

    #[test]
    fn test_words_inside_file_names_are_not_verbs() {
        assert_eq!(assess("cat notes/run.txt").operation, OperationKind::Read);
        assert_eq!(assess("ls ./docs").operation, OperationKind::Read);
        assert_eq!(assess("./build.sh").operation, OperationKind::Exec);
    }

    #[test]
    fn test_parent_traversal_is_cross_dir() {
        assert_eq!(assess("cat ../other/notes.txt").radius, BlastRadius::CrossDir);
    }

    #[test]
    fn test_recursive_flag_widens_radius() {
        let a = assess("rm -r build");
        assert_eq!(a.radius, BlastRadius::Directory);
        // (6 + 2) / 2 * 1.3 = 5.2
        assert_eq!(a.score, 5);
    }

    #[test]
    fn test_system_file_write_scores_high() {
        let a = assess("write /etc/hosts.allow");
        assert_eq!(a.target, TargetSensitivity::System);
        assert!(a.score >= 5);
    }

    #[test]
    fn test_credential_reads_are_blocked() {
        assert_eq!(assess("cat ~/.ssh/id_rsa").verdict, Verdict::Blocked);
        assert_eq!(assess("cat /etc/shadow").score, 10);
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(Verdict::from_score(0), Verdict::Safe);
        assert_eq!(Verdict::from_score(3), Verdict::Safe);
        assert_eq!(Verdict::from_score(4), Verdict::Caution);
        assert_eq!(Verdict::from_score(6), Verdict::Caution);
        assert_eq!(Verdict::from_score(7), Verdict::ConfirmRequired);
        assert_eq!(Verdict::from_score(8), Verdict::ConfirmRequired);
        assert_eq!(Verdict::from_score(9), Verdict::Blocked);
        assert_eq!(Verdict::from_score(10), Verdict::Blocked);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = RiskScorer::new();
        let first = scorer.assess("mv a.txt b.txt");
        for _ in 0..10 {
            assert_eq!(scorer.assess("mv a.txt b.txt"), first);
        }
    }
}
