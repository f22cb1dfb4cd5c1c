//! 文件系统辅助：整树复制、删除、统计与内容哈希（均为同步调用，由调用方放入 spawn_blocking）
//!
//! 符号链接一律按链接本身处理：复制时重建链接，统计与校验不跟随。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// 文件数与总字节数；目录校验用（符号链接计为 0 字节的文件）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: u64,
    pub bytes: u64,
}

/// 路径本身是否存在（悬空链接也算存在）
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// 复制文件或整棵目录树到 `dst`（`dst` 不应已存在）
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if !meta.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return copy_entry(src, meta.file_type(), dst);
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_entry(entry.path(), entry.file_type(), &target)?;
        }
    }
    Ok(())
}

fn copy_entry(src: &Path, file_type: fs::FileType, dst: &Path) -> io::Result<()> {
    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        make_symlink(&target, dst)
    } else if file_type.is_file() {
        fs::copy(src, dst).map(|_| ())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported file type: {}", src.display()),
        ))
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    // 相对目标按链接所在目录解析
    let resolved = match link.parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    };
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symbolic links are not supported: {}", link.display()),
    ))
}

/// 删除文件、链接或目录（递归）
pub fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub fn tree_stats(path: &Path) -> io::Result<TreeStats> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(TreeStats { files: 1, bytes: 0 });
    }
    if !meta.is_dir() {
        return Ok(TreeStats {
            files: 1,
            bytes: meta.len(),
        });
    }
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            stats.files += 1;
        } else if file_type.is_file() {
            stats.files += 1;
            stats.bytes += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(stats)
}

/// 文件内容 SHA-256（hex）
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// 校验副本与原件一致：链接比较指向，文件比较大小与哈希，目录比较文件数与总字节
pub fn verify_copy(original: &Path, copy: &Path) -> io::Result<Result<(), String>> {
    let a = fs::symlink_metadata(original)?;
    let b = match fs::symlink_metadata(copy) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Err("copy is missing".to_string()))
        }
        Err(e) => return Err(e),
    };
    let (a_link, b_link) = (a.file_type().is_symlink(), b.file_type().is_symlink());
    if a.is_dir() != b.is_dir() || a_link != b_link {
        return Ok(Err("file type differs".to_string()));
    }
    if a_link {
        if fs::read_link(original)? != fs::read_link(copy)? {
            return Ok(Err("link target differs".to_string()));
        }
        return Ok(Ok(()));
    }
    if a.is_dir() {
        let (sa, sb) = (tree_stats(original)?, tree_stats(copy)?);
        if sa != sb {
            return Ok(Err(format!(
                "expected {} files / {} bytes, found {} files / {} bytes",
                sa.files, sa.bytes, sb.files, sb.bytes
            )));
        }
        return Ok(Ok(()));
    }
    if a.len() != b.len() {
        return Ok(Err(format!("expected {} bytes, found {}", a.len(), b.len())));
    }
    if sha256_file(original)? != sha256_file(copy)? {
        return Ok(Err("content hash differs".to_string()));
    }
    Ok(Ok(()))
}

/// 复制后立即校验；复制中途失败或校验不一致都会删除已产生的副本
pub fn copy_verified(src: &Path, dst: &Path) -> io::Result<()> {
    if let Err(e) = copy_tree(src, dst) {
        discard_partial(dst);
        return Err(e);
    }
    match verify_copy(src, dst) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => {
            discard_partial(dst);
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("copy of {} failed verification: {reason}", src.display()),
            ))
        }
        Err(e) => {
            discard_partial(dst);
            Err(e)
        }
    }
}

fn discard_partial(dst: &Path) {
    match remove_path(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dst.display(), error = %e, "could not remove partial copy"),
    }
}

/// 创建 `path` 缺失的父目录，返回本次新建的目录（由浅到深）
pub fn create_parents(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || path_exists(dir) {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing.reverse();
    if let Some(deepest) = missing.last() {
        fs::create_dir_all(deepest)?;
    }
    Ok(missing)
}

/// 由深到浅删除 `create_parents` 建立的目录；遇到非空目录即停止
pub fn remove_created_dirs(dirs: &[PathBuf]) {
    for dir in dirs.iter().rev() {
        match fs::remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(_) => break,
        }
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(18) // EXDEV
}

#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

/// 重命名；跨设备时退化为复制 + 校验 + 删除源。返回为目的地新建的父目录，失败时已清理
pub fn move_path(src: &Path, dst: &Path) -> io::Result<Vec<PathBuf>> {
    let created = create_parents(dst)?;
    let moved = match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => copy_verified(src, dst).and_then(|()| remove_path(src)),
        Err(e) => Err(e),
    };
    match moved {
        Ok(()) => Ok(created),
        Err(e) => {
            if !path_exists(dst) {
                remove_created_dirs(&created);
            }
            Err(e)
        }
    }
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        fs::write(src.join("nested/b.txt"), "world!").unwrap();

        let dst = dir.path().join("out/copy");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "world!");
        assert_eq!(
            tree_stats(&dst).unwrap(),
            TreeStats {
                files: 2,
                bytes: 11
            }
        );
        assert_eq!(verify_copy(&src, &dst).unwrap(), Ok(()));
    }

    #[test]
    fn test_verify_detects_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "hello").unwrap();
        fs::write(&b, "hellO").unwrap();
        assert!(verify_copy(&a, &b).unwrap().is_err());
        assert!(verify_copy(&a, &dir.path().join("none")).unwrap().is_err());
    }

    #[test]
    fn test_sha256_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("h.txt");
        fs::write(&p, "hello").unwrap();
        assert_eq!(
            sha256_file(&p).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_move_path_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, "x").unwrap();
        let b = dir.path().join("deep/er/b.txt");
        let created = move_path(&a, &b).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read_to_string(&b).unwrap(), "x");
        assert_eq!(
            created,
            vec![dir.path().join("deep"), dir.path().join("deep/er")]
        );
    }

    #[test]
    fn test_create_parents_reports_only_new_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        let created = create_parents(&dir.path().join("a/b/c/f.txt")).unwrap();
        assert_eq!(created, vec![dir.path().join("a/b"), dir.path().join("a/b/c")]);

        fs::write(dir.path().join("a/b/keep.txt"), "k").unwrap();
        remove_created_dirs(&created);
        assert!(!dir.path().join("a/b/c").exists());
        // 非空目录保留
        assert!(dir.path().join("a/b/keep.txt").exists());
        assert!(create_parents(&dir.path().join("a/x.txt")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_failure_leaves_no_partial_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("d");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(src.join("sock")).unwrap();

        let dst = dir.path().join("e");
        let err = copy_verified(&src, &dst).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(!path_exists(&dst));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_copied_as_links() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("big.bin"), vec![0u8; 64]).unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink(&real, src.join("to-dir")).unwrap();
        std::os::unix::fs::symlink("missing", src.join("dangling")).unwrap();

        assert_eq!(tree_stats(&src).unwrap(), TreeStats { files: 2, bytes: 0 });
        let dst = dir.path().join("copy");
        copy_verified(&src, &dst).unwrap();
        assert!(is_symlink(&dst.join("to-dir")));
        assert_eq!(fs::read_link(dst.join("dangling")).unwrap(), PathBuf::from("missing"));

        let link_copy = dir.path().join("single");
        copy_verified(&src.join("to-dir"), &link_copy).unwrap();
        assert_eq!(fs::read_link(&link_copy).unwrap(), real);
        assert_eq!(verify_copy(&src.join("to-dir"), &link_copy).unwrap(), Ok(()));
    }

    #[test]
    fn test_remove_path_handles_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().join("d");
        fs::create_dir_all(d.join("x")).unwrap();
        fs::write(d.join("x/f"), "1").unwrap();
        remove_path(&d).unwrap();
        assert!(!d.exists());
        assert_eq!(
            remove_path(&d).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
