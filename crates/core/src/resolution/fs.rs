//! Filesystem helpers for plan execution: containment checks, backups and
//! atomic writes.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::errors::ValidationError;

/// Lexical check: non-empty, relative, no `..` and no root/prefix parts.
pub fn check_relative(path: &str) -> Result<(), ValidationError> {
    let escapes = || ValidationError::PathEscapesRepository(path.to_string());
    if path.trim().is_empty() {
        return Err(escapes());
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }
    Ok(())
}

/// Resolve `rel` under `root`, rejecting anything that leaves the root
/// either lexically or through a symlinked ancestor.
pub fn contained_path(root: &Path, rel: &str) -> Result<PathBuf, ValidationError> {
    check_relative(rel)?;
    let escapes = || ValidationError::PathEscapesRepository(rel.to_string());

    let root = root.canonicalize().map_err(|_| escapes())?;
    let full = root.join(rel);

    let mut ancestor = full.parent();
    while let Some(dir) = ancestor {
        if dir.exists() {
            let real = dir.canonicalize().map_err(|_| escapes())?;
            if !real.starts_with(&root) {
                return Err(escapes());
            }
            break;
        }
        ancestor = dir.parent();
    }

    if let Ok(meta) = fs::symlink_metadata(&full) {
        if meta.file_type().is_symlink() {
            let target = full.canonicalize().map_err(|_| escapes())?;
            if !target.starts_with(&root) {
                return Err(escapes());
            }
        }
    }
    Ok(full)
}

const MAX_BACKUP_SLOTS: usize = 1000;

/// `<file>.bak` next to `path`, or `<file>.bak.N` for slot `N > 0`.
pub fn backup_path(path: &Path, slot: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    if slot > 0 {
        name.push(format!(".{}", slot));
    }
    PathBuf::from(name)
}

/// Copy an existing file to the first free backup slot. An existing backup
/// is never overwritten. `None` when there is nothing to back up.
pub fn backup(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    for slot in 0..MAX_BACKUP_SLOTS {
        let dest = backup_path(path, slot);
        // Reserve the name before copying.
        match fs::OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(_) => {
                fs::copy(path, &dest)?;
                debug!(path = %path.display(), backup = %dest.display(), "backup written");
                return Ok(Some(dest));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free backup slot for {}", path.display()),
    ))
}

/// Write through a temp file in the same directory and rename over the
/// target. Existing permissions are kept.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(temp.path(), permissions)?;
    }
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Put a file back the way it was before the plan touched it: restore the
/// backup, or remove the file when it did not exist.
pub fn restore(path: &Path, backup: Option<&Path>) -> io::Result<()> {
    match backup {
        Some(b) => {
            let content = fs::read(b)?;
            atomic_write(path, &content)?;
            fs::remove_file(b)
        }
        None => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_relative() {
        assert!(check_relative("src/app.py").is_ok());
        assert!(check_relative("./app.py").is_ok());
        assert!(check_relative("../app.py").is_err());
        assert!(check_relative("src/../../x").is_err());
        assert!(check_relative("/etc/passwd").is_err());
        assert!(check_relative("").is_err());
    }

    #[test]
    fn test_contained_path_accepts_new_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = contained_path(dir.path(), "new/dir/file.py").unwrap();
        assert!(path.ends_with("new/dir/file.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_contained_path_rejects_symlinked_parent() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();
        assert!(matches!(
            contained_path(root.path(), "link/evil.py"),
            Err(ValidationError::PathEscapesRepository(_))
        ));
    }

    #[test]
    fn test_backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "original").unwrap();

        let bak = backup(&file).unwrap().unwrap();
        assert_eq!(bak, dir.path().join("a.txt.bak"));
        atomic_write(&file, b"changed").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "changed");

        restore(&file, Some(&bak)).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
        assert!(!bak.exists());
    }

    #[test]
    fn test_backup_keeps_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let earlier = dir.path().join("a.txt.bak");
        fs::write(&earlier, "from an earlier run").unwrap();
        fs::write(&file, "current").unwrap();

        let bak = backup(&file).unwrap().unwrap();
        assert_eq!(bak, dir.path().join("a.txt.bak.1"));
        assert_eq!(fs::read_to_string(&bak).unwrap(), "current");
        assert_eq!(fs::read_to_string(&earlier).unwrap(), "from an earlier run");

        atomic_write(&file, b"changed").unwrap();
        restore(&file, Some(&bak)).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "current");
        assert!(earlier.exists());
    }

    #[test]
    fn test_restore_removes_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("created.txt");
        assert!(backup(&file).unwrap().is_none());
        atomic_write(&file, b"x").unwrap();
        restore(&file, None).unwrap();
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_keeps_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.sh");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        atomic_write(&file, b"#!/bin/sh\necho hi\n").unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
