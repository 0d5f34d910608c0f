use fs2::FileExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Environment variable overriding the store root.
pub const STORE_ROOT_ENV: &str = "QUICKMERGE_HOME";

/// Compute a deterministic project ID from a project directory.
/// project_id = blake3(normalize_path(input)) → hex string (first 32 chars).
pub fn project_id(project_dir: &Path) -> String {
    let normalized = normalize_path(project_dir);
    let hash = blake3::hash(normalized.as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Normalize a path: canonicalize, lowercase on Windows, forward slashes.
fn normalize_path(p: &Path) -> String {
    let abs = p
        .canonicalize()
        .unwrap_or_else(|_| p.to_path_buf())
        .to_string_lossy()
        .to_string();
    #[cfg(windows)]
    let abs = abs.to_lowercase();
    abs.replace('\\', "/")
}

/// Return the per-user store root.
/// `$QUICKMERGE_HOME` if set, else `<data_dir>/quickmerge/`, else `~/.quickmerge/`.
pub fn store_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(STORE_ROOT_ENV).filter(|v| !v.is_empty()) {
        PathBuf::from(dir)
    } else if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("quickmerge")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".quickmerge")
    } else {
        PathBuf::from(".quickmerge-store")
    }
}

/// Return the project directory: `store_root/projects/<project_id>/`
pub fn project_dir(project_id: &str) -> PathBuf {
    store_root().join("projects").join(project_id)
}

/// Durable branch point map of a project.
pub fn branch_points_file(project_id: &str) -> PathBuf {
    project_dir(project_id).join("cache").join("branch_points.json")
}

/// Lock file guarding writers of `data_file`.
pub fn lock_path_for(data_file: &Path) -> PathBuf {
    let mut name = data_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    data_file.with_file_name(name)
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// File-based exclusive lock guard.
pub struct LockGuard {
    _file: fs::File,
}

/// Acquire an exclusive file lock (blocking). Creates the lock file if needed.
pub fn lock_file(path: &Path) -> anyhow::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(LockGuard { _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_deterministic() {
        let id1 = project_id(Path::new("/tmp/test-project"));
        let id2 = project_id(Path::new("/tmp/test-project"));
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 32);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_id_differs_per_project() {
        assert_ne!(
            project_id(Path::new("/tmp/project-a")),
            project_id(Path::new("/tmp/project-b"))
        );
    }

    #[test]
    fn store_root_is_not_empty() {
        let root = store_root();
        assert!(!root.as_os_str().is_empty());
    }

    #[test]
    fn branch_points_file_lives_under_project_cache() {
        let path = branch_points_file("abc");
        assert!(path.ends_with("projects/abc/cache/branch_points.json"));
    }

    #[test]
    fn lock_path_is_sibling() {
        let lock = lock_path_for(Path::new("/x/cache/branch_points.json"));
        assert_eq!(lock, PathBuf::from("/x/cache/branch_points.json.lock"));
    }

    #[test]
    fn write_atomic_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("test.txt");
        write_atomic(&path, b"hello world").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello world");
    }

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn lock_file_acquires_and_drops() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("test.lock");
        let guard = lock_file(&lock_path).unwrap();
        assert!(lock_path.exists());
        drop(guard);
        let _again = lock_file(&lock_path).unwrap();
    }
}
