//! Central path resolution for all klaude data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `KLAUDE_DATA_DIR` env >
//! `~/.klaude`. All callsites use these helpers instead of constructing
//! paths from `HOME`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Project hashes are truncated so `run/<hash>/<ulid>.sock` stays well below
/// the kernel's sun_path limit.
pub const PROJECT_HASH_LEN: usize = 24;

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `KLAUDE_DATA_DIR` env > `~/.klaude` default.
/// Panics if no valid path can be resolved.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("KLAUDE_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .expect("HOME directory not found")
            .join(".klaude")
    };

    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = Some(dir.clone());
    dir
}

/// Return the current data directory. Panics if `init_data_dir` hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .expect("DATA_DIR lock poisoned")
        .clone()
        .expect("data_dir() called before init_data_dir()")
}

pub fn db_path() -> PathBuf {
    data_dir().join("db.sqlite")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn run_dir() -> PathBuf {
    data_dir().join("run")
}

pub fn projects_dir() -> PathBuf {
    data_dir().join("projects")
}

pub fn registry_dir() -> PathBuf {
    data_dir().join("registry")
}

/// SHA-256 of the project root path, truncated to 24 hex chars.
pub fn project_hash(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let full = format!("{:x}", hasher.finalize());
    full[..PROJECT_HASH_LEN].to_string()
}

/// `<socketDir>/<projectHash>/<instanceId>.sock`
pub fn socket_path(socket_dir: &Path, project_hash: &str, instance_id: &str) -> PathBuf {
    socket_dir
        .join(project_hash)
        .join(format!("{}.sock", instance_id))
}

/// `<projectsDir>/<projectHash>/sessions/<sessionId>.jsonl`
pub fn session_log_path(projects_dir: &Path, project_hash: &str, session_id: &str) -> PathBuf {
    projects_dir
        .join(project_hash)
        .join("sessions")
        .join(format!("{}.jsonl", session_id))
}

/// `<registryDir>/<projectHash>/instances.json`
pub fn instances_registry_path(project_hash: &str) -> PathBuf {
    registry_dir().join(project_hash).join("instances.json")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    std::fs::create_dir_all(base.join("run"))?;
    std::fs::create_dir_all(base.join("projects"))?;
    std::fs::create_dir_all(base.join("registry"))?;
    Ok(())
}

/// Serializes tests that reconfigure the global data dir.
#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_hash_is_24_hex_chars() {
        let hash = project_hash(Path::new("/p"));
        assert_eq!(hash.len(), PROJECT_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_hash_is_stable_and_distinct() {
        let a = project_hash(Path::new("/home/me/project-a"));
        let b = project_hash(Path::new("/home/me/project-b"));
        assert_eq!(a, project_hash(Path::new("/home/me/project-a")));
        assert_ne!(a, b);
    }

    #[test]
    fn project_hash_matches_sha256_prefix() {
        let hash = project_hash(Path::new("/p"));
        let mut hasher = Sha256::new();
        hasher.update(b"/p");
        let full = format!("{:x}", hasher.finalize());
        assert_eq!(hash, full[..PROJECT_HASH_LEN]);
    }

    #[test]
    fn socket_path_shape() {
        let path = socket_path(Path::new("/tmp/run"), "abc123", "01ARZ");
        assert_eq!(path, PathBuf::from("/tmp/run/abc123/01ARZ.sock"));
    }
}
