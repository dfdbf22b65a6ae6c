//! On-disk instance registry
//!
//! `registry/<projectHash>/instances.json` is a lightweight directory of live
//! wrapper instances so CLI clients can find a socket without touching the
//! database. Entries whose pid is gone are pruned on every read.

use std::path::PathBuf;

use tracing::warn;

use klaude_protocol::InstanceInfo;

fn registry_path(project_hash: &str) -> PathBuf {
    crate::paths::instances_registry_path(project_hash)
}

fn read_raw(project_hash: &str) -> Vec<InstanceInfo> {
    let path = registry_path(project_hash);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(list) => list,
        Err(e) => {
            warn!(
                component = "registry",
                event = "registry.parse_error",
                path = %path.display(),
                error = %e,
                "Corrupt instances.json, treating as empty"
            );
            Vec::new()
        }
    }
}

fn write_raw(project_hash: &str, instances: &[InstanceInfo]) -> std::io::Result<()> {
    let path = registry_path(project_hash);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(instances)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, json)
}

pub fn process_alive(pid: u32) -> bool {
    // kill -0 checks existence without sending a signal
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Live instances for a project, pruning dead pids as a side effect.
pub fn list_instances(project_hash: &str) -> Vec<InstanceInfo> {
    let all = read_raw(project_hash);
    let (live, dead): (Vec<_>, Vec<_>) = all.into_iter().partition(|i| process_alive(i.pid));
    if !dead.is_empty() {
        if let Err(e) = write_raw(project_hash, &live) {
            warn!(
                component = "registry",
                event = "registry.prune_failed",
                error = %e,
                "Failed to prune dead instances"
            );
        }
    }
    live
}

/// Add (or replace) this instance's entry.
pub fn register_instance(project_hash: &str, info: InstanceInfo) -> std::io::Result<()> {
    let mut instances = list_instances(project_hash);
    instances.retain(|i| i.instance_id != info.instance_id);
    instances.push(info);
    write_raw(project_hash, &instances)
}

/// Remove this instance's entry on shutdown.
pub fn unregister_instance(project_hash: &str, instance_id: &str) -> std::io::Result<()> {
    let mut instances = read_raw(project_hash);
    instances.retain(|i| i.instance_id != instance_id);
    write_raw(project_hash, &instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::now_iso;

    fn info(id: &str, pid: u32) -> InstanceInfo {
        InstanceInfo {
            instance_id: id.to_string(),
            pid,
            socket_path: format!("/tmp/{}.sock", id),
            started_at: now_iso(),
            tty: None,
        }
    }

    #[test]
    fn register_list_unregister_round_trip() {
        let _guard = crate::paths::test_env_lock();
        let dir = tempfile::tempdir().unwrap();
        crate::paths::init_data_dir(Some(dir.path()));

        let own_pid = std::process::id();
        register_instance("hash-a", info("inst-1", own_pid)).unwrap();
        let live = list_instances("hash-a");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].instance_id, "inst-1");

        unregister_instance("hash-a", "inst-1").unwrap();
        assert!(list_instances("hash-a").is_empty());
    }

    #[test]
    fn dead_pids_are_pruned_on_read() {
        let _guard = crate::paths::test_env_lock();
        let dir = tempfile::tempdir().unwrap();
        crate::paths::init_data_dir(Some(dir.path()));

        // pid 1 exists but isn't ours to signal on most systems; use an
        // unlikely-to-exist pid instead.
        register_instance("hash-b", info("dead", 4_000_000)).unwrap();
        register_instance("hash-b", info("live", std::process::id())).unwrap();

        let live = list_instances("hash-b");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].instance_id, "live");
    }
}
