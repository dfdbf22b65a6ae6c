//! `klaude instances` — list live wrapper instances for this project.

use std::path::Path;

use crate::paths;
use crate::registry;

pub fn run(project_root: &Path) -> anyhow::Result<()> {
    let hash = paths::project_hash(project_root);
    let instances = registry::list_instances(&hash);

    if instances.is_empty() {
        println!("No running klaude instances for {}", project_root.display());
        return Ok(());
    }

    println!();
    println!("  {:<26} {:<8} {:<26} SOCKET", "INSTANCE", "PID", "STARTED");
    for instance in instances {
        println!(
            "  {:<26} {:<8} {:<26} {}",
            instance.instance_id, instance.pid, instance.started_at, instance.socket_path
        );
    }
    println!();
    Ok(())
}
