//! `klaude sessions` — list this project's session tree from the store.

use std::collections::HashMap;
use std::path::Path;

use crate::paths;
use crate::store::{SessionRow, Store};

pub fn run(project_root: &Path) -> anyhow::Result<()> {
    let store = Store::open(&paths::db_path())?;
    let hash = paths::project_hash(project_root);
    let Some(project) = store.get_project_by_hash(&hash)? else {
        println!("No sessions recorded for {}", project_root.display());
        return Ok(());
    };

    let sessions = store.list_sessions(project.id)?;
    if sessions.is_empty() {
        println!("No sessions recorded for {}", project_root.display());
        return Ok(());
    }

    // Render as a tree: roots first, children indented under their parent.
    let mut children: HashMap<Option<String>, Vec<&SessionRow>> = HashMap::new();
    for session in &sessions {
        children
            .entry(session.parent_id.clone())
            .or_default()
            .push(session);
    }

    println!();
    println!(
        "  {:<26} {:<16} {:<12} {:<20} {}",
        "SESSION", "AGENT", "STATUS", "CREATED", "TITLE"
    );
    if let Some(roots) = children.get(&None) {
        for root in roots.clone() {
            print_subtree(root, &children, 0);
        }
    }
    println!();
    Ok(())
}

fn print_subtree(
    session: &SessionRow,
    children: &HashMap<Option<String>, Vec<&SessionRow>>,
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    let created = session.created_at.get(..19).unwrap_or(&session.created_at);
    println!(
        "  {:<26} {:<16} {:<12} {:<20} {}{}",
        session.id,
        session.agent_type,
        session.status.as_str(),
        created,
        indent,
        session.title.as_deref().unwrap_or("-"),
    );
    if let Some(kids) = children.get(&Some(session.id.clone())) {
        for kid in kids {
            print_subtree(kid, children, depth + 1);
        }
    }
}
