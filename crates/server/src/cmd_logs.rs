//! `klaude logs` — pretty-print a session's JSONL event log.

use std::path::Path;

use serde_json::Value;

use crate::config::Config;
use crate::paths;

pub fn run(
    project_root: &Path,
    config: &Config,
    session_id: &str,
    tail: Option<usize>,
) -> anyhow::Result<()> {
    let hash = paths::project_hash(project_root);
    let path = paths::session_log_path(&config.projects_dir(), &hash, session_id);
    if !path.exists() {
        anyhow::bail!("no log file for session {} at {}", session_id, path.display());
    }

    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = tail.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);

    for line in &lines[start..] {
        match serde_json::from_str::<Value>(line) {
            Ok(parsed) => {
                let timestamp = parsed["timestamp"].as_str().unwrap_or("-");
                let kind = parsed["kind"].as_str().unwrap_or("?");
                let payload = &parsed["payload"];
                if payload.is_null() {
                    println!("{}  {}", timestamp, kind);
                } else {
                    println!("{}  {:<36} {}", timestamp, kind, compact_payload(payload));
                }
            }
            Err(_) => println!("{}", line),
        }
    }
    Ok(())
}

/// One-line payload rendering; long text fields are truncated.
fn compact_payload(payload: &Value) -> String {
    let mut rendered = payload.to_string();
    if rendered.len() > 160 {
        let cut = (0..=160)
            .rev()
            .find(|&i| rendered.is_char_boundary(i))
            .unwrap_or(0);
        rendered.truncate(cut);
        rendered.push('…');
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_payload_truncates_at_char_boundary() {
        let long = "é".repeat(200);
        let rendered = compact_payload(&json!({ "text": long }));
        assert!(rendered.ends_with('…'));
        assert!(rendered.len() <= 164);
    }

    #[test]
    fn short_payloads_pass_through() {
        let rendered = compact_payload(&json!({"pid": 42}));
        assert_eq!(rendered, "{\"pid\":42}");
    }
}
