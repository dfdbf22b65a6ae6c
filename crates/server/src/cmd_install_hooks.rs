//! `klaude install-hooks` — configure the TUI's session hooks.
//!
//! Safely merges the two klaude hook entries into `~/.claude/settings.json`,
//! preserving everything else in the file.

use std::path::{Path, PathBuf};

/// Hook types the wrapper depends on.
const HOOK_TYPES: &[(&str, &str)] = &[
    ("SessionStart", "session-start"),
    ("SessionEnd", "session-end"),
];

pub fn run(settings_path: Option<&Path>) -> anyhow::Result<()> {
    let settings_file = settings_path.map(PathBuf::from).unwrap_or_else(|| {
        dirs::home_dir()
            .expect("HOME not found")
            .join(".claude/settings.json")
    });

    let binary = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "klaude".to_string());

    let existing = if settings_file.exists() {
        let content = std::fs::read_to_string(&settings_file)?;
        serde_json::from_str::<serde_json::Value>(&content)?
    } else {
        serde_json::json!({})
    };

    let mut settings = existing;
    let obj = settings
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("settings.json is not a JSON object"))?;

    let mut added = Vec::new();
    let mut updated = Vec::new();

    for &(hook_key, subcommand) in HOOK_TYPES {
        let command = format!("{} hook {}", binary, subcommand);

        let hooks_obj = obj.entry("hooks").or_insert_with(|| serde_json::json!({}));
        let hooks_map = hooks_obj
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("settings.json 'hooks' is not an object"))?;

        let hook_entry = serde_json::json!({
            "hooks": [{
                "type": "command",
                "command": command,
            }]
        });

        if let Some(existing_hooks) = hooks_map.get_mut(hook_key) {
            if let Some(arr) = existing_hooks.as_array_mut() {
                let klaude_idx = arr.iter().position(|entry| {
                    entry
                        .get("hooks")
                        .and_then(|h| h.as_array())
                        .map(|hooks_arr| {
                            hooks_arr.iter().any(|h| {
                                h.get("command")
                                    .and_then(|c| c.as_str())
                                    .map(|c| c.contains("klaude"))
                                    .unwrap_or(false)
                            })
                        })
                        .unwrap_or(false)
                });

                if let Some(idx) = klaude_idx {
                    arr[idx] = hook_entry;
                    updated.push(hook_key);
                } else {
                    arr.push(hook_entry);
                    added.push(hook_key);
                }
            }
        } else {
            hooks_map.insert(hook_key.to_string(), serde_json::json!([hook_entry]));
            added.push(hook_key);
        }
    }

    if settings_file.exists() {
        let backup = settings_file.with_extension("json.bak");
        std::fs::copy(&settings_file, &backup)?;
        println!(
            "  Backed up {} → {}",
            settings_file.display(),
            backup.display()
        );
    }

    if let Some(parent) = settings_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let formatted = serde_json::to_string_pretty(&settings)?;
    std::fs::write(&settings_file, formatted)?;

    println!();
    if !added.is_empty() {
        println!("  Added {} hook(s):", added.len());
        for h in &added {
            println!("    + {}", h);
        }
    }
    if !updated.is_empty() {
        println!("  Updated {} hook(s):", updated.len());
        for h in &updated {
            println!("    ~ {}", h);
        }
    }
    println!();
    println!("  Settings written to {}", settings_file.display());
    println!();

    Ok(())
}
