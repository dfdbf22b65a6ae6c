//! Agent definition loading
//!
//! Definitions are markdown files with YAML frontmatter under
//! `<project>/.claude/agents/` or `~/.claude/agents/` (first match wins).
//! The body after the frontmatter is the agent's instructions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::WrapperError;
use klaude_protocol::ErrorCode;

/// The one type that may run without a definition file.
pub const GENERAL_PURPOSE: &str = "general-purpose";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Child types this agent may spawn. `None` allows any type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_agents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Explicit backend selection (`claude`, `codex`, `cursor`, `gemini`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Explicit MCP visibility; replaces inheritance entirely when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub inherit_project_mcps: bool,
    #[serde(default)]
    pub inherit_parent_mcps: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    allowed_agents: Option<Vec<String>>,
    model: Option<String>,
    runtime: Option<String>,
    color: Option<String>,
    mcp_servers: Option<Vec<String>>,
    inherit_project_mcps: Option<bool>,
    inherit_parent_mcps: Option<bool>,
}

fn definition_dirs(project_root: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![project_root.join(".claude").join("agents")];
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".claude").join("agents"));
    }
    dirs
}

/// Load the definition for `agent_type`, searching project then home.
pub fn load_definition(
    project_root: &Path,
    agent_type: &str,
) -> Result<Option<AgentDefinition>, WrapperError> {
    for dir in definition_dirs(project_root) {
        let path = dir.join(format!("{}.md", agent_type));
        if !path.exists() {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            WrapperError::new(
                ErrorCode::AgentTypeInvalid,
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let definition = parse_definition(agent_type, &raw)?;
        return Ok(Some(definition));
    }
    Ok(None)
}

/// Every agent type with a definition file, for error messages.
pub fn available_types(project_root: &Path) -> Vec<String> {
    let mut types = Vec::new();
    for dir in definition_dirs(project_root) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !types.iter().any(|t| t == stem) {
                        types.push(stem.to_string());
                    }
                }
            }
        }
    }
    types.sort();
    types
}

/// Split frontmatter from body and deserialize.
pub fn parse_definition(agent_type: &str, raw: &str) -> Result<AgentDefinition, WrapperError> {
    let (frontmatter, body) = split_frontmatter(raw);
    let meta: Frontmatter = match frontmatter {
        Some(yaml) => serde_yaml::from_str(yaml).map_err(|e| {
            WrapperError::new(
                ErrorCode::AgentTypeInvalid,
                format!("invalid frontmatter for agent {}: {}", agent_type, e),
            )
        })?,
        None => Frontmatter::default(),
    };

    let instructions = body.trim().to_string();
    if instructions.is_empty() {
        return Err(WrapperError::new(
            ErrorCode::AgentInstructionsMissing,
            format!("agent {} has no instructions body", agent_type),
        ));
    }

    Ok(AgentDefinition {
        name: meta.name.unwrap_or_else(|| agent_type.to_string()),
        description: meta.description,
        allowed_agents: meta.allowed_agents,
        model: meta.model,
        runtime: meta.runtime,
        color: meta.color,
        mcp_servers: meta.mcp_servers,
        inherit_project_mcps: meta.inherit_project_mcps.unwrap_or(true),
        inherit_parent_mcps: meta.inherit_parent_mcps.unwrap_or(false),
        instructions,
    })
}

/// A definition used when `general-purpose` has no file on disk.
pub fn general_purpose_fallback() -> AgentDefinition {
    AgentDefinition {
        name: GENERAL_PURPOSE.to_string(),
        description: Some("General-purpose agent".to_string()),
        allowed_agents: None,
        model: None,
        runtime: None,
        color: None,
        mcp_servers: None,
        inherit_project_mcps: true,
        inherit_parent_mcps: false,
        instructions: String::new(),
    }
}

fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let trimmed = raw.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return (None, raw);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, raw);
    };
    for delim in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(delim) {
            return (Some(&rest[..end]), &rest[end + delim.len()..]);
        }
    }
    if let Some(yaml) = rest.strip_suffix("\n---") {
        return (Some(yaml), "");
    }
    (None, raw)
}

/// Resolve the MCP servers visible to a new agent session.
///
/// Explicit `mcpServers` replaces inheritance and unknown names fail hard;
/// otherwise project MCPs are the base (unless opted out) and the parent's
/// resolved set is layered on when `inheritParentMcps` is set.
pub fn resolve_mcps(
    definition: &AgentDefinition,
    project_mcps: &HashMap<String, Value>,
    parent_mcps: Option<&HashMap<String, Value>>,
) -> Result<HashMap<String, Value>, WrapperError> {
    if let Some(explicit) = &definition.mcp_servers {
        let mut resolved = HashMap::new();
        for name in explicit {
            let found = project_mcps
                .get(name)
                .or_else(|| parent_mcps.and_then(|p| p.get(name)));
            match found {
                Some(value) => {
                    resolved.insert(name.clone(), value.clone());
                }
                None => {
                    return Err(WrapperError::new(
                        ErrorCode::AgentTypeInvalid,
                        format!(
                            "agent {} references unknown MCP server {}",
                            definition.name, name
                        ),
                    ));
                }
            }
        }
        return Ok(resolved);
    }

    let mut resolved = HashMap::new();
    if definition.inherit_project_mcps {
        resolved.extend(project_mcps.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if definition.inherit_parent_mcps {
        if let Some(parent) = parent_mcps {
            resolved.extend(parent.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else {
            warn!(
                component = "agents",
                event = "agents.mcp.parent_missing",
                agent = %definition.name,
                "inheritParentMcps set but parent has no resolved MCPs"
            );
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLANNER: &str = "---\nname: planner\ndescription: Plans work\nallowedAgents:\n  - worker\nmodel: gpt-5\nruntime: codex\ninheritParentMcps: true\n---\nYou are a planning agent.\nBreak the task down.\n";

    #[test]
    fn parses_frontmatter_and_body() {
        let def = parse_definition("planner", PLANNER).unwrap();
        assert_eq!(def.name, "planner");
        assert_eq!(def.allowed_agents.as_deref(), Some(&["worker".into()][..]));
        assert_eq!(def.model.as_deref(), Some("gpt-5"));
        assert_eq!(def.runtime.as_deref(), Some("codex"));
        assert!(def.inherit_project_mcps);
        assert!(def.inherit_parent_mcps);
        assert!(def.instructions.starts_with("You are a planning agent."));
    }

    #[test]
    fn body_only_file_still_parses() {
        let def = parse_definition("helper", "Just do the thing.\n").unwrap();
        assert_eq!(def.name, "helper");
        assert!(def.allowed_agents.is_none());
        assert_eq!(def.instructions, "Just do the thing.");
    }

    #[test]
    fn empty_body_is_missing_instructions() {
        let raw = "---\nname: hollow\n---\n\n";
        let err = parse_definition("hollow", raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentInstructionsMissing);
    }

    #[test]
    fn explicit_mcps_replace_inheritance() {
        let mut def = parse_definition("planner", PLANNER).unwrap();
        def.mcp_servers = Some(vec!["search".into()]);
        let project: HashMap<String, Value> = [
            ("search".to_string(), json!({"command": "mcp-search"})),
            ("db".to_string(), json!({"command": "mcp-db"})),
        ]
        .into();

        let resolved = resolve_mcps(&def, &project, None).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("search"));
    }

    #[test]
    fn unknown_explicit_mcp_fails_hard() {
        let mut def = parse_definition("planner", PLANNER).unwrap();
        def.mcp_servers = Some(vec!["missing".into()]);
        let err = resolve_mcps(&def, &HashMap::new(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentTypeInvalid);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn parent_mcps_layer_on_top_when_inherited() {
        let def = parse_definition("planner", PLANNER).unwrap();
        let project: HashMap<String, Value> =
            [("db".to_string(), json!({"command": "mcp-db"}))].into();
        let parent: HashMap<String, Value> =
            [("scratch".to_string(), json!({"command": "mcp-scratch"}))].into();

        let resolved = resolve_mcps(&def, &project, Some(&parent)).unwrap();
        assert!(resolved.contains_key("db"));
        assert!(resolved.contains_key("scratch"));
    }

    #[test]
    fn project_opt_out_drops_project_mcps() {
        let raw = "---\nname: sealed\ninheritProjectMcps: false\n---\nwork alone\n";
        let def = parse_definition("sealed", raw).unwrap();
        let project: HashMap<String, Value> =
            [("db".to_string(), json!({"command": "mcp-db"}))].into();
        let resolved = resolve_mcps(&def, &project, None).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn definition_lookup_prefers_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let agents = dir.path().join(".claude").join("agents");
        std::fs::create_dir_all(&agents).unwrap();
        std::fs::write(agents.join("planner.md"), PLANNER).unwrap();

        let def = load_definition(dir.path(), "planner").unwrap().unwrap();
        assert_eq!(def.name, "planner");
        assert!(load_definition(dir.path(), "planner-nonexistent-zz")
            .unwrap()
            .is_none());
        // Home-level definitions may exist on the machine; only assert ours.
        assert!(available_types(dir.path()).contains(&"planner".to_string()));
    }
}
