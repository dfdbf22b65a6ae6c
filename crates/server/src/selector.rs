//! Runtime selection
//!
//! Maps an agent definition to a backend kind plus an optional fallback used
//! when the primary fails to start.

use crate::agents::AgentDefinition;
use klaude_protocol::RuntimeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeChoice {
    pub primary: RuntimeKind,
    pub fallback: Option<RuntimeKind>,
}

/// Pick the runtime for a definition.
///
/// An explicit `runtime:` key wins and pins the backend — no fallback, so a
/// flaky binary surfaces as a failure instead of silently switching models.
/// Model-inferred routing keeps the native runner as a safety net.
pub fn select_runtime(definition: &AgentDefinition) -> RuntimeChoice {
    if let Some(kind) = definition
        .runtime
        .as_deref()
        .and_then(RuntimeKind::parse)
    {
        return RuntimeChoice {
            primary: kind,
            fallback: None,
        };
    }

    match definition.model.as_deref() {
        Some(model) if model.starts_with("gpt") => RuntimeChoice {
            primary: RuntimeKind::Codex,
            fallback: Some(RuntimeKind::Claude),
        },
        Some(model) if model.starts_with("gemini") => RuntimeChoice {
            primary: RuntimeKind::Gemini,
            fallback: Some(RuntimeKind::Claude),
        },
        _ => RuntimeChoice {
            primary: RuntimeKind::Claude,
            fallback: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parse_definition;

    fn definition(frontmatter: &str) -> AgentDefinition {
        let raw = format!("---\n{}\n---\ndo the work\n", frontmatter);
        parse_definition("test", &raw).unwrap()
    }

    #[test]
    fn explicit_runtime_wins_over_model_and_pins() {
        let def = definition("runtime: cursor\nmodel: gpt-5");
        let choice = select_runtime(&def);
        assert_eq!(choice.primary, RuntimeKind::Cursor);
        assert_eq!(choice.fallback, None);
    }

    #[test]
    fn gpt_models_route_to_codex_with_fallback() {
        let choice = select_runtime(&definition("model: gpt-5-codex"));
        assert_eq!(choice.primary, RuntimeKind::Codex);
        assert_eq!(choice.fallback, Some(RuntimeKind::Claude));
    }

    #[test]
    fn gemini_models_route_to_gemini() {
        let choice = select_runtime(&definition("model: gemini-2.5-pro"));
        assert_eq!(choice.primary, RuntimeKind::Gemini);
    }

    #[test]
    fn default_is_native_without_fallback() {
        let choice = select_runtime(&definition("model: opus"));
        assert_eq!(choice.primary, RuntimeKind::Claude);
        assert_eq!(choice.fallback, None);

        let choice = select_runtime(&definition("description: nothing set"));
        assert_eq!(choice.primary, RuntimeKind::Claude);
    }

    #[test]
    fn model_inferred_routing_keeps_a_fallback() {
        let choice = select_runtime(&definition("model: gpt-5"));
        assert_eq!(choice.fallback, Some(RuntimeKind::Claude));
        let choice = select_runtime(&definition("runtime: codex"));
        assert_eq!(choice.fallback, None);
    }
}
