//! Agent specs: immutable-after-load records describing how to invoke a
//! coding-agent CLI, loaded from YAML with a global file merged under a
//! project file.

pub mod inherit;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A single agent's invocation recipe. `inherit` is cleared to `""` once
/// [`inherit::resolve_inheritance`] has flattened the config.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AgentSpec {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub command_template: String,
    #[serde(default)]
    pub system_args: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub inherit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub worktree_setup_script: String,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Inputs available to template expansion at render time (§CommandData).
#[derive(Debug, Clone, Default)]
pub struct CommandData {
    pub git_dir: String,
    pub repo_root: String,
    pub worktree: String,
    pub title: String,
    pub description: String,
    pub branch: String,
    pub model: String,
    pub issue: i64,
    pub task_id: u64,
    /// Extra boolean flags referenced by `{{if .Flag}}` in agent templates
    /// (e.g. `continue`). Keyed by the field name used in the template.
    pub flags: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSpec>,
    /// Shell-style glob patterns disabling agents by name; a leading `!`
    /// marks an exclusion. See [`is_agent_disabled`].
    #[serde(default)]
    pub disabled_agents: Vec<String>,
}

impl AgentsConfig {
    pub fn load(global_path: &Path, project_path: &Path) -> Result<Self> {
        let global = Self::load_from_path(global_path)?.unwrap_or_default();
        let project = Self::load_from_path(project_path)?.unwrap_or_default();
        Ok(global.merge(project))
    }

    fn load_from_path(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config at {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse agent config at {}", path.display()))?;
        Ok(Some(config))
    }

    /// Project agents override global agents of the same name entirely (no
    /// field-level merge beyond what inheritance already provides);
    /// disabled-agent lists concatenate.
    fn merge(self, project: Self) -> Self {
        let mut agents = self.agents;
        for (name, spec) in project.agents {
            agents.insert(name, spec);
        }
        let mut disabled_agents = self.disabled_agents;
        disabled_agents.extend(project.disabled_agents);
        Self {
            agents,
            disabled_agents,
        }
    }

    pub fn resolved(&self) -> Result<BTreeMap<String, AgentSpec>> {
        inherit::resolve_inheritance(self.agents.clone())
    }
}

/// An agent name is disabled iff it matches any non-exclusion pattern and no
/// exclusion pattern (patterns prefixed with `!`), regardless of list order.
/// Malformed globs never match.
pub fn is_agent_disabled(name: &str, patterns: &[String]) -> bool {
    let mut matched = false;
    let mut excluded = false;

    for raw in patterns {
        let (exclusion, pat) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        let Ok(glob) = glob::Pattern::new(pat) else {
            continue;
        };
        if glob.matches(name) {
            if exclusion {
                excluded = true;
            } else {
                matched = true;
            }
        }
    }

    matched && !excluded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_patterns_are_order_independent() {
        let names = ["oc-small", "oc-medium", "claude"];
        let p1 = vec!["oc-*".to_string(), "!oc-medium".to_string()];
        let p2 = vec!["!oc-medium".to_string(), "oc-*".to_string()];

        let enabled1: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !is_agent_disabled(n, &p1))
            .collect();
        let enabled2: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !is_agent_disabled(n, &p2))
            .collect();

        assert_eq!(enabled1, vec!["oc-medium", "claude"]);
        assert_eq!(enabled1, enabled2);
    }

    #[test]
    fn no_patterns_disables_nothing() {
        assert!(!is_agent_disabled("claude", &[]));
    }

    #[test]
    fn malformed_glob_never_matches() {
        let patterns = vec!["[".to_string()];
        assert!(!is_agent_disabled("claude", &patterns));
    }
}
