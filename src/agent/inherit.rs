//! Worker-to-worker inheritance resolution: a small DAG flattened via a
//! three-color depth-first traversal, mirroring the coloring idiom used for
//! cycle detection rather than a language-specific "currently resolving"
//! marker.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::error::CrewError;

use super::AgentSpec;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Resolves every worker's `inherit` chain, overlaying non-empty child
/// scalar fields onto a copy of the (already-resolved) parent, then clears
/// `inherit` on the stored worker. Idempotent: resolving an already-resolved
/// config (all `inherit` empty) is a no-op that returns it unchanged.
pub fn resolve_inheritance(
    mut agents: BTreeMap<String, AgentSpec>,
) -> Result<BTreeMap<String, AgentSpec>> {
    let mut colors: BTreeMap<String, Color> = agents
        .keys()
        .map(|k| (k.clone(), Color::Unvisited))
        .collect();

    let names: Vec<String> = agents.keys().cloned().collect();
    for name in names {
        resolve_one(&name, &mut agents, &mut colors)?;
    }

    Ok(agents)
}

fn resolve_one(
    name: &str,
    agents: &mut BTreeMap<String, AgentSpec>,
    colors: &mut BTreeMap<String, Color>,
) -> Result<AgentSpec> {
    match colors.get(name) {
        Some(Color::Done) => return Ok(agents[name].clone()),
        Some(Color::InProgress) => {
            return Err(CrewError::CircularInheritance(name.to_string()).into());
        }
        Some(Color::Unvisited) => {}
        None => return Err(CrewError::InheritParentNotFound(name.to_string()).into()),
    }

    colors.insert(name.to_string(), Color::InProgress);

    let current = agents
        .get(name)
        .cloned()
        .ok_or_else(|| CrewError::InheritParentNotFound(name.to_string()))?;

    let resolved = if current.inherit.is_empty() {
        current
    } else {
        let parent_name = current.inherit.clone();
        if !agents.contains_key(&parent_name) {
            return Err(CrewError::InheritParentNotFound(parent_name).into());
        }
        let parent = resolve_one(&parent_name, agents, colors)?;
        overlay(&parent, current)
    };

    colors.insert(name.to_string(), Color::Done);
    agents.insert(name.to_string(), resolved.clone());
    Ok(resolved)
}

/// Overlays non-empty scalar/vec fields of `child` onto a copy of `parent`,
/// then clears `inherit`.
fn overlay(parent: &AgentSpec, child: AgentSpec) -> AgentSpec {
    fn pick(child: String, parent: &str) -> String {
        if child.is_empty() {
            parent.to_string()
        } else {
            child
        }
    }

    AgentSpec {
        command: pick(child.command, &parent.command),
        command_template: pick(child.command_template, &parent.command_template),
        system_args: pick(child.system_args, &parent.system_args),
        args: pick(child.args, &parent.args),
        model: pick(child.model, &parent.model),
        prompt: pick(child.prompt, &parent.prompt),
        system_prompt: pick(child.system_prompt, &parent.system_prompt),
        inherit: String::new(),
        description: pick(child.description, &parent.description),
        worktree_setup_script: pick(child.worktree_setup_script, &parent.worktree_setup_script),
        exclude_patterns: if child.exclude_patterns.is_empty() {
            parent.exclude_patterns.clone()
        } else {
            child.exclude_patterns
        },
    }
}
