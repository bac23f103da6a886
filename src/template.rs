//! The three-phase agent command renderer (C3): a pure function
//! `render(agent, data, prompt_override, default_system_prompt,
//! default_prompt) -> (command_line, prompt_body)`.
//!
//! The expansion language is a small hand-rolled recursive-descent one
//! rather than a general-purpose templating engine: it recognizes exactly
//! `{{.Field}}` substitution and `{{if .Flag}}…{{end}}` conditionals on
//! booleans, and nothing else. This keeps the contract — the set of
//! recognized tokens — literal and auditable rather than delegated to a
//! third-party template language's full feature surface.

use anyhow::{Result, bail};

use crate::agent::{AgentSpec, CommandData};

/// A named, typed bag of values a template can reference. Field lookups are
/// case-sensitive and match the Go-style `.Field` names used in agent specs.
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    fields: Vec<(String, String)>,
    flags: Vec<(String, bool)>,
}

impl TemplateScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn flag(mut self, name: &str, value: bool) -> Self {
        self.flags.push((name.to_string(), value));
        self
    }

    fn get_field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn get_flag(&self, name: &str) -> Option<bool> {
        self.flags
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
            .or_else(|| self.get_field(name).map(|v| v == "true"))
    }
}

impl From<&CommandData> for TemplateScope {
    fn from(data: &CommandData) -> Self {
        let mut scope = TemplateScope::new()
            .field("GitDir", &data.git_dir)
            .field("RepoRoot", &data.repo_root)
            .field("Worktree", &data.worktree)
            .field("Title", &data.title)
            .field("Description", &data.description)
            .field("Branch", &data.branch)
            .field("Model", &data.model)
            .field("Issue", data.issue.to_string())
            .field("TaskID", data.task_id.to_string());
        for (name, value) in &data.flags {
            scope = scope.flag(name, *value);
        }
        scope
    }
}

/// Expands `{{.Field}}` and `{{if .Flag}}…{{end}}` tokens in `template`
/// against `scope`. Unknown fields/flags expand to empty string / false
/// rather than erroring, matching a permissive text-template contract; only
/// malformed token syntax (unterminated `{{`, unterminated `{{if}}`) is
/// fatal.
pub fn expand(template: &str, scope: &TemplateScope) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(open) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open + 2..];

        let Some(close) = rest.find("}}") else {
            bail!("unterminated {{{{ in template");
        };
        let token = rest[..close].trim();
        rest = &rest[close + 2..];

        if let Some(cond) = token.strip_prefix("if ") {
            let flag_name = cond.trim().strip_prefix('.').unwrap_or(cond.trim());
            let Some(end) = find_matching_end(rest) else {
                bail!("unterminated {{{{if}}}} in template");
            };
            let (body, after) = rest.split_at(end);
            rest = &after[end_len(after)..];
            if scope.get_flag(flag_name).unwrap_or(false) {
                out.push_str(&expand(body, scope)?);
            }
        } else if let Some(field_name) = token.strip_prefix('.') {
            out.push_str(scope.get_field(field_name).unwrap_or(""));
        } else {
            bail!("unrecognized template token: {{{{{}}}}}", token);
        }
    }

    Ok(out)
}

/// Finds the byte offset of the `{{end}}` matching an `{{if}}` whose body
/// starts at the beginning of `s`, accounting for nested `{{if}}` blocks.
fn find_matching_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut rest = s;
    let mut consumed = 0usize;

    loop {
        let open = rest.find("{{")?;
        let close_rel = rest[open..].find("}}")?;
        let token = rest[open + 2..open + close_rel].trim();

        if token.starts_with("if ") {
            depth += 1;
        } else if token == "end" {
            if depth == 0 {
                return Some(consumed + open);
            }
            depth -= 1;
        }

        let advance = open + close_rel + 2;
        consumed += advance;
        rest = &rest[advance..];
    }
}

fn end_len(s: &str) -> usize {
    debug_assert!(s.starts_with("{{"));
    let close = s.find("}}").expect("matched by find_matching_end");
    close + 2
}

/// Phase 3's fixed dictionary: `{Command, SystemArgs, Args, Prompt}`.
fn phase3_scope(command: &str, system_args: &str, args: &str, prompt_token: &str) -> TemplateScope {
    TemplateScope::new()
        .field("Command", command)
        .field("SystemArgs", system_args)
        .field("Args", args)
        .field("Prompt", prompt_token)
}

/// Renders an agent invocation. `prompt_override` is the literal token
/// substituted for `{{.Prompt}}` in phase 3 (typically a shell variable
/// reference such as `"$PROMPT"`, never the prompt body itself).
pub fn render(
    agent: &AgentSpec,
    data: &CommandData,
    prompt_override: &str,
    default_system_prompt: &str,
    default_prompt: &str,
) -> Result<(String, String)> {
    let scope = TemplateScope::from(data);

    // Phase 1: expand systemArgs and args against data.
    let system_args = expand(&agent.system_args, &scope)?;
    let args = expand(&agent.args, &scope)?;

    // Phase 2: expand the chosen system/user prompt templates and compose.
    let sys_template = if agent.system_prompt.is_empty() {
        default_system_prompt
    } else {
        &agent.system_prompt
    };
    let user_template = if agent.prompt.is_empty() {
        default_prompt
    } else {
        &agent.prompt
    };
    let sys = expand(sys_template, &scope)?;
    let user = expand(user_template, &scope)?;
    let prompt_body = match (sys.is_empty(), user.is_empty()) {
        (false, false) => format!("{}\n\n{}", sys, user),
        (false, true) => sys,
        (true, false) => user,
        (true, true) => String::new(),
    };

    // Phase 3: expand commandTemplate against the fixed 4-key dictionary.
    let phase3 = phase3_scope(&agent.command, &system_args, &args, prompt_override);
    let command_line = expand(&agent.command_template, &phase3)?;

    Ok((command_line, prompt_body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn data(model: &str, cont: bool) -> CommandData {
        let mut flags = BTreeMap::new();
        flags.insert("Continue".to_string(), cont);
        CommandData {
            model: model.to_string(),
            flags,
            ..Default::default()
        }
    }

    #[test]
    fn three_phase_render_matches_spec_example() {
        let agent = AgentSpec {
            command: "claude".to_string(),
            command_template:
                "{{.Command}} {{.SystemArgs}} {{.Args}}{{if .Continue}} -c{{end}} {{.Prompt}}"
                    .to_string(),
            system_args: "--model {{.Model}}".to_string(),
            args: "--verbose".to_string(),
            ..Default::default()
        };
        let data = data("opus", true);

        let (command_line, _) = render(&agent, &data, "\"$PROMPT\"", "", "").unwrap();
        assert_eq!(
            command_line,
            "claude --model opus --verbose -c \"$PROMPT\""
        );
    }

    #[test]
    fn false_conditional_omits_body() {
        let agent = AgentSpec {
            command: "claude".to_string(),
            command_template: "{{.Command}}{{if .Continue}} -c{{end}}".to_string(),
            ..Default::default()
        };
        let data = data("opus", false);
        let (command_line, _) = render(&agent, &data, "", "", "").unwrap();
        assert_eq!(command_line, "claude");
    }

    #[test]
    fn prompt_composition_falls_back_to_defaults() {
        let agent = AgentSpec {
            command_template: "{{.Prompt}}".to_string(),
            ..Default::default()
        };
        let data = CommandData::default();
        let (_, prompt) = render(&agent, &data, "x", "be careful", "say hi").unwrap();
        assert_eq!(prompt, "be careful\n\nsay hi");
    }

    #[test]
    fn prompt_composition_uses_only_non_empty_side() {
        let agent = AgentSpec {
            command_template: "{{.Prompt}}".to_string(),
            system_prompt: "only system".to_string(),
            ..Default::default()
        };
        let data = CommandData::default();
        let (_, prompt) = render(&agent, &data, "x", "unused default", "").unwrap();
        assert_eq!(prompt, "only system");
    }

    #[test]
    fn render_is_deterministic() {
        let agent = AgentSpec {
            command: "claude".to_string(),
            command_template: "{{.Command}} {{.Args}}".to_string(),
            args: "--title {{.Title}}".to_string(),
            ..Default::default()
        };
        let mut data = CommandData::default();
        data.title = "fix bug".to_string();
        let first = render(&agent, &data, "$P", "", "").unwrap();
        let second = render(&agent, &data, "$P", "", "").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unterminated_token_is_an_error() {
        let agent = AgentSpec {
            command_template: "{{.Command".to_string(),
            ..Default::default()
        };
        let data = CommandData::default();
        assert!(render(&agent, &data, "", "", "").is_err());
    }

    #[test]
    fn unknown_field_expands_to_empty() {
        let scope = TemplateScope::new().field("Known", "value");
        let out = expand("[{{.Known}}][{{.Unknown}}]", &scope).unwrap();
        assert_eq!(out, "[value][]");
    }
}
