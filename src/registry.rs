//! Tool registry.
//!
//! The set of tools the agent can invoke is closed and known at build time,
//! so the registry is a constant table rather than something populated at
//! runtime. Lookups never mutate anything and are safe from any thread.

use crate::agent::messages::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Identifier of every registered analysis tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolId {
    DeadCode,
    Lint,
    Comments,
    Commit,
    Tldr,
}

impl ToolId {
    /// The routing key used by the model and the command line.
    pub fn command(&self) -> &'static str {
        match self {
            ToolId::DeadCode => "dead-code",
            ToolId::Lint => "lint",
            ToolId::Comments => "comments",
            ToolId::Commit => "commit",
            ToolId::Tldr => "tldr",
        }
    }

    /// Registry entry for this tool.
    pub fn entry(&self) -> &'static ToolRegistryEntry {
        match self {
            ToolId::DeadCode => &TOOL_REGISTRY[0],
            ToolId::Lint => &TOOL_REGISTRY[1],
            ToolId::Comments => &TOOL_REGISTRY[2],
            ToolId::Commit => &TOOL_REGISTRY[3],
            ToolId::Tldr => &TOOL_REGISTRY[4],
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command())
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dead-code" => Ok(ToolId::DeadCode),
            "lint" => Ok(ToolId::Lint),
            "comments" => Ok(ToolId::Comments),
            "commit" => Ok(ToolId::Commit),
            "tldr" => Ok(ToolId::Tldr),
            other => Err(format!(
                "Unknown tool '{}'. Available tools: {}",
                other,
                available_tool_names().join(", ")
            )),
        }
    }
}

/// Whether a tool may run without asking the user first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Read-only analysis; the host executes it directly.
    Autonomous,
    /// Mutates state; the host must obtain approval first.
    ConfirmationRequired,
}

/// Static metadata for one tool.
#[derive(Debug)]
pub struct ToolRegistryEntry {
    pub id: ToolId,
    /// Routing key (tool name exposed to the model).
    pub command: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub mode: InvocationMode,
    input_schema: fn() -> Value,
}

impl ToolRegistryEntry {
    pub fn is_autonomous(&self) -> bool {
        self.mode == InvocationMode::Autonomous
    }

    /// JSON-schema-shaped description of the accepted arguments.
    pub fn input_schema(&self) -> Value {
        (self.input_schema)()
    }

    /// Definition handed to the model provider.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.command.to_string(),
            description: self.description.to_string(),
            input_schema: self.input_schema(),
        }
    }
}

static TOOL_REGISTRY: [ToolRegistryEntry; 5] = [
    ToolRegistryEntry {
        id: ToolId::DeadCode,
        command: "dead-code",
        display_name: "Dead Code Finder",
        description: "Find exported symbols that are never referenced elsewhere in the workspace.",
        mode: InvocationMode::Autonomous,
        input_schema: scoped_schema,
    },
    ToolRegistryEntry {
        id: ToolId::Lint,
        command: "lint",
        display_name: "Lint",
        description: "Run the language linters (eslint, pylint) and an optional model review over the workspace.",
        mode: InvocationMode::Autonomous,
        input_schema: scoped_schema,
    },
    ToolRegistryEntry {
        id: ToolId::Comments,
        command: "comments",
        display_name: "Comment Pruner",
        description: "Find stale or low-value comments and suggest removals or rewrites. Never edits files.",
        mode: InvocationMode::Autonomous,
        input_schema: comments_schema,
    },
    ToolRegistryEntry {
        id: ToolId::Commit,
        command: "commit",
        display_name: "Auto Commit",
        description: "Stage all changes and propose a conventional commit message. Does not create the commit.",
        mode: InvocationMode::ConfirmationRequired,
        input_schema: commit_schema,
    },
    ToolRegistryEntry {
        id: ToolId::Tldr,
        command: "tldr",
        display_name: "PR Review (TL;DR)",
        description: "Summarize a branch that is ahead of the target branches: diff, commit log and review highlights.",
        mode: InvocationMode::Autonomous,
        input_schema: tldr_schema,
    },
];

fn scoped_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "paths": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Workspace-relative paths to limit the scan to. Empty means the whole workspace."
            },
            "skip_review": {
                "type": "boolean",
                "description": "Skip the model review pass and report static findings only."
            }
        },
        "required": []
    })
}

fn comments_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "paths": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Workspace-relative paths to limit the scan to."
            },
            "stale_days": {
                "type": "integer",
                "description": "Age in days after which a comment counts as stale."
            }
        },
        "required": []
    })
}

fn commit_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "run_hooks": {
                "type": "boolean",
                "description": "Dry-run the pre-commit hook against the staged changes."
            }
        },
        "required": []
    })
}

fn tldr_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "branch": {
                "type": "string",
                "description": "Branch to review. Defaults to the first branch ahead of a target branch."
            },
            "target_branches": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Branches the PR would merge into, in priority order."
            }
        },
        "required": []
    })
}

/// Every registry entry, in registry order.
pub fn all_tools() -> &'static [ToolRegistryEntry] {
    &TOOL_REGISTRY
}

/// Resolve a model-requested tool name.
pub fn get_tool_by_command(name: &str) -> Option<&'static ToolRegistryEntry> {
    ToolId::from_str(name).ok().map(|id| id.entry())
}

/// Names of every registered tool.
pub fn available_tool_names() -> Vec<&'static str> {
    TOOL_REGISTRY.iter().map(|entry| entry.command).collect()
}

/// Definitions for every registered tool.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    TOOL_REGISTRY.iter().map(ToolRegistryEntry::definition).collect()
}

/// Validate model-supplied arguments against the tool's input schema.
///
/// Only the shape is checked: the value must be an object, required keys
/// must be present and declared properties must have the declared primitive
/// type. Unknown keys are allowed.
pub fn validate_args(entry: &ToolRegistryEntry, args: &Value) -> Result<(), String> {
    let object = match args {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                json_type_name(other)
            ))
        }
    };

    let schema = entry.input_schema();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in object {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        if !matches_type(value, expected) {
            return Err(format!(
                "argument '{}' must be of type {}, got {}",
                key,
                expected,
                json_type_name(value)
            ));
        }

        if expected == "array" {
            let item_type = properties
                .get(key)
                .and_then(|p| p.get("items"))
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str);
            if let (Some(item_type), Some(items)) = (item_type, value.as_array()) {
                if let Some(bad) = items.iter().find(|item| !matches_type(item, item_type)) {
                    return Err(format!(
                        "argument '{}' must contain only {} values, got {}",
                        key,
                        item_type,
                        json_type_name(bad)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_command() {
        let entry = get_tool_by_command("dead-code").unwrap();
        assert_eq!(entry.id, ToolId::DeadCode);
        assert!(entry.is_autonomous());

        assert!(get_tool_by_command("frobnicate").is_none());
        assert!(get_tool_by_command("").is_none());
    }

    #[test]
    fn test_entries_match_ids() {
        assert_eq!(all_tools().len(), 5);
        for entry in all_tools() {
            let id = entry.id;
            assert_eq!(id.entry().id, id);
            assert_eq!(id.entry().command, id.command());
            assert_eq!(ToolId::from_str(id.command()), Ok(id));
        }
    }

    #[test]
    fn test_commit_requires_confirmation() {
        let entry = get_tool_by_command("commit").unwrap();
        assert_eq!(entry.mode, InvocationMode::ConfirmationRequired);

        let gated: Vec<_> = all_tools()
            .iter()
            .filter(|entry| !entry.is_autonomous())
            .map(|entry| entry.command)
            .collect();
        assert_eq!(gated, vec!["commit"]);
    }

    #[test]
    fn test_tool_definitions() {
        let definitions = tool_definitions();
        assert_eq!(definitions.len(), 5);

        let names: Vec<_> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, available_tool_names());
        assert!(definitions
            .iter()
            .all(|d| d.input_schema["type"] == "object"));
    }

    #[test]
    fn test_unknown_tool_error_lists_names() {
        let err = ToolId::from_str("nope").unwrap_err();
        assert!(err.contains("dead-code, lint, comments, commit, tldr"));
    }

    #[test]
    fn test_validate_args() {
        let tldr = ToolId::Tldr.entry();
        assert!(validate_args(tldr, &Value::Null).is_ok());
        assert!(validate_args(tldr, &json!({})).is_ok());
        assert!(validate_args(tldr, &json!({"branch": "feature/x"})).is_ok());
        assert!(validate_args(tldr, &json!({"unknown": 1})).is_ok());

        let err = validate_args(tldr, &json!({"branch": 3})).unwrap_err();
        assert!(err.contains("'branch'"));

        let err = validate_args(tldr, &json!({"target_branches": ["main", 1]})).unwrap_err();
        assert!(err.contains("only string"));

        assert!(validate_args(tldr, &json!("main")).is_err());
        assert!(validate_args(ToolId::Comments.entry(), &json!({"stale_days": 1.5})).is_err());
    }
}
