//! The asynchronous agent-control channel (C5): a durable command queue, an
//! append-only event log, and a last-writer-wins execution-state store, all
//! scoped to one `<acpDir>` per `(namespace, taskID)`.

pub mod eventlog;
pub mod queue;
pub mod state;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ACPCommandType {
    Prompt,
    Permission,
    Cancel,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ACPCommand {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ACPCommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "option_id")]
    pub option_id: Option<String>,
    #[serde(default, rename = "created_at")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ACPEvent {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "session_id")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSubstate {
    Idle,
    Running,
    AwaitingPermission,
    AwaitingUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ACPExecutionState {
    pub execution_substate: ExecutionSubstate,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "session_id")]
    pub session_id: Option<String>,
}
