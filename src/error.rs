//! Stable error taxonomy exposed across component boundaries.
//!
//! Mirrors the way `WorktreeNotFound` is defined next to the code that raises
//! it: a small set of named, matchable error types wrapped in `anyhow` at the
//! call boundary rather than threaded through every signature.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrewError {
    #[error("task {0} not found")]
    TaskNotFound(u64),

    #[error("parent task {0} not found")]
    ParentNotFound(u64),

    #[error("cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("session {0} is already running")]
    SessionRunning(String),

    #[error("no session for {0}")]
    NoSession(String),

    #[error("worktree not found: {0}")]
    WorktreeNotFound(String),

    #[error("no agent specified")]
    NoAgent,

    #[error("agent {0} is disabled")]
    AgentDisabled(String),

    #[error("worktree has uncommitted changes")]
    UncommittedChanges,

    #[error("merge conflict")]
    MergeConflict,

    #[error("namespace already initialized")]
    AlreadyInitialized,

    #[error("namespace not initialized")]
    NotInitialized,

    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("circular inheritance detected at {0}")]
    CircularInheritance(String),

    #[error("inherited agent {0} not found")]
    InheritParentNotFound(String),

    #[error("comment at index {0} not found")]
    CommentNotFound(usize),

    #[error("invalid ACP command: {0}")]
    InvalidACPCommand(String),

    #[error("invalid ACP execution substate: {0}")]
    InvalidACPExecutionSubstate(String),

    #[error("no ACP state for namespace {namespace} task {task_id}")]
    ACPStateNotFound { namespace: String, task_id: u64 },
}
