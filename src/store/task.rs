//! The persisted data model: `Task`, `Comment`, `Meta`.

use serde::{Deserialize, Serialize};

use crate::status::{CloseReason, Status};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub status: Status,
    #[serde(default)]
    pub close_reason: CloseReason,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub issue: i64,
    #[serde(default)]
    pub pr: i64,
    pub created: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub block_reason: String,
    #[serde(default)]
    pub skip_review: Option<bool>,
}

impl Task {
    /// A fresh task for `id` in `namespace`, status `todo`, everything else
    /// at its zero value. Callers are responsible for the empty-title check
    /// (`ErrEmptyTitle`) before persisting.
    pub fn new(id: u64, namespace: &str, title: impl Into<String>, created: i64) -> Self {
        let mut labels = Vec::new();
        labels.sort();
        Task {
            id,
            parent_id: None,
            title: title.into(),
            description: String::new(),
            labels,
            status: Status::Todo,
            close_reason: CloseReason::None,
            base_branch: String::new(),
            agent: String::new(),
            session: String::new(),
            issue: 0,
            pr: 0,
            created,
            started: 0,
            namespace: namespace.to_string(),
            block_reason: String::new(),
            skip_review: None,
        }
    }

    /// Labels are deduplicated and sorted before every serialization so that
    /// byte-identical tasks always produce byte-identical blobs.
    pub fn normalize(&mut self) {
        self.labels.sort();
        self.labels.dedup();
    }

    pub fn matches_labels_and(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|l| self.labels.contains(l))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub time: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Meta {
    pub next_task_id: u64,
}

impl Meta {
    pub fn fresh() -> Self {
        Meta { next_task_id: 1 }
    }
}

/// Serializes a task to the store's line-oriented textual record: a single
/// line of JSON terminated by `\n`. One task per blob, so there is never a
/// second line.
pub fn encode_task(task: &Task) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(task).expect("Task serializes");
    bytes.push(b'\n');
    bytes
}

pub fn decode_task(bytes: &[u8]) -> serde_json::Result<Task> {
    serde_json::from_slice(bytes)
}

pub fn encode_comments(comments: &[Comment]) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(comments).expect("comments serialize");
    bytes.push(b'\n');
    bytes
}

pub fn decode_comments(bytes: &[u8]) -> serde_json::Result<Vec<Comment>> {
    serde_json::from_slice(bytes)
}

pub fn encode_meta(meta: &Meta) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(meta).expect("Meta serializes");
    bytes.push(b'\n');
    bytes
}

pub fn decode_meta(bytes: &[u8]) -> serde_json::Result<Meta> {
    serde_json::from_slice(bytes)
}
