use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Notify,
    Gift,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Notify, JobKind::Gift];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Notify => "notify",
            JobKind::Gift => "gift",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notify" | "notification" | "message" => Some(JobKind::Notify),
            "gift" => Some(JobKind::Gift),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Active,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Done,
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Done => "done",
            ItemState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ItemState::Pending),
            "done" => Some(ItemState::Done),
            "failed" => Some(ItemState::Failed),
            _ => None,
        }
    }
}

/// Batched notify/gift operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    /// Chat that receives the completion summary
    pub requester: i64,
    pub external_ref: Option<String>,
    pub state: JobState,
    pub created_at: i64,
}

/// One target (chat id or username) of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    pub id: i64,
    pub job_id: i64,
    pub target: String,
    pub state: ItemState,
    pub reason: Option<String>,
}

/// Per-job item counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub pending: u64,
    pub done: u64,
    pub failed: u64,
}

impl JobProgress {
    pub fn total(&self) -> u64 {
        self.pending + self.done + self.failed
    }
}
