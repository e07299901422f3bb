use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;
use uuid::Uuid;

/// Opaque handle for an asynchronous categorization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    RemoteUnavailable,
    RemoteTimeout,
    RemoteRateLimited,
    MalformedResponse,
    /// The background execution context faulted before the classifier returned.
    ExecutionFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCategory {
    pub name: String,
    pub confidence: f32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillDetails {
    pub total_amount: f64,
    pub currency: String,
    pub items: Vec<BillItem>,
    pub tax: f64,
    pub vendor_name: String,
    pub date: String,
}

impl Default for BillDetails {
    fn default() -> Self {
        Self {
            total_amount: 0.0,
            currency: "INR".to_string(),
            items: Vec::new(),
            tax: 0.0,
            vendor_name: String::new(),
            date: String::new(),
        }
    }
}

/// The classifier's answer for one image. Categories are ordered by
/// descending confidence and are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub filename: String,
    pub categories: Vec<ImageCategory>,
    pub primary_category: String,
    pub category_matched: bool,
    pub raw_analysis: String,
    pub bill_recognised: bool,
    pub bill_details: BillDetails,
    pub processed_at: DateTime<Utc>,
}

/// Lifecycle of a task. Terminal variants carry their outcome, so a
/// completed task without a result cannot be represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: CategorizationResult,
    },
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: TaskError,
    },
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Processing { .. } => TaskStatus::Processing,
            TaskState::Completed { .. } => TaskStatus::Completed,
            TaskState::Failed { .. } => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub filename: String,
    pub submitted_at: DateTime<Utc>,
    pub state: TaskState,
}

impl Task {
    pub fn new(id: TaskId, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            submitted_at: Utc::now(),
            state: TaskState::Pending,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::Pending => None,
            TaskState::Processing { started_at }
            | TaskState::Completed { started_at, .. }
            | TaskState::Failed { started_at, .. } => Some(*started_at),
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::Completed { completed_at, .. } | TaskState::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&CategorizationResult> {
        match &self.state {
            TaskState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.state {
            TaskState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CategorizeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: CategorizationResult,
}

impl From<CategorizationResult> for CategorizeResponse {
    fn from(result: CategorizationResult) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AsyncTaskResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskStatusResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub filename: String,
    pub status: TaskStatus,
    pub result: Option<CategorizationResult>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskStatusResponse {
    fn from(task: Task) -> Self {
        Self {
            success: true,
            task_id: task.id,
            status: task.status(),
            started_at: task.started_at(),
            completed_at: task.completed_at(),
            result: task.result().cloned(),
            error: task.error().cloned(),
            filename: task.filename,
            created_at: task.submitted_at,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: std::collections::BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_tracked: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> CategorizationResult {
        CategorizationResult {
            filename: "lunch.jpg".into(),
            categories: vec![ImageCategory {
                name: "food".into(),
                confidence: 0.9,
                description: "a plate of rice".into(),
            }],
            primary_category: "food".into(),
            category_matched: true,
            raw_analysis: String::new(),
            bill_recognised: false,
            bill_details: BillDetails::default(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn task_id_parses_its_own_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("nonexistent".parse::<TaskId>().is_err());
    }

    #[test]
    fn pending_task_has_no_outcome() {
        let task = Task::new(TaskId::new(), "a.png");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.result().is_none());
        assert!(task.error().is_none());
        assert!(task.started_at().is_none());
        assert!(task.completed_at().is_none());
    }

    #[test]
    fn status_response_carries_terminal_outcome() {
        let now = Utc::now();
        let mut task = Task::new(TaskId::new(), "lunch.jpg");
        task.state = TaskState::Completed {
            started_at: now,
            completed_at: now,
            result: sample_result(),
        };

        let response = TaskStatusResponse::from(task.clone());
        assert_eq!(response.status, TaskStatus::Completed);
        assert_eq!(response.completed_at, Some(now));
        assert_eq!(response.result.unwrap().primary_category, "food");
        assert!(response.error.is_none());
    }

    #[test]
    fn task_state_serializes_with_status_tag() {
        let state = TaskState::Failed {
            started_at: Utc::now(),
            completed_at: Utc::now(),
            error: TaskError {
                kind: ErrorKind::RemoteTimeout,
                message: "timed out".into(),
            },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "remote_timeout");
    }

    #[test]
    fn error_kind_display_matches_wire_name() {
        assert_eq!(ErrorKind::RemoteRateLimited.to_string(), "remote_rate_limited");
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
    }
}
