use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use shared::{CategorizationResult, Task, TaskError, TaskId, TaskState, TaskStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),
    #[error("Invalid transition for task {id}: {from} -> {attempted}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        attempted: TaskStatus,
    },
}

/// One forward step of the task state machine.
#[derive(Debug, Clone)]
pub enum Transition {
    Start,
    Complete(CategorizationResult),
    Fail(TaskError),
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Start => TaskStatus::Processing,
            Transition::Complete(_) => TaskStatus::Completed,
            Transition::Fail(_) => TaskStatus::Failed,
        }
    }
}

/// Task records keyed by id. Every operation is atomic per record and
/// returns without waiting on anything but another single-record update.
pub trait TaskStore: Send + Sync {
    fn create(&self, filename: &str) -> TaskId;

    fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError>;

    fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    fn len(&self) -> usize;
}

/// Process-lifetime store. Nothing is ever evicted, so memory grows with
/// the number of tasks submitted since start-up.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, filename: &str) -> TaskId {
        loop {
            let id = TaskId::new();
            if let Entry::Vacant(slot) = self.tasks.entry(id) {
                slot.insert(Task::new(id, filename));
                info!("Task created: task_id={} filename={}", id, filename);
                return id;
            }
        }
    }

    fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let mut record = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let task = record.value_mut();

        let next = match (&task.state, transition) {
            (TaskState::Pending, Transition::Start) => TaskState::Processing {
                started_at: Utc::now(),
            },
            (TaskState::Processing { started_at }, Transition::Complete(result)) => {
                TaskState::Completed {
                    started_at: *started_at,
                    completed_at: Utc::now(),
                    result,
                }
            }
            (TaskState::Processing { started_at }, Transition::Fail(error)) => TaskState::Failed {
                started_at: *started_at,
                completed_at: Utc::now(),
                error,
            },
            (state, transition) => {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: state.status(),
                    attempted: transition.target(),
                });
            }
        };

        debug!(
            "Task transitioned: task_id={} {} -> {}",
            id,
            task.state.status(),
            next.status()
        );
        task.state = next;
        Ok(task.clone())
    }

    fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.tasks
            .get(&id)
            .map(|record| record.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
