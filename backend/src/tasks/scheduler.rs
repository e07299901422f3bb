use log::{debug, error, info, warn};
use shared::{ErrorKind, TaskError, TaskId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::store::{TaskStore, Transition};
use crate::classifier::ClassifierGateway;
use crate::config::Settings;
use crate::upload::{ImageFormat, UploadedImage};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task scheduler is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on tasks in `Processing` at once.
    pub workers: usize,
    /// Tasks waiting for a worker; submitters wait when it is full.
    pub queue_capacity: usize,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workers: settings.worker_pool_size,
            queue_capacity: settings.queue_capacity,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

struct Job {
    task_id: TaskId,
    image: UploadedImage,
    format: ImageFormat,
}

/// A reserved place in the work queue. Sending through it cannot fail, so a
/// task id allocated after reserving is guaranteed to reach a worker.
pub struct SubmitSlot {
    permit: mpsc::OwnedPermit<Job>,
}

impl SubmitSlot {
    pub fn submit(self, task_id: TaskId, image: UploadedImage, format: ImageFormat) {
        self.permit.send(Job {
            task_id,
            image,
            format,
        });
        debug!("Task queued: task_id={}", task_id);
    }
}

/// Fixed pool of workers draining a bounded queue of classification jobs.
pub struct TaskScheduler {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        gateway: ClassifierGateway,
    ) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    store.clone(),
                    gateway.clone(),
                ))
            })
            .collect();

        info!(
            "Task scheduler started with {} workers, queue capacity {}",
            workers, config.queue_capacity
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        }
    }

    /// Waits for room in the queue. Fails only once the scheduler is shut down.
    pub async fn reserve(&self) -> Result<SubmitSlot, SchedulerError> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(SchedulerError::Closed)?;
        let permit = sender
            .reserve_owned()
            .await
            .map_err(|_| SchedulerError::Closed)?;
        Ok(SubmitSlot { permit })
    }

    #[cfg(test)]
    pub async fn submit(
        &self,
        task_id: TaskId,
        image: UploadedImage,
        format: ImageFormat,
    ) -> Result<(), SchedulerError> {
        self.reserve().await?.submit(task_id, image, format);
        Ok(())
    }

    /// Stops accepting work and waits for queued and in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }
        info!("Task scheduler stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    store: Arc<dyn TaskStore>,
    gateway: ClassifierGateway,
) {
    debug!("Worker {} started", worker_id);
    loop {
        let job = receiver.lock().await.recv().await;
        match job {
            Some(job) => process_job(worker_id, job, store.as_ref(), &gateway).await,
            None => break,
        }
    }
    debug!("Worker {} stopped", worker_id);
}

async fn process_job(worker_id: usize, job: Job, store: &dyn TaskStore, gateway: &ClassifierGateway) {
    let task_id = job.task_id;
    let filename = job.image.filename.clone();

    if let Err(e) = store.transition(task_id, Transition::Start) {
        error!("Task {} could not start: {}", task_id, e);
        return;
    }
    info!(
        "Task processing: task_id={} filename={} worker={}",
        task_id, filename, worker_id
    );

    // The call runs in its own task so a panic surfaces as a JoinError
    // instead of taking the worker down with the task stuck in Processing.
    let call_gateway = gateway.clone();
    let outcome = tokio::spawn(async move {
        let Job { image, format, .. } = job;
        call_gateway
            .classify(&image.bytes, format.mime_type(), &image.filename)
            .await
    })
    .await;

    let transition = match outcome {
        Ok(Ok(result)) => {
            info!(
                "Task completed: task_id={} filename={} primary_category={}",
                task_id, filename, result.primary_category
            );
            Transition::Complete(result)
        }
        Ok(Err(err)) => {
            warn!(
                "Task failed: task_id={} filename={} kind={} error={}",
                task_id, filename, err.kind, err.message
            );
            Transition::Fail(err.into())
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                "Classification panicked during execution"
            } else {
                "Classification was cancelled"
            };
            error!(
                "Task failed: task_id={} filename={} kind={} error={}",
                task_id,
                filename,
                ErrorKind::ExecutionFault,
                message
            );
            Transition::Fail(TaskError {
                kind: ErrorKind::ExecutionFault,
                message: message.to_string(),
            })
        }
    };

    if let Err(e) = store.transition(task_id, transition) {
        error!("Task {} could not be finalized: {}", task_id, e);
    }
}
