use chrono::Utc;
use log::info;
use shared::{CategorizationResult, HealthResponse, HealthStatus, Task, TaskId};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::classifier::{ClassificationError, ClassifierGateway};
use crate::tasks::{SchedulerError, StoreError, TaskScheduler, TaskStore};
use crate::upload::{ImageValidator, UploadedImage, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("Task '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Entry points used by the HTTP layer. Holds no mutable state of its own.
#[derive(Clone)]
pub struct CategorizationService {
    validator: ImageValidator,
    gateway: ClassifierGateway,
    store: Arc<dyn TaskStore>,
    scheduler: Arc<TaskScheduler>,
}

impl CategorizationService {
    pub fn new(
        validator: ImageValidator,
        gateway: ClassifierGateway,
        store: Arc<dyn TaskStore>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            validator,
            gateway,
            store,
            scheduler,
        }
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub async fn categorize_sync(
        &self,
        image: UploadedImage,
    ) -> Result<CategorizationResult, ServiceError> {
        let format = self.validator.validate(&image)?;
        let result = self
            .gateway
            .classify(&image.bytes, format.mime_type(), &image.filename)
            .await?;
        Ok(result)
    }

    pub async fn categorize_async(&self, image: UploadedImage) -> Result<TaskId, ServiceError> {
        let format = self.validator.validate(&image)?;
        let slot = self.scheduler.reserve().await?;
        let task_id = self.store.create(&image.filename);
        info!(
            "Async categorization scheduled: task_id={} filename={} size_bytes={}",
            task_id,
            image.filename,
            image.size_bytes()
        );
        slot.submit(task_id, image, format);
        Ok(task_id)
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<Task, ServiceError> {
        let id: TaskId = task_id
            .parse()
            .map_err(|_| ServiceError::NotFound(task_id.to_string()))?;
        self.store.get(id).map_err(|e| match e {
            StoreError::NotFound(_) | StoreError::InvalidTransition { .. } => {
                ServiceError::NotFound(task_id.to_string())
            }
        })
    }

    pub async fn readiness(&self) -> HealthResponse {
        let configured = self.gateway.is_configured();
        let reachable = configured && self.gateway.check_health().await;

        let mut checks = BTreeMap::new();
        checks.insert("app".to_string(), true);
        checks.insert("gemini_configured".to_string(), configured);
        checks.insert("gemini_api".to_string(), reachable);

        let status = if checks.values().all(|ok| *ok) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            checks,
            tasks_tracked: Some(self.store.len()),
        }
    }

    pub fn tasks_tracked(&self) -> usize {
        self.store.len()
    }

    /// Drains queued work; later async submissions fail with `Closed`.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
