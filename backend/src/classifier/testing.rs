//! Classifier doubles for tests.

use async_trait::async_trait;
use shared::{ErrorKind, ImageCategory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{ClassificationError, Classifier, RawCategorization};

pub fn category(name: &str, confidence: f32) -> ImageCategory {
    ImageCategory {
        name: name.to_string(),
        confidence,
        description: format!("looks like {}", name),
    }
}

enum Behavior {
    Return(Vec<ImageCategory>),
    Slow(Duration),
    Fail(ErrorKind),
    Panic,
    Gated(Arc<Semaphore>, Vec<ImageCategory>),
}

pub struct MockClassifier {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockClassifier {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(categories: Vec<ImageCategory>) -> Self {
        Self::with(Behavior::Return(categories))
    }

    pub fn receipt() -> Self {
        Self::returning(vec![category("receipt", 0.95)])
    }

    pub fn slow(delay: Duration) -> Self {
        Self::with(Behavior::Slow(delay))
    }

    pub fn failing(kind: ErrorKind) -> Self {
        Self::with(Behavior::Fail(kind))
    }

    pub fn panicking() -> Self {
        Self::with(Behavior::Panic)
    }

    /// Each call waits for one permit on the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mock = Self::with(Behavior::Gated(gate.clone(), vec![category("food", 0.9)]));
        (mock, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<RawCategorization, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let categories = match &self.behavior {
            Behavior::Return(categories) => categories.clone(),
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                vec![category("late", 0.9)]
            }
            Behavior::Fail(kind) => {
                return Err(ClassificationError::new(*kind, "mock classifier failure"));
            }
            Behavior::Panic => panic!("mock classifier exploded"),
            Behavior::Gated(gate, categories) => {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|_| ClassificationError::unavailable("gate closed"))?;
                permit.forget();
                categories.clone()
            }
        };
        Ok(RawCategorization {
            categories,
            summary: "mock analysis".to_string(),
            ..RawCategorization::default()
        })
    }

    async fn check_health(&self) -> bool {
        if let Behavior::Slow(delay) = &self.behavior {
            tokio::time::sleep(*delay).await;
        }
        true
    }
}
