pub mod gateway;
pub mod gemini;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use shared::{BillDetails, ErrorKind, ImageCategory, TaskError};

pub use gateway::{ClassifierGateway, GatewayConfig};
pub use gemini::GeminiClient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClassificationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassificationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteTimeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteRateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }
}

impl From<ClassificationError> for TaskError {
    fn from(err: ClassificationError) -> Self {
        TaskError {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// What the remote capability reported, before ordering and filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCategorization {
    pub categories: Vec<ImageCategory>,
    pub summary: String,
    pub bill_recognised: bool,
    pub bill_details: Option<BillDetails>,
}

/// The external image-categorization capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<RawCategorization, ClassificationError>;

    fn is_configured(&self) -> bool {
        true
    }

    async fn check_health(&self) -> bool {
        self.is_configured()
    }
}
