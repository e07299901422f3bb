pub mod categorization_service;

pub use categorization_service::{CategorizationService, ServiceError};
