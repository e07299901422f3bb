pub mod validator;

pub use validator::{ImageFormat, ImageValidator, ValidationError};

/// An image received from a client. Lives only as long as one
/// categorization attempt; only the filename outlives it.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub declared_mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(
        filename: impl Into<String>,
        declared_mime_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            declared_mime_type,
            bytes,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}
