use serde_json::json;
use std::path::Path;

use super::UploadedImage;
use crate::config::Settings;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Heic,
    Heif,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Heic => "image/heic",
            ImageFormat::Heif => "image/heif",
        }
    }

    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::WebP),
            "image/heic" | "image/heic-sequence" => Some(ImageFormat::Heic),
            "image/heif" | "image/heif-sequence" => Some(ImageFormat::Heif),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::WebP),
            "heic" => Some(ImageFormat::Heic),
            "heif" => Some(ImageFormat::Heif),
            _ => None,
        }
    }

    /// Detects the format from the leading bytes of the file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes) {
            Ok(image::ImageFormat::Jpeg) => return Some(ImageFormat::Jpeg),
            Ok(image::ImageFormat::Png) => return Some(ImageFormat::Png),
            Ok(image::ImageFormat::WebP) => return Some(ImageFormat::WebP),
            _ => {}
        }
        // ISO-BMFF container: size(4) "ftyp" major_brand(4)
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return match &bytes[8..12] {
                b"heic" | b"heix" | b"hevc" | b"hevx" | b"heim" | b"heis" => {
                    Some(ImageFormat::Heic)
                }
                b"mif1" | b"msf1" => Some(ImageFormat::Heif),
                _ => None,
            };
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("No file was provided in the 'file' field")]
    MissingFile,
    #[error("Uploaded file '{filename}' is empty")]
    EmptyFile { filename: String },
    #[error(
        "File size ({:.2} MB) exceeds maximum allowed size ({:.0} MB)",
        to_mb(.actual_bytes),
        to_mb(.max_bytes)
    )]
    FileTooLarge { max_bytes: usize, actual_bytes: usize },
    #[error("File type '{file_type}' is not supported")]
    UnsupportedFileType {
        file_type: String,
        allowed_types: Vec<String>,
    },
}

fn to_mb(bytes: &usize) -> f64 {
    *bytes as f64 / MIB
}

impl ValidationError {
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ValidationError::MissingFile => None,
            ValidationError::EmptyFile { filename } => Some(json!({ "filename": filename })),
            ValidationError::FileTooLarge {
                max_bytes,
                actual_bytes,
            } => Some(json!({
                "max_size_mb": to_mb(max_bytes),
                "actual_size_mb": to_mb(actual_bytes),
            })),
            ValidationError::UnsupportedFileType {
                file_type,
                allowed_types,
            } => Some(json!({
                "file_type": file_type,
                "allowed_types": allowed_types,
            })),
        }
    }
}

/// Size and format gate applied to every upload before it can reach the
/// classifier or consume a task id.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_size_bytes: usize,
    supported: Vec<ImageFormat>,
}

impl ImageValidator {
    pub fn new(max_size_bytes: usize, supported: Vec<ImageFormat>) -> Self {
        Self {
            max_size_bytes,
            supported,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_file_size_bytes(), settings.supported_formats())
    }

    pub fn check_size(&self, size_bytes: usize) -> Result<(), ValidationError> {
        if size_bytes > self.max_size_bytes {
            return Err(ValidationError::FileTooLarge {
                max_bytes: self.max_size_bytes,
                actual_bytes: size_bytes,
            });
        }
        Ok(())
    }

    pub fn validate(&self, image: &UploadedImage) -> Result<ImageFormat, ValidationError> {
        if image.size_bytes() == 0 {
            return Err(ValidationError::EmptyFile {
                filename: image.filename.clone(),
            });
        }
        self.check_size(image.size_bytes())?;

        let format = self.resolve_format(image)?;
        if !self.supported.contains(&format) {
            return Err(self.unsupported(format.mime_type()));
        }

        log::debug!(
            "Upload validated: filename={} size_bytes={} format={}",
            image.filename,
            image.size_bytes(),
            format.mime_type()
        );
        Ok(format)
    }

    fn resolve_format(&self, image: &UploadedImage) -> Result<ImageFormat, ValidationError> {
        let declared = image
            .declared_mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty() && !is_generic_mime(m));

        if let Some(mime_type) = declared {
            return ImageFormat::from_mime_type(mime_type).ok_or_else(|| self.unsupported(mime_type));
        }

        if let Some(format) = ImageFormat::sniff(&image.bytes) {
            return Ok(format);
        }

        let extension = Path::new(&image.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ImageFormat::from_extension(extension).ok_or_else(|| {
            self.unsupported(if extension.is_empty() {
                "unknown"
            } else {
                extension
            })
        })
    }

    fn unsupported(&self, file_type: &str) -> ValidationError {
        ValidationError::UnsupportedFileType {
            file_type: file_type.to_string(),
            allowed_types: self
                .supported
                .iter()
                .map(|f| f.mime_type().to_string())
                .collect(),
        }
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn is_generic_mime(mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    lower.starts_with("application/octet-stream") || lower.starts_with("binary/octet-stream")
}

#[cfg(test)]
pub(crate) mod fixtures {
    const JPEG_MAGIC: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn padded(prefix: &[u8], size: usize) -> Vec<u8> {
        let mut bytes = prefix.to_vec();
        bytes.resize(size.max(prefix.len()), 0);
        bytes
    }

    pub fn jpeg_bytes(size: usize) -> Vec<u8> {
        padded(&JPEG_MAGIC, size)
    }

    pub fn png_bytes(size: usize) -> Vec<u8> {
        padded(&PNG_MAGIC, size)
    }

    pub fn heic_bytes(size: usize) -> Vec<u8> {
        padded(&[0, 0, 0, 0x18, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c'], size)
    }
}
