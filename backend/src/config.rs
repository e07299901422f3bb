use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::upload::ImageFormat;

const SETTINGS_FILE_VAR: &str = "SETTINGS_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Process configuration. Values come from built-in defaults, then an
/// optional YAML file named by `SETTINGS_FILE`, then environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub max_file_size_mb: usize,
    pub allowed_extensions: Vec<String>,
    pub remote_timeout_secs: u64,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub confidence_threshold: f32,
    pub allowed_categories: Vec<String>,
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            gemini_api_key: String::new(),
            gemini_model: "gemini-3-flash-preview".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_file_size_mb: 10,
            allowed_extensions: ["jpg", "jpeg", "png", "webp", "heic", "heif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            remote_timeout_secs: 60,
            worker_pool_size: 4,
            queue_capacity: 256,
            confidence_threshold: 0.7,
            allowed_categories: ["food", "fuel", "medical"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match env::var(SETTINGS_FILE_VAR) {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Overlays values found by `lookup`, keyed by upper-case variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", v)?;
        }
        if let Some(v) = lookup("GEMINI_API_KEY") {
            self.gemini_api_key = v;
        }
        if let Some(v) = lookup("GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = lookup("GEMINI_BASE_URL") {
            self.gemini_base_url = v;
        }
        if let Some(v) = lookup("MAX_FILE_SIZE_MB") {
            self.max_file_size_mb = parse_var("MAX_FILE_SIZE_MB", v)?;
        }
        if let Some(v) = lookup("ALLOWED_EXTENSIONS") {
            self.allowed_extensions = split_list(&v);
        }
        if let Some(v) = lookup("REMOTE_TIMEOUT_SECS") {
            self.remote_timeout_secs = parse_var("REMOTE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("WORKER_POOL_SIZE") {
            self.worker_pool_size = parse_var("WORKER_POOL_SIZE", v)?;
        }
        if let Some(v) = lookup("QUEUE_CAPACITY") {
            self.queue_capacity = parse_var("QUEUE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_var("CONFIDENCE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("ALLOWED_CATEGORIES") {
            self.allowed_categories = split_list(&v);
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = split_list(&v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size_mb == 0 {
            return Err(invalid("MAX_FILE_SIZE_MB", self.max_file_size_mb));
        }
        if self.remote_timeout_secs == 0 {
            return Err(invalid("REMOTE_TIMEOUT_SECS", self.remote_timeout_secs));
        }
        if self.worker_pool_size == 0 {
            return Err(invalid("WORKER_POOL_SIZE", self.worker_pool_size));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("QUEUE_CAPACITY", self.queue_capacity));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(invalid("CONFIDENCE_THRESHOLD", self.confidence_threshold));
        }
        if self.supported_formats().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ALLOWED_EXTENSIONS",
                value: self.allowed_extensions.join(","),
            });
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn supported_formats(&self) -> Vec<ImageFormat> {
        let mut formats = Vec::new();
        for ext in &self.allowed_extensions {
            match ImageFormat::from_extension(ext) {
                Some(format) if !formats.contains(&format) => formats.push(format),
                Some(_) => {}
                None => log::warn!("Ignoring unsupported extension in configuration: {}", ext),
            }
        }
        formats
    }
}

fn parse_var<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_limits() {
        let settings = Settings::default();
        assert_eq!(settings.max_file_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(settings.supported_formats().len(), 5);
        assert_eq!(settings.worker_pool_size, 4);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup_from(&[
                ("PORT", "9090"),
                ("WORKER_POOL_SIZE", "2"),
                ("ALLOWED_EXTENSIONS", "PNG, jpg"),
                ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ]))
            .unwrap();

        assert_eq!(settings.port, 9090);
        assert_eq!(settings.worker_pool_size, 2);
        assert_eq!(
            settings.supported_formats(),
            vec![ImageFormat::Png, ImageFormat::Jpeg]
        );
        assert_eq!(settings.cors_origins.len(), 2);
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(lookup_from(&[("REMOTE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "REMOTE_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn zero_workers_fail_validation() {
        let settings = Settings {
            worker_pool_size: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn yaml_fills_unspecified_fields_with_defaults() {
        let settings = Settings::from_yaml_str(
            "port: 8081\nmax_file_size_mb: 5\nallowed_categories: [food]\n",
        )
        .unwrap();
        assert_eq!(settings.port, 8081);
        assert_eq!(settings.max_file_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(settings.allowed_categories, vec!["food".to_string()]);
        assert_eq!(settings.queue_capacity, 256);
    }
}
