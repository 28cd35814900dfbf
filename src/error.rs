//! Error types at the library boundary.
//!
//! `ConfigError` is fatal and only produced during setup, before any frame is
//! processed. `AnnotationError` never escapes the annotation client: it is
//! converted into a fallback result for the frame that triggered it.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chatgpt_api_key is required")]
    MissingApiKey,

    #[error("{0} is required")]
    MissingOption(&'static str),

    #[error("Prompt file not found: {}", .0.display())]
    PromptNotFound(PathBuf),

    #[error("invalid topic_pattern '{pattern}': {source}")]
    InvalidTopicPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid output_schema: {0}")]
    InvalidSchema(String),

    #[error("invalid value for {key} ('{value}'): {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("api returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}
