mod backend;
mod backends;
mod client;
mod result;

pub use backend::AnnotationBackend;
pub use backends::{NoOpsBackend, OpenAiBackend, OpenAiSettings};
pub use client::AnnotationClient;
pub use result::{AnnotationOutcome, RawAnnotation, TokenUsage};
