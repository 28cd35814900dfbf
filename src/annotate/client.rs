use serde_json::Value;

use crate::annotate::backend::AnnotationBackend;
use crate::annotate::result::{AnnotationOutcome, TokenUsage};
use crate::error::AnnotationError;
use crate::request::AnnotationRequest;
use crate::schema::OutputSchema;

/// Wraps a backend so that no annotation failure escapes.
///
/// Every failure (transport, timeout, bad status, unparsable response) turns
/// into an outcome holding schema defaults and an error marker.
pub struct AnnotationClient {
    backend: Box<dyn AnnotationBackend>,
    defaults: Value,
}

impl AnnotationClient {
    pub fn new<B: AnnotationBackend + 'static>(backend: B, schema: &OutputSchema) -> Self {
        Self::from_boxed(Box::new(backend), schema)
    }

    pub fn from_boxed(backend: Box<dyn AnnotationBackend>, schema: &OutputSchema) -> Self {
        Self {
            backend,
            defaults: serde_json::to_value(schema.defaults()).unwrap_or(Value::Null),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Annotate a built request. Exactly one attempt.
    pub fn annotate(&mut self, request: &AnnotationRequest) -> AnnotationOutcome {
        match self.backend.annotate(request) {
            Ok(raw) => AnnotationOutcome {
                raw: raw.content,
                usage: raw.usage,
                error: None,
            },
            Err(err) => self.fallback(&err),
        }
    }

    /// Outcome used when the request could not be built or the call failed.
    pub fn fallback(&self, err: &AnnotationError) -> AnnotationOutcome {
        log::warn!(
            "annotation via {} failed, using schema defaults: {}",
            self.backend.name(),
            err
        );
        AnnotationOutcome {
            raw: self.defaults.clone(),
            usage: TokenUsage::default(),
            error: Some(err.to_string()),
        }
    }
}
