use serde_json::Value;

use crate::annotate::backend::AnnotationBackend;
use crate::annotate::result::{RawAnnotation, TokenUsage};
use crate::error::AnnotationError;
use crate::request::AnnotationRequest;
use crate::schema::OutputSchema;

/// No-ops backend. Makes no network call and answers with schema defaults.
pub struct NoOpsBackend {
    model: String,
    defaults: Value,
}

impl NoOpsBackend {
    pub fn new(schema: &OutputSchema, model: impl Into<String>) -> Self {
        let defaults = serde_json::to_value(schema.defaults()).unwrap_or(Value::Null);
        Self {
            model: model.into(),
            defaults,
        }
    }
}

impl AnnotationBackend for NoOpsBackend {
    fn name(&self) -> &'static str {
        "no_ops"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn annotate(&mut self, _request: &AnnotationRequest) -> Result<RawAnnotation, AnnotationError> {
        Ok(RawAnnotation {
            content: self.defaults.clone(),
            usage: TokenUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{AnnotationRequestBuilder, PreprocessConfig};
    use crate::frame::FrameImage;
    use image::{DynamicImage, RgbImage};
    use serde_json::json;

    #[test]
    fn no_ops_backend_returns_defaults_and_zero_usage() {
        let schema = OutputSchema::from_value(&json!({
            "item1": {"present": false, "confidence": 0.0},
            "item2": {"present": true, "confidence": 0.7},
        }))
        .unwrap();
        let builder =
            AnnotationRequestBuilder::new("p".into(), schema.clone(), PreprocessConfig::default());
        let request = builder
            .build(&FrameImage::from_pixels(DynamicImage::ImageRgb8(RgbImage::new(4, 4))))
            .unwrap();

        let mut backend = NoOpsBackend::new(&schema, "gpt-4o-mini");
        let raw = backend.annotate(&request).unwrap();
        assert_eq!(
            raw.content,
            json!({
                "item1": {"present": false, "confidence": 0.0},
                "item2": {"present": false, "confidence": 0.0},
            })
        );
        assert_eq!(raw.usage.total_tokens, 0);
        assert_eq!(backend.name(), "no_ops");
    }
}
