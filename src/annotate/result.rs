use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting reported by the model endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Raw backend response before validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAnnotation {
    /// Decoded JSON object produced by the model.
    pub content: Value,
    pub usage: TokenUsage,
}

/// Result of one client call. Always usable: failures carry schema defaults.
#[derive(Clone, Debug)]
pub struct AnnotationOutcome {
    pub raw: Value,
    pub usage: TokenUsage,
    /// Set when the call failed and `raw` holds schema defaults.
    pub error: Option<String>,
}

impl AnnotationOutcome {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}
