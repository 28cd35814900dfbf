//! Live backend for an OpenAI-compatible chat completions endpoint.
//!
//! One blocking HTTP call per frame, bounded by the agent timeout. The image
//! travels inline as a `data:` URL; the model is asked for a JSON object.

use std::io;
use std::time::Duration;

use serde_json::{json, Value};

use crate::annotate::backend::AnnotationBackend;
use crate::annotate::result::{RawAnnotation, TokenUsage};
use crate::error::AnnotationError;
use crate::request::AnnotationRequest;

/// Maximum bytes of an error body kept in `AnnotationError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

pub struct OpenAiBackend {
    settings: OpenAiSettings,
    agent: ureq::Agent,
}

impl OpenAiBackend {
    pub fn new(settings: OpenAiSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self { settings, agent }
    }

    fn request_body(&self, request: &AnnotationRequest) -> Value {
        json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "response_format": {"type": "json_object"},
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": request.prompt},
                    {"type": "image_url", "image_url": {"url": request.image_data_url()}},
                ],
            }],
        })
    }

    fn map_transport(&self, err: ureq::Transport) -> AnnotationError {
        let timed_out = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<io::Error>())
            .is_some_and(|io_err| {
                matches!(
                    io_err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                )
            });
        if timed_out {
            AnnotationError::Timeout(self.settings.timeout.as_secs())
        } else {
            AnnotationError::Transport(err.to_string())
        }
    }
}

impl AnnotationBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn annotate(&mut self, request: &AnnotationRequest) -> Result<RawAnnotation, AnnotationError> {
        let body = self.request_body(request);
        let response = self
            .agent
            .post(&self.settings.api_url)
            .set(
                "Authorization",
                &format!("Bearer {}", self.settings.api_key),
            )
            .send_json(body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let mut body = response.into_string().unwrap_or_default();
                truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
                return Err(AnnotationError::Status { code, body });
            }
            Err(ureq::Error::Transport(transport)) => return Err(self.map_transport(transport)),
        };

        let payload: Value = response.into_json().map_err(|e| {
            AnnotationError::MalformedResponse(format!("response body is not JSON: {}", e))
        })?;
        parse_chat_completion(&payload)
    }
}

/// Extract the model's JSON object and token usage from a chat completion.
pub fn parse_chat_completion(payload: &Value) -> Result<RawAnnotation, AnnotationError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AnnotationError::MalformedResponse("missing choices[0].message.content".into())
        })?;

    let content: Value = serde_json::from_str(strip_code_fence(content)).map_err(|e| {
        AnnotationError::MalformedResponse(format!("content is not valid JSON: {}", e))
    })?;
    if !content.is_object() {
        return Err(AnnotationError::MalformedResponse(
            "content is not a JSON object".into(),
        ));
    }

    let usage = payload
        .get("usage")
        .map(|usage| TokenUsage {
            prompt_tokens: token_count(usage, "prompt_tokens"),
            completion_tokens: token_count(usage, "completion_tokens"),
            total_tokens: token_count(usage, "total_tokens"),
        })
        .unwrap_or_default();

    Ok(RawAnnotation { content, usage })
}

fn token_count(usage: &Value, key: &str) -> u64 {
    usage.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Models sometimes wrap JSON in a ```json fence despite the response format.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 812, "completion_tokens": 40, "total_tokens": 852},
        })
    }

    #[test]
    fn parses_content_and_usage() {
        let raw = parse_chat_completion(&completion(
            r#"{"avocado": {"present": true, "confidence": 0.93}}"#,
        ))
        .unwrap();
        assert_eq!(raw.content["avocado"]["confidence"], json!(0.93));
        assert_eq!(
            raw.usage,
            TokenUsage {
                prompt_tokens: 812,
                completion_tokens: 40,
                total_tokens: 852,
            }
        );
    }

    #[test]
    fn tolerates_fenced_json() {
        let raw =
            parse_chat_completion(&completion("```json\n{\"fish\": false}\n```")).unwrap();
        assert_eq!(raw.content, json!({"fish": false}));
    }

    #[test]
    fn rejects_non_object_content() {
        for content in ["not json at all", "[1, 2, 3]", "true"] {
            let err = parse_chat_completion(&completion(content)).unwrap_err();
            assert!(matches!(err, AnnotationError::MalformedResponse(_)));
        }
        let err = parse_chat_completion(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, AnnotationError::MalformedResponse(_)));
    }

    #[test]
    fn missing_usage_counts_as_zero() {
        let payload = json!({"choices": [{"message": {"content": "{}"}}]});
        let raw = parse_chat_completion(&payload).unwrap();
        assert_eq!(raw.usage, TokenUsage::default());
    }

    #[test]
    fn truncates_on_char_boundary() {
        let mut text = "ééé".to_string();
        truncate_at_char_boundary(&mut text, 3);
        assert_eq!(text, "é");
    }
}
