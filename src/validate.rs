//! Normalization of raw model output into the schema shape.
//!
//! Each raw class value is first decoded into a `RawLabel` variant, one per
//! accepted shape, and every variant converges on the same `ClassLabel`.
//! Nothing here fails: irregular input is corrected to schema defaults and
//! counted, so the frame always gets a complete result.

use serde_json::{Map, Value};

use crate::schema::{AnnotationResult, ClassLabel, ClassTemplate, OutputSchema};

/// Accepted shapes of a single class value in a model response.
#[derive(Debug, PartialEq)]
enum RawLabel<'a> {
    /// `"class": true`
    Shorthand(bool),
    /// Object with a boolean `present` and a numeric `confidence`.
    Full {
        present: bool,
        confidence: f64,
        bbox: Option<&'a Value>,
    },
    /// Object missing fields or carrying loosely typed ones.
    Partial(&'a Map<String, Value>),
    /// Anything else (null, number, string, array).
    Unrecognized,
}

impl<'a> RawLabel<'a> {
    fn decode(value: &'a Value) -> Self {
        match value {
            Value::Bool(flag) => RawLabel::Shorthand(*flag),
            Value::Object(map) => match (map.get("present"), map.get("confidence")) {
                (Some(Value::Bool(present)), Some(Value::Number(confidence))) => RawLabel::Full {
                    present: *present,
                    confidence: confidence.as_f64().unwrap_or(0.0),
                    bbox: map.get("bbox"),
                },
                _ => RawLabel::Partial(map),
            },
            _ => RawLabel::Unrecognized,
        }
    }
}

/// Counts of corrections applied while normalizing one response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Corrections {
    /// Schema classes missing from the response.
    pub missing_classes: usize,
    /// Response classes not in the schema.
    pub unknown_classes: usize,
    /// Values coerced or replaced (bad types, out-of-range confidence, bad bbox).
    pub coerced_values: usize,
}

impl Corrections {
    pub fn total(&self) -> usize {
        self.missing_classes + self.unknown_classes + self.coerced_values
    }
}

pub struct AnnotationValidator {
    schema: OutputSchema,
}

impl AnnotationValidator {
    pub fn new(schema: OutputSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn validate(&self, raw: &Value) -> AnnotationResult {
        self.validate_with_corrections(raw).0
    }

    pub fn validate_with_corrections(&self, raw: &Value) -> (AnnotationResult, Corrections) {
        let mut corrections = Corrections::default();
        let empty = Map::new();
        let raw = match raw {
            Value::Object(map) => map,
            _ => {
                corrections.coerced_values += 1;
                &empty
            }
        };

        corrections.unknown_classes = raw
            .keys()
            .filter(|name| self.schema.get(name).is_none())
            .count();

        let mut result = AnnotationResult::new();
        for template in self.schema.classes() {
            let label = match raw.get(&template.name) {
                Some(value) => normalize(template, RawLabel::decode(value), &mut corrections),
                None => {
                    corrections.missing_classes += 1;
                    ClassLabel::absent()
                }
            };
            result.insert_class(template, label);
        }

        if corrections.total() > 0 {
            log::debug!("normalized model output: {:?}", corrections);
        }
        (result, corrections)
    }
}

fn normalize(template: &ClassTemplate, raw: RawLabel<'_>, corrections: &mut Corrections) -> ClassLabel {
    match raw {
        RawLabel::Shorthand(present) => ClassLabel {
            present,
            confidence: if present { 1.0 } else { 0.0 },
            bbox: None,
        },
        RawLabel::Full {
            present,
            confidence,
            bbox,
        } => ClassLabel {
            present,
            confidence: clamp_confidence(confidence, corrections),
            bbox: normalize_bbox(template, bbox, corrections),
        },
        RawLabel::Partial(map) => ClassLabel {
            present: coerce_present(map.get("present"), corrections),
            confidence: map
                .get("confidence")
                .map(|value| coerce_confidence(value, corrections))
                .unwrap_or(0.0),
            bbox: normalize_bbox(template, map.get("bbox"), corrections),
        },
        RawLabel::Unrecognized => {
            corrections.coerced_values += 1;
            ClassLabel::absent()
        }
    }
}

fn clamp_confidence(confidence: f64, corrections: &mut Corrections) -> f64 {
    if !confidence.is_finite() {
        corrections.coerced_values += 1;
        return 0.0;
    }
    let clamped = confidence.clamp(0.0, 1.0);
    if clamped != confidence {
        corrections.coerced_values += 1;
    }
    clamped
}

fn coerce_confidence(value: &Value, corrections: &mut Corrections) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(confidence) => {
            if !value.is_number() {
                corrections.coerced_values += 1;
            }
            clamp_confidence(confidence, corrections)
        }
        None => {
            corrections.coerced_values += 1;
            0.0
        }
    }
}

fn coerce_present(value: Option<&Value>, corrections: &mut Corrections) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        None => false,
        Some(other) => {
            corrections.coerced_values += 1;
            match other {
                Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                Value::String(s) => matches!(
                    s.trim().to_ascii_lowercase().as_str(),
                    "true" | "yes" | "1"
                ),
                _ => false,
            }
        }
    }
}

/// Keep a bbox only for bbox classes and only as four numbers.
///
/// Coordinates are clamped to `[0, 1]` and reordered to min/max.
fn normalize_bbox(
    template: &ClassTemplate,
    value: Option<&Value>,
    corrections: &mut Corrections,
) -> Option<[f64; 4]> {
    let value = match value {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };
    if !template.has_bbox {
        corrections.coerced_values += 1;
        return None;
    }
    let coords: Option<Vec<f64>> = value
        .as_array()
        .filter(|items| items.len() == 4)
        .map(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>())
        .and_then(|coords| coords.filter(|c| c.iter().all(|v| v.is_finite())));
    let Some(c) = coords else {
        corrections.coerced_values += 1;
        return None;
    };

    let bbox = [
        c[0].min(c[2]).clamp(0.0, 1.0),
        c[1].min(c[3]).clamp(0.0, 1.0),
        c[0].max(c[2]).clamp(0.0, 1.0),
        c[1].max(c[3]).clamp(0.0, 1.0),
    ];
    if bbox[..] != c[..] {
        corrections.coerced_values += 1;
    }
    Some(bbox)
}
