//! Output schema and annotation result types.
//!
//! - `OutputSchema`: ordered class templates, fixed at configuration time.
//! - `ClassLabel`: one class entry of an annotation (`present`, `confidence`, `bbox`).
//! - `AnnotationResult`: one `ClassLabel` per schema class, in schema order.
//!
//! The task type is inferred from the schema: any template carrying a `bbox`
//! key makes the whole schema a detection schema.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;

/// Annotation task, inferred from the schema and never configured directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Classification,
    Detection,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Detection => "detection",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template for a single class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTemplate {
    pub name: String,
    /// True when the template declared a `bbox` key.
    pub has_bbox: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSchema {
    classes: Vec<ClassTemplate>,
}

impl OutputSchema {
    /// Build a schema from a JSON mapping of class name to template object.
    ///
    /// Insertion order of the mapping is kept.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value.as_object().ok_or_else(|| {
            ConfigError::InvalidSchema("output_schema must be a mapping of class names".into())
        })?;
        Self::from_map(map)
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        if map.is_empty() {
            return Err(ConfigError::InvalidSchema(
                "output_schema must define at least one class".into(),
            ));
        }
        let mut classes = Vec::with_capacity(map.len());
        for (name, template) in map {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidSchema("class names must be non-empty".into()));
            }
            let template = template.as_object().ok_or_else(|| {
                ConfigError::InvalidSchema(format!("template for '{}' must be an object", name))
            })?;
            classes.push(ClassTemplate {
                name: name.clone(),
                has_bbox: template.contains_key("bbox"),
            });
        }
        Ok(Self { classes })
    }

    pub fn classes(&self) -> &[ClassTemplate] {
        &self.classes
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|class| class.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ClassTemplate> {
        self.classes.iter().find(|class| class.name == name)
    }

    pub fn has_bbox(&self) -> bool {
        self.classes.iter().any(|class| class.has_bbox)
    }

    pub fn task_type(&self) -> TaskType {
        if self.has_bbox() {
            TaskType::Detection
        } else {
            TaskType::Classification
        }
    }

    /// Schema defaults: every class absent with zero confidence and no box.
    pub fn defaults(&self) -> AnnotationResult {
        let mut result = AnnotationResult::new();
        for class in &self.classes {
            result.insert_class(class, ClassLabel::absent());
        }
        result
    }

    /// Machine-readable description of the expected response shape.
    pub fn describe(&self) -> Value {
        let mut map = Map::new();
        for class in &self.classes {
            let mut template = Map::new();
            template.insert("present".into(), json!(false));
            template.insert("confidence".into(), json!(0.0));
            if class.has_bbox {
                template.insert("bbox".into(), Value::Null);
            }
            map.insert(class.name.clone(), Value::Object(template));
        }
        Value::Object(map)
    }
}

/// Annotation for one class of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub present: bool,
    pub confidence: f64,
    /// Normalized `[x_min, y_min, x_max, y_max]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl ClassLabel {
    pub fn absent() -> Self {
        Self {
            present: false,
            confidence: 0.0,
            bbox: None,
        }
    }
}

/// Per-frame labels keyed by class name, kept in schema order.
///
/// Classes whose template declares `bbox` always serialize the key, as
/// `null` when there is no box; other classes omit it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnnotationResult {
    labels: Vec<LabelSlot>,
}

#[derive(Clone, Debug, PartialEq)]
struct LabelSlot {
    name: String,
    label: ClassLabel,
    bbox_slot: bool,
}

impl AnnotationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the label for `name`, keeping first-insertion order.
    ///
    /// A label carrying a box marks the class as a bbox class.
    pub fn insert(&mut self, name: impl Into<String>, label: ClassLabel) {
        let bbox_slot = label.bbox.is_some();
        self.insert_slot(name.into(), label, bbox_slot);
    }

    /// Insert the label for a schema class, keeping its bbox slot.
    pub fn insert_class(&mut self, template: &ClassTemplate, label: ClassLabel) {
        self.insert_slot(template.name.clone(), label, template.has_bbox);
    }

    fn insert_slot(&mut self, name: String, label: ClassLabel, bbox_slot: bool) {
        match self.labels.iter_mut().find(|slot| slot.name == name) {
            Some(slot) => {
                slot.label = label;
                slot.bbox_slot |= bbox_slot;
            }
            None => self.labels.push(LabelSlot {
                name,
                label,
                bbox_slot,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassLabel> {
        self.labels
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| &slot.label)
    }

    /// True when `name` carries a `bbox` key (possibly null).
    pub fn has_bbox_slot(&self, name: &str) -> bool {
        self.labels
            .iter()
            .any(|slot| slot.name == name && slot.bbox_slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClassLabel)> {
        self.labels
            .iter()
            .map(|slot| (slot.name.as_str(), &slot.label))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Serialize for LabelSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let with_bbox = self.bbox_slot || self.label.bbox.is_some();
        let mut state = serializer.serialize_struct("ClassLabel", if with_bbox { 3 } else { 2 })?;
        state.serialize_field("present", &self.label.present)?;
        state.serialize_field("confidence", &self.label.confidence)?;
        if with_bbox {
            state.serialize_field("bbox", &self.label.bbox)?;
        }
        state.end()
    }
}

impl Serialize for AnnotationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.labels.len()))?;
        for slot in &self.labels {
            map.serialize_entry(&slot.name, slot)?;
        }
        map.end()
    }
}

/// Wire form of one logged label; `bbox` distinguishes absent from null.
#[derive(Deserialize)]
struct LoggedLabel {
    present: bool,
    confidence: f64,
    #[serde(default, deserialize_with = "present_key")]
    bbox: Option<Option<[f64; 4]>>,
}

fn present_key<'de, D>(deserializer: D) -> Result<Option<Option<[f64; 4]>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<[f64; 4]>::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for AnnotationResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResultVisitor;

        impl<'de> Visitor<'de> for ResultVisitor {
            type Value = AnnotationResult;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of class name to label")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut result = AnnotationResult::new();
                while let Some((name, logged)) = access.next_entry::<String, LoggedLabel>()? {
                    let label = ClassLabel {
                        present: logged.present,
                        confidence: logged.confidence,
                        bbox: logged.bbox.flatten(),
                    };
                    result.insert_slot(name, label, logged.bbox.is_some());
                }
                Ok(result)
            }
        }

        deserializer.deserialize_map(ResultVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_follows_bbox_presence() {
        let classification = OutputSchema::from_value(&json!({
            "item1": {"present": false, "confidence": 0.0},
        }))
        .unwrap();
        assert_eq!(classification.task_type(), TaskType::Classification);

        let detection = OutputSchema::from_value(&json!({
            "avocado": {"present": false, "confidence": 0.0, "bbox": null},
            "fish": {"present": false, "confidence": 0.0},
        }))
        .unwrap();
        assert_eq!(detection.task_type(), TaskType::Detection);
        assert!(detection.get("avocado").unwrap().has_bbox);
        assert!(!detection.get("fish").unwrap().has_bbox);
    }

    #[test]
    fn schema_keeps_declaration_order() {
        let schema = OutputSchema::from_value(&json!({
            "tomato": {"present": false, "confidence": 0.0},
            "avocado": {"present": false, "confidence": 0.0},
            "lettuce": {"present": false, "confidence": 0.0},
        }))
        .unwrap();
        let names: Vec<&str> = schema.class_names().collect();
        assert_eq!(names, vec!["tomato", "avocado", "lettuce"]);

        let serialized = serde_json::to_string(&schema.defaults()).unwrap();
        assert!(serialized.starts_with(r#"{"tomato":"#));
    }

    #[test]
    fn rejects_empty_or_malformed_schema() {
        assert!(OutputSchema::from_value(&json!({})).is_err());
        assert!(OutputSchema::from_value(&json!(["a", "b"])).is_err());
        assert!(OutputSchema::from_value(&json!({"a": true})).is_err());
    }

    #[test]
    fn result_round_trips_through_json_in_order() {
        let mut result = AnnotationResult::new();
        result.insert(
            "b",
            ClassLabel {
                present: true,
                confidence: 0.8,
                bbox: Some([0.1, 0.2, 0.3, 0.4]),
            },
        );
        result.insert("a", ClassLabel::absent());

        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(
            text,
            r#"{"b":{"present":true,"confidence":0.8,"bbox":[0.1,0.2,0.3,0.4]},"a":{"present":false,"confidence":0.0}}"#
        );
        let parsed: AnnotationResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn bbox_classes_serialize_null_box() {
        let schema = OutputSchema::from_value(&json!({
            "avocado": {"present": false, "confidence": 0.0, "bbox": null},
            "fish": {"present": false, "confidence": 0.0},
        }))
        .unwrap();
        let defaults = schema.defaults();
        assert!(defaults.has_bbox_slot("avocado"));
        assert!(!defaults.has_bbox_slot("fish"));

        let value = serde_json::to_value(&defaults).unwrap();
        assert_eq!(
            value,
            json!({
                "avocado": {"present": false, "confidence": 0.0, "bbox": null},
                "fish": {"present": false, "confidence": 0.0},
            })
        );

        let parsed: AnnotationResult = serde_json::from_value(value).unwrap();
        assert!(parsed.has_bbox_slot("avocado"));
        assert!(!parsed.has_bbox_slot("fish"));
        assert_eq!(parsed, defaults);
    }
}
