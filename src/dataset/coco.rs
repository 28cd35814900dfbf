//! COCO-format multilabel/detection export.
//!
//! Categories are the sorted union of class names, numbered from 1. Image and
//! annotation ids increase from 1 in log order. An annotation is emitted for
//! every label with `present && confidence >= threshold`; its box is the
//! model's box scaled to pixels when the label carries one, otherwise the
//! full image extent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Utc};
use serde::{Deserialize, Serialize};

use super::{class_union, LabelLogEntry};
use crate::schema::ClassLabel;

/// Dimensions used when the image file cannot be read.
pub const FALLBACK_DIMENSIONS: (u32, u32) = (640, 480);

pub const ANNOTATIONS_FILE: &str = "annotations.json";
pub const SUMMARY_FILE: &str = "_summary_report.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoDataset {
    pub info: CocoInfo,
    pub licenses: Vec<CocoLicense>,
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoInfo {
    pub description: String,
    pub version: String,
    pub year: i32,
    pub contributor: String,
    pub date_created: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoLicense {
    pub id: u64,
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
    pub license: u64,
    pub flickr_url: String,
    pub coco_url: String,
    pub date_captured: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub segmentation: Vec<Vec<f64>>,
    pub area: f64,
    /// `[x, y, width, height]` in pixels.
    pub bbox: [f64; 4],
    pub iscrowd: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
    pub supercategory: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoSummary {
    pub task_type: String,
    pub format: String,
    pub total_classes: usize,
    pub classes: Vec<String>,
    pub category_mapping: BTreeMap<String, u64>,
    pub total_images: usize,
    pub total_annotations: usize,
    pub output_directory: PathBuf,
    pub confidence_threshold: f64,
    pub coco_file: PathBuf,
    pub bbox_type: String,
    pub description: String,
    pub generated_at: f64,
}

impl CocoDataset {
    pub fn category_mapping(&self) -> BTreeMap<String, u64> {
        self.categories
            .iter()
            .map(|category| (category.name.clone(), category.id))
            .collect()
    }

    /// True when any annotation used a model-provided box.
    pub fn has_model_boxes(&self) -> bool {
        self.annotations.iter().any(|annotation| {
            self.images
                .iter()
                .find(|image| image.id == annotation.image_id)
                .is_some_and(|image| {
                    annotation.bbox != [0.0, 0.0, f64::from(image.width), f64::from(image.height)]
                })
        })
    }
}

/// Compile label log entries into a COCO dataset.
///
/// `dimensions` maps a log image path to `(width, height)`.
pub fn build_coco_dataset<F>(entries: &[LabelLogEntry], threshold: f64, mut dimensions: F) -> CocoDataset
where
    F: FnMut(&str) -> (u32, u32),
{
    let classes = class_union(entries);
    let category_mapping: BTreeMap<&str, u64> = classes
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index as u64 + 1))
        .collect();

    let now = Local::now();
    let mut images = Vec::with_capacity(entries.len());
    let mut annotations = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let image_id = index as u64 + 1;
        let (width, height) = dimensions(&entry.image);
        images.push(CocoImage {
            id: image_id,
            width,
            height,
            file_name: file_name(&entry.image),
            license: 1,
            flickr_url: String::new(),
            coco_url: String::new(),
            date_captured: 0,
        });

        for (name, label) in entry.labels.iter() {
            if !(label.present && label.confidence >= threshold) {
                continue;
            }
            let Some(&category_id) = category_mapping.get(name) else {
                continue;
            };
            let bbox = pixel_bbox(label, width, height);
            annotations.push(CocoAnnotation {
                id: annotations.len() as u64 + 1,
                image_id,
                category_id,
                segmentation: Vec::new(),
                area: bbox[2] * bbox[3],
                bbox,
                iscrowd: 0,
            });
        }
    }

    CocoDataset {
        info: CocoInfo {
            description: "Frame Annotator Multilabel Dataset".to_string(),
            version: "1.0".to_string(),
            year: now.year(),
            contributor: "frame-annotator".to_string(),
            date_created: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        },
        licenses: vec![CocoLicense {
            id: 1,
            name: "Unknown".to_string(),
            url: String::new(),
        }],
        images,
        annotations,
        categories: classes
            .iter()
            .map(|name| CocoCategory {
                id: category_mapping[name.as_str()],
                name: name.clone(),
                supercategory: "object".to_string(),
            })
            .collect(),
    }
}

fn pixel_bbox(label: &ClassLabel, width: u32, height: u32) -> [f64; 4] {
    let (w, h) = (f64::from(width), f64::from(height));
    match label.bbox {
        Some([x0, y0, x1, y1]) if x1 > x0 && y1 > y0 => {
            [x0 * w, y0 * h, (x1 - x0) * w, (y1 - y0) * h]
        }
        _ => [0.0, 0.0, w, h],
    }
}

fn file_name(image: &str) -> String {
    Path::new(image)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string())
}

/// Read dimensions from the image under `image_root`, or fall back to 640x480.
pub fn image_dimensions_or_default(image_root: &Path, image: &str) -> (u32, u32) {
    let path = image_root.join(image);
    match image::image_dimensions(&path) {
        Ok(dims) => dims,
        Err(e) => {
            log::debug!(
                "using fallback dimensions for {}: {}",
                path.display(),
                e
            );
            FALLBACK_DIMENSIONS
        }
    }
}

/// Build the dataset and write `annotations.json` plus `_summary_report.json`.
pub fn export_coco(
    entries: &[LabelLogEntry],
    threshold: f64,
    output_dir: &Path,
    image_root: &Path,
) -> Result<CocoSummary> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let dataset = build_coco_dataset(entries, threshold, |image| {
        image_dimensions_or_default(image_root, image)
    });

    let coco_file = output_dir.join(ANNOTATIONS_FILE);
    let json = serde_json::to_vec_pretty(&dataset)?;
    std::fs::write(&coco_file, json)
        .with_context(|| format!("failed to write {}", coco_file.display()))?;

    let model_boxes = dataset.has_model_boxes();
    let category_mapping = dataset.category_mapping();
    let summary = CocoSummary {
        task_type: "multilabel_classification".to_string(),
        format: "COCO".to_string(),
        total_classes: dataset.categories.len(),
        classes: dataset.categories.iter().map(|c| c.name.clone()).collect(),
        category_mapping,
        total_images: dataset.images.len(),
        total_annotations: dataset.annotations.len(),
        output_directory: output_dir.to_path_buf(),
        confidence_threshold: threshold,
        coco_file,
        bbox_type: if model_boxes {
            "model_bbox".to_string()
        } else {
            "full_image_bbox".to_string()
        },
        description: if model_boxes {
            "Present labels use the model's box, or the full image when none was given".to_string()
        } else {
            "Each present label gets a bounding box covering the entire image".to_string()
        },
        generated_at: Utc::now().timestamp_millis() as f64 / 1000.0,
    };

    let summary_file = output_dir.join(SUMMARY_FILE);
    std::fs::write(&summary_file, serde_json::to_vec_pretty(&summary)?)
        .with_context(|| format!("failed to write {}", summary_file.display()))?;

    log::info!(
        "coco dataset: {} images, {} annotations, {} classes -> {}",
        summary.total_images,
        summary.total_annotations,
        summary.total_classes,
        output_dir.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AnnotationResult;

    fn entry(image: &str, labels: &[(&str, bool, f64)]) -> LabelLogEntry {
        let mut result = AnnotationResult::new();
        for (name, present, confidence) in labels {
            result.insert(
                *name,
                ClassLabel {
                    present: *present,
                    confidence: *confidence,
                    bbox: None,
                },
            );
        }
        LabelLogEntry {
            image: image.to_string(),
            labels: result,
        }
    }

    fn avocado_log() -> Vec<LabelLogEntry> {
        vec![
            entry("data/1.jpg", &[("tomato", true, 0.95), ("avocado", true, 0.95)]),
            entry("data/2.jpg", &[("tomato", false, 0.0), ("avocado", true, 0.4)]),
            entry("data/3.jpg", &[("tomato", true, 0.2), ("avocado", true, 0.99)]),
        ]
    }

    #[test]
    fn threshold_filters_and_ids_are_monotonic() {
        let dataset = build_coco_dataset(&avocado_log(), 0.9, |_| (640, 480));

        let names: Vec<(&str, u64)> = dataset
            .categories
            .iter()
            .map(|c| (c.name.as_str(), c.id))
            .collect();
        assert_eq!(names, vec![("avocado", 1), ("tomato", 2)]);

        let avocado: Vec<&CocoAnnotation> = dataset
            .annotations
            .iter()
            .filter(|a| a.category_id == 1)
            .collect();
        assert_eq!(avocado.len(), 2);
        assert_eq!(
            avocado.iter().map(|a| a.image_id).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let image_ids: Vec<u64> = dataset.images.iter().map(|i| i.id).collect();
        assert_eq!(image_ids, vec![1, 2, 3]);
        let annotation_ids: Vec<u64> = dataset.annotations.iter().map(|a| a.id).collect();
        assert_eq!(annotation_ids, vec![1, 2, 3]);

        let first = &dataset.annotations[0];
        assert_eq!(first.bbox, [0.0, 0.0, 640.0, 480.0]);
        assert_eq!(first.area, 640.0 * 480.0);
        assert_eq!(dataset.images[0].file_name, "1.jpg");
    }

    #[test]
    fn mapping_and_ordering_are_reproducible() {
        let a = build_coco_dataset(&avocado_log(), 0.5, |_| (10, 10));
        let b = build_coco_dataset(&avocado_log(), 0.5, |_| (10, 10));
        assert_eq!(a.categories, b.categories);
        assert_eq!(a.images, b.images);
        assert_eq!(a.annotations, b.annotations);
    }

    #[test]
    fn model_box_is_scaled_to_pixels() {
        let mut labels = AnnotationResult::new();
        labels.insert(
            "fish",
            ClassLabel {
                present: true,
                confidence: 0.9,
                bbox: Some([0.25, 0.5, 0.75, 1.0]),
            },
        );
        let entries = vec![LabelLogEntry {
            image: "data/f.jpg".into(),
            labels,
        }];
        let dataset = build_coco_dataset(&entries, 0.5, |_| (200, 100));
        assert_eq!(dataset.annotations[0].bbox, [50.0, 50.0, 100.0, 50.0]);
        assert_eq!(dataset.annotations[0].area, 5000.0);
        assert!(dataset.has_model_boxes());
    }

    #[test]
    fn export_writes_dataset_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("multilabel_datasets");
        let summary = export_coco(&avocado_log(), 0.9, &out, dir.path()).unwrap();

        assert_eq!(summary.total_images, 3);
        assert_eq!(summary.total_annotations, 3);
        assert_eq!(summary.classes, vec!["avocado", "tomato"]);
        assert_eq!(summary.bbox_type, "full_image_bbox");
        assert_eq!(summary.category_mapping["tomato"], 2);

        let written: CocoDataset =
            serde_json::from_slice(&std::fs::read(out.join(ANNOTATIONS_FILE)).unwrap()).unwrap();
        assert_eq!(written.images[0].width, FALLBACK_DIMENSIONS.0);
        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(report["confidence_threshold"], serde_json::json!(0.9));
    }
}
