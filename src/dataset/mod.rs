//! Durable label log and the datasets derived from it.
//!
//! The label log (`labels.jsonl`) is append-only and is the single source of
//! truth. COCO, binary and balanced binary datasets are regenerated from it
//! and are never read back as state.

pub mod accumulator;
pub mod analyze;
pub mod binary;
pub mod coco;
pub mod label_log;
pub mod store;

pub use accumulator::{export_entries, DatasetAccumulator, ExportReport};
pub use analyze::{ConfidenceAnalyzer, ThresholdSuggestion};
pub use binary::{build_binary_dataset, BinaryBuckets, BinaryDataset, BinarySummary};
pub use coco::{build_coco_dataset, export_coco, CocoDataset, CocoSummary};
pub use label_log::{read_label_log, LabelLog, LabelLogEntry};
pub use store::FrameStore;

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// File name of the label log under the output directory.
pub const LABEL_LOG_FILE: &str = "labels.jsonl";
/// Subdirectory holding persisted frames.
pub const FRAMES_DIR: &str = "data";
pub const BINARY_DIR: &str = "binary_datasets";
pub const BALANCED_BINARY_DIR: &str = "binary_datasets_balanced";
pub const DETECTION_DIR: &str = "detection_datasets";
pub const MULTILABEL_DIR: &str = "multilabel_datasets";

/// Alphabetically sorted union of class names across the log.
pub fn class_union(entries: &[LabelLogEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| entry.labels.iter().map(|(name, _)| name.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Make a string safe to use as a single path component.
///
/// Names that had to be rewritten get a short hash of the original appended,
/// so distinct names never share a component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    };
    if cleaned == name {
        return cleaned;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}_{}", cleaned, &digest[..8])
}
