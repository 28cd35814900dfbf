//! Per-class binary classification datasets.
//!
//! Every frame lands in exactly one bucket per class: `present` when the
//! label is present with `confidence >= threshold`, `absent` otherwise
//! (including frames that have no label for the class). The balanced
//! variant truncates the larger bucket to the size of the smaller one,
//! keeping log order.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{class_union, sanitize_component, LabelLogEntry};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SUMMARY_FILE: &str = "_summary.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinaryBuckets {
    pub class: String,
    pub threshold: f64,
    pub present: Vec<String>,
    pub absent: Vec<String>,
}

impl BinaryBuckets {
    fn balanced(&self) -> Self {
        let size = self.present.len().min(self.absent.len());
        Self {
            class: self.class.clone(),
            threshold: self.threshold,
            present: self.present[..size].to_vec(),
            absent: self.absent[..size].to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryDataset {
    pub threshold: f64,
    pub balanced: bool,
    /// One entry per class, sorted by class name.
    pub classes: Vec<BinaryBuckets>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub present: usize,
    pub absent: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinarySummary {
    pub threshold: f64,
    pub balanced: bool,
    pub total_images: usize,
    pub classes: BTreeMap<String, BucketCounts>,
    /// Images that were referenced by the log but not found on disk.
    pub missing_images: usize,
}

/// Partition log entries into present/absent buckets for every class.
pub fn build_binary_dataset(entries: &[LabelLogEntry], threshold: f64) -> BinaryDataset {
    let classes = class_union(entries)
        .into_iter()
        .map(|class| {
            let mut present = Vec::new();
            let mut absent = Vec::new();
            for entry in entries {
                let is_present = entry
                    .labels
                    .get(&class)
                    .is_some_and(|label| label.present && label.confidence >= threshold);
                if is_present {
                    present.push(entry.image.clone());
                } else {
                    absent.push(entry.image.clone());
                }
            }
            BinaryBuckets {
                class,
                threshold,
                present,
                absent,
            }
        })
        .collect();
    BinaryDataset {
        threshold,
        balanced: false,
        classes,
    }
}

impl BinaryDataset {
    pub fn balanced(&self) -> Self {
        Self {
            threshold: self.threshold,
            balanced: true,
            classes: self.classes.iter().map(BinaryBuckets::balanced).collect(),
        }
    }

    pub fn get(&self, class: &str) -> Option<&BinaryBuckets> {
        self.classes.iter().find(|buckets| buckets.class == class)
    }

    /// Materialize as `<root>/<class>/{present,absent}/` folders.
    ///
    /// Images found under `image_root` are copied into their bucket; every
    /// class also gets a `manifest.json` listing both buckets. The tree is
    /// built in a staging directory and replaces any previous `root` whole.
    pub fn write(&self, root: &Path, image_root: &Path) -> Result<BinarySummary> {
        let staging = staging_dir(root)?;
        if staging.exists() {
            std::fs::remove_dir_all(&staging)
                .with_context(|| format!("failed to clear {}", staging.display()))?;
        }
        let summary = self.write_tree(&staging, image_root)?;
        if root.exists() {
            std::fs::remove_dir_all(root)
                .with_context(|| format!("failed to remove previous {}", root.display()))?;
        }
        std::fs::rename(&staging, root).with_context(|| {
            format!("failed to move {} to {}", staging.display(), root.display())
        })?;

        if summary.missing_images > 0 {
            log::warn!(
                "binary dataset {}: {} referenced images not found (manifests still list them)",
                root.display(),
                summary.missing_images
            );
        }
        log::info!(
            "binary dataset ({}): {} classes -> {}",
            if self.balanced { "balanced" } else { "full" },
            summary.classes.len(),
            root.display()
        );
        Ok(summary)
    }

    fn write_tree(&self, root: &Path, image_root: &Path) -> Result<BinarySummary> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let mut missing_images = 0;
        let mut counts = BTreeMap::new();
        for buckets in &self.classes {
            let class_dir = root.join(sanitize_component(&buckets.class));
            for (bucket, images) in [("present", &buckets.present), ("absent", &buckets.absent)] {
                let bucket_dir = class_dir.join(bucket);
                std::fs::create_dir_all(&bucket_dir)
                    .with_context(|| format!("failed to create {}", bucket_dir.display()))?;
                for image in images {
                    let source = image_root.join(image);
                    let Some(name) = source.file_name() else {
                        continue;
                    };
                    if !source.is_file() {
                        missing_images += 1;
                        continue;
                    }
                    let target = bucket_dir.join(name);
                    std::fs::copy(&source, &target).with_context(|| {
                        format!("failed to copy {} to {}", source.display(), target.display())
                    })?;
                }
            }

            let manifest = class_dir.join(MANIFEST_FILE);
            std::fs::write(&manifest, serde_json::to_vec_pretty(buckets)?)
                .with_context(|| format!("failed to write {}", manifest.display()))?;
            counts.insert(
                buckets.class.clone(),
                BucketCounts {
                    present: buckets.present.len(),
                    absent: buckets.absent.len(),
                },
            );
        }

        let summary = BinarySummary {
            threshold: self.threshold,
            balanced: self.balanced,
            total_images: self
                .classes
                .first()
                .map(|b| b.present.len() + b.absent.len())
                .unwrap_or(0),
            classes: counts,
            missing_images,
        };
        let summary_file = root.join(SUMMARY_FILE);
        std::fs::write(&summary_file, serde_json::to_vec_pretty(&summary)?)
            .with_context(|| format!("failed to write {}", summary_file.display()))?;
        Ok(summary)
    }
}

/// Sibling of `root` used while a dataset is being written.
fn staging_dir(root: &Path) -> Result<PathBuf> {
    let name = root
        .file_name()
        .with_context(|| format!("dataset root {} has no name", root.display()))?;
    let mut staging = OsString::from(".");
    staging.push(name);
    staging.push(".staging");
    Ok(root.with_file_name(staging))
}
