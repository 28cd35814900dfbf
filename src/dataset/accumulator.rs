use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::binary::{build_binary_dataset, BinarySummary};
use super::coco::{export_coco, CocoSummary};
use super::label_log::{read_label_log, LabelLog, LabelLogEntry};
use super::store::FrameStore;
use super::{BALANCED_BINARY_DIR, BINARY_DIR, DETECTION_DIR, LABEL_LOG_FILE};
use crate::frame::FrameImage;
use crate::schema::AnnotationResult;

/// Datasets written by `DatasetAccumulator::export`.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub entries: usize,
    pub binary: BinarySummary,
    pub balanced: BinarySummary,
    pub detection: Option<CocoSummary>,
}

/// Persists per-frame labels (and optionally frames) under one output directory.
pub struct DatasetAccumulator {
    output_dir: PathBuf,
    log: LabelLog,
    store: FrameStore,
    save_frames: bool,
}

impl DatasetAccumulator {
    pub fn open(
        output_dir: impl Into<PathBuf>,
        save_frames: bool,
        image_quality: u8,
        preserve_original_format: bool,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        let log = LabelLog::open(output_dir.join(LABEL_LOG_FILE))?;
        let store = FrameStore::new(&output_dir, image_quality, preserve_original_format);
        Ok(Self {
            output_dir,
            log,
            store,
            save_frames,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Entries appended during this run.
    pub fn appended(&self) -> u64 {
        self.log.appended()
    }

    /// Persist the frame (when enabled) and append its labels to the log.
    ///
    /// The image path is derived from `id` whether or not the frame is saved.
    /// Returns the relative image path recorded in the log.
    pub fn record(&mut self, id: &str, image: &FrameImage, labels: &AnnotationResult) -> Result<String> {
        let relative = if self.save_frames {
            self.store.save(id, image)?
        } else {
            self.store.relative_path(id, image)
        };
        self.log.append(&LabelLogEntry {
            image: relative.clone(),
            labels: labels.clone(),
        })?;
        Ok(relative)
    }

    /// Compile the whole log into binary, balanced and (optionally) COCO datasets.
    ///
    /// Returns `None` for an empty log. Never modifies the log.
    pub fn export(&self, threshold: f64, detection: bool) -> Result<Option<ExportReport>> {
        let entries = read_label_log(self.log.path())?;
        export_entries(&entries, threshold, detection, &self.output_dir)
    }
}

/// Write every derived dataset for `entries` under `output_dir`.
pub fn export_entries(
    entries: &[LabelLogEntry],
    threshold: f64,
    detection: bool,
    output_dir: &Path,
) -> Result<Option<ExportReport>> {
    if entries.is_empty() {
        log::info!("label log is empty, no datasets generated");
        return Ok(None);
    }
    let dataset = build_binary_dataset(entries, threshold);
    let binary = dataset.write(&output_dir.join(BINARY_DIR), output_dir)?;
    let balanced = dataset
        .balanced()
        .write(&output_dir.join(BALANCED_BINARY_DIR), output_dir)?;
    let detection = if detection {
        Some(export_coco(
            entries,
            threshold,
            &output_dir.join(DETECTION_DIR),
            output_dir,
        )?)
    } else {
        None
    };
    Ok(Some(ExportReport {
        entries: entries.len(),
        binary,
        balanced,
        detection,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassLabel;
    use image::{DynamicImage, RgbImage};

    fn labels(present: bool, confidence: f64) -> AnnotationResult {
        let mut labels = AnnotationResult::new();
        labels.insert(
            "avocado",
            ClassLabel {
                present,
                confidence,
                bbox: None,
            },
        );
        labels
    }

    fn image() -> FrameImage {
        FrameImage::from_pixels(DynamicImage::ImageRgb8(RgbImage::new(32, 24)))
    }

    #[test]
    fn records_path_even_without_saving_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = DatasetAccumulator::open(dir.path(), false, 90, false).unwrap();
        let path = acc.record("f1", &image(), &labels(true, 0.9)).unwrap();
        assert_eq!(path, "data/f1.jpg");
        assert!(!dir.path().join(&path).exists());

        let entries = read_label_log(acc.log_path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].image, "data/f1.jpg");
    }

    #[test]
    fn export_writes_all_dataset_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = DatasetAccumulator::open(dir.path(), true, 90, false).unwrap();
        acc.record("f1", &image(), &labels(true, 0.95)).unwrap();
        acc.record("f2", &image(), &labels(false, 0.0)).unwrap();
        acc.record("f3", &image(), &labels(false, 0.0)).unwrap();

        let report = acc.export(0.9, true).unwrap().unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.binary.classes["avocado"].absent, 2);
        assert_eq!(report.balanced.classes["avocado"].absent, 1);
        let coco = report.detection.unwrap();
        assert_eq!(coco.total_annotations, 1);

        let written: crate::dataset::CocoDataset = serde_json::from_slice(
            &std::fs::read(dir.path().join("detection_datasets/annotations.json")).unwrap(),
        )
        .unwrap();
        assert_eq!((written.images[0].width, written.images[0].height), (32, 24));
        assert!(dir
            .path()
            .join("binary_datasets_balanced/avocado/present/f1.jpg")
            .is_file());
    }

    #[test]
    fn empty_log_exports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let acc = DatasetAccumulator::open(dir.path(), false, 90, false).unwrap();
        assert!(acc.export(0.5, true).unwrap().is_none());
        assert!(!dir.path().join("binary_datasets").exists());
    }
}
