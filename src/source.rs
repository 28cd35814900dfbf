//! Local image frame sources.
//!
//! `ImageSource` yields frames on the `main` topic from:
//! - a single image file
//! - a directory of images (sorted by path, optionally recursive)
//! - `stub://<name>`: synthetic gradient frames, for tests and dry runs
//!
//! Only local paths are accepted; any other URL scheme is rejected.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, Rgb, RgbImage};

use crate::frame::{FrameBatch, FrameImage, FrameRecord, MAIN_TOPIC};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 10;

#[derive(Clone, Debug, Default)]
pub struct SourceConfig {
    /// File, directory or `stub://` path.
    pub path: String,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Stop after this many frames.
    pub limit: Option<u64>,
}

/// Statistics for a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_emitted: u64,
    pub frames_skipped: u64,
}

pub struct ImageSource {
    backend: SourceBackend,
    limit: Option<u64>,
    stats: SourceStats,
}

enum SourceBackend {
    Files(FileList),
    Synthetic(SyntheticSource),
}

impl ImageSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let path = config.path.trim();
        if path.is_empty() {
            return Err(anyhow!("source path is empty"));
        }
        let backend = if let Some(name) = path.strip_prefix("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(name))
        } else if path.contains("://") {
            return Err(anyhow!(
                "only local paths and stub:// are supported, got {}",
                path
            ));
        } else {
            SourceBackend::Files(FileList::open(Path::new(path), config.recursive)?)
        };
        // Synthetic frames never run out, so they always get a bound.
        let limit = match (&backend, config.limit) {
            (SourceBackend::Synthetic(_), None) => Some(DEFAULT_SYNTHETIC_FRAMES),
            (_, limit) => limit,
        };
        log::info!("ImageSource: opened {} (limit {:?})", path, limit);
        Ok(Self {
            backend,
            limit,
            stats: SourceStats::default(),
        })
    }

    /// Next frame, or `None` once the source is exhausted.
    ///
    /// Files that cannot be decoded are logged and skipped.
    pub fn next_frame(&mut self) -> Option<FrameRecord> {
        if self
            .limit
            .is_some_and(|limit| self.stats.frames_emitted >= limit)
        {
            return None;
        }
        let frame = match &mut self.backend {
            SourceBackend::Synthetic(source) => Some(source.next_frame()),
            SourceBackend::Files(files) => loop {
                let (id, path) = files.next()?;
                match read_frame(&path) {
                    Ok(image) => break Some(FrameRecord::with_id(image, &id)),
                    Err(err) => {
                        self.stats.frames_skipped += 1;
                        log::warn!("skipping {}: {:#}", path.display(), err);
                    }
                }
            },
        }?;
        self.stats.frames_emitted += 1;
        Some(frame)
    }

    /// Next frame wrapped as a single-topic batch on `main`.
    pub fn next_batch(&mut self) -> Option<FrameBatch> {
        let frame = self.next_frame()?;
        let mut batch = FrameBatch::new();
        batch.insert(MAIN_TOPIC, frame);
        Some(batch)
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }
}

fn read_frame(path: &Path) -> Result<FrameImage> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    FrameImage::from_encoded(bytes)
}

struct FileList {
    root: PathBuf,
    files: std::vec::IntoIter<PathBuf>,
}

impl FileList {
    fn open(path: &Path, recursive: bool) -> Result<Self> {
        if path.is_file() {
            let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok(Self {
                root,
                files: vec![path.to_path_buf()].into_iter(),
            });
        }
        if !path.is_dir() {
            return Err(anyhow!("source path not found: {}", path.display()));
        }
        let mut files = Vec::new();
        collect_images(path, recursive, &mut files)?;
        files.sort();
        if files.is_empty() {
            log::warn!("no images found under {}", path.display());
        }
        Ok(Self {
            root: path.to_path_buf(),
            files: files.into_iter(),
        })
    }

    /// Next `(frame id, path)`. The id is the path relative to the root,
    /// without extension, with separators flattened to `_`.
    fn next(&mut self) -> Option<(String, PathBuf)> {
        let path = self.files.next()?;
        let relative = path.strip_prefix(&self.root).unwrap_or(&path);
        let id = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("_");
        Some((id, path))
    }
}

fn collect_images(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_images(&path, recursive, out)?;
            }
        } else if is_image_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

struct SyntheticSource {
    name: String,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(name: &str) -> Self {
        Self {
            name: if name.is_empty() { "stub".to_string() } else { name.to_string() },
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> FrameRecord {
        self.frame_count += 1;
        let shift = self.frame_count;
        let pixels = RgbImage::from_fn(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, |x, y| {
            let v = ((u64::from(x) + u64::from(y) + shift) % 256) as u8;
            Rgb([v, v.wrapping_mul(3), 255 - v])
        });
        let id = format!("{}_{:06}", self.name, self.frame_count);
        FrameRecord::with_id(FrameImage::from_pixels(DynamicImage::ImageRgb8(pixels)), &id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn write_png(path: &Path) {
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn rejects_remote_urls() {
        let err = ImageSource::new(SourceConfig {
            path: "http://camera/stream.jpg".into(),
            ..SourceConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("only local paths"));
    }

    #[test]
    fn synthetic_source_is_bounded_and_named() {
        let mut source = ImageSource::new(SourceConfig {
            path: "stub://cam".into(),
            limit: Some(3),
            ..SourceConfig::default()
        })
        .unwrap();
        let first = source.next_batch().unwrap();
        assert_eq!(first.get(MAIN_TOPIC).unwrap().stable_id(), "cam_000001");
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());
        assert_eq!(source.stats().frames_emitted, 3);
    }

    #[test]
    fn directory_source_is_sorted_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"));
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("c.jpg"), b"not an image").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_png(&dir.path().join("nested/d.png"));

        let mut source = ImageSource::new(SourceConfig {
            path: dir.path().display().to_string(),
            ..SourceConfig::default()
        })
        .unwrap();
        let ids: Vec<String> = std::iter::from_fn(|| source.next_frame())
            .map(|frame| frame.stable_id())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(source.stats().frames_skipped, 1);

        let mut recursive = ImageSource::new(SourceConfig {
            path: dir.path().display().to_string(),
            recursive: true,
            ..SourceConfig::default()
        })
        .unwrap();
        let ids: Vec<String> = std::iter::from_fn(|| recursive.next_frame())
            .map(|frame| frame.stable_id())
            .collect();
        assert_eq!(ids, vec!["a", "b", "nested_d"]);
    }
}
