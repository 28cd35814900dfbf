use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;

use super::{sanitize_component, FRAMES_DIR};
use crate::frame::FrameImage;

/// Writes frames under `<root>/data/` at paths derived from their stable id.
pub struct FrameStore {
    root: PathBuf,
    image_quality: u8,
    preserve_original_format: bool,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>, image_quality: u8, preserve_original_format: bool) -> Self {
        Self {
            root: root.into(),
            image_quality,
            preserve_original_format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path, relative to the root, where the frame with `id` is stored.
    pub fn relative_path(&self, id: &str, image: &FrameImage) -> String {
        format!("{}/{}.{}", FRAMES_DIR, sanitize_component(id), self.extension(image))
    }

    fn extension(&self, image: &FrameImage) -> &'static str {
        match image.source() {
            Some(source) if self.preserve_original_format => source
                .format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or("jpg"),
            _ => "jpg",
        }
    }

    /// Persist a frame and return its relative path.
    pub fn save(&self, id: &str, image: &FrameImage) -> Result<String> {
        let relative = self.relative_path(id, image);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let bytes = match image.source() {
            Some(source) if self.preserve_original_format => source.bytes.clone(),
            _ => {
                let mut buf = Cursor::new(Vec::new());
                let quality = self.image_quality.clamp(1, 100);
                JpegEncoder::new_with_quality(&mut buf, quality)
                    .encode_image(&image.pixels().to_rgb8())
                    .context("failed to encode frame")?;
                buf.into_inner()
            }
        };
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write frame {}", path.display()))?;
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    #[test]
    fn saves_jpeg_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path(), 90, false);
        let image = FrameImage::from_pixels(DynamicImage::ImageRgb8(RgbImage::new(20, 10)));

        let relative = store.save("cam_0001", &image).unwrap();
        assert_eq!(relative, "data/cam_0001.jpg");
        let dims = image::image_dimensions(dir.path().join(&relative)).unwrap();
        assert_eq!(dims, (20, 10));
    }

    #[test]
    fn ids_differing_only_in_separators_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path(), 90, false);
        let image = FrameImage::from_pixels(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));

        let clean = store.save("cam_0001", &image).unwrap();
        let slashed = store.save("cam/0001", &image).unwrap();
        assert_ne!(clean, slashed);
        assert!(slashed.starts_with("data/cam_0001_"));
        assert!(dir.path().join(&clean).is_file());
        assert!(dir.path().join(&slashed).is_file());
    }

    #[test]
    fn preserves_source_bytes_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path(), 90, true);
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut encoded, ImageFormat::Png)
            .unwrap();
        let image = FrameImage::from_encoded(encoded.into_inner()).unwrap();

        let relative = store.save("f1", &image).unwrap();
        assert_eq!(relative, "data/f1.png");
        assert_eq!(
            std::fs::read(dir.path().join(&relative)).unwrap(),
            image.source().unwrap().bytes
        );
    }
}
