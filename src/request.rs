//! Annotation request construction.
//!
//! A request carries the frame as a `data:` URL, the prompt text followed by a
//! description of the expected response shape, and the inferred task type.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;

use crate::error::AnnotationError;
use crate::frame::FrameImage;
use crate::schema::{OutputSchema, TaskType};

const DEFAULT_MAX_IMAGE_SIZE: u32 = 512;
const DEFAULT_IMAGE_QUALITY: u8 = 85;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Longest edge bound in pixels. 0 disables resizing.
    pub max_image_size: u32,
    /// JPEG quality factor, 0-100.
    pub image_quality: u8,
    /// Send the source encoding verbatim when the frame needs no resize.
    pub preserve_original_format: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            image_quality: DEFAULT_IMAGE_QUALITY,
            preserve_original_format: false,
        }
    }
}

/// Request payload for one frame.
#[derive(Clone, Debug)]
pub struct AnnotationRequest {
    pub prompt: String,
    pub schema: Value,
    pub task_type: TaskType,
    pub image_mime: &'static str,
    pub image_base64: String,
    pub width: u32,
    pub height: u32,
}

impl AnnotationRequest {
    pub fn image_data_url(&self) -> String {
        format!("data:{};base64,{}", self.image_mime, self.image_base64)
    }
}

pub struct AnnotationRequestBuilder {
    prompt: String,
    schema: OutputSchema,
    preprocess: PreprocessConfig,
}

impl AnnotationRequestBuilder {
    pub fn new(prompt: String, schema: OutputSchema, preprocess: PreprocessConfig) -> Self {
        Self {
            prompt,
            schema,
            preprocess,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.schema.task_type()
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn build(&self, image: &FrameImage) -> Result<AnnotationRequest, AnnotationError> {
        let (bytes, mime, width, height) = self.encode(image)?;
        Ok(AnnotationRequest {
            prompt: self.full_prompt(),
            schema: self.schema.describe(),
            task_type: self.task_type(),
            image_mime: mime,
            image_base64: STANDARD.encode(bytes),
            width,
            height,
        })
    }

    fn full_prompt(&self) -> String {
        let mut prompt = self.prompt.trim_end().to_string();
        prompt.push_str("\n\nRespond only with a JSON object of exactly this shape:\n");
        prompt.push_str(&self.schema.describe().to_string());
        match self.task_type() {
            TaskType::Detection => prompt.push_str(
                "\nFor classes with a \"bbox\" key, bbox is [x_min, y_min, x_max, y_max] \
                 normalized to [0, 1], or null when the class is not present.",
            ),
            TaskType::Classification => prompt.push_str(
                "\nSet \"present\" to whether the class is visible and \"confidence\" in [0, 1].",
            ),
        }
        prompt
    }

    fn encode(
        &self,
        image: &FrameImage,
    ) -> Result<(Vec<u8>, &'static str, u32, u32), AnnotationError> {
        let pixels = image.pixels();
        let needs_resize = self.preprocess.max_image_size > 0
            && pixels.width().max(pixels.height()) > self.preprocess.max_image_size;

        if self.preprocess.preserve_original_format && !needs_resize {
            if let Some(source) = image.source() {
                if let Some(mime) = mime_for(source.format) {
                    return Ok((source.bytes.clone(), mime, pixels.width(), pixels.height()));
                }
            }
        }

        let resized;
        let target: &DynamicImage = if needs_resize {
            let bound = self.preprocess.max_image_size;
            resized = pixels.resize(bound, bound, FilterType::Triangle);
            &resized
        } else {
            pixels
        };

        let rgb = target.to_rgb8();
        let mut buf = Cursor::new(Vec::new());
        let quality = self.preprocess.image_quality.clamp(1, 100);
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
        Ok((buf.into_inner(), "image/jpeg", rgb.width(), rgb.height()))
    }
}

fn mime_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}
