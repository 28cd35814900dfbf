//! Frame records and per-tick frame batches.
//!
//! - `FrameImage`: decoded pixels plus, when available, the original encoded bytes.
//! - `FrameRecord`: one frame with its metadata mapping (`meta.id` is the stable id).
//! - `FrameBatch`: topic name -> frame for one processing tick, in arrival order.
//!
//! Frames are transient: the upstream source creates them and the pipeline
//! forwards or drops them. Routing never mutates pixels.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Reserved topic that can be forwarded without annotation.
pub const MAIN_TOPIC: &str = "main";

/// Metadata key under `meta` where annotation output is attached.
pub const ANNOTATOR_META_KEY: &str = "chatgpt_annotator";

/// Number of hex characters used when the id is derived from pixel content.
const DERIVED_ID_LEN: usize = 16;

/// Original encoding of a frame that was decoded from a file or stream.
#[derive(Clone, Debug)]
pub struct EncodedSource {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

#[derive(Clone, Debug)]
pub struct FrameImage {
    pixels: DynamicImage,
    source: Option<EncodedSource>,
}

impl FrameImage {
    pub fn from_pixels(pixels: DynamicImage) -> Self {
        Self {
            pixels,
            source: None,
        }
    }

    /// Decode an encoded image, keeping the original bytes for verbatim reuse.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes).context("unrecognized image encoding")?;
        let pixels = image::load_from_memory_with_format(&bytes, format)
            .context("failed to decode image")?;
        Ok(Self {
            pixels,
            source: Some(EncodedSource { bytes, format }),
        })
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn source(&self) -> Option<&EncodedSource> {
        self.source.as_ref()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub image: FrameImage,
    pub data: Map<String, Value>,
}

impl FrameRecord {
    pub fn new(image: FrameImage, data: Map<String, Value>) -> Self {
        Self { image, data }
    }

    /// Frame with `meta.id` set to `id`.
    pub fn with_id(image: FrameImage, id: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("id".into(), Value::String(id.to_string()));
        let mut data = Map::new();
        data.insert("meta".into(), Value::Object(meta));
        Self { image, data }
    }

    /// Stable identifier used for derived file names.
    ///
    /// Read from `meta.id`; when missing, derived from the pixel content so the
    /// same frame always maps to the same name.
    pub fn stable_id(&self) -> String {
        let declared = self
            .data
            .get("meta")
            .and_then(|meta| meta.get("id"))
            .and_then(|id| match id {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        declared.unwrap_or_else(|| {
            let digest = Sha256::digest(self.image.pixels().as_bytes());
            let mut id = hex::encode(digest);
            id.truncate(DERIVED_ID_LEN);
            id
        })
    }

    /// Set `meta.<key>`, replacing a missing or non-object `meta` with an object.
    pub fn insert_meta(&mut self, key: &str, value: Value) {
        let entry = self
            .data
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(meta) = entry {
            meta.insert(key.to_string(), value);
        }
    }

    pub fn annotation_meta(&self) -> Option<&Value> {
        self.data
            .get("meta")
            .and_then(|meta| meta.get(ANNOTATOR_META_KEY))
    }
}

/// Frames for one processing tick, keyed by topic, in arrival order.
#[derive(Clone, Debug, Default)]
pub struct FrameBatch {
    frames: Vec<(String, FrameRecord)>,
}

impl FrameBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a frame. A repeated topic replaces the earlier frame in place.
    pub fn insert(&mut self, topic: impl Into<String>, frame: FrameRecord) {
        let topic = topic.into();
        match self.frames.iter_mut().find(|(existing, _)| *existing == topic) {
            Some((_, slot)) => *slot = frame,
            None => self.frames.push((topic, frame)),
        }
    }

    pub fn get(&self, topic: &str) -> Option<&FrameRecord> {
        self.frames
            .iter()
            .find(|(existing, _)| existing == topic)
            .map(|(_, frame)| frame)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.get(topic).is_some()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().map(|(topic, _)| topic.as_str())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrameRecord)> {
        self.frames.iter().map(|(topic, frame)| (topic.as_str(), frame))
    }
}

impl IntoIterator for FrameBatch {
    type Item = (String, FrameRecord);
    type IntoIter = std::vec::IntoIter<(String, FrameRecord)>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl FromIterator<(String, FrameRecord)> for FrameBatch {
    fn from_iter<I: IntoIterator<Item = (String, FrameRecord)>>(iter: I) -> Self {
        let mut batch = FrameBatch::new();
        for (topic, frame) in iter {
            batch.insert(topic, frame);
        }
        batch
    }
}
