//! Frame Annotator
//!
//! A pipeline stage that labels camera frames with a vision-language model and
//! accumulates the results into training datasets.
//!
//! # Architecture
//!
//! Each processing tick carries a batch of named frames (topic -> frame):
//!
//! 1. **Routing**: topics are retained or dropped (`topic_pattern`,
//!    `exclude_topics`); `main` can be forwarded untouched (`forward_main`).
//! 2. **Request building**: the frame is resized, encoded and paired with
//!    the prompt and the output schema.
//! 3. **Annotation**: one model call per frame. Any failure falls back to
//!    schema defaults; the frame is always forwarded.
//! 4. **Validation**: raw model output is normalized to exactly the schema's
//!    classes.
//! 5. **Accumulation**: every result is appended to the durable label log
//!    (`labels.jsonl`) before the frame is forwarded.
//!
//! Datasets (COCO, per-class binary, balanced binary) are compiled from the
//! label log on shutdown or offline by `build_datasets`.
//!
//! # Module Structure
//!
//! - `config`: options, environment resolution, validation
//! - `frame`: FrameImage, FrameRecord, FrameBatch
//! - `router`, `request`, `annotate`, `validate`: the per-frame path
//! - `dataset`: label log, frame store, dataset exports, threshold analysis
//! - `pipeline`: FrameAnnotator (setup/process/shutdown)
//! - `source`: local image sources for the driver binary

pub mod annotate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod request;
pub mod router;
pub mod schema;
pub mod source;
pub mod validate;

pub use annotate::{
    AnnotationBackend, AnnotationClient, AnnotationOutcome, NoOpsBackend, OpenAiBackend,
    OpenAiSettings, RawAnnotation, TokenUsage,
};
pub use config::{AnnotatorConfig, AnnotatorOptions};
pub use dataset::{
    ConfidenceAnalyzer, DatasetAccumulator, ExportReport, LabelLog, LabelLogEntry,
    ThresholdSuggestion,
};
pub use error::{AnnotationError, ConfigError};
pub use frame::{FrameBatch, FrameImage, FrameRecord, ANNOTATOR_META_KEY, MAIN_TOPIC};
pub use pipeline::{FrameAnnotator, PipelineStats};
pub use request::{AnnotationRequest, AnnotationRequestBuilder, PreprocessConfig};
pub use router::{FrameRouter, Route, RoutingConfig};
pub use schema::{AnnotationResult, ClassLabel, ClassTemplate, OutputSchema, TaskType};
pub use source::{ImageSource, SourceConfig};
pub use validate::{AnnotationValidator, Corrections};
