//! The frame annotation pipeline.
//!
//! `FrameAnnotator` owns one run: it routes each batch, annotates the frames
//! that need it (one model call each, sequentially), appends every result to
//! the label log before the frame is forwarded, and compiles the derived
//! datasets on shutdown.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::annotate::{
    AnnotationBackend, AnnotationClient, AnnotationOutcome, NoOpsBackend, OpenAiBackend,
    OpenAiSettings, TokenUsage,
};
use crate::config::{describe_excludes, AnnotatorConfig, AnnotatorOptions};
use crate::dataset::{DatasetAccumulator, ExportReport};
use crate::frame::{FrameBatch, FrameRecord, ANNOTATOR_META_KEY};
use crate::request::AnnotationRequestBuilder;
use crate::router::{FrameRouter, Route};
use crate::schema::{AnnotationResult, TaskType};
use crate::validate::{AnnotationValidator, Corrections};

/// Running totals for one pipeline instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches: u64,
    pub frames_annotated: u64,
    pub frames_passed_through: u64,
    pub fallbacks: u64,
    pub corrected_frames: u64,
    pub usage: TokenUsage,
}

pub struct FrameAnnotator {
    config: AnnotatorConfig,
    router: FrameRouter,
    builder: AnnotationRequestBuilder,
    client: AnnotationClient,
    validator: AnnotationValidator,
    accumulator: DatasetAccumulator,
    stats: PipelineStats,
}

impl FrameAnnotator {
    /// Resolve `options` against the environment and set up the pipeline.
    ///
    /// Configuration problems surface as `ConfigError` inside the returned error.
    pub fn setup(options: AnnotatorOptions) -> Result<Self> {
        let config = AnnotatorConfig::resolve(options)?;
        Self::from_config(config)
    }

    /// Set up with the backend selected by the config (no-ops or live).
    pub fn from_config(config: AnnotatorConfig) -> Result<Self> {
        let backend: Box<dyn AnnotationBackend> = if config.no_ops {
            Box::new(NoOpsBackend::new(&config.schema, config.model.clone()))
        } else {
            Box::new(OpenAiBackend::new(OpenAiSettings {
                api_url: config.api_url.clone(),
                api_key: config.api_key.clone(),
                model: config.model.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                timeout: config.timeout,
            }))
        };
        Self::with_backend(config, backend)
    }

    /// Set up with an explicit backend.
    pub fn with_backend(config: AnnotatorConfig, backend: Box<dyn AnnotationBackend>) -> Result<Self> {
        let accumulator = DatasetAccumulator::open(
            &config.output_dir,
            config.save_frames,
            config.preprocess.image_quality,
            config.preprocess.preserve_original_format,
        )
        .with_context(|| format!("failed to open output dir {}", config.output_dir.display()))?;
        let client = AnnotationClient::from_boxed(backend, &config.schema);
        let builder = AnnotationRequestBuilder::new(
            config.prompt.clone(),
            config.schema.clone(),
            config.preprocess,
        );
        let validator = AnnotationValidator::new(config.schema.clone());
        let router = FrameRouter::new(config.routing.clone());

        let routing = router.config();
        log::info!(
            "FrameAnnotator: backend={} model={} task_type={} classes=[{}]",
            client.backend_name(),
            client.model(),
            config.schema.task_type(),
            config.schema.class_names().collect::<Vec<_>>().join(", ")
        );
        log::info!(
            "FrameAnnotator: forward_main={} topic_pattern={} exclude_topics={} output_dir={} save_frames={}",
            routing.forward_main,
            routing
                .topic_pattern
                .as_ref()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
            describe_excludes(&routing.exclude_topics),
            config.output_dir.display(),
            config.save_frames
        );

        Ok(Self {
            config,
            router,
            builder,
            client,
            validator,
            accumulator,
            stats: PipelineStats::default(),
        })
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Process one tick's batch.
    ///
    /// Dropped topics are absent from the result; `main` comes first when
    /// present. Annotation failures never fail the batch: those frames get
    /// schema defaults and an error marker. Only label log I/O is an error.
    pub fn process(&mut self, batch: FrameBatch) -> Result<FrameBatch> {
        self.stats.batches += 1;
        let mut output = FrameBatch::new();
        for (topic, route) in self.router.route(batch) {
            match route {
                Route::PassThrough(frame) => {
                    self.stats.frames_passed_through += 1;
                    output.insert(topic, frame);
                }
                Route::Annotate(mut frame) => {
                    self.annotate_frame(&topic, &mut frame)?;
                    output.insert(topic, frame);
                }
            }
        }
        Ok(output)
    }

    fn annotate_frame(&mut self, topic: &str, frame: &mut FrameRecord) -> Result<()> {
        let outcome = match self.builder.build(&frame.image) {
            Ok(request) => self.client.annotate(&request),
            Err(err) => self.client.fallback(&err),
        };
        let (labels, corrections) = self.validator.validate_with_corrections(&outcome.raw);
        if corrections.total() > 0 {
            self.stats.corrected_frames += 1;
            log::debug!(
                "topic '{}': normalized response ({} missing, {} unknown, {} coerced)",
                topic,
                corrections.missing_classes,
                corrections.unknown_classes,
                corrections.coerced_values
            );
        }

        let id = frame.stable_id();
        let image = self
            .accumulator
            .record(&id, &frame.image, &labels)
            .with_context(|| format!("failed to record frame {}", id))?;
        log::debug!("topic '{}': appended {} to label log", topic, image);

        let meta = annotation_meta(
            &labels,
            &outcome,
            self.client.model(),
            self.builder.task_type(),
            corrections,
            &image,
        );
        frame.insert_meta(ANNOTATOR_META_KEY, meta);

        self.stats.frames_annotated += 1;
        if outcome.is_fallback() {
            self.stats.fallbacks += 1;
        }
        self.stats.usage.prompt_tokens += outcome.usage.prompt_tokens;
        self.stats.usage.completion_tokens += outcome.usage.completion_tokens;
        self.stats.usage.total_tokens += outcome.usage.total_tokens;
        Ok(())
    }

    /// Compile the label log into the derived datasets.
    ///
    /// Binary and balanced binary datasets are always written; the COCO
    /// dataset only for detection schemas. Returns `None` for an empty log.
    pub fn shutdown(&mut self) -> Result<Option<ExportReport>> {
        log::info!(
            "FrameAnnotator: shutting down after {} annotated frames ({} fallbacks, {} tokens)",
            self.stats.frames_annotated,
            self.stats.fallbacks,
            self.stats.usage.total_tokens
        );
        let detection = self.config.schema.task_type() == TaskType::Detection;
        let report = self
            .accumulator
            .export(self.config.confidence_threshold, detection)
            .context("dataset export failed")
            .inspect_err(|err| log::error!("{:#}", err))?;
        if let Some(report) = &report {
            log::info!(
                "exported {} log entries from {}",
                report.entries,
                self.accumulator.log_path().display()
            );
        }
        Ok(report)
    }
}

fn annotation_meta(
    labels: &AnnotationResult,
    outcome: &AnnotationOutcome,
    model: &str,
    task_type: TaskType,
    corrections: Corrections,
    image: &str,
) -> Value {
    let mut meta = json!({
        "annotations": labels,
        "usage": outcome.usage,
        "model": model,
        "task_type": task_type,
        "fallback": outcome.is_fallback(),
        "corrections": corrections.total(),
        "image": image,
    });
    if let (Some(error), Value::Object(map)) = (&outcome.error, &mut meta) {
        map.insert("error".to_string(), Value::String(error.clone()));
    }
    meta
}
