//! annotate - run the frame annotator over local images
//!
//! Frames come from an image file, a directory of images, or `stub://`
//! synthetic frames, one `main` batch per frame. Every frame is annotated,
//! logged to `<output_dir>/labels.jsonl`, and optionally echoed to stdout as
//! JSON lines. Ctrl-C stops between frames; datasets are exported on exit.
//!
//! Flags override the config file, which overrides `FILTER_*` variables.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use frame_annotator::{
    config::CONFIG_FILE_ENV, AnnotatorOptions, FrameAnnotator, ImageSource, SourceConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "annotate",
    about = "Annotate frames with a vision model and accumulate a label log"
)]
struct Args {
    /// Image file, directory of images, or stub://<name>
    source: String,

    /// Descend into subdirectories of a directory source
    #[arg(long)]
    recursive: bool,

    /// Stop after this many frames
    #[arg(long)]
    limit: Option<u64>,

    /// JSON config file (same keys as the options)
    #[arg(long, env = CONFIG_FILE_ENV, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model API key
    #[arg(long)]
    api_key: Option<String>,

    /// Prompt text file
    #[arg(long, value_name = "PATH")]
    prompt: Option<PathBuf>,

    /// Output schema as JSON text, e.g. '{"cat": {}, "dog": {"bbox": true}}'
    #[arg(long, value_name = "JSON")]
    schema: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Output directory for the label log, frames and datasets
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Confidence threshold for the shutdown export
    #[arg(long)]
    confidence_threshold: Option<f64>,

    /// Skip the model call and emit schema defaults
    #[arg(long)]
    no_ops: bool,

    /// Do not persist frames (labels are still logged)
    #[arg(long)]
    no_save_frames: bool,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print one JSON line per annotated frame to stdout
    #[arg(long)]
    emit: bool,

    /// Skip the dataset export on exit
    #[arg(long)]
    no_export: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, args.emit);

    let mut annotator = {
        let _stage = ui.stage("Set up annotator");
        FrameAnnotator::setup(options_from_args(&args)?)?
    };
    let mut source = ImageSource::new(SourceConfig {
        path: args.source.clone(),
        recursive: args.recursive,
        limit: args.limit,
    })?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let progress = ui.progress(args.limit, "frames");
    let mut stdout = std::io::stdout().lock();
    while running.load(Ordering::SeqCst) {
        let Some(batch) = source.next_batch() else {
            break;
        };
        let output = annotator.process(batch)?;
        if args.emit {
            for (topic, frame) in output.iter() {
                let line = json!({
                    "topic": topic,
                    "id": frame.stable_id(),
                    "annotation": frame.annotation_meta(),
                });
                writeln!(stdout, "{}", line)?;
            }
        }
        let fallbacks = annotator.stats().fallbacks;
        progress.advance((fallbacks > 0).then(|| format!("({fallbacks} fallbacks)")));
    }
    progress.finish();
    if !running.load(Ordering::SeqCst) {
        log::info!("interrupted, stopping after the current frame");
    }

    let stats = *annotator.stats();
    log::info!(
        "annotated {} frames ({} fallbacks, {} skipped inputs), {} tokens used",
        stats.frames_annotated,
        stats.fallbacks,
        source.stats().frames_skipped,
        stats.usage.total_tokens
    );

    if !args.no_export {
        let _stage = ui.stage("Export datasets");
        if let Some(report) = annotator.shutdown()? {
            eprintln!(
                "{} log entries -> {} classes (binary), balanced, {}",
                report.entries,
                report.binary.classes.len(),
                match &report.detection {
                    Some(coco) => format!("{} COCO annotations", coco.total_annotations),
                    None => "no COCO export (classification schema)".to_string(),
                }
            );
        }
    }
    Ok(())
}

fn options_from_args(args: &Args) -> Result<AnnotatorOptions> {
    let mut options = match &args.config {
        Some(path) => AnnotatorOptions::from_file(path)?,
        None => AnnotatorOptions::default(),
    };
    if let Some(schema) = &args.schema {
        options.output_schema =
            Some(serde_json::from_str(schema).context("--schema is not valid JSON")?);
    }
    override_with(&mut options.api_key, args.api_key.clone());
    override_with(&mut options.prompt, args.prompt.clone());
    override_with(&mut options.model, args.model.clone());
    override_with(&mut options.output_dir, args.output_dir.clone());
    override_with(&mut options.confidence_threshold, args.confidence_threshold);
    override_with(&mut options.timeout_secs, args.timeout_secs);
    if args.no_ops {
        options.no_ops = Some(true);
    }
    if args.no_save_frames {
        options.save_frames = Some(false);
    }
    Ok(options)
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
