//! build_datasets - regenerate datasets from label logs
//!
//! For every output directory given, reads `labels.jsonl`, suggests a
//! confidence threshold from the logged confidences, and writes a COCO
//! dataset to `multilabel_datasets/` (plus per-class binary datasets with
//! `--binary`). Only the label log is read; the live pipeline is not needed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use frame_annotator::dataset::{
    build_binary_dataset, export_coco, read_label_log, ConfidenceAnalyzer, BALANCED_BINARY_DIR,
    BINARY_DIR, LABEL_LOG_FILE, MULTILABEL_DIR,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "build_datasets",
    about = "Build COCO and binary datasets from annotator label logs"
)]
struct Args {
    /// Output directories containing labels.jsonl
    #[arg(required = true, value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Confidence threshold (default: suggested from the log)
    #[arg(long, env = "FILTER_CONFIDENCE_THRESHOLD", value_name = "THRESHOLD")]
    confidence: Option<f64>,

    /// Also write binary and balanced binary datasets
    #[arg(long)]
    binary: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Some(threshold) = args.confidence {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--confidence must be within 0-1, got {}", threshold));
        }
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let progress = ui.progress(Some(args.dirs.len() as u64), "dirs");
    let mut failures = 0usize;
    for dir in &args.dirs {
        if let Err(err) = build_dir(&ui, dir, &args) {
            failures += 1;
            log::error!("{}: {:#}", dir.display(), err);
        }
        progress.advance(Some(dir.display().to_string()));
    }
    progress.finish();

    if failures > 0 {
        return Err(anyhow!("{} of {} directories failed", failures, args.dirs.len()));
    }
    Ok(())
}

fn build_dir(ui: &ui::Ui, dir: &Path, args: &Args) -> Result<()> {
    let log_path = dir.join(LABEL_LOG_FILE);
    if !log_path.is_file() {
        return Err(anyhow!("label log not found: {}", log_path.display()));
    }
    let entries = {
        let _stage = ui.stage(&format!("Read {}", log_path.display()));
        read_label_log(&log_path)?
    };
    if entries.is_empty() {
        log::warn!("{} is empty, nothing to build", log_path.display());
        return Ok(());
    }

    let suggestion = ConfidenceAnalyzer::new().analyze(&entries);
    log::info!("{}: {}", dir.display(), suggestion.summary);
    let threshold = args.confidence.unwrap_or(suggestion.threshold);
    println!(
        "{}: {} entries, threshold {} ({})",
        dir.display(),
        entries.len(),
        threshold,
        if args.confidence.is_some() { "given" } else { "suggested" }
    );

    let summary = {
        let _stage = ui.stage("Write COCO dataset");
        export_coco(&entries, threshold, &dir.join(MULTILABEL_DIR), dir)?
    };
    println!(
        "  COCO: {} images, {} annotations, {} classes -> {}",
        summary.total_images,
        summary.total_annotations,
        summary.total_classes,
        summary.output_directory.display()
    );

    if args.binary {
        let _stage = ui.stage("Write binary datasets");
        let dataset = build_binary_dataset(&entries, threshold);
        for (root, dataset) in [
            (dir.join(BINARY_DIR), dataset.clone()),
            (dir.join(BALANCED_BINARY_DIR), dataset.balanced()),
        ] {
            let summary = dataset.write(&root, dir)?;
            for (class, counts) in &summary.classes {
                println!(
                    "  {} {}: {} present / {} absent",
                    if summary.balanced { "balanced" } else { "binary" },
                    class,
                    counts.present,
                    counts.absent
                );
            }
        }
    }
    Ok(())
}
