use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::schema::AnnotationResult;

/// One line of the label log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelLogEntry {
    /// Image path relative to the output directory.
    pub image: String,
    pub labels: AnnotationResult,
}

/// Append-only, line-delimited label log.
///
/// Every append is flushed and synced before returning, so a crash after
/// `append` never loses an entry that was reported as written.
pub struct LabelLog {
    path: PathBuf,
    file: File,
    appended: u64,
}

impl LabelLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open label log {}", path.display()))?;
        Ok(Self {
            path,
            file,
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn append(&mut self, entry: &LabelLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.file.flush()?;
        self.file
            .sync_data()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        self.appended += 1;
        log::debug!("label log: appended {} ({})", entry.image, self.appended);
        Ok(())
    }
}

/// Read every entry of a label log in append order. Blank lines are skipped.
pub fn read_label_log(path: impl AsRef<Path>) -> Result<Vec<LabelLogEntry>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open label log {}", path.display()))?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            anyhow!(
                "invalid label log entry at {}:{}: {}",
                path.display(),
                index + 1,
                e
            )
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
