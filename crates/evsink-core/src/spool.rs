//! Local JSONL spool for envelopes the broker would not accept.

use crate::event::RetryEnvelope;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// One spooled envelope and where it was headed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpoolEntry {
    /// Topic the envelope should have been published to
    pub topic: String,
    /// The envelope exactly as it would have been published
    pub envelope: RetryEnvelope,
    /// When the publish failure was spooled
    pub spooled_at: DateTime<Utc>,
}

/// Append-only spool file, flushed per entry.
pub struct DeadLetterSpool {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl DeadLetterSpool {
    /// Open or create the spool file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), "Dead-letter spool opened");

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Location of the spool file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an envelope that could not be published to `topic`.
    pub fn append(&self, topic: &str, envelope: &RetryEnvelope) -> Result<()> {
        let entry = SpoolEntry {
            topic: topic.to_string(),
            envelope: envelope.clone(),
            spooled_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry)?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Read back every entry in a spool file.
    pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<SpoolEntry>> {
        let file = File::open(path.as_ref())?;
        BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| -> Result<SpoolEntry> {
                let line = line?;
                Ok(serde_json::from_str(&line)?)
            })
            .collect()
    }
}
