//! Append-only JSONL event file.

use super::{EventStore, StoredEvent};
use crate::error::StoreError;
use crate::event::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes one [`StoredEvent`] per line, flushed on every insert.
pub struct JsonlEventStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlEventStore {
    /// Open or create the file, appending to existing content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                StoreError::Unavailable(format!(
                    "Failed to open store file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        info!(path = %path.display(), "Event store opened");

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn insert(&self, event: &Event) -> Result<String, StoreError> {
        let stored = StoredEvent::new(event.clone());
        let line = serde_json::to_string(&stored)
            .map_err(|e| StoreError::WriteRejected(e.to_string()))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(id = %stored.id, event_id = %stored.event.event_id, "Event persisted");
        Ok(stored.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    fn event(id: &str) -> Event {
        serde_json::from_value::<Event>(json!({
            "eventId": id,
            "eventType": "purchase",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": {"amount": 10}
        }))
        .unwrap()
    }

    fn read_lines(path: &Path) -> Vec<StoredEvent> {
        let file = File::open(path).unwrap();
        BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_insert_appends_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events").join("events.jsonl");
        let store = JsonlEventStore::open(&path).unwrap();

        let id = store.insert(&event("e1")).await.unwrap();
        store.insert(&event("e2")).await.unwrap();

        let lines = read_lines(store.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id, id);
        assert_eq!(lines[0].event.event_id, "e1");
        assert_eq!(lines[1].event.payload.get("amount"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");

        {
            let store = JsonlEventStore::open(&path).unwrap();
            store.insert(&event("e1")).await.unwrap();
        }
        let store = JsonlEventStore::open(&path).unwrap();
        store.insert(&event("e2")).await.unwrap();

        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn test_open_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = JsonlEventStore::open(temp_dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
