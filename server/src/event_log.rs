//! Append-only progress log for long-running operations.
//!
//! Each line is one JSON-encoded [EventLogEntry].  A run starts by removing the previous log and ends by appending
//! the [EventLogEntry::terminator], so a reader polling the file knows a run is finished once it sees that entry.

use {
    anyhow::Result,
    lightbox_shared::{EventLogEntry, Step},
    std::{
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    tokio::{
        fs::{self, OpenOptions},
        io::AsyncWriteExt,
    },
    tracing::warn,
};

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove any entries left by a previous run.
    pub async fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Append one entry, creating the log if necessary.
    ///
    /// The entry is written with a single call so concurrent readers never observe half a line followed by
    /// another writer's data.
    pub async fn append(&self, subject: &str, step: Step, succeeded: bool) -> Result<()> {
        let mut line = serde_json::to_vec(&EventLogEntry {
            subject: subject.to_owned(),
            step,
            succeeded,
        })?;

        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }

    /// Like [EventLog::append], except that a failure to write is logged and otherwise ignored.
    pub async fn record(&self, subject: &str, step: Step, succeeded: bool) {
        if let Err(e) = self.append(subject, step, succeeded).await {
            warn!(
                "unable to log {} {} to {}: {:?}",
                step,
                subject,
                self.path.display(),
                e
            );
        }
    }

    /// Append the entry which marks the end of a run.
    pub async fn finish(&self) {
        let EventLogEntry {
            subject,
            step,
            succeeded,
        } = EventLogEntry::terminator();

        self.record(&subject, step, succeeded).await
    }
}

/// Read every well-formed entry of the log at `path`.
///
/// A missing log reads as empty.
pub async fn read_all(path: &Path) -> Result<Vec<EventLogEntry>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(parse(&bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parse raw log contents, skipping blank lines and lines which do not decode (e.g. a line still being written,
/// possibly cut off in the middle of a multi-byte character).
pub fn parse(bytes: &[u8]) -> Vec<EventLogEntry> {
    bytes
        .split(|&byte| byte == b'\n')
        .filter(|line| line.iter().any(|byte| !byte.is_ascii_whitespace()))
        .filter_map(|line| match serde_json::from_slice(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    "skipping malformed event log line {:?}: {}",
                    String::from_utf8_lossy(line),
                    e
                );
                None
            }
        })
        .collect()
}
