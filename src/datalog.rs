//! Raw payload logging with size rotation
//!
//! When enabled, every byte sequence read during forwarding is turned
//! into records of the form `timestamp | endpoint | hex | text`. With a
//! delimiter configured, bytes accumulate per endpoint and one record is
//! emitted per completed segment; the trailing partial segment stays
//! buffered. The sink is a size-rotated file with a bounded number of
//! retained backups.

use crate::error::Result;
use bytes::BytesMut;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_BACKUPS: usize = 5;

/// Data logging configuration
#[derive(Debug, Clone)]
pub struct DataLogConfig {
    /// Log file path
    pub path: PathBuf,
    /// Segment delimiter; without one, every read is logged whole
    pub delimiter: Option<Vec<u8>>,
    /// Rotate when the active file would exceed this size
    pub max_bytes: u64,
    /// Number of rotated backups to retain
    pub max_backups: usize,
}

impl DataLogConfig {
    /// Create a config for the given file with default rotation bounds
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: None,
            max_bytes: DEFAULT_MAX_BYTES,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }

    /// Split records on the given delimiter
    #[must_use]
    pub fn delimiter(mut self, delimiter: &[u8]) -> Self {
        self.delimiter = Some(delimiter.to_vec());
        self
    }

    /// Override the rotation size
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Override the number of retained backups
    #[must_use]
    pub fn max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }
}

/// Writes per-endpoint payload records to the rotated sink
pub(crate) struct DataLogger {
    config: DataLogConfig,
    file: BufWriter<File>,
    written: u64,
}

impl DataLogger {
    pub fn open(mut config: DataLogConfig) -> Result<Self> {
        if config.delimiter.as_deref() == Some(&[]) {
            config.delimiter = None;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            config,
            file: BufWriter::new(file),
            written,
        })
    }

    /// Consume a chunk read from `endpoint`, accumulating into its
    /// pending buffer and emitting one record per completed segment.
    pub fn log_chunk(&mut self, endpoint: &str, pending: &mut BytesMut, chunk: &[u8]) {
        pending.extend_from_slice(chunk);
        match self.config.delimiter.clone() {
            Some(delimiter) => {
                while let Some(pos) = find(pending, &delimiter) {
                    let mut segment = pending.split_to(pos + delimiter.len());
                    segment.truncate(pos);
                    if let Err(e) = self.record(endpoint, &segment) {
                        tracing::warn!("data log write failed: {e}");
                    }
                }
            }
            None => {
                let whole = pending.split();
                if let Err(e) = self.record(endpoint, &whole) {
                    tracing::warn!("data log write failed: {e}");
                }
            }
        }
    }

    /// Write one record, rotating first if the size bound would be crossed.
    fn record(&mut self, endpoint: &str, payload: &[u8]) -> Result<()> {
        let line = format!(
            "{} | {} | {} | {:?}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            endpoint,
            hex::encode_upper(payload),
            String::from_utf8_lossy(payload),
        );
        if self.written + line.len() as u64 > self.config.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.written += line.len() as u64;
        Ok(())
    }

    /// Shift `path.1 -> path.2 -> ...` up to the backup bound, then
    /// truncate and reopen the active file.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;
        let path = self.config.path.clone();
        for index in (1..self.config.max_backups).rev() {
            let from = backup_path(&path, index);
            if from.exists() {
                let _ = std::fs::rename(&from, backup_path(&path, index + 1));
            }
        }
        if self.config.max_backups > 0 {
            let _ = std::fs::rename(&path, backup_path(&path, 1));
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        self.file = BufWriter::new(file);
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
