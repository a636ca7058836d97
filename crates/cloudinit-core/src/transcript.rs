//! Per-operation transcript files.
//!
//! Each operation writes `logs/<prefix>-<YYYYMMDD-HHMMSS>.txt`. The same file
//! receives the raw output of every external command (through [`OutputSink`])
//! and the operation's tracing events (through [`TranscriptWriter`]).

use crate::error::{CoreError, Result};
use crate::layout::{ensure_dir, Layout};
use chrono::{DateTime, Local};
use cloudinit_machine::OutputSink;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

/// Timestamp format used in transcript file names.
pub const FILE_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

/// An open operation transcript.
pub struct Transcript {
    path: PathBuf,
    sink: OutputSink,
}

impl Transcript {
    /// Open a fresh transcript for `prefix` under the layout's `logs/`.
    pub fn open(layout: &Layout, prefix: &str) -> Result<Self> {
        Self::create(&layout.logs_dir(), prefix, Local::now())
    }

    /// Open `<dir>/<prefix>-<timestamp>.txt`, truncating any existing file.
    pub fn create(dir: &Path, prefix: &str, now: DateTime<Local>) -> Result<Self> {
        let prefix = if prefix.is_empty() { "log" } else { prefix };
        ensure_dir(dir)?;
        let path = dir.join(format!("{prefix}-{}.txt", now.format(FILE_TIMESTAMP)));
        let mut file = std::fs::File::create(&path)
            .map_err(|e| CoreError::io(format!("create {}", path.display()), e))?;
        writeln!(file, "{} starting {prefix} operation", now.format("%Y/%m/%d %H:%M:%S"))
            .map_err(|e| CoreError::io(format!("write {}", path.display()), e))?;
        let sink: OutputSink = Arc::new(Mutex::new(file));
        Ok(Self { path, sink })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duplicate-write target for command output.
    pub fn sink(&self) -> OutputSink {
        self.sink.clone()
    }

    /// Writer for a tracing-subscriber fmt layer.
    pub fn writer(&self) -> TranscriptWriter {
        TranscriptWriter {
            sink: self.sink.clone(),
        }
    }

    /// Flush buffered bytes to disk.
    pub fn flush(&self) -> Result<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .map_err(|e| CoreError::io(format!("flush {}", self.path.display()), e))
    }
}

/// Cloneable handle that appends to the transcript.
#[derive(Clone)]
pub struct TranscriptWriter {
    sink: OutputSink,
}

impl Write for TranscriptWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl<'a> MakeWriter<'a> for TranscriptWriter {
    type Writer = TranscriptWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
