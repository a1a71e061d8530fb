//! Named log streams
//!
//! A stream buffers entries in memory until file output is enabled, then
//! frames each entry into `<log_dir>/<name>.log`. The file is rotated when
//! an entry falls into a different hour than the one the file was opened
//! for; the closed file is handed to the [`Archiver`].
//!
//! Every operation on a stream holds its lock for the whole call, including
//! console echo, rotation and the file write, so entries land in call order
//! and frames never interleave. Storage failures never reach the caller: the
//! entry is rendered to the [`ErrorSink`] instead.

mod pending;
mod sink;

pub use pending::PendingBuffer;
pub use sink::{shared, ErrorSink, MemoryWriter, SharedWriter};

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, DurationRound, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::Archiver;
use crate::entry::{Entry, FrameError};
use crate::taint::Taint;

use sink::write_shared;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write entry: {0}")]
    Write(#[from] FrameError),
}

/// Mutable part of a stream, guarded by the stream lock
struct StreamState {
    file_output: bool,
    pending: PendingBuffer,
    output: Option<File>,
    bucket: Option<DateTime<Utc>>,
    console: Option<SharedWriter>,
}

/// One named append-only log target
pub struct LogStream {
    name: String,
    live_path: PathBuf,
    archiver: Archiver,
    errors: ErrorSink,
    state: Mutex<StreamState>,
}

impl LogStream {
    /// Create a stream writing to `live_path`
    ///
    /// `max_pending` bounds the in-memory buffer (`None` for unbounded).
    pub fn new(
        name: impl Into<String>,
        live_path: PathBuf,
        archiver: Archiver,
        errors: ErrorSink,
        max_pending: Option<usize>,
        file_output: bool,
    ) -> Self {
        Self {
            name: name.into(),
            live_path,
            archiver,
            errors,
            state: Mutex::new(StreamState {
                file_output,
                pending: PendingBuffer::new(max_pending),
                output: None,
                bucket: None,
                console: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the file currently receiving entries
    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn is_file_output_enabled(&self) -> bool {
        self.lock().file_output
    }

    /// Number of entries waiting for file output
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Hour bucket the live file belongs to, if one was opened
    pub fn current_bucket(&self) -> Option<DateTime<Utc>> {
        self.lock().bucket
    }

    /// Attach or detach the console echo writer
    pub fn set_console(&self, console: Option<SharedWriter>) {
        self.lock().console = console;
    }

    /// Record `payload` with the current time
    pub fn append(&self, taint: Taint, payload: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        // stamped under the lock so timestamps follow write order
        let entry = Entry::new(taint, payload);
        self.record(&mut state, entry);
    }

    /// Record a pre-built entry, keeping its timestamp
    pub fn write_entry(&self, entry: Entry) {
        let mut state = self.lock();
        self.record(&mut state, entry);
    }

    /// Record formatted text as a `Normal` entry
    pub fn print(&self, args: fmt::Arguments<'_>) {
        self.append(Taint::Normal, fmt::format(args));
    }

    /// Record formatted text with a taint
    pub fn taint(&self, taint: Taint, args: fmt::Arguments<'_>) {
        self.append(taint, fmt::format(args));
    }

    /// Copy `reader` line by line as `Normal` entries until EOF
    ///
    /// A read error is reported to the error sink and ends the copy.
    pub fn stream_lines<R: Read>(&self, reader: R) {
        let mut input = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match input.read_until(b'\n', &mut line) {
                Ok(0) => return,
                Ok(_) => self.append(Taint::Normal, line),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.errors.report(format_args!(
                        "log {}: read lines failed: {}\n",
                        self.name, e
                    ));
                    return;
                }
            }
        }
    }

    /// Flush pending entries to the file and switch to file output
    pub fn enable_file_output(&self) {
        let mut state = self.lock();

        let dropped = state.pending.take_dropped();
        let pending = state.pending.drain();
        let flushed = pending.len();
        for entry in pending {
            if let Err(e) = self.write_to_file(&mut state, &entry) {
                self.emergency(&entry, &e);
            }
        }
        state.file_output = true;
        drop(state);

        // diagnostics may be routed back into a stream, so never emit them under the lock
        if dropped > 0 {
            warn!(stream = %self.name, dropped, "Pending buffer overflowed before file output was enabled");
        }
        debug!(stream = %self.name, flushed, "File output enabled");
    }

    /// Close the live file and go back to buffering in memory
    pub fn disable_file_output(&self) {
        {
            let mut state = self.lock();
            state.output = None;
            state.file_output = false;
        }
        debug!(stream = %self.name, "File output disabled");
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, state: &mut StreamState, entry: Entry) {
        if let Some(console) = &state.console {
            let _ = write_shared(console, &entry.render_colored());
        }

        if !state.file_output {
            state.pending.push(entry);
            return;
        }

        if let Err(e) = self.write_to_file(state, &entry) {
            self.emergency(&entry, &e);
        }
    }

    fn write_to_file(&self, state: &mut StreamState, entry: &Entry) -> Result<(), StreamError> {
        // an entry that cannot be framed must not move the stream to another bucket
        let frame = entry.encode()?;
        let bucket = hour_bucket(entry.timestamp).ok_or(FrameError::TimestampOutOfRange)?;

        if state.bucket != Some(bucket) {
            state.output = None;
            if let Some(previous) = state.bucket.take() {
                if let Err(e) = self.archiver.rotate(&self.live_path, &self.name, previous) {
                    self.errors
                        .report(format_args!("log {}: failed to archive: {}\n", self.name, e));
                }
            }
        }

        if state.output.is_none() {
            let file = open_live(&self.live_path).map_err(|source| StreamError::Open {
                path: self.live_path.clone(),
                source,
            })?;
            state.output = Some(file);
            state.bucket = Some(bucket);
        }

        if let Some(output) = state.output.as_mut() {
            output.write_all(&frame).map_err(FrameError::Io)?;
        }
        Ok(())
    }

    fn emergency(&self, entry: &Entry, err: &StreamError) {
        self.errors.report(format_args!(
            "log {}: failed to write entry: {}\n  -> lost entry: {}",
            self.name,
            err,
            entry.render_plain()
        ));
    }
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("name", &self.name)
            .field("live_path", &self.live_path)
            .finish_non_exhaustive()
    }
}

/// Every write is one `Normal` entry; writes never fail
impl Write for &LogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(Taint::Normal, buf);
        Ok(buf.len())
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.print(args);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Start of the hour containing `timestamp`
///
/// `None` when the timestamp is outside the nanosecond range.
pub fn hour_bucket(timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
    timestamp.duration_trunc(chrono::Duration::hours(1)).ok()
}

fn open_live(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    options.open(path)
}
