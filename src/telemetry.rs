//! Diagnostics for the sink itself
//!
//! Sets up a `tracing` subscriber for the binary. Events go to stderr and,
//! optionally, into a log stream so they are archived with everything else.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::stream::LogStream;
use crate::taint::Taint;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "taintlog=info";

/// Map a formatted tracing line to a taint by its level marker
fn taint_of_line(line: &str) -> Taint {
    if line.contains(" ERROR ") {
        Taint::Error
    } else if line.contains(" WARN ") {
        Taint::Warning
    } else if line.contains(" INFO ") {
        Taint::Info
    } else {
        Taint::Normal
    }
}

/// A writer turning each formatted event into one stream entry
pub struct StreamWriter {
    stream: Arc<LogStream>,
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let taint = std::str::from_utf8(buf)
            .map(taint_of_line)
            .unwrap_or(Taint::Normal);
        self.stream.append(taint, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer factory for tracing-subscriber
pub struct StreamMakeWriter {
    stream: Arc<LogStream>,
}

impl StreamMakeWriter {
    pub fn new(stream: Arc<LogStream>) -> Self {
        Self { stream }
    }
}

impl<'a> MakeWriter<'a> for StreamMakeWriter {
    type Writer = StreamWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StreamWriter {
            stream: Arc::clone(&self.stream),
        }
    }
}

/// Install the global subscriber
///
/// When `stream` is given, diagnostics are also recorded into it.
pub fn init_tracing(stream: Option<Arc<LogStream>>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);

    let stream_layer = stream.map(|stream| {
        tracing_subscriber::fmt::layer()
            .with_writer(StreamMakeWriter::new(stream))
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(stream_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
