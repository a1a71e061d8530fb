//! Shared writers used for console echo and error reporting

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// A writer shared between the caller and any number of streams
///
/// Streams only write to it; closing it is the owner's business.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Wrap a writer so it can be attached to streams
pub fn shared<W: Write + Send + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(writer))
}

/// Write a whole buffer to a shared writer, recovering a poisoned lock
pub(crate) fn write_shared(writer: &SharedWriter, buf: &[u8]) -> io::Result<()> {
    let mut w = writer.lock().unwrap_or_else(PoisonError::into_inner);
    w.write_all(buf)?;
    w.flush()
}

/// Destination for records that could not go through the normal path
///
/// Defaults to the process stderr. Reporting never fails.
#[derive(Clone)]
pub struct ErrorSink {
    writer: SharedWriter,
}

impl ErrorSink {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }

    pub fn stderr() -> Self {
        Self::new(shared(io::stderr()))
    }

    /// Emit one report; errors writing the report itself are dropped
    pub fn report(&self, args: fmt::Arguments<'_>) {
        let _ = write_shared(&self.writer, fmt::format(args).as_bytes());
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

/// In-memory writer whose contents can be inspected while shared
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Contents decoded lossily as UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_error_sink_reports() {
        let mem = MemoryWriter::new();
        let sink = ErrorSink::new(shared(mem.clone()));
        sink.report(format_args!("log {}: failed\n", "x"));
        assert_eq!(mem.to_string_lossy(), "log x: failed\n");
    }

    #[test]
    fn test_error_sink_swallows_write_errors() {
        let sink = ErrorSink::new(shared(Broken));
        sink.report(format_args!("ignored"));
    }

    #[test]
    fn test_write_shared() {
        let mem = MemoryWriter::new();
        let writer = shared(mem.clone());
        write_shared(&writer, b"abc").unwrap();
        write_shared(&writer, b"def").unwrap();
        assert_eq!(mem.contents(), b"abcdef");
        assert!(write_shared(&shared(Broken), b"x").is_err());
    }
}
