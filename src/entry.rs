//! Log entries and their on-disk frame
//!
//! Each entry is written as a self-delimiting frame:
//!
//! ```text
//! base32(flags:1 | taint:1 | length:3 BE | timestamp_nanos:8 BE) ++ payload ++ ['\n']
//! ```
//!
//! The header is base32 encoded so a log file stays readable in a pager. The
//! payload is written verbatim. When the payload does not end with a newline
//! one is appended and `FORCED_NEWLINE` is set; it is stripped again on decode.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use chrono::{DateTime, Local, TimeZone, Utc};
use data_encoding::BASE32;
use thiserror::Error;

use crate::archive::ARCHIVE_EXTENSION;
use crate::color::{self, Color};
use crate::taint::Taint;

/// Flag bit: a trailing '\n' was added after the payload
pub const FORCED_NEWLINE: u8 = 0x01;

/// Size of the binary header before encoding
pub const RAW_HEADER_LEN: usize = 1 + 1 + 3 + 8;

/// Size of the base32-encoded header as found on disk
pub const HEADER_LEN: usize = 24;

/// Largest payload representable in the 24-bit length field
pub const MAX_PAYLOAD_LEN: usize = (1 << 24) - 1;

/// Timestamp format used for human-readable renderings
const DISPLAY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("frame flagged with a forced newline but payload is not followed by one")]
    MissingNewline,

    #[error("payload too large: {0} bytes (max {max})", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),

    #[error("timestamp out of range for nanosecond encoding")]
    TimestampOutOfRange,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// When the entry was recorded (nanosecond precision is preserved on disk)
    pub timestamp: DateTime<Utc>,
    /// Severity tag
    pub taint: Taint,
    /// Raw payload, not required to be UTF-8
    pub payload: Vec<u8>,
}

impl Entry {
    /// Create an entry stamped with the current time
    pub fn new(taint: Taint, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_timestamp(Utc::now(), taint, payload)
    }

    /// Create an entry with an explicit timestamp
    pub fn with_timestamp(
        timestamp: DateTime<Utc>,
        taint: Taint,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            timestamp,
            taint,
            payload: payload.into(),
        }
    }

    /// Whether a newline must be appended to terminate the payload
    pub fn needs_newline(&self) -> bool {
        self.payload.last() != Some(&b'\n')
    }

    /// Encode this entry into a complete frame
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(len));
        }
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .ok_or(FrameError::TimestampOutOfRange)?;

        let append_nl = self.needs_newline();
        let flags = if append_nl { FORCED_NEWLINE } else { 0 };

        let mut header = [0u8; RAW_HEADER_LEN];
        header[0] = flags;
        header[1] = self.taint.as_byte();
        header[2..5].copy_from_slice(&(len as u32).to_be_bytes()[1..]);
        header[5..13].copy_from_slice(&nanos.to_be_bytes());

        let mut frame = Vec::with_capacity(HEADER_LEN + len + 1);
        frame.extend_from_slice(BASE32.encode(&header).as_bytes());
        frame.extend_from_slice(&self.payload);
        if append_nl {
            frame.push(b'\n');
        }
        Ok(frame)
    }

    /// Write this entry as one frame with a single `write_all`
    ///
    /// Returns the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, FrameError> {
        let frame = self.encode()?;
        w.write_all(&frame)?;
        Ok(frame.len())
    }

    /// Read exactly one frame from `r`
    ///
    /// An empty reader is reported as a truncated header.
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, FrameError> {
        read_next(r)?.ok_or(FrameError::Truncated {
            expected: HEADER_LEN,
            got: 0,
        })
    }

    /// Plain rendering: `2006/01/02 15:04:05.000 [ERROR] payload`
    pub fn render_plain(&self) -> String {
        let mut out = format!(
            "{} [{}] {}",
            self.local_time(),
            self.taint,
            String::from_utf8_lossy(&self.payload)
        );
        if self.needs_newline() {
            out.push('\n');
        }
        out
    }

    /// Coloured rendering for consoles
    ///
    /// The payload bytes are copied verbatim.
    pub fn render_colored(&self) -> Vec<u8> {
        let reset = color::reset();
        let mut buf = Vec::with_capacity(self.payload.len() + 48);
        buf.extend_from_slice(Color::DarkGreen.escape().as_bytes());
        buf.extend_from_slice(self.local_time().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(reset.as_bytes());
        buf.extend_from_slice(self.taint.color().escape().as_bytes());
        buf.extend_from_slice(&self.payload);
        if self.needs_newline() {
            buf.push(b'\n');
        }
        buf.extend_from_slice(reset.as_bytes());
        buf
    }

    fn local_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format(DISPLAY_TIME_FORMAT)
            .to_string()
    }
}

/// Fill `buf` from `r`, looping over short reads until full or EOF
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decode the next frame, or `None` at a clean end of input
fn read_next<R: Read + ?Sized>(r: &mut R) -> Result<Option<Entry>, FrameError> {
    let mut encoded = [0u8; HEADER_LEN];
    let got = read_full(r, &mut encoded)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: HEADER_LEN,
            got,
        });
    }

    let raw = BASE32
        .decode(&encoded)
        .map_err(|e| FrameError::InvalidHeader(e.to_string()))?;
    if raw.len() != RAW_HEADER_LEN {
        return Err(FrameError::InvalidHeader(format!(
            "decoded to {} bytes, expected {}",
            raw.len(),
            RAW_HEADER_LEN
        )));
    }

    let flags = raw[0];
    let taint = Taint::from_byte(raw[1]);
    let len = u32::from_be_bytes([0, raw[2], raw[3], raw[4]]) as usize;
    let mut nanos = [0u8; 8];
    nanos.copy_from_slice(&raw[5..13]);
    let timestamp = Utc.timestamp_nanos(i64::from_be_bytes(nanos));

    let forced = flags & FORCED_NEWLINE != 0;
    let read_len = if forced { len + 1 } else { len };

    let mut payload = vec![0u8; read_len];
    let got = read_full(r, &mut payload)?;
    if got < read_len {
        return Err(FrameError::Truncated {
            expected: read_len,
            got,
        });
    }
    if forced && payload.pop() != Some(b'\n') {
        return Err(FrameError::MissingNewline);
    }

    Ok(Some(Entry {
        timestamp,
        taint,
        payload,
    }))
}

/// Iterator over the frames of a log file
///
/// Stops at a clean end of input; a partial trailing frame yields an error.
pub struct EntryReader<R> {
    reader: R,
    failed: bool,
}

impl<R: Read> EntryReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            failed: false,
        }
    }

    /// Get the underlying reader back
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl EntryReader<Box<dyn Read + Send>> {
    /// Open a live log file or a compressed archive
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let is_archive = path
            .extension()
            .map(|ext| ext == ARCHIVE_EXTENSION)
            .unwrap_or(false);

        let reader: Box<dyn Read + Send> = if is_archive {
            Box::new(zstd::stream::read::Decoder::new(file)?)
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader))
    }
}

impl<R: Read> Iterator for EntryReader<R> {
    type Item = Result<Entry, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match read_next(&mut self.reader) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(nanos: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(nanos)
    }

    /// Reader that hands out at most `chunk` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_header_length_is_fixed() {
        assert_eq!(BASE32.encode_len(RAW_HEADER_LEN), HEADER_LEN);

        let short = Entry::with_timestamp(at(0), Taint::Normal, "a").encode().unwrap();
        let long = Entry::with_timestamp(at(i64::MAX), Taint::Fatal, vec![b'x'; 1000])
            .encode()
            .unwrap();
        assert_eq!(short.len(), HEADER_LEN + 2);
        assert_eq!(long.len(), HEADER_LEN + 1001);
        assert!(short[..HEADER_LEN].is_ascii());
    }

    #[test]
    fn test_roundtrip_without_trailing_newline() {
        let entry = Entry::with_timestamp(at(1_700_000_000_123_456_789), Taint::Warning, "test entry");
        let frame = entry.encode().unwrap();
        assert_eq!(*frame.last().unwrap(), b'\n');

        let mut input = &frame[..];
        let decoded = Entry::read_from(&mut input).unwrap();
        assert_eq!(decoded, entry);
        assert!(input.is_empty(), "{} bytes not read", input.len());
    }

    #[test]
    fn test_roundtrip_with_trailing_newline() {
        let entry = Entry::with_timestamp(Utc::now(), Taint::Ok, "already terminated\n");
        let frame = entry.encode().unwrap();
        assert_eq!(frame.len(), HEADER_LEN + entry.payload.len());
        let raw = BASE32.decode(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(raw[0] & FORCED_NEWLINE, 0);
        assert_eq!(&raw[2..5], &[0, 0, 19]);

        let decoded = Entry::read_from(&mut &frame[..]).unwrap();
        assert_eq!(decoded.payload, b"already terminated\n");
        assert_eq!(decoded.taint, Taint::Ok);
        assert_eq!(decoded.timestamp, entry.timestamp);
    }

    #[test]
    fn test_roundtrip_binary_payload_and_unknown_taint() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let entry = Entry::with_timestamp(at(-5), Taint::Unknown(200), payload.clone());
        let frame = entry.encode().unwrap();
        let decoded = Entry::read_from(&mut &frame[..]).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.taint, Taint::Unknown(200));
        assert_eq!(decoded.timestamp, at(-5));
    }

    #[test]
    fn test_header_layout() {
        let entry = Entry::with_timestamp(at(0x0102_0304_0506_0708), Taint::Error, "boom");
        let frame = entry.encode().unwrap();
        let raw = BASE32.decode(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(
            raw,
            vec![FORCED_NEWLINE, 3, 0, 0, 4, 1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert_eq!(&frame[HEADER_LEN..], b"boom\n");
    }

    #[test]
    fn test_decode_handles_short_reads() {
        let entry = Entry::with_timestamp(at(42), Taint::Info, vec![b'z'; 300]);
        let frame = entry.encode().unwrap();
        let mut reader = Trickle {
            data: &frame,
            chunk: 7,
        };
        assert_eq!(Entry::read_from(&mut reader).unwrap(), entry);
    }

    #[test]
    fn test_only_bit_zero_means_forced_newline() {
        let entry = Entry::with_timestamp(at(1), Taint::Normal, "line\n");
        let mut frame = entry.encode().unwrap();
        let mut raw = BASE32.decode(&frame[..HEADER_LEN]).unwrap();
        raw[0] = 0x02;
        frame[..HEADER_LEN].copy_from_slice(BASE32.encode(&raw).as_bytes());

        let decoded = Entry::read_from(&mut &frame[..]).unwrap();
        assert_eq!(decoded.payload, b"line\n");
    }

    #[test]
    fn test_truncated_payload() {
        let frame = Entry::with_timestamp(at(1), Taint::Normal, "hello")
            .encode()
            .unwrap();
        let err = Entry::read_from(&mut &frame[..frame.len() - 2]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 6, got: 4 }));
    }

    #[test]
    fn test_truncated_header() {
        let err = Entry::read_from(&mut &b"ABCDEFGH"[..]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: HEADER_LEN, got: 8 }));

        let err = Entry::read_from(&mut &b""[..]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { got: 0, .. }));
    }

    #[test]
    fn test_invalid_header() {
        let garbage = [b'!'; HEADER_LEN];
        let err = Entry::read_from(&mut &garbage[..]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));
    }

    #[test]
    fn test_payload_too_large() {
        let entry = Entry::new(Taint::Normal, vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            entry.encode(),
            Err(FrameError::PayloadTooLarge(n)) if n == MAX_PAYLOAD_LEN + 1
        ));
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let entry = Entry::with_timestamp(at(7), Taint::Normal, Vec::new());
        let frame = entry.encode().unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 1);
        assert_eq!(Entry::read_from(&mut &frame[..]).unwrap(), entry);
    }

    #[test]
    fn test_entry_reader_sequence() {
        let mut buf = Vec::new();
        Entry::with_timestamp(at(1), Taint::Normal, "hello")
            .write_to(&mut buf)
            .unwrap();
        Entry::with_timestamp(at(2), Taint::Error, "boom")
            .write_to(&mut buf)
            .unwrap();

        let entries: Vec<Entry> = EntryReader::new(&buf[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, b"hello");
        assert_eq!(entries[0].taint, Taint::Normal);
        assert_eq!(entries[1].payload, b"boom");
        assert_eq!(entries[1].taint, Taint::Error);
    }

    #[test]
    fn test_entry_reader_stops_after_error() {
        let mut buf = Vec::new();
        Entry::with_timestamp(at(1), Taint::Normal, "ok")
            .write_to(&mut buf)
            .unwrap();
        buf.extend_from_slice(b"JUNK");

        let mut reader = EntryReader::new(&buf[..]);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_render_plain() {
        let entry = Entry::new(Taint::Fatal, "disk on fire");
        let rendered = entry.render_plain();
        assert!(rendered.contains("[FATAL] disk on fire"));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_render_colored() {
        let entry = Entry::new(Taint::Error, "boom");
        let rendered = entry.render_colored();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.starts_with(&Color::DarkGreen.escape()));
        assert!(text.contains(&format!("{}boom\n", Color::Red.escape())));
        assert!(text.ends_with(&color::reset()));
    }
}
