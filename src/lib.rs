//! taintlog - named, buffered, hourly-rotated log streams
//!
//! Streams buffer entries in memory until file output is enabled, then write
//! each entry as a self-delimiting frame, rotate their file every hour and
//! compress rotated files in the background.

pub mod archive;
pub mod color;
pub mod config;
pub mod entry;
pub mod registry;
pub mod stream;
pub mod taint;
pub mod tasks;
pub mod telemetry;

pub use config::Config;
pub use entry::{Entry, EntryReader, FrameError};
pub use registry::Registry;
pub use stream::{ErrorSink, LogStream, SharedWriter};
pub use taint::Taint;
pub use tasks::TaskPool;
