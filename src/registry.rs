//! Registry of named streams
//!
//! The registry is the explicit context object owning every stream. It starts
//! empty, creates streams lazily on first lookup and never removes them.
//! Switching file output on or off applies to streams created later and is
//! dispatched to existing streams as background tasks that the caller does
//! not wait for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::archive::Archiver;
use crate::config::Config;
use crate::stream::{ErrorSink, LogStream};
use crate::tasks::TaskPool;

struct RegistryState {
    streams: HashMap<String, Arc<LogStream>>,
    file_output: bool,
}

/// Owner of all log streams of a process
pub struct Registry {
    config: Config,
    archiver: Archiver,
    errors: ErrorSink,
    tasks: Arc<TaskPool>,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry reporting failures to stderr
    pub fn new(config: Config, tasks: Arc<TaskPool>) -> Self {
        Self::with_error_sink(config, tasks, ErrorSink::stderr())
    }

    /// Create an empty registry with a custom error sink
    pub fn with_error_sink(config: Config, tasks: Arc<TaskPool>, errors: ErrorSink) -> Self {
        let archiver = Archiver::new(
            config.archive_dir(),
            config.compression_level,
            Arc::clone(&tasks),
            errors.clone(),
        );
        let file_output = config.file_output;

        Self {
            config,
            archiver,
            errors,
            tasks,
            state: Mutex::new(RegistryState {
                streams: HashMap::new(),
                file_output,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskPool> {
        &self.tasks
    }

    /// Get the stream called `name`, creating it on first use
    pub fn get(&self, name: &str) -> Arc<LogStream> {
        let mut state = self.lock();
        if let Some(stream) = state.streams.get(name) {
            return Arc::clone(stream);
        }

        let stream = Arc::new(LogStream::new(
            name,
            self.config.live_path(name),
            self.archiver.clone(),
            self.errors.clone(),
            self.config.max_pending_entries,
            state.file_output,
        ));
        state.streams.insert(name.to_string(), Arc::clone(&stream));
        debug!(stream = %name, file_output = state.file_output, "Stream created");

        stream
    }

    /// Names of all registered streams, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().streams.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_file_output_enabled(&self) -> bool {
        self.lock().file_output
    }

    /// Enable file output everywhere, flushing buffered entries
    ///
    /// Returns once every stream's transition has been dispatched.
    pub fn enable_file_output(&self) {
        let mut state = self.lock();
        if state.file_output {
            return;
        }
        state.file_output = true;

        for stream in state.streams.values() {
            let stream = Arc::clone(stream);
            self.tasks
                .spawn("enable-file-output", move || stream.enable_file_output());
        }
        info!(streams = state.streams.len(), "File output enabled");
    }

    /// Close all live files and go back to buffering in memory
    ///
    /// Returns once every stream's transition has been dispatched.
    pub fn disable_file_output(&self) {
        let mut state = self.lock();
        if !state.file_output {
            return;
        }
        state.file_output = false;

        for stream in state.streams.values() {
            let stream = Arc::clone(stream);
            self.tasks
                .spawn("disable-file-output", move || stream.disable_file_output());
        }
        info!(streams = state.streams.len(), "File output disabled");
    }

    /// Wait for outstanding transitions and archive compressions
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, EntryReader};
    use crate::stream::{shared, MemoryWriter};
    use crate::taint::Taint;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, file_output: bool) -> Registry {
        let mut config = Config::with_log_dir(dir.path());
        config.file_output = file_output;
        Registry::with_error_sink(
            config,
            Arc::new(TaskPool::current().unwrap()),
            ErrorSink::new(shared(MemoryWriter::new())),
        )
    }

    fn payloads(path: &std::path::Path) -> Vec<Vec<u8>> {
        EntryReader::open(path)
            .unwrap()
            .map(|e| e.unwrap().payload)
            .collect()
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, false);

        let a = registry.get("kernel");
        let b = registry.get("kernel");
        let c = registry.get("init");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.live_path(), dir.path().join("kernel.log"));
        assert_eq!(registry.names(), vec!["init".to_string(), "kernel".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_get_returns_one_stream() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, false);

        let streams: Vec<Arc<LogStream>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| registry.get("shared")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for stream in &streams[1..] {
            assert!(Arc::ptr_eq(&streams[0], stream));
        }
        assert_eq!(registry.names().len(), 1);
    }

    #[tokio::test]
    async fn test_new_streams_inherit_mode() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, false);
        assert!(!registry.get("before").is_file_output_enabled());

        registry.enable_file_output();
        registry.wait_idle().await;

        assert!(registry.is_file_output_enabled());
        assert!(registry.get("before").is_file_output_enabled());
        assert!(registry.get("after").is_file_output_enabled());
    }

    #[tokio::test]
    async fn test_enable_flushes_every_stream() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, false);

        let now = chrono::Utc::now();
        for name in ["a", "b", "c"] {
            let stream = registry.get(name);
            stream.write_entry(Entry::with_timestamp(now, Taint::Info, format!("{} first", name)));
            stream.write_entry(Entry::with_timestamp(now, Taint::Info, format!("{} second", name)));
        }

        registry.enable_file_output();
        registry.wait_idle().await;

        for name in ["a", "b", "c"] {
            let stream = registry.get(name);
            assert_eq!(stream.pending_len(), 0);
            assert_eq!(
                payloads(stream.live_path()),
                vec![
                    format!("{} first", name).into_bytes(),
                    format!("{} second", name).into_bytes()
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_disable_returns_to_buffering() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, true);

        let stream = registry.get("x");
        let now = chrono::Utc::now();
        stream.write_entry(Entry::with_timestamp(now, Taint::Normal, "on disk"));

        registry.disable_file_output();
        registry.wait_idle().await;
        assert!(!stream.is_file_output_enabled());

        stream.write_entry(Entry::with_timestamp(now, Taint::Normal, "in memory"));
        assert_eq!(stream.pending_len(), 1);
        assert_eq!(payloads(stream.live_path()), vec![b"on disk".to_vec()]);
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, true);
        registry.get("x");

        registry.enable_file_output();
        assert_eq!(registry.tasks().pending(), 0);

        registry.disable_file_output();
        registry.disable_file_output();
        registry.wait_idle().await;
        assert!(!registry.is_file_output_enabled());
    }
}
