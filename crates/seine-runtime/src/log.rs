//! Asynchronous leveled log service.
//!
//! An explicitly constructed service with an `start`/`shutdown`
//! lifecycle — no process-wide singleton, so teardown ordering is
//! testable. Components hold cheap [`Logger`] handles tagged with a
//! component name.
//!
//! Fire-and-forget: producers push onto a lock-free bounded queue and
//! never block; records below the configured level are dropped before
//! enqueue, and a full queue drops the record and bumps a counter.
//! One writer thread drains the queue into a buffered sink, flushing
//! past 4 KiB and at shutdown.

use crossbeam_queue::ArrayQueue;

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Buffered bytes before the writer forces a flush.
const FLUSH_THRESHOLD: usize = 4096;

/// Writer park interval while the queue is empty.
const IDLE_PARK: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warning" | "warn" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum Sink {
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub min_level: Level,
    pub sink: Sink,
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            sink: Sink::Stderr,
            queue_capacity: 4096,
        }
    }
}

impl LogConfig {
    /// Defaults with `SEINE_LOG_LEVEL` / `SEINE_LOG_FILE` overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(level) = std::env::var("SEINE_LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
        {
            cfg.min_level = level;
        }
        if let Ok(path) = std::env::var("SEINE_LOG_FILE") {
            cfg.sink = Sink::File(PathBuf::from(path));
        }
        cfg
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Sink::File(path.into());
        self
    }
}

struct Record {
    level: Level,
    component: &'static str,
    message: String,
    unix_millis: u128,
}

struct LogShared {
    queue: ArrayQueue<Record>,
    min_level: Level,
    running: AtomicBool,
    dropped: AtomicU64,
}

/// Cheap per-component handle. Never blocks the caller.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<LogShared>,
    component: &'static str,
}

impl Logger {
    fn log(&self, level: Level, message: impl Into<String>) {
        if level < self.shared.min_level {
            return;
        }
        let unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let record = Record {
            level,
            component: self.component,
            message: message.into(),
            unix_millis,
        };
        if self.shared.queue.push(record).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(Level::Fatal, message);
    }

    /// A handle for another component sharing this service.
    pub fn for_component(&self, component: &'static str) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            component,
        }
    }
}

/// The owning side of the service: one writer thread, joined on
/// shutdown.
pub struct LogService {
    shared: Arc<LogShared>,
    writer: Option<JoinHandle<()>>,
}

impl LogService {
    pub fn start(config: LogConfig) -> io::Result<Self> {
        let sink: Box<dyn Write + Send> = match &config.sink {
            Sink::Stderr => Box::new(io::stderr()),
            Sink::File(path) => Box::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            ),
        };
        let shared = Arc::new(LogShared {
            queue: ArrayQueue::new(config.queue_capacity.max(16)),
            min_level: config.min_level,
            running: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });

        let writer_shared = Arc::clone(&shared);
        let writer = thread::Builder::new()
            .name("seine-log".into())
            .spawn(move || writer_loop(writer_shared, sink))
            .expect("failed to spawn log writer thread");

        Ok(Self {
            shared,
            writer: Some(writer),
        })
    }

    pub fn logger(&self, component: &'static str) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            component,
        }
    }

    /// Records dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Flush remaining records and join the writer. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.writer.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for LogService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(shared: Arc<LogShared>, sink: Box<dyn Write + Send>) {
    let mut out = BufWriter::with_capacity(FLUSH_THRESHOLD * 2, sink);
    loop {
        let mut wrote = false;
        while let Some(rec) = shared.queue.pop() {
            let secs = rec.unix_millis / 1000;
            let millis = rec.unix_millis % 1000;
            let _ = writeln!(
                out,
                "[{}.{:03}] [{}] {}: {}",
                secs,
                millis,
                rec.level.as_str(),
                rec.component,
                rec.message
            );
            wrote = true;
        }
        if out.buffer().len() >= FLUSH_THRESHOLD {
            let _ = out.flush();
        }
        if !shared.running.load(Ordering::Acquire) && shared.queue.is_empty() {
            break;
        }
        if !wrote {
            let _ = out.flush();
            thread::park_timeout(IDLE_PARK);
        }
    }
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn temp_log_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("seine-log-test-{}-{}", tag, std::process::id()));
        p
    }

    #[test]
    fn writes_are_flushed_on_shutdown() {
        let path = temp_log_path("flush");
        let _ = std::fs::remove_file(&path);
        let mut service =
            LogService::start(LogConfig::default().file(&path)).unwrap();
        let log = service.logger("test");
        log.info("hello");
        log.error("world");
        service.shutdown();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[Info] test: hello"));
        assert!(content.contains("[Error] test: world"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn records_below_min_level_are_dropped() {
        let path = temp_log_path("level");
        let _ = std::fs::remove_file(&path);
        let mut service = LogService::start(
            LogConfig::default().min_level(Level::Warning).file(&path),
        )
        .unwrap();
        let log = service.logger("test");
        log.debug("invisible");
        log.info("invisible");
        log.warning("visible");
        service.shutdown();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("invisible"));
        assert!(content.contains("[Warning] test: visible"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn logging_never_blocks() {
        let path = temp_log_path("noblock");
        let _ = std::fs::remove_file(&path);
        let mut config = LogConfig::default().file(&path);
        config.queue_capacity = 16;
        let mut service = LogService::start(config).unwrap();
        let log = service.logger("test");

        let start = Instant::now();
        for i in 0..100_000 {
            log.info(format!("burst {}", i));
        }
        // Far more records than the queue holds: pushes must have
        // dropped rather than blocked.
        assert!(start.elapsed() < Duration::from_secs(5));
        service.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Fatal);
        assert_eq!(Level::parse("warn"), Some(Level::Warning));
        assert_eq!(Level::parse("bogus"), None);
    }
}
