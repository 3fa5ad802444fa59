//! Per-item progress reporting
//!
//! Each deployment item gets its own progress context: a status line, a
//! total/done counter and leveled log messages. The rendering backend is
//! pluggable; the console backend prints styled lines to stderr, the null
//! backend swallows everything (tests install their own recording backend).

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use console::style;

/// Severity of a progress log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLevel {
    Debug,
    Info,
    Warning,
}

/// Rendering backend for one deployment item
pub trait ProgressBackend: Send + Sync {
    fn set_total(&self, total: u64);
    fn set_status(&self, status: &str);
    fn inc(&self);
    fn log(&self, level: ProgressLevel, message: &str);
    fn finish(&self);
}

/// Factory handing out one backend per deployment item
pub trait ProgressReporter: Send + Sync {
    fn begin_item(&self, name: &str) -> Arc<dyn ProgressBackend>;

    /// Called once after the run has drained
    fn flush(&self) {}
}

/// Per-item progress handle used throughout the orchestrator
#[derive(Clone)]
pub struct ProgressCtx {
    backend: Arc<dyn ProgressBackend>,
}

impl ProgressCtx {
    pub fn new(backend: Arc<dyn ProgressBackend>) -> Self {
        Self { backend }
    }

    pub fn set_total(&self, total: u64) {
        self.backend.set_total(total);
    }

    pub fn set_status(&self, status: impl AsRef<str>) {
        self.backend.set_status(status.as_ref());
    }

    pub fn increment(&self) {
        self.backend.inc();
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.backend.log(ProgressLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.backend.log(ProgressLevel::Info, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.backend.log(ProgressLevel::Warning, message.as_ref());
    }

    pub fn info_and_status(&self, message: impl AsRef<str>) {
        self.backend.log(ProgressLevel::Info, message.as_ref());
        self.backend.set_status(message.as_ref());
    }

    pub fn finish(&self) {
        self.backend.finish();
    }
}

/// Console reporter printing one line per event to stderr
pub struct ConsoleProgress {
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn begin_item(&self, name: &str) -> Arc<dyn ProgressBackend> {
        Arc::new(ConsoleItem {
            name: name.to_string(),
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            verbose: self.verbose,
        })
    }
}

struct ConsoleItem {
    name: String,
    total: AtomicU64,
    done: AtomicU64,
    verbose: bool,
}

impl ProgressBackend for ConsoleItem {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_status(&self, status: &str) {
        if self.verbose {
            let _ = writeln!(
                io::stderr(),
                "  {} [{}] {}",
                style("◐").cyan(),
                self.name,
                style(status).dim()
            );
        }
    }

    fn inc(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    fn log(&self, level: ProgressLevel, message: &str) {
        let symbol = match level {
            ProgressLevel::Debug => {
                if !self.verbose {
                    return;
                }
                style("·").dim()
            }
            ProgressLevel::Info => style("ℹ").blue(),
            ProgressLevel::Warning => style("⚠").yellow(),
        };
        let _ = writeln!(io::stderr(), "  {} [{}] {}", symbol, self.name, message);
    }

    fn finish(&self) {
        let done = self.done.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let _ = writeln!(
            io::stderr(),
            "  {} [{}] {}/{}",
            style("✓").green(),
            self.name,
            done,
            total
        );
    }
}

/// Reporter that swallows all progress output
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn begin_item(&self, _name: &str) -> Arc<dyn ProgressBackend> {
        Arc::new(NullItem)
    }
}

struct NullItem;

impl ProgressBackend for NullItem {
    fn set_total(&self, _total: u64) {}
    fn set_status(&self, _status: &str) {}
    fn inc(&self) {}
    fn log(&self, _level: ProgressLevel, _message: &str) {}
    fn finish(&self) {}
}
