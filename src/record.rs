//! Per-run bookkeeping: a [`RunRecord`] holds one job's last start/end
//! timestamps and captured output, and [`StdoutCapture`] is the RAII
//! guard that fills it in while a job runs.
//!
//! Grounded on the original's `_PrintLogger`, redesigned to scope
//! capture to the current thread's call stack (a `tracing` subscriber
//! installed only for the run) instead of redirecting process-wide
//! stdout.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use jiff::Zoned;
use serde_json::{json, Value};
use tracing_subscriber::fmt::MakeWriter;

/// One job's most recent execution: when it started/ended, what it
/// printed, and its error text if it failed.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub started_at: Option<Zoned>,
    pub ended_at: Option<Zoned>,
    pub log: String,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn mark_started(&mut self, now: Zoned) {
        self.started_at = Some(now);
        self.ended_at = None;
        self.error = None;
        self.log.clear();
    }

    pub fn mark_finished(&mut self, now: Zoned, log: String, error: Option<String>) {
        self.ended_at = Some(now);
        self.log = log;
        self.error = error;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    #[must_use]
    pub fn did_fail(&self) -> bool {
        self.error.is_some()
    }

    /// READY / RUNNING / ERROR / SUCCESS, matching the monitor's state
    /// derivation.
    #[must_use]
    pub fn state_label(&self) -> &'static str {
        if self.started_at.is_none() {
            "ready"
        } else if self.is_running() {
            "running"
        } else if self.did_fail() {
            "error"
        } else {
            "success"
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "started_at": self.started_at.as_ref().map(std::string::ToString::to_string),
            "ended_at": self.ended_at.as_ref().map(std::string::ToString::to_string),
            "log": self.log,
            "error": self.error,
            "state": self.state_label(),
        })
    }

    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let parse_zoned = |key: &str| -> Option<Zoned> {
            value.get(key)?.as_str()?.parse().ok()
        };
        Self {
            started_at: parse_zoned("started_at"),
            ended_at: parse_zoned("ended_at"),
            log: value
                .get("log")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Clone)]
struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
    file: Option<tracing_appender::non_blocking::NonBlocking>,
    silent: bool,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("capture buffer poisoned")
            .extend_from_slice(buf);
        if !self.silent {
            io::stderr().write_all(buf)?;
        }
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs a thread-scoped `tracing` subscriber for the lifetime of the
/// guard; every event logged on this thread while it's alive is appended
/// to an in-memory buffer (and, unless `silent`, echoed to stderr and an
/// optional rotating file). Dropping the guard restores the previous
/// default subscriber.
pub struct StdoutCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl StdoutCapture {
    #[must_use]
    pub fn start(
        silent: bool,
        file: Option<tracing_appender::non_blocking::NonBlocking>,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = CaptureWriter {
            buffer: Arc::clone(&buffer),
            file,
            silent,
        };
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            buffer,
            _guard: guard,
        }
    }

    /// Consume the guard, returning everything logged during capture.
    #[must_use]
    pub fn finish(self) -> String {
        let bytes = self
            .buffer
            .lock()
            .expect("capture buffer poisoned")
            .clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
