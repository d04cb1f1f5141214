//! JSONL logging for harness tests.
//!
//! Integration tests install one global subscriber through
//! [`init_global_test_logging`], usually from a `#[ctor::ctor]` function in
//! `tests/common/mod.rs`. Individual tests that want a replayable record of
//! a case open a [`TestLogger`], which writes one JSONL file per test under
//! `target/test-logs/`.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Teardown => "teardown",
        })
    }
}

static INIT: Once = Once::new();

/// Install the global test subscriber once per process.
///
/// JSON lines go to `target/test-logs/all_tests.jsonl` (or
/// `CRH_TEST_LOG_FILE`), compact lines to the libtest capture writer.
/// `CRH_TEST_LOG_LEVEL` sets the level for the harness crates and the
/// `test` target (default `info`).
pub fn init_global_test_logging() {
    INIT.call_once(|| {
        let json_layer = open_global_log().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
        });
        let capture_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .compact();

        let level = std::env::var("CRH_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = EnvFilter::try_new(format!("crh={level},crh_common={level},test={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .with(capture_layer),
        );
    });
}

fn open_global_log() -> Option<std::fs::File> {
    let path = match std::env::var("CRH_TEST_LOG_FILE") {
        Ok(custom) => PathBuf::from(custom),
        Err(_) => find_target_dir().join("test-logs").join("all_tests.jsonl"),
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::File::create(path).ok()
}

/// `CARGO_TARGET_DIR`, else the nearest `target/` above the working directory.
fn find_target_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(dir);
    }
    let mut dir = std::env::current_dir().unwrap_or_default();
    loop {
        if dir.join("target").is_dir() {
            return dir.join("target");
        }
        if !dir.pop() {
            return PathBuf::from("target");
        }
    }
}

/// One JSONL line of a test log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    /// Milliseconds since the logger was created.
    pub elapsed_ms: u64,
    /// Structured payload, typically a serialized case or loop report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Per-test JSONL log at `target/test-logs/<test>.jsonl`.
///
/// Entries are also mirrored to `tracing` so they land in the global log.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
    file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let file = log_file_for(test_name).ok().map(Mutex::new);
        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
            file,
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.push(phase, message.into(), None);
    }

    /// Log `data` serialized as JSON next to the message.
    ///
    /// Serialization failures are logged in place of the payload.
    pub fn record<T: Serialize>(&self, phase: TestPhase, message: impl Into<String>, data: &T) {
        let data = serde_json::to_value(data)
            .unwrap_or_else(|err| serde_json::json!({ "serialize_error": err.to_string() }));
        self.push(phase, message.into(), Some(data));
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }

    fn push(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: self.test_name.clone(),
            phase,
            message,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            data,
        };

        if let Some(file) = &self.file
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = writeln!(file, "{json}");
        }
        tracing::info!(
            test = %self.test_name,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

fn log_file_for(test_name: &str) -> std::io::Result<std::fs::File> {
    let dir = find_target_dir().join("test-logs");
    std::fs::create_dir_all(&dir)?;
    let file_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
    std::fs::File::create(dir.join(format!("{file_name}.jsonl")))
}
