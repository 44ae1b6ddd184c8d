//! Test doubles shared by unit and integration tests
//!
//! Compiled for the crate's own tests and behind the `test-util` feature.

use crate::runtime::{CommandError, CommandOutcome, CommandRunner, SystemCommand};
use async_trait::async_trait;
use std::sync::{Mutex, Once, PoisonError};

/// Records every command instead of running it.
///
/// Commands whose display contains one of the `failing` patterns exit with
/// status 1; everything else succeeds.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    failing: Vec<String>,
    captured: String,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose display contains `pattern`
    pub fn failing(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    /// Stdout returned by `capture`
    pub fn capturing(mut self, output: &str) -> Self {
        self.captured = output.to_string();
        self
    }

    /// Commands seen so far, in order
    pub fn recorded(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, line: String) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutcome, CommandError> {
        let line = command.to_string();
        let fails = self.failing.iter().any(|p| line.contains(p.as_str()));
        self.record(line);
        if fails {
            Ok(CommandOutcome::Failed(Some(1)))
        } else {
            Ok(CommandOutcome::Success)
        }
    }

    async fn capture(&self, command: &SystemCommand) -> Result<String, CommandError> {
        self.record(command.to_string());
        Ok(self.captured.clone())
    }

    fn restore_terminal(&self) {
        self.record("stty sane".to_string());
    }
}

static LOGGER: CapturingLogger = CapturingLogger;
static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

/// `log` backend keeping every record in memory
struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        RECORDS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

/// Route `log` records into memory for the rest of the process.
///
/// Records from concurrently running tests end up in the same buffer, so
/// callers filter by a pattern unique to their test.
pub fn capture_logs() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }
    });
}

/// Captured messages at `level` that contain `pattern`
pub fn logged(level: log::Level, pattern: &str) -> Vec<String> {
    RECORDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|(l, message)| *l == level && message.contains(pattern))
        .map(|(_, message)| message.clone())
        .collect()
}
