// Command Runner Port
// Abstraction for spawning a shell command and capturing its output

use crate::domain::{ExecutionId, ExecutionOutcome};
use crate::port::cancel::CancelToken;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub execution_id: ExecutionId,
    pub command_text: String,
    pub working_dir: PathBuf,
}

/// Receiver of captured output lines
///
/// The runner calls `emit` from a single capture loop, one line at a time, in
/// the order the lines were read. `emit` must not block.
pub trait OutputSink: Send + Sync {
    fn emit(&self, text: String);
}

/// Runner errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Process kill failed: {0}")]
    Killed(String),
}

/// Command Runner trait
///
/// Implementations:
/// - ShellCommandRunner (infra-system): `sh -c` subprocess
/// - MockCommandRunner: scripted output for tests
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion, forwarding every output line to `sink`
    ///
    /// Returns `ExecutionOutcome::Cancelled` when `cancel` fires first.
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started (no
    ///   line has been emitted in that case)
    /// - ExecutionError::Io if waiting on the process fails
    async fn run(
        &self,
        spec: &RunSpec,
        sink: &dyn OutputSink,
        cancel: CancelToken,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Mock runner behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Emit lines, then exit with the code
        Lines { lines: Vec<String>, exit_code: i32 },
        /// Fail before emitting anything
        SpawnFail(String),
        /// Emit lines, then block until cancelled
        UntilCancelled { lines: Vec<String> },
        /// Emit lines pushed through the feeder; exit once the feeder is dropped
        Fed { exit_code: i32 },
    }

    /// Mock Command Runner for testing
    pub struct MockCommandRunner {
        behavior: MockBehavior,
        feed: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
        calls: Arc<Mutex<Vec<RunSpec>>>,
    }

    impl MockCommandRunner {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                feed: Mutex::new(None),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_lines(lines: &[&str], exit_code: i32) -> Self {
            Self::new(MockBehavior::Lines {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit_code,
            })
        }

        pub fn new_spawn_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::SpawnFail(message.into()))
        }

        pub fn new_until_cancelled(lines: &[&str]) -> Self {
            Self::new(MockBehavior::UntilCancelled {
                lines: lines.iter().map(|l| l.to_string()).collect(),
            })
        }

        /// Runner whose output is driven by the returned sender (single use)
        pub fn new_fed(exit_code: i32) -> (Self, mpsc::UnboundedSender<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let runner = Self::new(MockBehavior::Fed { exit_code });
            *runner.feed.lock().unwrap() = Some(rx);
            (runner, tx)
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<RunSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for MockCommandRunner {
        async fn run(
            &self,
            spec: &RunSpec,
            sink: &dyn OutputSink,
            mut cancel: CancelToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.lock().unwrap().push(spec.clone());

            match self.behavior.clone() {
                MockBehavior::Lines { lines, exit_code } => {
                    for line in lines {
                        sink.emit(line);
                    }
                    Ok(ExecutionOutcome::Finished { exit_code })
                }
                MockBehavior::SpawnFail(msg) => Err(ExecutionError::SpawnFailed(msg)),
                MockBehavior::UntilCancelled { lines } => {
                    for line in lines {
                        sink.emit(line);
                    }
                    cancel.cancelled().await;
                    Ok(ExecutionOutcome::Cancelled)
                }
                MockBehavior::Fed { exit_code } => {
                    let mut feed = self
                        .feed
                        .lock()
                        .unwrap()
                        .take()
                        .ok_or_else(|| ExecutionError::SpawnFailed("feed already used".into()))?;
                    loop {
                        tokio::select! {
                            line = feed.recv() => match line {
                                Some(line) => sink.emit(line),
                                None => return Ok(ExecutionOutcome::Finished { exit_code }),
                            },
                            _ = cancel.cancelled() => return Ok(ExecutionOutcome::Cancelled),
                        }
                    }
                }
            }
        }
    }
}
