// Process Launcher - starts catalog commands and tracks live executions

use crate::application::broadcaster::{ExecutionLog, LogBroadcaster, LogSubscription};
use crate::application::registry::CommandRegistry;
use crate::domain::{Command, ExecutionId, ExecutionInfo, ExecutionOutcome, ExecutionState};
use crate::error::{AppError, Result};
use crate::port::{cancel_channel, CancelSender, CommandRunner, IdProvider, RunSpec, TimeProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

struct HandleInner {
    execution_id: ExecutionId,
    command_name: String,
    command_text: String,
    working_dir: PathBuf,
    started_at: i64,
    log: Arc<ExecutionLog>,
    cancel: CancelSender,
}

/// Caller's reference to a started execution
///
/// Cheap to clone. Does not keep the process alive.
#[derive(Clone)]
pub struct ExecutionHandle {
    inner: Arc<HandleInner>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &str {
        &self.inner.execution_id
    }

    pub fn command_name(&self) -> &str {
        &self.inner.command_name
    }

    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    pub fn started_at(&self) -> i64 {
        self.inner.started_at
    }

    pub fn state(&self) -> ExecutionState {
        self.inner.log.state()
    }

    pub fn info(&self) -> ExecutionInfo {
        ExecutionInfo {
            execution_id: self.inner.execution_id.clone(),
            command_name: self.inner.command_name.clone(),
            command_text: self.inner.command_text.clone(),
            working_dir: self.inner.working_dir.clone(),
            started_at: self.inner.started_at,
            state: self.state(),
        }
    }

    /// Attach to the output from this point on
    pub fn subscribe(&self) -> LogSubscription {
        self.inner.log.subscribe()
    }

    /// Request cancellation; false if already requested
    pub fn cancel(&self) -> bool {
        self.inner.cancel.cancel()
    }

    /// Wait for the execution to terminate
    pub async fn wait(&self) -> ExecutionOutcome {
        let mut rx = self.inner.log.watch_state();
        let state = match rx.wait_for(ExecutionState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
            .outcome()
            .cloned()
            .unwrap_or_else(|| ExecutionOutcome::Failed {
                reason: "execution state lost".to_string(),
            })
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("execution_id", &self.inner.execution_id)
            .field("command_name", &self.inner.command_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Check that `dir` can serve as a working directory
///
/// Must be absolute, exist, be a directory and be listable by us.
pub fn validate_working_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.is_absolute() {
        return Err(AppError::InvalidDirectory(format!(
            "{} is not an absolute path",
            dir.display()
        )));
    }

    let metadata = std::fs::metadata(dir)
        .map_err(|e| AppError::InvalidDirectory(format!("{}: {}", dir.display(), e)))?;
    if !metadata.is_dir() {
        return Err(AppError::InvalidDirectory(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    std::fs::read_dir(dir).map_err(|e| {
        AppError::InvalidDirectory(format!("{} is not readable: {}", dir.display(), e))
    })?;

    Ok(dir.to_path_buf())
}

/// Process Launcher
pub struct ProcessLauncher {
    registry: Arc<CommandRegistry>,
    runner: Arc<dyn CommandRunner>,
    broadcaster: Arc<LogBroadcaster>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    active: Arc<RwLock<HashMap<ExecutionId, ExecutionHandle>>>,
}

impl ProcessLauncher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        runner: Arc<dyn CommandRunner>,
        broadcaster: Arc<LogBroadcaster>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            runner,
            broadcaster,
            id_provider,
            time_provider,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the named command in `working_dir` without waiting for it
    ///
    /// # Errors
    /// - `AppError::NotFound` if no command has this name
    /// - `AppError::InvalidDirectory` if the directory is unusable
    ///
    /// Spawn failures are not errors here; they surface as a `Failed` outcome.
    pub async fn run(&self, name: &str, working_dir: impl AsRef<Path>) -> Result<ExecutionHandle> {
        let command = self.registry.find_command(name).await?;
        let working_dir = validate_working_dir(working_dir.as_ref())?;
        let (handle, ()) = self.start(command, working_dir, |_| ()).await;
        Ok(handle)
    }

    /// Like `run`, but the returned subscription sees every line from seq 0
    pub async fn run_attached(
        &self,
        name: &str,
        working_dir: impl AsRef<Path>,
    ) -> Result<(ExecutionHandle, LogSubscription)> {
        let command = self.registry.find_command(name).await?;
        let working_dir = validate_working_dir(working_dir.as_ref())?;
        Ok(self.start(command, working_dir, ExecutionLog::subscribe).await)
    }

    /// Register and spawn an execution
    ///
    /// `on_open` runs against the fresh log before the runner starts.
    async fn start<T>(
        &self,
        command: Command,
        working_dir: PathBuf,
        on_open: impl FnOnce(&ExecutionLog) -> T,
    ) -> (ExecutionHandle, T) {
        let execution_id = self.id_provider.generate_id();
        let log = self.broadcaster.open(&execution_id);
        let opened = on_open(log.as_ref());
        let (cancel_tx, cancel_token) = cancel_channel();

        let handle = ExecutionHandle {
            inner: Arc::new(HandleInner {
                execution_id: execution_id.clone(),
                command_name: command.name.clone(),
                command_text: command.command_text.clone(),
                working_dir: working_dir.clone(),
                started_at: self.time_provider.now_millis(),
                log: log.clone(),
                cancel: cancel_tx,
            }),
        };
        self.active
            .write()
            .await
            .insert(execution_id.clone(), handle.clone());

        info!(
            execution_id = %execution_id,
            command = %command.name,
            working_dir = %working_dir.display(),
            "Starting execution"
        );

        let spec = RunSpec {
            execution_id: execution_id.clone(),
            command_text: command.command_text,
            working_dir,
        };
        let runner = Arc::clone(&self.runner);
        let broadcaster = Arc::clone(&self.broadcaster);
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            // Inner task so a panicking runner cannot take the monitor down with it
            let run_log = Arc::clone(&log);
            let run = tokio::task::spawn(async move {
                runner.run(&spec, &*run_log, cancel_token).await
            });

            let outcome = match run.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(execution_id = %execution_id, error = %e, "Execution failed");
                    ExecutionOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
                Err(e) if e.is_panic() => {
                    error!(execution_id = %execution_id, "Runner panicked");
                    ExecutionOutcome::Failed {
                        reason: "runner panicked".to_string(),
                    }
                }
                Err(e) => {
                    error!(execution_id = %execution_id, error = %e, "Runner task aborted");
                    ExecutionOutcome::Failed {
                        reason: format!("runner task aborted: {}", e),
                    }
                }
            };

            active.write().await.remove(&execution_id);
            info!(
                execution_id = %execution_id,
                outcome = %outcome,
                lines = log.lines_published(),
                "Execution terminated"
            );
            if let Err(e) = broadcaster.finish(&execution_id, outcome) {
                warn!(execution_id = %execution_id, error = %e, "Failed to close execution log");
            }
        });

        (handle, opened)
    }

    /// Handle of a live execution
    pub async fn get(&self, execution_id: &str) -> Option<ExecutionHandle> {
        self.active.read().await.get(execution_id).cloned()
    }

    async fn require(&self, execution_id: &str) -> Result<ExecutionHandle> {
        self.get(execution_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", execution_id)))
    }

    pub async fn status(&self, execution_id: &str) -> Result<ExecutionInfo> {
        Ok(self.require(execution_id).await?.info())
    }

    /// Live executions, oldest first
    pub async fn list_active(&self) -> Vec<ExecutionInfo> {
        let mut infos: Vec<ExecutionInfo> = self
            .active
            .read()
            .await
            .values()
            .map(ExecutionHandle::info)
            .collect();
        infos.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.execution_id.cmp(&b.execution_id))
        });
        infos
    }

    /// Attach to a live execution
    pub async fn subscribe(&self, execution_id: &str) -> Result<LogSubscription> {
        Ok(self.require(execution_id).await?.subscribe())
    }

    /// Request cancellation of a live execution
    ///
    /// Returns false if cancellation had already been requested.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let handle = self.require(execution_id).await?;
        let first = handle.cancel();
        if first {
            info!(execution_id = %execution_id, "Cancellation requested");
        }
        Ok(first)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Cancel every live execution and wait for all of them to terminate
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<ExecutionHandle> = self.active.read().await.values().cloned().collect();
        if handles.is_empty() {
            return 0;
        }

        info!(count = handles.len(), "Cancelling running executions");
        for handle in &handles {
            handle.cancel();
        }
        for handle in &handles {
            handle.wait().await;
        }
        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::AddCommandRequest;
    use crate::domain::{LogEvent, LogLine};
    use crate::port::catalog_store::mocks::InMemoryCatalogStore;
    use crate::port::command_runner::mocks::MockCommandRunner;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::{CancelToken, ExecutionError, OutputSink};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn launcher_with(runner: Arc<dyn CommandRunner>) -> ProcessLauncher {
        let time: Arc<dyn TimeProvider> = Arc::new(ManualTimeProvider::new(7));
        let registry = Arc::new(CommandRegistry::new(
            Arc::new(InMemoryCatalogStore::new()),
            Arc::new(SequentialIdProvider::new("cmd")),
            time.clone(),
        ));
        registry
            .add_command(AddCommandRequest {
                name: "greet".to_string(),
                command_text: "echo a; echo b".to_string(),
                description: String::new(),
                tags: String::new(),
            })
            .await
            .unwrap();

        ProcessLauncher::new(
            registry,
            runner,
            Arc::new(LogBroadcaster::new(time.clone(), 64)),
            Arc::new(SequentialIdProvider::new("exec")),
            time,
        )
    }

    fn texts(events: &[LogEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                LogEvent::Line(LogLine { text, .. }) => Some(text.clone()),
                LogEvent::Terminal(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_run_attached_streams_lines_then_terminal() {
        let runner = Arc::new(MockCommandRunner::new_lines(&["a", "b"], 0));
        let launcher = launcher_with(runner.clone()).await;
        let dir = TempDir::new().unwrap();

        let (handle, sub) = launcher.run_attached("greet", dir.path()).await.unwrap();
        let events = sub.collect_all().await;

        assert_eq!(texts(&events), vec!["a", "b"]);
        let seqs: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                LogEvent::Line(l) => Some(l.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(
            events.last(),
            Some(&LogEvent::Terminal(ExecutionOutcome::Finished { exit_code: 0 }))
        );
        assert_eq!(handle.wait().await, ExecutionOutcome::Finished { exit_code: 0 });

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command_text, "echo a; echo b");
        assert_eq!(calls[0].working_dir, dir.path());
    }

    #[tokio::test]
    async fn test_two_subscribers_see_identical_streams() {
        let (runner, feed) = MockCommandRunner::new_fed(0);
        let launcher = launcher_with(Arc::new(runner)).await;
        let dir = TempDir::new().unwrap();

        let handle = launcher.run("greet", dir.path()).await.unwrap();
        let first = handle.subscribe();
        let second = launcher.subscribe(handle.id()).await.unwrap();

        for line in ["one", "two", "three"] {
            feed.send(line.to_string()).unwrap();
        }
        drop(feed);

        let (a, b) = tokio::join!(first.collect_all(), second.collect_all());
        assert_eq!(a, b);
        assert_eq!(texts(&a), vec!["one", "two", "three"]);
        assert!(a.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_late_subscriber_starts_at_current_line() {
        let (runner, feed) = MockCommandRunner::new_fed(0);
        let launcher = launcher_with(Arc::new(runner)).await;
        let dir = TempDir::new().unwrap();

        let (handle, mut early) = launcher.run_attached("greet", dir.path()).await.unwrap();
        feed.send("before".to_string()).unwrap();
        match early.recv().await {
            Some(LogEvent::Line(line)) => assert_eq!(line.text, "before"),
            other => panic!("unexpected event: {:?}", other),
        }

        let late = handle.subscribe();
        feed.send("after".to_string()).unwrap();
        drop(feed);

        let late = late.collect_all().await;
        assert_eq!(texts(&late), vec!["after"]);
        match &late[0] {
            LogEvent::Line(line) => assert_eq!(line.seq, 1),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            late.last(),
            Some(&LogEvent::Terminal(ExecutionOutcome::Finished { exit_code: 0 }))
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_outcome() {
        let launcher = launcher_with(Arc::new(MockCommandRunner::new_spawn_fail("boom"))).await;
        let dir = TempDir::new().unwrap();

        let (handle, sub) = launcher.run_attached("greet", dir.path()).await.unwrap();
        let events = sub.collect_all().await;

        let expected = ExecutionOutcome::Failed {
            reason: "Spawn failed: boom".to_string(),
        };
        assert_eq!(events, vec![LogEvent::Terminal(expected.clone())]);
        assert_eq!(handle.wait().await, expected);
    }

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let runner = Arc::new(MockCommandRunner::new_until_cancelled(&["started"]));
        let launcher = launcher_with(runner).await;
        let dir = TempDir::new().unwrap();

        let (handle, mut sub) = launcher.run_attached("greet", dir.path()).await.unwrap();
        assert!(matches!(sub.recv().await, Some(LogEvent::Line(_))));

        let info = launcher.status(handle.id()).await.unwrap();
        assert_eq!(info.state, ExecutionState::Running);
        assert_eq!(info.command_name, "greet");
        assert_eq!(launcher.list_active().await.len(), 1);

        assert!(launcher.cancel(handle.id()).await.unwrap());
        assert!(!launcher.cancel(handle.id()).await.unwrap_or(false));

        assert_eq!(handle.wait().await, ExecutionOutcome::Cancelled);
        assert_eq!(sub.recv().await, Some(LogEvent::Terminal(ExecutionOutcome::Cancelled)));
        assert_eq!(sub.recv().await, None);

        assert!(launcher.list_active().await.is_empty());
        let err = launcher.cancel(handle.id()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_command_is_not_found() {
        let runner = Arc::new(MockCommandRunner::new_lines(&[], 0));
        let launcher = launcher_with(runner.clone()).await;
        let dir = TempDir::new().unwrap();

        let err = launcher.run("missing", dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(runner.call_count(), 0);
        assert_eq!(launcher.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_working_directory() {
        let runner = Arc::new(MockCommandRunner::new_lines(&[], 0));
        let launcher = launcher_with(runner.clone()).await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        for bad in [
            dir.path().join("does-not-exist"),
            file,
            PathBuf::from("relative/dir"),
        ] {
            let err = launcher.run("greet", &bad).await.unwrap_err();
            assert!(
                matches!(err, AppError::InvalidDirectory(_)),
                "{} should be rejected",
                bad.display()
            );
        }
        assert_eq!(runner.call_count(), 0);
    }

    struct PanickingRunner;

    #[async_trait]
    impl CommandRunner for PanickingRunner {
        async fn run(
            &self,
            _spec: &RunSpec,
            sink: &dyn OutputSink,
            _cancel: CancelToken,
        ) -> std::result::Result<ExecutionOutcome, ExecutionError> {
            sink.emit("about to fail".to_string());
            panic!("runner bug");
        }
    }

    #[tokio::test]
    async fn test_runner_panic_becomes_failed_outcome() {
        let launcher = launcher_with(Arc::new(PanickingRunner)).await;
        let dir = TempDir::new().unwrap();

        let (handle, sub) = launcher.run_attached("greet", dir.path()).await.unwrap();
        let events = sub.collect_all().await;

        assert_eq!(texts(&events), vec!["about to fail"]);
        assert!(matches!(
            handle.wait().await,
            ExecutionOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let launcher =
            launcher_with(Arc::new(MockCommandRunner::new_until_cancelled(&[]))).await;
        let dir = TempDir::new().unwrap();

        let first = launcher.run("greet", dir.path()).await.unwrap();
        let second = launcher.run("greet", dir.path()).await.unwrap();
        assert_ne!(first.id(), second.id());

        let stopped = tokio::time::timeout(Duration::from_secs(5), launcher.shutdown())
            .await
            .unwrap();
        assert_eq!(stopped, 2);
        assert_eq!(first.wait().await, ExecutionOutcome::Cancelled);
        assert_eq!(second.wait().await, ExecutionOutcome::Cancelled);
    }
}
