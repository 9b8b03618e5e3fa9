// Shell command runner
// reason: tokio::process for async child management, nix for process-group signals
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cmdvault_core::domain::ExecutionOutcome;
use cmdvault_core::port::{CancelToken, CommandRunner, ExecutionError, OutputSink, RunSpec};

/// Default shell used to interpret command text
pub const DEFAULT_SHELL: &str = "sh";

/// Default delay between SIGTERM and SIGKILL on cancellation
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(3);

// Lines buffered between the pipe readers and the capture loop
const LINE_BUFFER: usize = 256;

/// Longest line forwarded as one entry; longer output is split
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Runs command text through `<shell> -c` and streams its merged output
///
/// stdout and stderr are read concurrently and funneled into one capture loop,
/// so each stream keeps its own order while the interleaving between them
/// follows arrival.
pub struct ShellCommandRunner {
    shell: String,
    kill_grace: Duration,
}

impl ShellCommandRunner {
    pub fn new(shell: impl Into<String>, kill_grace: Duration) -> Self {
        Self {
            shell: shell.into(),
            kill_grace,
        }
    }

    fn spawn(&self, spec: &RunSpec) -> Result<Child, ExecutionError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&spec.command_text)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so cancellation reaches everything the shell starts
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", self.shell, e)))
    }

    /// Ask the process (group) to stop; SIGKILL follows after `kill_grace`
    fn request_stop(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            match signal_group(child.id(), Signal::SIGTERM) {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "SIGTERM failed, killing directly"),
            }
        }
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "Failed to kill process");
        }
    }

    fn force_kill(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            if let Err(e) = signal_group(child.id(), Signal::SIGKILL) {
                debug!(error = %e, "SIGKILL to process group failed");
            }
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Process already gone");
        }
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL, DEFAULT_KILL_GRACE)
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> Result<(), ExecutionError> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pid = pid.ok_or_else(|| ExecutionError::Killed("process already reaped".to_string()))?;
    let pid = i32::try_from(pid)
        .map_err(|_| ExecutionError::Killed(format!("pid {} out of range", pid)))?;
    killpg(Pid::from_raw(pid), signal)
        .map_err(|e| ExecutionError::Killed(format!("{:?} failed: {}", signal, e)))
}

/// Strip the line terminator and decode lossily
fn decode_line(mut bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_suffix(b"\n") {
        bytes = rest;
    }
    if let Some(rest) = bytes.strip_suffix(b"\r") {
        bytes = rest;
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Forward every line of `reader` into `tx` until EOF
///
/// A line longer than [`MAX_LINE_BYTES`] is forwarded in chunks of that size.
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let mut chunk = (&mut reader).take(MAX_LINE_BYTES as u64);
            match chunk.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(decode_line(&buf)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Output pipe read failed");
                    break;
                }
            }
        }
    })
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn outcome_from_status(status: ExitStatus) -> ExecutionOutcome {
    if let Some(exit_code) = status.code() {
        return ExecutionOutcome::Finished { exit_code };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionOutcome::Failed {
                reason: format!("terminated by signal {}", signal),
            };
        }
    }

    ExecutionOutcome::Failed {
        reason: "exited without a status code".to_string(),
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        spec: &RunSpec,
        sink: &dyn OutputSink,
        mut cancel: CancelToken,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let mut child = self.spawn(spec)?;
        info!(
            execution_id = %spec.execution_id,
            pid = ?child.id(),
            working_dir = %spec.working_dir.display(),
            "Spawned shell command"
        );

        let (tx, mut rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        let mut output_done = false;
        let mut cancel_requested = false;
        let mut kill_at: Option<Instant> = None;

        // Drain output before reaping so no trailing line is lost
        let status = loop {
            tokio::select! {
                line = rx.recv(), if !output_done => match line {
                    Some(line) => sink.emit(line),
                    None => output_done = true,
                },
                status = child.wait(), if output_done => {
                    break status.map_err(|e| ExecutionError::Io(e.to_string()))?;
                }
                _ = cancel.cancelled(), if !cancel_requested => {
                    info!(execution_id = %spec.execution_id, "Stopping process (SIGTERM)");
                    cancel_requested = true;
                    self.request_stop(&mut child);
                    kill_at = Some(Instant::now() + self.kill_grace);
                }
                _ = grace_elapsed(kill_at) => {
                    warn!(
                        execution_id = %spec.execution_id,
                        "Process did not exit after SIGTERM, sending SIGKILL"
                    );
                    kill_at = None;
                    self.force_kill(&mut child);
                }
            }
        };

        let outcome = if cancel_requested {
            ExecutionOutcome::Cancelled
        } else {
            outcome_from_status(status)
        };
        info!(
            execution_id = %spec.execution_id,
            outcome = %outcome,
            "Shell command completed"
        );
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use cmdvault_core::port::cancel_channel;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl CollectingSink {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl OutputSink for CollectingSink {
        fn emit(&self, text: String) {
            self.lines.lock().unwrap().push(text);
        }
    }

    fn spec(command_text: &str, dir: &Path) -> RunSpec {
        RunSpec {
            execution_id: "exec-test".to_string(),
            command_text: command_text.to_string(),
            working_dir: dir.to_path_buf(),
        }
    }

    async fn run(command_text: &str) -> (Result<ExecutionOutcome, ExecutionError>, Vec<String>) {
        let dir = TempDir::new().unwrap();
        let sink = CollectingSink::default();
        let (_tx, token) = cancel_channel();
        let result = ShellCommandRunner::default()
            .run(&spec(command_text, dir.path()), &sink, token)
            .await;
        (result, sink.lines())
    }

    #[tokio::test]
    async fn test_lines_and_exit_code() {
        let (result, lines) = run("echo a; echo b").await;
        assert_eq!(result.unwrap(), ExecutionOutcome::Finished { exit_code: 0 });
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let (result, lines) = run("exit 3").await;
        assert_eq!(result.unwrap(), ExecutionOutcome::Finished { exit_code: 3 });
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let (result, mut lines) = run("echo out; echo err 1>&2").await;
        assert!(result.unwrap().is_success());
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_stdout_order_preserved() {
        let (result, lines) = run("i=0; while [ $i -lt 200 ]; do echo $i; i=$((i+1)); done").await;
        assert!(result.unwrap().is_success());
        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_line_endings_and_invalid_utf8() {
        let (_, lines) = run("printf 'crlf\\r\\n'; printf 'bad \\377 byte\\n'; printf 'tail'").await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "crlf");
        assert!(lines[1].starts_with("bad "));
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(lines[2], "tail");
    }

    #[tokio::test]
    async fn test_long_line_is_split() {
        let (result, lines) = run("head -c 200000 /dev/zero | tr '\\0' x").await;
        assert_eq!(result.unwrap(), ExecutionOutcome::Finished { exit_code: 0 });
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_BYTES));
        assert_eq!(lines.iter().map(String::len).sum::<usize>(), 200_000);
        assert!(lines.iter().all(|l| l.bytes().all(|b| b == b'x')));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        let sink = CollectingSink::default();
        let (_tx, token) = cancel_channel();

        ShellCommandRunner::default()
            .run(&spec("pwd", dir.path()), &sink, token)
            .await
            .unwrap();

        let printed = std::fs::canonicalize(&sink.lines()[0]).unwrap();
        assert_eq!(printed, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let sink = CollectingSink::default();
        let (_tx, token) = cancel_channel();
        let runner = ShellCommandRunner::new("/nonexistent/shell", DEFAULT_KILL_GRACE);

        let err = runner
            .run(&spec("echo hi", dir.path()), &sink, token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::SpawnFailed(_)));
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_killed_by_signal() {
        let (result, _) = run("kill -9 $$").await;
        assert_eq!(
            result.unwrap(),
            ExecutionOutcome::Failed {
                reason: "terminated by signal 9".to_string()
            }
        );
    }

    async fn wait_for_first_line(sink: &CollectingSink) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.lines().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("process never printed");
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let (cancel, token) = cancel_channel();
        let runner = Arc::new(ShellCommandRunner::default());

        let task = {
            let sink = Arc::clone(&sink);
            let spec = spec("echo started; sleep 30", dir.path());
            tokio::spawn(async move { runner.run(&spec, &*sink, token).await })
        };

        wait_for_first_line(&sink).await;
        assert!(cancel.cancel());

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert_eq!(sink.lines(), vec!["started"]);
    }

    #[tokio::test]
    async fn test_cancel_escalates_to_sigkill() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let (cancel, token) = cancel_channel();
        let runner = Arc::new(ShellCommandRunner::new(
            DEFAULT_SHELL,
            Duration::from_millis(200),
        ));

        let task = {
            let sink = Arc::clone(&sink);
            let spec = spec("trap '' TERM; echo ready; sleep 30", dir.path());
            tokio::spawn(async move { runner.run(&spec, &*sink, token).await })
        };

        wait_for_first_line(&sink).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
    }
}
