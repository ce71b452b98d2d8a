/// Runner - Subprocess Execution
///
/// **Core Responsibility:**
/// Launch one identifier's command, capture both output streams in memory,
/// and enforce the wall-clock deadline.
///
/// **Critical Architectural Boundary:**
/// - Runner knows HOW to execute (child processes, pipes, kill on deadline)
/// - Runner does NOT classify outcomes
/// - Runner returns raw outcomes for the classifier to judge
///
/// On unix each child leads its own process group. A child that outlives its
/// deadline is killed together with everything it spawned, and reaped before
/// `run` returns. A child that cannot be started is an error, never an
/// outcome.
use anyhow::{Context, Result};
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use triage_common::types::RunOutcome;

/// Produces a `RunOutcome` for one identifier
///
/// The scheduler is generic over this so it can be driven by synthetic
/// runners in tests.
pub trait Runner: Send + Sync + 'static {
    fn run(&self, identifier: &str) -> impl Future<Output = Result<RunOutcome>> + Send;
}

/// Runs `command_template + [identifier]` as a child process
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command_template: Vec<String>,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(command_template: Vec<String>, timeout: Duration) -> Self {
        Self {
            command_template,
            timeout,
        }
    }
}

impl Runner for ProcessRunner {
    fn run(&self, identifier: &str) -> impl Future<Output = Result<RunOutcome>> + Send {
        run(identifier, &self.command_template, self.timeout)
    }
}

/// Execute one identifier with a hard deadline
///
/// Both pipes are drained concurrently with the wait so a chatty child can
/// never block on a full pipe. The deadline covers the drain as well, since
/// a grandchild holding the pipe open would otherwise keep us waiting.
pub async fn run(
    identifier: &str,
    command_template: &[String],
    timeout: Duration,
) -> Result<RunOutcome> {
    let (program, fixed_args) = command_template
        .split_first()
        .context("Command template is empty")?;

    let start = Instant::now();

    let mut command = Command::new(program);
    command
        .args(fixed_args)
        .arg(identifier)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to launch `{}` for {}", program, identifier))?;

    debug!(identifier, pid = child.id(), "Spawned child");
    let mut group = GroupGuard { pgid: child.id() };

    let stdout = child.stdout.take().context("Child stdout was not captured")?;
    let stderr = child.stderr.take().context("Child stderr was not captured")?;

    let collected = tokio::time::timeout(timeout, async {
        tokio::try_join!(child.wait(), read_stream(stdout), read_stream(stderr))
    })
    .await;

    match collected {
        Ok(result) => {
            let (status, stdout, stderr) = result
                .with_context(|| format!("Failed to collect output of {}", identifier))?;
            group.disarm();
            let elapsed = start.elapsed();
            let exit_status = exit_code(status);

            debug!(
                identifier,
                exit_status,
                elapsed_ms = elapsed.as_millis() as u64,
                stdout_bytes = stdout.len(),
                stderr_bytes = stderr.len(),
                "Child exited"
            );

            Ok(RunOutcome::exited(identifier, exit_status, stdout, stderr, elapsed))
        }
        Err(_) => {
            warn!(
                identifier,
                timeout_secs = timeout.as_secs_f64(),
                "Execution timed out - killing child"
            );

            terminate(&mut child, identifier).await;
            group.disarm();

            Ok(RunOutcome::timed_out(identifier, start.elapsed()))
        }
    }
}

/// Kills the child's process group if `run` is dropped before the child exits
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            let _ = kill_process_group(pgid);
        }
    }
}

/// Kill the child and its process group, then reap the child
async fn terminate(child: &mut Child, identifier: &str) {
    // The group id is the child's pid, which stays reserved until it is reaped
    if let Some(pid) = child.id() {
        if let Err(e) = kill_process_group(pid) {
            warn!(identifier, pid, error = %e, "Failed to kill process group");
        }
    }

    // kill() also waits, so the child is reaped here
    if let Err(e) = child.kill().await {
        warn!(identifier, error = %e, "Failed to kill timed-out child");
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // A negative pid addresses every process in the group
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> std::io::Result<()> {
    Ok(())
}

async fn read_stream<R: AsyncRead + Unpin>(mut stream: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Exit code, or `128 + signal` for a child killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
