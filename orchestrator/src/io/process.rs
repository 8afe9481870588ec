//! Child processes with a deadline and bounded output.
//!
//! Every git query goes through here so one hung subprocess cannot stall a
//! heartbeat cycle past its interval.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
///
/// Both pipes are drained on reader threads while the child runs; bytes past
/// `output_limit_bytes` are counted and discarded.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, _) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 {
        warn!(stdout_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_reader_counts_discarded_bytes() {
        let data = vec![b'x'; 10_000];
        let (kept, truncated) = read_stream_limited(data.as_slice(), 4096).expect("read");
        assert_eq!(kept.len(), 4096);
        assert_eq!(truncated, 10_000 - 4096);
    }

    #[test]
    fn hung_child_is_killed_at_the_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = std::time::Instant::now();
        let out = run_command_with_timeout(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn stdout_and_stderr_are_captured_separately() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo ' err ' >&2"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 1024).expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout_text(), "out\n");
        assert_eq!(out.stderr_text(), "err");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-binary-for-tests");
        assert!(run_command_with_timeout(cmd, Duration::from_secs(1), 1024).is_err());
    }
}
