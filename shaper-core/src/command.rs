//! Utilities for running the external control commands (`tc`, `ping`,
//! `systemctl`) this crate orchestrates.

use std::{io, process::ExitStatus, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty command provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status")]
    NonZero(Output),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for Output {
    fn from(value: std::process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Capability to run an external command line.
///
/// The shaping planner and the lease monitor depend on this seam abstractly,
/// so tests can substitute an executor that records issued operations instead
/// of mutating real kernel state.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Runs the command provided as a string, separating args on whitespace.
    async fn run(&self, cmd: &str) -> Result<Output>;
}

/// [`Executor`] backed by real processes.
///
/// Every command gets a hard deadline: on expiry the child is killed and
/// [`Error::Timeout`] is returned, so no caller can be stalled indefinitely
/// by a wedged external utility.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Executor for SystemExecutor {
    async fn run(&self, cmd: &str) -> Result<Output> {
        let mut iter = cmd.split_ascii_whitespace();
        let program = iter.next().ok_or(Error::Empty)?;
        let mut command = tokio::process::Command::new(program);
        command.args(iter).kill_on_drop(true);

        tracing::debug!(?cmd, "running command");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        let output: Output = output.into();

        if !output.status.success() {
            tracing::debug!(?output.stderr, ?output.status, ?cmd, "command returned non-zero status");
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::os::unix::process::ExitStatusExt;

    use parking_lot::Mutex;

    use super::*;

    /// Test double that records every issued command instead of spawning
    /// processes. Responses are scripted by substring match; unmatched
    /// commands succeed with empty output.
    #[derive(Default)]
    pub(crate) struct RecordingExecutor {
        issued: Mutex<Vec<String>>,
        stdout_rules: Vec<(String, String)>,
        failure_rules: Vec<(String, String)>,
        delay: Option<Duration>,
    }

    impl RecordingExecutor {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Commands containing `needle` succeed with the given stdout.
        pub(crate) fn stdout_for(mut self, needle: &str, stdout: &str) -> Self {
            self.stdout_rules.push((needle.to_string(), stdout.to_string()));
            self
        }

        /// Commands containing `needle` fail with the given stderr.
        pub(crate) fn fail_on(mut self, needle: &str, stderr: &str) -> Self {
            self.failure_rules.push((needle.to_string(), stderr.to_string()));
            self
        }

        /// Delays every command, to widen concurrency windows in tests.
        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn issued(&self) -> Vec<String> {
            self.issued.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, cmd: &str) -> Result<Output> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.issued.lock().push(cmd.to_string());

            for (needle, stderr) in &self.failure_rules {
                if cmd.contains(needle.as_str()) {
                    return Err(Error::NonZero(Output {
                        status: ExitStatus::from_raw(0x100),
                        stdout: String::new(),
                        stderr: stderr.clone(),
                    }));
                }
            }

            let stdout = self
                .stdout_rules
                .iter()
                .find(|(needle, _)| cmd.contains(needle.as_str()))
                .map(|(_, stdout)| stdout.clone())
                .unwrap_or_default();

            Ok(Output { status: ExitStatus::from_raw(0), stdout, stderr: String::new() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let executor = SystemExecutor::default();
        assert!(matches!(executor.run("").await, Err(Error::Empty)));
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let executor = SystemExecutor::default();
        let output = executor.run("echo hello").await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let executor = SystemExecutor::default();
        assert!(matches!(executor.run("false").await, Err(Error::NonZero(_))));
    }

    #[tokio::test]
    async fn slow_command_hits_the_deadline() {
        let executor = SystemExecutor::new(Duration::from_millis(50));
        assert!(matches!(executor.run("sleep 5").await, Err(Error::Timeout(_))));
    }
}
