//! Case runners: how a single case is executed and cleaned up.
//!
//! Runners define what it means to run a case. The execution service hands a
//! runner one case at a time together with the case's stage directory and
//! reports the returned [`Outcome`] to the run tracker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::poll::PollController;
use crate::graph::{CaseKey, CaseState, Test};

/// Exit status a command uses to report that it skipped itself.
pub const SKIP_EXIT_CODE: i32 = 77;

/// Terminal outcome of running one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: CaseState,
    pub reason: Option<String>,
}

impl Outcome {
    pub fn succeeded() -> Self {
        Self {
            state: CaseState::Succeeded,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: CaseState::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            state: CaseState::Skipped,
            reason: Some(reason.into()),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            state: CaseState::Aborted,
            reason: Some(reason.into()),
        }
    }
}

/// Trait for case runners.
#[async_trait]
pub trait CaseRunner: Send + Sync {
    /// Get the name of this runner.
    fn name(&self) -> &str;

    /// Run one case in `stagedir`. An `Err` is reported as a failure.
    async fn run(&self, key: &CaseKey, test: &Test, stagedir: &Path) -> Result<Outcome>;

    /// Remove a case's stage directory once its cleanup is authorized.
    async fn cleanup(&self, key: &CaseKey, stagedir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(stagedir).await {
            Ok(()) => {
                debug!("Removed stage directory of {}: {}", key, stagedir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove stage directory {}", stagedir.display())
            }),
        }
    }
}

/// Runs each test's `command` through `sh -c` inside the stage directory.
///
/// The child is polled with [`PollController`] back-off rather than awaited,
/// so a time limit can be enforced between polls. Output goes to
/// `stdout.log` and `stderr.log` in the stage directory.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
    env: HashMap<String, String>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra environment variable passed to every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl CaseRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, key: &CaseKey, test: &Test, stagedir: &Path) -> Result<Outcome> {
        tokio::fs::create_dir_all(stagedir)
            .await
            .with_context(|| format!("Failed to create stage directory {}", stagedir.display()))?;

        let Some(command) = test.command.as_deref() else {
            debug!("{} has no command; nothing to run", key);
            return Ok(Outcome::succeeded());
        };

        let stdout = File::create(stagedir.join("stdout.log"))
            .with_context(|| format!("Failed to create stdout.log in {}", stagedir.display()))?;
        let stderr = File::create(stagedir.join("stderr.log"))
            .with_context(|| format!("Failed to create stderr.log in {}", stagedir.display()))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(stagedir)
            .env("CASEGRAPH_TEST", &key.test)
            .env("CASEGRAPH_PARTITION", &key.partition)
            .env("CASEGRAPH_ENVIRON", &key.environ)
            .env("CASEGRAPH_STAGEDIR", stagedir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn command for {}: {}", key, command))?;

        let started = Instant::now();
        let mut poll = PollController::new();
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("Failed to check process status of {}", key))?
            {
                return Ok(match status.code() {
                    Some(0) => Outcome::succeeded(),
                    Some(SKIP_EXIT_CODE) => {
                        Outcome::skipped(format!("command exited with status {}", SKIP_EXIT_CODE))
                    }
                    Some(code) => Outcome::failed(format!("command exited with status {}", code)),
                    None => Outcome::failed("command was terminated by a signal"),
                });
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    child
                        .kill()
                        .await
                        .with_context(|| format!("Failed to kill process of {}", key))?;
                    return Ok(Outcome::failed(format!(
                        "timed out after {}s",
                        limit.as_secs_f64()
                    )));
                }
            }
            poll.snooze().await;
        }
    }
}

/// Succeeds every case without running anything and leaves the filesystem
/// alone. Used to rehearse a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunner;

#[async_trait]
impl CaseRunner for DryRunner {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn run(&self, key: &CaseKey, _test: &Test, _stagedir: &Path) -> Result<Outcome> {
        debug!("Dry run of {}", key);
        Ok(Outcome::succeeded())
    }

    async fn cleanup(&self, _key: &CaseKey, _stagedir: &Path) -> Result<()> {
        Ok(())
    }
}
