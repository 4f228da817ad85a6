//! Bounded-concurrency execution of a case graph.
//!
//! The executor walks the topological schedule and releases every pending
//! case whose dependencies have all succeeded, subject to a global
//! concurrency limit and a per-partition job limit. Each released case runs
//! on its own task; the task reports its outcome to the [`RunTracker`] and
//! removes the stage directories the cleanup gate authorizes.

use anyhow::Result;
use futures_util::FutureExt;
use futures_util::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use super::runner::{CaseRunner, Outcome};
use crate::casegraph::CaseId;
use crate::config::SuiteConfig;
use crate::graph::{CaseKey, CaseState, TestRegistry};
use crate::schedule::Schedule;
use crate::tracker::{RunTracker, Summary};

/// Settings of one run.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub system: String,
    pub max_concurrency: usize,
    /// Abort the remaining cases after this many failures (0 = unlimited)
    pub max_failures: usize,
    pub keep_stage_files: bool,
    pub stage_root: PathBuf,
    /// `(partition, max_jobs)`; partitions not listed are only bound by
    /// `max_concurrency`
    pub partition_limits: Vec<(String, usize)>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            system: "generic".to_string(),
            max_concurrency: 4,
            max_failures: 0,
            keep_stage_files: false,
            stage_root: PathBuf::from("stage"),
            partition_limits: Vec::new(),
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            system: config.system.name.clone(),
            max_concurrency: config.run.max_concurrency,
            max_failures: config.run.max_failures,
            keep_stage_files: config.run.keep_stage_files,
            stage_root: config.run.stage_dir.clone(),
            partition_limits: config.partition_limits(),
        }
    }

    /// Stage directory of a case: `<root>/<system>/<partition>/<environ>/<test>`.
    pub fn stagedir(&self, key: &CaseKey) -> PathBuf {
        self.stage_root
            .join(&self.system)
            .join(&key.partition)
            .join(&key.environ)
            .join(&key.test)
    }
}

/// Permits held by a running case.
struct Slot {
    _global: OwnedSemaphorePermit,
    _partition: Option<OwnedSemaphorePermit>,
}

/// Drives a [`RunTracker`] to completion with a [`CaseRunner`].
pub struct Executor {
    settings: Arc<ExecutorSettings>,
    runner: Arc<dyn CaseRunner>,
}

impl Executor {
    pub fn new(settings: ExecutorSettings, runner: Arc<dyn CaseRunner>) -> Self {
        Self {
            settings: Arc::new(settings),
            runner,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run every case of the tracker's graph and return the final summary.
    ///
    /// Returns once every case is terminal. Runner errors and panics become
    /// case failures and aborts; they never end the run early. Reaching
    /// `max_failures` does: every running and pending case is aborted.
    pub async fn run(&self, registry: &TestRegistry, tracker: Arc<RunTracker>) -> Result<Summary> {
        let schedule = Schedule::new(tracker.graph())?;
        let global = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let partitions: HashMap<String, Arc<Semaphore>> = self
            .settings
            .partition_limits
            .iter()
            .map(|(name, jobs)| (name.clone(), Arc::new(Semaphore::new((*jobs).max(1)))))
            .collect();

        info!(
            "Running {} case(s) with {} (max concurrency {})",
            schedule.len(),
            self.runner.name(),
            self.settings.max_concurrency
        );

        let mut running: JoinSet<()> = JoinSet::new();
        let mut aborted = false;
        loop {
            if !aborted {
                self.dispatch(&schedule, registry, &tracker, &global, &partitions, &mut running);
            }
            match running.join_next().await {
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => warn!("Case task did not complete: {}", e),
                None => break,
            }
            let max = self.settings.max_failures;
            if !aborted && max > 0 && tracker.failures() >= max {
                aborted = true;
                let reason = format!("failure limit of {} reached", max);
                let pending = tracker.abort_pending(&reason);
                let stopped = tracker.abort_running(&reason);
                // Dropping a job kills its child process.
                running.abort_all();
                warn!(
                    "Reached the failure limit ({}); aborted {} running and {} pending case(s)",
                    max,
                    stopped.len(),
                    pending.len()
                );
            }
        }

        let summary = tracker.summary();
        info!(
            "Run finished: {} succeeded, {} failed, {} skipped, {} dependency-failed, {} aborted",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.dependency_failed,
            summary.aborted
        );
        Ok(summary)
    }

    /// Start every ready case for which permits are available.
    fn dispatch(
        &self,
        schedule: &Schedule,
        registry: &TestRegistry,
        tracker: &Arc<RunTracker>,
        global: &Arc<Semaphore>,
        partitions: &HashMap<String, Arc<Semaphore>>,
        running: &mut JoinSet<()>,
    ) {
        for id in schedule.iter() {
            if tracker.state(id) != CaseState::Pending || !tracker.is_satisfied(id) {
                continue;
            }
            let key = tracker.graph().key(id).clone();
            let partition = match partitions.get(&key.partition) {
                Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => continue,
                },
                None => None,
            };
            // Global capacity is exhausted: nothing else can start now.
            let Ok(permit) = Arc::clone(global).try_acquire_owned() else {
                return;
            };
            let Some(test) = registry.get_test(&key.test).cloned() else {
                warn!("{} belongs to a test missing from the registry", key);
                continue;
            };
            if !tracker.try_start(id) {
                continue;
            }
            info!("Running {}", key);
            let slot = Slot {
                _global: permit,
                _partition: partition,
            };
            let tracker = Arc::clone(tracker);
            let runner = Arc::clone(&self.runner);
            let settings = Arc::clone(&self.settings);
            running.spawn(async move {
                let stagedir = settings.stagedir(&key);
                let outcome = AssertUnwindSafe(runner.run(&key, &test, &stagedir))
                    .catch_unwind()
                    .await;
                drop(slot);
                let outcome = match outcome {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => Outcome::failed(format!("{:#}", e)),
                    Err(_) => Outcome::aborted("runner panicked"),
                };
                finish(&tracker, runner.as_ref(), &settings, id, &key, outcome).await;
            });
        }
    }
}

/// Report an outcome and carry out the cleanups it authorizes.
async fn finish(
    tracker: &RunTracker,
    runner: &dyn CaseRunner,
    settings: &ExecutorSettings,
    id: CaseId,
    key: &CaseKey,
    outcome: Outcome,
) {
    match &outcome.reason {
        Some(reason) => info!("[{}] {}: {}", outcome.state, key, reason),
        None => info!("[{}] {}", outcome.state, key),
    }
    let done = tracker.complete(id, outcome.state, outcome.reason);
    if done.cleanup.is_empty() {
        return;
    }

    let graph = tracker.graph();
    let targets: Vec<(CaseKey, PathBuf)> = done
        .cleanup
        .iter()
        .map(|&c| {
            let k = graph.key(c).clone();
            let dir = settings.stagedir(&k);
            (k, dir)
        })
        .collect();

    if settings.keep_stage_files {
        for (k, dir) in &targets {
            info!("Keeping stage directory of {}: {}", k, dir.display());
        }
        return;
    }
    let results = join_all(targets.iter().map(|(k, dir)| remove(runner, k, dir))).await;
    for ((k, _), result) in targets.iter().zip(results) {
        if let Err(e) = result {
            warn!("Cleanup of {} failed: {:#}", k, e);
        }
    }
}

async fn remove(runner: &dyn CaseRunner, key: &CaseKey, dir: &Path) -> Result<()> {
    info!("Cleaning up stage directory of {}", key);
    runner.cleanup(key, dir).await
}
