use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use casegraph::{
    CaseGraph, CaseRunner, CaseState, DryRunner, Executor, ExecutorSettings, RunReport,
    RunTracker, ShellRunner,
};

use super::LoadedSuite;

/// Command-line overrides of the suite's `[run]` section.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub keep_stage_files: bool,
    pub max_concurrency: Option<usize>,
    pub max_failures: Option<usize>,
    pub stage_dir: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

pub fn run(suite: &LoadedSuite, opts: &RunOptions, json: bool) -> Result<()> {
    let graph = CaseGraph::build(&suite.registry, &suite.active, &suite.selection)?;

    let mut settings = ExecutorSettings::from_config(&suite.config);
    if opts.keep_stage_files {
        settings.keep_stage_files = true;
    }
    if let Some(n) = opts.max_concurrency {
        anyhow::ensure!(n > 0, "--max-concurrency must be at least 1");
        settings.max_concurrency = n;
    }
    if let Some(n) = opts.max_failures {
        settings.max_failures = n;
    }
    if let Some(ref dir) = opts.stage_dir {
        settings.stage_root = dir.clone();
    }

    let runner: Arc<dyn CaseRunner> = if opts.dry_run {
        Arc::new(DryRunner)
    } else {
        Arc::new(ShellRunner::new().with_timeout(suite.config.run.timeout.map(Duration::from_secs)))
    };

    let tracker = Arc::new(RunTracker::new(Arc::new(graph)));
    let executor = Executor::new(settings, runner);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let summary = runtime.block_on(executor.run(&suite.registry, Arc::clone(&tracker)))?;

    let report = RunReport::from_tracker(&suite.config.system.name, &tracker);
    if let Some(ref path) = opts.report {
        report.save(path)?;
    }

    if json {
        println!("{}", report.to_json()?);
    } else {
        for case in &report.cases {
            let label = match case.state {
                CaseState::Succeeded => "OK",
                CaseState::Failed => "FAILED",
                CaseState::Skipped => "SKIP",
                CaseState::Aborted => "ABORTED",
                CaseState::DependencyFailed => "DEP FAIL",
                CaseState::Pending | CaseState::Running => "?",
            };
            let line = format!(
                "[{:^10}] {} @{}+{}",
                label, case.test, case.partition, case.environ
            );
            match case.reason {
                Some(ref reason) => println!("{}: {}", line, reason),
                None => println!("{}", line),
            }
        }
        println!(
            "Ran {} case(s): {} succeeded, {} failed, {} skipped, {} dependency-failed, {} aborted",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.dependency_failed,
            summary.aborted
        );
    }

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} case(s) did not succeed",
            summary.failed + summary.dependency_failed + summary.aborted,
            summary.total
        );
    }
    Ok(())
}
