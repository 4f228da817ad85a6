//! Execution service
//!
//! Runs a validated case graph on a tokio runtime:
//! - Case runners that execute a single case (shell, dry run)
//! - The executor that releases ready cases under concurrency limits
//! - Poll rate control for jobs waited on by polling

pub mod executor;
pub mod poll;
pub mod runner;

pub use executor::{Executor, ExecutorSettings};
pub use poll::PollController;
pub use runner::{CaseRunner, DryRunner, Outcome, SKIP_EXIT_CODE, ShellRunner};
