pub mod graph;
pub mod split;
pub mod enumerate;
pub mod casegraph;
pub mod cycle;
pub mod check;
pub mod schedule;
pub mod cleanup;
pub mod tracker;
pub mod report;
pub mod config;
pub mod service;

pub use graph::{CaseKey, CaseState, Coords, GraphError, Test, TestFilter, TestRegistry};
pub use split::SplitPolicy;
pub use enumerate::{ActiveSet, CaseSpace, environ_filters};
pub use casegraph::{CaseGraph, CaseId};
pub use check::{check_all, validate, CheckResult};
pub use schedule::{Schedule, ScheduleView};
pub use cleanup::{CleanupGate, CleanupState};
pub use tracker::{RunTracker, Summary};
pub use report::{CaseReport, RunReport};
pub use config::{ConfigError, SuiteConfig};
pub use service::{
    CaseRunner, DryRunner, Executor, ExecutorSettings, Outcome, PollController, ShellRunner,
};
