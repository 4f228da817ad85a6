//! Run tracker: per-case execution state for one run over a [`CaseGraph`].
//!
//! The graph topology is shared read-only; each case's mutable entry sits
//! behind its own lock. A case may only move from `pending` to `running` once
//! every case it depends on has succeeded. Completing a case feeds the
//! [`CleanupGate`] and, for unsuccessful outcomes, marks every transitive
//! dependent in a single pass.

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::casegraph::{CaseGraph, CaseId};
use crate::cleanup::{CleanupGate, CleanupState};
use crate::graph::CaseState;

/// Mutable per-case entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaseEntry {
    pub state: CaseState,
    /// RFC 3339 timestamp of the transition to `running`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// RFC 3339 timestamp of the transition to a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Why the case failed, was skipped or was never attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Effects of reporting one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Cases whose stage directories may now be removed
    pub cleanup: Vec<CaseId>,
    /// Dependents marked terminal without running, with their new state
    pub propagated: Vec<(CaseId, CaseState)>,
}

/// Per-state counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub dependency_failed: usize,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.aborted == 0 && self.dependency_failed == 0
    }
}

#[derive(Debug)]
pub struct RunTracker {
    graph: Arc<CaseGraph>,
    entries: Vec<Mutex<CaseEntry>>,
    gate: CleanupGate,
    failures: AtomicUsize,
}

impl RunTracker {
    pub fn new(graph: Arc<CaseGraph>) -> Self {
        let entries = graph.ids().map(|_| Mutex::new(CaseEntry::default())).collect();
        let gate = CleanupGate::new(&graph);
        Self {
            graph,
            entries,
            gate,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn graph(&self) -> &CaseGraph {
        &self.graph
    }

    fn lock(&self, id: CaseId) -> MutexGuard<'_, CaseEntry> {
        self.entries[id.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, id: CaseId) -> CaseState {
        self.lock(id).state
    }

    pub fn entry(&self, id: CaseId) -> CaseEntry {
        self.lock(id).clone()
    }

    pub fn cleanup_state(&self, id: CaseId) -> CleanupState {
        self.gate.state(id)
    }

    /// Whether every dependency of `id` has succeeded.
    pub fn is_satisfied(&self, id: CaseId) -> bool {
        self.graph
            .dependencies(id)
            .into_iter()
            .all(|d| self.state(d) == CaseState::Succeeded)
    }

    /// Pending cases whose dependencies are satisfied, in enumeration order.
    pub fn ready(&self) -> Vec<CaseId> {
        self.graph
            .ids()
            .filter(|&id| self.state(id) == CaseState::Pending && self.is_satisfied(id))
            .collect()
    }

    /// Claim `id` for execution. Returns `false` if it is not pending or its
    /// dependencies are not all successful.
    pub fn try_start(&self, id: CaseId) -> bool {
        // Succeeded is terminal, so a satisfied dependency set stays satisfied.
        if !self.is_satisfied(id) {
            return false;
        }
        let mut entry = self.lock(id);
        if entry.state != CaseState::Pending {
            return false;
        }
        entry.state = CaseState::Running;
        entry.started_at = Some(Utc::now().to_rfc3339());
        debug!("Started {}", self.graph.key(id));
        true
    }

    /// Report the terminal outcome of a case.
    ///
    /// Outcomes for cases that are already terminal are ignored, and so are
    /// successes and skips for cases that were never started: only failures
    /// and aborts may end a pending case. Failures,
    /// aborts and skips are pushed down to every transitive dependent still
    /// pending: failures and aborts as `dependency-failed`, skips as `skipped`.
    pub fn complete(&self, id: CaseId, outcome: CaseState, reason: Option<String>) -> Completion {
        let mut completion = Completion::default();
        if !outcome.is_terminal() {
            warn!(
                "Ignoring non-terminal outcome '{}' for {}",
                outcome,
                self.graph.key(id)
            );
            return completion;
        }
        {
            let mut entry = self.lock(id);
            if entry.state.is_terminal() {
                return completion;
            }
            if entry.state == CaseState::Pending
                && matches!(outcome, CaseState::Succeeded | CaseState::Skipped)
            {
                warn!(
                    "Ignoring outcome '{}' for {}: case was never started",
                    outcome,
                    self.graph.key(id)
                );
                return completion;
            }
            entry.state = outcome;
            entry.completed_at = Some(Utc::now().to_rfc3339());
            entry.reason = reason;
        }
        if outcome == CaseState::Failed {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        completion.cleanup = self.gate.on_completion(&self.graph, id, outcome);

        let cascade = match outcome {
            CaseState::Failed | CaseState::Aborted | CaseState::DependencyFailed => {
                Some(CaseState::DependencyFailed)
            }
            CaseState::Skipped => Some(CaseState::Skipped),
            _ => None,
        };
        if let Some(state) = cascade {
            completion.propagated = self.propagate(id, state);
        }
        completion
    }

    /// Mark every pending transitive dependent of `id` with `state`.
    ///
    /// The dependent set is computed once from the immutable topology. None of
    /// these cases can be started concurrently: each has `id` as an ancestor,
    /// and `id` can no longer succeed.
    fn propagate(&self, id: CaseId, state: CaseState) -> Vec<(CaseId, CaseState)> {
        let origin = self.graph.key(id).clone();
        let reason = match state {
            CaseState::Skipped => format!("skipped due to skipped dependency {}", origin),
            _ => format!("dependency {} did not succeed", origin),
        };
        let now = Utc::now().to_rfc3339();

        let mut marked = Vec::new();
        for dep in self.graph.transitive_dependents(id) {
            let mut entry = self.lock(dep);
            if entry.state != CaseState::Pending {
                continue;
            }
            entry.state = state;
            entry.completed_at = Some(now.clone());
            entry.reason = Some(reason.clone());
            marked.push((dep, state));
        }
        if !marked.is_empty() && state == CaseState::DependencyFailed {
            warn!(
                "{} dependent case(s) of {} will not run",
                marked.len(),
                origin
            );
        }
        for &(dep, state) in &marked {
            // Neither the marked case nor the cases it depends on may be
            // cleaned up now.
            self.gate.on_never_started(&self.graph, dep, state);
        }
        marked
    }

    /// Abort every case that has not started yet. Used when the run is cut
    /// short (failure limit, cancellation).
    pub fn abort_pending(&self, reason: &str) -> Vec<CaseId> {
        let now = Utc::now().to_rfc3339();
        let mut aborted = Vec::new();
        for id in self.graph.ids() {
            let mut entry = self.lock(id);
            if entry.state == CaseState::Pending {
                entry.state = CaseState::Aborted;
                entry.completed_at = Some(now.clone());
                entry.reason = Some(reason.to_string());
                aborted.push(id);
            }
        }
        for &id in &aborted {
            self.gate.on_never_started(&self.graph, id, CaseState::Aborted);
        }
        aborted
    }

    /// Abort every case that is currently running. The caller is responsible
    /// for stopping the jobs themselves; late outcomes for these cases are
    /// ignored since they are already terminal.
    pub fn abort_running(&self, reason: &str) -> Vec<CaseId> {
        let now = Utc::now().to_rfc3339();
        let mut aborted = Vec::new();
        for id in self.graph.ids() {
            let mut entry = self.lock(id);
            if entry.state == CaseState::Running {
                entry.state = CaseState::Aborted;
                entry.completed_at = Some(now.clone());
                entry.reason = Some(reason.to_string());
                aborted.push(id);
            }
        }
        for &id in &aborted {
            self.gate.on_completion(&self.graph, id, CaseState::Aborted);
            self.propagate(id, CaseState::DependencyFailed);
        }
        aborted
    }

    /// Number of cases reported as `failed` so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Whether every case has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.graph.ids().all(|id| self.state(id).is_terminal())
    }

    pub fn summary(&self) -> Summary {
        let mut s = Summary::default();
        for id in self.graph.ids() {
            s.total += 1;
            match self.state(id) {
                CaseState::Pending => s.pending += 1,
                CaseState::Running => s.running += 1,
                CaseState::Succeeded => s.succeeded += 1,
                CaseState::Failed => s.failed += 1,
                CaseState::Skipped => s.skipped += 1,
                CaseState::Aborted => s.aborted += 1,
                CaseState::DependencyFailed => s.dependency_failed += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::ActiveSet;
    use crate::graph::{CaseKey, Test, TestRegistry};
    use crate::split::SplitPolicy;

    /// t0 <- t1 <- t2 on a single case each.
    fn chain() -> Arc<CaseGraph> {
        let mut reg = TestRegistry::new();
        for name in ["t0", "t1", "t2"] {
            reg.add_test(Test::new(name)).unwrap();
        }
        reg.depends_on("t1", "t0", SplitPolicy::default()).unwrap();
        reg.depends_on("t2", "t1", SplitPolicy::default()).unwrap();
        let active = ActiveSet::new("sys").with_partition("p", ["e"]);
        Arc::new(CaseGraph::build(&reg, &active, &[]).unwrap())
    }

    fn id(g: &CaseGraph, test: &str) -> CaseId {
        g.id(&CaseKey::new(test, "p", "e")).unwrap()
    }

    #[test]
    fn test_only_roots_are_ready_initially() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        assert_eq!(tracker.ready(), vec![id(&g, "t0")]);
        assert!(!tracker.try_start(id(&g, "t1")));
        assert!(tracker.try_start(id(&g, "t0")));
        assert!(!tracker.try_start(id(&g, "t0")));
        assert_eq!(tracker.state(id(&g, "t0")), CaseState::Running);
        assert!(tracker.entry(id(&g, "t0")).started_at.is_some());
    }

    #[test]
    fn test_success_releases_dependents() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let t0 = id(&g, "t0");
        tracker.try_start(t0);
        let done = tracker.complete(t0, CaseState::Succeeded, None);
        assert!(done.cleanup.is_empty());
        assert!(done.propagated.is_empty());
        assert_eq!(tracker.ready(), vec![id(&g, "t1")]);
    }

    #[test]
    fn test_failure_cascades_to_all_descendants() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let t0 = id(&g, "t0");
        tracker.try_start(t0);
        let done = tracker.complete(t0, CaseState::Failed, Some("exit 1".into()));
        assert_eq!(
            done.propagated,
            vec![
                (id(&g, "t1"), CaseState::DependencyFailed),
                (id(&g, "t2"), CaseState::DependencyFailed),
            ]
        );
        assert!(!tracker.try_start(id(&g, "t1")));
        assert!(tracker.ready().is_empty());
        assert!(tracker.is_finished());
        assert_eq!(tracker.failures(), 1);
        let summary = tracker.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dependency_failed, 2);
        assert!(!summary.is_success());
        assert!(
            tracker.entry(id(&g, "t2")).reason.unwrap().contains("t0 @p+e")
        );
    }

    #[test]
    fn test_skip_cascades_as_skip() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let t0 = id(&g, "t0");
        tracker.try_start(t0);
        tracker.complete(t0, CaseState::Skipped, None);
        assert_eq!(tracker.state(id(&g, "t2")), CaseState::Skipped);
        assert!(tracker.summary().is_success());
    }

    #[test]
    fn test_repeated_completion_is_ignored() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let t0 = id(&g, "t0");
        tracker.try_start(t0);
        tracker.complete(t0, CaseState::Succeeded, None);
        let again = tracker.complete(t0, CaseState::Failed, None);
        assert_eq!(again, Completion::default());
        assert_eq!(tracker.state(t0), CaseState::Succeeded);
    }

    #[test]
    fn test_cleanup_flows_up_the_chain() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let (t0, t1, t2) = (id(&g, "t0"), id(&g, "t1"), id(&g, "t2"));
        for case in [t0, t1] {
            tracker.try_start(case);
            tracker.complete(case, CaseState::Succeeded, None);
        }
        assert_eq!(tracker.cleanup_state(t0), CleanupState::Authorized);
        assert_eq!(tracker.cleanup_state(t1), CleanupState::Awaiting);
        tracker.try_start(t2);
        let done = tracker.complete(t2, CaseState::Succeeded, None);
        assert_eq!(done.cleanup, vec![t1, t2]);
    }

    #[test]
    fn test_abort_pending() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        tracker.try_start(id(&g, "t0"));
        let aborted = tracker.abort_pending("failure limit reached");
        assert_eq!(aborted, vec![id(&g, "t1"), id(&g, "t2")]);
        assert_eq!(tracker.state(id(&g, "t0")), CaseState::Running);
        assert_eq!(tracker.summary().aborted, 2);
    }

    #[test]
    fn test_abort_running() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let (t0, t1, t2) = (id(&g, "t0"), id(&g, "t1"), id(&g, "t2"));
        tracker.try_start(t0);
        assert_eq!(tracker.abort_running("failure limit reached"), vec![t0]);
        assert_eq!(tracker.state(t0), CaseState::Aborted);
        assert_eq!(tracker.state(t1), CaseState::DependencyFailed);
        assert_eq!(tracker.state(t2), CaseState::DependencyFailed);
        assert_eq!(tracker.cleanup_state(t0), CleanupState::Suppressed);

        // The job's own outcome arrives after the abort and is dropped.
        let late = tracker.complete(t0, CaseState::Succeeded, None);
        assert_eq!(late, Completion::default());
        assert_eq!(tracker.state(t0), CaseState::Aborted);
    }

    #[test]
    fn test_success_of_unstarted_case_is_ignored() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let (t0, t1, t2) = (id(&g, "t0"), id(&g, "t1"), id(&g, "t2"));
        for outcome in [CaseState::Succeeded, CaseState::Skipped] {
            let done = tracker.complete(t1, outcome, None);
            assert_eq!(done, Completion::default());
            assert_eq!(tracker.state(t1), CaseState::Pending);
        }
        assert_eq!(tracker.ready(), vec![t0]);
        assert!(!tracker.try_start(t2));
        assert_eq!(tracker.cleanup_state(t1), CleanupState::Awaiting);
    }

    #[test]
    fn test_failure_of_unstarted_case_is_accepted() {
        let g = chain();
        let tracker = RunTracker::new(Arc::clone(&g));
        let (t1, t2) = (id(&g, "t1"), id(&g, "t2"));
        let done = tracker.complete(t1, CaseState::Aborted, Some("cancelled".into()));
        assert_eq!(done.propagated, vec![(t2, CaseState::DependencyFailed)]);
        assert_eq!(tracker.state(t1), CaseState::Aborted);
        assert_eq!(tracker.failures(), 0);
    }
}
