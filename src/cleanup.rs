//! Cleanup gate: decides when a case's stage directory may be removed.
//!
//! A case's stage directory holds inputs its dependents may read, so it is
//! kept until every immediate dependent has finished successfully. Any
//! unsuccessful dependent (or an unsuccessful case itself) suppresses cleanup
//! for the rest of the run so the files stay inspectable.
//!
//! Each case has its own record behind its own lock; sibling dependents
//! finishing concurrently serialize only on the record they share.

use log::info;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::casegraph::{CaseGraph, CaseId};
use crate::graph::CaseState;

/// Cleanup state of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupState {
    #[default]
    Awaiting,
    /// Stage directory may be removed. Terminal.
    Authorized,
    /// Stage directory is retained for this run. Terminal.
    Suppressed,
}

impl CleanupState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CleanupState::Awaiting)
    }
}

/// What a single update did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Authorized,
    Suppressed,
}

/// Per-case bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRecord {
    pub dependents: usize,
    pub succeeded: usize,
    pub dependent_failed: bool,
    /// The case's own outcome, once known: `Some(true)` for success.
    pub own_success: Option<bool>,
    pub state: CleanupState,
}

impl CleanupRecord {
    fn new(dependents: usize) -> Self {
        Self {
            dependents,
            ..Self::default()
        }
    }

    fn own_outcome(&mut self, outcome: CaseState) -> Transition {
        if self.state.is_terminal() || self.own_success.is_some() {
            return Transition::Unchanged;
        }
        let success = outcome == CaseState::Succeeded;
        self.own_success = Some(success);
        if !success {
            return self.suppress();
        }
        self.maybe_authorize()
    }

    fn dependent_outcome(&mut self, outcome: CaseState) -> Transition {
        if self.state.is_terminal() {
            return Transition::Unchanged;
        }
        if outcome != CaseState::Succeeded {
            self.dependent_failed = true;
            return self.suppress();
        }
        self.succeeded += 1;
        self.maybe_authorize()
    }

    fn suppress(&mut self) -> Transition {
        self.state = CleanupState::Suppressed;
        Transition::Suppressed
    }

    fn maybe_authorize(&mut self) -> Transition {
        if self.own_success == Some(true)
            && !self.dependent_failed
            && self.succeeded >= self.dependents
        {
            self.state = CleanupState::Authorized;
            Transition::Authorized
        } else {
            Transition::Unchanged
        }
    }
}

/// Cleanup records for every case of a graph.
#[derive(Debug)]
pub struct CleanupGate {
    records: Vec<Mutex<CleanupRecord>>,
}

impl CleanupGate {
    pub fn new(graph: &CaseGraph) -> Self {
        let records = graph
            .ids()
            .map(|id| Mutex::new(CleanupRecord::new(graph.dependents(id).len())))
            .collect();
        Self { records }
    }

    fn lock(&self, id: CaseId) -> MutexGuard<'_, CleanupRecord> {
        self.records[id.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the terminal outcome of `id` itself.
    pub fn record_own(&self, id: CaseId, outcome: CaseState) -> Transition {
        self.lock(id).own_outcome(outcome)
    }

    /// Record that an immediate dependent of `id` finished with `outcome`.
    pub fn record_dependent(&self, id: CaseId, outcome: CaseState) -> Transition {
        self.lock(id).dependent_outcome(outcome)
    }

    pub fn state(&self, id: CaseId) -> CleanupState {
        self.lock(id).state
    }

    pub fn record(&self, id: CaseId) -> CleanupRecord {
        self.lock(id).clone()
    }

    /// Apply the completion of `id` to its own record and to the records of
    /// every case it depends on. Returns the cases whose cleanup became
    /// authorized, in enumeration order.
    pub fn on_completion(
        &self,
        graph: &CaseGraph,
        id: CaseId,
        outcome: CaseState,
    ) -> Vec<CaseId> {
        self.apply(graph, id, outcome, true)
    }

    /// Like [`CleanupGate::on_completion`], for a case marked terminal
    /// without ever running. It has no stage directory of its own to retain.
    pub fn on_never_started(
        &self,
        graph: &CaseGraph,
        id: CaseId,
        outcome: CaseState,
    ) -> Vec<CaseId> {
        self.apply(graph, id, outcome, false)
    }

    fn apply(&self, graph: &CaseGraph, id: CaseId, outcome: CaseState, ran: bool) -> Vec<CaseId> {
        let mut authorized = Vec::new();
        match self.record_own(id, outcome) {
            Transition::Authorized => authorized.push(id),
            Transition::Suppressed if ran => {
                info!(
                    "Retaining stage directory of {}: case finished as {}",
                    graph.key(id),
                    outcome
                );
            }
            Transition::Suppressed | Transition::Unchanged => {}
        }
        for dep in graph.dependencies(id) {
            match self.record_dependent(dep, outcome) {
                Transition::Authorized => authorized.push(dep),
                Transition::Suppressed => {
                    info!(
                        "Retaining stage directory of {}: dependent {} finished as {}",
                        graph.key(dep),
                        graph.key(id),
                        outcome
                    );
                }
                Transition::Unchanged => {}
            }
        }
        authorized.sort();
        authorized
    }
}
