//! Topological scheduling feed.
//!
//! Orders cases so every case comes after all of its dependencies. Ties are
//! broken by enumeration order, which makes the order reproducible for a given
//! suite and selection.

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::casegraph::{CaseGraph, CaseId};
use crate::check::find_case_cycle;
use crate::graph::{CaseKey, GraphError};

/// A topological order plus its levelized partition.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    order: Vec<CaseId>,
    waves: Vec<Vec<CaseId>>,
}

impl Schedule {
    /// Compute the schedule of a validated graph.
    ///
    /// Fails with [`GraphError::CaseCycle`] only if handed a graph that
    /// bypassed validation.
    pub fn new(graph: &CaseGraph) -> Result<Self, GraphError> {
        let order = topological_order(graph)?;

        let mut level = vec![0usize; graph.len()];
        let mut waves: Vec<Vec<CaseId>> = Vec::new();
        for &id in &order {
            let lvl = graph
                .dependencies(id)
                .iter()
                .map(|d| level[d.index()] + 1)
                .max()
                .unwrap_or(0);
            level[id.index()] = lvl;
            if waves.len() <= lvl {
                waves.resize_with(lvl + 1, Vec::new);
            }
            waves[lvl].push(id);
        }
        for wave in &mut waves {
            wave.sort();
        }

        Ok(Self { order, waves })
    }

    /// Cases in topological order.
    pub fn iter(&self) -> impl Iterator<Item = CaseId> + '_ {
        self.order.iter().copied()
    }

    pub fn order(&self) -> &[CaseId] {
        &self.order
    }

    /// Wave `n` holds the cases whose longest dependency chain has length `n`.
    /// Cases within a wave are mutually independent.
    pub fn waves(&self) -> &[Vec<CaseId>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Kahn's algorithm, always releasing the ready case with the lowest id.
pub fn topological_order(graph: &CaseGraph) -> Result<Vec<CaseId>, GraphError> {
    let mut remaining: Vec<usize> = graph
        .ids()
        .map(|id| graph.dependencies(id).len())
        .collect();
    let mut ready: BinaryHeap<Reverse<CaseId>> = graph
        .ids()
        .filter(|id| remaining[id.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for dependent in graph.dependents(id) {
            let slot = &mut remaining[dependent.index()];
            *slot -= 1;
            if *slot == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != graph.len() {
        return Err(GraphError::CaseCycle {
            cycle: find_case_cycle(graph).unwrap_or_default(),
        });
    }
    Ok(order)
}

/// Serializable view of a schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub order: Vec<CaseKey>,
    pub waves: Vec<Vec<CaseKey>>,
}

impl ScheduleView {
    pub fn new(graph: &CaseGraph, schedule: &Schedule) -> Self {
        let keys = |ids: &[CaseId]| -> Vec<CaseKey> {
            ids.iter().map(|&id| graph.key(id).clone()).collect()
        };
        Self {
            order: keys(schedule.order()),
            waves: schedule.waves().iter().map(|w| keys(w)).collect(),
        }
    }
}
