//! Run report: one record per case, as wired by the graph builder.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::cleanup::CleanupState;
use crate::graph::CaseState;
use crate::tracker::{RunTracker, Summary};

/// Report entry for a single case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub test: String,
    pub partition: String,
    pub environ: String,
    pub state: CaseState,
    pub cleanup: CleanupState,
    /// Names of the tests this case's test declares dependencies on
    pub dependencies_conceptual: Vec<String>,
    /// `(test, partition, environ)` of every case this case was wired to
    pub dependencies_actual: Vec<(String, String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub system: String,
    pub generated_at: String,
    pub summary: Summary,
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    /// Snapshot the tracker's state, cases in enumeration order.
    pub fn from_tracker(system: &str, tracker: &RunTracker) -> Self {
        let graph = tracker.graph();
        let cases = graph
            .ids()
            .map(|id| {
                let key = graph.key(id);
                let entry = tracker.entry(id);
                CaseReport {
                    test: key.test.clone(),
                    partition: key.partition.clone(),
                    environ: key.environ.clone(),
                    state: entry.state,
                    cleanup: tracker.cleanup_state(id),
                    dependencies_conceptual: graph.dependencies_conceptual(&key.test).to_vec(),
                    dependencies_actual: graph
                        .dependencies_actual(key)
                        .into_iter()
                        .map(|d| (d.test, d.partition, d.environ))
                        .collect(),
                    started_at: entry.started_at,
                    completed_at: entry.completed_at,
                    reason: entry.reason,
                }
            })
            .collect();

        Self {
            system: system.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            summary: tracker.summary(),
            cases,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write run report: {}", path.display()))
    }
}
