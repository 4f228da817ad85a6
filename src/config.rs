//! Suite configuration, loaded from a TOML file.
//!
//! A suite file describes the system (partitions and the programming
//! environments each one provides), run options, and the tests with their
//! dependency declarations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::enumerate::ActiveSet;
use crate::graph::{GraphError, Test, TestRegistry};
use crate::split::SplitPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read suite file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse suite file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid suite: {0}")]
    Validation(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Top-level suite file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub system: SystemConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub tests: Vec<TestConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,

    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,

    /// Programming environments available on this partition, in order
    #[serde(default)]
    pub environs: Vec<String>,

    /// Maximum number of cases running on this partition at once
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_max_jobs() -> usize {
    8
}

/// Run options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_concurrency: usize,
    /// Abort the remaining cases after this many failures (0 = unlimited)
    pub max_failures: usize,
    pub keep_stage_files: bool,
    pub stage_dir: PathBuf,
    /// Per-case time limit in seconds, enforced by the shell runner
    pub timeout: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_failures: 0,
            keep_stage_files: false,
            stage_dir: PathBuf::from("stage"),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,

    #[serde(default = "wildcard")]
    pub valid_systems: Vec<String>,

    #[serde(default = "wildcard")]
    pub valid_prog_environs: Vec<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub depends_on: Vec<DependsOnConfig>,
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

/// One `depends_on` declaration; `how` names a built-in split policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnConfig {
    pub target: String,

    #[serde(default = "default_how")]
    pub how: String,
}

fn default_how() -> String {
    "by_case".to_string()
}

impl SuiteConfig {
    /// Load a suite from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a suite from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SuiteConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.system.partitions.is_empty() {
            return Err(ConfigError::Validation(format!(
                "system '{}' declares no partitions",
                self.system.name
            )));
        }
        let mut seen = HashSet::new();
        for part in &self.system.partitions {
            if !seen.insert(part.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate partition '{}'",
                    part.name
                )));
            }
            if part.max_jobs == 0 {
                return Err(ConfigError::Validation(format!(
                    "partition '{}': max_jobs must be at least 1",
                    part.name
                )));
            }
        }
        if self.run.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the test registry: every test first, then every declaration, so
    /// declarations may refer to tests defined further down the file.
    pub fn registry(&self) -> Result<TestRegistry, ConfigError> {
        let mut registry = TestRegistry::new();
        for tc in &self.tests {
            registry.add_test(Test {
                valid_systems: tc.valid_systems.clone(),
                valid_prog_environs: tc.valid_prog_environs.clone(),
                command: tc.command.clone(),
                tags: tc.tags.clone(),
                ..Test::new(tc.name.as_str())
            })?;
        }
        for tc in &self.tests {
            for dep in &tc.depends_on {
                let how = SplitPolicy::from_name(&dep.how)?;
                registry.depends_on(&tc.name, &dep.target, how)?;
            }
        }
        Ok(registry)
    }

    /// The unrestricted active set: every partition with all its environments.
    pub fn active_set(&self) -> ActiveSet {
        self.system
            .partitions
            .iter()
            .fold(ActiveSet::new(self.system.name.as_str()), |set, p| {
                set.with_partition(p.name.as_str(), p.environs.iter().map(String::as_str))
            })
    }

    /// `(partition, max_jobs)` pairs in declaration order.
    pub fn partition_limits(&self) -> Vec<(String, usize)> {
        self.system
            .partitions
            .iter()
            .map(|p| (p.name.clone(), p.max_jobs))
            .collect()
    }
}
