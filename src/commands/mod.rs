pub mod check;
pub mod list;
pub mod order;
pub mod run;

use anyhow::{Context, Result};
use std::path::Path;

use casegraph::{ActiveSet, SuiteConfig, TestFilter, TestRegistry, environ_filters};

/// Command-line restrictions applied on top of a suite file.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub partitions: Vec<String>,
    pub prgenvs: Vec<String>,
    pub names: Vec<String>,
    pub exclude: Vec<String>,
    pub tags: Vec<String>,
}

/// A suite file resolved against the command-line selection.
pub struct LoadedSuite {
    pub config: SuiteConfig,
    pub registry: TestRegistry,
    pub active: ActiveSet,
    pub selection: Vec<String>,
}

pub fn load_suite(path: &Path, sel: &Selection) -> Result<LoadedSuite> {
    if !path.exists() {
        anyhow::bail!("Suite file not found: {}", path.display());
    }
    let config = SuiteConfig::load(path)
        .with_context(|| format!("Failed to load suite {}", path.display()))?;
    let registry = config
        .registry()
        .context("Invalid dependency declarations")?;

    let mut active = config.active_set();
    active.restrict_partitions(&sel.partitions)?;
    let filters = environ_filters(&sel.prgenvs).context("Invalid --prgenv pattern")?;
    active.restrict_environs(&filters);

    let filter =
        TestFilter::new(&sel.names, &sel.exclude, &sel.tags).context("Invalid --tag pattern")?;
    let selection = registry.select(&filter)?;

    Ok(LoadedSuite {
        config,
        registry,
        active,
        selection,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{SUITE, write_suite};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_suite_applies_restrictions() {
        let tmp = TempDir::new().unwrap();
        let path = write_suite(&tmp, SUITE);
        let sel = Selection {
            partitions: vec!["p0".into()],
            prgenvs: vec!["gn.*".into()],
            names: vec!["run".into()],
            ..Selection::default()
        };
        let suite = load_suite(&path, &sel).unwrap();
        assert_eq!(suite.active.partitions().len(), 1);
        assert_eq!(suite.active.partitions()[0].environs, vec!["gnu"]);
        assert_eq!(suite.selection, vec!["run"]);
    }

    #[test]
    fn test_load_suite_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = load_suite(&tmp.path().join("absent.toml"), &Selection::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_suite_tag_and_exclude_filters() {
        let tmp = TempDir::new().unwrap();
        let path = write_suite(&tmp, SUITE);
        let by_tag = Selection {
            tags: vec!["comp.*".into()],
            ..Selection::default()
        };
        assert_eq!(load_suite(&path, &by_tag).unwrap().selection, vec!["build"]);

        let excluded = Selection {
            exclude: vec!["build".into()],
            ..Selection::default()
        };
        assert_eq!(load_suite(&path, &excluded).unwrap().selection, vec!["run"]);

        let nothing = Selection {
            tags: vec!["perf".into()],
            ..Selection::default()
        };
        let err = load_suite(&path, &nothing).err().unwrap();
        assert!(err.to_string().contains("no tests match"));
    }

    #[test]
    fn test_load_suite_unknown_partition() {
        let tmp = TempDir::new().unwrap();
        let path = write_suite(&tmp, SUITE);
        let sel = Selection {
            partitions: vec!["p9".into()],
            ..Selection::default()
        };
        assert!(load_suite(&path, &sel).is_err());
    }
}
