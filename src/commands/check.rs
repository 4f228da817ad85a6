use anyhow::Result;
use casegraph::check_all;
use casegraph::graph::join_cycle;

use super::LoadedSuite;

pub fn run(suite: &LoadedSuite, json: bool) -> Result<()> {
    let result = check_all(&suite.registry, &suite.active, &suite.selection);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.ok {
            anyhow::bail!("Suite check failed");
        }
        return Ok(());
    }

    // Tests without cases are warnings unless something depends on them
    if !result.infeasible.is_empty() {
        eprintln!("Warning: Tests with no feasible cases in this run:");
        for name in &result.infeasible {
            eprintln!("  {}", name);
        }
    }

    if let Some(ref error) = result.error {
        eprintln!("Error: {}", error);
    }

    if let Some(ref cycle) = result.case_cycle {
        eprintln!("Error: Case-level dependency cycle:");
        eprintln!("  {}", join_cycle(cycle));
    }

    if let Some(ref cycle) = result.test_cycle {
        eprintln!("Error: Test-level dependency cycle:");
        eprintln!("  {}", join_cycle(cycle));
    }

    if result.cyclic_tests.len() > 1 {
        eprintln!(
            "Cyclic test groups: {} detected (via Tarjan's SCC)",
            result.cyclic_tests.len()
        );
        for group in &result.cyclic_tests {
            eprintln!("  {}", group.join(", "));
        }
    }

    if !result.ok {
        anyhow::bail!("Suite check failed");
    }
    println!(
        "Suite OK: {} case(s), {} dependency edge(s)",
        result.case_count, result.edge_count
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{SUITE, write_suite};
    use super::super::{Selection, load_suite};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_ok() {
        let tmp = TempDir::new().unwrap();
        let path = write_suite(&tmp, SUITE);
        let suite = load_suite(&path, &Selection::default()).unwrap();
        assert!(run(&suite, false).is_ok());
    }

    #[test]
    fn test_check_fails_on_cycle() {
        let tmp = TempDir::new().unwrap();
        let cyclic = SUITE.replace(
            "name = \"build\"\ncommand = \"true\"",
            "name = \"build\"\ncommand = \"true\"\ndepends_on = [{ target = \"run\", how = \"by_xenv\" }]",
        );
        let path = write_suite(&tmp, &cyclic);
        let suite = load_suite(&path, &Selection::default()).unwrap();
        assert!(run(&suite, false).is_err());
        assert!(run(&suite, true).is_err());
    }

    #[test]
    fn test_check_fails_on_infeasible_target() {
        let tmp = TempDir::new().unwrap();
        let suite_text = SUITE.replace(
            "name = \"build\"\ncommand = \"true\"",
            "name = \"build\"\ncommand = \"true\"\nvalid_systems = [\"other:*\"]",
        );
        let path = write_suite(&tmp, &suite_text);
        let suite = load_suite(&path, &Selection::default()).unwrap();
        assert!(run(&suite, false).is_err());
    }
}
