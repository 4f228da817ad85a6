use anyhow::Result;
use casegraph::{CaseGraph, CaseKey};

use super::LoadedSuite;

pub fn run(suite: &LoadedSuite, json: bool) -> Result<()> {
    let graph = CaseGraph::build(&suite.registry, &suite.active, &suite.selection)?;

    if json {
        let output: Vec<_> = graph
            .ids()
            .map(|id| {
                let key = graph.key(id);
                let deps: Vec<&CaseKey> = graph
                    .dependencies(id)
                    .into_iter()
                    .map(|d| graph.key(d))
                    .collect();
                serde_json::json!({
                    "test": key.test,
                    "partition": key.partition,
                    "environ": key.environ,
                    "dependencies": deps,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if graph.is_empty() {
        println!("No test cases found");
        return Ok(());
    }
    for id in graph.ids() {
        println!("- {}", graph.key(id));
        for dep in graph.dependencies(id) {
            println!("    ^{}", graph.key(dep));
        }
    }
    println!(
        "Found {} case(s) of {} test(s)",
        graph.len(),
        graph.test_names().len()
    );
    Ok(())
}
