use anyhow::Result;
use casegraph::{CaseGraph, Schedule, ScheduleView};

use super::LoadedSuite;

pub fn run(suite: &LoadedSuite, waves: bool, json: bool) -> Result<()> {
    let graph = CaseGraph::build(&suite.registry, &suite.active, &suite.selection)?;
    let schedule = Schedule::new(&graph)?;

    if json {
        let view = ScheduleView::new(&graph, &schedule);
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if schedule.is_empty() {
        println!("No test cases found");
        return Ok(());
    }
    if waves {
        for (level, wave) in schedule.waves().iter().enumerate() {
            let keys: Vec<String> = wave.iter().map(|&id| graph.key(id).to_string()).collect();
            println!("wave {}: {}", level, keys.join(", "));
        }
    } else {
        for (pos, id) in schedule.iter().enumerate() {
            println!("{:>4}. {}", pos + 1, graph.key(id));
        }
    }
    Ok(())
}
