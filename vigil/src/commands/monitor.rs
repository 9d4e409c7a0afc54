// vigil/src/commands/monitor.rs
//
// USE CASE: Monitored pairs and monitoring cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vigil_core::domain::monitoring::CycleReport;

use super::Session;
use crate::cli::MonitorCommands;
use crate::output;

pub async fn execute(session: &Session, command: MonitorCommands) -> anyhow::Result<()> {
    let engine = session.open()?;
    let actor = session.actor.as_str();

    match command {
        MonitorCommands::Register { pack, asset } => {
            if engine.register_pair(&pack, &asset, actor)? {
                output::success(format!("Monitoring {}/{}", pack, asset));
            } else {
                output::info(format!("{}/{} was already monitored", pack, asset));
            }
            session.persist(&engine)
        }
        MonitorCommands::Unregister { pack, asset } => {
            engine.unregister_pair(&pack, &asset, actor)?;
            output::success(format!("Stopped monitoring {}/{}", pack, asset));
            session.persist(&engine)
        }
        MonitorCommands::Pairs => {
            let pairs = engine.pairs();
            session.emit(&pairs, |pairs| {
                let mut table = output::table(&["Pack", "Asset"]);
                for p in pairs {
                    table.add_row(vec![p.pack.clone(), p.asset.clone()]);
                }
                output::print_table(&table, "No monitored pairs");
            })
        }
        MonitorCommands::Run { label } => {
            println!("🔄 Running monitoring cycle '{}'...", label);
            let report = engine.run_monitoring_cycle(&label).await?;
            session.persist(&engine)?;
            session.emit(&report, print_cycle)
        }
        MonitorCommands::Watch { every, prefix, cycles } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\n🛑 Stopping after the current cycle...");
                    flag.store(true, Ordering::SeqCst);
                }
            });

            println!("👀 Watching every {}s (Ctrl-C to stop)", every);
            let ran = engine
                .run_scheduled(Duration::from_secs(every.max(1)), &prefix, shutdown, cycles)
                .await;
            if let Some(report) = engine.last_cycle() {
                session.emit(&report, print_cycle)?;
            }
            output::success(format!("{} cycle(s) run", ran));
            session.persist(&engine)
        }
    }
}

fn print_cycle(report: &CycleReport) {
    let mut table = output::table(&["Pair", "Status", "Attempts", "Evaluation", "Score", "Signals", "Error"]);
    for o in &report.outcomes {
        table.add_row(vec![
            o.pair.to_string(),
            o.status.to_string(),
            o.attempts.to_string(),
            output::maybe(o.evaluation_id.as_deref()),
            output::maybe(o.quality_score.map(output::ratio)),
            o.signal_ids.len().to_string(),
            output::maybe(o.error.as_deref()),
        ]);
    }
    output::print_table(&table, "No monitored pairs");
    output::kv("bucket", output::when(report.bucket));
    output::kv("incidents opened", report.incidents_opened.len());
    output::kv("incidents merged", report.incidents_merged.len());
    output::kv("incidents auto-closed", report.incidents_auto_closed.len());
    output::kv("tasks escalated", report.tasks_escalated.len());
}
