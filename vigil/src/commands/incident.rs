// vigil/src/commands/incident.rs
//
// USE CASE: Incident lifecycle (correlate, acknowledge, resolve, close).

use serde_json::Value;
use vigil_core::domain::incident::Incident;

use super::Session;
use crate::cli::IncidentCommands;
use crate::output;

pub async fn execute(session: &Session, command: IncidentCommands) -> anyhow::Result<()> {
    let engine = session.open()?;
    let actor = session.actor.as_str();

    let (changed, message): (Value, String) = match command {
        IncidentCommands::List { active } => {
            let incidents: Vec<Incident> = engine
                .incidents()
                .into_iter()
                .filter(|i| !active || i.status.is_active())
                .collect();
            return session.emit(&incidents, |i| print_incidents(i));
        }
        IncidentCommands::Show { id } => {
            let incident = engine.incident(&id)?;
            return session.emit(&incident, |i| {
                println!("🚨 {} [{}] {}", i.id, i.severity, i.status);
                output::kv("asset", &i.asset);
                output::kv("scope", &i.scope);
                output::kv("dedup key", &i.dedup_key);
                output::kv("signals", i.signal_ids.join(", "));
                output::kv("opened", output::when(i.opened_at));
                output::kv("acknowledged by", output::maybe(i.acknowledged_by.as_deref()));
                output::kv("resolved by", output::maybe(i.resolved_by.as_deref()));
                output::kv("resolution", output::maybe(i.resolution_note.as_deref()));
                output::kv("closed", output::maybe(i.closed_at.map(output::when)));
                output::kv("clean cycles", i.clean_cycles);
            });
        }
        IncidentCommands::Correlate => {
            let report = engine.open_close_incidents(actor).await;
            let message = format!(
                "{} opened, {} merged, {} auto-closed",
                report.opened.len(),
                report.merged.len(),
                report.auto_closed.len()
            );
            (serde_json::to_value(report)?, message)
        }
        IncidentCommands::Ack { id } => {
            let incident = engine.acknowledge_incident(&id, actor)?;
            (serde_json::to_value(incident)?, format!("Incident {} acknowledged by {}", id, actor))
        }
        IncidentCommands::Resolve { id, note } => {
            let incident = engine.resolve_incident(&id, actor, &note)?;
            (serde_json::to_value(incident)?, format!("Incident {} resolved", id))
        }
        IncidentCommands::Close { id } => {
            let incident = engine.close_incident(&id, actor)?;
            (serde_json::to_value(incident)?, format!("Incident {} closed", id))
        }
    };

    session.persist(&engine)?;
    session.emit(&changed, |_| output::success(message))
}

pub fn print_incidents(incidents: &[Incident]) {
    let mut table = output::table(&["Incident", "Asset", "Scope", "Severity", "Status", "Signals", "Opened"]);
    for i in incidents {
        table.add_row(vec![
            i.id.clone(),
            i.asset.clone(),
            i.scope.to_string(),
            i.severity.to_string(),
            i.status.to_string(),
            i.signal_ids.len().to_string(),
            output::when(i.opened_at),
        ]);
    }
    output::print_table(&table, "No incidents");
}
