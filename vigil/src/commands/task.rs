// vigil/src/commands/task.rs
//
// USE CASE: Remediation tasks.

use vigil_core::domain::remediation::RemediationTask;

use super::Session;
use crate::cli::TaskCommands;
use crate::output;

pub fn execute(session: &Session, command: TaskCommands) -> anyhow::Result<()> {
    let engine = session.open()?;

    let (task, message) = match command {
        TaskCommands::List => {
            let tasks = engine.tasks();
            return session.emit(tasks.as_slice(), print_tasks);
        }
        TaskCommands::Summary => {
            let summary = engine.get_remediation_summary();
            return session.emit(&summary, |s| {
                println!("🧰 Remediation summary");
                output::kv("total", s.total);
                for (status, count) in &s.by_status {
                    output::kv(&status.to_string(), count);
                }
                output::kv(
                    "mean time to resolution",
                    output::maybe(s.mean_time_to_resolution_secs.map(|secs| format!("{:.0}s", secs))),
                );
            });
        }
        TaskCommands::Create {
            incident,
            asset,
            description,
            assignee,
        } => {
            let task = match (incident, asset) {
                (Some(incident), _) => engine.create_task(&incident, &description, &assignee)?,
                (None, Some(asset)) => engine.create_task_for_latest_incident(&asset, &description, &assignee)?,
                (None, None) => anyhow::bail!("either --incident or --asset is required"),
            };
            let message = format!("Task {} assigned to {} on {}", task.id, task.assignee, task.incident_id);
            (task, message)
        }
        TaskCommands::Status {
            id,
            status,
            note,
            expected_version,
        } => {
            let task = engine.update_remediation_status(&id, expected_version, status, &note)?;
            let message = format!("Task {} is {} (version {})", task.id, task.status, task.version);
            (task, message)
        }
        TaskCommands::Reassign {
            id,
            assignee,
            expected_version,
        } => {
            let task = engine.reassign_task(&id, expected_version, &assignee)?;
            let message = format!("Task {} reassigned to {}", task.id, task.assignee);
            (task, message)
        }
        TaskCommands::Complete { id, evidence } => {
            let task = engine.complete_remediation_task(&id, &evidence)?;
            let message = format!("Task {} completed", task.id);
            (task, message)
        }
    };

    session.persist(&engine)?;
    session.emit(&task, |_| output::success(message))
}

fn print_tasks(tasks: &[RemediationTask]) {
    let mut table = output::table(&["Task", "Incident", "Assignee", "Status", "Version", "Updated", "Description"]);
    for t in tasks {
        table.add_row(vec![
            t.id.clone(),
            t.incident_id.clone(),
            t.assignee.clone(),
            t.status.to_string(),
            t.version.to_string(),
            output::when(t.updated_at),
            t.description.clone(),
        ]);
    }
    output::print_table(&table, "No remediation tasks");
}
