// vigil/src/commands/admin.rs
//
// USE CASE: Migration guardrails, diagnostics export, audit trail.

use anyhow::Context;
use vigil_core::domain::audit::EntityKind;
use vigil_core::infrastructure::fs::atomic_write;

use super::Session;
use crate::cli::AdminCommands;
use crate::output;

pub fn execute(session: &Session, command: AdminCommands) -> anyhow::Result<()> {
    let engine = session.open()?;

    match command {
        AdminCommands::Diagnostics { hours, output: path } => {
            let report = engine.export_diagnostics(hours)?;
            match path {
                Some(path) => {
                    let json = serde_json::to_string_pretty(&report)?;
                    atomic_write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
                    output::success(format!(
                        "Diagnostics for the last {}h written to {} ({} evaluations, {} audit records)",
                        hours,
                        path.display(),
                        report.evaluations.len(),
                        report.audit.len()
                    ));
                    Ok(())
                }
                None => output::print_json(&report),
            }
        }
        AdminCommands::Baseline => {
            let baseline = engine.capture_migration_baseline(&session.actor)?;
            session.persist(&engine)?;
            session.emit(&baseline, |b| {
                output::success(format!(
                    "Baseline {} captured at schema v{} ({} rules, {} packs)",
                    b.id,
                    b.schema_version,
                    b.rules.len(),
                    b.packs.len()
                ));
            })
        }
        AdminCommands::Validate { baseline } => {
            let report = engine.validate_migration_integrity(baseline.as_deref())?;
            session.persist(&engine)?;
            session.emit(&report, |r| {
                let mut table = output::table(&["Finding", "Entity", "Detail"]);
                for f in &r.findings {
                    table.add_row(vec![f.kind.to_string(), f.entity_id.clone(), f.detail.clone()]);
                }
                output::print_table(&table, "No findings");
                if r.passed() {
                    output::success(format!("Integrity check {} passed against {}", r.id, r.baseline_id));
                }
            })?;
            if !report.passed() {
                anyhow::bail!(
                    "integrity check {} failed with {} finding(s)",
                    report.id,
                    report.findings.len()
                );
            }
            Ok(())
        }
        AdminCommands::Audit { kind, id } => {
            let kind: EntityKind = serde_json::from_value(serde_json::Value::String(kind.clone()))
                .with_context(|| format!("unknown entity kind '{}'", kind))?;
            let history = engine.audit_history(kind, &id);
            session.emit(&history, |h| {
                let mut table = output::table(&["Version", "At", "Actor", "Action", "Before", "After"]);
                for r in h {
                    table.add_row(vec![
                        r.version.to_string(),
                        output::when(r.at),
                        r.actor.clone(),
                        r.action.clone(),
                        output::maybe(r.before.as_deref()),
                        r.after.clone(),
                    ]);
                }
                output::print_table(&table, "No audit records");
            })
        }
    }
}
