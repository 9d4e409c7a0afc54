// vigil/src/commands/lifecycle.rs
//
// USE CASE: Setup, health, readiness gate, schema upgrade.

use super::Session;
use crate::output;

pub fn setup(session: &Session) -> anyhow::Result<()> {
    println!("🛠️  Setting up engine in {:?}...", session.project_dir);
    let engine = session.open()?;
    let report = engine.setup(&session.actor)?;
    session.persist(&engine)?;

    session.emit(&report, |r| {
        output::kv("rules created", r.rules_created.len());
        output::kv("rules already known", r.rules_existing);
        output::kv("pairs registered", r.pairs_registered.len());
        output::kv("schema version", r.schema_version);
        for pair in &r.pairs_pending {
            output::warning(format!("pair {} waits for its pack; run setup again once it exists", pair));
        }
        output::success("Engine initialized");
    })
}

pub async fn health(session: &Session) -> anyhow::Result<()> {
    let engine = session.open()?;
    let status = engine.health_status().await;

    session.emit(&status, |s| {
        println!("🩺 Engine health");
        output::kv("initialized", s.initialized);
        output::kv("schema", format!("v{} (latest v{})", s.schema_version, s.latest_schema_version));
        output::kv("source", format!("{} ({} assets)", s.source, s.assets.len()));
        output::kv("rules", format!("{} ({} approved)", s.rules, s.approved_rules));
        output::kv("packs", format!("{} ({} active)", s.packs, s.active_packs));
        output::kv("monitored pairs", s.monitored_pairs);
        output::kv("evaluations", s.evaluations);
        output::kv("signals", s.signals);
        output::kv("active incidents", s.active_incidents);
        output::kv("open tasks", s.open_tasks);
        output::kv("audit records", s.audit_records);
        output::kv("last cycle", output::maybe(s.last_cycle.as_deref()));
        if let Some(err) = &s.source_error {
            output::warning(format!("source unreachable: {}", err));
        }
        if s.healthy() {
            output::success("Healthy");
        } else {
            output::warning("Not healthy: run `vigil setup` first");
        }
    })
}

pub async fn ready(session: &Session) -> anyhow::Result<()> {
    let engine = session.open()?;
    let report = engine.readiness().await;

    session.emit(&report, |r| {
        let mut table = output::table(&["Check", "Passed", "Detail"]);
        for c in &r.checks {
            table.add_row(vec![
                c.name.to_string(),
                if c.passed { "✅" } else { "❌" }.to_string(),
                c.detail.clone(),
            ]);
        }
        output::print_table(&table, "No checks");
        if r.ready() {
            output::success("Ready for activation");
        }
    })?;

    engine.assert_ready_for_activation().await?;
    Ok(())
}

pub fn upgrade(session: &Session) -> anyhow::Result<()> {
    let engine = session.open()?;
    let from = engine.schema_version();
    let report = engine.upgrade(&session.actor)?;
    session.persist(&engine)?;

    session.emit(&report, |r| {
        output::success(format!(
            "Schema upgraded v{} -> v{} (integrity report {}, baseline {})",
            from,
            engine.schema_version(),
            r.id,
            r.baseline_id
        ));
    })
}
