use std::fs;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};

use vigil_core::Engine;
use vigil_core::domain::catalog::{ApprovalState, RuleDefinition};
use vigil_core::domain::error::DomainError;
use vigil_core::domain::evaluation::RulePredicate;
use vigil_core::domain::incident::IncidentStatus;
use vigil_core::domain::monitoring::PairStatus;
use vigil_core::domain::project::EngineConfig;
use vigil_core::domain::remediation::TaskStatus;
use vigil_core::error::VigilError;
use vigil_core::infrastructure::adapters::InMemorySource;
use vigil_core::ports::{ManualClock, SystemClock};

const ASSET: &str = "RAW.CUSTOMER";
const PACK: &str = "baseline_pack";

fn definition(id: &str, column: &str) -> RuleDefinition {
    RuleDefinition {
        id: id.into(),
        name: format!("{} check", id),
        description: None,
        target_asset_type: "table".into(),
        predicate: RulePredicate::Email { column: column.into() },
    }
}

fn customers(valid: usize, invalid: usize) -> Vec<Value> {
    let good = (0..valid).map(|i| json!({ "ID": i, "EMAIL": format!("user{}@example.com", i) }));
    let bad = (0..invalid).map(|i| json!({ "ID": valid + i, "EMAIL": format!("broken-{}", i) }));
    good.chain(bad).collect()
}

fn domain_error(err: &VigilError) -> Option<&DomainError> {
    err.as_domain()
}

/// Approved email rule in an active `baseline_pack`.
fn activate_email_pack(engine: &Engine) -> Result<()> {
    let catalog = engine.catalog();
    catalog.create_rule(definition("udf_dq_email_valid", "EMAIL"), "author")?;
    catalog.submit_for_approval("udf_dq_email_valid", "author")?;
    catalog.approve("udf_dq_email_valid", "reviewer")?;
    catalog.create_pack(PACK, "admin")?;
    catalog.add_rule_version(PACK, "udf_dq_email_valid", 1, "admin")?;
    catalog.promote(PACK, "admin")?;
    Ok(())
}

fn drive_to(engine: &Engine, rule_id: &str, state: ApprovalState) -> Result<()> {
    let catalog = engine.catalog();
    match state {
        ApprovalState::Draft => {}
        ApprovalState::PendingApproval => {
            catalog.submit_for_approval(rule_id, "author")?;
        }
        ApprovalState::Approved => {
            catalog.submit_for_approval(rule_id, "author")?;
            catalog.approve(rule_id, "reviewer")?;
        }
        ApprovalState::Deprecated => {
            catalog.deprecate(rule_id, "admin")?;
        }
    }
    Ok(())
}

#[test]
fn test_promote_succeeds_iff_every_reference_is_approved() -> Result<()> {
    let states = [
        ApprovalState::Draft,
        ApprovalState::PendingApproval,
        ApprovalState::Approved,
        ApprovalState::Deprecated,
    ];

    for first in states {
        for second in states {
            let engine = Engine::with_source(
                EngineConfig::default(),
                Arc::new(InMemorySource::new()),
                Arc::new(SystemClock),
            );
            let catalog = engine.catalog();
            catalog.create_rule(definition("a", "EMAIL"), "author")?;
            catalog.create_rule(definition("b", "CONTACT"), "author")?;
            drive_to(&engine, "a", first)?;
            drive_to(&engine, "b", second)?;

            catalog.create_pack("p", "admin")?;
            catalog.add_rule_version("p", "a", 1, "admin")?;
            catalog.add_rule_version("p", "b", 1, "admin")?;

            let outcome = catalog.promote("p", "admin");
            let expected = first == ApprovalState::Approved && second == ApprovalState::Approved;
            assert_eq!(outcome.is_ok(), expected, "a={} b={}", first, second);
            if let Err(e) = outcome {
                assert!(matches!(domain_error(&e), Some(DomainError::Consistency(_))));
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_baseline_pack_scores_half_valid_emails() -> Result<()> {
    let source = Arc::new(InMemorySource::new());
    source.put_json(ASSET, customers(2, 2));
    let engine = Engine::with_source(EngineConfig::default(), source, Arc::new(SystemClock));
    engine.setup("admin")?;
    activate_email_pack(&engine)?;

    let result = engine.apply_rule_pack(PACK, ASSET).await?;
    assert_eq!(result.quality_score, 0.5);
    assert_eq!(result.pass_ratio, 0.5);
    assert_eq!(result.records_evaluated, 4);
    assert_eq!(engine.evaluations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_repeated_cycle_label_commits_once() -> Result<()> {
    let source = Arc::new(InMemorySource::new());
    source.put_json(ASSET, customers(3, 1));
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
    let engine = Engine::with_source(EngineConfig::default(), source, clock.clone());
    engine.setup("admin")?;
    activate_email_pack(&engine)?;
    engine.register_pair(PACK, ASSET, "admin")?;

    let first = engine.run_monitoring_cycle("nightly").await?;
    clock.advance(Duration::minutes(10));
    let second = engine.run_monitoring_cycle("nightly").await?;

    assert_eq!(first.outcomes[0].status, PairStatus::Committed);
    assert_eq!(second.outcomes[0].status, PairStatus::Skipped);
    assert_eq!(engine.evaluations().len(), 1);

    // Next bucket runs again.
    clock.advance(Duration::hours(1));
    let third = engine.run_monitoring_cycle("nightly").await?;
    assert_eq!(third.outcomes[0].status, PairStatus::Committed);
    assert_eq!(engine.evaluations().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_drift_opens_incidents_that_close_after_clean_cycles() -> Result<()> {
    let source = Arc::new(InMemorySource::new());
    source.put_json(ASSET, customers(4, 0));
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
    let engine = Engine::with_source(EngineConfig::default(), source.clone(), clock.clone());
    engine.setup("admin")?;
    activate_email_pack(&engine)?;
    engine.register_pair(PACK, ASSET, "admin")?;

    for i in 0..5 {
        let report = engine.run_monitoring_cycle(&format!("warm-{}", i)).await?;
        assert!(report.incidents_opened.is_empty());
        clock.advance(Duration::hours(1));
    }

    source.put_json(ASSET, customers(0, 4));
    let drift = engine.run_monitoring_cycle("drift").await?;
    assert!(!drift.outcomes[0].signal_ids.is_empty());
    assert!(!drift.incidents_opened.is_empty());
    assert!(engine.incidents().iter().all(|i| i.status == IncidentStatus::Open));

    source.put_json(ASSET, customers(4, 0));
    let mut closed = Vec::new();
    for i in 0..3 {
        clock.advance(Duration::hours(1));
        let report = engine.run_monitoring_cycle(&format!("clean-{}", i)).await?;
        closed.extend(report.incidents_auto_closed);
    }
    assert_eq!(closed.len(), drift.incidents_opened.len());
    assert!(engine.incidents().iter().all(|i| i.status == IncidentStatus::Closed));
    Ok(())
}

#[tokio::test]
async fn test_synthetic_anomaly_opens_one_incident() -> Result<()> {
    let engine = Engine::with_source(
        EngineConfig::default(),
        Arc::new(InMemorySource::new()),
        Arc::new(SystemClock),
    );
    engine.setup("admin")?;

    engine.inject_synthetic_anomaly(ASSET, 0.12)?;
    let signals = engine.detect_anomalies();
    assert_eq!(signals.len(), 1);
    assert!(signals[0].synthetic);

    let report = engine.open_close_incidents("ops").await;
    assert_eq!(report.opened.len(), 1);
    let open: Vec<_> = engine
        .incidents()
        .into_iter()
        .filter(|i| i.status == IncidentStatus::Open)
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].asset, ASSET);

    // Already correlated: a second pass changes nothing.
    let again = engine.open_close_incidents("ops").await;
    assert!(again.opened.is_empty());
    assert!(again.merged.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_no_task_on_a_closed_incident() -> Result<()> {
    let engine = Engine::with_source(
        EngineConfig::default(),
        Arc::new(InMemorySource::new()),
        Arc::new(SystemClock),
    );
    engine.inject_synthetic_anomaly(ASSET, 0.2)?;
    engine.detect_anomalies();
    let report = engine.open_close_incidents("ops").await;
    let id = report.opened[0].clone();

    engine.acknowledge_incident(&id, "ops")?;
    engine.resolve_incident(&id, "ops", "upstream fixed")?;
    engine.close_incident(&id, "ops")?;

    let err = engine.create_task(&id, "re-check", "ana").unwrap_err();
    assert!(matches!(domain_error(&err), Some(DomainError::Precondition(_))));
    let err = engine
        .create_task_for_latest_incident(ASSET, "re-check", "ana")
        .unwrap_err();
    assert!(matches!(domain_error(&err), Some(DomainError::NotFound { .. })));
    assert!(engine.tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_task_completes_only_once_the_incident_is_resolved() -> Result<()> {
    let engine = Engine::with_source(
        EngineConfig::default(),
        Arc::new(InMemorySource::new()),
        Arc::new(SystemClock),
    );
    engine.inject_synthetic_anomaly(ASSET, 0.2)?;
    engine.detect_anomalies();
    let incident = engine.open_close_incidents("ops").await.opened[0].clone();

    let task = engine.create_task_for_latest_incident(ASSET, "fix loader", "ana")?;
    assert_eq!(task.incident_id, incident);
    let task = engine.update_remediation_status(&task.id, Some(task.version), TaskStatus::InProgress, "on it")?;

    let err = engine.complete_remediation_task(&task.id, "patched").unwrap_err();
    assert!(matches!(domain_error(&err), Some(DomainError::Precondition(_))));

    engine.resolve_incident(&incident, "ops", "loader patched")?;
    let err = engine.complete_remediation_task(&task.id, "  ").unwrap_err();
    assert!(matches!(domain_error(&err), Some(DomainError::Precondition(_))));

    let done = engine.complete_remediation_task(&task.id, "PR merged, rerun green")?;
    assert_eq!(done.status, TaskStatus::Completed);

    let summary = engine.get_remediation_summary();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.by_status.get(&TaskStatus::Completed), Some(&1));
    assert!(summary.mean_time_to_resolution_secs.is_some());
    Ok(())
}

#[tokio::test]
async fn test_project_state_survives_reopening() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    fs::create_dir_all(root.join("rules"))?;
    fs::create_dir_all(root.join("data"))?;
    fs::write(
        root.join("vigil.yaml"),
        "name: scenario\nversion: '1.0'\nsources:\n  RAW.CUSTOMER: data/customer.csv\n",
    )?;
    fs::write(
        root.join("rules/email.yaml"),
        "id: udf_dq_email_valid\nname: Email format\npredicate:\n  kind: email\n  column: EMAIL\n",
    )?;
    fs::write(
        root.join("data/customer.csv"),
        "ID,EMAIL\n1,a@example.com\n2,nope\n3,c@example.org\n4,also-nope\n",
    )?;

    {
        let engine = Engine::open(root)?;
        let report = engine.setup("admin")?;
        assert_eq!(report.rules_created, vec!["udf_dq_email_valid".to_string()]);
        let catalog = engine.catalog();
        catalog.submit_for_approval("udf_dq_email_valid", "author")?;
        catalog.approve("udf_dq_email_valid", "reviewer")?;
        catalog.create_pack(PACK, "admin")?;
        catalog.add_rule_version(PACK, "udf_dq_email_valid", 1, "admin")?;
        catalog.promote(PACK, "admin")?;

        let result = engine.apply_rule_pack(PACK, ASSET).await?;
        assert_eq!(result.quality_score, 0.5);
        engine.capture_migration_baseline("admin")?;
        assert!(engine.save()?.is_some());
    }

    let reopened = Engine::open(root)?;
    assert!(reopened.is_initialized());
    assert_eq!(reopened.evaluations().len(), 1);
    assert!(reopened.validate_migration_integrity(None)?.passed());

    // Setup again only reports what already exists.
    let report = reopened.setup("admin")?;
    assert!(report.rules_created.is_empty());
    assert_eq!(report.rules_existing, 1);
    Ok(())
}
