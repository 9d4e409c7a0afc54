use anyhow::{Context, Result};
use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// A throwaway copy of the quickstart project.
struct VigilTestEnv {
    _tmp: TempDir,
    root: PathBuf,
}

impl VigilTestEnv {
    fn new() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let project_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .context("Workspace root not found")?
            .join("demos/quickstart");

        let dest = tmp.path().join("quickstart");
        Self::copy_dir(&project_root, &dest)?;

        Ok(Self {
            _tmp: tmp,
            root: dest,
        })
    }

    fn copy_dir(src: &PathBuf, dst: &PathBuf) -> std::io::Result<()> {
        let mut options = fs_extra::dir::CopyOptions::new();
        options.skip_exist = true;
        options.content_only = true;

        std::fs::create_dir_all(dst)?;
        fs_extra::dir::copy(src, dst, &options)
            .map(|_| ())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        // Never carry a previous run's state along
        let state = dst.join("target");
        if state.exists() {
            std::fs::remove_dir_all(state)?;
        }
        Ok(())
    }

    fn vigil(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vigil"));
        cmd.current_dir(&self.root);
        cmd.env_remove("VIGIL_PROJECT_DIR");
        cmd.env_remove("VIGIL_ACTOR");
        cmd.env_remove("VIGIL_TARGET_PATH");
        cmd.env_remove("VIGIL_DB_PATH");
        cmd
    }

    fn run(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.vigil().args(args).assert()
    }

    /// Approved email rule in an active `baseline_pack`.
    fn activate_baseline_pack(&self) {
        self.run(&["setup"]).success();
        self.run(&["rule", "submit", "udf_dq_email_valid"]).success();
        self.run(&["--actor", "reviewer", "rule", "approve", "udf_dq_email_valid"])
            .success()
            .stdout(predicate::str::contains("approved by reviewer"));
        self.run(&["pack", "create", "baseline_pack"]).success();
        self.run(&["pack", "add", "baseline_pack", "udf_dq_email_valid"])
            .success();
        self.run(&["pack", "promote", "baseline_pack"])
            .success()
            .stdout(predicate::str::contains("is active"));
    }

    fn json(&self, args: &[&str]) -> Result<Value> {
        let output = self.vigil().args(args).args(["--format", "json"]).output()?;
        anyhow::ensure!(output.status.success(), "vigil {:?} failed", args);
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[test]
fn test_setup_loads_rules_and_defers_unknown_pack() -> Result<()> {
    let env = VigilTestEnv::new()?;

    env.run(&["setup"])
        .success()
        .stdout(predicate::str::contains("Engine initialized"))
        .stdout(predicate::str::contains("baseline_pack/RAW.CUSTOMER waits for its pack"));
    assert!(env.root.join("target/state.json").exists());

    let rules = env.json(&["rule", "list"])?;
    assert_eq!(rules.as_array().map(Vec::len), Some(2));

    // Nothing is active yet.
    env.run(&["ready"]).failure();
    Ok(())
}

#[test]
fn test_baseline_pack_scores_half_of_the_customers() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.activate_baseline_pack();

    env.run(&["apply", "baseline_pack", "RAW.CUSTOMER"])
        .success()
        .stdout(predicate::str::contains("50.0%"));

    let evaluations = env.json(&["admin", "diagnostics", "--hours", "1"])?;
    let first = &evaluations["evaluations"][0];
    assert_eq!(first["quality_score"], Value::from(0.5));
    assert_eq!(first["asset"], Value::from("RAW.CUSTOMER"));
    Ok(())
}

#[test]
fn test_promote_refuses_unapproved_rules() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.run(&["setup"]).success();
    env.run(&["pack", "create", "baseline_pack"]).success();
    env.run(&["pack", "add", "baseline_pack", "customer_id_not_null"])
        .success();
    env.run(&["pack", "promote", "baseline_pack"])
        .failure()
        .stderr(predicate::str::contains("Consistency violation"));
    Ok(())
}

#[test]
fn test_preview_does_not_touch_state() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.run(&["setup"]).success();

    env.run(&["rule", "preview", "udf_dq_email_valid", "ada@example.com"])
        .success()
        .stdout(predicate::str::contains("passes"));
    env.run(&["rule", "preview", "udf_dq_email_valid", "nope"])
        .success()
        .stdout(predicate::str::contains("fails"));
    assert_eq!(env.json(&["anomaly", "list"])?, Value::Array(vec![]));
    Ok(())
}

#[test]
fn test_monitoring_cycle_is_ready_and_idempotent() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.activate_baseline_pack();

    // Second setup registers the configured pair now that the pack exists.
    env.run(&["setup"]).success();
    let pairs = env.json(&["monitor", "pairs"])?;
    assert_eq!(pairs[0]["pack"], Value::from("baseline_pack"));

    env.run(&["ready"])
        .success()
        .stdout(predicate::str::contains("Ready for activation"));

    env.run(&["monitor", "run", "--label", "nightly"])
        .success()
        .stdout(predicate::str::contains("committed"));
    env.run(&["monitor", "run", "--label", "nightly"])
        .success()
        .stdout(predicate::str::contains("skipped"));
    Ok(())
}

#[test]
fn test_synthetic_drill_to_closed_incident() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.run(&["setup"]).success();

    env.run(&["anomaly", "inject", "RAW.CUSTOMER", "0.1"]).success();
    env.run(&["anomaly", "detect"])
        .success()
        .stdout(predicate::str::contains("1 new signal(s)"));
    env.run(&["incident", "correlate"])
        .success()
        .stdout(predicate::str::contains("1 opened"));

    let incidents = env.json(&["incident", "list", "--active"])?;
    let id = incidents[0]["id"]
        .as_str()
        .context("incident id missing")?
        .to_string();

    env.run(&["task", "create", "--asset", "RAW.CUSTOMER", "-d", "check loader", "--assignee", "ana"])
        .success()
        .stdout(predicate::str::contains("assigned to ana"));

    env.run(&["incident", "ack", &id]).success();
    env.run(&["incident", "resolve", &id, "--note", "loader fixed"])
        .success();
    env.run(&["incident", "close", &id]).success();

    env.run(&["task", "create", "--incident", &id, "-d", "again", "--assignee", "bob"])
        .failure()
        .stderr(predicate::str::contains("Precondition failed"));

    env.run(&["admin", "audit", "incident", &id])
        .success()
        .stdout(predicate::str::contains("acknowledged"));
    Ok(())
}

#[test]
fn test_upgrade_needs_a_baseline_then_validates() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.activate_baseline_pack();

    env.run(&["upgrade"])
        .failure()
        .stderr(predicate::str::contains("Precondition failed"));

    env.run(&["admin", "baseline"])
        .success()
        .stdout(predicate::str::contains("MB-000001"));
    env.run(&["admin", "validate"])
        .success()
        .stdout(predicate::str::contains("passed"));
    env.run(&["upgrade"])
        .success()
        .stdout(predicate::str::contains("v1 -> v2"));

    let health = env.json(&["health"])?;
    assert_eq!(health["schema_version"], Value::from(2));
    Ok(())
}
