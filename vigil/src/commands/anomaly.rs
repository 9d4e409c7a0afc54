// vigil/src/commands/anomaly.rs
//
// USE CASE: Synthetic drills and anomaly detection.

use vigil_core::domain::compliance::AnomalySignal;

use super::Session;
use crate::cli::AnomalyCommands;
use crate::output;

pub fn execute(session: &Session, command: AnomalyCommands) -> anyhow::Result<()> {
    let engine = session.open()?;

    match command {
        AnomalyCommands::Inject { asset, score } => {
            let obs = engine.inject_synthetic_anomaly(&asset, score)?;
            session.persist(&engine)?;
            session.emit(&obs, |o| {
                output::success(format!(
                    "Synthetic observation queued for {} (score {}); run `vigil anomaly detect`",
                    o.asset,
                    output::ratio(o.score)
                ));
            })
        }
        AnomalyCommands::Detect => {
            let signals = engine.detect_anomalies();
            session.persist(&engine)?;
            session.emit(&signals, |s| {
                print_signals(s);
                println!("📈 {} new signal(s)", s.len());
            })
        }
        AnomalyCommands::List => {
            let signals = engine.signals();
            session.emit(&signals, |s| print_signals(s))
        }
    }
}

pub fn print_signals(signals: &[AnomalySignal]) {
    let mut table = output::table(&[
        "Signal", "Asset", "Scope", "Observed", "Expected", "z", "Severity", "Synthetic", "At",
    ]);
    for s in signals {
        table.add_row(vec![
            s.id.clone(),
            s.asset.clone(),
            s.scope.to_string(),
            output::ratio(s.observed),
            format!("{} .. {}", output::ratio(s.expected_low), output::ratio(s.expected_high)),
            format!("{:.2}", s.z_score),
            s.severity.to_string(),
            if s.synthetic { "yes" } else { "no" }.to_string(),
            output::when(s.observed_at),
        ]);
    }
    output::print_table(&table, "No anomaly signals");
}
