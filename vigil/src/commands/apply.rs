// vigil/src/commands/apply.rs
//
// USE CASE: Evaluate an active rule pack against one asset.

use vigil_core::domain::evaluation::EvaluationResult;

use super::Session;
use crate::output;

pub async fn execute(session: &Session, pack: &str, asset: &str) -> anyhow::Result<()> {
    let start = std::time::Instant::now();
    let engine = session.open()?;
    println!("🚀 Applying {} to {}...", pack, asset);

    let outcome = engine.apply_rule_pack(pack, asset).await;
    // A timed-out run is still recorded; keep it before reporting the error.
    session.persist(&engine)?;
    let result = outcome?;

    session.emit(&result, |r| {
        print_result(r);
        println!("\n✨ Done in {:.2?}", start.elapsed());
    })
}

pub fn print_result(r: &EvaluationResult) {
    let mut table = output::table(&["Rule", "Version", "Passed", "Failed", "Evaluated", "Pass ratio", "Error"]);
    for o in &r.rules {
        table.add_row(vec![
            o.rule_id.clone(),
            format!("v{}", o.version),
            o.passed.to_string(),
            o.failed.to_string(),
            o.evaluated.to_string(),
            output::ratio(o.pass_ratio),
            output::maybe(o.error.as_deref()),
        ]);
    }
    output::print_table(&table, "Pack has no rules");
    output::kv("evaluation", &r.id);
    output::kv("records", r.records_evaluated);
    output::kv("pass ratio", output::ratio(r.pass_ratio));
    output::kv("quality score", output::ratio(r.quality_score));
    if r.partial {
        output::warning("Partial result: at least one rule could not run");
    }
}
