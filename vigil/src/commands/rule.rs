// vigil/src/commands/rule.rs
//
// USE CASE: Rule catalog (authoring, approval workflow, preview).

use anyhow::Context;
use serde_json::Value;
use vigil_core::domain::catalog::{EditOutcome, Rule};
use vigil_core::infrastructure::config::load_rule_file;

use super::Session;
use crate::cli::RuleCommands;
use crate::output;

pub fn execute(session: &Session, command: RuleCommands) -> anyhow::Result<()> {
    let engine = session.open()?;
    let catalog = engine.catalog();
    let actor = session.actor.as_str();

    match command {
        RuleCommands::List => {
            let rules = catalog.rules();
            return session.emit(&rules, |rules| print_rules(rules));
        }
        RuleCommands::Show { id } => {
            let rule = catalog.rule(&id)?;
            return session.emit(&rule, |rule| {
                println!("📜 {} ({})", rule.id, rule.target_asset_type);
                let mut table = output::table(&["Version", "Name", "Check", "Column", "State", "Approved by"]);
                for v in &rule.versions {
                    table.add_row(vec![
                        format!("v{}", v.version),
                        v.name.clone(),
                        v.predicate.kind_name().to_string(),
                        v.predicate.column().to_string(),
                        v.state.to_string(),
                        output::maybe(v.approved_by.as_deref()),
                    ]);
                }
                output::print_table(&table, "No versions");
            });
        }
        RuleCommands::Create { file } => {
            let defs = load_rule_file(&file).with_context(|| format!("Failed to load {:?}", file))?;
            for def in defs {
                let rule = catalog.create_rule(def, actor)?;
                output::success(format!("Rule {} created as draft v1", rule.id));
            }
        }
        RuleCommands::Edit { file } => {
            let defs = load_rule_file(&file).with_context(|| format!("Failed to load {:?}", file))?;
            for def in defs {
                let id = def.id.clone();
                match catalog.edit_rule(def, actor)? {
                    EditOutcome::UpdatedDraft(v) => output::success(format!("Draft {} v{} updated", id, v)),
                    EditOutcome::NewVersion(v) => output::success(format!("Rule {} has a new draft v{}", id, v)),
                }
            }
        }
        RuleCommands::Submit { id } => {
            catalog.submit_for_approval(&id, actor)?;
            output::success(format!("Rule {} submitted for approval", id));
        }
        RuleCommands::Approve { id } => {
            catalog.approve(&id, actor)?;
            output::success(format!("Rule {} approved by {}", id, actor));
        }
        RuleCommands::Reject { id, reason } => {
            catalog.reject(&id, actor, &reason)?;
            output::warning(format!("Rule {} sent back to draft: {}", id, reason));
        }
        RuleCommands::Deprecate { id } => {
            catalog.deprecate(&id, actor)?;
            output::success(format!("Rule {} deprecated", id));
        }
        RuleCommands::Preview { id, sample } => {
            // Anything that is not JSON is taken as a plain string.
            let value = serde_json::from_str::<Value>(&sample).unwrap_or(Value::String(sample));
            let passed = engine.preview_rule_result(&id, &value)?;
            return session.emit(&passed, |passed| {
                if *passed {
                    output::success(format!("{} passes {}", value, id));
                } else {
                    output::warning(format!("{} fails {}", value, id));
                }
            });
        }
    }

    session.persist(&engine)
}

fn print_rules(rules: &[Rule]) {
    let mut table = output::table(&["Rule", "Name", "Check", "Latest", "State", "Versions"]);
    for rule in rules {
        if let Ok(latest) = rule.latest() {
            table.add_row(vec![
                rule.id.clone(),
                latest.name.clone(),
                latest.predicate.kind_name().to_string(),
                format!("v{}", latest.version),
                latest.state.to_string(),
                rule.versions.len().to_string(),
            ]);
        }
    }
    output::print_table(&table, "No rules yet. Add YAML files under rules/ and run `vigil setup`.");
}
