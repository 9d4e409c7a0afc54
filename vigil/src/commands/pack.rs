// vigil/src/commands/pack.rs
//
// USE CASE: Rule packs (staging, promotion, retirement).

use super::Session;
use crate::cli::PackCommands;
use crate::output;

pub fn execute(session: &Session, command: PackCommands) -> anyhow::Result<()> {
    let engine = session.open()?;
    let catalog = engine.catalog();
    let actor = session.actor.as_str();

    match command {
        PackCommands::List => {
            let packs = catalog.packs();
            return session.emit(&packs, |packs| {
                let mut table = output::table(&["Pack", "State", "Revision", "Rules", "Promoted"]);
                for p in packs {
                    table.add_row(vec![
                        p.id.clone(),
                        p.state.to_string(),
                        p.revision.to_string(),
                        p.rules.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "),
                        output::maybe(p.promoted_at.map(output::when)),
                    ]);
                }
                output::print_table(&table, "No packs yet.");
            });
        }
        PackCommands::Create { name } => {
            catalog.create_pack(&name, actor)?;
            output::success(format!("Pack {} staged", name));
        }
        PackCommands::Add { pack, rule, version } => {
            let p = catalog.add_rule_version(&pack, &rule, version, actor)?;
            output::success(format!("{}@v{} added to {} (revision {})", rule, version, pack, p.revision));
        }
        PackCommands::Promote { pack } => {
            catalog.promote(&pack, actor)?;
            output::success(format!("Pack {} is active", pack));
        }
        PackCommands::Retire { pack } => {
            catalog.retire_pack(&pack, actor)?;
            output::success(format!("Pack {} retired", pack));
        }
    }

    session.persist(&engine)
}
