// vigil-core/src/domain/catalog/mod.rs

pub mod pack;
pub mod rule;

pub use pack::{PackState, RulePack, RuleRef};
pub use rule::{ApprovalAction, ApprovalState, EditOutcome, Rule, RuleDefinition, RuleVersion};
