// vigil-core/src/domain/evaluation/mod.rs

pub mod predicate;
pub mod result;

pub use predicate::{CompiledPredicate, PassCounts, PredicateError, RulePredicate};
pub use result::{EvaluationResult, RuleOutcome, quality_score};
