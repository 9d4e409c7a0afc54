pub mod project;
pub mod rules;

pub use crate::domain::project::ProjectConfig;
pub use project::{find_main_config, load_project_config};
pub use rules::{load_rule_definitions, load_rule_file};
