// vigil-core/src/domain/catalog/pack.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::ApprovalState;
use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackState {
    Staged,
    Active,
    Retired,
}

impl fmt::Display for PackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackState::Staged => "staged",
            PackState::Active => "active",
            PackState::Retired => "retired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRef {
    pub rule_id: String,
    pub version: u32,
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.rule_id, self.version)
    }
}

/// A named bundle of rule versions. The name is the identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePack {
    pub id: String,
    /// Bumped on every membership change.
    pub revision: u32,
    pub rules: Vec<RuleRef>,
    pub state: PackState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

impl RulePack {
    pub fn new(name: &str, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::InvalidDefinition("pack name is empty".into()));
        }
        Ok(Self {
            id: name.to_string(),
            revision: 1,
            rules: Vec::new(),
            state: PackState::Staged,
            created_at: at,
            promoted_at: None,
            retired_at: None,
        })
    }

    pub fn audit_state(&self) -> String {
        format!("r{}:{}", self.revision, self.state)
    }

    pub fn references(&self, rule_id: &str) -> bool {
        self.rules.iter().any(|r| r.rule_id == rule_id)
    }

    /// Pin a rule version. A pack holds one version per rule: re-adding replaces it.
    pub fn add_rule_version(&mut self, rule_id: &str, version: u32) -> Result<(), DomainError> {
        if self.state != PackState::Staged {
            return Err(DomainError::invalid_state(
                "pack",
                &self.id,
                self.state,
                "add rule version",
            ));
        }
        match self.rules.iter_mut().find(|r| r.rule_id == rule_id) {
            Some(existing) if existing.version == version => return Ok(()),
            Some(existing) => existing.version = version,
            None => self.rules.push(RuleRef {
                rule_id: rule_id.to_string(),
                version,
            }),
        }
        self.revision += 1;
        Ok(())
    }

    /// `staged → active`. `lookup` resolves each reference to its approval state
    /// (`None` when the rule version does not exist).
    pub fn promote(
        &mut self,
        lookup: impl Fn(&RuleRef) -> Option<ApprovalState>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.state != PackState::Staged {
            return Err(DomainError::invalid_state("pack", &self.id, self.state, "promote"));
        }
        let blockers: Vec<String> = self
            .rules
            .iter()
            .filter_map(|r| match lookup(r) {
                Some(ApprovalState::Approved) => None,
                Some(state) => Some(format!("{} is {}", r, state)),
                None => Some(format!("{} does not exist", r)),
            })
            .collect();
        if !blockers.is_empty() {
            return Err(DomainError::Consistency(format!(
                "pack '{}' cannot be promoted: {}",
                self.id,
                blockers.join(", ")
            )));
        }
        self.state = PackState::Active;
        self.promoted_at = Some(at);
        Ok(())
    }

    pub fn retire(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state == PackState::Retired {
            return Err(DomainError::invalid_state("pack", &self.id, self.state, "retire"));
        }
        self.state = PackState::Retired;
        self.retired_at = Some(at);
        Ok(())
    }
}
