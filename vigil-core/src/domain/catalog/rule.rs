// vigil-core/src/domain/catalog/rule.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::evaluation::{CompiledPredicate, RulePredicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Draft,
    PendingApproval,
    Approved,
    Deprecated,
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalState::Draft => "draft",
            ApprovalState::PendingApproval => "pending_approval",
            ApprovalState::Approved => "approved",
            ApprovalState::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    Submit,
    Approve,
    Reject,
    Deprecate,
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalAction::Submit => "submit",
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Deprecate => "deprecate",
        };
        f.write_str(s)
    }
}

impl ApprovalState {
    /// The approval workflow, in one place.
    pub fn apply(self, action: ApprovalAction) -> Option<ApprovalState> {
        use ApprovalAction as A;
        use ApprovalState as S;
        match (self, action) {
            (S::Draft, A::Submit) => Some(S::PendingApproval),
            (S::PendingApproval, A::Approve) => Some(S::Approved),
            (S::PendingApproval, A::Reject) => Some(S::Draft),
            (S::Deprecated, A::Deprecate) => None,
            (_, A::Deprecate) => Some(S::Deprecated),
            _ => None,
        }
    }
}

/// What authors write (YAML rule files, CLI, API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_asset_type")]
    pub target_asset_type: String,
    pub predicate: RulePredicate,
}

fn default_asset_type() -> String {
    "table".to_string()
}

impl RuleDefinition {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::InvalidDefinition("rule id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidDefinition(format!(
                "rule '{}' has no name",
                self.id
            )));
        }
        self.predicate.compile().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVersion {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub predicate: RulePredicate,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

impl RuleVersion {
    pub fn compile(&self) -> Result<CompiledPredicate, DomainError> {
        self.predicate.compile()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The draft was rewritten in place.
    UpdatedDraft(u32),
    /// The latest version was approved: a new draft version was appended.
    NewVersion(u32),
}

/// A rule and its full version history. Rules are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub target_asset_type: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub versions: Vec<RuleVersion>,
}

impl Rule {
    pub fn new(def: RuleDefinition, actor: &str, at: DateTime<Utc>) -> Result<Self, DomainError> {
        def.validate()?;
        Ok(Self {
            id: def.id,
            target_asset_type: def.target_asset_type,
            created_at: at,
            created_by: actor.to_string(),
            versions: vec![RuleVersion {
                version: 1,
                name: def.name,
                description: def.description,
                predicate: def.predicate,
                state: ApprovalState::Draft,
                created_at: at,
                approved_by: None,
                approved_at: None,
            }],
        })
    }

    pub fn latest(&self) -> Result<&RuleVersion, DomainError> {
        self.versions
            .last()
            .ok_or_else(|| DomainError::Consistency(format!("rule '{}' has no versions", self.id)))
    }

    fn latest_mut(&mut self) -> Result<&mut RuleVersion, DomainError> {
        let id = self.id.clone();
        self.versions
            .last_mut()
            .ok_or_else(|| DomainError::Consistency(format!("rule '{}' has no versions", id)))
    }

    pub fn version(&self, version: u32) -> Option<&RuleVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn is_deprecated(&self) -> bool {
        self.versions
            .iter()
            .all(|v| v.state == ApprovalState::Deprecated)
    }

    /// Compact state used by the audit trail, e.g. `v2:approved`.
    pub fn audit_state(&self) -> String {
        match self.versions.last() {
            Some(v) => format!("v{}:{}", v.version, v.state),
            None => "empty".to_string(),
        }
    }

    /// Apply an approval action. Submit / approve / reject target the latest
    /// version; deprecate retires every version.
    pub fn transition(
        &mut self,
        action: ApprovalAction,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let current = self.latest()?.state;
        let next = current
            .apply(action)
            .ok_or_else(|| DomainError::invalid_state("rule", &self.id, current, action.to_string()))?;

        match action {
            ApprovalAction::Deprecate => {
                for v in &mut self.versions {
                    v.state = ApprovalState::Deprecated;
                }
            }
            ApprovalAction::Approve => {
                let latest = self.latest_mut()?;
                latest.state = next;
                latest.approved_by = Some(actor.to_string());
                latest.approved_at = Some(at);
            }
            ApprovalAction::Submit | ApprovalAction::Reject => {
                self.latest_mut()?.state = next;
            }
        }
        Ok(())
    }

    /// Drafts change in place; approved rules grow a new draft version.
    pub fn edit(&mut self, def: RuleDefinition, at: DateTime<Utc>) -> Result<EditOutcome, DomainError> {
        if def.id != self.id {
            return Err(DomainError::InvalidDefinition(format!(
                "definition id '{}' does not match rule '{}'",
                def.id, self.id
            )));
        }
        def.validate()?;

        let (state, version) = {
            let latest = self.latest()?;
            (latest.state, latest.version)
        };
        match state {
            ApprovalState::Draft => {
                let latest = self.latest_mut()?;
                latest.name = def.name;
                latest.description = def.description;
                latest.predicate = def.predicate;
                Ok(EditOutcome::UpdatedDraft(latest.version))
            }
            ApprovalState::Approved => {
                let version = version + 1;
                self.versions.push(RuleVersion {
                    version,
                    name: def.name,
                    description: def.description,
                    predicate: def.predicate,
                    state: ApprovalState::Draft,
                    created_at: at,
                    approved_by: None,
                    approved_at: None,
                });
                Ok(EditOutcome::NewVersion(version))
            }
            other => Err(DomainError::invalid_state("rule", &self.id, other, "edit")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn def(id: &str) -> RuleDefinition {
        RuleDefinition {
            id: id.into(),
            name: "Email valid".into(),
            description: None,
            target_asset_type: "table".into(),
            predicate: RulePredicate::Email {
                column: "email".into(),
            },
        }
    }

    fn approved_rule() -> Rule {
        let mut rule = Rule::new(def("udf_dq_email_valid"), "author", Utc::now()).unwrap();
        rule.transition(ApprovalAction::Submit, "author", Utc::now())
            .unwrap();
        rule.transition(ApprovalAction::Approve, "lead", Utc::now())
            .unwrap();
        rule
    }

    #[test]
    fn test_transition_table() {
        use ApprovalAction as A;
        use ApprovalState as S;
        assert_eq!(S::Draft.apply(A::Submit), Some(S::PendingApproval));
        assert_eq!(S::Draft.apply(A::Approve), None);
        assert_eq!(S::PendingApproval.apply(A::Reject), Some(S::Draft));
        assert_eq!(S::Approved.apply(A::Submit), None);
        assert_eq!(S::Approved.apply(A::Deprecate), Some(S::Deprecated));
        assert_eq!(S::Deprecated.apply(A::Deprecate), None);
    }

    #[test]
    fn test_approve_requires_pending() {
        let mut rule = Rule::new(def("r1"), "author", Utc::now()).unwrap();
        let res = rule.transition(ApprovalAction::Approve, "lead", Utc::now());
        assert!(matches!(res, Err(DomainError::InvalidState { .. })));
    }

    #[test]
    fn test_approval_records_approver() {
        let rule = approved_rule();
        let latest = rule.latest().unwrap();
        assert_eq!(latest.state, ApprovalState::Approved);
        assert_eq!(latest.approved_by.as_deref(), Some("lead"));
        assert_eq!(rule.audit_state(), "v1:approved");
    }

    #[test]
    fn test_edit_after_approval_creates_new_version() {
        let mut rule = approved_rule();
        let outcome = rule.edit(def("udf_dq_email_valid"), Utc::now()).unwrap();
        assert_eq!(outcome, EditOutcome::NewVersion(2));
        assert_eq!(rule.version(1).unwrap().state, ApprovalState::Approved);
        assert_eq!(rule.version(2).unwrap().state, ApprovalState::Draft);
    }

    #[test]
    fn test_edit_draft_in_place() {
        let mut rule = Rule::new(def("r1"), "author", Utc::now()).unwrap();
        let mut changed = def("r1");
        changed.name = "Renamed".into();
        assert_eq!(
            rule.edit(changed, Utc::now()).unwrap(),
            EditOutcome::UpdatedDraft(1)
        );
        assert_eq!(rule.versions.len(), 1);
        assert_eq!(rule.latest().unwrap().name, "Renamed");
    }

    #[test]
    fn test_edit_pending_is_rejected() {
        let mut rule = Rule::new(def("r1"), "author", Utc::now()).unwrap();
        rule.transition(ApprovalAction::Submit, "author", Utc::now())
            .unwrap();
        assert!(rule.edit(def("r1"), Utc::now()).is_err());
    }

    #[test]
    fn test_deprecate_retires_all_versions() {
        let mut rule = approved_rule();
        rule.edit(def("udf_dq_email_valid"), Utc::now()).unwrap();
        rule.transition(ApprovalAction::Deprecate, "lead", Utc::now())
            .unwrap();
        assert!(rule.is_deprecated());
        assert!(rule.edit(def("udf_dq_email_valid"), Utc::now()).is_err());
    }
}
