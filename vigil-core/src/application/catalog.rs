// vigil-core/src/application/catalog.rs

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{info, instrument};

use crate::application::context::ServiceContext;
use crate::domain::audit::EntityKind;
use crate::domain::catalog::{
    ApprovalAction, ApprovalState, EditOutcome, PackState, Rule, RuleDefinition, RulePack, RuleRef,
};
use crate::domain::error::DomainError;
use crate::domain::evaluation::CompiledPredicate;
use crate::error::Result;

/// A compiled rule version ready to run.
pub struct ResolvedRule {
    pub rule_id: String,
    pub version: u32,
    pub predicate: CompiledPredicate,
}

/// Snapshot of an active pack with its compiled rules.
pub struct ResolvedPack {
    pub pack: RulePack,
    pub rules: Vec<ResolvedRule>,
}

/// Owns rules and packs. Lock order is always rules, then packs.
pub struct RuleCatalog {
    rules: RwLock<BTreeMap<String, Rule>>,
    packs: RwLock<BTreeMap<String, RulePack>>,
    ctx: ServiceContext,
}

impl RuleCatalog {
    pub fn new(ctx: ServiceContext) -> Self {
        Self::restore(ctx, Vec::new(), Vec::new())
    }

    pub fn restore(ctx: ServiceContext, rules: Vec<Rule>, packs: Vec<RulePack>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
            packs: RwLock::new(packs.into_iter().map(|p| (p.id.clone(), p)).collect()),
            ctx,
        }
    }

    // --- Rules ---

    #[instrument(skip(self, def), fields(rule = %def.id))]
    pub fn create_rule(&self, def: RuleDefinition, actor: &str) -> Result<Rule> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if rules.contains_key(&def.id) {
            return Err(DomainError::Consistency(format!("rule '{}' already exists", def.id)).into());
        }
        let rule = Rule::new(def, actor, self.ctx.now())?;
        self.ctx
            .record(EntityKind::Rule, &rule.id, actor, "create", None, rule.audit_state());
        info!(rule = %rule.id, "rule created as draft");
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    #[instrument(skip(self, def), fields(rule = %def.id))]
    pub fn edit_rule(&self, def: RuleDefinition, actor: &str) -> Result<EditOutcome> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .get_mut(&def.id)
            .ok_or_else(|| DomainError::not_found("rule", &def.id))?;
        let before = rule.audit_state();
        let outcome = rule.edit(def, self.ctx.now())?;
        self.ctx
            .record(EntityKind::Rule, &rule.id, actor, "edit", Some(before), rule.audit_state());
        info!(rule = %rule.id, ?outcome, "rule edited");
        Ok(outcome)
    }

    fn transition(&self, rule_id: &str, action: ApprovalAction, actor: &str, label: &str) -> Result<Rule> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        self.apply(&mut rules, rule_id, action, actor, label)
    }

    fn apply(
        &self,
        rules: &mut BTreeMap<String, Rule>,
        rule_id: &str,
        action: ApprovalAction,
        actor: &str,
        label: &str,
    ) -> Result<Rule> {
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| DomainError::not_found("rule", rule_id))?;
        let before = rule.audit_state();
        rule.transition(action, actor, self.ctx.now())?;
        self.ctx
            .record(EntityKind::Rule, rule_id, actor, label, Some(before.clone()), rule.audit_state());
        info!(rule = rule_id, from = %before, to = %rule.audit_state(), "rule {}", label);
        Ok(rule.clone())
    }

    pub fn submit_for_approval(&self, rule_id: &str, actor: &str) -> Result<Rule> {
        self.transition(rule_id, ApprovalAction::Submit, actor, "submit")
    }

    pub fn approve(&self, rule_id: &str, approver: &str) -> Result<Rule> {
        self.transition(rule_id, ApprovalAction::Approve, approver, "approve")
    }

    /// Sends a pending version back to draft.
    pub fn reject(&self, rule_id: &str, actor: &str, reason: &str) -> Result<Rule> {
        if reason.trim().is_empty() {
            return Err(DomainError::Precondition("a rejection needs a reason".into()).into());
        }
        self.transition(rule_id, ApprovalAction::Reject, actor, &format!("reject: {}", reason.trim()))
    }

    /// Fails while an active pack still references the rule.
    pub fn deprecate(&self, rule_id: &str, actor: &str) -> Result<Rule> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let packs = self.packs.read().unwrap_or_else(PoisonError::into_inner);
        let users: Vec<&str> = packs
            .values()
            .filter(|p| p.state == PackState::Active && p.references(rule_id))
            .map(|p| p.id.as_str())
            .collect();
        if !users.is_empty() {
            return Err(DomainError::Consistency(format!(
                "rule '{}' is referenced by active pack(s): {}",
                rule_id,
                users.join(", ")
            ))
            .into());
        }
        self.apply(&mut rules, rule_id, ApprovalAction::Deprecate, actor, "deprecate")
    }

    pub fn rule(&self, rule_id: &str) -> Result<Rule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("rule", rule_id).into())
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // --- Packs ---

    #[instrument(skip(self))]
    pub fn create_pack(&self, name: &str, actor: &str) -> Result<RulePack> {
        let mut packs = self.packs.write().unwrap_or_else(PoisonError::into_inner);
        if packs.contains_key(name) {
            return Err(DomainError::Consistency(format!("pack '{}' already exists", name)).into());
        }
        let pack = RulePack::new(name, self.ctx.now())?;
        self.ctx
            .record(EntityKind::Pack, &pack.id, actor, "create", None, pack.audit_state());
        info!(pack = name, "pack staged");
        packs.insert(pack.id.clone(), pack.clone());
        Ok(pack)
    }

    #[instrument(skip(self))]
    pub fn add_rule_version(
        &self,
        pack_id: &str,
        rule_id: &str,
        version: u32,
        actor: &str,
    ) -> Result<RulePack> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut packs = self.packs.write().unwrap_or_else(PoisonError::into_inner);
        let pack = packs
            .get_mut(pack_id)
            .ok_or_else(|| DomainError::not_found("pack", pack_id))?;
        rules
            .get(rule_id)
            .and_then(|r| r.version(version))
            .ok_or_else(|| DomainError::not_found("rule version", format!("{}@v{}", rule_id, version)))?;

        let before = pack.audit_state();
        pack.add_rule_version(rule_id, version)?;
        self.ctx
            .record(EntityKind::Pack, pack_id, actor, "add_rule_version", Some(before), pack.audit_state());
        info!(pack = pack_id, rule = rule_id, version, revision = pack.revision, "rule version added");
        Ok(pack.clone())
    }

    #[instrument(skip(self))]
    pub fn promote(&self, pack_id: &str, actor: &str) -> Result<RulePack> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut packs = self.packs.write().unwrap_or_else(PoisonError::into_inner);
        let pack = packs
            .get_mut(pack_id)
            .ok_or_else(|| DomainError::not_found("pack", pack_id))?;
        let lookup = |r: &RuleRef| -> Option<ApprovalState> {
            rules.get(&r.rule_id).and_then(|rule| rule.version(r.version)).map(|v| v.state)
        };

        let before = pack.audit_state();
        pack.promote(lookup, self.ctx.now())?;
        self.ctx
            .record(EntityKind::Pack, pack_id, actor, "promote", Some(before), pack.audit_state());
        info!(pack = pack_id, revision = pack.revision, "pack promoted to active");
        Ok(pack.clone())
    }

    #[instrument(skip(self))]
    pub fn retire_pack(&self, pack_id: &str, actor: &str) -> Result<RulePack> {
        let mut packs = self.packs.write().unwrap_or_else(PoisonError::into_inner);
        let pack = packs
            .get_mut(pack_id)
            .ok_or_else(|| DomainError::not_found("pack", pack_id))?;
        let before = pack.audit_state();
        pack.retire(self.ctx.now())?;
        self.ctx
            .record(EntityKind::Pack, pack_id, actor, "retire", Some(before), pack.audit_state());
        info!(pack = pack_id, "pack retired");
        Ok(pack.clone())
    }

    pub fn pack(&self, pack_id: &str) -> Result<RulePack> {
        self.packs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pack_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("pack", pack_id).into())
    }

    pub fn packs(&self) -> Vec<RulePack> {
        self.packs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Compile every rule version of an active pack.
    pub fn resolve_active(&self, pack_id: &str) -> Result<ResolvedPack> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let packs = self.packs.read().unwrap_or_else(PoisonError::into_inner);
        let pack = packs
            .get(pack_id)
            .ok_or_else(|| DomainError::not_found("pack", pack_id))?;
        if pack.state != PackState::Active {
            return Err(DomainError::invalid_state("pack", pack_id, pack.state, "evaluate").into());
        }

        let mut resolved = Vec::with_capacity(pack.rules.len());
        for r in &pack.rules {
            let version = rules
                .get(&r.rule_id)
                .and_then(|rule| rule.version(r.version))
                .ok_or_else(|| DomainError::not_found("rule version", r.to_string()))?;
            resolved.push(ResolvedRule {
                rule_id: r.rule_id.clone(),
                version: r.version,
                predicate: version.compile()?,
            });
        }
        Ok(ResolvedPack {
            pack: pack.clone(),
            rules: resolved,
        })
    }
}
