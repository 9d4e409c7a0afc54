// vigil-core/src/application/remediation.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::application::context::ServiceContext;
use crate::application::incidents::IncidentManager;
use crate::domain::audit::EntityKind;
use crate::domain::error::DomainError;
use crate::domain::incident::IncidentStatus;
use crate::domain::project::RemediationConfig;
use crate::domain::remediation::{RemediationTask, TaskStatus};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSummary {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    /// Mean of completed_at - created_at over completed tasks.
    pub mean_time_to_resolution_secs: Option<f64>,
}

/// Owns remediation tasks. Incidents are only read, through the manager.
pub struct RemediationTracker {
    config: RemediationConfig,
    tasks: RwLock<BTreeMap<String, RemediationTask>>,
    incidents: Arc<IncidentManager>,
    ctx: ServiceContext,
}

impl RemediationTracker {
    pub fn new(config: RemediationConfig, incidents: Arc<IncidentManager>, ctx: ServiceContext) -> Self {
        Self::restore(config, incidents, ctx, Vec::new())
    }

    pub fn restore(
        config: RemediationConfig,
        incidents: Arc<IncidentManager>,
        ctx: ServiceContext,
        tasks: Vec<RemediationTask>,
    ) -> Self {
        Self {
            config,
            tasks: RwLock::new(tasks.into_iter().map(|t| (t.id.clone(), t)).collect()),
            incidents,
            ctx,
        }
    }

    #[instrument(skip(self, description))]
    pub fn create_task(&self, incident_id: &str, description: &str, assignee: &str) -> Result<RemediationTask> {
        let incident = self.incidents.get(incident_id)?;
        if incident.status == IncidentStatus::Closed {
            return Err(DomainError::Precondition(format!(
                "incident '{}' is closed; no new remediation work can be attached",
                incident_id
            ))
            .into());
        }
        let task = RemediationTask::new(
            self.ctx.next_id("TASK"),
            incident_id,
            description,
            assignee,
            self.ctx.now(),
        )?;
        self.ctx
            .record(EntityKind::Task, &task.id, assignee, "create", None, task.status.to_string());
        info!(task = %task.id, incident = incident_id, assignee, "remediation task assigned");
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn create_task_for_latest_incident(
        &self,
        asset: &str,
        description: &str,
        assignee: &str,
    ) -> Result<RemediationTask> {
        let incident = self.incidents.latest_open_for_asset(asset)?;
        self.create_task(&incident.id, description, assignee)
    }

    fn mutate<F>(&self, task_id: &str, expected_version: Option<u64>, actor: &str, action: &str, f: F) -> Result<RemediationTask>
    where
        F: FnOnce(&mut RemediationTask) -> std::result::Result<TaskStatus, DomainError>,
    {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| DomainError::not_found("task", task_id))?;
        task.check_version(expected_version)?;
        let from = f(task)?;
        self.ctx.record(
            EntityKind::Task,
            task_id,
            actor,
            action,
            Some(from.to_string()),
            task.status.to_string(),
        );
        info!(task = task_id, %from, to = %task.status, version = task.version, "task {}", action);
        Ok(task.clone())
    }

    /// Move a task along the remediation graph. Moving to `completed` runs the
    /// completion checks with `note` as evidence.
    #[instrument(skip(self, note))]
    pub fn update_status(
        &self,
        task_id: &str,
        expected_version: Option<u64>,
        status: TaskStatus,
        note: &str,
    ) -> Result<RemediationTask> {
        if status == TaskStatus::Completed {
            return self.complete_checked(task_id, expected_version, note);
        }
        let at = self.ctx.now();
        let actor = self.assignee_of(task_id)?;
        self.mutate(task_id, expected_version, &actor, "update_status", |t| t.move_to(status, note, at))
    }

    #[instrument(skip(self))]
    pub fn reassign(&self, task_id: &str, expected_version: Option<u64>, assignee: &str) -> Result<RemediationTask> {
        let at = self.ctx.now();
        self.mutate(task_id, expected_version, assignee, "reassign", |t| t.reassign(assignee, at))
    }

    #[instrument(skip(self, evidence))]
    pub fn complete_task(&self, task_id: &str, evidence: &str) -> Result<RemediationTask> {
        self.complete_checked(task_id, None, evidence)
    }

    fn complete_checked(&self, task_id: &str, expected_version: Option<u64>, evidence: &str) -> Result<RemediationTask> {
        let task = self.task(task_id)?;
        if evidence.trim().is_empty() {
            return Err(DomainError::Precondition(format!(
                "completing task '{}' requires evidence",
                task_id
            ))
            .into());
        }
        let incident = self.incidents.get(&task.incident_id)?;
        if !matches!(incident.status, IncidentStatus::Resolved | IncidentStatus::Closed) {
            return Err(DomainError::Precondition(format!(
                "incident '{}' is {}; resolve it before completing task '{}'",
                incident.id, incident.status, task_id
            ))
            .into());
        }
        let at = self.ctx.now();
        self.mutate(task_id, expected_version, &task.assignee, "complete", |t| t.complete(evidence, at))
    }

    /// Escalate tasks nobody touched for `escalate_after_hours`.
    pub fn escalate_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(cutoff) = i64::try_from(self.config.escalate_after_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|sla| now.checked_sub_signed(sla))
        else {
            // An SLA longer than the calendar never expires.
            return Vec::new();
        };
        let stale: Vec<String> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| {
                matches!(t.status, TaskStatus::Assigned | TaskStatus::InProgress) && t.updated_at <= cutoff
            })
            .map(|t| t.id.clone())
            .collect();

        stale
            .into_iter()
            .filter(|id| {
                self.mutate(id, None, "system", "escalate", |t| {
                    t.move_to(TaskStatus::Escalated, "no progress within SLA", now)
                })
                .is_ok()
            })
            .collect()
    }

    pub fn summary(&self) -> RemediationSummary {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut by_status: BTreeMap<TaskStatus, usize> = BTreeMap::new();
        for t in tasks.values() {
            *by_status.entry(t.status).or_insert(0) += 1;
        }
        let durations: Vec<f64> = tasks
            .values()
            .filter_map(RemediationTask::time_to_resolution)
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .collect();
        let mean = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };
        RemediationSummary {
            total: tasks.len(),
            by_status,
            mean_time_to_resolution_secs: mean,
        }
    }

    fn assignee_of(&self, task_id: &str) -> Result<String> {
        Ok(self.task(task_id)?.assignee)
    }

    pub fn task(&self, task_id: &str) -> Result<RemediationTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("task", task_id).into())
    }

    pub fn tasks(&self) -> Vec<RemediationTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| t.status.is_open())
            .count()
    }

    pub fn counts_by_incident(&self) -> HashMap<String, usize> {
        let mut out = HashMap::new();
        for t in self.tasks.read().unwrap_or_else(PoisonError::into_inner).values() {
            *out.entry(t.incident_id.clone()).or_insert(0) += 1;
        }
        out
    }
}
