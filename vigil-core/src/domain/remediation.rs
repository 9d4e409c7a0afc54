// vigil-core/src/domain/remediation.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Assigned,
    InProgress,
    Escalated,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    /// Accepts `in_progress`, `IN_PROGRESS`, `in-progress`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "assigned" => Ok(TaskStatus::Assigned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "escalated" => Ok(TaskStatus::Escalated),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(DomainError::Precondition(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

impl TaskStatus {
    /// The remediation graph. Completion additionally needs evidence and a resolved incident.
    /// An escalated task leaves escalation only through `RemediationTask::reassign`.
    pub fn can_move_to(self, next: TaskStatus) -> bool {
        use TaskStatus as S;
        matches!(
            (self, next),
            (S::Assigned, S::InProgress)
                | (S::Assigned, S::Escalated)
                | (S::InProgress, S::Escalated)
                | (S::InProgress, S::Completed)
        )
    }

    pub fn is_open(self) -> bool {
        self != TaskStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNote {
    pub at: DateTime<Utc>,
    pub status: TaskStatus,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationTask {
    pub id: String,
    pub incident_id: String,
    pub description: String,
    pub assignee: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub notes: Vec<TaskNote>,
    #[serde(default)]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every change.
    pub version: u64,
}

impl RemediationTask {
    pub fn new(
        id: String,
        incident_id: &str,
        description: &str,
        assignee: &str,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if description.trim().is_empty() || assignee.trim().is_empty() {
            return Err(DomainError::Precondition(
                "a remediation task needs a description and an assignee".into(),
            ));
        }
        Ok(Self {
            id,
            incident_id: incident_id.to_string(),
            description: description.trim().to_string(),
            assignee: assignee.trim().to_string(),
            status: TaskStatus::Assigned,
            notes: Vec::new(),
            evidence: None,
            created_at: at,
            updated_at: at,
            completed_at: None,
            version: 1,
        })
    }

    pub fn check_version(&self, expected: Option<u64>) -> Result<(), DomainError> {
        match expected {
            Some(v) if v != self.version => Err(DomainError::Conflict {
                entity: "task",
                id: self.id.clone(),
                expected: v,
                actual: self.version,
            }),
            _ => Ok(()),
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.version += 1;
    }

    fn push_note(&mut self, note: &str, at: DateTime<Utc>) {
        if !note.trim().is_empty() {
            self.notes.push(TaskNote {
                at,
                status: self.status,
                text: note.trim().to_string(),
            });
        }
    }

    /// Non-completing moves only; completion goes through [`RemediationTask::complete`].
    pub fn move_to(&mut self, next: TaskStatus, note: &str, at: DateTime<Utc>) -> Result<TaskStatus, DomainError> {
        let from = self.status;
        if next == TaskStatus::Completed || !from.can_move_to(next) {
            return Err(DomainError::invalid_state(
                "task",
                &self.id,
                from,
                format!("move to {}", next),
            ));
        }
        self.status = next;
        self.push_note(note, at);
        self.touch(at);
        Ok(from)
    }

    pub fn complete(&mut self, evidence: &str, at: DateTime<Utc>) -> Result<TaskStatus, DomainError> {
        if evidence.trim().is_empty() {
            return Err(DomainError::Precondition(format!(
                "completing task '{}' requires evidence",
                self.id
            )));
        }
        let from = self.status;
        if !from.can_move_to(TaskStatus::Completed) {
            return Err(DomainError::invalid_state("task", &self.id, from, "complete"));
        }
        self.status = TaskStatus::Completed;
        self.evidence = Some(evidence.trim().to_string());
        self.completed_at = Some(at);
        self.touch(at);
        Ok(from)
    }

    /// New owner. An escalated task goes back to work.
    pub fn reassign(&mut self, assignee: &str, at: DateTime<Utc>) -> Result<TaskStatus, DomainError> {
        let from = self.status;
        if !from.is_open() {
            return Err(DomainError::invalid_state("task", &self.id, from, "reassign"));
        }
        if assignee.trim().is_empty() {
            return Err(DomainError::Precondition("assignee is empty".into()));
        }
        self.assignee = assignee.trim().to_string();
        if from == TaskStatus::Escalated {
            self.status = TaskStatus::InProgress;
        }
        self.push_note(&format!("reassigned to {}", self.assignee), at);
        self.touch(at);
        Ok(from)
    }

    pub fn time_to_resolution(&self) -> Option<Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}
