//! Jobs, triggers, and processing results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Scheduling priority. Higher priorities dequeue first; within a tier,
/// jobs dequeue in enqueue order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed, and Cancelled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lifecycle transitions are monotonic: Pending -> Processing ->
    /// {Completed, Failed}; Cancelled is reachable only from Pending.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// When a trigger fires relative to the owning job's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    OnSuccess,
    OnFailure,
    Always,
}

impl TriggerCondition {
    /// Whether this condition matches a terminal outcome. Cancelled jobs
    /// never fire triggers.
    pub fn matches(self, outcome: JobStatus) -> bool {
        match self {
            Self::OnSuccess => outcome == JobStatus::Completed,
            Self::OnFailure => outcome == JobStatus::Failed,
            Self::Always => matches!(outcome, JobStatus::Completed | JobStatus::Failed),
        }
    }
}

/// Declarative follow-up rule, evaluated when the owning job terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub condition: TriggerCondition,
    /// Job type of the spawned follow-up job.
    pub job_type: String,
    /// Priority for the spawned job; None inherits the parent's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<JobPriority>,
    /// Merged into the spawned job's metadata; `object_name` here overrides
    /// the inherited target object.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
}

impl Trigger {
    pub fn new(condition: TriggerCondition, job_type: impl Into<String>) -> Self {
        Self {
            condition,
            job_type: job_type.into(),
            priority: None,
            parameters: HashMap::new(),
        }
    }

    pub fn on_success(job_type: impl Into<String>) -> Self {
        Self::new(TriggerCondition::OnSuccess, job_type)
    }

    pub fn on_failure(job_type: impl Into<String>) -> Self {
        Self::new(TriggerCondition::OnFailure, job_type)
    }

    pub fn always(job_type: impl Into<String>) -> Self {
        Self::new(TriggerCondition::Always, job_type)
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one processor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl JobResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// A unit of schedulable, typed work targeting one object in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Tag selecting a processor from the registry.
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Local scratch path, if a processor has materialized the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub bucket: String,
    pub object_name: String,
    /// Parent job ids. Chaining provenance, not a scheduling dependency:
    /// parents have already finished by construction.
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    /// Logical chain this job belongs to. The first job in a chain carries
    /// None; its own id becomes the chain id once a child is minted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<Uuid>,
    /// Evaluated when this job reaches a terminal state.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Contextual data carried forward through a chain.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Structured outcome payload, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_type: impl Into<String>,
        bucket: impl Into<String>,
        object_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            priority: JobPriority::default(),
            status: JobStatus::Pending,
            file_path: None,
            bucket: bucket.into(),
            object_name: object_name.into(),
            depends_on: Vec::new(),
            chain_id: None,
            triggers: Vec::new(),
            metadata: HashMap::new(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Record where a processor has materialized the object locally.
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// The chain identity this job passes to children: its explicit chain
    /// id, or its own id for the first hop.
    pub fn chain_root(&self) -> Uuid {
        self.chain_id.unwrap_or(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));

        // terminal states never re-enter the lifecycle
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Processing));
        // cancellation is only reachable from pending
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_trigger_condition_matching() {
        assert!(TriggerCondition::OnSuccess.matches(JobStatus::Completed));
        assert!(!TriggerCondition::OnSuccess.matches(JobStatus::Failed));
        assert!(TriggerCondition::OnFailure.matches(JobStatus::Failed));
        assert!(!TriggerCondition::OnFailure.matches(JobStatus::Completed));
        assert!(TriggerCondition::Always.matches(JobStatus::Completed));
        assert!(TriggerCondition::Always.matches(JobStatus::Failed));
        assert!(!TriggerCondition::Always.matches(JobStatus::Cancelled));
    }

    #[test]
    fn test_chain_root_defaults_to_own_id() {
        let job = Job::new("decompress", "inbox", "drop/a.zip");
        assert_eq!(job.chain_root(), job.id);

        let mut chained = Job::new("parse", "inbox", "drop/a.zip");
        chained.chain_id = Some(job.id);
        assert_eq!(chained.chain_root(), job.id);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Medium);
        assert!(JobPriority::Medium > JobPriority::Low);
        assert_eq!(JobPriority::default(), JobPriority::Medium);
    }
}
