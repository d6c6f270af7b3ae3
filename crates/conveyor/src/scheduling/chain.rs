//! Trigger evaluation: terminal outcomes minting follow-up jobs
//!
//! Chaining is best-effort and never transactional with the parent's
//! completion; enqueue failures are the caller's to log.

use std::collections::HashMap;

use crate::types::{Job, JobResult, JobStatus, Trigger};

/// Metadata key carrying the parent's id into a chained job.
pub const META_PARENT_JOB_ID: &str = "parent_job_id";
/// Metadata key carrying the parent's result data (JSON) into a chained job.
pub const META_PARENT_RESULT: &str = "parent_result";
/// Metadata key carrying the parent's job type into a chained job.
pub const META_PARENT_TYPE: &str = "parent_type";
/// Trigger parameter overriding the spawned job's target object.
pub const PARAM_OBJECT_NAME: &str = "object_name";

/// Evaluate the parent's triggers against its terminal outcome and build
/// the follow-up jobs. Children of different triggers are independent; no
/// ordering is implied between them.
pub fn plan_children(
    parent: &Job,
    outcome: JobStatus,
    result: &JobResult,
    default_chains: &HashMap<String, Vec<Trigger>>,
) -> Vec<Job> {
    parent
        .triggers
        .iter()
        .filter(|trigger| trigger.condition.matches(outcome))
        .map(|trigger| mint_child(parent, trigger, result, default_chains))
        .collect()
}

fn mint_child(
    parent: &Job,
    trigger: &Trigger,
    result: &JobResult,
    default_chains: &HashMap<String, Vec<Trigger>>,
) -> Job {
    let object_name = trigger
        .parameters
        .get(PARAM_OBJECT_NAME)
        .cloned()
        .unwrap_or_else(|| parent.object_name.clone());
    let priority = trigger.priority.unwrap_or(parent.priority);

    let mut metadata = HashMap::new();
    metadata.insert(META_PARENT_JOB_ID.to_string(), parent.id.to_string());
    metadata.insert(META_PARENT_TYPE.to_string(), parent.job_type.clone());
    metadata.insert(
        META_PARENT_RESULT.to_string(),
        serde_json::to_string(&result.data).unwrap_or_default(),
    );
    // trigger parameters win over inherited fields on key collision
    for (key, value) in &trigger.parameters {
        metadata.insert(key.clone(), value.clone());
    }

    let mut child = Job::new(&trigger.job_type, &parent.bucket, object_name)
        .with_priority(priority)
        .with_triggers(
            default_chains
                .get(&trigger.job_type)
                .cloned()
                .unwrap_or_default(),
        );
    child.depends_on = vec![parent.id];
    child.chain_id = Some(parent.chain_root());
    child.metadata = metadata;
    child
}

/// Parse the upstream result data a chained job carries in its metadata.
pub fn parent_result_data(job: &Job) -> Option<HashMap<String, serde_json::Value>> {
    job.metadata
        .get(META_PARENT_RESULT)
        .and_then(|raw| serde_json::from_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPriority;
    use serde_json::json;
    use uuid::Uuid;

    fn chains() -> HashMap<String, Vec<Trigger>> {
        let mut chains = HashMap::new();
        chains.insert("parse".to_string(), vec![Trigger::on_success("export")]);
        chains
    }

    #[test]
    fn test_chaining_on_success() {
        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_trigger(Trigger::on_success("parse"));
        let result = JobResult::ok("done").with_data("files", json!(["extracted/a/x.csv"]));

        let children = plan_children(&parent, JobStatus::Completed, &result, &chains());
        assert_eq!(children.len(), 1);

        let child = &children[0];
        assert_eq!(child.job_type, "parse");
        assert_eq!(child.depends_on, vec![parent.id]);
        assert_eq!(child.chain_id, Some(parent.id));
        assert_ne!(child.id, parent.id);
        assert_eq!(child.metadata[META_PARENT_JOB_ID], parent.id.to_string());
        assert_eq!(child.metadata[META_PARENT_TYPE], "decompress");
        // the child carries the next hop of the chain
        assert_eq!(child.triggers[0].job_type, "export");
    }

    #[test]
    fn test_on_failure_does_not_fire_on_success() {
        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_trigger(Trigger::on_failure("parse"));
        let children =
            plan_children(&parent, JobStatus::Completed, &JobResult::ok("done"), &chains());
        assert!(children.is_empty());
    }

    #[test]
    fn test_always_fires_on_both_outcomes() {
        let parent =
            Job::new("parse", "inbox", "drop/a.csv").with_trigger(Trigger::always("export"));
        let ok = plan_children(&parent, JobStatus::Completed, &JobResult::ok("x"), &chains());
        let failed =
            plan_children(&parent, JobStatus::Failed, &JobResult::error("x"), &chains());
        assert_eq!(ok.len(), 1);
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn test_object_name_and_priority_resolution() {
        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_priority(JobPriority::High)
            .with_trigger(Trigger::on_success("parse"))
            .with_trigger(
                Trigger::on_success("parse")
                    .with_priority(JobPriority::Low)
                    .with_parameter(PARAM_OBJECT_NAME, "override/b.csv"),
            );

        let children =
            plan_children(&parent, JobStatus::Completed, &JobResult::ok("x"), &chains());
        assert_eq!(children.len(), 2);

        // no explicit settings: inherit from the parent
        assert_eq!(children[0].object_name, "drop/a.zip");
        assert_eq!(children[0].priority, JobPriority::High);
        // explicit settings win
        assert_eq!(children[1].object_name, "override/b.csv");
        assert_eq!(children[1].priority, JobPriority::Low);
    }

    #[test]
    fn test_trigger_parameters_overlay_metadata() {
        let parent = Job::new("decompress", "inbox", "drop/a.zip").with_trigger(
            Trigger::on_success("parse").with_parameter("parent_type", "overridden"),
        );
        let children =
            plan_children(&parent, JobStatus::Completed, &JobResult::ok("x"), &chains());
        assert_eq!(children[0].metadata[META_PARENT_TYPE], "overridden");
    }

    #[test]
    fn test_chain_identity_spans_generations() {
        let root_id = Uuid::new_v4();
        let mut parent = Job::new("parse", "inbox", "drop/a.csv")
            .with_trigger(Trigger::on_success("export"));
        parent.chain_id = Some(root_id);

        let children =
            plan_children(&parent, JobStatus::Completed, &JobResult::ok("x"), &chains());
        assert_eq!(children[0].chain_id, Some(root_id));
    }

    #[test]
    fn test_parent_result_roundtrip() {
        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_trigger(Trigger::on_success("parse"));
        let result = JobResult::ok("done").with_data("files", json!(["x.csv", "y.csv"]));

        let children = plan_children(&parent, JobStatus::Completed, &result, &chains());
        let data = parent_result_data(&children[0]).unwrap();
        assert_eq!(data["files"], json!(["x.csv", "y.csv"]));
    }
}
