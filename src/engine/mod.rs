//! Workflow Execution Engine
//!
//! - [`orchestrator`]: Step dispatch, continuation, rollback
//! - [`tasks`]: Building tasks from steps
//! - [`join`]: Parallel join barrier and per-instance serialization

pub mod join;
pub mod orchestrator;
pub mod tasks;

pub use orchestrator::Engine;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;
    use crate::config::EngineConfig;
    use crate::definition::{Definition, Step, StepKind, TaskParams};
    use crate::entity::{InstanceStatus, Task, TaskResult, TaskStatus, Workflow, WorkflowInstance};
    use crate::error::EngineError;
    use crate::notify::testing::RecordingNotifier;
    use crate::repository::Repositories;
    use crate::store::MemoryStore;

    struct Harness {
        repos: Repositories,
        engine: Arc<Engine>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let repos = Repositories::from_store(Arc::new(MemoryStore::new()));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Engine::new(repos.clone(), notifier.clone(), EngineConfig::default());
        Harness {
            repos,
            engine: Arc::new(engine),
            notifier,
        }
    }

    impl Harness {
        fn deploy(&self, steps: Vec<Step>) -> Workflow {
            let mut workflow = Workflow::from_definition(&Definition::from_steps("test", steps)).unwrap();
            workflow.activate().unwrap();
            self.repos.workflows.save_workflow(&workflow).unwrap();
            workflow
        }

        fn start(&self, workflow: &Workflow, input: Value) -> Uuid {
            let instance = WorkflowInstance::new(workflow.id, input);
            self.repos.instances.save_instance(&instance).unwrap();
            self.engine.start_instance(instance.id).unwrap();
            instance.id
        }

        fn tasks(&self, instance_id: Uuid) -> Vec<Task> {
            self.repos.instance_tasks(instance_id, 100).unwrap()
        }

        fn open_task(&self, instance_id: Uuid, key: &str) -> Task {
            self.tasks(instance_id)
                .into_iter()
                .find(|t| t.task_key == key && t.status.is_open())
                .unwrap()
        }

        fn count(&self, instance_id: Uuid, key: &str) -> usize {
            self.tasks(instance_id)
                .iter()
                .filter(|t| t.task_key == key)
                .count()
        }

        /// Commits a completion without advancing the instance.
        fn finish(&self, task: &Task, result: TaskResult, output: Value) -> Task {
            let mut task = self.repos.task(task.id).unwrap();
            task.complete(output, None, result).unwrap();
            self.repos.tasks.update_task(&task).unwrap();
            task
        }

        fn approve(&self, instance_id: Uuid, key: &str, output: Value) {
            let task = self.open_task(instance_id, key);
            let task = self.finish(&task, TaskResult::Approved, output);
            self.engine.continue_after_task(&task).unwrap();
        }

        fn status(&self, instance_id: Uuid) -> InstanceStatus {
            self.repos.instance(instance_id).unwrap().status
        }
    }

    fn review_steps() -> Vec<Step> {
        vec![
            Step::parallel(
                "review",
                vec![
                    Step::user_task("legal"),
                    Step::user_task("finance"),
                    Step::user_task("it"),
                ],
            )
            .then("sign"),
            Step::user_task("sign").then("done"),
            Step::complete("done"),
        ]
    }

    #[test]
    fn test_start_requires_active_workflow() {
        let h = harness();
        let definition = Definition::from_steps("test", vec![Step::user_task("a")]);

        let draft = Workflow::from_definition(&definition).unwrap();
        let mut frozen = Workflow::from_definition(&definition).unwrap();
        frozen.activate().unwrap();
        frozen.freeze().unwrap();

        for workflow in [draft, frozen] {
            h.repos.workflows.save_workflow(&workflow).unwrap();
            let instance = WorkflowInstance::new(workflow.id, json!({}));
            h.repos.instances.save_instance(&instance).unwrap();

            let err = h.engine.start_instance(instance.id).unwrap_err();
            assert!(err.is_invalid_transition());
            assert!(h.tasks(instance.id).is_empty());
        }
    }

    #[test]
    fn test_start_missing_instance() {
        let h = harness();
        let id = Uuid::new_v4();
        assert!(matches!(
            h.engine.start_instance(id),
            Err(EngineError::InstanceNotFound(found)) if found == id
        ));
    }

    #[test]
    fn test_first_user_task_creates_one_task() {
        let h = harness();
        let params = TaskParams::default().with_assignee("${initiator}");
        let workflow = h.deploy(vec![
            Step::user_task("submit").with_name("Submit").with_params(params),
            Step::complete("done"),
        ]);
        let id = h.start(&workflow, json!({"initiator": "alice"}));

        let tasks = h.tasks(id);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_key, "submit");
        assert_eq!(tasks[0].name, "Submit");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].assignee.as_deref(), Some("alice"));
        assert_eq!(h.status(id), InstanceStatus::Running);
        assert_eq!(h.notifier.events(), vec!["created:submit"]);
    }

    #[test]
    fn test_first_complete_step_completes_instance() {
        let h = harness();
        let workflow = h.deploy(vec![Step::complete("done")]);
        let id = h.start(&workflow, json!({}));

        let instance = h.repos.instance(id).unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.completed_at.is_some());
        assert_eq!(instance.output, Some(json!({})));
        assert!(h.tasks(id).is_empty());
        assert_eq!(h.notifier.events(), vec![format!("workflow_completed:{}", id)]);
    }

    #[test]
    fn test_sequential_flow_to_completion() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::user_task("submit"),
            Step::process("check"),
            Step::user_task("approve"),
            Step::complete("done"),
        ]);
        let id = h.start(&workflow, json!({}));

        h.approve(id, "submit", json!({"amount": 5}));
        assert_eq!(h.count(id, "approve"), 1);
        assert_eq!(h.status(id), InstanceStatus::Running);

        h.approve(id, "approve", json!({"ok": true}));
        let instance = h.repos.instance(id).unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(
            instance.output,
            Some(json!({"submit": {"amount": 5}, "approve": {"ok": true}}))
        );
    }

    #[test]
    fn test_task_data_carries_history() {
        let h = harness();
        let workflow = h.deploy(vec![Step::user_task("submit"), Step::user_task("approve")]);
        let id = h.start(&workflow, json!({"amount": 12}));
        h.approve(id, "submit", json!({"note": "hi"}));

        let approve = h.open_task(id, "approve");
        assert_eq!(approve.task_data["amount"], 12);
        let history = approve.task_data["previousTasksHistory"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["taskKey"], "submit");
        assert_eq!(history[0]["result"], "Approved");
        assert_eq!(history[0]["output"]["note"], "hi");
    }

    #[test]
    fn test_parallel_join_fires_once() {
        let h = harness();
        let workflow = h.deploy(review_steps());
        let id = h.start(&workflow, json!({}));

        let mut keys: Vec<String> = h.tasks(id).into_iter().map(|t| t.task_key).collect();
        keys.sort();
        assert_eq!(keys, vec!["review_finance", "review_it", "review_legal"]);
        assert!(h
            .tasks(id)
            .iter()
            .all(|t| t.parent_step_id.as_deref() == Some("review")));

        h.approve(id, "review_legal", json!({}));
        h.approve(id, "review_finance", json!({}));
        assert_eq!(h.count(id, "sign"), 0);
        assert_eq!(h.status(id), InstanceStatus::Running);

        let it = h.open_task(id, "review_it");
        let it = h.finish(&it, TaskResult::Rejected, json!({}));
        h.engine.continue_after_task(&it).unwrap();
        assert_eq!(h.count(id, "sign"), 1);

        h.engine.continue_after_task(&it).unwrap();
        assert_eq!(h.count(id, "sign"), 1);
        assert_eq!(h.repos.instance(id).unwrap().joins.len(), 1);
    }

    #[test]
    fn test_parallel_join_concurrent_completions() {
        let h = harness();
        let workflow = h.deploy(review_steps());
        let id = h.start(&workflow, json!({}));

        let finished: Vec<Task> = h
            .tasks(id)
            .iter()
            .map(|t| h.finish(t, TaskResult::Approved, json!({})))
            .collect();

        let handles: Vec<_> = finished
            .into_iter()
            .map(|task| {
                let engine = Arc::clone(&h.engine);
                thread::spawn(move || engine.continue_after_task(&task))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(h.count(id, "sign"), 1);
    }

    #[test]
    fn test_parallel_branch_conditions() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::parallel(
                "review",
                vec![
                    Step::user_task("legal"),
                    Step::user_task("board").with_condition("${amount} > 100"),
                ],
            ),
            Step::complete("done"),
        ]);
        let id = h.start(&workflow, json!({"amount": 50}));

        let tasks = h.tasks(id);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_key, "review_legal");

        h.approve(id, "review_legal", json!({}));
        assert_eq!(h.status(id), InstanceStatus::Completed);
    }

    #[test]
    fn test_parallel_without_qualifying_branch_moves_on() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::parallel(
                "review",
                vec![Step::user_task("board").with_condition("${amount} > 100")],
            ),
            Step::user_task("sign"),
        ]);
        let id = h.start(&workflow, json!({"amount": 1}));
        assert_eq!(h.count(id, "sign"), 1);
    }

    #[test]
    fn test_reject_first_task_fails() {
        let h = harness();
        let workflow = h.deploy(vec![Step::user_task("submit"), Step::complete("done")]);
        let id = h.start(&workflow, json!({}));

        let task = h.open_task(id, "submit");
        let task = h.finish(&task, TaskResult::Rejected, json!({}));
        let err = h.engine.reject_and_go_back(&task).unwrap_err();
        assert!(matches!(err, EngineError::NoPreviousTask(rejected) if rejected == task.id));
        assert_eq!(h.tasks(id).len(), 1);
    }

    #[test]
    fn test_reject_reopens_previous_task() {
        let h = harness();
        let params = TaskParams::default().with_candidate_groups(&["staff"]);
        let workflow = h.deploy(vec![
            Step::user_task("submit").with_params(params),
            Step::user_task("approve"),
            Step::complete("done"),
        ]);
        let id = h.start(&workflow, json!({"amount": 3}));

        let mut submit = h.open_task(id, "submit");
        submit.claim("alice").unwrap();
        h.repos.tasks.update_task(&submit).unwrap();
        h.approve(id, "submit", json!({"receipt": false}));

        let mut approve = h.open_task(id, "approve");
        approve.claim("bob").unwrap();
        approve.complete(json!({}), Some("missing receipt".into()), TaskResult::Rejected).unwrap();
        h.repos.tasks.update_task(&approve).unwrap();

        let reopened = h.engine.reject_and_go_back(&approve).unwrap();
        assert_eq!(reopened.task_key, "submit");
        assert_eq!(reopened.assignee.as_deref(), Some("alice"));
        assert_eq!(reopened.candidate_groups, vec!["staff"]);
        assert_eq!(reopened.task_data["rejectedBy"], "bob");
        assert_eq!(reopened.task_data["rejectionReason"], "missing receipt");
        assert_eq!(reopened.task_data["rejectedTaskId"], json!(approve.id));
        assert_eq!(reopened.task_data["amount"], 3);
        assert_eq!(
            reopened.task_data["previousTasksHistory"].as_array().unwrap().len(),
            2
        );

        assert_eq!(h.count(id, "submit"), 2);
        assert_eq!(h.status(id), InstanceStatus::Running);
        assert!(h
            .notifier
            .events()
            .contains(&"assigned:submit:alice".to_string()));

        h.approve(id, "submit", json!({"receipt": true}));
        assert_eq!(h.count(id, "approve"), 2);
    }

    #[test]
    fn test_reject_back_into_parallel_branch() {
        let h = harness();
        let workflow = h.deploy(review_steps());
        let id = h.start(&workflow, json!({}));

        h.approve(id, "review_legal", json!({}));
        h.approve(id, "review_finance", json!({}));
        h.approve(id, "review_it", json!({"ok": false}));
        assert_eq!(h.count(id, "sign"), 1);

        let sign = h.open_task(id, "sign");
        let sign = h.finish(&sign, TaskResult::Rejected, json!({}));
        let reopened = h.engine.reject_and_go_back(&sign).unwrap();
        assert!(reopened.task_key.starts_with("review_"));
        assert_eq!(reopened.parent_step_id.as_deref(), Some("review"));
        assert!(reopened.is_parallel_branch());

        h.approve(id, &reopened.task_key, json!({"ok": true}));
        let signs: Vec<Task> = h
            .tasks(id)
            .into_iter()
            .filter(|t| t.task_key == "sign")
            .collect();
        assert_eq!(signs.len(), 2);
        assert_eq!(signs.iter().filter(|t| t.status.is_open()).count(), 1);
        assert_eq!(h.repos.instance(id).unwrap().joins.len(), 2);

        let again = h.repos.task(reopened.id).unwrap();
        h.engine.continue_after_task(&again).unwrap();
        assert_eq!(h.count(id, "sign"), 2);
    }

    #[test]
    fn test_out_of_range_timeout_starts_without_due_date() {
        let h = harness();
        let mut step = Step::user_task("a");
        step.timeout = Some(json!("9999999999999999d"));
        let workflow = h.deploy(vec![step, Step::complete("done")]);
        let id = h.start(&workflow, json!({}));

        let task = h.open_task(id, "a");
        assert!(task.due_date.is_none());
        assert_eq!(h.status(id), InstanceStatus::Running);
    }

    #[test]
    fn test_next_steps_pick_first_passing_condition() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::process("route").then("big").then("small"),
            Step::user_task("big").with_condition("${amount} > 1000"),
            Step::user_task("small"),
        ]);

        let small = h.start(&workflow, json!({"amount": 50}));
        assert_eq!(h.tasks(small)[0].task_key, "small");

        let big = h.start(&workflow, json!({"amount": 5000}));
        assert_eq!(h.tasks(big)[0].task_key, "big");
    }

    #[test]
    fn test_next_steps_none_passing_ends_branch() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::user_task("a").then("b"),
            Step::user_task("b").with_condition("false"),
        ]);
        let id = h.start(&workflow, json!({}));
        h.approve(id, "a", json!({}));

        assert_eq!(h.tasks(id).len(), 1);
        assert_eq!(h.status(id), InstanceStatus::Running);
    }

    #[test]
    fn test_sequential_fallback_skips_failed_conditions() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::user_task("a"),
            Step::user_task("b").with_condition("${skip} != true"),
            Step::user_task("c"),
        ]);
        let id = h.start(&workflow, json!({"skip": true}));
        h.approve(id, "a", json!({}));

        assert_eq!(h.count(id, "b"), 0);
        assert_eq!(h.count(id, "c"), 1);
    }

    #[test]
    fn test_skipped_step_uses_its_own_successors() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::user_task("a"),
            Step::user_task("b").with_condition("false").then("d"),
            Step::user_task("c"),
            Step::user_task("d"),
        ]);
        let id = h.start(&workflow, json!({}));
        h.approve(id, "a", json!({}));

        assert_eq!(h.count(id, "c"), 0);
        assert_eq!(h.count(id, "d"), 1);
    }

    #[test]
    fn test_condition_on_task_output() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::user_task("review")
                .then("accepted")
                .then("declined"),
            Step::user_task("accepted").with_condition("${review.decision} == \"approve\""),
            Step::user_task("declined"),
        ]);
        let id = h.start(&workflow, json!({}));
        h.approve(id, "review", json!({"decision": "approve"}));

        assert_eq!(h.count(id, "accepted"), 1);
        assert_eq!(h.count(id, "declined"), 0);
    }

    #[test]
    fn test_unknown_step_type_continues() {
        let h = harness();
        let mut hook = Step::process("hook");
        hook.kind = StepKind::Unknown("webhook".to_string());
        let workflow = h.deploy(vec![hook, Step::user_task("after")]);

        let id = h.start(&workflow, json!({}));
        assert_eq!(h.count(id, "after"), 1);
    }

    #[test]
    fn test_automatic_cycle_hits_step_limit() {
        let h = harness();
        let workflow = h.deploy(vec![
            Step::process("ping").then("pong"),
            Step::process("pong").then("ping"),
        ]);
        let instance = WorkflowInstance::new(workflow.id, json!({}));
        h.repos.instances.save_instance(&instance).unwrap();

        let err = h.engine.start_instance(instance.id).unwrap_err();
        assert!(matches!(err, EngineError::StepLimitExceeded(64)));
    }

    #[test]
    fn test_continue_on_finished_instance_fails() {
        let h = harness();
        let workflow = h.deploy(vec![Step::user_task("a"), Step::complete("done")]);
        let id = h.start(&workflow, json!({}));

        let mut instance = h.repos.instance(id).unwrap();
        instance.cancel().unwrap();
        h.repos.instances.update_instance(&instance).unwrap();

        let task = h.open_task(id, "a");
        let task = h.finish(&task, TaskResult::Approved, json!({}));
        assert!(matches!(
            h.engine.continue_after_task(&task),
            Err(EngineError::InstanceNotRunning(_))
        ));
    }

    #[test]
    fn test_definition_is_reread_on_every_call() {
        let h = harness();
        let mut workflow = h.deploy(vec![Step::user_task("a"), Step::user_task("b")]);
        let id = h.start(&workflow, json!({}));

        let edited = Definition::from_steps("test", vec![Step::user_task("a"), Step::complete("done")]);
        workflow
            .replace_definition(serde_json::to_string(&edited).unwrap())
            .unwrap();
        h.repos.workflows.update_workflow(&workflow).unwrap();

        h.approve(id, "a", json!({}));
        assert_eq!(h.count(id, "b"), 0);
        assert_eq!(h.status(id), InstanceStatus::Completed);
    }
}
