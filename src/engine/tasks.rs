//! Task Construction
//!
//! Turns a `user_task` step (or parallel branch) into a pending task:
//! assignee expression, candidates, priority, form and task data.

use chrono::{DateTime, TimeDelta, Utc};
use log::warn;
use serde_json::{json, Map, Value};

use crate::config::ResultLabels;
use crate::definition::{Step, TaskParams};
use crate::entity::{Task, WorkflowInstance};

/// Key of the completed-task history inside task data.
pub const HISTORY_KEY: &str = "previousTasksHistory";

/// Builds a pending task for `step` under `task_key`.
///
/// `history` is every task of the instance so far; only finished ones
/// end up in the task data.
pub fn build_task(
    instance: &WorkflowInstance,
    step: &Step,
    task_key: String,
    parent_step_id: Option<&str>,
    history: &[Task],
    labels: &ResultLabels,
) -> Task {
    let name = if step.name.is_empty() { &step.id } else { &step.name };
    let mut task = Task::new(instance.id, instance.workflow_id, task_key, name.as_str());
    task.parent_step_id = parent_step_id.map(str::to_string);
    task.description = step.description.clone();
    task.task_type = step.type_name().to_string();
    task.due_date = step
        .timeout
        .as_ref()
        .and_then(|timeout| due_date(task.created_at, timeout));

    let default_params = TaskParams::default();
    let params = step.task_params().unwrap_or(&default_params);
    apply_params(&mut task, params, &instance.input);

    task.task_data = task_data(&instance.input, history_block(history, labels));
    task
}

fn apply_params(task: &mut Task, params: &TaskParams, input: &Value) {
    if let Some(expression) = &params.assignee {
        task.assignee = resolve_assignee(expression, input);
        if task.assignee.is_none() {
            warn!(
                "Assignee '{}' of task '{}' did not resolve; leaving it to candidates",
                expression, task.task_key
            );
        }
    }

    task.candidate_users = params.candidate_users.clone();
    task.candidate_groups = params.candidate_groups.clone();
    task.priority = params.priority;
    task.form_data = json!({ "fields": params.form_fields });
}

/// Substitutes `${name}` references with top-level input values.
///
/// Returns `None` if any reference is missing or null, or if the
/// result is blank.
pub fn resolve_assignee(expression: &str, input: &Value) -> Option<String> {
    let mut resolved = String::new();
    let mut rest = expression;

    while let Some(start) = rest.find("${") {
        let end = rest[start..].find('}')? + start;
        resolved.push_str(&rest[..start]);

        let name = rest[start + 2..end].trim();
        match input.get(name)? {
            Value::Null => return None,
            Value::String(s) => resolved.push_str(s),
            other => resolved.push_str(&other.to_string()),
        }
        rest = &rest[end + 1..];
    }
    resolved.push_str(rest);

    let resolved = resolved.trim();
    (!resolved.is_empty()).then(|| resolved.to_string())
}

/// Finished tasks ordered by completion time.
pub fn history_block(tasks: &[Task], labels: &ResultLabels) -> Vec<Value> {
    let mut finished: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status.is_terminal())
        .collect();
    finished.sort_by_key(|t| (t.completed_at, t.created_at));

    finished
        .into_iter()
        .map(|t| {
            json!({
                "taskName": t.name,
                "taskKey": t.task_key,
                "assignee": t.assignee,
                "status": t.status,
                "result": t.result.map(|r| labels.label(r).to_string()),
                "comment": t.comment,
                "output": t.output,
                "completedAt": t.completed_at,
            })
        })
        .collect()
}

/// Instance input merged with the history block.
///
/// A non-object input is kept under `input`.
pub fn task_data(input: &Value, history: Vec<Value>) -> Value {
    let mut data = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    data.insert(HISTORY_KEY.to_string(), Value::Array(history));
    Value::Object(data)
}

/// Adds rejection metadata to a reopened task's data.
pub fn mark_rejected(task: &mut Task, rejected: &Task, rejected_at: DateTime<Utc>) {
    if !task.task_data.is_object() {
        task.task_data = task_data(&task.task_data, Vec::new());
    }
    if let Value::Object(data) = &mut task.task_data {
        data.insert("rejectedBy".to_string(), json!(rejected.assignee));
        data.insert("rejectedAt".to_string(), json!(rejected_at));
        data.insert("rejectionReason".to_string(), json!(rejected.comment));
        data.insert("rejectedTaskId".to_string(), json!(rejected.id));
    }
}

/// Due date `timeout` after `from`; unusable or out-of-range values
/// give no due date.
fn due_date(from: DateTime<Utc>, timeout: &Value) -> Option<DateTime<Utc>> {
    let due = parse_timeout(timeout).and_then(|delta| from.checked_add_signed(delta));
    if due.is_none() {
        warn!("Ignoring step timeout {}", timeout);
    }
    due
}

/// Step timeout as a duration: integer seconds or `<n>s|m|h|d`.
fn parse_timeout(timeout: &Value) -> Option<TimeDelta> {
    match timeout {
        Value::Number(n) => n
            .as_i64()
            .filter(|s| *s > 0)
            .and_then(TimeDelta::try_seconds),
        Value::String(s) => {
            let s = s.trim();
            let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
            let amount: i64 = s[..split].parse().ok().filter(|n| *n > 0)?;
            match &s[split..] {
                "" | "s" => TimeDelta::try_seconds(amount),
                "m" => TimeDelta::try_minutes(amount),
                "h" => TimeDelta::try_hours(amount),
                "d" => TimeDelta::try_days(amount),
                _ => None,
            }
        }
        _ => None,
    }
}
