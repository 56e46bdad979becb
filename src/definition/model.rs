//! Workflow Definition Model
//!
//! Typed representation of a workflow's JSON definition: a flat list of
//! steps, each with a kind, optional guard condition, explicit successor
//! ids and (for `parallel` steps) nested branch steps.
//!
//! # Example JSON Format
//!
//! ```json
//! {
//!   "name": "expense approval",
//!   "steps": [
//!     { "id": "submit", "type": "user_task", "name": "Submit",
//!       "params": { "assignee": "${initiator}" }, "nextSteps": ["manager", "auto"] },
//!     { "id": "manager", "type": "user_task", "condition": "${amount} > 1000",
//!       "params": { "candidateGroups": ["managers"], "priority": "high" } },
//!     { "id": "auto", "type": "process" },
//!     { "id": "done", "type": "complete" }
//!   ]
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::validator::ValidationError;

/// Wire name of the human task step type.
pub const USER_TASK: &str = "user_task";
/// Wire name of the automated step type.
pub const PROCESS: &str = "process";
/// Wire name of the fan-out step type.
pub const PARALLEL: &str = "parallel";
/// Wire name of the terminal step type.
pub const COMPLETE: &str = "complete";

/// Task priority copied from step parameters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

/// A form field rendered for a human task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    #[serde(default, alias = "key")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub field_type: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,

    /// Any other attributes (options, placeholder, validation hints, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of a human task step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskParams {
    /// Assignee expression, may contain `${name}` references to instance input
    pub assignee: Option<String>,
    pub candidate_users: Vec<String>,
    pub candidate_groups: Vec<String>,
    pub priority: Priority,
    pub form_fields: Vec<FormField>,
    /// Unrecognised parameters, kept for round-tripping
    pub extra: Map<String, Value>,
}

impl TaskParams {
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_candidate_users(mut self, users: &[&str]) -> Self {
        self.candidate_users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_candidate_groups(mut self, groups: &[&str]) -> Self {
        self.candidate_groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// What a step does when the engine reaches it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Creates a human task and suspends the instance
    UserTask(TaskParams),
    /// Automated step; continues immediately
    Process,
    /// Opens one task per qualifying branch and waits for all of them
    Parallel(Vec<Step>),
    /// Marks the instance completed
    Complete,
    /// Any other `type` string; skipped at runtime
    Unknown(String),
}

impl StepKind {
    /// The wire name of this kind.
    pub fn type_name(&self) -> &str {
        match self {
            Self::UserTask(_) => USER_TASK,
            Self::Process => PROCESS,
            Self::Parallel(_) => PARALLEL,
            Self::Complete => COMPLETE,
            Self::Unknown(name) => name,
        }
    }
}

/// One node of a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    /// Unique identifier within the definition
    pub id: String,
    pub name: String,
    pub description: String,
    /// Guard expression; the step is skipped when it evaluates false
    pub condition: Option<String>,
    pub timeout: Option<Value>,
    pub retries: Option<u32>,
    /// Ordered successor step ids
    pub next_steps: Vec<String>,
    pub kind: StepKind,
}

impl Step {
    fn with_kind(id: impl Into<String>, kind: StepKind) -> Self {
        let id = id.into().trim().to_string();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            condition: None,
            timeout: None,
            retries: None,
            next_steps: Vec::new(),
            kind,
        }
    }

    /// Creates a human task step with default parameters.
    ///
    /// ```
    /// use flowrunner::definition::Step;
    ///
    /// let step = Step::user_task("review")
    ///     .with_name("Review request")
    ///     .with_condition("${amount} > 100")
    ///     .then("approve");
    /// assert_eq!(step.next_steps, vec!["approve"]);
    /// ```
    pub fn user_task(id: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::UserTask(TaskParams::default()))
    }

    pub fn process(id: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::Process)
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::Complete)
    }

    pub fn parallel(id: impl Into<String>, branches: Vec<Step>) -> Self {
        Self::with_kind(id, StepKind::Parallel(branches))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Replaces the parameters of a user task step. No-op for other kinds.
    pub fn with_params(mut self, params: TaskParams) -> Self {
        if let StepKind::UserTask(current) = &mut self.kind {
            *current = params;
        }
        self
    }

    /// Appends a successor id.
    pub fn then(mut self, step_id: impl Into<String>) -> Self {
        self.next_steps.push(step_id.into());
        self
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Task parameters, for user task steps.
    pub fn task_params(&self) -> Option<&TaskParams> {
        match &self.kind {
            StepKind::UserTask(params) => Some(params),
            _ => None,
        }
    }

    /// Branch steps, for parallel steps.
    pub fn branches(&self) -> &[Step] {
        match &self.kind {
            StepKind::Parallel(branches) => branches,
            _ => &[],
        }
    }

    /// The guard condition, ignoring blank strings.
    pub fn guard(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Task key of a branch task opened by this (parallel) step.
    pub fn branch_key(&self, branch: &Step) -> String {
        format!("{}_{}", self.id, branch.id)
    }

    /// Prefix shared by all branch task keys of this step.
    pub fn branch_prefix(&self) -> String {
        format!("{}_", self.id)
    }
}

/// Where a task key points inside a definition.
#[derive(Debug, Clone, Copy)]
pub enum TaskOrigin<'a> {
    /// A top-level step whose id equals the task key
    Step(&'a Step),
    /// A parallel branch: the key is `<parent.id>_<branch.id>`
    Branch { parent: &'a Step, branch: &'a Step },
}

impl<'a> TaskOrigin<'a> {
    /// The step the task was built from.
    pub fn task_step(&self) -> &'a Step {
        match self {
            Self::Step(step) => step,
            Self::Branch { branch, .. } => branch,
        }
    }

    /// The top-level step that controls successor selection.
    pub fn flow_step(&self) -> &'a Step {
        match self {
            Self::Step(step) => step,
            Self::Branch { parent, .. } => parent,
        }
    }
}

/// A parsed workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Definition {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    /// Creates a definition from a list of steps.
    pub fn from_steps(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::new(name)
        }
    }

    /// Gets a top-level step by id (first match).
    pub fn find_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Position of a top-level step in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Steps in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Resolves a task key to the step (or parallel branch) it came from.
    ///
    /// Exact step ids win over branch keys, so a top-level step named
    /// `review_legal` shadows branch `legal` of a parallel step `review`.
    pub fn resolve_task_key(&self, key: &str) -> Option<TaskOrigin<'_>> {
        if let Some(step) = self.find_step(key) {
            return Some(TaskOrigin::Step(step));
        }

        self.steps.iter().find_map(|parent| {
            let rest = key.strip_prefix(parent.branch_prefix().as_str())?;
            parent
                .branches()
                .iter()
                .find(|b| b.id == rest)
                .map(|branch| TaskOrigin::Branch { parent, branch })
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assignee: Option<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    candidate_users: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    candidate_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    form_fields: Vec<FormField>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawParams {
    fn is_empty(&self) -> bool {
        self.assignee.is_none()
            && self.candidate_users.is_empty()
            && self.candidate_groups.is_empty()
            && self.priority.is_none()
            && self.form_fields.is_empty()
            && self.extra.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: String,

    #[serde(rename = "type", default)]
    step_type: String,

    #[serde(default)]
    name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,

    #[serde(default, skip_serializing_if = "RawParams::is_empty")]
    params: RawParams,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parallel_tasks: Vec<RawStep>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

fn params_from_raw(step_id: &str, raw: RawParams) -> Result<TaskParams, ValidationError> {
    let priority = match raw.priority.as_deref() {
        None => Priority::default(),
        Some(value) => value
            .parse()
            .map_err(|value| ValidationError::InvalidPriority {
                step: step_id.to_string(),
                value,
            })?,
    };

    Ok(TaskParams {
        assignee: raw.assignee.filter(|a| !a.trim().is_empty()),
        candidate_users: raw.candidate_users,
        candidate_groups: raw.candidate_groups,
        priority,
        form_fields: raw.form_fields,
        extra: raw.extra,
    })
}

fn params_to_raw(params: TaskParams) -> RawParams {
    RawParams {
        assignee: params.assignee,
        candidate_users: params.candidate_users,
        candidate_groups: params.candidate_groups,
        priority: (params.priority != Priority::Medium).then(|| params.priority.to_string()),
        form_fields: params.form_fields,
        extra: params.extra,
    }
}

impl Step {
    /// Converts a parallel branch; branches are always human tasks.
    fn branch_from_raw(parent_id: &str, raw: RawStep) -> Result<Self, ValidationError> {
        if !raw.step_type.is_empty() && raw.step_type != USER_TASK {
            return Err(ValidationError::InvalidBranchType {
                step: parent_id.to_string(),
                branch: raw.id,
                step_type: raw.step_type,
            });
        }
        if !raw.parallel_tasks.is_empty() {
            return Err(ValidationError::NestedParallel {
                step: parent_id.to_string(),
                branch: raw.id,
            });
        }

        Step::try_from(RawStep {
            step_type: USER_TASK.to_string(),
            ..raw
        })
    }
}

impl TryFrom<RawStep> for Step {
    type Error = ValidationError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let id = raw.id.trim().to_string();

        let kind = match raw.step_type.as_str() {
            USER_TASK => StepKind::UserTask(params_from_raw(&id, raw.params)?),
            PROCESS => StepKind::Process,
            COMPLETE => StepKind::Complete,
            PARALLEL => StepKind::Parallel(
                raw.parallel_tasks
                    .into_iter()
                    .map(|branch| Step::branch_from_raw(&id, branch))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => StepKind::Unknown(other.to_string()),
        };

        Ok(Self {
            name: if raw.name.is_empty() { id.clone() } else { raw.name },
            id,
            description: raw.description,
            condition: raw.condition,
            timeout: raw.timeout,
            retries: raw.retries,
            next_steps: raw.next_steps,
            kind,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let step_type = step.kind.type_name().to_string();
        let (params, parallel_tasks) = match step.kind {
            StepKind::UserTask(params) => (params_to_raw(params), Vec::new()),
            StepKind::Parallel(branches) => (
                RawParams::default(),
                branches.into_iter().map(RawStep::from).collect(),
            ),
            _ => (RawParams::default(), Vec::new()),
        };

        Self {
            id: step.id,
            step_type,
            name: step.name,
            description: step.description,
            condition: step.condition,
            timeout: step.timeout,
            retries: step.retries,
            params,
            next_steps: step.next_steps,
            parallel_tasks,
        }
    }
}
