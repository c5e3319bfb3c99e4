//! Multi-step plans
//!
//! A plan is a DAG of steps derived from a user request. The
//! [`planner`](crate::plan::planner) builds and validates plans; the
//! [`executor`](crate::plan::executor) runs them in parallel waves with
//! checkpoints and rollback.

pub mod executor;
pub mod planner;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::value::ToolInput;

pub use executor::{ExecutorError, ExecutorOptions, PlanExecutor};
pub use planner::{Planner, PlannerError, StepSpec};

/// Plan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Complete,
    Failed,
    RolledBack,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Complete => "complete",
            PlanStatus::Failed => "failed",
            PlanStatus::RolledBack => "rolled_back",
        }
    }
}

/// Step lifecycle state
///
/// pending -> running -> (complete | failed); a complete step may later
/// become rolled_back. No other back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
    RolledBack,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Complete => "complete",
            StepStatus::Failed => "failed",
            StepStatus::RolledBack => "rolled_back",
        }
    }
}

/// One tool invocation with its dependencies and bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step id, unique within the plan
    pub id: String,
    /// What the step is for
    pub description: String,
    /// Tool to invoke
    pub tool: String,
    /// Input map conforming to the tool's schema
    pub input: ToolInput,
    /// Ids of steps that must complete first
    pub depends_on: Vec<String>,
    /// Lifecycle state
    pub status: StepStatus,
    /// Step-level retries consumed so far
    pub retry_count: u32,
    /// Whether the executor may re-run this step on failure
    pub retryable: bool,
    /// When execution began
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Tool output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure message, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A captured file + version-control state at a point in execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id
    pub id: String,
    /// Owning plan
    pub plan_id: String,
    /// Last step completed before the capture
    pub step_id: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Current content of every file the plan had touched, by path
    pub files: HashMap<String, String>,
    /// Version-control ref at capture time, when under version control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

/// Version-control operation categories the executor records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOpKind {
    Add,
    Commit,
    Merge,
    Push,
    Checkout,
    Other,
}

impl GitOpKind {
    /// Classify a git tool name
    pub fn from_tool(tool: &str) -> Option<Self> {
        match tool {
            "git_add" => Some(GitOpKind::Add),
            "git_commit" => Some(GitOpKind::Commit),
            "git_merge" => Some(GitOpKind::Merge),
            "git_push" => Some(GitOpKind::Push),
            "git_checkout" => Some(GitOpKind::Checkout),
            "git_status" | "git_diff" | "git_log" | "git_branch" => None,
            t if t.starts_with("git_") => Some(GitOpKind::Other),
            _ => None,
        }
    }
}

/// One recorded version-control operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOperation {
    /// Operation kind
    pub kind: GitOpKind,
    /// Step that performed it
    pub step_id: String,
    /// When it ran
    pub timestamp: DateTime<Utc>,
    /// Whether rollback undid it
    pub reversed: bool,
    /// Set for operations rollback cannot undo (push)
    pub flagged: bool,
}

/// Execution options carried by a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Step-level retry budget
    pub max_retries: u32,
    /// Checkpoint after every N successful steps
    pub checkpoint_every: u32,
    /// Per-step timeout in seconds
    pub step_timeout_secs: u64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            checkpoint_every: 1,
            step_timeout_secs: 300,
        }
    }
}

/// A DAG of steps derived from a user request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id
    pub id: String,
    /// What the plan is for
    pub description: String,
    /// Owning session
    pub session_id: String,
    /// Ordered steps
    pub steps: Vec<Step>,
    /// Lifecycle state
    pub status: PlanStatus,
    /// Checkpoints captured so far, oldest first
    pub checkpoints: Vec<Checkpoint>,
    /// Version-control operations recorded so far, oldest first
    pub git_operations: Vec<GitOperation>,
    /// Execution log lines
    pub logs: Vec<String>,
    /// Execution options
    pub options: PlanOptions,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Look up a step
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Mutable step lookup
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Append a timestamped log line
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs
            .push(format!("[{}] {}", Utc::now().to_rfc3339(), line.into()));
    }
}

/// Compute the parallel execution waves of a step DAG
///
/// Wave k contains every step whose dependencies all appear in earlier
/// waves. The step list must already be cycle-free.
pub fn execution_waves(steps: &[Step]) -> Vec<Vec<String>> {
    let mut placed: HashSet<String> = HashSet::new();
    let mut remaining: Vec<&Step> = steps.iter().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|s| s.depends_on.iter().all(|d| placed.contains(d)))
            .map(|s| s.id.clone())
            .collect();
        if ready.is_empty() {
            // Unsatisfiable dependencies; the planner rejects these, but
            // stay defensive for hand-built plans
            break;
        }
        for id in &ready {
            placed.insert(id.clone());
        }
        remaining.retain(|s| !placed.contains(&s.id));
        waves.push(ready);
    }

    waves
}

/// Transitive ancestors of each step, for failure propagation
pub fn ancestors(steps: &[Step]) -> HashMap<String, HashSet<String>> {
    let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut result: HashMap<String, HashSet<String>> = HashMap::new();

    fn collect<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Step>,
        result: &mut HashMap<String, HashSet<String>>,
    ) -> HashSet<String> {
        if let Some(done) = result.get(id) {
            return done.clone();
        }
        let mut acc = HashSet::new();
        if let Some(step) = by_id.get(id) {
            for dep in &step.depends_on {
                acc.insert(dep.clone());
                acc.extend(collect(dep, by_id, result));
            }
        }
        result.insert(id.to_string(), acc.clone());
        acc
    }

    for step in steps {
        collect(&step.id, &by_id, &mut result);
    }
    result
}
