//! Plan executor
//!
//! Schedules a plan's dependency waves, runs each wave's steps
//! concurrently through the tool registry, checkpoints after successful
//! steps, and supports caller-driven rollback of files and recorded
//! version-control operations.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{Broadcaster, ProgressEvent};
use crate::tool::definition::{ToolContext, ToolUse};
use crate::tool::registry::ToolRegistry;
use crate::tool::schema::ParamType;

use super::{
    ancestors, Checkpoint, GitOpKind, GitOperation, Plan, PlanStatus, Step, StepStatus,
};

/// Executor-wide options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Project root steps run against
    pub project_root: PathBuf,
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("plan '{0}' is already running")]
    AlreadyRunning(String),

    #[error("rollback io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one step attempt, gathered from a wave task
struct StepOutcome {
    step_id: String,
    success: bool,
    output: Option<String>,
    error: Option<String>,
    retries: u32,
}

/// Runs plans; owns their in-memory state keyed by plan id
pub struct PlanExecutor {
    registry: Arc<ToolRegistry>,
    broadcaster: Arc<Broadcaster>,
    plans: DashMap<String, Arc<Mutex<Plan>>>,
    options: ExecutorOptions,
}

impl PlanExecutor {
    /// New executor over a registry
    pub fn new(
        registry: Arc<ToolRegistry>,
        broadcaster: Arc<Broadcaster>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            plans: DashMap::new(),
            options,
        }
    }

    /// Take ownership of a plan produced by the planner
    pub fn admit(&self, plan: Plan) -> String {
        let id = plan.id.clone();
        self.plans.insert(id.clone(), Arc::new(Mutex::new(plan)));
        id
    }

    /// Snapshot of a plan's current state
    pub async fn status(&self, plan_id: &str) -> Result<Plan, ExecutorError> {
        let plan = self.plan(plan_id)?;
        let snapshot = plan.lock().await.clone();
        Ok(snapshot)
    }

    /// Recorded version-control operations for a plan
    pub async fn git_operations(&self, plan_id: &str) -> Result<Vec<GitOperation>, ExecutorError> {
        Ok(self.status(plan_id).await?.git_operations)
    }

    /// Execution log lines for a plan
    pub async fn logs(&self, plan_id: &str) -> Result<Vec<String>, ExecutorError> {
        Ok(self.status(plan_id).await?.logs)
    }

    fn plan(&self, plan_id: &str) -> Result<Arc<Mutex<Plan>>, ExecutorError> {
        self.plans
            .get(plan_id)
            .map(|p| p.clone())
            .ok_or_else(|| ExecutorError::PlanNotFound(plan_id.to_string()))
    }

    /// Execute a plan to completion (or definitive failure)
    ///
    /// Waves of independent steps run concurrently; a failed step blocks
    /// its descendants while siblings continue. Failure never rolls back
    /// automatically.
    pub async fn execute(
        &self,
        plan_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Plan, ExecutorError> {
        let plan_arc = self.plan(plan_id)?;

        let (session_id, waves) = {
            let mut plan = plan_arc.lock().await;
            if plan.status == PlanStatus::Running {
                return Err(ExecutorError::AlreadyRunning(plan_id.to_string()));
            }
            plan.status = PlanStatus::Running;
            plan.log("execution started");
            (plan.session_id.clone(), super::execution_waves(&plan.steps))
        };

        let ancestor_map = {
            let plan = plan_arc.lock().await;
            ancestors(&plan.steps)
        };

        let mut touched_files: HashSet<String> = HashSet::new();
        let mut failed_steps: HashSet<String> = HashSet::new();
        let mut successes_since_checkpoint = 0u32;

        for wave in waves {
            if cancel.is_cancelled() {
                let mut plan = plan_arc.lock().await;
                plan.log("execution cancelled before next wave");
                plan.status = PlanStatus::Failed;
                return Ok(plan.clone());
            }

            // Steps under a failed ancestor never start
            let (blocked, runnable): (Vec<String>, Vec<String>) = wave.into_iter().partition(|id| {
                ancestor_map
                    .get(id)
                    .map(|anc| anc.iter().any(|a| failed_steps.contains(a)))
                    .unwrap_or(false)
            });

            {
                let mut plan = plan_arc.lock().await;
                for id in &blocked {
                    failed_steps.insert(id.clone());
                    if let Some(step) = plan.step_mut(id) {
                        step.status = StepStatus::Failed;
                        step.error = Some("dependency failed".to_string());
                        step.finished_at = Some(Utc::now());
                    }
                    self.publish_step(&session_id, plan_id, id, StepStatus::Failed);
                }
            }

            if runnable.is_empty() {
                continue;
            }

            // Launch the whole wave concurrently
            let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
            for id in &runnable {
                let (step, max_retries, timeout_secs) = {
                    let mut plan = plan_arc.lock().await;
                    let max_retries = plan.options.max_retries;
                    let timeout = plan.options.step_timeout_secs;
                    let Some(step) = plan.step_mut(id) else {
                        continue;
                    };
                    step.status = StepStatus::Running;
                    step.started_at = Some(Utc::now());
                    (step.clone(), max_retries, timeout)
                };
                self.publish_step(&session_id, plan_id, id, StepStatus::Running);

                for path in self.step_paths(&step) {
                    touched_files.insert(path);
                }

                let registry = self.registry.clone();
                let session = session_id.clone();
                let root = self.options.project_root.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    run_step(&registry, &session, &root, step, max_retries, timeout_secs, cancel)
                        .await
                });
            }

            // The wave is a barrier: collect every outcome before moving on
            let mut outcomes = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(join_err) => {
                        warn!(error = %join_err, "step task aborted");
                    }
                }
            }

            for outcome in outcomes {
                let status = if outcome.success {
                    StepStatus::Complete
                } else {
                    StepStatus::Failed
                };

                {
                    let mut plan = plan_arc.lock().await;
                    if let Some(step) = plan.step_mut(&outcome.step_id) {
                        step.status = status;
                        step.retry_count = outcome.retries;
                        step.finished_at = Some(Utc::now());
                        step.output = outcome.output.clone();
                        step.error = outcome.error.clone();
                    }
                    let line = match &outcome.error {
                        Some(err) => format!("step {} failed: {err}", outcome.step_id),
                        None => format!("step {} complete", outcome.step_id),
                    };
                    plan.log(line);

                    if outcome.success {
                        let tool = plan
                            .step(&outcome.step_id)
                            .map(|s| s.tool.clone())
                            .unwrap_or_default();
                        if let Some(kind) = GitOpKind::from_tool(&tool) {
                            plan.git_operations.push(GitOperation {
                                kind,
                                step_id: outcome.step_id.clone(),
                                timestamp: Utc::now(),
                                reversed: false,
                                flagged: false,
                            });
                        }
                    }
                }
                self.publish_step(&session_id, plan_id, &outcome.step_id, status);

                if outcome.success {
                    successes_since_checkpoint += 1;
                    let checkpoint_every = {
                        let plan = plan_arc.lock().await;
                        plan.options.checkpoint_every.max(1)
                    };
                    if successes_since_checkpoint >= checkpoint_every {
                        successes_since_checkpoint = 0;
                        self.capture_checkpoint(&plan_arc, &outcome.step_id, &touched_files)
                            .await;
                    }
                } else {
                    failed_steps.insert(outcome.step_id.clone());
                }
            }
        }

        let mut plan = plan_arc.lock().await;
        // Steps never reached because of failed ancestors
        for step in &mut plan.steps {
            if step.status == StepStatus::Pending
                && ancestor_map
                    .get(&step.id)
                    .map(|anc| anc.iter().any(|a| failed_steps.contains(a)))
                    .unwrap_or(false)
            {
                step.status = StepStatus::Failed;
                step.error = Some("dependency failed".to_string());
            }
        }

        plan.status = if plan
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Complete)
        {
            PlanStatus::Complete
        } else {
            PlanStatus::Failed
        };
        let status_str = plan.status.as_str();
        plan.log(format!("execution finished: {}", status_str));
        info!(plan = plan_id, status = plan.status.as_str(), "plan finished");
        Ok(plan.clone())
    }

    /// Roll a plan back to one of its checkpoints
    ///
    /// Restores every captured file byte-for-byte, reverses recorded
    /// version-control operations newer than the checkpoint, and marks
    /// later steps rolled-back. Earlier steps keep their status.
    pub async fn rollback_to(
        &self,
        plan_id: &str,
        checkpoint_id: &str,
    ) -> Result<Plan, ExecutorError> {
        let plan_arc = self.plan(plan_id)?;
        let mut plan = plan_arc.lock().await;

        let checkpoint = plan
            .checkpoints
            .iter()
            .find(|c| c.id == checkpoint_id)
            .cloned()
            .ok_or_else(|| ExecutorError::CheckpointNotFound(checkpoint_id.to_string()))?;

        for (path, content) in &checkpoint.files {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(path, content).await?;
        }

        let cutoff = checkpoint.created_at;
        let git_ref = checkpoint.git_ref.clone();
        let mut reset_done = false;
        for op in plan.git_operations.iter_mut().filter(|o| o.timestamp > cutoff) {
            match op.kind {
                GitOpKind::Commit | GitOpKind::Merge => {
                    if let Some(target) = &git_ref {
                        if !reset_done {
                            reverse_git(
                                &self.options.project_root,
                                &["reset", "--hard", target.as_str()],
                            )
                            .await;
                            reset_done = true;
                        }
                        op.reversed = true;
                    }
                }
                GitOpKind::Add => {
                    reverse_git(&self.options.project_root, &["reset"]).await;
                    op.reversed = true;
                }
                GitOpKind::Push => {
                    // A published ref is not ours to rewrite
                    op.flagged = true;
                }
                GitOpKind::Checkout | GitOpKind::Other => {
                    op.flagged = true;
                }
            }
        }

        for step in &mut plan.steps {
            if step.status == StepStatus::Complete
                && step.finished_at.map(|t| t > cutoff).unwrap_or(false)
            {
                step.status = StepStatus::RolledBack;
            }
        }

        plan.status = PlanStatus::RolledBack;
        plan.log(format!("rolled back to checkpoint {checkpoint_id}"));

        let session_id = plan.session_id.clone();
        for step in plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::RolledBack)
        {
            self.publish_step(&session_id, plan_id, &step.id, StepStatus::RolledBack);
        }

        Ok(plan.clone())
    }

    /// Paths a step will touch, for checkpoint bookkeeping
    fn step_paths(&self, step: &Step) -> Vec<String> {
        let Some(schema) = self.registry.schema(&step.tool) else {
            return Vec::new();
        };
        let mutating = self
            .registry
            .capabilities(&step.tool)
            .map(|c| c.is_mutating())
            .unwrap_or(false);
        if !mutating {
            return Vec::new();
        }
        schema
            .params
            .iter()
            .filter(|p| p.ty == ParamType::Path)
            .filter_map(|p| step.input.get(&p.name).and_then(|v| v.as_str()))
            .map(|p| self.absolute(p))
            .collect()
    }

    fn absolute(&self, path: &str) -> String {
        let p = Path::new(path);
        if p.is_absolute() {
            path.to_string()
        } else {
            self.options
                .project_root
                .join(p)
                .to_string_lossy()
                .into_owned()
        }
    }

    async fn capture_checkpoint(
        &self,
        plan_arc: &Arc<Mutex<Plan>>,
        step_id: &str,
        touched: &HashSet<String>,
    ) {
        let mut files = HashMap::new();
        for path in touched {
            let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
            files.insert(path.clone(), content);
        }
        let git_ref = current_git_ref(&self.options.project_root).await;

        let mut plan = plan_arc.lock().await;
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            step_id: step_id.to_string(),
            created_at: Utc::now(),
            files,
            git_ref,
        };
        plan.log(format!(
            "checkpoint {} after step {step_id}",
            checkpoint.id
        ));
        plan.checkpoints.push(checkpoint);
    }

    fn publish_step(&self, session_id: &str, plan_id: &str, step_id: &str, status: StepStatus) {
        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::PlanStepStatus {
            session_id: session_id.to_string(),
            seq,
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
            status: status.as_str().to_string(),
        });
    }
}

/// Run one step with its step-level retry budget
///
/// Tool-level retries happen inside the registry; this loop re-runs the
/// whole step, setup included, and applies to retryable steps only.
async fn run_step(
    registry: &ToolRegistry,
    session_id: &str,
    project_root: &Path,
    step: Step,
    max_retries: u32,
    timeout_secs: u64,
    cancel: CancellationToken,
) -> StepOutcome {
    let mut retries = 0u32;

    loop {
        let tool_use = ToolUse {
            id: format!("step-{}-{}", step.id, retries),
            name: step.tool.clone(),
            input: step.input.clone(),
        };
        let ctx = ToolContext::new(Some(session_id.to_string()), project_root)
            .with_cancel(cancel.clone());

        let attempt = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            registry.execute(&tool_use, &ctx),
        )
        .await;

        let (success, output, error) = match attempt {
            Ok(result) if !result.is_error => (true, Some(result.content), None),
            Ok(result) => (false, None, Some(result.content)),
            Err(_) => (
                false,
                None,
                Some(format!("step timed out after {timeout_secs}s")),
            ),
        };

        if success {
            return StepOutcome {
                step_id: step.id,
                success: true,
                output,
                error: None,
                retries,
            };
        }

        if !step.retryable || retries >= max_retries || cancel.is_cancelled() {
            return StepOutcome {
                step_id: step.id,
                success: false,
                output: None,
                error,
                retries,
            };
        }
        retries += 1;
        warn!(step = step.id, retry = retries, "re-running failed step");
    }
}

/// Current HEAD ref, when the project is under version control
async fn current_git_ref(root: &Path) -> Option<String> {
    if !root.join(".git").exists() {
        return None;
    }
    let output = tokio::process::Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(root)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

async fn reverse_git(root: &Path, args: &[&str]) {
    let result = tokio::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await;
    match result {
        Ok(output) if !output.status.success() => {
            warn!(
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "git reversal command failed"
            );
        }
        Err(e) => warn!(args = ?args, error = %e, "git reversal command did not run"),
        _ => {}
    }
}
