//! Planner
//!
//! Turns a natural-language request into a validated step DAG. Steps can
//! come from a model call with a dedicated planning prompt, or be
//! supplied by the caller verbatim. The planner never executes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::llm::client::ModelClient;
use crate::llm::types::{Message, MessagesRequest};
use crate::tool::registry::ToolRegistry;
use crate::tool::value::{input_from_json, ToolInput};

use super::{Plan, PlanOptions, PlanStatus, Step, StepStatus};

/// Tools whose effects cannot be safely repeated; their steps are never
/// retryable
const DESTRUCTIVE_TOOLS: &[&str] = &["remove_path", "git_checkout", "shell_command"];

/// Prompt sent with plan-synthesis requests
pub const PLANNING_PROMPT: &str = "Break the request below into concrete tool steps. Respond \
with ONLY a JSON object of the form {\"steps\": [{\"id\": \"s1\", \"description\": \"...\", \
\"tool\": \"<tool name>\", \"input\": {...}, \"depends_on\": []}]}. Every tool must come from \
the provided tool list, every input must satisfy that tool's schema, and depends_on may only \
reference earlier step ids. Do not add commentary.";

/// Errors from plan construction and validation
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("model returned no parsable plan: {0}")]
    Unparsable(String),

    #[error("plan synthesis failed: {0}")]
    Synthesis(#[from] crate::error::ClassifiedError),

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' references unknown tool '{tool}'")]
    UnknownTool { step: String, tool: String },

    #[error("step '{step}' input invalid: {reason}")]
    InvalidInput { step: String, reason: String },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle through step '{0}'")]
    Cycle(String),
}

/// Caller-facing step description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SynthesizedPlan {
    steps: Vec<StepSpec>,
}

/// Produces validated plans; execution belongs to the executor
pub struct Planner {
    registry: Arc<ToolRegistry>,
}

impl Planner {
    /// New planner validating against `registry`
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Build a plan from caller-supplied steps, verbatim
    pub fn from_steps(
        &self,
        session_id: &str,
        description: &str,
        specs: Vec<StepSpec>,
        options: PlanOptions,
    ) -> Result<Plan, PlannerError> {
        let steps = self.validate(specs)?;
        Ok(Plan {
            id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            session_id: session_id.to_string(),
            steps,
            status: PlanStatus::Pending,
            checkpoints: Vec::new(),
            git_operations: Vec::new(),
            logs: Vec::new(),
            options,
            created_at: chrono::Utc::now(),
        })
    }

    /// Synthesize steps via a model call, then validate as usual
    pub async fn synthesize(
        &self,
        client: &dyn ModelClient,
        model: &str,
        session_id: &str,
        description: &str,
        options: PlanOptions,
    ) -> Result<Plan, PlannerError> {
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: 4096,
            system: Some(PLANNING_PROMPT.to_string()),
            messages: vec![Message::user(description)],
            tools: self
                .registry
                .definitions()
                .iter()
                .map(|d| d.to_model_schema())
                .collect(),
            stream: None,
        };

        let response = client.complete(&request).await?;
        let text = response.into_message().text();
        let specs = parse_step_specs(&text)?;
        debug!(steps = specs.len(), "plan synthesized");
        self.from_steps(session_id, description, specs, options)
    }

    /// Validate specs and convert to steps
    fn validate(&self, specs: Vec<StepSpec>) -> Result<Vec<Step>, PlannerError> {
        let mut seen: HashSet<String> = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.id.clone()) {
                return Err(PlannerError::DuplicateStep(spec.id.clone()));
            }
        }

        let ids: HashSet<&str> = specs.iter().map(|s| s.id.as_str()).collect();
        let mut steps = Vec::with_capacity(specs.len());

        for spec in &specs {
            let Some(schema) = self.registry.schema(&spec.tool) else {
                return Err(PlannerError::UnknownTool {
                    step: spec.id.clone(),
                    tool: spec.tool.clone(),
                });
            };

            let mut input: ToolInput = input_from_json(spec.input.clone());
            schema
                .validate(&mut input)
                .map_err(|e| PlannerError::InvalidInput {
                    step: spec.id.clone(),
                    reason: e.message,
                })?;

            for dep in &spec.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(PlannerError::UnknownDependency {
                        step: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            steps.push(Step {
                id: spec.id.clone(),
                description: spec.description.clone(),
                tool: spec.tool.clone(),
                input,
                depends_on: spec.depends_on.clone(),
                status: StepStatus::Pending,
                retry_count: 0,
                retryable: !DESTRUCTIVE_TOOLS.contains(&spec.tool.as_str()),
                started_at: None,
                finished_at: None,
                output: None,
                error: None,
            });
        }

        detect_cycle(&steps)?;
        Ok(steps)
    }
}

/// Parse the model's JSON step list, stripping a markdown fence if present
fn parse_step_specs(text: &str) -> Result<Vec<StepSpec>, PlannerError> {
    let content = extract_from_markdown(text.trim());
    let json_start = content
        .find('{')
        .ok_or_else(|| PlannerError::Unparsable(truncate(content)))?;

    let parsed: SynthesizedPlan = serde_json::from_str(&content[json_start..])
        .map_err(|e| PlannerError::Unparsable(format!("{e}: {}", truncate(content))))?;
    Ok(parsed.steps)
}

/// Extract the body of a ```-fenced block if the response is wrapped
fn extract_from_markdown(text: &str) -> &str {
    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let inner = &text[start + 3..start + 3 + end];
            let inner = inner.trim_start();
            if let Some(nl) = inner.find('\n') {
                return &inner[nl + 1..];
            }
            return inner;
        }
    }
    text
}

fn truncate(text: &str) -> String {
    let mut s: String = text.chars().take(120).collect();
    if s.len() < text.len() {
        s.push_str("...");
    }
    s
}

/// Three-color DFS cycle detection
fn detect_cycle(steps: &[Step]) -> Result<(), PlannerError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let index: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut colors: HashMap<&str, Color> =
        steps.iter().map(|s| (s.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a Step>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), PlannerError> {
        match colors.get(id).copied() {
            Some(Color::Black) | None => return Ok(()),
            Some(Color::Gray) => return Err(PlannerError::Cycle(id.to_string())),
            Some(Color::White) => {}
        }
        colors.insert(id, Color::Gray);
        if let Some(step) = index.get(id) {
            for dep in &step.depends_on {
                visit(dep.as_str(), index, colors)?;
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    for step in steps {
        visit(step.id.as_str(), &index, &mut colors)?;
    }
    Ok(())
}
