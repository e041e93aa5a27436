//! Pipeline and step definitions.
//!
//! Pipelines are code: an ordered list of steps, each wrapping an opaque
//! handler. Definitions live only in memory and are registered on every
//! process start.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event_store::EventStore;
use crate::domain::{ApprovalDraft, State};

/// Everything a handler gets to see for one attempt
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub correlation_id: String,
    pub step_name: String,

    /// Accumulated state at the moment the step runs
    pub input: State,

    /// The engine's persistence session
    pub store: EventStore,
}

impl StepContext {
    /// Typed read of a state key; `None` when absent or null
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.input.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("State key '{}' has an unexpected shape", key)),
        }
    }

    /// Typed read of a state key that must be present
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .with_context(|| format!("Step '{}' requires state key '{}'", self.step_name, key))
    }
}

/// What a handler reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Output (a JSON object, or null for none) is merged into the state
    Completed { output: Value },

    /// Counts as a failed attempt, exactly like a returned `Err`
    Failed { error: String },

    /// Pause the run until a human decides
    WaitingApproval {
        output: Value,
        approval: Option<ApprovalDraft>,
    },
}

impl StepResult {
    pub fn completed(output: Value) -> Self {
        Self::Completed { output }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Ask for approval of a side-effecting action
    pub fn needs_approval(draft: ApprovalDraft) -> Self {
        Self::WaitingApproval {
            output: Value::Null,
            approval: Some(draft),
        }
    }

    /// Attach output to a waiting result (ignored for other variants)
    pub fn with_output(self, value: Value) -> Self {
        match self {
            Self::WaitingApproval { approval, .. } => Self::WaitingApproval {
                output: value,
                approval,
            },
            Self::Completed { .. } => Self::Completed { output: value },
            other => other,
        }
    }
}

/// Turn a handler output value into a state fragment
pub(crate) fn output_to_state(output: Value) -> std::result::Result<State, String> {
    match output {
        Value::Null => Ok(State::new()),
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "step output must be a JSON object, got {}",
            json_kind(&other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The opaque unit of work a step wraps
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult>;
}

/// Adapts a plain function or closure into a `StepHandler`
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&StepContext) -> Result<StepResult> + Send + Sync,
{
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult> {
        (self.0)(ctx)
    }
}

/// Informational classification of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Deterministic,
    Llm,
    Approval,
    FanOut,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Llm => "llm",
            Self::Approval => "approval",
            Self::FanOut => "fan_out",
        }
    }
}

impl Default for StepType {
    fn default() -> Self {
        Self::Deterministic
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for failed steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay; attempt n waits `backoff_seconds * 2^(n-1)`
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
}

fn default_backoff_seconds() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_seconds: f64) -> Self {
        Self {
            max_retries,
            backoff_seconds,
        }
    }

    /// Total attempts, including the first try
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Check if we should retry after a failed attempt (1-indexed)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let seconds = self.backoff_seconds * 2f64.powi(exponent);
        if seconds.is_finite() && seconds > 0.0 {
            Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// A single step in a pipeline
#[derive(Clone)]
pub struct StepDefinition {
    /// Unique within its pipeline
    pub name: String,
    pub handler: Arc<dyn StepHandler>,
    pub step_type: StepType,
    pub retry: RetryPolicy,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, handler: impl StepHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            step_type: StepType::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Build a step from a synchronous closure
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<StepResult> + Send + Sync + 'static,
    {
        Self::new(name, FnHandler(f))
    }

    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_seconds: f64) -> Self {
        self.retry = RetryPolicy::new(max_retries, backoff_seconds);
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("step_type", &self.step_type)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// A complete pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name (registry key)
    pub name: String,

    /// Ordered list of steps to execute
    pub steps: Vec<StepDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                anyhow::bail!("Step {} has an empty name", i);
            }
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                anyhow::bail!(
                    "Pipeline '{}' has duplicate step name '{}'",
                    self.name,
                    step.name
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> StepDefinition {
        StepDefinition::from_fn("noop", |_ctx| Ok(StepResult::completed(Value::Null)))
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::new(4, 1.5);

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(6000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(12000));
    }

    #[test]
    fn test_retry_policy_zero_and_invalid_backoff() {
        assert_eq!(RetryPolicy::new(2, 0.0).delay_for_attempt(3), Duration::ZERO);
        assert_eq!(RetryPolicy::new(2, -1.0).delay_for_attempt(1), Duration::ZERO);
        assert_eq!(RetryPolicy::new(2, f64::NAN).delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(2, 0.0);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let no_retry = RetryPolicy::default();
        assert_eq!(no_retry.max_attempts(), 1);
        assert!(!no_retry.should_retry(1));
    }

    #[test]
    fn test_output_to_state() {
        assert!(output_to_state(Value::Null).unwrap().is_empty());
        assert_eq!(output_to_state(json!({"x": 1})).unwrap()["x"], 1);
        let err = output_to_state(json!([1, 2])).unwrap_err();
        assert!(err.contains("an array"));
    }

    #[test]
    fn test_with_output() {
        let waiting = StepResult::needs_approval(ApprovalDraft::new("create_task", json!({})))
            .with_output(json!({"needs_approval": true}));
        match waiting {
            StepResult::WaitingApproval { output, approval } => {
                assert_eq!(output["needs_approval"], true);
                assert!(approval.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            StepResult::failed("x").with_output(json!({})),
            StepResult::failed("x")
        );
    }

    #[test]
    fn test_pipeline_validation() {
        let ok = PipelineDefinition::new("test").step(noop());
        assert!(ok.validate().is_ok());

        let dup = PipelineDefinition::new("dup").step(noop()).step(noop());
        assert!(dup.validate().is_err());

        assert!(PipelineDefinition::new("").validate().is_err());
    }

    #[test]
    fn test_context_typed_accessors() {
        let mut input = State::new();
        input.insert("x".to_string(), json!(41));
        input.insert("gone".to_string(), Value::Null);

        let ctx = StepContext {
            run_id: Uuid::new_v4(),
            correlation_id: "c".to_string(),
            step_name: "read".to_string(),
            input,
            store: EventStore::open_in_memory().unwrap(),
        };

        assert_eq!(ctx.require::<i64>("x").unwrap(), 41);
        assert_eq!(ctx.get::<i64>("gone").unwrap(), None);
        assert!(ctx.get::<String>("x").is_err());
        let err = ctx.require::<i64>("missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
