//! Main orchestrator for pipeline execution.
//!
//! Drives one run through its steps in order. Each step is keyed by
//! `(run, step, hash(accumulated state))`; an Event already stored under that
//! key decides whether the step is skipped, still paused for approval, or
//! (re)executed under its retry policy.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    ApprovalDraft, ApprovalStatus, Event, EventStatus, EventSummary, NewEvent, Run, RunStatus,
    State,
};

use super::approval_gate::ApprovalGate;
use super::error::EngineError;
use super::event_store::{generate_idempotency_key, hash_state, EventStore, StoreError};
use super::pipeline::{output_to_state, PipelineDefinition, StepContext, StepDefinition, StepResult};
use super::registry::PipelineRegistry;

/// What `run` and `resume` hand back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub correlation_id: String,
    pub status: RunStatus,
    pub output: Option<State>,
    pub error: Option<String>,
    pub pending_approval_id: Option<i64>,
}

/// Status report for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    pub events: Vec<EventSummary>,
}

/// How a single step ended after the retry loop
enum StepExecution {
    Completed(State),
    WaitingApproval {
        output: State,
        approval: Option<ApprovalDraft>,
    },
    Failed(String),
}

/// Main pipeline orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PipelineRegistry>,
    store: EventStore,
    gate: ApprovalGate,
}

impl Orchestrator {
    /// Create an orchestrator with its own empty registry
    pub fn new(store: EventStore) -> Self {
        Self::with_registry(store, Arc::new(PipelineRegistry::new()))
    }

    /// Create an orchestrator over a shared registry
    pub fn with_registry(store: EventStore, registry: Arc<PipelineRegistry>) -> Self {
        let gate = ApprovalGate::new(store.clone());
        Self {
            registry,
            store,
            gate,
        }
    }

    /// Replace the approval gate (e.g. one with a default decider)
    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    /// Register a pipeline definition (last write wins)
    pub fn register(&self, definition: PipelineDefinition) -> Result<(), EngineError> {
        self.registry.register(definition)?;
        Ok(())
    }

    /// Execute a registered pipeline from the beginning
    #[instrument(skip(self, input), fields(pipeline = %pipeline_name))]
    pub async fn run(
        &self,
        pipeline_name: &str,
        input: serde_json::Value,
    ) -> Result<RunResult, EngineError> {
        let definition = self
            .registry
            .get(pipeline_name)
            .ok_or_else(|| EngineError::NotRegistered(pipeline_name.to_string()))?;

        let input = match input {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => State::new(),
            _ => return Err(EngineError::InvalidInput),
        };

        let input_hash = hash_state(&input).map_err(StoreError::from)?;
        let mut run = Run::new(pipeline_name.to_string(), input, input_hash);
        self.store.insert_run(&run)?;
        info!(run_id = %run.id, correlation_id = %run.correlation_id, "Starting pipeline execution");

        self.execute_steps(&definition, &mut run).await
    }

    /// Resume a run that is waiting for approval or has failed
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn resume(&self, run_id: Uuid) -> Result<RunResult, EngineError> {
        let mut run = self
            .store
            .get_run(run_id)?
            .ok_or(EngineError::RunNotFound(run_id))?;

        if !run.status.is_resumable() {
            return Err(EngineError::NotResumable {
                run_id,
                status: run.status,
            });
        }

        let definition = self
            .registry
            .get(&run.pipeline_name)
            .ok_or_else(|| EngineError::NotRegistered(run.pipeline_name.clone()))?;

        // Only one caller may move the run out of its resumable state
        run.touch();
        if !self.store.claim_resume(run_id, &run.updated_at)? {
            let status = self
                .store
                .get_run(run_id)?
                .ok_or(EngineError::RunNotFound(run_id))?
                .status;
            return Err(EngineError::NotResumable { run_id, status });
        }

        info!(pipeline = %run.pipeline_name, from = %run.status, "Resuming run");
        run.status = RunStatus::Running;

        self.execute_steps(&definition, &mut run).await
    }

    /// Current status of a run with its per-step events
    pub fn status(&self, run_id: Uuid) -> Result<RunInfo, EngineError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or(EngineError::RunNotFound(run_id))?;
        self.run_info(run)
    }

    /// Recent runs, newest first
    pub fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<RunInfo>, EngineError> {
        self.store
            .list_runs(status, limit)?
            .into_iter()
            .map(|run| self.run_info(run))
            .collect()
    }

    fn run_info(&self, run: Run) -> Result<RunInfo, EngineError> {
        let events = self
            .store
            .events_for_run(run.id)?
            .iter()
            .map(Event::summary)
            .collect();

        Ok(RunInfo {
            run_id: run.id,
            pipeline_name: run.pipeline_name,
            status: run.status,
            correlation_id: run.correlation_id,
            created_at: run.created_at,
            updated_at: run.updated_at,
            error: run.error,
            events,
        })
    }

    /// Walk the steps from the first, skipping what is already resolved
    async fn execute_steps(
        &self,
        definition: &PipelineDefinition,
        run: &mut Run,
    ) -> Result<RunResult, EngineError> {
        let mut state = run.input.clone();

        for step in &definition.steps {
            let input_hash = hash_state(&state).map_err(StoreError::from)?;
            let idem_key = generate_idempotency_key(run.id, &step.name, &input_hash);
            let existing = self.store.find_event(&idem_key)?;

            if let Some(mut event) = existing.clone() {
                if event.is_resolved() {
                    debug!(step = %step.name, status = %event.status, "Step already resolved, skipping");
                    merge_cached(&mut state, run, &step.name);
                    continue;
                }

                if event.status == EventStatus::WaitingApproval {
                    let request = self.gate.decision_for(run.id, &step.name)?;
                    let resolved = match request.as_ref().map(|r| r.status) {
                        Some(ApprovalStatus::Approved) => EventStatus::Approved,
                        Some(ApprovalStatus::Rejected) => EventStatus::Rejected,
                        _ => {
                            info!(step = %step.name, "Step still waiting for approval");
                            return self.pause(run, request.map(|r| r.id));
                        }
                    };

                    info!(step = %step.name, status = %resolved, "Approval decided, continuing");
                    event.status = resolved;
                    self.store.update_event(&event)?;
                    merge_cached(&mut state, run, &step.name);
                    continue;
                }
            }

            let outcome = self
                .execute_step_with_retry(run, step, &state, &input_hash, &idem_key, existing)
                .await?;

            match outcome {
                StepExecution::Completed(output) => {
                    merge_into(&mut state, &output);
                    run.step_outputs.insert(step.name.clone(), output);
                    run.touch();
                    self.store.update_run(run)?;
                }
                StepExecution::WaitingApproval { output, approval } => {
                    run.step_outputs.insert(step.name.clone(), output);
                    let pending_id = match approval {
                        Some(draft) => Some(self.gate.request_approval(
                            Some(run.id),
                            Some(step.name.as_str()),
                            &draft,
                        )?),
                        None => None,
                    };
                    info!(step = %step.name, ?pending_id, "Run paused for approval");
                    return self.pause(run, pending_id);
                }
                StepExecution::Failed(error) => {
                    return self.fail(run, error);
                }
            }
        }

        self.complete(run, state)
    }

    /// Execute a step with retry logic
    #[instrument(skip_all, fields(run_id = %run.id, step = %step.name))]
    async fn execute_step_with_retry(
        &self,
        run: &Run,
        step: &StepDefinition,
        input: &State,
        input_hash: &str,
        idem_key: &str,
        existing: Option<Event>,
    ) -> Result<StepExecution, EngineError> {
        let policy = &step.retry;
        let max_attempts = policy.max_attempts();

        // Failed and retrying attempts keep counting
        let (mut event, start_attempt) = match existing {
            Some(event) => {
                let next = event.attempt.saturating_add(1);
                if next > max_attempts {
                    let error = event
                        .error
                        .clone()
                        .unwrap_or_else(|| "Exhausted all retry attempts".to_string());
                    warn!(attempt = event.attempt, "No attempts left for step");
                    return Ok(StepExecution::Failed(error));
                }
                (event, next)
            }
            None => {
                let event = self.store.insert_event(&NewEvent {
                    run_id: run.id,
                    step_name: step.name.clone(),
                    step_type: step.step_type.as_str().to_string(),
                    input_hash: input_hash.to_string(),
                    idempotency_key: idem_key.to_string(),
                })?;
                (event, 1)
            }
        };

        let ctx = StepContext {
            run_id: run.id,
            correlation_id: run.correlation_id.clone(),
            step_name: step.name.clone(),
            input: input.clone(),
            store: self.store.clone(),
        };

        for attempt in start_attempt..=max_attempts {
            event.status = EventStatus::Running;
            event.attempt = attempt;
            event.error = None;
            self.store.update_event(&event)?;

            debug!(attempt, "Executing step");
            let step_start = Instant::now();
            let result = match step.handler.execute(&ctx).await {
                Ok(result) => result,
                Err(e) => StepResult::Failed {
                    error: format!("{:#}", e),
                },
            };
            event.duration_ms = Some(step_start.elapsed().as_millis() as u64);

            let error = match result {
                StepResult::Completed { output } => match output_to_state(output) {
                    Ok(output) => {
                        event.status = EventStatus::Completed;
                        event.output_hash = Some(hash_state(&output).map_err(StoreError::from)?);
                        self.store.update_event(&event)?;
                        info!(attempt, duration_ms = event.duration_ms, "Step completed");
                        return Ok(StepExecution::Completed(output));
                    }
                    Err(error) => error,
                },
                StepResult::WaitingApproval { output, approval } => match output_to_state(output) {
                    Ok(output) => {
                        event.status = EventStatus::WaitingApproval;
                        if !output.is_empty() {
                            event.output_hash =
                                Some(hash_state(&output).map_err(StoreError::from)?);
                        }
                        self.store.update_event(&event)?;
                        return Ok(StepExecution::WaitingApproval { output, approval });
                    }
                    Err(error) => error,
                },
                StepResult::Failed { error } => error,
            };

            event.error = Some(error.clone());

            if policy.should_retry(attempt) {
                let delay = policy.delay_for_attempt(attempt);
                event.status = EventStatus::Retrying;
                self.store.update_event(&event)?;

                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Step failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            event.status = EventStatus::Failed;
            self.store.update_event(&event)?;
            error!(attempt, error = %error, "Step failed permanently");
            return Ok(StepExecution::Failed(error));
        }

        Ok(StepExecution::Failed(
            event
                .error
                .unwrap_or_else(|| "Exhausted all retry attempts".to_string()),
        ))
    }

    fn pause(&self, run: &mut Run, pending_id: Option<i64>) -> Result<RunResult, EngineError> {
        run.status = RunStatus::WaitingApproval;
        run.touch();
        self.store.update_run(run)?;
        Ok(result_for(run, pending_id))
    }

    fn fail(&self, run: &mut Run, error: String) -> Result<RunResult, EngineError> {
        error!(run_id = %run.id, %error, "Run failed");
        run.status = RunStatus::Failed;
        run.error = Some(error);
        run.touch();
        self.store.update_run(run)?;
        Ok(result_for(run, None))
    }

    fn complete(&self, run: &mut Run, state: State) -> Result<RunResult, EngineError> {
        info!(run_id = %run.id, "Run completed successfully");
        run.status = RunStatus::Completed;
        run.output = Some(state);
        run.error = None;
        run.touch();
        self.store.update_run(run)?;
        Ok(result_for(run, None))
    }
}

fn result_for(run: &Run, pending_approval_id: Option<i64>) -> RunResult {
    RunResult {
        run_id: run.id,
        correlation_id: run.correlation_id.clone(),
        status: run.status,
        output: run.output.clone(),
        error: run.error.clone(),
        pending_approval_id,
    }
}

fn merge_into(state: &mut State, output: &State) {
    for (key, value) in output {
        state.insert(key.clone(), value.clone());
    }
}

fn merge_cached(state: &mut State, run: &Run, step_name: &str) {
    if let Some(output) = run.step_output(step_name) {
        merge_into(state, output);
    }
}
