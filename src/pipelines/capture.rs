//! `capture`: turn a free-text note into a task proposal.
//!
//! 1. `normalize` collapses whitespace in `text` and derives a title
//! 2. `propose_task` pauses the run on a `create_task` approval
//! 3. `pending_report` counts approvals still waiting for a decision

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::actions::ActionKind;
use crate::core::{PipelineDefinition, StepContext, StepDefinition, StepHandler, StepResult, StepType};
use crate::domain::ApprovalDraft;

pub const PIPELINE_NAME: &str = "capture";

/// Longest title kept from the captured text
const MAX_TITLE_CHARS: usize = 120;

const DEFAULT_ESTIMATE_MIN: i64 = 30;

/// Clean up the captured text and derive a task title
struct Normalize;

#[async_trait]
impl StepHandler for Normalize {
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult> {
        let text: String = ctx.require("text")?;
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            bail!("Captured text is empty");
        }

        let title = match normalized.char_indices().nth(MAX_TITLE_CHARS) {
            Some((cut, _)) => format!("{}...", normalized[..cut].trim_end()),
            None => normalized.clone(),
        };

        Ok(StepResult::completed(json!({
            "text": normalized,
            "title": title,
        })))
    }
}

/// Ask for sign-off before a task is created
struct ProposeTask;

#[async_trait]
impl StepHandler for ProposeTask {
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult> {
        let title: String = ctx.require("title")?;
        let text: String = ctx.require("text")?;
        let estimate_min: i64 = ctx.get("estimate_min")?.unwrap_or(DEFAULT_ESTIMATE_MIN);
        let priority: Option<String> = ctx.get("priority")?;

        let mut payload = json!({
            "title": title,
            "estimate_min": estimate_min,
        });
        if let Some(priority) = priority {
            payload["priority"] = json!(priority);
        }

        let draft = ApprovalDraft::new(ActionKind::CreateTask.as_str(), payload).with_context(
            json!({
                "source": PIPELINE_NAME,
                "correlation_id": ctx.correlation_id,
                "text": text,
            }),
        );

        Ok(StepResult::needs_approval(draft).with_output(json!({ "proposed_title": title })))
    }
}

/// Report how many approvals are still open
struct PendingReport;

#[async_trait]
impl StepHandler for PendingReport {
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult> {
        let pending = ctx.store.list_pending_approvals()?;
        Ok(StepResult::completed(json!({ "pending_approvals": pending.len() })))
    }
}

/// Definition of the `capture` pipeline
pub fn definition() -> PipelineDefinition {
    PipelineDefinition::new(PIPELINE_NAME)
        .step(StepDefinition::new("normalize", Normalize))
        .step(StepDefinition::new("propose_task", ProposeTask).with_type(StepType::Approval))
        .step(StepDefinition::new("pending_report", PendingReport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ApprovalGate, EventStore, Orchestrator};
    use crate::domain::RunStatus;

    fn engine() -> Orchestrator {
        let engine = Orchestrator::new(EventStore::open_in_memory().unwrap());
        engine.register(definition()).unwrap();
        engine
    }

    #[test]
    fn test_definition_is_valid() {
        let definition = definition();
        definition.validate().unwrap();
        assert_eq!(definition.steps.len(), 3);
        let propose = definition.steps.iter().find(|s| s.name == "propose_task").unwrap();
        assert_eq!(propose.step_type, StepType::Approval);
    }

    #[tokio::test]
    async fn test_capture_pauses_then_reports() {
        let engine = engine();
        let result = engine
            .run(PIPELINE_NAME, json!({"text": "  call   the\nplumber  "}))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::WaitingApproval);
        let id = result.pending_approval_id.unwrap();

        let gate: &ApprovalGate = engine.gate();
        let request = gate.get(id).unwrap();
        assert_eq!(request.action_type, "create_task");
        assert_eq!(request.action_payload["title"], "call the plumber");
        assert_eq!(request.action_payload["estimate_min"], 30);

        gate.approve(id).unwrap();
        gate.execute_approved(id).unwrap();

        let result = engine.resume(result.run_id).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        let output = result.output.unwrap();
        assert_eq!(output["proposed_title"], "call the plumber");
        assert_eq!(output["pending_approvals"], 0);
    }

    #[tokio::test]
    async fn test_blank_text_fails_run() {
        let engine = engine();
        let result = engine.run(PIPELINE_NAME, json!({"text": "   "})).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_long_text_is_truncated_in_title() {
        let engine = engine();
        let text = "word ".repeat(100);
        let result = engine.run(PIPELINE_NAME, json!({ "text": text })).await.unwrap();

        let request = engine.gate().get(result.pending_approval_id.unwrap()).unwrap();
        let title = request.action_payload["title"].as_str().unwrap();
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= MAX_TITLE_CHARS + 3);
    }
}
