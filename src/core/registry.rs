//! In-memory map from pipeline name to definition.
//!
//! Not persisted: every process must register its pipelines before calling
//! `run` or `resume`. Each orchestrator owns (or shares) its own registry, so
//! independent engines never see each other's definitions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use super::error::EngineError;
use super::pipeline::PipelineDefinition;

#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<String, Arc<PipelineDefinition>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Last write wins; the replaced one is returned.
    ///
    /// Definitions that fail `validate` (e.g. duplicate step names) are
    /// refused and the registry is left unchanged.
    pub fn register(
        &self,
        definition: PipelineDefinition,
    ) -> Result<Option<Arc<PipelineDefinition>>, EngineError> {
        definition
            .validate()
            .map_err(|e| EngineError::InvalidPipeline {
                name: definition.name.clone(),
                reason: format!("{:#}", e),
            })?;

        let name = definition.name.clone();
        debug!(pipeline = %name, steps = definition.steps.len(), "Registering pipeline");
        Ok(self
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(definition)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<PipelineDefinition>> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{StepDefinition, StepResult};
    use serde_json::Value;

    fn pipeline(name: &str, steps: &[&str]) -> PipelineDefinition {
        steps.iter().fold(PipelineDefinition::new(name), |p, step| {
            p.step(StepDefinition::from_fn(*step, |_ctx| {
                Ok(StepResult::completed(Value::Null))
            }))
        })
    }

    #[test]
    fn test_register_and_get() {
        let registry = PipelineRegistry::new();
        assert!(registry.get("test_pipe").is_none());

        registry.register(pipeline("test_pipe", &["echo"])).unwrap();
        assert!(registry.contains("test_pipe"));
        assert_eq!(registry.get("test_pipe").unwrap().steps.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let registry = PipelineRegistry::new();
        assert!(registry.register(pipeline("p", &["a"])).unwrap().is_none());

        let previous = registry.register(pipeline("p", &["a", "b"])).unwrap().unwrap();
        assert_eq!(previous.steps.len(), 1);
        assert_eq!(registry.get("p").unwrap().steps.len(), 2);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PipelineRegistry::new();
        let b = PipelineRegistry::new();
        a.register(pipeline("only_in_a", &["x"])).unwrap();

        assert!(a.contains("only_in_a"));
        assert!(!b.contains("only_in_a"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = PipelineRegistry::new();
        registry.register(pipeline("zeta", &[])).unwrap();
        registry.register(pipeline("alpha", &[])).unwrap();
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_duplicate_step_names_are_refused() {
        let registry = PipelineRegistry::new();
        registry.register(pipeline("dup", &["first"])).unwrap();

        let err = registry.register(pipeline("dup", &["a", "b", "a"])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("duplicate step name 'a'"));

        // The earlier definition stays registered
        assert_eq!(registry.get("dup").unwrap().steps.len(), 1);
    }
}
