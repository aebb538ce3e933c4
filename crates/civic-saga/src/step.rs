//! Step Capability Set and Saga Definitions
//!
//! A saga is a value: an ordered list of step descriptors. The coordinator
//! is polymorphic only over the capability set {execute, compensate?,
//! is_compensatable, timeout}; there is no step inheritance.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Caller context threaded through one saga execution.
///
/// The context is serialized onto the saga instance at submission. Steps
/// receive it mutably, so the result of step i is observable by step j > i.
pub trait SagaContext:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Correlation id propagated for tracing.
    fn correlation_id(&self) -> &str;

    /// Resource key to lock for the duration of the saga
    /// (`record:<id>` / `draft:<id>`), or None for unkeyed work.
    fn resource_key(&self) -> Option<String>;

    /// Acting user, when known. Feeds derived idempotency keys.
    fn user(&self) -> Option<&str> {
        None
    }

    /// Context fields folded into a derived idempotency key.
    fn idempotency_parts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Validate the context before any state is written.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// One unit of work inside a saga.
///
/// `execute` runs forward; `compensate` undoes it when a later step fails.
/// Non-compensatable steps keep the default no-op compensate and report
/// `is_compensatable() == false`, which excludes them from the rollback
/// pass entirely.
#[async_trait]
pub trait SagaStep<C: SagaContext>: Send + Sync {
    fn name(&self) -> &str;

    fn is_compensatable(&self) -> bool {
        true
    }

    /// Per-step timeout; None uses the coordinator default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, ctx: &mut C) -> anyhow::Result<serde_json::Value>;

    async fn compensate(
        &self,
        _ctx: &mut C,
        _result: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An ordered list of steps treated as a single logical transaction.
pub struct SagaDefinition<C: SagaContext> {
    pub saga_type: String,
    pub version: u32,
    pub steps: Vec<Arc<dyn SagaStep<C>>>,
    /// Saga-specific context check, run before any state is written.
    pub validator: Option<Box<dyn Fn(&C) -> Result<(), String> + Send + Sync>>,
}

impl<C: SagaContext> SagaDefinition<C> {
    pub fn new(saga_type: impl Into<String>, version: u32) -> Self {
        Self {
            saga_type: saga_type.into(),
            version,
            steps: Vec::new(),
            validator: None,
        }
    }

    /// Append a step. Steps run in insertion order.
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&C) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestCtx {
        correlation_id: String,
        touched: Vec<String>,
    }

    impl SagaContext for TestCtx {
        fn correlation_id(&self) -> &str {
            &self.correlation_id
        }

        fn resource_key(&self) -> Option<String> {
            None
        }
    }

    struct Touch(&'static str);

    #[async_trait]
    impl SagaStep<TestCtx> for Touch {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, ctx: &mut TestCtx) -> anyhow::Result<serde_json::Value> {
            ctx.touched.push(self.0.to_string());
            Ok(serde_json::json!({ "step": self.0 }))
        }
    }

    #[tokio::test]
    async fn test_definition_preserves_step_order() {
        let saga = SagaDefinition::new("Test", 1)
            .step(Touch("first"))
            .step(Touch("second"))
            .step(Touch("third"));

        assert_eq!(saga.len(), 3);

        let mut ctx = TestCtx {
            correlation_id: "c1".to_string(),
            touched: Vec::new(),
        };
        for step in &saga.steps {
            step.execute(&mut ctx).await.unwrap();
        }
        assert_eq!(ctx.touched, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_default_compensate_is_noop() {
        let step = Touch("only");
        let mut ctx = TestCtx {
            correlation_id: "c1".to_string(),
            touched: Vec::new(),
        };
        let result = step.execute(&mut ctx).await.unwrap();
        step.compensate(&mut ctx, &result).await.unwrap();
        assert_eq!(ctx.touched, vec!["only"]);
    }
}
