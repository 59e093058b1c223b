#![allow(dead_code)]

use async_trait::async_trait;
use isvc_manager::errors::IntegratedServiceError;
use isvc_manager::registry::{IntegratedServiceManager, IntegratedServiceOperator};
use isvc_models::{ClusterId, Operation, Output, Spec};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub fn spec(value: Value) -> Spec {
    value.as_object().cloned().unwrap_or_default()
}

/// Poll `check` until it holds, for at most 5s.
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    eventually_within(what, Duration::from_secs(5), check).await
}

/// Deadline is measured on the tokio clock, so paused tests may use long ones.
pub async fn eventually_within<F, Fut>(what: &str, limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub cluster_id: ClusterId,
    pub spec: Spec,
}

impl Call {
    pub fn tag(&self) -> Option<&str> {
        self.spec.get("tag").and_then(Value::as_str)
    }
}

/// Operator driven by the spec it receives:
/// `"mode": "block"` never finishes on its own, `"mode": "fail"` fails
/// permanently, anything else succeeds. `not_ready_for` makes the first N
/// calls report a cluster that is not ready.
pub struct ScriptedOperator {
    name: String,
    calls: Mutex<Vec<Call>>,
    not_ready: AtomicU32,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedOperator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            not_ready: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn not_ready_for(self, attempts: u32) -> Self {
        self.not_ready.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        operation: Operation,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.calls.lock().unwrap().push(Call {
            operation,
            cluster_id,
            spec: spec.clone(),
        });
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let pending_failures = self.not_ready.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.not_ready.store(pending_failures - 1, Ordering::SeqCst);
            return Err(IntegratedServiceError::ClusterNotReady(cluster_id));
        }
        match spec.get("mode").and_then(Value::as_str) {
            Some("block") => std::future::pending().await,
            Some("fail") => Err(IntegratedServiceError::OperatorNotAvailable(format!(
                "{} operator missing",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IntegratedServiceOperator for ScriptedOperator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, cluster_id: ClusterId, spec: &Spec) -> Result<(), IntegratedServiceError> {
        self.run(Operation::Apply, cluster_id, spec).await
    }

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.run(Operation::Deactivate, cluster_id, spec).await
    }
}

/// Rejects specs carrying an `invalid` key, stamps prepared specs and
/// reports a fixed endpoint as output.
pub struct StaticManager {
    name: String,
}

impl StaticManager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl IntegratedServiceManager for StaticManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_spec(&self, spec: &Spec) -> Result<(), IntegratedServiceError> {
        if spec.contains_key("invalid") {
            return Err(IntegratedServiceError::invalid_spec(&self.name, "invalid key set"));
        }
        Ok(())
    }

    async fn prepare_spec(
        &self,
        cluster_id: ClusterId,
        mut spec: Spec,
    ) -> Result<Spec, IntegratedServiceError> {
        spec.insert("prepared_for".into(), json!(cluster_id));
        Ok(spec)
    }

    async fn get_output(
        &self,
        cluster_id: ClusterId,
        _spec: &Spec,
    ) -> Result<Output, IntegratedServiceError> {
        Ok(spec(json!({ "endpoint": format!("{}.cluster-{cluster_id}.local", self.name) })))
    }
}
