use async_trait::async_trait;
use isvc_models::{ClusterId, Output, Spec};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::IntegratedServiceError;

/// Validation, output and spec-preparation capability of one service.
#[async_trait]
pub trait IntegratedServiceManager: Send + Sync {
    fn name(&self) -> &str;

    async fn validate_spec(&self, spec: &Spec) -> Result<(), IntegratedServiceError>;

    async fn prepare_spec(
        &self,
        cluster_id: ClusterId,
        spec: Spec,
    ) -> Result<Spec, IntegratedServiceError>;

    async fn get_output(
        &self,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<Output, IntegratedServiceError>;
}

/// Apply/deactivate capability of one service.
///
/// Only the job activities and the in-process worker call this. Futures
/// returned here may be dropped at any await point when an operation is
/// preempted.
#[async_trait]
pub trait IntegratedServiceOperator: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(
        &self,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<(), IntegratedServiceError>;

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<(), IntegratedServiceError>;
}

pub struct ManagerRegistry {
    managers: BTreeMap<String, Arc<dyn IntegratedServiceManager>>,
}

impl ManagerRegistry {
    pub fn new(
        managers: impl IntoIterator<Item = Arc<dyn IntegratedServiceManager>>,
    ) -> Self {
        Self {
            managers: managers
                .into_iter()
                .map(|m| (m.name().to_string(), m))
                .collect(),
        }
    }

    pub fn manager(
        &self,
        name: &str,
    ) -> Result<Arc<dyn IntegratedServiceManager>, IntegratedServiceError> {
        self.managers
            .get(name)
            .cloned()
            .ok_or_else(|| IntegratedServiceError::UnknownService(name.to_string()))
    }

    /// Names of every registered manager, sorted.
    pub fn names(&self) -> Vec<String> {
        self.managers.keys().cloned().collect()
    }
}

pub struct OperatorRegistry {
    operators: BTreeMap<String, Arc<dyn IntegratedServiceOperator>>,
}

impl OperatorRegistry {
    pub fn new(
        operators: impl IntoIterator<Item = Arc<dyn IntegratedServiceOperator>>,
    ) -> Self {
        Self {
            operators: operators
                .into_iter()
                .map(|o| (o.name().to_string(), o))
                .collect(),
        }
    }

    pub fn operator(
        &self,
        name: &str,
    ) -> Result<Arc<dyn IntegratedServiceOperator>, IntegratedServiceError> {
        self.operators
            .get(name)
            .cloned()
            .ok_or_else(|| IntegratedServiceError::UnknownService(name.to_string()))
    }
}
