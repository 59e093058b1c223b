mod durable;
mod local;

pub use durable::WorkflowDispatcher;
pub use local::{LocalDispatcher, LocalWorker};

use async_trait::async_trait;
use isvc_models::{ClusterId, Operation, Spec};

use crate::errors::IntegratedServiceError;

/// Starts asynchronous apply/deactivate work. Every call returns as soon as
/// the work is accepted; completion is only observable through status.
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError>;

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError>;

    /// True while an operation for the key has not terminated yet.
    async fn is_being_dispatched(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<bool, IntegratedServiceError>;
}

/// Unit of work queued to the in-process dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub operation: Operation,
    pub cluster_id: ClusterId,
    pub service_name: String,
    pub spec: Spec,
}
