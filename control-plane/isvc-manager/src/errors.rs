use isvc_models::ClusterId;
use isvc_storage::StorageError;
use thiserror::Error;

use crate::workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum IntegratedServiceError {
    #[error("unknown integrated service: {0}")]
    UnknownService(String),

    #[error("integrated service {service} not found on cluster {cluster_id}")]
    NotFound {
        cluster_id: ClusterId,
        service: String,
    },

    #[error("invalid spec for integrated service {service}: {problem}")]
    InvalidSpec { service: String, problem: String },

    #[error("integrated service {0} is already active")]
    AlreadyActive(String),

    #[error("service instance {0} is not managed by this control plane")]
    NotManaged(String),

    #[error("cluster {0} is not ready yet")]
    ClusterNotReady(ClusterId),

    #[error("integrated service operator is not available: {0}")]
    OperatorNotAvailable(String),

    #[error("dispatch queue is full")]
    QueueFull,

    #[error("dispatcher stopped")]
    DispatcherStopped,

    #[error("no valid versions available: {0}")]
    NoValidVersions(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    KubeConfig(String),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<IntegratedServiceError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[IntegratedServiceError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl IntegratedServiceError {
    pub fn invalid_spec(service: &str, problem: impl Into<String>) -> Self {
        IntegratedServiceError::InvalidSpec {
            service: service.to_string(),
            problem: problem.into(),
        }
    }

    pub fn not_found(cluster_id: ClusterId, service: &str) -> Self {
        IntegratedServiceError::NotFound {
            cluster_id,
            service: service.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            IntegratedServiceError::NotFound { .. } => true,
            IntegratedServiceError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_unknown_service(&self) -> bool {
        matches!(self, IntegratedServiceError::UnknownService(_))
    }

    /// The only kind the job activities retry on their own.
    pub fn should_retry(&self) -> bool {
        matches!(self, IntegratedServiceError::ClusterNotReady(_))
    }

    /// Errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IntegratedServiceError::UnknownService(_)
                | IntegratedServiceError::InvalidSpec { .. }
                | IntegratedServiceError::AlreadyActive(_)
                | IntegratedServiceError::NotManaged(_)
        ) || self.is_not_found()
    }
}
