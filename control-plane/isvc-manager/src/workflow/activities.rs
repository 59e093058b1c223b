use isvc_models::{ClusterId, IntegratedServiceStatus, Operation, Spec};
use isvc_storage::IntegratedServiceRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ActivityContext;
use crate::errors::IntegratedServiceError;
use crate::registry::OperatorRegistry;

/// Input of the apply/deactivate activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub cluster_id: ClusterId,
    pub service_name: String,
    pub operation: Operation,
    pub spec: Spec,
    pub retry_interval: Duration,
}

pub struct JobActivities {
    operators: Arc<OperatorRegistry>,
    heartbeat_interval: Duration,
}

impl JobActivities {
    pub fn new(operators: Arc<OperatorRegistry>, heartbeat_interval: Duration) -> Self {
        Self {
            operators,
            heartbeat_interval,
        }
    }

    /// Run the operator until it succeeds, fails permanently or the activity
    /// is cancelled. Only retryable errors are retried, after
    /// `retry_interval`; the activity heartbeats throughout.
    pub async fn run_operation(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), IntegratedServiceError> {
        let operator = self.operators.operator(&request.service_name)?;
        let mut beat = tokio::time::interval(self.heartbeat_interval);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempt: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(IntegratedServiceError::Cancelled);
            }
            attempt += 1;
            debug!(
                cluster_id = request.cluster_id,
                service = %request.service_name,
                operation = %request.operation,
                attempt,
                "running operator"
            );
            let mut call = match request.operation {
                Operation::Apply => operator.apply(request.cluster_id, &request.spec),
                Operation::Deactivate => {
                    operator.deactivate(request.cluster_id, &request.spec)
                }
            };
            let result = loop {
                tokio::select! {
                    result = &mut call => break result,
                    _ = beat.tick() => ctx.heartbeat(),
                    _ = ctx.cancelled() => return Err(IntegratedServiceError::Cancelled),
                }
            };

            match result {
                Err(e) if e.should_retry() => {
                    warn!(
                        cluster_id = request.cluster_id,
                        service = %request.service_name,
                        attempt,
                        retry_in = ?request.retry_interval,
                        error = %e,
                        "operation cannot proceed yet, retrying"
                    );
                    let pause = tokio::time::sleep(request.retry_interval);
                    tokio::pin!(pause);
                    loop {
                        tokio::select! {
                            _ = &mut pause => break,
                            _ = beat.tick() => ctx.heartbeat(),
                            _ = ctx.cancelled() => return Err(IntegratedServiceError::Cancelled),
                        }
                    }
                }
                Ok(()) => {
                    info!(
                        cluster_id = request.cluster_id,
                        service = %request.service_name,
                        operation = %request.operation,
                        attempt,
                        "operation finished"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub async fn set_status_activity(
    repository: &dyn IntegratedServiceRepository,
    cluster_id: ClusterId,
    service_name: &str,
    status: IntegratedServiceStatus,
) -> Result<(), IntegratedServiceError> {
    repository
        .update_status(cluster_id, service_name, status)
        .await?;
    Ok(())
}

pub async fn delete_activity(
    repository: &dyn IntegratedServiceRepository,
    cluster_id: ClusterId,
    service_name: &str,
) -> Result<(), IntegratedServiceError> {
    repository.delete(cluster_id, service_name).await?;
    Ok(())
}
