use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedServiceStatus, Operation, Spec};
use isvc_storage::IntegratedServiceRepository;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{
    ActivityError, ActivityOptions, JobActivities, OperationRequest, SignalChannel,
    Workflow, WorkflowContext, WorkflowError, delete_activity, set_status_activity,
};

/// Name of the signal carrying a [`JobSignal`].
pub const JOB_SIGNAL_NAME: &str = "job";

/// Workflow type registered for the repository-backed services.
pub const LEGACY_JOB_WORKFLOW: &str = "integrated-service-job";
/// Workflow type registered for the instance-backed services.
pub const V2_JOB_WORKFLOW: &str = "integrated-service-job-v2";

pub const APPLY_ACTIVITY: &str = "integrated-service-apply";
pub const DEACTIVATE_ACTIVITY: &str = "integrated-service-deactivate";
pub const SET_STATUS_ACTIVITY: &str = "integrated-service-set-status";
pub const DELETE_ACTIVITY: &str = "integrated-service-delete";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWorkflowInput {
    pub cluster_id: ClusterId,
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSignal {
    pub operation: Operation,
    pub spec: Spec,
    pub retry_interval: Duration,
}

#[derive(Debug)]
enum JobState {
    AwaitingSignal,
    Executing(JobSignal),
    Succeeded,
    Failed(ActivityError),
}

enum Race {
    Finished(Result<(), ActivityError>),
    Preempted(Result<JobSignal, WorkflowError>),
}

enum JobVariant {
    /// Mirrors progress into the instance repository.
    Legacy(Arc<dyn IntegratedServiceRepository>),
    /// The cluster resources are the only record.
    V2,
}

/// One execution per (cluster, service): applies the newest requested
/// operation, preempting the one in flight when a new signal arrives.
pub struct JobWorkflow {
    variant: JobVariant,
    activities: Arc<JobActivities>,
    options: ActivityOptions,
}

impl JobWorkflow {
    pub fn legacy(
        activities: Arc<JobActivities>,
        repository: Arc<dyn IntegratedServiceRepository>,
        options: ActivityOptions,
    ) -> Self {
        Self {
            variant: JobVariant::Legacy(repository),
            activities,
            options,
        }
    }

    pub fn v2(activities: Arc<JobActivities>, options: ActivityOptions) -> Self {
        Self {
            variant: JobVariant::V2,
            activities,
            options,
        }
    }

    fn activity_name(&self, base: &str) -> String {
        match self.variant {
            JobVariant::Legacy(_) => base.to_string(),
            JobVariant::V2 => format!("{base}-v2"),
        }
    }

    async fn execute(
        &self,
        ctx: &WorkflowContext,
        input: &JobWorkflowInput,
        signals: &SignalChannel,
        signal: JobSignal,
    ) -> Result<JobState, WorkflowError> {
        info!(
            workflow_id = ctx.workflow_id(),
            operation = %signal.operation,
            "executing job"
        );
        self.record_status(ctx, input, IntegratedServiceStatus::Pending)
            .await?;

        let request = OperationRequest {
            cluster_id: input.cluster_id,
            service_name: input.service_name.clone(),
            operation: signal.operation,
            spec: signal.spec,
            retry_interval: signal.retry_interval,
        };
        let name = match signal.operation {
            Operation::Apply => self.activity_name(APPLY_ACTIVITY),
            Operation::Deactivate => self.activity_name(DEACTIVATE_ACTIVITY),
        };
        let activities = self.activities.clone();
        let mut handle = ctx.execute_activity(&name, &self.options, move |actx| async move {
            activities.run_operation(&actx, &request).await
        });

        let race = tokio::select! {
            outcome = handle.wait() => Race::Finished(outcome),
            next = signals.receive_latest::<JobSignal>() => Race::Preempted(next),
        };

        match race {
            Race::Finished(Ok(())) => {
                self.finish(ctx, input, signal.operation).await?;
                Ok(JobState::Succeeded)
            }
            Race::Finished(Err(e)) => {
                error!(workflow_id = ctx.workflow_id(), error = %e, "job operation failed");
                self.record_status(ctx, input, IntegratedServiceStatus::Error)
                    .await?;
                Ok(JobState::Failed(e))
            }
            Race::Preempted(next) => {
                let next = next?;
                warn!(
                    workflow_id = ctx.workflow_id(),
                    preempted_by = %next.operation,
                    "newer signal received, cancelling running operation"
                );
                handle.cancel();
                // the replacement starts only after the old one has wound down
                if let Err(e) = handle.wait().await {
                    info!(workflow_id = ctx.workflow_id(), outcome = %e, "preempted operation stopped");
                }
                Ok(JobState::Executing(next))
            }
        }
    }

    async fn record_status(
        &self,
        ctx: &WorkflowContext,
        input: &JobWorkflowInput,
        status: IntegratedServiceStatus,
    ) -> Result<(), WorkflowError> {
        let JobVariant::Legacy(repository) = &self.variant else {
            return Ok(());
        };
        let repository = repository.clone();
        let input = input.clone();
        let mut handle = ctx.execute_activity(
            &self.activity_name(SET_STATUS_ACTIVITY),
            &self.options,
            move |_| async move {
                set_status_activity(
                    repository.as_ref(),
                    input.cluster_id,
                    &input.service_name,
                    status,
                )
                .await
            },
        );
        handle.wait().await?;
        Ok(())
    }

    async fn finish(
        &self,
        ctx: &WorkflowContext,
        input: &JobWorkflowInput,
        operation: Operation,
    ) -> Result<(), WorkflowError> {
        match operation {
            Operation::Apply => {
                self.record_status(ctx, input, IntegratedServiceStatus::Active)
                    .await
            }
            Operation::Deactivate => {
                let JobVariant::Legacy(repository) = &self.variant else {
                    return Ok(());
                };
                let repository = repository.clone();
                let input = input.clone();
                let mut handle = ctx.execute_activity(
                    &self.activity_name(DELETE_ACTIVITY),
                    &self.options,
                    move |_| async move {
                        delete_activity(repository.as_ref(), input.cluster_id, &input.service_name)
                            .await
                    },
                );
                handle.wait().await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Workflow for JobWorkflow {
    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<(), WorkflowError> {
        let input: JobWorkflowInput = serde_json::from_value(input)?;
        let signals = ctx.signal_channel(JOB_SIGNAL_NAME);

        let mut state = JobState::AwaitingSignal;
        loop {
            state = match state {
                JobState::AwaitingSignal => JobState::Executing(signals.receive_latest().await?),
                JobState::Executing(signal) => {
                    self.execute(&ctx, &input, &signals, signal).await?
                }
                JobState::Succeeded => match signals.try_latest()? {
                    Some(next) => JobState::Executing(next),
                    None => {
                        info!(workflow_id = ctx.workflow_id(), "job completed");
                        return Ok(());
                    }
                },
                JobState::Failed(e) => return Err(e.into()),
            };
        }
    }
}
