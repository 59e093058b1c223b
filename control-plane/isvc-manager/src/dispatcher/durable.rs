use async_trait::async_trait;
use isvc_models::{ClusterId, Operation, Spec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::OperationDispatcher;
use crate::errors::IntegratedServiceError;
use crate::workflow::{
    JOB_SIGNAL_NAME, JobSignal, JobWorkflowInput, SignalWithStartRequest, StartOptions,
    WorkflowEngine, WorkflowError,
};

/// Production dispatcher: every dispatch signals the job workflow of its
/// (cluster, service) key, starting the execution if none is open.
pub struct WorkflowDispatcher {
    engine: Arc<dyn WorkflowEngine>,
    workflow_name: String,
    retry_interval: Duration,
    start_options: StartOptions,
}

impl WorkflowDispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        workflow_name: impl Into<String>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            engine,
            workflow_name: workflow_name.into(),
            retry_interval,
            start_options: StartOptions::default(),
        }
    }

    pub fn with_start_options(mut self, options: StartOptions) -> Self {
        self.start_options = options;
        self
    }

    pub fn workflow_id(&self, cluster_id: ClusterId, service_name: &str) -> String {
        format!("{}-{}-{}", self.workflow_name, cluster_id, service_name)
    }

    async fn dispatch(
        &self,
        operation: Operation,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let workflow_id = self.workflow_id(cluster_id, service_name);
        let signal = JobSignal {
            operation,
            spec,
            retry_interval: self.retry_interval,
        };
        let input = JobWorkflowInput {
            cluster_id,
            service_name: service_name.to_string(),
        };
        self.engine
            .signal_with_start(SignalWithStartRequest {
                workflow_id: workflow_id.clone(),
                signal_name: JOB_SIGNAL_NAME.to_string(),
                signal: serde_json::to_value(signal).map_err(WorkflowError::from)?,
                options: self.start_options.clone(),
                workflow_type: self.workflow_name.clone(),
                input: serde_json::to_value(input).map_err(WorkflowError::from)?,
            })
            .await?;
        info!(%workflow_id, %operation, "operation dispatched");
        Ok(())
    }
}

#[async_trait]
impl OperationDispatcher for WorkflowDispatcher {
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.dispatch(Operation::Apply, cluster_id, service_name, spec)
            .await
    }

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.dispatch(Operation::Deactivate, cluster_id, service_name, spec)
            .await
    }

    async fn is_being_dispatched(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<bool, IntegratedServiceError> {
        let workflow_id = self.workflow_id(cluster_id, service_name);
        match self.engine.describe_execution(&workflow_id).await {
            Ok(info) => Ok(info.is_open()),
            Err(WorkflowError::NotFound(_)) => {
                debug!(%workflow_id, "no execution recorded");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ExecutionInfo, ExecutionStatus};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        requests: Mutex<Vec<SignalWithStartRequest>>,
        open: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl WorkflowEngine for RecordingEngine {
        async fn signal_with_start(
            &self,
            request: SignalWithStartRequest,
        ) -> Result<(), WorkflowError> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        async fn describe_execution(
            &self,
            workflow_id: &str,
        ) -> Result<ExecutionInfo, WorkflowError> {
            match *self.open.lock().unwrap() {
                None => Err(WorkflowError::NotFound(workflow_id.to_string())),
                Some(open) => Ok(ExecutionInfo {
                    workflow_id: workflow_id.to_string(),
                    workflow_type: "job".into(),
                    started_at: Utc::now(),
                    closed_at: (!open).then(Utc::now),
                    status: if open {
                        ExecutionStatus::Running
                    } else {
                        ExecutionStatus::Completed
                    },
                }),
            }
        }
    }

    #[tokio::test]
    async fn dispatch_signals_the_keyed_workflow() {
        let engine = Arc::new(RecordingEngine::default());
        let dispatcher =
            WorkflowDispatcher::new(engine.clone(), "job", Duration::from_secs(30));
        let mut spec = Spec::new();
        spec.insert("version".into(), "1.2.0".into());

        dispatcher.dispatch_apply(3, "dns", spec.clone()).await.unwrap();
        dispatcher.dispatch_deactivate(3, "dns", spec.clone()).await.unwrap();

        let requests = engine.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].workflow_id, "job-3-dns");
        assert_eq!(requests[0].workflow_type, "job");
        assert_eq!(requests[0].signal_name, JOB_SIGNAL_NAME);
        let signal: JobSignal = serde_json::from_value(requests[1].signal.clone()).unwrap();
        assert_eq!(signal.operation, Operation::Deactivate);
        assert_eq!(signal.spec, spec);
        assert_eq!(signal.retry_interval, Duration::from_secs(30));
        let input: JobWorkflowInput = serde_json::from_value(requests[0].input.clone()).unwrap();
        assert_eq!(input.cluster_id, 3);
        assert_eq!(input.service_name, "dns");
    }

    #[tokio::test]
    async fn dispatch_state_follows_the_execution() {
        let engine = Arc::new(RecordingEngine::default());
        let dispatcher =
            WorkflowDispatcher::new(engine.clone(), "job", Duration::from_secs(30));

        assert!(!dispatcher.is_being_dispatched(1, "dns").await.unwrap());
        *engine.open.lock().unwrap() = Some(true);
        assert!(dispatcher.is_being_dispatched(1, "dns").await.unwrap());
        *engine.open.lock().unwrap() = Some(false);
        assert!(!dispatcher.is_being_dispatched(1, "dns").await.unwrap());
    }
}
