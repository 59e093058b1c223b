use async_trait::async_trait;
use flume::TrySendError;
use isvc_models::{ClusterId, IntegratedServiceStatus, Operation, Spec};
use isvc_storage::IntegratedServiceRepository;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Job, OperationDispatcher};
use crate::errors::IntegratedServiceError;
use crate::registry::OperatorRegistry;

/// Development dispatcher: one worker drains a bounded FIFO shared by every
/// cluster and service.
pub struct LocalDispatcher {
    queue: flume::Sender<Job>,
}

/// Consumer side of [`LocalDispatcher`]. Stops at the first failed job.
pub struct LocalWorker {
    queue: flume::Receiver<Job>,
    operators: Arc<OperatorRegistry>,
    repository: Option<Arc<dyn IntegratedServiceRepository>>,
}

impl LocalDispatcher {
    /// Without a repository the worker only calls operators, which is what
    /// the instance-backed services need.
    pub fn new(
        capacity: usize,
        operators: Arc<OperatorRegistry>,
        repository: Option<Arc<dyn IntegratedServiceRepository>>,
    ) -> (Self, LocalWorker) {
        let (tx, rx) = flume::bounded(capacity);
        (
            Self { queue: tx },
            LocalWorker {
                queue: rx,
                operators,
                repository,
            },
        )
    }

    fn enqueue(&self, job: Job) -> Result<(), IntegratedServiceError> {
        match self.queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(
                    cluster_id = job.cluster_id,
                    service = %job.service_name,
                    operation = %job.operation,
                    "dispatch queue is full"
                );
                Err(IntegratedServiceError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(IntegratedServiceError::DispatcherStopped),
        }
    }
}

#[async_trait]
impl OperationDispatcher for LocalDispatcher {
    async fn dispatch_apply(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.enqueue(Job {
            operation: Operation::Apply,
            cluster_id,
            service_name: service_name.to_string(),
            spec,
        })
    }

    async fn dispatch_deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        self.enqueue(Job {
            operation: Operation::Deactivate,
            cluster_id,
            service_name: service_name.to_string(),
            spec,
        })
    }

    async fn is_being_dispatched(
        &self,
        _cluster_id: ClusterId,
        _service_name: &str,
    ) -> Result<bool, IntegratedServiceError> {
        Ok(false)
    }
}

impl LocalWorker {
    pub fn spawn(self) -> JoinHandle<Result<(), IntegratedServiceError>> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> Result<(), IntegratedServiceError> {
        info!("local dispatcher worker started");
        while let Ok(job) = self.queue.recv_async().await {
            if let Err(e) = self.process(&job).await {
                error!(
                    cluster_id = job.cluster_id,
                    service = %job.service_name,
                    operation = %job.operation,
                    error = %e,
                    "job failed, stopping local dispatcher worker"
                );
                self.record_failure(&job).await;
                return Err(e);
            }
        }
        info!("local dispatcher closed, worker exiting");
        Ok(())
    }

    async fn process(&self, job: &Job) -> Result<(), IntegratedServiceError> {
        let operator = self.operators.operator(&job.service_name)?;
        match job.operation {
            Operation::Apply => {
                operator.apply(job.cluster_id, &job.spec).await?;
                if let Some(repository) = &self.repository {
                    repository
                        .update_status(
                            job.cluster_id,
                            &job.service_name,
                            IntegratedServiceStatus::Active,
                        )
                        .await?;
                }
            }
            Operation::Deactivate => {
                operator.deactivate(job.cluster_id, &job.spec).await?;
                if let Some(repository) = &self.repository {
                    repository.delete(job.cluster_id, &job.service_name).await?;
                }
            }
        }
        info!(
            cluster_id = job.cluster_id,
            service = %job.service_name,
            operation = %job.operation,
            "job finished"
        );
        Ok(())
    }

    async fn record_failure(&self, job: &Job) {
        let Some(repository) = &self.repository else {
            return;
        };
        if let Err(e) = repository
            .update_status(
                job.cluster_id,
                &job.service_name,
                IntegratedServiceStatus::Error,
            )
            .await
        {
            error!(
                cluster_id = job.cluster_id,
                service = %job.service_name,
                error = %e,
                "failed to record job failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IntegratedServiceOperator;
    use isvc_storage::{IntegratedServiceReader, MemoryIntegratedServiceRepository};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        calls: Mutex<Vec<(Operation, ClusterId)>>,
    }

    #[async_trait]
    impl IntegratedServiceOperator for Scripted {
        fn name(&self) -> &str {
            "dns"
        }

        async fn apply(&self, cluster_id: ClusterId, spec: &Spec) -> Result<(), IntegratedServiceError> {
            self.calls.lock().unwrap().push((Operation::Apply, cluster_id));
            if spec.contains_key("broken") {
                return Err(IntegratedServiceError::Internal("broken chart".into()));
            }
            Ok(())
        }

        async fn deactivate(&self, cluster_id: ClusterId, _: &Spec) -> Result<(), IntegratedServiceError> {
            self.calls.lock().unwrap().push((Operation::Deactivate, cluster_id));
            Ok(())
        }
    }

    fn operators(op: Arc<Scripted>) -> Arc<OperatorRegistry> {
        Arc::new(OperatorRegistry::new([op as Arc<dyn IntegratedServiceOperator>]))
    }

    #[tokio::test]
    async fn full_queue_fails_immediately() {
        let (dispatcher, _worker) =
            LocalDispatcher::new(1, operators(Arc::default()), None);

        dispatcher.dispatch_apply(1, "dns", Spec::new()).await.unwrap();
        let err = dispatcher
            .dispatch_apply(2, "dns", Spec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegratedServiceError::QueueFull));
        assert!(!dispatcher.is_being_dispatched(1, "dns").await.unwrap());
    }

    #[tokio::test]
    async fn worker_records_outcomes_in_the_repository() {
        let repo = MemoryIntegratedServiceRepository::new();
        repo.save(1, "dns", Spec::new(), IntegratedServiceStatus::Pending)
            .await
            .unwrap();
        repo.save(2, "dns", Spec::new(), IntegratedServiceStatus::Pending)
            .await
            .unwrap();
        let op = Arc::new(Scripted::default());
        let (dispatcher, worker) =
            LocalDispatcher::new(8, operators(op.clone()), Some(Arc::new(repo.clone())));

        dispatcher.dispatch_apply(1, "dns", Spec::new()).await.unwrap();
        dispatcher.dispatch_deactivate(2, "dns", Spec::new()).await.unwrap();
        drop(dispatcher);
        worker.run().await.unwrap();

        assert_eq!(
            repo.get(1, "dns").await.unwrap().status,
            IntegratedServiceStatus::Active
        );
        assert!(repo.get(2, "dns").await.unwrap_err().is_not_found());
        assert_eq!(
            *op.calls.lock().unwrap(),
            vec![(Operation::Apply, 1), (Operation::Deactivate, 2)]
        );
    }

    #[tokio::test]
    async fn failed_job_marks_error_and_stops_the_worker() {
        let repo = MemoryIntegratedServiceRepository::new();
        repo.save(1, "dns", Spec::new(), IntegratedServiceStatus::Pending)
            .await
            .unwrap();
        let op = Arc::new(Scripted::default());
        let (dispatcher, worker) =
            LocalDispatcher::new(8, operators(op.clone()), Some(Arc::new(repo.clone())));
        let mut broken = Spec::new();
        broken.insert("broken".into(), json!(true));

        dispatcher.dispatch_apply(1, "dns", broken).await.unwrap();
        dispatcher.dispatch_apply(1, "dns", Spec::new()).await.unwrap();
        let outcome = worker.spawn().await.unwrap();

        assert!(matches!(outcome, Err(IntegratedServiceError::Internal(_))));
        assert_eq!(
            repo.get(1, "dns").await.unwrap().status,
            IntegratedServiceStatus::Error
        );
        // the second job was never picked up
        assert_eq!(op.calls.lock().unwrap().len(), 1);
        let err = dispatcher
            .dispatch_apply(1, "dns", Spec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegratedServiceError::DispatcherStopped));
    }
}
