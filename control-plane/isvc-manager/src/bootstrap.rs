use anyhow::Result;
use isvc_storage::{IntegratedServiceRepository, MemoryIntegratedServiceRepository};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    config::{AppConfig, ClusterBackend, DispatcherKind},
    dispatcher::{LocalDispatcher, LocalWorker, OperationDispatcher, WorkflowDispatcher},
    instance::{InstanceManager, InstanceOperator, InstanceRepository},
    reconciler::{
        ClusterClientFactory, DirectoryKubeConfigSource, InstanceCleaner, KubeClusterClientFactory,
        KubeConfigSource, MemoryClusterClientFactory, MemoryKubeConfigSource, Reconciler,
    },
    registry::{
        IntegratedServiceManager, IntegratedServiceOperator, ManagerRegistry, OperatorRegistry,
    },
    services::{LegacyService, ServiceRouter, V2Service},
    workflow::{JobActivities, JobWorkflow, LocalWorkflowEngine, StartOptions},
};

/// Versions the simulated controller offers on the in-memory backend.
const MEMORY_CONTROLLER_VERSIONS: &[&str] = &["1.0.0"];

/// Everything the transport layer needs, fully wired.
pub struct IntegratedServices {
    pub router: Arc<ServiceRouter>,
    pub cleaner: Arc<InstanceCleaner>,
    pub legacy_repository: Arc<MemoryIntegratedServiceRepository>,
    engine: Arc<LocalWorkflowEngine>,
    workers: Vec<JoinHandle<()>>,
}

impl IntegratedServices {
    pub fn shutdown(&self) {
        self.engine.shutdown();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

struct Generation {
    managers: Arc<ManagerRegistry>,
    operators: Arc<OperatorRegistry>,
}

fn generation(
    names: &[String],
    instances: &Arc<InstanceRepository>,
    namespace: &str,
    kubeconfigs: &Arc<dyn KubeConfigSource>,
    reconciler: &Arc<Reconciler>,
) -> Generation {
    let managers = names.iter().map(|name| {
        Arc::new(InstanceManager::new(name.clone(), instances.clone()))
            as Arc<dyn IntegratedServiceManager>
    });
    let operators = names.iter().map(|name| {
        Arc::new(InstanceOperator::new(
            name.clone(),
            namespace,
            kubeconfigs.clone(),
            reconciler.clone(),
        )) as Arc<dyn IntegratedServiceOperator>
    });
    Generation {
        managers: Arc::new(ManagerRegistry::new(managers)),
        operators: Arc::new(OperatorRegistry::new(operators)),
    }
}

fn spawn_worker(label: &'static str, worker: LocalWorker) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!(dispatcher = label, error = %e, "local dispatcher stopped, restart required");
        }
    })
}

/// Build the whole lifecycle stack from configuration.
pub async fn build_from_config(config: &AppConfig) -> Result<IntegratedServices> {
    let clusters = config.clusters();
    let dispatch = config.dispatch();
    let activities = config.activities();
    let services = config.services();

    let (clients, kubeconfigs): (Arc<dyn ClusterClientFactory>, Arc<dyn KubeConfigSource>) =
        match clusters.backend {
            ClusterBackend::Kube => (
                Arc::new(KubeClusterClientFactory),
                Arc::new(DirectoryKubeConfigSource::new(clusters.kubeconfig_dir.clone())),
            ),
            ClusterBackend::Memory => (
                Arc::new(MemoryClusterClientFactory::with_simulated_controller(
                    MEMORY_CONTROLLER_VERSIONS.iter().map(|v| v.to_string()).collect(),
                )),
                Arc::new(MemoryKubeConfigSource),
            ),
        };

    let instances = Arc::new(InstanceRepository::new(
        clusters.namespace.clone(),
        kubeconfigs.clone(),
        clients.clone(),
    ));
    let legacy_reconciler = Arc::new(Reconciler::new(clients.clone(), clusters.poll_interval, true));
    let v2_reconciler = Arc::new(Reconciler::new(clients.clone(), clusters.poll_interval, false));

    let legacy = generation(
        &services.legacy,
        &instances,
        &clusters.namespace,
        &kubeconfigs,
        &legacy_reconciler,
    );
    let v2 = generation(
        &services.v2,
        &instances,
        &clusters.namespace,
        &kubeconfigs,
        &v2_reconciler,
    );

    let legacy_repository = Arc::new(MemoryIntegratedServiceRepository::new());
    let repository: Arc<dyn IntegratedServiceRepository> = legacy_repository.clone();

    let mut engine = LocalWorkflowEngine::new(activities.max_concurrent);
    engine.register(
        &dispatch.legacy_workflow_name,
        Arc::new(JobWorkflow::legacy(
            Arc::new(JobActivities::new(legacy.operators.clone(), activities.heartbeat_interval)),
            repository.clone(),
            activities.options.clone(),
        )),
    );
    engine.register(
        &dispatch.v2_workflow_name,
        Arc::new(JobWorkflow::v2(
            Arc::new(JobActivities::new(v2.operators.clone(), activities.heartbeat_interval)),
            activities.options.clone(),
        )),
    );
    let engine = Arc::new(engine);

    let start_options = StartOptions {
        execution_timeout: dispatch.execution_timeout,
    };
    let mut workers = Vec::new();
    let (legacy_dispatcher, v2_dispatcher): (
        Arc<dyn OperationDispatcher>,
        Arc<dyn OperationDispatcher>,
    ) = match dispatch.kind {
        DispatcherKind::Workflow => (
            Arc::new(
                WorkflowDispatcher::new(
                    engine.clone(),
                    dispatch.legacy_workflow_name.clone(),
                    dispatch.retry_interval,
                )
                .with_start_options(start_options.clone()),
            ),
            Arc::new(
                WorkflowDispatcher::new(
                    engine.clone(),
                    dispatch.v2_workflow_name.clone(),
                    dispatch.retry_interval,
                )
                .with_start_options(start_options),
            ),
        ),
        DispatcherKind::Local => {
            let (legacy_local, legacy_worker) = LocalDispatcher::new(
                dispatch.local_queue_capacity,
                legacy.operators.clone(),
                Some(repository.clone()),
            );
            let (v2_local, v2_worker) =
                LocalDispatcher::new(dispatch.local_queue_capacity, v2.operators.clone(), None);
            workers.push(spawn_worker("legacy", legacy_worker));
            workers.push(spawn_worker("v2", v2_worker));
            (Arc::new(legacy_local), Arc::new(v2_local))
        }
    };

    let router = Arc::new(ServiceRouter::new(
        Arc::new(LegacyService::new(
            legacy.managers.clone(),
            legacy_dispatcher,
            repository,
        )),
        Arc::new(V2Service::new(v2.managers.clone(), v2_dispatcher, instances)),
    ));
    let cleaner = Arc::new(InstanceCleaner::new(kubeconfigs, clients, clusters.poll_interval));

    info!(
        dispatcher = ?dispatch.kind,
        backend = ?clusters.backend,
        legacy_services = ?services.legacy,
        v2_services = ?services.v2,
        "integrated service stack ready"
    );
    Ok(IntegratedServices {
        router,
        cleaner,
        legacy_repository,
        engine,
        workers,
    })
}
