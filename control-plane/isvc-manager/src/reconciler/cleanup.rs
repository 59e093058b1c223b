use futures_util::future::join_all;
use isvc_models::ClusterId;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{
    ClusterClientFactory, KubeConfigSource, ServiceInstanceClient, instance_key, is_managed,
    wait_uninstalled,
};
use crate::crd::service_instance::ServiceInstance;
use crate::errors::IntegratedServiceError;

/// Switches every instance on a cluster off ahead of cluster teardown.
pub struct InstanceCleaner {
    kubeconfigs: Arc<dyn KubeConfigSource>,
    clients: Arc<dyn ClusterClientFactory>,
    poll_interval: Duration,
}

impl InstanceCleaner {
    pub fn new(
        kubeconfigs: Arc<dyn KubeConfigSource>,
        clients: Arc<dyn ClusterClientFactory>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kubeconfigs,
            clients,
            poll_interval,
        }
    }

    /// Failures are collected per instance; one stuck instance does not stop
    /// the others from being disabled.
    #[instrument(skip(self))]
    pub async fn disable_service_instances(
        &self,
        cluster_id: ClusterId,
    ) -> Result<(), IntegratedServiceError> {
        let kube_config = self.kubeconfigs.kube_config(cluster_id).await?;
        let client = self.clients.client(&kube_config).await?;
        let instances = client.list().await?;
        info!(cluster_id, count = instances.len(), "disabling service instances");

        let mut errors = Vec::new();
        let mut pending = Vec::new();
        for mut instance in instances {
            if !is_managed(&instance) {
                warn!(cluster_id, instance = %instance.name_any(), "skipping instance not managed here");
                continue;
            }
            if instance.spec.enabled != Some(false) {
                instance.spec.enabled = Some(false);
                if let Err(e) = client.update(&instance).await {
                    errors.push(e);
                    continue;
                }
            }
            pending.push(instance);
        }

        let outcomes = join_all(
            pending
                .iter()
                .map(|instance| self.wait_for(client.as_ref(), instance)),
        )
        .await;
        errors.extend(outcomes.into_iter().filter_map(Result::err));

        if errors.is_empty() {
            Ok(())
        } else {
            warn!(cluster_id, failures = errors.len(), "some service instances failed to uninstall");
            Err(IntegratedServiceError::Aggregate(errors))
        }
    }

    async fn wait_for(
        &self,
        client: &dyn ServiceInstanceClient,
        instance: &ServiceInstance,
    ) -> Result<(), IntegratedServiceError> {
        let (namespace, name) = instance_key(instance)?;
        wait_uninstalled(client, &namespace, &name, self.poll_interval).await
    }
}
