//! Drives `ServiceInstance` objects on managed clusters towards the desired
//! state and waits for the remote controller to act on them.

mod cleanup;
mod client;
mod kubeconfig;
mod version;

pub use cleanup::InstanceCleaner;
pub use client::*;
pub use kubeconfig::*;
pub use version::*;

use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::crd::service_instance::{PHASE_UNINSTALL_FAILED, PHASE_UNINSTALLED, ServiceInstance};
use crate::errors::IntegratedServiceError;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "isvc-manager";

pub fn mark_managed(instance: &mut ServiceInstance) {
    instance
        .labels_mut()
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
}

pub fn is_managed(instance: &ServiceInstance) -> bool {
    instance
        .labels()
        .get(MANAGED_BY_LABEL)
        .is_some_and(|value| value == MANAGED_BY_VALUE)
}

fn ensure_managed(instance: &ServiceInstance) -> Result<(), IntegratedServiceError> {
    if is_managed(instance) {
        Ok(())
    } else {
        Err(IntegratedServiceError::NotManaged(instance.name_any()))
    }
}

/// Polls without a deadline. Callers bound it through the activity that
/// runs them.
pub(crate) async fn poll_until(
    client: &dyn ServiceInstanceClient,
    namespace: &str,
    name: &str,
    interval: Duration,
    ready: impl Fn(&ServiceInstance) -> bool,
) -> Result<ServiceInstance, IntegratedServiceError> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match client.get(namespace, name).await? {
            Some(instance) if ready(&instance) => return Ok(instance),
            Some(instance) => {
                debug!(%namespace, %name, phase = ?instance.phase(), "waiting for service instance")
            }
            None => debug!(%namespace, %name, "service instance not visible yet"),
        }
    }
}

/// Waits for the controller to finish uninstalling. An instance that is gone
/// counts as uninstalled.
pub(crate) async fn wait_uninstalled(
    client: &dyn ServiceInstanceClient,
    namespace: &str,
    name: &str,
    interval: Duration,
) -> Result<(), IntegratedServiceError> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(instance) = client.get(namespace, name).await? else {
            debug!(%namespace, %name, "service instance removed");
            return Ok(());
        };
        match instance.phase() {
            Some(PHASE_UNINSTALLED) => return Ok(()),
            Some(PHASE_UNINSTALL_FAILED) => {
                return Err(IntegratedServiceError::Internal(format!(
                    "uninstalling {namespace}/{name} failed"
                )));
            }
            phase => debug!(%namespace, %name, ?phase, "waiting for uninstall"),
        }
    }
}

pub struct Reconciler {
    clients: Arc<dyn ClusterClientFactory>,
    poll_interval: Duration,
    wait_for_uninstall: bool,
}

impl Reconciler {
    pub fn new(
        clients: Arc<dyn ClusterClientFactory>,
        poll_interval: Duration,
        wait_for_uninstall: bool,
    ) -> Self {
        Self {
            clients,
            poll_interval,
            wait_for_uninstall,
        }
    }

    /// Create the instance if needed and push the desired fields onto it.
    #[instrument(skip_all, fields(instance = %desired.name_any()))]
    pub async fn reconcile(
        &self,
        kube_config: &str,
        mut desired: ServiceInstance,
    ) -> Result<(), IntegratedServiceError> {
        let client = self.clients.client(kube_config).await?;
        let (namespace, name) = instance_key(&desired)?;
        mark_managed(&mut desired);

        let mut existing = if client.create_if_not_exists(&desired).await? {
            info!(%namespace, %name, "service instance created, waiting for the controller");
            poll_until(client.as_ref(), &namespace, &name, self.poll_interval, |i| {
                i.has_available_versions()
            })
            .await?
        } else {
            client.get(&namespace, &name).await?.ok_or_else(|| {
                IntegratedServiceError::Internal(format!(
                    "service instance {namespace}/{name} disappeared"
                ))
            })?
        };
        ensure_managed(&existing)?;

        existing.spec.enabled = Some(desired.spec.enabled.unwrap_or(true));
        existing.spec.version = match desired.spec.version.filter(|v| !v.is_empty()) {
            Some(version) => Some(version),
            None => {
                let selection = latest_version(&existing)?;
                if !selection.invalid.is_empty() {
                    warn!(%namespace, %name, invalid = ?selection.invalid, "ignoring unparsable versions");
                }
                Some(selection.latest)
            }
        };
        existing.spec.service_spec = desired.spec.service_spec;

        client.update(&existing).await?;
        info!(%namespace, %name, version = ?existing.spec.version, "service instance reconciled");
        Ok(())
    }

    /// Switch the instance off. Missing instances are already off.
    #[instrument(skip_all, fields(instance = %desired.name_any()))]
    pub async fn disable(
        &self,
        kube_config: &str,
        desired: ServiceInstance,
    ) -> Result<(), IntegratedServiceError> {
        let client = self.clients.client(kube_config).await?;
        let (namespace, name) = instance_key(&desired)?;

        let Some(mut existing) = client.get(&namespace, &name).await? else {
            debug!(%namespace, %name, "nothing to disable");
            return Ok(());
        };
        ensure_managed(&existing)?;

        existing.spec.enabled = Some(false);
        client.update(&existing).await?;
        info!(%namespace, %name, "service instance disabled");

        if self.wait_for_uninstall {
            wait_uninstalled(client.as_ref(), &namespace, &name, self.poll_interval).await?;
        }
        Ok(())
    }
}
