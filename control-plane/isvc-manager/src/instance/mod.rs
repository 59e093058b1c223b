//! Integrated services whose whole state is one `ServiceInstance` per
//! cluster, named after the service.

use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, IntegratedServiceStatus, Output, Spec};
use isvc_storage::{IntegratedServiceReader, StorageError, StorageResult};
use kube::ResourceExt;
use serde_json::Value;
use std::sync::Arc;

use crate::crd::service_instance::{
    PHASE_INSTALL_FAILED, PHASE_INSTALLED, PHASE_UNINSTALL_FAILED, PHASE_UNINSTALLED,
    ServiceInstance, ServiceInstanceSpec,
};
use crate::errors::IntegratedServiceError;
use crate::reconciler::{
    ClusterClientFactory, KubeConfigSource, Reconciler, is_managed, parse_version,
};
use crate::registry::{IntegratedServiceManager, IntegratedServiceOperator};

const ENABLED_KEY: &str = "enabled";
const VERSION_KEY: &str = "version";

/// Builds the desired object for `service_name` from an opaque spec.
/// `enabled` and `version` map onto the typed fields, the rest is passed on.
pub fn desired_instance(namespace: &str, service_name: &str, spec: &Spec) -> ServiceInstance {
    let service_spec: std::collections::BTreeMap<String, Value> = spec
        .iter()
        .filter(|(key, _)| key.as_str() != ENABLED_KEY && key.as_str() != VERSION_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let mut instance = ServiceInstance::new(
        service_name,
        ServiceInstanceSpec {
            enabled: spec.get(ENABLED_KEY).and_then(Value::as_bool),
            version: spec
                .get(VERSION_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            service_spec: (!service_spec.is_empty()).then_some(service_spec),
        },
    );
    instance.metadata.namespace = Some(namespace.to_string());
    instance
}

pub fn status_of(instance: &ServiceInstance) -> IntegratedServiceStatus {
    match instance.phase() {
        Some(PHASE_INSTALL_FAILED) | Some(PHASE_UNINSTALL_FAILED) => IntegratedServiceStatus::Error,
        _ if !instance.spec.enabled.unwrap_or(true) => IntegratedServiceStatus::Inactive,
        Some(PHASE_UNINSTALLED) => IntegratedServiceStatus::Inactive,
        Some(PHASE_INSTALLED) => IntegratedServiceStatus::Active,
        _ => IntegratedServiceStatus::Pending,
    }
}

fn spec_of(instance: &ServiceInstance) -> Spec {
    let mut spec: Spec = instance
        .spec
        .service_spec
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    if let Some(enabled) = instance.spec.enabled {
        spec.insert(ENABLED_KEY.to_string(), Value::Bool(enabled));
    }
    if let Some(version) = &instance.spec.version {
        spec.insert(VERSION_KEY.to_string(), Value::String(version.clone()));
    }
    spec
}

/// Reads `ServiceInstance` objects straight from the clusters.
pub struct InstanceRepository {
    namespace: String,
    kubeconfigs: Arc<dyn KubeConfigSource>,
    clients: Arc<dyn ClusterClientFactory>,
}

impl InstanceRepository {
    pub fn new(
        namespace: impl Into<String>,
        kubeconfigs: Arc<dyn KubeConfigSource>,
        clients: Arc<dyn ClusterClientFactory>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kubeconfigs,
            clients,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `None` when the object does not exist or the cluster is not
    /// reachable yet.
    pub async fn instance(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<Option<ServiceInstance>, IntegratedServiceError> {
        let kube_config = match self.kubeconfigs.kube_config(cluster_id).await {
            Ok(config) => config,
            Err(IntegratedServiceError::ClusterNotReady(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let client = self.clients.client(&kube_config).await?;
        client.get(&self.namespace, service_name).await
    }

    async fn instances(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<ServiceInstance>, IntegratedServiceError> {
        let kube_config = match self.kubeconfigs.kube_config(cluster_id).await {
            Ok(config) => config,
            Err(IntegratedServiceError::ClusterNotReady(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let client = self.clients.client(&kube_config).await?;
        Ok(client
            .list()
            .await?
            .into_iter()
            .filter(|i| i.namespace().as_deref() == Some(self.namespace.as_str()))
            .filter(is_managed)
            .collect())
    }

    fn to_service(instance: &ServiceInstance) -> IntegratedService {
        IntegratedService::new(instance.name_any(), spec_of(instance), status_of(instance))
    }
}

fn backend(e: IntegratedServiceError) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl IntegratedServiceReader for InstanceRepository {
    async fn get(
        &self,
        cluster_id: ClusterId,
        service: &str,
    ) -> StorageResult<IntegratedService> {
        match self.instance(cluster_id, service).await.map_err(backend)? {
            Some(instance) => Ok(Self::to_service(&instance)),
            None => Err(StorageError::not_found(cluster_id, service)),
        }
    }

    async fn list(&self, cluster_id: ClusterId) -> StorageResult<Vec<IntegratedService>> {
        Ok(self
            .instances(cluster_id)
            .await
            .map_err(backend)?
            .iter()
            .map(Self::to_service)
            .collect())
    }
}

pub struct InstanceManager {
    service_name: String,
    instances: Arc<InstanceRepository>,
}

impl InstanceManager {
    pub fn new(service_name: impl Into<String>, instances: Arc<InstanceRepository>) -> Self {
        Self {
            service_name: service_name.into(),
            instances,
        }
    }
}

#[async_trait]
impl IntegratedServiceManager for InstanceManager {
    fn name(&self) -> &str {
        &self.service_name
    }

    async fn validate_spec(&self, spec: &Spec) -> Result<(), IntegratedServiceError> {
        match spec.get(VERSION_KEY) {
            None | Some(Value::Null) => {}
            Some(Value::String(version)) => {
                parse_version(version).map_err(|e| {
                    IntegratedServiceError::invalid_spec(
                        &self.service_name,
                        format!("version {version:?} is not a semantic version: {e}"),
                    )
                })?;
            }
            Some(other) => {
                return Err(IntegratedServiceError::invalid_spec(
                    &self.service_name,
                    format!("version must be a string, got {other}"),
                ));
            }
        }
        match spec.get(ENABLED_KEY) {
            None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(()),
            Some(other) => Err(IntegratedServiceError::invalid_spec(
                &self.service_name,
                format!("enabled must be a boolean, got {other}"),
            )),
        }
    }

    async fn prepare_spec(
        &self,
        _cluster_id: ClusterId,
        spec: Spec,
    ) -> Result<Spec, IntegratedServiceError> {
        Ok(spec)
    }

    async fn get_output(
        &self,
        cluster_id: ClusterId,
        _spec: &Spec,
    ) -> Result<Output, IntegratedServiceError> {
        let mut output = Output::new();
        let Some(instance) = self.instances.instance(cluster_id, &self.service_name).await? else {
            return Ok(output);
        };
        if let Some(status) = &instance.status {
            if let Some(version) = &status.version {
                output.insert(VERSION_KEY.to_string(), Value::String(version.clone()));
            }
            if let Some(phase) = &status.phase {
                output.insert("phase".to_string(), Value::String(phase.clone()));
            }
        }
        Ok(output)
    }
}

pub struct InstanceOperator {
    service_name: String,
    namespace: String,
    kubeconfigs: Arc<dyn KubeConfigSource>,
    reconciler: Arc<Reconciler>,
}

impl InstanceOperator {
    pub fn new(
        service_name: impl Into<String>,
        namespace: impl Into<String>,
        kubeconfigs: Arc<dyn KubeConfigSource>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            namespace: namespace.into(),
            kubeconfigs,
            reconciler,
        }
    }
}

#[async_trait]
impl IntegratedServiceOperator for InstanceOperator {
    fn name(&self) -> &str {
        &self.service_name
    }

    async fn apply(&self, cluster_id: ClusterId, spec: &Spec) -> Result<(), IntegratedServiceError> {
        let kube_config = self.kubeconfigs.kube_config(cluster_id).await?;
        self.reconciler
            .reconcile(
                &kube_config,
                desired_instance(&self.namespace, &self.service_name, spec),
            )
            .await
    }

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        spec: &Spec,
    ) -> Result<(), IntegratedServiceError> {
        let kube_config = self.kubeconfigs.kube_config(cluster_id).await?;
        self.reconciler
            .disable(
                &kube_config,
                desired_instance(&self.namespace, &self.service_name, spec),
            )
            .await
    }
}
