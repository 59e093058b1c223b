use async_trait::async_trait;
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::crd::service_instance::{
    PHASE_INSTALLED, PHASE_UNINSTALLED, ServiceInstance, ServiceInstanceStatus,
};
use crate::errors::IntegratedServiceError;

/// Access to `ServiceInstance` objects on one cluster.
#[async_trait]
pub trait ServiceInstanceClient: Send + Sync {
    /// Returns `true` when the object was created, `false` when it already
    /// existed.
    async fn create_if_not_exists(
        &self,
        instance: &ServiceInstance,
    ) -> Result<bool, IntegratedServiceError>;

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInstance>, IntegratedServiceError>;

    async fn update(&self, instance: &ServiceInstance) -> Result<(), IntegratedServiceError>;

    /// Every instance on the cluster, across namespaces.
    async fn list(&self) -> Result<Vec<ServiceInstance>, IntegratedServiceError>;
}

#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    async fn client(
        &self,
        kube_config: &str,
    ) -> Result<Arc<dyn ServiceInstanceClient>, IntegratedServiceError>;
}

pub(crate) fn instance_key(
    instance: &ServiceInstance,
) -> Result<(String, String), IntegratedServiceError> {
    let namespace = instance.namespace().ok_or_else(|| {
        IntegratedServiceError::Internal(format!(
            "service instance {} has no namespace",
            instance.name_any()
        ))
    })?;
    Ok((namespace, instance.name_any()))
}

fn api_error_code(e: &kube::Error) -> Option<u16> {
    match e {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

pub struct KubeServiceInstanceClient {
    client: Client,
}

impl KubeServiceInstanceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ServiceInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ServiceInstanceClient for KubeServiceInstanceClient {
    async fn create_if_not_exists(
        &self,
        instance: &ServiceInstance,
    ) -> Result<bool, IntegratedServiceError> {
        let (namespace, name) = instance_key(instance)?;
        match self
            .api(&namespace)
            .create(&PostParams::default(), instance)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if api_error_code(&e) == Some(409) => {
                debug!(%namespace, %name, "service instance already exists");
                Ok(false)
            }
            Err(e) if api_error_code(&e) == Some(404) => {
                Err(IntegratedServiceError::OperatorNotAvailable(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInstance>, IntegratedServiceError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn update(&self, instance: &ServiceInstance) -> Result<(), IntegratedServiceError> {
        let (namespace, name) = instance_key(instance)?;
        self.api(&namespace)
            .replace(&name, &PostParams::default(), instance)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ServiceInstance>, IntegratedServiceError> {
        let api: Api<ServiceInstance> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if api_error_code(&e) == Some(404) => {
                Err(IntegratedServiceError::OperatorNotAvailable(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds kube-rs clients from kubeconfig documents.
#[derive(Default)]
pub struct KubeClusterClientFactory;

#[async_trait]
impl ClusterClientFactory for KubeClusterClientFactory {
    async fn client(
        &self,
        kube_config: &str,
    ) -> Result<Arc<dyn ServiceInstanceClient>, IntegratedServiceError> {
        let kubeconfig = Kubeconfig::from_yaml(kube_config)
            .map_err(|e| IntegratedServiceError::KubeConfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| IntegratedServiceError::KubeConfig(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeServiceInstanceClient::new(client)))
    }
}

type InstanceStore = BTreeMap<(String, String), ServiceInstance>;

/// In-memory cluster. Optionally plays the remote controller: new objects get
/// `available_versions`, updates settle straight into `Installed` or
/// `Uninstalled`.
#[derive(Default)]
pub struct MemoryServiceInstanceClient {
    objects: RwLock<InstanceStore>,
    controller_versions: Option<Vec<String>>,
    updates: AtomicUsize,
}

impl MemoryServiceInstanceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_simulated_controller(versions: Vec<String>) -> Self {
        Self {
            controller_versions: Some(versions),
            ..Self::default()
        }
    }

    /// Put an object in place as if someone else created it.
    pub async fn insert(&self, instance: ServiceInstance) -> Result<(), IntegratedServiceError> {
        let key = instance_key(&instance)?;
        self.objects.write().await.insert(key, instance);
        Ok(())
    }

    /// Overwrite the status, as the remote controller would.
    pub async fn set_status(&self, namespace: &str, name: &str, status: ServiceInstanceStatus) {
        if let Some(instance) = self
            .objects
            .write()
            .await
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            instance.status = Some(status);
        }
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn settle(&self, instance: &mut ServiceInstance) {
        if self.controller_versions.is_none() {
            return;
        }
        let status = instance.status.get_or_insert_with(Default::default);
        if instance.spec.enabled.unwrap_or(false) {
            status.phase = Some(PHASE_INSTALLED.to_string());
            status.version = instance.spec.version.clone();
        } else {
            status.phase = Some(PHASE_UNINSTALLED.to_string());
        }
    }
}

#[async_trait]
impl ServiceInstanceClient for MemoryServiceInstanceClient {
    async fn create_if_not_exists(
        &self,
        instance: &ServiceInstance,
    ) -> Result<bool, IntegratedServiceError> {
        let key = instance_key(instance)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Ok(false);
        }
        let mut created = instance.clone();
        if let Some(versions) = &self.controller_versions {
            let available: BTreeMap<String, Value> = versions
                .iter()
                .map(|v| (v.clone(), Value::Object(Default::default())))
                .collect();
            created.status = Some(ServiceInstanceStatus {
                available_versions: Some(available),
                ..Default::default()
            });
        }
        objects.insert(key, created);
        Ok(true)
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInstance>, IntegratedServiceError> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update(&self, instance: &ServiceInstance) -> Result<(), IntegratedServiceError> {
        let key = instance_key(instance)?;
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&key) else {
            return Err(IntegratedServiceError::Internal(format!(
                "service instance {}/{} does not exist",
                key.0, key.1
            )));
        };
        stored.metadata = instance.metadata.clone();
        stored.spec = instance.spec.clone();
        self.settle(stored);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ServiceInstance>, IntegratedServiceError> {
        Ok(self.objects.read().await.values().cloned().collect())
    }
}

/// One in-memory cluster per kubeconfig document.
#[derive(Default)]
pub struct MemoryClusterClientFactory {
    clusters: RwLock<HashMap<String, Arc<MemoryServiceInstanceClient>>>,
    controller_versions: Option<Vec<String>>,
}

impl MemoryClusterClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_simulated_controller(versions: Vec<String>) -> Self {
        Self {
            controller_versions: Some(versions),
            ..Self::default()
        }
    }

    pub async fn cluster(&self, kube_config: &str) -> Arc<MemoryServiceInstanceClient> {
        let mut clusters = self.clusters.write().await;
        clusters
            .entry(kube_config.to_string())
            .or_insert_with(|| {
                Arc::new(match &self.controller_versions {
                    Some(versions) => {
                        MemoryServiceInstanceClient::with_simulated_controller(versions.clone())
                    }
                    None => MemoryServiceInstanceClient::new(),
                })
            })
            .clone()
    }
}

#[async_trait]
impl ClusterClientFactory for MemoryClusterClientFactory {
    async fn client(
        &self,
        kube_config: &str,
    ) -> Result<Arc<dyn ServiceInstanceClient>, IntegratedServiceError> {
        Ok(self.cluster(kube_config).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::service_instance::ServiceInstanceSpec;

    fn instance(name: &str) -> ServiceInstance {
        let mut instance = ServiceInstance::new(name, ServiceInstanceSpec::default());
        instance.metadata.namespace = Some("integrated-services".into());
        instance
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let client = MemoryServiceInstanceClient::new();
        assert!(client.create_if_not_exists(&instance("dns")).await.unwrap());
        assert!(!client.create_if_not_exists(&instance("dns")).await.unwrap());
        assert_eq!(client.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn simulated_controller_settles_updates() {
        let client =
            MemoryServiceInstanceClient::with_simulated_controller(vec!["1.0.0".into()]);
        client.create_if_not_exists(&instance("dns")).await.unwrap();
        let mut stored = client
            .get("integrated-services", "dns")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.has_available_versions());

        stored.spec.enabled = Some(true);
        stored.spec.version = Some("1.0.0".into());
        client.update(&stored).await.unwrap();
        let stored = client
            .get("integrated-services", "dns")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.phase(), Some(PHASE_INSTALLED));
        assert_eq!(client.update_count(), 1);
    }

    #[tokio::test]
    async fn instances_without_namespace_are_rejected() {
        let client = MemoryServiceInstanceClient::new();
        let orphan = ServiceInstance::new("dns", ServiceInstanceSpec::default());
        assert!(client.create_if_not_exists(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn factory_hands_out_one_cluster_per_kubeconfig() {
        let factory = MemoryClusterClientFactory::new();
        factory
            .cluster("a")
            .await
            .insert(instance("dns"))
            .await
            .unwrap();
        assert_eq!(factory.client("a").await.unwrap().list().await.unwrap().len(), 1);
        assert!(factory.client("b").await.unwrap().list().await.unwrap().is_empty());
    }
}
