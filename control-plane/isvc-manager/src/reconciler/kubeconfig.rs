use async_trait::async_trait;
use isvc_models::ClusterId;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::IntegratedServiceError;

/// Resolves the kubeconfig document of a managed cluster.
#[async_trait]
pub trait KubeConfigSource: Send + Sync {
    /// Fails with [`IntegratedServiceError::ClusterNotReady`] while the
    /// cluster has no kubeconfig yet.
    async fn kube_config(&self, cluster_id: ClusterId) -> Result<String, IntegratedServiceError>;
}

/// Reads `<dir>/<cluster_id>.yaml`.
pub struct DirectoryKubeConfigSource {
    dir: PathBuf,
}

impl DirectoryKubeConfigSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl KubeConfigSource for DirectoryKubeConfigSource {
    async fn kube_config(&self, cluster_id: ClusterId) -> Result<String, IntegratedServiceError> {
        let path = self.dir.join(format!("{cluster_id}.yaml"));
        match tokio::fs::read_to_string(&path).await {
            Ok(config) => Ok(config),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(cluster_id, path = %path.display(), "kubeconfig not present yet");
                Err(IntegratedServiceError::ClusterNotReady(cluster_id))
            }
            Err(e) => Err(IntegratedServiceError::KubeConfig(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }
}

/// Fixed kubeconfigs, for development and tests.
#[derive(Default)]
pub struct StaticKubeConfigSource {
    configs: HashMap<ClusterId, String>,
}

impl StaticKubeConfigSource {
    pub fn new(configs: impl IntoIterator<Item = (ClusterId, String)>) -> Self {
        Self {
            configs: configs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl KubeConfigSource for StaticKubeConfigSource {
    async fn kube_config(&self, cluster_id: ClusterId) -> Result<String, IntegratedServiceError> {
        self.configs
            .get(&cluster_id)
            .cloned()
            .ok_or(IntegratedServiceError::ClusterNotReady(cluster_id))
    }
}

/// Every cluster gets a synthetic `memory://<id>` document, which is what
/// the in-memory client factory keys its clusters by.
pub struct MemoryKubeConfigSource;

#[async_trait]
impl KubeConfigSource for MemoryKubeConfigSource {
    async fn kube_config(&self, cluster_id: ClusterId) -> Result<String, IntegratedServiceError> {
        Ok(format!("memory://{cluster_id}"))
    }
}
