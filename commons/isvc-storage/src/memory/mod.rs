use async_trait::async_trait;
use isvc_models::{
    ClusterId, IntegratedService, IntegratedServiceStatus, Output, Spec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::*;

#[derive(Debug, Clone)]
struct Record {
    spec: Spec,
    output: Output,
    status: IntegratedServiceStatus,
}

type MemoryStore = Arc<RwLock<BTreeMap<(ClusterId, String), Record>>>;

/// In-memory repository, keyed by `(cluster_id, service)`.
#[derive(Clone, Default)]
pub struct MemoryIntegratedServiceRepository {
    store: MemoryStore,
}

impl MemoryIntegratedServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_service(name: &str, record: &Record) -> IntegratedService {
        IntegratedService {
            name: name.to_string(),
            spec: record.spec.clone(),
            output: record.output.clone(),
            status: record.status,
        }
    }
}

#[async_trait]
impl IntegratedServiceReader for MemoryIntegratedServiceRepository {
    async fn get(
        &self,
        cluster_id: ClusterId,
        service: &str,
    ) -> StorageResult<IntegratedService> {
        let store = self.store.read().await;
        store
            .get(&(cluster_id, service.to_string()))
            .map(|record| Self::to_service(service, record))
            .ok_or_else(|| StorageError::not_found(cluster_id, service))
    }

    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> StorageResult<Vec<IntegratedService>> {
        let store = self.store.read().await;
        Ok(store
            .iter()
            .filter(|((cid, _), _)| *cid == cluster_id)
            .map(|((_, name), record)| Self::to_service(name, record))
            .collect())
    }
}

#[async_trait]
impl IntegratedServiceRepository for MemoryIntegratedServiceRepository {
    async fn save(
        &self,
        cluster_id: ClusterId,
        service: &str,
        spec: Spec,
        status: IntegratedServiceStatus,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        debug!(cluster_id, service, %status, "saving integrated service");
        store.insert(
            (cluster_id, service.to_string()),
            Record {
                spec,
                output: Output::new(),
                status,
            },
        );
        Ok(())
    }

    async fn update_status(
        &self,
        cluster_id: ClusterId,
        service: &str,
        status: IntegratedServiceStatus,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        let record = store
            .get_mut(&(cluster_id, service.to_string()))
            .ok_or_else(|| StorageError::not_found(cluster_id, service))?;
        debug!(cluster_id, service, from = %record.status, to = %status, "updating status");
        record.status = status;
        Ok(())
    }

    async fn update_spec(
        &self,
        cluster_id: ClusterId,
        service: &str,
        spec: Spec,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        let record = store
            .get_mut(&(cluster_id, service.to_string()))
            .ok_or_else(|| StorageError::not_found(cluster_id, service))?;
        record.spec = spec;
        Ok(())
    }

    async fn delete(
        &self,
        cluster_id: ClusterId,
        service: &str,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store.remove(&(cluster_id, service.to_string()));
        Ok(())
    }
}
