use crate::error::StorageError;
use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, IntegratedServiceStatus, Spec};

pub type StorageResult<T> = Result<T, StorageError>;

/// Read access to per-(cluster, service) state.
///
/// `get` must fail with [`StorageError::NotFound`] when no record exists so
/// callers can tell "needs creation" apart from a read failure.
#[async_trait]
pub trait IntegratedServiceReader: Send + Sync {
    async fn get(
        &self,
        cluster_id: ClusterId,
        service: &str,
    ) -> StorageResult<IntegratedService>;

    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> StorageResult<Vec<IntegratedService>>;
}

/// Persisted per-(cluster, service) state owned by the legacy engine.
#[async_trait]
pub trait IntegratedServiceRepository: IntegratedServiceReader {
    async fn save(
        &self,
        cluster_id: ClusterId,
        service: &str,
        spec: Spec,
        status: IntegratedServiceStatus,
    ) -> StorageResult<()>;

    async fn update_status(
        &self,
        cluster_id: ClusterId,
        service: &str,
        status: IntegratedServiceStatus,
    ) -> StorageResult<()>;

    async fn update_spec(
        &self,
        cluster_id: ClusterId,
        service: &str,
        spec: Spec,
    ) -> StorageResult<()>;

    /// Removes the record. Deleting a missing record is not an error.
    async fn delete(&self, cluster_id: ClusterId, service: &str)
    -> StorageResult<()>;
}
