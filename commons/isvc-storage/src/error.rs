use isvc_models::ClusterId;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("integrated service {service} not found on cluster {cluster_id}")]
    NotFound {
        cluster_id: ClusterId,
        service: String,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(cluster_id: ClusterId, service: &str) -> Self {
        StorageError::NotFound {
            cluster_id,
            service: service.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
