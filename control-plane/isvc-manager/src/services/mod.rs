mod legacy;
mod router;
mod v2;

pub use legacy::LegacyService;
pub use router::{ServiceRouter, applies_to_legacy};
pub use v2::V2Service;

use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, Spec};

use crate::errors::IntegratedServiceError;

/// Lifecycle API consumed by the transport layer.
#[async_trait]
pub trait Service: Send + Sync {
    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<IntegratedService>, IntegratedServiceError>;

    /// Services without an instance come back as inactive.
    async fn details(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<IntegratedService, IntegratedServiceError>;

    async fn activate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError>;

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<(), IntegratedServiceError>;

    async fn update(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError>;
}
