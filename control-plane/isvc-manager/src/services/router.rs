use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, Spec};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::Service;
use crate::errors::IntegratedServiceError;

/// Presents both engine generations as one [`Service`].
///
/// An instance stays with the generation that activated it until it is
/// deactivated; new activations go to v2 unless v2 does not know the
/// service.
pub struct ServiceRouter {
    legacy: Arc<dyn Service>,
    v2: Arc<dyn Service>,
}

impl ServiceRouter {
    pub fn new(legacy: Arc<dyn Service>, v2: Arc<dyn Service>) -> Self {
        Self { legacy, v2 }
    }
}

/// Whether the legacy engine owns the instance. Unknown or missing instances
/// belong to v2.
pub async fn applies_to_legacy(
    legacy: &dyn Service,
    cluster_id: ClusterId,
    service_name: &str,
) -> Result<bool, IntegratedServiceError> {
    match legacy.details(cluster_id, service_name).await {
        Ok(service) => Ok(!service.is_inactive()),
        Err(e) if e.is_unknown_service() || e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Service for ServiceRouter {
    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<IntegratedService>, IntegratedServiceError> {
        let mut services = self.legacy.list(cluster_id).await?;
        let legacy_names: HashSet<String> =
            services.iter().map(|s| s.name.clone()).collect();

        for service in self.v2.list(cluster_id).await? {
            if legacy_names.contains(&service.name) {
                warn!(cluster_id, service = %service.name, "service listed by both engines, keeping legacy entry");
                continue;
            }
            services.push(service);
        }
        Ok(services)
    }

    async fn details(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<IntegratedService, IntegratedServiceError> {
        let legacy = self.legacy.details(cluster_id, service_name).await;
        match &legacy {
            Ok(service) if !service.is_inactive() => return legacy,
            Ok(_) => {}
            Err(e) if e.is_unknown_service() => {}
            Err(_) => return legacy,
        }

        match self.v2.details(cluster_id, service_name).await {
            Err(e) if e.is_unknown_service() => legacy,
            other => other,
        }
    }

    #[instrument(skip(self, spec))]
    async fn activate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let current = self.details(cluster_id, service_name).await?;
        if !current.is_inactive() {
            return Err(IntegratedServiceError::AlreadyActive(service_name.to_string()));
        }

        // checked again against legacy alone, the merged view above may have
        // come from v2
        if applies_to_legacy(self.legacy.as_ref(), cluster_id, service_name).await? {
            debug!("activating through legacy engine");
            return self.legacy.activate(cluster_id, service_name, spec).await;
        }

        match self.v2.activate(cluster_id, service_name, spec.clone()).await {
            Err(e) if e.is_unknown_service() => {
                debug!("v2 does not know the service, falling back to legacy");
                self.legacy.activate(cluster_id, service_name, spec).await
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<(), IntegratedServiceError> {
        if applies_to_legacy(self.legacy.as_ref(), cluster_id, service_name).await? {
            return self.legacy.deactivate(cluster_id, service_name).await;
        }
        self.v2.deactivate(cluster_id, service_name).await
    }

    #[instrument(skip(self, spec))]
    async fn update(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        if applies_to_legacy(self.legacy.as_ref(), cluster_id, service_name).await? {
            return self.legacy.update(cluster_id, service_name, spec).await;
        }
        self.v2.update(cluster_id, service_name, spec).await
    }
}
