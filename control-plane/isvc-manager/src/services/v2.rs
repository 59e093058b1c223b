use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, IntegratedServiceStatus, Spec};
use isvc_storage::IntegratedServiceReader;
use std::sync::Arc;
use tracing::{debug, info};

use super::Service;
use crate::dispatcher::OperationDispatcher;
use crate::errors::IntegratedServiceError;
use crate::registry::ManagerRegistry;

/// Engine generation without a status table: state is read back from the
/// cluster and from the dispatcher.
pub struct V2Service {
    managers: Arc<ManagerRegistry>,
    dispatcher: Arc<dyn OperationDispatcher>,
    reader: Arc<dyn IntegratedServiceReader>,
}

impl V2Service {
    pub fn new(
        managers: Arc<ManagerRegistry>,
        dispatcher: Arc<dyn OperationDispatcher>,
        reader: Arc<dyn IntegratedServiceReader>,
    ) -> Self {
        Self {
            managers,
            dispatcher,
            reader,
        }
    }

    async fn stored_spec(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<Spec, IntegratedServiceError> {
        match self.reader.get(cluster_id, service_name).await {
            Ok(service) => Ok(service.spec),
            Err(e) if e.is_not_found() => {
                Err(IntegratedServiceError::not_found(cluster_id, service_name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Service for V2Service {
    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<IntegratedService>, IntegratedServiceError> {
        let mut services = Vec::new();
        for name in self.managers.names() {
            services.push(self.details(cluster_id, &name).await?);
        }
        Ok(services)
    }

    async fn details(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<IntegratedService, IntegratedServiceError> {
        let manager = self.managers.manager(service_name)?;
        let mut service = match self.reader.get(cluster_id, service_name).await {
            Ok(service) => service,
            Err(e) if e.is_not_found() => IntegratedService::inactive(service_name),
            Err(e) => return Err(e.into()),
        };

        if self
            .dispatcher
            .is_being_dispatched(cluster_id, service_name)
            .await?
        {
            debug!(cluster_id, service = service_name, "operation in flight");
            service.status = IntegratedServiceStatus::Pending;
        }
        if !service.is_inactive() {
            let output = manager.get_output(cluster_id, &service.spec).await?;
            service.output.extend(output);
        }
        Ok(service)
    }

    async fn activate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let manager = self.managers.manager(service_name)?;
        manager.validate_spec(&spec).await?;
        let prepared = manager.prepare_spec(cluster_id, spec).await?;
        info!(cluster_id, service = service_name, "activating integrated service");
        self.dispatcher
            .dispatch_apply(cluster_id, service_name, prepared)
            .await
    }

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<(), IntegratedServiceError> {
        self.managers.manager(service_name)?;
        let spec = self.stored_spec(cluster_id, service_name).await?;
        info!(cluster_id, service = service_name, "deactivating integrated service");
        self.dispatcher
            .dispatch_deactivate(cluster_id, service_name, spec)
            .await
    }

    async fn update(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let manager = self.managers.manager(service_name)?;
        manager.validate_spec(&spec).await?;
        let prepared = manager.prepare_spec(cluster_id, spec).await?;
        info!(cluster_id, service = service_name, "updating integrated service");
        self.dispatcher
            .dispatch_apply(cluster_id, service_name, prepared)
            .await
    }
}
