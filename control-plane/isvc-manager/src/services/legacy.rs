use async_trait::async_trait;
use isvc_models::{ClusterId, IntegratedService, IntegratedServiceStatus, Operation, Spec};
use isvc_storage::IntegratedServiceRepository;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::Service;
use crate::dispatcher::OperationDispatcher;
use crate::errors::IntegratedServiceError;
use crate::registry::ManagerRegistry;

/// Engine generation that keeps its own status table.
pub struct LegacyService {
    managers: Arc<ManagerRegistry>,
    dispatcher: Arc<dyn OperationDispatcher>,
    repository: Arc<dyn IntegratedServiceRepository>,
}

impl LegacyService {
    pub fn new(
        managers: Arc<ManagerRegistry>,
        dispatcher: Arc<dyn OperationDispatcher>,
        repository: Arc<dyn IntegratedServiceRepository>,
    ) -> Self {
        Self {
            managers,
            dispatcher,
            repository,
        }
    }

    async fn with_output(
        &self,
        cluster_id: ClusterId,
        mut service: IntegratedService,
    ) -> Result<IntegratedService, IntegratedServiceError> {
        let manager = self.managers.manager(&service.name)?;
        let output = manager.get_output(cluster_id, &service.spec).await?;
        service.output.extend(output);
        Ok(service)
    }

    /// A dispatch that never reached the queue leaves the record in ERROR.
    async fn dispatch_or_fail(
        &self,
        operation: Operation,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let dispatched = match operation {
            Operation::Apply => {
                self.dispatcher
                    .dispatch_apply(cluster_id, service_name, spec)
                    .await
            }
            Operation::Deactivate => {
                self.dispatcher
                    .dispatch_deactivate(cluster_id, service_name, spec)
                    .await
            }
        };
        if let Err(e) = dispatched {
            error!(cluster_id, service = service_name, %operation, error = %e, "dispatching failed");
            self.repository
                .update_status(cluster_id, service_name, IntegratedServiceStatus::Error)
                .await?;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Service for LegacyService {
    async fn list(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<IntegratedService>, IntegratedServiceError> {
        let records = self.repository.list(cluster_id).await?;
        let mut services = Vec::with_capacity(records.len());
        for record in records {
            if self.managers.manager(&record.name).is_err() {
                warn!(cluster_id, service = %record.name, "stored service has no registered manager");
                services.push(record);
                continue;
            }
            services.push(self.with_output(cluster_id, record).await?);
        }
        Ok(services)
    }

    async fn details(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<IntegratedService, IntegratedServiceError> {
        self.managers.manager(service_name)?;
        match self.repository.get(cluster_id, service_name).await {
            Ok(service) => self.with_output(cluster_id, service).await,
            Err(e) if e.is_not_found() => Ok(IntegratedService::inactive(service_name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn activate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
        spec: Spec,
    ) -> Result<(), IntegratedServiceError> {
        let manager = self.managers.manager(service_name)?;
        manager.validate_spec(&spec).await?;

        match self.repository.get(cluster_id, service_name).await {
            Ok(existing) if !existing.is_inactive() => {
                return Err(IntegratedServiceError::AlreadyActive(service_name.to_string()));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let prepared = manager.prepare_spec(cluster_id, spec.clone()).await?;
        self.repository
            .save(cluster_id, service_name, spec, IntegratedServiceStatus::Pending)
            .await?;
        info!(cluster_id, service = service_name, "activating integrated service");
        self.dispatch_or_fail(Operation::Apply, cluster_id, service_name, prepared)
            .await
    }

    async fn deactivate(
        &self,
        cluster_id: ClusterId,
        service_name: &str,
    ) -> Result<(), IntegratedServiceError> {
        let existing = match self.repository.get(cluster_id, service_name).await {
            Ok(service) => service,
            Err(e) if e.is_not_found() => {
                return Err(IntegratedServiceError::not_found(cluster_id, service_name));
            }
            Err(e) => return Err(e.into()),
        };
        self.repository
            .update_status(cluster_id, service_name, IntegratedServiceStatus::Pending)
            .await?;
        info!(cluster_id, service = service_name, "deactivating integrated service");
        self.dispatch_or_fail(Operation::Deactivate, cluster_id, service_name, existing.spec)
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
        if let Err(e) = self.repository.get(cluster_id, service_name).await {
            return Err(if e.is_not_found() {
                IntegratedServiceError::not_found(cluster_id, service_name)
            } else {
                e.into()
            });
        }

        let prepared = manager.prepare_spec(cluster_id, spec.clone()).await?;
        self.repository
            .update_spec(cluster_id, service_name, spec)
            .await?;
        self.repository
            .update_status(cluster_id, service_name, IntegratedServiceStatus::Pending)
            .await?;
        info!(cluster_id, service = service_name, "updating integrated service");
        self.dispatch_or_fail(Operation::Apply, cluster_id, service_name, prepared)
            .await
    }
}
