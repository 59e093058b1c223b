pub mod bootstrap;
pub mod config;
pub mod crd;
pub mod dispatcher;
pub mod errors;
pub mod instance;
pub mod reconciler;
pub mod registry;
pub mod services;
pub mod workflow;

pub use errors::IntegratedServiceError;
pub use services::{Service, ServiceRouter};

pub use bootstrap::{IntegratedServices, build_from_config};
