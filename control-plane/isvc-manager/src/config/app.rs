use anyhow::Result;
use envconfig::Envconfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::workflow::{ActivityOptions, LEGACY_JOB_WORKFLOW, V2_JOB_WORKFLOW};

#[derive(Debug, Clone, Envconfig)]
pub struct AppConfig {
    // Dispatch
    #[envconfig(from = "ISVC_DISPATCHER", default = "workflow")]
    pub dispatcher: String,

    #[envconfig(from = "ISVC_LOCAL_QUEUE_CAPACITY", default = "128")]
    pub local_queue_capacity: usize,

    #[envconfig(from = "ISVC_LEGACY_WORKFLOW_NAME", default = "integrated-service-job")]
    pub legacy_workflow_name: String,

    #[envconfig(from = "ISVC_V2_WORKFLOW_NAME", default = "integrated-service-job-v2")]
    pub v2_workflow_name: String,

    #[envconfig(from = "ISVC_RETRY_INTERVAL_SECS", default = "30")]
    pub retry_interval_seconds: u64,

    /// Upper bound for one job execution, 0 for none.
    #[envconfig(from = "ISVC_EXECUTION_TIMEOUT_SECS", default = "0")]
    pub execution_timeout_seconds: u64,

    // Activities
    #[envconfig(from = "ISVC_HEARTBEAT_INTERVAL_SECS", default = "10")]
    pub heartbeat_interval_seconds: u64,

    #[envconfig(from = "ISVC_HEARTBEAT_TIMEOUT_SECS", default = "60")]
    pub heartbeat_timeout_seconds: u64,

    #[envconfig(from = "ISVC_SCHEDULE_TO_START_SECS", default = "600")]
    pub schedule_to_start_seconds: u64,

    #[envconfig(from = "ISVC_START_TO_CLOSE_SECS", default = "3600")]
    pub start_to_close_seconds: u64,

    #[envconfig(from = "ISVC_MAX_CONCURRENT_ACTIVITIES", default = "64")]
    pub max_concurrent_activities: usize,

    // Clusters
    #[envconfig(from = "ISVC_POLL_INTERVAL_SECS", default = "2")]
    pub poll_interval_seconds: u64,

    #[envconfig(from = "ISVC_INSTANCE_NAMESPACE", default = "integrated-services")]
    pub instance_namespace: String,

    #[envconfig(from = "ISVC_CLUSTER_BACKEND", default = "kube")]
    pub cluster_backend: String,

    #[envconfig(from = "ISVC_KUBECONFIG_DIR", default = "/etc/isvc/kubeconfigs")]
    pub kubeconfig_dir: String,

    // Service registrations, comma separated
    #[envconfig(from = "ISVC_LEGACY_SERVICES", default = "")]
    pub legacy_services: String,

    #[envconfig(from = "ISVC_V2_SERVICES", default = "dns,backup,vault")]
    pub v2_services: String,

    // Observability
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "LOG_FORMAT", default = "plain")]
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self> {
        Ok(Self::init_from_env()?)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        let kind = match self.dispatcher.to_lowercase().as_str() {
            "workflow" => DispatcherKind::Workflow,
            "local" => DispatcherKind::Local,
            other => {
                warn!(dispatcher = other, "unrecognized dispatcher, falling back to 'workflow'");
                DispatcherKind::Workflow
            }
        };
        DispatchConfig {
            kind,
            local_queue_capacity: self.local_queue_capacity.max(1),
            legacy_workflow_name: non_empty_or(&self.legacy_workflow_name, LEGACY_JOB_WORKFLOW),
            v2_workflow_name: non_empty_or(&self.v2_workflow_name, V2_JOB_WORKFLOW),
            retry_interval: Duration::from_secs(self.retry_interval_seconds),
            execution_timeout: (self.execution_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.execution_timeout_seconds)),
        }
    }

    pub fn activities(&self) -> ActivityConfig {
        ActivityConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds.max(1)),
            options: ActivityOptions {
                schedule_to_start_timeout: Duration::from_secs(self.schedule_to_start_seconds),
                start_to_close_timeout: Duration::from_secs(self.start_to_close_seconds),
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_seconds),
            },
            max_concurrent: self.max_concurrent_activities.max(1),
        }
    }

    pub fn clusters(&self) -> ClusterConfig {
        let backend = match self.cluster_backend.to_lowercase().as_str() {
            "kube" => ClusterBackend::Kube,
            "memory" => ClusterBackend::Memory,
            other => {
                warn!(backend = other, "unrecognized cluster backend, falling back to 'kube'");
                ClusterBackend::Kube
            }
        };
        ClusterConfig {
            backend,
            kubeconfig_dir: PathBuf::from(&self.kubeconfig_dir),
            namespace: self.instance_namespace.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_seconds.max(1)),
        }
    }

    pub fn services(&self) -> ServicesConfig {
        ServicesConfig {
            legacy: split_names(&self.legacy_services),
            v2: split_names(&self.v2_services),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherKind {
    Workflow,
    Local,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub kind: DispatcherKind,
    pub local_queue_capacity: usize,
    pub legacy_workflow_name: String,
    pub v2_workflow_name: String,
    pub retry_interval: Duration,
    pub execution_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub heartbeat_interval: Duration,
    pub options: ActivityOptions,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterBackend {
    Kube,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub backend: ClusterBackend,
    pub kubeconfig_dir: PathBuf,
    pub namespace: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub legacy: Vec<String>,
    pub v2: Vec<String>,
}
