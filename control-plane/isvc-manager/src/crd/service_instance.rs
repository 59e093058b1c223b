use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PHASE_INSTALLING: &str = "Installing";
pub const PHASE_INSTALLED: &str = "Installed";
pub const PHASE_INSTALL_FAILED: &str = "InstallFailed";
pub const PHASE_UPGRADING: &str = "Upgrading";
pub const PHASE_UNINSTALLING: &str = "Uninstalling";
pub const PHASE_UNINSTALLED: &str = "Uninstalled";
pub const PHASE_UNINSTALL_FAILED: &str = "UninstallFailed";

/// Desired state of one add-on on a cluster. The remote controller owns
/// the status; this control plane only writes the spec.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "integratedservices.io",
    version = "v1alpha1",
    kind = "ServiceInstance",
    plural = "serviceinstances",
    shortname = "si",
    namespaced,
    status = "ServiceInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Chart version to run; the controller picks nothing on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Service-specific values, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_spec: Option<BTreeMap<String, Value>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Version currently installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Versions the controller can install, keyed by version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_versions: Option<BTreeMap<String, Value>>,
}

impl ServiceInstance {
    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.enabled.unwrap_or(false)
    }

    pub fn has_available_versions(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.available_versions.as_ref())
            .is_some_and(|versions| !versions.is_empty())
    }
}
