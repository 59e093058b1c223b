use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a managed cluster.
pub type ClusterId = u32;

/// Opaque, service-specific desired configuration.
pub type Spec = Map<String, Value>;

/// Opaque, service-specific observed output.
pub type Output = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegratedServiceStatus {
    #[default]
    Inactive,
    Pending,
    Active,
    Error,
}

impl IntegratedServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegratedServiceStatus::Inactive => "INACTIVE",
            IntegratedServiceStatus::Pending => "PENDING",
            IntegratedServiceStatus::Active => "ACTIVE",
            IntegratedServiceStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for IntegratedServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An optional cluster add-on together with its last known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntegratedService {
    pub name: String,
    #[serde(default)]
    pub spec: Spec,
    #[serde(default)]
    pub output: Output,
    pub status: IntegratedServiceStatus,
}

impl IntegratedService {
    pub fn new(
        name: impl Into<String>,
        spec: Spec,
        status: IntegratedServiceStatus,
    ) -> Self {
        Self {
            name: name.into(),
            spec,
            output: Output::new(),
            status,
        }
    }

    /// The view of a service that has no instance record.
    pub fn inactive(name: impl Into<String>) -> Self {
        Self::new(name, Spec::new(), IntegratedServiceStatus::Inactive)
    }

    pub fn is_inactive(&self) -> bool {
        self.status == IntegratedServiceStatus::Inactive
    }
}

/// Lifecycle operation carried by a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Apply,
    Deactivate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Apply => f.write_str("apply"),
            Operation::Deactivate => f.write_str("deactivate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_uses_upper_case_wire_names() {
        let service = IntegratedService::inactive("dns");
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(value["status"], "INACTIVE");

        let parsed: IntegratedService = serde_json::from_value(json!({
            "name": "dns",
            "status": "PENDING"
        }))
        .unwrap();
        assert_eq!(parsed.status, IntegratedServiceStatus::Pending);
        assert!(parsed.spec.is_empty());
    }

    #[test]
    fn operation_is_lower_case() {
        assert_eq!(serde_json::to_value(Operation::Deactivate).unwrap(), "deactivate");
        assert_eq!(Operation::Apply.to_string(), "apply");
    }
}
