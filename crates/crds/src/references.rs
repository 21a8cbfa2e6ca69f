//! Kubernetes object references for AWSBuild CRDs
//!
//! Local counterpart of the core `SecretReference`, kept here so the CRD
//! schema does not depend on k8s-openapi's schema features.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Kubernetes Secret
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the referenced secret
    pub name: String,

    /// Namespace of the referenced secret (defaults to the build's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    /// Create a reference to a secret in the same namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a reference to a secret in a specific namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}
