//! AWSBuild Custom Resource Definition
//!
//! Defines a Kubernetes CRD describing a single AWS image build: launch an
//! EC2 instance inside a (possibly system-created) VPC/subnet/security
//! group, let provisioners prepare it, export its root volume as an AMI,
//! then tear the scaffolding down again.

use crate::references::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Finalizer blocking AWSBuild removal until AWS resources are cleaned up.
pub const BUILD_FINALIZER: &str = "awsbuild.infrastructure.forge.build";

/// Kind of an AWSBuild object.
pub const AWSBUILD_KIND: &str = "AWSBuild";

/// AWSBuildSpec defines the desired state of an AWSBuild
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.forge.build",
    version = "v1alpha1",
    kind = "AWSBuild",
    namespaced,
    status = "AWSBuildStatus",
    shortname = "awsb"
)]
#[serde(rename_all = "camelCase")]
pub struct AWSBuildSpec {
    /// AWS region for the build (e.g., "eu-west-1")
    pub region: String,

    /// EC2 instance type (e.g., "t3.micro", "m5.large")
    pub instance_type: String,

    /// Amazon Machine Image ID to boot the build instance from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,

    /// Network attachments for the build instance
    #[serde(default)]
    pub network: NetworkSpec,

    /// Whether the instance should get a public IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,

    /// User account created on the instance for provisioning access
    pub username: String,

    /// Generate an SSH keypair for the build when no credentials secret
    /// is referenced
    #[serde(default)]
    pub generate_ssh_key: bool,

    /// Secret holding the SSH credentials to connect to the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_credentials_ref: Option<SecretReference>,

    /// Secret holding AWS credentials for provisioning. Falls back to the
    /// controller's own credentials when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<SecretReference>,

    /// ID of the build instance, recorded once it is created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// NetworkSpec encapsulates the AWS network attachments of a build.
///
/// Identifiers left empty are created by the controller (and tagged as
/// system-owned); identifiers supplied by the user are adopted verbatim
/// and never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Name of the VPC. Defaults to `<build-name>-forge-vpc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// ID of the VPC for the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    /// ID of the subnet for the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    /// ID of the security group to associate with the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
}

/// AWSBuildStatus defines the observed state of an AWSBuild
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AWSBuildStatus {
    /// The build artifact is available and the build is complete
    #[serde(default)]
    pub ready: bool,

    /// The build machine is up and reachable for provisioning
    #[serde(default)]
    pub machine_ready: bool,

    /// Provisioners have finished preparing the machine; the image export
    /// stage only runs once this is set
    #[serde(default)]
    pub provisioners_ready: bool,

    /// AWS resources created for the build have been cleaned up
    #[serde(default)]
    pub cleaned_up: bool,

    /// Provider-reported lifecycle state of the build instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<InstanceStatus>,

    /// Reference to the exported machine image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,

    /// Machine-readable reason for a build failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Human-readable description of a build failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// Lifecycle state of the build's EC2 instance, mirrored from the provider.
///
/// Wire values are the provider state names uppercased, so `kubectl get`
/// output matches what the EC2 console shows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Instance resources are being allocated
    #[serde(rename = "PROVISIONING")]
    Provisioning,
    /// Launched, not yet running
    #[serde(rename = "PENDING")]
    Pending,
    /// Up and running
    #[serde(rename = "RUNNING")]
    Running,
    /// Stop in progress
    #[serde(rename = "STOPPING")]
    Stopping,
    /// Stopped, can be restarted
    #[serde(rename = "STOPPED")]
    Stopped,
    /// Termination in progress on the provider side
    #[serde(rename = "SHUTTING-DOWN")]
    ShuttingDown,
    /// Terminate call issued, completion not yet observed
    #[serde(rename = "TERMINATING")]
    Terminating,
    /// Gone
    #[serde(rename = "TERMINATED")]
    Terminated,
}

/// A provider state name that does not map onto [`InstanceStatus`].
#[derive(Debug, Error)]
#[error("unknown instance state: {0}")]
pub struct UnknownInstanceState(pub String);

impl InstanceStatus {
    /// Parses a provider-reported state name, case-insensitively.
    pub fn from_provider(state: &str) -> Result<Self, UnknownInstanceState> {
        match state.to_ascii_uppercase().as_str() {
            "PROVISIONING" => Ok(InstanceStatus::Provisioning),
            "PENDING" => Ok(InstanceStatus::Pending),
            "RUNNING" => Ok(InstanceStatus::Running),
            "STOPPING" => Ok(InstanceStatus::Stopping),
            "STOPPED" => Ok(InstanceStatus::Stopped),
            "SHUTTING-DOWN" => Ok(InstanceStatus::ShuttingDown),
            "TERMINATING" => Ok(InstanceStatus::Terminating),
            "TERMINATED" => Ok(InstanceStatus::Terminated),
            other => Err(UnknownInstanceState(other.to_string())),
        }
    }

    /// Wire representation (uppercased provider state name).
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Pending => "PENDING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::ShuttingDown => "SHUTTING-DOWN",
            InstanceStatus::Terminating => "TERMINATING",
            InstanceStatus::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
