//! Controller-specific error types.
//!
//! This module defines the error taxonomy of the AWSBuild controller.
//! Exactly one variant is a recognized scheduling sentinel:
//! [`ControllerError::InstanceNotTerminated`], which the orchestrator maps
//! to a short requeue instead of a failure.

use ec2_client::Ec2Error;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the AWSBuild controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// EC2 API error
    #[error("EC2 error: {0}")]
    Ec2(#[from] Ec2Error),

    /// The build instance has not reached TERMINATED yet; the security
    /// group attached to it cannot be deleted until it has
    #[error("the instance is not terminated yet, waiting")]
    InstanceNotTerminated,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A provider-reported timestamp could not be parsed
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    /// The provider reported an instance state this controller does not know
    #[error(transparent)]
    UnknownInstanceState(#[from] crds::UnknownInstanceState),

    /// SSH credential handling failed
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Resource watch failed
    #[error("resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True for the one sentinel the orchestrator schedules a retry on.
    pub fn is_instance_not_terminated(&self) -> bool {
        matches!(self, ControllerError::InstanceNotTerminated)
    }
}
