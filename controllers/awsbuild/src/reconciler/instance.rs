//! Instance reconciler
//!
//! Ensures exactly one build instance exists and is reachable. Creation is
//! fire-and-observe: the id is recorded immediately, the lifecycle state is
//! mirrored on every pass, and termination completion is picked up by a
//! later pass rather than waited for.

use super::Reconcile;
use crate::error::ControllerError;
use crate::scope::BuildScope;
use crds::InstanceStatus;
use ec2_client::{CreateInstanceParams, Ec2ClientTrait, Instance};
use std::sync::Arc;
use tracing::info;

/// Scope surface the instance stage reads and writes.
#[async_trait::async_trait]
pub trait InstanceScope: Send {
    /// The bound cloud client.
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait>;
    /// Name of the build (the instance's `Name` tag).
    fn name(&self) -> &str;
    /// Machine image the instance boots from.
    fn ami(&self) -> Option<&str>;
    /// EC2 instance type to launch.
    fn instance_type(&self) -> &str;
    /// Base64-encoded cloud-init user data.
    fn user_data(&self) -> String;
    /// Whether the instance gets a public IP.
    fn public_ip(&self) -> bool;
    /// Subnet the instance attaches to.
    fn subnet_id(&self) -> Option<&str>;
    /// Security group the instance attaches to.
    fn security_group_id(&self) -> Option<&str>;
    /// Instance recorded for the build, if any.
    fn instance_id(&self) -> Option<&str>;
    /// Records the instance id.
    fn set_instance_id(&mut self, id: String);
    /// Mirrors the instance lifecycle state.
    fn set_instance_state(&mut self, state: InstanceStatus);
    /// Hands SSH connection material to the credentials collaborator.
    async fn ensure_credentials_secret(&self, host: Option<&str>)
        -> Result<(), ControllerError>;
}

#[async_trait::async_trait]
impl InstanceScope for BuildScope {
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        BuildScope::cloud(self)
    }
    fn name(&self) -> &str {
        BuildScope::name(self)
    }
    fn ami(&self) -> Option<&str> {
        BuildScope::ami(self)
    }
    fn instance_type(&self) -> &str {
        BuildScope::instance_type(self)
    }
    fn user_data(&self) -> String {
        BuildScope::user_data(self)
    }
    fn public_ip(&self) -> bool {
        BuildScope::public_ip(self)
    }
    fn subnet_id(&self) -> Option<&str> {
        BuildScope::subnet_id(self)
    }
    fn security_group_id(&self) -> Option<&str> {
        BuildScope::security_group_id(self)
    }
    fn instance_id(&self) -> Option<&str> {
        BuildScope::instance_id(self)
    }
    fn set_instance_id(&mut self, id: String) {
        BuildScope::set_instance_id(self, id);
    }
    fn set_instance_state(&mut self, state: InstanceStatus) {
        BuildScope::set_instance_state(self, state);
    }
    async fn ensure_credentials_secret(
        &self,
        host: Option<&str>,
    ) -> Result<(), ControllerError> {
        BuildScope::ensure_credentials_secret(self, host).await
    }
}

/// Reconciles the build's EC2 instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceReconciler;

#[async_trait::async_trait]
impl Reconcile for InstanceReconciler {
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        reconcile_instance(scope).await
    }

    async fn delete(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        delete_instance(scope).await
    }
}

async fn reconcile_instance<S: InstanceScope + Sync>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Reconciling EC2 instance");

    let instance = create_or_get_instance(scope).await?;
    scope.set_instance_id(instance.instance_id.clone());

    // Associate the SSH material with the instance's address so the
    // provisioners can reach it.
    scope
        .ensure_credentials_secret(instance.public_ip.as_deref())
        .await?;

    scope.set_instance_state(InstanceStatus::from_provider(&instance.state)?);

    info!(
        instance_id = %instance.instance_id,
        public_ip = instance.public_ip.as_deref().unwrap_or(""),
        "EC2 instance is ready"
    );
    Ok(())
}

async fn delete_instance<S: InstanceScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Deleting EC2 instance");

    let Some(instance_id) = scope.instance_id().map(str::to_string) else {
        info!("no instance ID to delete, skipping");
        return Ok(());
    };

    let cloud = scope.cloud();
    if !cloud.is_managed_instance(&instance_id).await? {
        info!(instance_id = %instance_id, "instance is not managed by forge, skipping deletion");
        return Ok(());
    }

    let Some(instance) = cloud.find_instance_by_id(&instance_id).await? else {
        info!(instance_id = %instance_id, "instance already deleted");
        scope.set_instance_state(InstanceStatus::Terminated);
        return Ok(());
    };

    let state = InstanceStatus::from_provider(&instance.state)?;
    info!(instance_id = %instance_id, state = %state, "observed instance state");
    scope.set_instance_state(state);

    // Termination already in flight; do not double-issue.
    if state == InstanceStatus::Terminated || state == InstanceStatus::ShuttingDown {
        return Ok(());
    }

    info!(instance_id = %instance_id, "terminating EC2 instance");
    cloud.terminate_instance(&instance_id).await?;
    scope.set_instance_state(InstanceStatus::Terminating);
    info!(instance_id = %instance_id, "termination initiated for EC2 instance");
    Ok(())
}

/// Looks up the recorded instance, falling back to creating a new one when
/// none is recorded or the recorded one is gone.
async fn create_or_get_instance<S: InstanceScope>(
    scope: &mut S,
) -> Result<Instance, ControllerError> {
    let cloud = scope.cloud();

    if let Some(instance_id) = scope.instance_id() {
        if let Some(instance) = cloud.find_instance_by_id(instance_id).await? {
            return Ok(instance);
        }
        // Recorded instance disappeared underneath us; create a new one.
    }

    let params = CreateInstanceParams {
        name: scope.name().to_string(),
        ami_id: scope.ami().unwrap_or_default().to_string(),
        instance_type: scope.instance_type().to_string(),
        user_data: scope.user_data(),
        public_ip: scope.public_ip(),
        subnet_id: scope.subnet_id().map(str::to_string).ok_or_else(|| {
            ControllerError::InvalidConfig(
                "subnet ID is required to create an instance".to_string(),
            )
        })?,
        security_group_id: scope.security_group_id().map(str::to_string).ok_or_else(|| {
            ControllerError::InvalidConfig(
                "security group ID is required to create an instance".to_string(),
            )
        })?,
    };

    let instance = cloud.create_instance(&params).await?;
    scope.set_instance_id(instance.instance_id.clone());
    info!(instance_id = %instance.instance_id, "EC2 instance created");
    Ok(instance)
}
