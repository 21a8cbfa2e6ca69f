//! Security group reconciler
//!
//! Ensures exactly one security group is attached to the build instance,
//! with the single fixed ingress rule this system supports: SSH from
//! anywhere. Deletion is gated on the instance having reached TERMINATED,
//! since the provider refuses to delete a group that is still attached.

use super::Reconcile;
use crate::error::ControllerError;
use crate::scope::BuildScope;
use crds::InstanceStatus;
use ec2_client::{Ec2ClientTrait, SecurityGroupSpec};
use std::sync::Arc;
use tracing::info;

/// Scope surface the security group stage reads and writes.
pub trait SecurityGroupScope: Send {
    /// The bound cloud client.
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait>;
    /// VPC the group belongs to.
    fn vpc_id(&self) -> Option<&str>;
    /// Security group recorded for the build, if any.
    fn security_group_id(&self) -> Option<&str>;
    /// Records the security group id.
    fn set_security_group_id(&mut self, id: String);
    /// Name a system-created group carries.
    fn security_group_name(&self) -> String;
    /// Instance recorded for the build, if any.
    fn instance_id(&self) -> Option<&str>;
    /// Last mirrored instance lifecycle state.
    fn instance_state(&self) -> Option<InstanceStatus>;
}

impl SecurityGroupScope for BuildScope {
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        BuildScope::cloud(self)
    }
    fn vpc_id(&self) -> Option<&str> {
        BuildScope::vpc_id(self)
    }
    fn security_group_id(&self) -> Option<&str> {
        BuildScope::security_group_id(self)
    }
    fn set_security_group_id(&mut self, id: String) {
        BuildScope::set_security_group_id(self, id);
    }
    fn security_group_name(&self) -> String {
        BuildScope::security_group_name(self)
    }
    fn instance_id(&self) -> Option<&str> {
        BuildScope::instance_id(self)
    }
    fn instance_state(&self) -> Option<InstanceStatus> {
        BuildScope::instance_state(self)
    }
}

/// Reconciles the build's security group.
#[derive(Debug, Clone, Copy)]
pub struct SecurityGroupReconciler;

#[async_trait::async_trait]
impl Reconcile for SecurityGroupReconciler {
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        reconcile_security_group(scope).await
    }

    async fn delete(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        delete_security_group(scope).await
    }
}

async fn reconcile_security_group<S: SecurityGroupScope>(
    scope: &mut S,
) -> Result<(), ControllerError> {
    info!("Reconciling security group resources");

    if let Some(group_id) = scope.security_group_id() {
        info!(group_id = %group_id, "using existing security group");
        return Ok(());
    }

    let vpc_id = scope.vpc_id().map(str::to_string).ok_or_else(|| {
        ControllerError::InvalidConfig("VPC ID is required to create a security group".to_string())
    })?;

    let cloud = scope.cloud();
    let name = scope.security_group_name();
    info!(vpc_id = %vpc_id, name = %name, "creating security group");
    let group = cloud
        .create_security_group(&SecurityGroupSpec { vpc_id, name })
        .await?;

    info!(group_id = %group.group_id, "adding SSH ingress rule to security group");
    cloud.authorize_ssh_ingress(&group.group_id).await?;

    scope.set_security_group_id(group.group_id.clone());
    info!(group_id = %group.group_id, "successfully reconciled security group");
    Ok(())
}

async fn delete_security_group<S: SecurityGroupScope>(
    scope: &mut S,
) -> Result<(), ControllerError> {
    info!("Deleting security group resources");

    // The provider cannot detach a group from a live instance. When a
    // lifecycle state is tracked and is not TERMINATED yet, surface the
    // sentinel so the orchestrator retries shortly. Builds that never
    // launched an instance have nothing to wait for.
    if scope.instance_id().is_some() && scope.instance_state() != Some(InstanceStatus::Terminated)
    {
        return Err(ControllerError::InstanceNotTerminated);
    }

    let Some(group_id) = scope.security_group_id().map(str::to_string) else {
        info!("no security group to delete");
        return Ok(());
    };

    let cloud = scope.cloud();
    info!(group_id = %group_id, "checking if security group is managed by forge");
    if !cloud.is_managed_security_group(&group_id).await? {
        info!(group_id = %group_id, "security group is not managed by forge, skipping deletion");
        return Ok(());
    }

    info!(group_id = %group_id, "deleting security group");
    cloud.delete_security_group(&group_id).await?;
    info!(group_id = %group_id, "deleted security group");
    Ok(())
}
