//! Subnet reconciler
//!
//! Ensures exactly one subnet exists for the build instance. A
//! user-supplied subnet is adopted verbatim and, because it never gets the
//! ownership tag, is structurally protected from deletion. Otherwise a new
//! subnet is carved out of the VPC block with the CIDR allocator.

use super::Reconcile;
use crate::error::ControllerError;
use crate::scope::BuildScope;
use ec2_client::{cidr, Ec2ClientTrait, SubnetSpec};
use std::sync::Arc;
use tracing::info;

/// Prefix length of subnets this system creates.
const SUBNET_PREFIX_LEN: u8 = 24;

/// Scope surface the subnet stage reads and writes.
pub trait SubnetScope: Send {
    /// The bound cloud client.
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait>;
    /// VPC the subnet belongs to.
    fn vpc_id(&self) -> Option<&str>;
    /// Subnet recorded for the build, if any.
    fn subnet_id(&self) -> Option<&str>;
    /// Records the subnet id.
    fn set_subnet_id(&mut self, id: String);
    /// Name a system-created subnet carries.
    fn subnet_name(&self) -> String;
}

impl SubnetScope for BuildScope {
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        BuildScope::cloud(self)
    }
    fn vpc_id(&self) -> Option<&str> {
        BuildScope::vpc_id(self)
    }
    fn subnet_id(&self) -> Option<&str> {
        BuildScope::subnet_id(self)
    }
    fn set_subnet_id(&mut self, id: String) {
        BuildScope::set_subnet_id(self, id);
    }
    fn subnet_name(&self) -> String {
        BuildScope::subnet_name(self)
    }
}

/// Reconciles the build's subnet.
#[derive(Debug, Clone, Copy)]
pub struct SubnetReconciler;

#[async_trait::async_trait]
impl Reconcile for SubnetReconciler {
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        reconcile_subnet(scope).await
    }

    async fn delete(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        delete_subnet(scope).await
    }
}

async fn reconcile_subnet<S: SubnetScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Reconciling AWS subnet resources");
    let cloud = scope.cloud();

    // A recorded id covers both the user-supplied case and our own subnet
    // on a later pass. Absence is fatal here: a dangling user-supplied
    // reference means the request is misconfigured.
    if let Some(subnet_id) = scope.subnet_id().map(str::to_string) {
        info!(subnet_id = %subnet_id, "using existing subnet");
        let subnet = cloud.find_subnet_by_id(&subnet_id).await?;
        scope.set_subnet_id(subnet.subnet_id);
        return Ok(());
    }

    let vpc_id = scope.vpc_id().map(str::to_string).ok_or_else(|| {
        ControllerError::InvalidConfig("VPC ID is required to create a subnet".to_string())
    })?;

    let vpc = cloud.get_vpc(&vpc_id).await?;
    let used: Vec<String> = cloud
        .list_subnets(&vpc_id)
        .await?
        .into_iter()
        .map(|s| s.cidr_block)
        .collect();
    let cidr_block = cidr::find_available_cidr(&vpc.cidr_block, &used, SUBNET_PREFIX_LEN)?;

    info!(vpc_id = %vpc_id, cidr = %cidr_block, "creating subnet");
    let subnet = cloud
        .create_subnet(&SubnetSpec {
            vpc_id,
            cidr_block,
            name: scope.subnet_name(),
        })
        .await?;
    scope.set_subnet_id(subnet.subnet_id.clone());

    info!(subnet_id = %subnet.subnet_id, "successfully reconciled subnet");
    Ok(())
}

async fn delete_subnet<S: SubnetScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Deleting AWS subnet resources");

    let Some(subnet_id) = scope.subnet_id().map(str::to_string) else {
        info!("no subnet recorded, skipping deletion");
        return Ok(());
    };

    let cloud = scope.cloud();
    if !cloud.is_managed_subnet(&subnet_id).await? {
        info!(subnet_id = %subnet_id, "subnet is not managed by forge, skipping deletion");
        return Ok(());
    }

    info!(subnet_id = %subnet_id, "deleting managed subnet");
    cloud.delete_subnet(&subnet_id).await?;
    info!(subnet_id = %subnet_id, "deleted subnet");
    Ok(())
}
