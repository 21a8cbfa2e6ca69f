//! VPC reconciler
//!
//! Ensures exactly one VPC is associated with the build, with an attached
//! internet gateway and a default route through it.

use super::Reconcile;
use crate::error::ControllerError;
use crate::scope::BuildScope;
use ec2_client::{name_from_tags, Ec2ClientTrait, Vpc, VpcSpec};
use std::sync::Arc;
use tracing::info;

/// Scope surface the network stage reads and writes.
pub trait NetworkScope: Send {
    /// The bound cloud client.
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait>;
    /// VPC recorded for the build, if any.
    fn vpc_id(&self) -> Option<&str>;
    /// Records the VPC id.
    fn set_vpc_id(&mut self, id: String);
    /// Name the build's VPC carries.
    fn vpc_name(&self) -> String;
    /// Records the VPC name.
    fn set_vpc_name(&mut self, name: String);
    /// Creation parameters for a new VPC.
    fn vpc_spec(&self) -> VpcSpec;
}

impl NetworkScope for BuildScope {
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        BuildScope::cloud(self)
    }
    fn vpc_id(&self) -> Option<&str> {
        BuildScope::vpc_id(self)
    }
    fn set_vpc_id(&mut self, id: String) {
        BuildScope::set_vpc_id(self, id);
    }
    fn vpc_name(&self) -> String {
        BuildScope::vpc_name(self)
    }
    fn set_vpc_name(&mut self, name: String) {
        BuildScope::set_vpc_name(self, name);
    }
    fn vpc_spec(&self) -> VpcSpec {
        BuildScope::vpc_spec(self)
    }
}

/// Reconciles the build's VPC and internet gateway.
#[derive(Debug, Clone, Copy)]
pub struct NetworkReconciler;

#[async_trait::async_trait]
impl Reconcile for NetworkReconciler {
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        reconcile_network(scope).await
    }

    async fn delete(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        delete_network(scope).await
    }
}

async fn reconcile_network<S: NetworkScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Reconciling AWS VPC resources");

    let vpc = create_or_get_vpc(scope).await?;

    // The gateway op is find-or-create and re-asserts the default route
    // either way, so re-running it is always safe.
    let igw_id = scope.cloud().ensure_internet_gateway(&vpc.vpc_id).await?;
    info!(vpc_id = %vpc.vpc_id, igw_id = %igw_id, "internet gateway is ready");

    Ok(())
}

async fn delete_network<S: NetworkScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Deleting AWS VPC resources");

    let Some(vpc_id) = scope.vpc_id().map(str::to_string) else {
        info!("no VPC to delete");
        return Ok(());
    };

    let cloud = scope.cloud();
    if !cloud.is_managed_vpc(&vpc_id).await? {
        info!(vpc_id = %vpc_id, "VPC is not managed by the system, skipping deletion");
        return Ok(());
    }

    // A partially deleted VPC must not count as cleaned up; both the
    // gateway teardown and the VPC deletion propagate their errors.
    cloud.detach_and_delete_internet_gateways(&vpc_id).await?;

    info!(vpc_id = %vpc_id, "deleting VPC");
    cloud.delete_vpc(&vpc_id).await?;
    info!(vpc_id = %vpc_id, "deleted VPC");
    Ok(())
}

/// Resolves the build's VPC: by recorded id, by name (the id may have gone
/// stale while the VPC lives on), or by creating a fresh one.
async fn create_or_get_vpc<S: NetworkScope>(scope: &mut S) -> Result<Vpc, ControllerError> {
    let cloud = scope.cloud();

    if let Some(vpc_id) = scope.vpc_id() {
        if let Some(vpc) = cloud.find_vpc_by_id(vpc_id).await? {
            adopt_vpc(scope, &vpc);
            return Ok(vpc);
        }
    }

    let vpc_name = scope.vpc_name();
    if let Some(vpc) = cloud.find_vpc_by_name(&vpc_name).await? {
        info!(vpc_id = %vpc.vpc_id, name = %vpc_name, "adopting existing VPC found by name");
        adopt_vpc(scope, &vpc);
        return Ok(vpc);
    }

    let vpc = cloud.create_vpc(&scope.vpc_spec()).await?;
    info!(vpc_id = %vpc.vpc_id, name = %vpc_name, "created VPC");
    scope.set_vpc_id(vpc.vpc_id.clone());
    scope.set_vpc_name(vpc_name);
    Ok(vpc)
}

fn adopt_vpc<S: NetworkScope>(scope: &mut S, vpc: &Vpc) {
    scope.set_vpc_id(vpc.vpc_id.clone());
    if let Some(name) = name_from_tags(&vpc.tags) {
        scope.set_vpc_name(name.to_string());
    }
}
