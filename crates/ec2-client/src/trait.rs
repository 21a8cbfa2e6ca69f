//! Ec2Client trait for mocking
//!
//! This trait abstracts the EC2 client to enable mocking in unit tests.
//! The concrete `Ec2Client` implements this trait, and tests use the
//! `MockEc2Client` implementation instead.

use crate::error::Ec2Error;
use crate::models::*;

/// Trait for the EC2 API operations the AWSBuild pipeline performs
///
/// One method per operation; retries and backoff for transient provider
/// errors are the concrete client's (and the SDK's) concern, never the
/// caller's. All async methods must be `Send` to work with Tokio's
/// work-stealing runtime.
#[async_trait::async_trait]
pub trait Ec2ClientTrait: Send + Sync {
    // VPC operations
    /// Look up a VPC by ID. Returns `Ok(None)` when the ID is unknown.
    async fn find_vpc_by_id(&self, vpc_id: &str) -> Result<Option<Vpc>, Ec2Error>;
    /// Look up a VPC by its `Name` tag.
    async fn find_vpc_by_name(&self, name: &str) -> Result<Option<Vpc>, Ec2Error>;
    /// Fetch a VPC that is expected to exist.
    async fn get_vpc(&self, vpc_id: &str) -> Result<Vpc, Ec2Error>;
    /// Create a VPC carrying the ownership marker tag.
    async fn create_vpc(&self, spec: &VpcSpec) -> Result<Vpc, Ec2Error>;
    /// Delete a VPC.
    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), Ec2Error>;
    /// True when the VPC carries the ownership marker tag.
    async fn is_managed_vpc(&self, vpc_id: &str) -> Result<bool, Ec2Error>;

    // Internet gateway operations
    /// Find or create the internet gateway attached to the VPC, and make
    /// sure the VPC's main route table has a default route through it.
    /// Returns the gateway ID.
    async fn ensure_internet_gateway(&self, vpc_id: &str) -> Result<String, Ec2Error>;
    /// Detach and delete every internet gateway attached to the VPC.
    async fn detach_and_delete_internet_gateways(&self, vpc_id: &str) -> Result<(), Ec2Error>;

    // Subnet operations
    /// Fetch a subnet by ID; absent subnets are a `NotFound` error.
    async fn find_subnet_by_id(&self, subnet_id: &str) -> Result<Subnet, Ec2Error>;
    /// List every subnet in the VPC.
    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>, Ec2Error>;
    /// Create a subnet carrying the ownership marker tag.
    async fn create_subnet(&self, spec: &SubnetSpec) -> Result<Subnet, Ec2Error>;
    /// Delete a subnet.
    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), Ec2Error>;
    /// True when the subnet carries the ownership marker tag.
    /// Absent subnets report `false`.
    async fn is_managed_subnet(&self, subnet_id: &str) -> Result<bool, Ec2Error>;

    // Security group operations
    /// Create a security group carrying the ownership marker tag.
    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, Ec2Error>;
    /// Authorize the fixed SSH ingress rule (TCP 22 from 0.0.0.0/0).
    async fn authorize_ssh_ingress(&self, group_id: &str) -> Result<(), Ec2Error>;
    /// Delete a security group.
    async fn delete_security_group(&self, group_id: &str) -> Result<(), Ec2Error>;
    /// True when the security group carries the ownership marker tag.
    async fn is_managed_security_group(&self, group_id: &str) -> Result<bool, Ec2Error>;

    // Instance operations
    /// Look up an instance by ID. Returns `Ok(None)` when it is gone.
    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<Instance>, Ec2Error>;
    /// Launch an instance carrying the ownership marker tag.
    async fn create_instance(&self, params: &CreateInstanceParams) -> Result<Instance, Ec2Error>;
    /// Issue a terminate call; completion is observed on later lookups.
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), Ec2Error>;
    /// True when the instance carries the ownership marker tag.
    /// Absent instances report `false`.
    async fn is_managed_instance(&self, instance_id: &str) -> Result<bool, Ec2Error>;

    // Image operations
    /// List every self-owned image with the given name.
    async fn list_images_by_name(&self, name: &str) -> Result<Vec<Image>, Ec2Error>;
    /// First self-owned image with the given name, if any.
    async fn find_image_by_name(&self, name: &str) -> Result<Option<Image>, Ec2Error>;
    /// Create an image from the instance's root volume without rebooting it.
    async fn create_image(&self, instance_id: &str, name: &str) -> Result<(), Ec2Error>;
    /// Deregister an image.
    async fn deregister_image(&self, image_id: &str) -> Result<(), Ec2Error>;
}
