//! Mock EC2 client for unit testing
//!
//! In-memory implementation of `Ec2ClientTrait` that stores resources in
//! hash maps and counts mutating calls, so tests can assert both on the
//! resulting cloud state and on how many create/terminate/deregister
//! calls a reconciliation pass actually issued.

use crate::error::Ec2Error;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock EC2 client for testing
#[derive(Debug, Clone, Default)]
pub struct MockEc2Client {
    vpcs: Arc<Mutex<HashMap<String, Vpc>>>,
    subnets: Arc<Mutex<HashMap<String, Subnet>>>,
    security_groups: Arc<Mutex<HashMap<String, SecurityGroup>>>,
    // group_id -> authorized ingress rules ("tcp/22 from 0.0.0.0/0")
    ingress_rules: Arc<Mutex<HashMap<String, Vec<String>>>>,
    instances: Arc<Mutex<HashMap<String, Instance>>>,
    images: Arc<Mutex<Vec<Image>>>,
    // vpc_id -> attached internet gateway id
    internet_gateways: Arc<Mutex<HashMap<String, String>>>,
    call_counts: Arc<Mutex<HashMap<&'static str, u32>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockEc2Client {
    /// Create an empty mock client.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn count(&self, op: &'static str) {
        *self.call_counts.lock().unwrap().entry(op).or_insert(0) += 1;
    }

    /// Number of times the named mutating operation was invoked
    /// (e.g. `"create_vpc"`, `"terminate_instance"`).
    pub fn call_count(&self, op: &str) -> u32 {
        self.call_counts.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Add a VPC to the mock store (for test setup)
    pub fn add_vpc(&self, vpc: Vpc) {
        self.vpcs.lock().unwrap().insert(vpc.vpc_id.clone(), vpc);
    }

    /// Add a subnet to the mock store (for test setup)
    pub fn add_subnet(&self, subnet: Subnet) {
        self.subnets
            .lock()
            .unwrap()
            .insert(subnet.subnet_id.clone(), subnet);
    }

    /// Add a security group to the mock store (for test setup)
    pub fn add_security_group(&self, group: SecurityGroup) {
        self.security_groups
            .lock()
            .unwrap()
            .insert(group.group_id.clone(), group);
    }

    /// Add an instance to the mock store (for test setup)
    pub fn add_instance(&self, instance: Instance) {
        self.instances
            .lock()
            .unwrap()
            .insert(instance.instance_id.clone(), instance);
    }

    /// Add an image to the mock store (for test setup)
    pub fn add_image(&self, image: Image) {
        self.images.lock().unwrap().push(image);
    }

    /// Overwrite a stored instance's provider state (for test setup)
    pub fn set_instance_state(&self, instance_id: &str, state: &str) {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(instance_id) {
            instance.state = state.to_string();
        }
    }

    /// Snapshot of the stored images
    pub fn images(&self) -> Vec<Image> {
        self.images.lock().unwrap().clone()
    }

    /// Ingress rules authorized on a security group
    pub fn ingress_rules(&self, group_id: &str) -> Vec<String> {
        self.ingress_rules
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    /// True when the subnet is still present in the mock store
    pub fn subnet_exists(&self, subnet_id: &str) -> bool {
        self.subnets.lock().unwrap().contains_key(subnet_id)
    }

    /// True when the VPC is still present in the mock store
    pub fn vpc_exists(&self, vpc_id: &str) -> bool {
        self.vpcs.lock().unwrap().contains_key(vpc_id)
    }

    /// True when the security group is still present in the mock store
    pub fn security_group_exists(&self, group_id: &str) -> bool {
        self.security_groups.lock().unwrap().contains_key(group_id)
    }
}

#[async_trait::async_trait]
impl crate::ec2_trait::Ec2ClientTrait for MockEc2Client {
    async fn find_vpc_by_id(&self, vpc_id: &str) -> Result<Option<Vpc>, Ec2Error> {
        Ok(self.vpcs.lock().unwrap().get(vpc_id).cloned())
    }

    async fn find_vpc_by_name(&self, name: &str) -> Result<Option<Vpc>, Ec2Error> {
        Ok(self
            .vpcs
            .lock()
            .unwrap()
            .values()
            .find(|v| name_from_tags(&v.tags) == Some(name))
            .cloned())
    }

    async fn get_vpc(&self, vpc_id: &str) -> Result<Vpc, Ec2Error> {
        self.vpcs
            .lock()
            .unwrap()
            .get(vpc_id)
            .cloned()
            .ok_or_else(|| Ec2Error::NotFound(format!("VPC {vpc_id}")))
    }

    async fn create_vpc(&self, spec: &VpcSpec) -> Result<Vpc, Ec2Error> {
        self.count("create_vpc");
        let vpc = Vpc {
            vpc_id: format!("vpc-{:08x}", self.next_id()),
            cidr_block: spec.cidr_block.clone(),
            tags: managed_tags(&spec.name),
        };
        self.add_vpc(vpc.clone());
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), Ec2Error> {
        self.count("delete_vpc");
        self.vpcs
            .lock()
            .unwrap()
            .remove(vpc_id)
            .map(|_| ())
            .ok_or_else(|| Ec2Error::NotFound(format!("VPC {vpc_id}")))
    }

    async fn is_managed_vpc(&self, vpc_id: &str) -> Result<bool, Ec2Error> {
        let vpc = self.get_vpc(vpc_id).await?;
        Ok(has_managed_tag(&vpc.tags))
    }

    async fn ensure_internet_gateway(&self, vpc_id: &str) -> Result<String, Ec2Error> {
        if !self.vpcs.lock().unwrap().contains_key(vpc_id) {
            return Err(Ec2Error::NotFound(format!("VPC {vpc_id}")));
        }
        let mut gateways = self.internet_gateways.lock().unwrap();
        if let Some(igw_id) = gateways.get(vpc_id) {
            return Ok(igw_id.clone());
        }
        self.count("create_internet_gateway");
        let igw_id = format!("igw-{:08x}", self.next_id());
        gateways.insert(vpc_id.to_string(), igw_id.clone());
        Ok(igw_id)
    }

    async fn detach_and_delete_internet_gateways(&self, vpc_id: &str) -> Result<(), Ec2Error> {
        self.internet_gateways.lock().unwrap().remove(vpc_id);
        Ok(())
    }

    async fn find_subnet_by_id(&self, subnet_id: &str) -> Result<Subnet, Ec2Error> {
        self.subnets
            .lock()
            .unwrap()
            .get(subnet_id)
            .cloned()
            .ok_or_else(|| Ec2Error::NotFound(format!("subnet {subnet_id}")))
    }

    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>, Ec2Error> {
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn create_subnet(&self, spec: &SubnetSpec) -> Result<Subnet, Ec2Error> {
        self.count("create_subnet");
        let subnet = Subnet {
            subnet_id: format!("subnet-{:08x}", self.next_id()),
            vpc_id: spec.vpc_id.clone(),
            cidr_block: spec.cidr_block.clone(),
            tags: managed_tags(&spec.name),
        };
        self.add_subnet(subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), Ec2Error> {
        self.count("delete_subnet");
        self.subnets
            .lock()
            .unwrap()
            .remove(subnet_id)
            .map(|_| ())
            .ok_or_else(|| Ec2Error::NotFound(format!("subnet {subnet_id}")))
    }

    async fn is_managed_subnet(&self, subnet_id: &str) -> Result<bool, Ec2Error> {
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .get(subnet_id)
            .is_some_and(|s| has_managed_tag(&s.tags)))
    }

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, Ec2Error> {
        self.count("create_security_group");
        let group = SecurityGroup {
            group_id: format!("sg-{:08x}", self.next_id()),
            group_name: spec.name.clone(),
            tags: managed_tags(&spec.name),
        };
        self.add_security_group(group.clone());
        Ok(group)
    }

    async fn authorize_ssh_ingress(&self, group_id: &str) -> Result<(), Ec2Error> {
        if !self.security_groups.lock().unwrap().contains_key(group_id) {
            return Err(Ec2Error::NotFound(format!("security group {group_id}")));
        }
        self.count("authorize_ssh_ingress");
        self.ingress_rules
            .lock()
            .unwrap()
            .entry(group_id.to_string())
            .or_default()
            .push("tcp/22 from 0.0.0.0/0".to_string());
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), Ec2Error> {
        self.count("delete_security_group");
        self.security_groups
            .lock()
            .unwrap()
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| Ec2Error::NotFound(format!("security group {group_id}")))
    }

    async fn is_managed_security_group(&self, group_id: &str) -> Result<bool, Ec2Error> {
        self.security_groups
            .lock()
            .unwrap()
            .get(group_id)
            .map(|g| has_managed_tag(&g.tags))
            .ok_or_else(|| Ec2Error::NotFound(format!("security group {group_id}")))
    }

    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<Instance>, Ec2Error> {
        Ok(self.instances.lock().unwrap().get(instance_id).cloned())
    }

    async fn create_instance(&self, params: &CreateInstanceParams) -> Result<Instance, Ec2Error> {
        if params.ami_id.is_empty() {
            return Err(Ec2Error::InvalidRequest("AMI ID not provided".to_string()));
        }
        self.count("create_instance");
        let instance = Instance {
            instance_id: format!("i-{:08x}", self.next_id()),
            state: "pending".to_string(),
            public_ip: params.public_ip.then(|| "198.51.100.10".to_string()),
            tags: managed_tags(&params.name),
        };
        self.add_instance(instance.clone());
        Ok(instance)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), Ec2Error> {
        self.count("terminate_instance");
        self.set_instance_state(instance_id, "shutting-down");
        Ok(())
    }

    async fn is_managed_instance(&self, instance_id: &str) -> Result<bool, Ec2Error> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(instance_id)
            .is_some_and(|i| has_managed_tag(&i.tags)))
    }

    async fn list_images_by_name(&self, name: &str) -> Result<Vec<Image>, Ec2Error> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    async fn find_image_by_name(&self, name: &str) -> Result<Option<Image>, Ec2Error> {
        Ok(self.list_images_by_name(name).await?.into_iter().next())
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<(), Ec2Error> {
        if !self.instances.lock().unwrap().contains_key(instance_id) {
            return Err(Ec2Error::NotFound(format!("instance {instance_id}")));
        }
        self.count("create_image");
        self.add_image(Image {
            image_id: format!("ami-{:08x}", self.next_id()),
            name: name.to_string(),
            state: ImageState::Pending,
            // Far enough in the future that a freshly created export is
            // never mistaken for a stale image by the collision guard.
            creation_date: "2100-01-01T00:00:00Z".to_string(),
        });
        Ok(())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<(), Ec2Error> {
        self.count("deregister_image");
        let mut images = self.images.lock().unwrap();
        let before = images.len();
        images.retain(|i| i.image_id != image_id);
        if images.len() == before {
            return Err(Ec2Error::NotFound(format!("image {image_id}")));
        }
        Ok(())
    }
}
