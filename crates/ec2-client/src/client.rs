//! EC2 API client
//!
//! Implements the EC2 client over the AWS SDK. Every resource created
//! here is tagged with the ownership marker so the deletion paths can
//! tell system-created resources from pre-existing ones.

use crate::error::Ec2Error;
use crate::models::*;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::config::Credentials;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types as sdk;
use tracing::debug;

/// Static AWS credentials, typically read from a Kubernetes secret.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    /// AWS access key ID
    pub access_key_id: String,
    /// AWS secret access key
    pub secret_access_key: String,
}

/// EC2 API client
pub struct Ec2Client {
    inner: aws_sdk_ec2::Client,
}

impl std::fmt::Debug for Ec2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Client").finish_non_exhaustive()
    }
}

fn sdk_err<E, R>(op: &str, err: SdkError<E, R>) -> Ec2Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err
        .as_service_error()
        .and_then(ProvideErrorMetadata::code)
        .unwrap_or_default()
        .to_string();
    // EC2 reports missing resources with per-type codes such as
    // InvalidVpcID.NotFound or InvalidInstanceID.NotFound.
    if code.contains("NotFound") {
        Ec2Error::NotFound(format!("{op}: {code}"))
    } else {
        Ec2Error::Api(format!("{op}: {}", DisplayErrorContext(&err)))
    }
}

fn tags_from_sdk(tags: &[sdk::Tag]) -> Vec<Tag> {
    tags.iter()
        .map(|t| Tag::new(t.key().unwrap_or_default(), t.value().unwrap_or_default()))
        .collect()
}

fn tag_spec(resource_type: sdk::ResourceType, name: &str) -> sdk::TagSpecification {
    sdk::TagSpecification::builder()
        .resource_type(resource_type)
        .tags(sdk::Tag::builder().key(NAME_TAG_KEY).value(name).build())
        .tags(
            sdk::Tag::builder()
                .key(MANAGED_TAG_KEY)
                .value(MANAGED_TAG_VALUE)
                .build(),
        )
        .build()
}

fn vpc_from_sdk(vpc: &sdk::Vpc) -> Vpc {
    Vpc {
        vpc_id: vpc.vpc_id().unwrap_or_default().to_string(),
        cidr_block: vpc.cidr_block().unwrap_or_default().to_string(),
        tags: tags_from_sdk(vpc.tags()),
    }
}

fn subnet_from_sdk(subnet: &sdk::Subnet) -> Subnet {
    Subnet {
        subnet_id: subnet.subnet_id().unwrap_or_default().to_string(),
        vpc_id: subnet.vpc_id().unwrap_or_default().to_string(),
        cidr_block: subnet.cidr_block().unwrap_or_default().to_string(),
        tags: tags_from_sdk(subnet.tags()),
    }
}

fn instance_from_sdk(instance: &sdk::Instance) -> Instance {
    Instance {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_default(),
        public_ip: instance
            .network_interfaces()
            .first()
            .and_then(|ni| ni.association())
            .and_then(|a| a.public_ip())
            .map(str::to_string),
        tags: tags_from_sdk(instance.tags()),
    }
}

fn image_from_sdk(image: &sdk::Image) -> Image {
    Image {
        image_id: image.image_id().unwrap_or_default().to_string(),
        name: image.name().unwrap_or_default().to_string(),
        state: ImageState::from_provider(image.state().map(|s| s.as_str()).unwrap_or_default()),
        creation_date: image.creation_date().unwrap_or_default().to_string(),
    }
}

impl Ec2Client {
    /// Create a new EC2 client bound to a region.
    ///
    /// With `credentials` the client authenticates with the given static
    /// key pair; without, the default provider chain applies (environment,
    /// instance profile, ...).
    pub async fn new(region: impl Into<String>, credentials: Option<StaticCredentials>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.into()));
        if let Some(creds) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id,
                creds.secret_access_key,
                None,
                None,
                "forge-provider-aws",
            ));
        }
        let config = loader.load().await;
        Self {
            inner: aws_sdk_ec2::Client::new(&config),
        }
    }

    async fn tags_of_vpc(&self, vpc_id: &str) -> Result<Vec<Tag>, Ec2Error> {
        let output = self
            .inner
            .describe_vpcs()
            .vpc_ids(vpc_id)
            .send()
            .await
            .map_err(|e| sdk_err("describe VPC", e))?;
        let vpc = output
            .vpcs()
            .first()
            .ok_or_else(|| Ec2Error::NotFound(format!("VPC {vpc_id}")))?;
        Ok(tags_from_sdk(vpc.tags()))
    }

    /// Adds the default route through the gateway to the VPC's main route
    /// table. An already-present route counts as success.
    async fn configure_route_table(&self, vpc_id: &str, igw_id: &str) -> Result<(), Ec2Error> {
        let output = self
            .inner
            .describe_route_tables()
            .filters(sdk::Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                sdk::Filter::builder()
                    .name("association.main")
                    .values("true")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("describe route tables", e))?;

        let route_table_id = output
            .route_tables()
            .first()
            .and_then(|rt| rt.route_table_id())
            .ok_or_else(|| Ec2Error::Api(format!("no main route table found for VPC {vpc_id}")))?
            .to_string();

        if let Err(err) = self
            .inner
            .create_route()
            .route_table_id(&route_table_id)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(igw_id)
            .send()
            .await
        {
            let code = err
                .as_service_error()
                .and_then(ProvideErrorMetadata::code)
                .unwrap_or_default();
            if code != "RouteAlreadyExists" {
                return Err(sdk_err("create default route", err));
            }
        }

        Ok(())
    }

    async fn find_internet_gateway(&self, vpc_id: &str) -> Result<Option<String>, Ec2Error> {
        let output = self
            .inner
            .describe_internet_gateways()
            .filters(
                sdk::Filter::builder()
                    .name("attachment.vpc-id")
                    .values(vpc_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("describe internet gateways", e))?;
        Ok(output
            .internet_gateways()
            .first()
            .and_then(|igw| igw.internet_gateway_id())
            .map(str::to_string))
    }
}

#[async_trait::async_trait]
impl crate::ec2_trait::Ec2ClientTrait for Ec2Client {
    async fn find_vpc_by_id(&self, vpc_id: &str) -> Result<Option<Vpc>, Ec2Error> {
        debug!(vpc_id, "looking up VPC by id");
        match self.inner.describe_vpcs().vpc_ids(vpc_id).send().await {
            Ok(output) => Ok(output.vpcs().first().map(vpc_from_sdk)),
            Err(err) => match sdk_err("describe VPC", err) {
                Ec2Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn find_vpc_by_name(&self, name: &str) -> Result<Option<Vpc>, Ec2Error> {
        debug!(name, "looking up VPC by Name tag");
        let output = self
            .inner
            .describe_vpcs()
            .filters(sdk::Filter::builder().name("tag:Name").values(name).build())
            .send()
            .await
            .map_err(|e| sdk_err("describe VPCs by name", e))?;
        Ok(output.vpcs().first().map(vpc_from_sdk))
    }

    async fn get_vpc(&self, vpc_id: &str) -> Result<Vpc, Ec2Error> {
        self.find_vpc_by_id(vpc_id)
            .await?
            .ok_or_else(|| Ec2Error::NotFound(format!("VPC {vpc_id}")))
    }

    async fn create_vpc(&self, spec: &VpcSpec) -> Result<Vpc, Ec2Error> {
        debug!(cidr = %spec.cidr_block, name = %spec.name, "creating VPC");
        let output = self
            .inner
            .create_vpc()
            .cidr_block(&spec.cidr_block)
            .tag_specifications(tag_spec(sdk::ResourceType::Vpc, &spec.name))
            .send()
            .await
            .map_err(|e| sdk_err("create VPC", e))?;
        let vpc = output
            .vpc()
            .ok_or_else(|| Ec2Error::Api("create VPC returned no VPC".to_string()))?;
        Ok(vpc_from_sdk(vpc))
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| sdk_err("delete VPC", e))?;
        Ok(())
    }

    async fn is_managed_vpc(&self, vpc_id: &str) -> Result<bool, Ec2Error> {
        Ok(has_managed_tag(&self.tags_of_vpc(vpc_id).await?))
    }

    async fn ensure_internet_gateway(&self, vpc_id: &str) -> Result<String, Ec2Error> {
        if let Some(igw_id) = self.find_internet_gateway(vpc_id).await? {
            self.configure_route_table(vpc_id, &igw_id).await?;
            return Ok(igw_id);
        }

        let output = self
            .inner
            .create_internet_gateway()
            .send()
            .await
            .map_err(|e| sdk_err("create internet gateway", e))?;
        let igw_id = output
            .internet_gateway()
            .and_then(|igw| igw.internet_gateway_id())
            .ok_or_else(|| Ec2Error::Api("create internet gateway returned no id".to_string()))?
            .to_string();

        self.inner
            .attach_internet_gateway()
            .internet_gateway_id(&igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| sdk_err("attach internet gateway", e))?;

        self.configure_route_table(vpc_id, &igw_id).await?;
        Ok(igw_id)
    }

    async fn detach_and_delete_internet_gateways(&self, vpc_id: &str) -> Result<(), Ec2Error> {
        let output = self
            .inner
            .describe_internet_gateways()
            .filters(
                sdk::Filter::builder()
                    .name("attachment.vpc-id")
                    .values(vpc_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("describe internet gateways", e))?;

        for igw in output.internet_gateways() {
            let Some(igw_id) = igw.internet_gateway_id() else {
                continue;
            };
            self.inner
                .detach_internet_gateway()
                .internet_gateway_id(igw_id)
                .vpc_id(vpc_id)
                .send()
                .await
                .map_err(|e| sdk_err("detach internet gateway", e))?;
            self.inner
                .delete_internet_gateway()
                .internet_gateway_id(igw_id)
                .send()
                .await
                .map_err(|e| sdk_err("delete internet gateway", e))?;
        }

        Ok(())
    }

    async fn find_subnet_by_id(&self, subnet_id: &str) -> Result<Subnet, Ec2Error> {
        let output = self
            .inner
            .describe_subnets()
            .subnet_ids(subnet_id)
            .send()
            .await
            .map_err(|e| sdk_err("describe subnet", e))?;
        output
            .subnets()
            .first()
            .map(subnet_from_sdk)
            .ok_or_else(|| Ec2Error::NotFound(format!("subnet {subnet_id}")))
    }

    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>, Ec2Error> {
        let output = self
            .inner
            .describe_subnets()
            .filters(sdk::Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .map_err(|e| sdk_err("describe subnets", e))?;
        Ok(output.subnets().iter().map(subnet_from_sdk).collect())
    }

    async fn create_subnet(&self, spec: &SubnetSpec) -> Result<Subnet, Ec2Error> {
        debug!(vpc_id = %spec.vpc_id, cidr = %spec.cidr_block, "creating subnet");
        let output = self
            .inner
            .create_subnet()
            .vpc_id(&spec.vpc_id)
            .cidr_block(&spec.cidr_block)
            .tag_specifications(tag_spec(sdk::ResourceType::Subnet, &spec.name))
            .send()
            .await
            .map_err(|e| sdk_err("create subnet", e))?;
        let subnet = output
            .subnet()
            .ok_or_else(|| Ec2Error::Api("create subnet returned no subnet".to_string()))?;
        Ok(subnet_from_sdk(subnet))
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| sdk_err("delete subnet", e))?;
        Ok(())
    }

    async fn is_managed_subnet(&self, subnet_id: &str) -> Result<bool, Ec2Error> {
        match self.find_subnet_by_id(subnet_id).await {
            Ok(subnet) => Ok(has_managed_tag(&subnet.tags)),
            Err(Ec2Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, Ec2Error> {
        debug!(vpc_id = %spec.vpc_id, name = %spec.name, "creating security group");
        let output = self
            .inner
            .create_security_group()
            .group_name(&spec.name)
            .description("Security Group managed by Forge")
            .vpc_id(&spec.vpc_id)
            .tag_specifications(tag_spec(sdk::ResourceType::SecurityGroup, &spec.name))
            .send()
            .await
            .map_err(|e| sdk_err("create security group", e))?;
        let group_id = output
            .group_id()
            .ok_or_else(|| Ec2Error::Api("create security group returned no id".to_string()))?
            .to_string();
        Ok(SecurityGroup {
            group_id,
            group_name: spec.name.clone(),
            tags: managed_tags(&spec.name),
        })
    }

    async fn authorize_ssh_ingress(&self, group_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(
                sdk::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(
                        sdk::IpRange::builder()
                            .cidr_ip("0.0.0.0/0")
                            .description("Allow SSH from anywhere")
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("authorize SSH ingress", e))?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| sdk_err("delete security group", e))?;
        Ok(())
    }

    async fn is_managed_security_group(&self, group_id: &str) -> Result<bool, Ec2Error> {
        let output = self
            .inner
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await
            .map_err(|e| sdk_err("describe security group", e))?;
        Ok(output
            .security_groups()
            .first()
            .is_some_and(|sg| has_managed_tag(&tags_from_sdk(sg.tags()))))
    }

    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<Instance>, Ec2Error> {
        match self
            .inner
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(output) => Ok(output
                .reservations()
                .iter()
                .flat_map(|r| r.instances())
                .find(|i| i.instance_id() == Some(instance_id))
                .map(instance_from_sdk)),
            Err(err) => match sdk_err("describe instance", err) {
                Ec2Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_instance(&self, params: &CreateInstanceParams) -> Result<Instance, Ec2Error> {
        if params.ami_id.is_empty() {
            return Err(Ec2Error::InvalidRequest("AMI ID not provided".to_string()));
        }
        if params.instance_type.is_empty() {
            return Err(Ec2Error::InvalidRequest(
                "instance type not provided".to_string(),
            ));
        }

        let network_interface = sdk::InstanceNetworkInterfaceSpecification::builder()
            .device_index(0)
            .associate_public_ip_address(params.public_ip)
            .subnet_id(&params.subnet_id)
            .groups(&params.security_group_id)
            .build();

        debug!(ami = %params.ami_id, instance_type = %params.instance_type, "launching instance");
        let output = self
            .inner
            .run_instances()
            .image_id(&params.ami_id)
            .instance_type(sdk::InstanceType::from(params.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .user_data(&params.user_data)
            .network_interfaces(network_interface)
            .tag_specifications(tag_spec(sdk::ResourceType::Instance, &params.name))
            .send()
            .await
            .map_err(|e| sdk_err("run instance", e))?;

        let instance = output
            .instances()
            .first()
            .ok_or_else(|| Ec2Error::Api("no instances launched".to_string()))?;
        Ok(instance_from_sdk(instance))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_err("terminate instance", e))?;
        Ok(())
    }

    async fn is_managed_instance(&self, instance_id: &str) -> Result<bool, Ec2Error> {
        match self.find_instance_by_id(instance_id).await? {
            Some(instance) => Ok(has_managed_tag(&instance.tags)),
            None => Ok(false),
        }
    }

    async fn list_images_by_name(&self, name: &str) -> Result<Vec<Image>, Ec2Error> {
        let output = self
            .inner
            .describe_images()
            .owners("self")
            .filters(sdk::Filter::builder().name("name").values(name).build())
            .send()
            .await
            .map_err(|e| sdk_err("describe images", e))?;
        Ok(output.images().iter().map(image_from_sdk).collect())
    }

    async fn find_image_by_name(&self, name: &str) -> Result<Option<Image>, Ec2Error> {
        Ok(self.list_images_by_name(name).await?.into_iter().next())
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<(), Ec2Error> {
        debug!(instance_id, name, "creating image");
        self.inner
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .no_reboot(true)
            .description(format!("AMI created from instance {instance_id}"))
            .send()
            .await
            .map_err(|e| sdk_err("create image", e))?;
        Ok(())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<(), Ec2Error> {
        self.inner
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .map_err(|e| sdk_err("deregister image", e))?;
        Ok(())
    }
}
