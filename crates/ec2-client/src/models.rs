//! EC2 wire models
//!
//! Crate-local views of the EC2 resources the controller works with.
//! Only the fields the reconcilers actually read are carried; the SDK
//! types stay an implementation detail of the concrete client.

/// Tag key marking a resource as created (and deletable) by this system.
///
/// This is the wire-level ownership contract: resources without this tag
/// are never deleted, whatever else claims them.
pub const MANAGED_TAG_KEY: &str = "forge-managed";

/// Tag value paired with [`MANAGED_TAG_KEY`].
pub const MANAGED_TAG_VALUE: &str = "true";

/// Standard EC2 name tag key.
pub const NAME_TAG_KEY: &str = "Name";

/// A single EC2 resource tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

impl Tag {
    /// Convenience constructor.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Returns the value of the `Name` tag, if present.
pub fn name_from_tags(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|t| t.key == NAME_TAG_KEY)
        .map(|t| t.value.as_str())
}

/// True when the ownership marker tag is present.
pub fn has_managed_tag(tags: &[Tag]) -> bool {
    tags.iter()
        .any(|t| t.key == MANAGED_TAG_KEY && t.value == MANAGED_TAG_VALUE)
}

/// Returns the two tags every resource created by this system carries.
pub fn managed_tags(name: &str) -> Vec<Tag> {
    vec![
        Tag::new(NAME_TAG_KEY, name),
        Tag::new(MANAGED_TAG_KEY, MANAGED_TAG_VALUE),
    ]
}

/// A VPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    /// VPC ID (e.g. `vpc-0123`)
    pub vpc_id: String,
    /// Primary IPv4 CIDR block
    pub cidr_block: String,
    /// Resource tags
    pub tags: Vec<Tag>,
}

/// Parameters for creating a VPC.
#[derive(Debug, Clone)]
pub struct VpcSpec {
    /// IPv4 CIDR block for the VPC
    pub cidr_block: String,
    /// Value of the `Name` tag
    pub name: String,
}

/// A subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Subnet ID (e.g. `subnet-0123`)
    pub subnet_id: String,
    /// Owning VPC ID
    pub vpc_id: String,
    /// IPv4 CIDR block
    pub cidr_block: String,
    /// Resource tags
    pub tags: Vec<Tag>,
}

/// Parameters for creating a subnet.
#[derive(Debug, Clone)]
pub struct SubnetSpec {
    /// VPC to create the subnet in
    pub vpc_id: String,
    /// IPv4 CIDR block for the subnet
    pub cidr_block: String,
    /// Value of the `Name` tag
    pub name: String,
}

/// A security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    /// Security group ID (e.g. `sg-0123`)
    pub group_id: String,
    /// Group name
    pub group_name: String,
    /// Resource tags
    pub tags: Vec<Tag>,
}

/// Parameters for creating a security group.
#[derive(Debug, Clone)]
pub struct SecurityGroupSpec {
    /// VPC to create the group in
    pub vpc_id: String,
    /// Group name (also used for the `Name` tag)
    pub name: String,
}

/// An EC2 instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Instance ID (e.g. `i-0123`)
    pub instance_id: String,
    /// Provider-reported state name (lowercase, e.g. `running`)
    pub state: String,
    /// Public IPv4 address of the primary interface, if any
    pub public_ip: Option<String>,
    /// Resource tags
    pub tags: Vec<Tag>,
}

/// Parameters for launching an instance.
#[derive(Debug, Clone)]
pub struct CreateInstanceParams {
    /// Value of the `Name` tag
    pub name: String,
    /// Machine image to boot from
    pub ami_id: String,
    /// EC2 instance type (e.g. `t3.micro`)
    pub instance_type: String,
    /// Base64-encoded cloud-init user data
    pub user_data: String,
    /// Whether to associate a public IP with the primary interface
    pub public_ip: bool,
    /// Subnet for the primary interface
    pub subnet_id: String,
    /// Security group for the primary interface
    pub security_group_id: String,
}

/// State of a machine image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// Image is ready for use
    Available,
    /// Image creation is in flight
    Pending,
    /// Any other provider-reported state
    Other(String),
}

impl ImageState {
    /// Maps a provider state name onto the states the controller acts on.
    pub fn from_provider(state: &str) -> Self {
        match state {
            "available" => ImageState::Available,
            "pending" => ImageState::Pending,
            other => ImageState::Other(other.to_string()),
        }
    }
}

/// A machine image (AMI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image ID (e.g. `ami-0123`)
    pub image_id: String,
    /// Image name
    pub name: String,
    /// Image state
    pub state: ImageState,
    /// RFC 3339 creation timestamp as reported by the provider
    pub creation_date: String,
}
