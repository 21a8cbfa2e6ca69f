//! AWS EC2 Client
//!
//! A Rust client library for the EC2 operations the AWSBuild controller
//! drives: VPCs, subnets, security groups, instances and machine images.
//! Provides lightweight wire models, a mockable trait, and the CIDR
//! allocation used when carving subnets out of a VPC block.
//!
//! # Example
//!
//! ```no_run
//! use ec2_client::{Ec2Client, Ec2ClientTrait, VpcSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client bound to a region, using the default credential chain
//! let client = Ec2Client::new("eu-west-1", None).await;
//!
//! // Look up a VPC by its Name tag
//! let vpc = client.find_vpc_by_name("my-build-forge-vpc").await?;
//!
//! // Create one if it does not exist
//! if vpc.is_none() {
//!     let spec = VpcSpec {
//!         cidr_block: "10.0.0.0/16".to_string(),
//!         name: "my-build-forge-vpc".to_string(),
//!     };
//!     client.create_vpc(&spec).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Ownership tagging**: every resource created here carries the
//!   `forge-managed` marker tag used to gate deletion
//! - **CIDR allocation**: deterministic next-free-block scan for subnets
//! - **Mocking**: `MockEc2Client` behind the `test-util` feature

pub mod cidr;
pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod ec2_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{Ec2Client, StaticCredentials};
pub use ec2_trait::Ec2ClientTrait;
pub use error::Ec2Error;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockEc2Client;
