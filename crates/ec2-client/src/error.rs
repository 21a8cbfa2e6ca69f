//! EC2 client errors

use thiserror::Error;

/// Errors that can occur when interacting with the EC2 API
#[derive(Debug, Error)]
pub enum Ec2Error {
    /// EC2 API returned an error
    #[error("EC2 API error: {0}")]
    Api(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A CIDR string could not be parsed
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),

    /// No free block of the requested size remains in the parent CIDR
    #[error("no available CIDR block in {0}")]
    CidrExhausted(String),

    /// Invalid request (e.g., missing required fields)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Ec2Error {
    /// True when the error indicates the resource is absent from EC2.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Ec2Error::NotFound(_))
    }
}
