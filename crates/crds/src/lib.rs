//! Forge AWSBuild CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the AWSBuild controller.

pub mod aws_build;
pub mod references;

pub use aws_build::*;
pub use references::*;
