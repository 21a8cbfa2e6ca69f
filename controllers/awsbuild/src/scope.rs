//! Build scope: the shared state of one reconciliation pass.
//!
//! `BuildScope` carries a working copy of the `AWSBuild` resource plus the
//! bound cloud and credentials collaborators. The pipeline stages read the
//! identifiers recorded by earlier stages and write their own back; the
//! orchestrator persists the whole scope once, when the pass ends.

use crate::credentials::{CredentialsStore, SshCredentials, SshKeyPair};
use crate::error::ControllerError;
use base64::Engine;
use chrono::{DateTime, Utc};
use crds::{AWSBuild, AWSBuildStatus, InstanceStatus, BUILD_FINALIZER};
use ec2_client::{Ec2ClientTrait, VpcSpec};
use std::sync::Arc;

/// Address block used for VPCs this system creates.
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

/// Shared mutable state handed through the pipeline stages in order.
pub struct BuildScope {
    build: AWSBuild,
    name: String,
    namespace: String,
    cloud: Arc<dyn Ec2ClientTrait>,
    credentials: Arc<dyn CredentialsStore>,
    ssh_key: SshKeyPair,
}

impl std::fmt::Debug for BuildScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildScope")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl BuildScope {
    /// Wraps a build and its collaborators into a scope.
    pub fn new(
        mut build: AWSBuild,
        cloud: Arc<dyn Ec2ClientTrait>,
        credentials: Arc<dyn CredentialsStore>,
        ssh_key: SshKeyPair,
    ) -> Result<Self, ControllerError> {
        let name = build
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("AWSBuild missing name".to_string()))?;
        let namespace = build
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        build.status.get_or_insert_with(AWSBuildStatus::default);
        Ok(Self {
            build,
            name,
            namespace,
            cloud,
            credentials,
            ssh_key,
        })
    }

    /// Name of the build.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of the build.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The bound cloud client.
    pub fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        Arc::clone(&self.cloud)
    }

    /// The underlying resource, as far as this pass has progressed.
    pub fn build(&self) -> &AWSBuild {
        &self.build
    }

    fn status_mut(&mut self) -> &mut AWSBuildStatus {
        self.build.status.get_or_insert_with(AWSBuildStatus::default)
    }

    // Spec surface

    /// AWS region of the build.
    pub fn region(&self) -> &str {
        &self.build.spec.region
    }

    /// EC2 instance type to launch.
    pub fn instance_type(&self) -> &str {
        &self.build.spec.instance_type
    }

    /// Machine image the instance boots from.
    pub fn ami(&self) -> Option<&str> {
        self.build.spec.ami.as_deref()
    }

    /// Whether the instance gets a public IP.
    pub fn public_ip(&self) -> bool {
        self.build.spec.public_ip.unwrap_or(false)
    }

    /// Account created on the instance.
    pub fn username(&self) -> &str {
        &self.build.spec.username
    }

    // Network identifiers

    /// VPC recorded for the build, if any.
    pub fn vpc_id(&self) -> Option<&str> {
        self.build.spec.network.vpc_id.as_deref()
    }

    /// Records the VPC id.
    pub fn set_vpc_id(&mut self, id: impl Into<String>) {
        self.build.spec.network.vpc_id = Some(id.into());
    }

    /// Name of the VPC; defaults to `<build>-forge-vpc` unless overridden.
    pub fn vpc_name(&self) -> String {
        match &self.build.spec.network.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}-forge-vpc", self.name),
        }
    }

    /// Records the VPC name.
    pub fn set_vpc_name(&mut self, name: impl Into<String>) {
        self.build.spec.network.name = Some(name.into());
    }

    /// Creation parameters for a new VPC.
    pub fn vpc_spec(&self) -> VpcSpec {
        VpcSpec {
            cidr_block: DEFAULT_VPC_CIDR.to_string(),
            name: self.vpc_name(),
        }
    }

    /// Subnet recorded for the build, if any.
    pub fn subnet_id(&self) -> Option<&str> {
        self.build.spec.network.subnet_id.as_deref()
    }

    /// Records the subnet id.
    pub fn set_subnet_id(&mut self, id: impl Into<String>) {
        self.build.spec.network.subnet_id = Some(id.into());
    }

    /// Name a system-created subnet carries.
    pub fn subnet_name(&self) -> String {
        format!("{}-subnet", self.vpc_name())
    }

    /// Security group recorded for the build, if any.
    pub fn security_group_id(&self) -> Option<&str> {
        self.build.spec.network.security_group_id.as_deref()
    }

    /// Records the security group id.
    pub fn set_security_group_id(&mut self, id: impl Into<String>) {
        self.build.spec.network.security_group_id = Some(id.into());
    }

    /// Name of the security group; defaults to `<build>-forge` unless the
    /// network name overrides it.
    pub fn security_group_name(&self) -> String {
        match &self.build.spec.network.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}-forge", self.name),
        }
    }

    // Instance

    /// Instance recorded for the build, if any.
    pub fn instance_id(&self) -> Option<&str> {
        self.build.spec.instance_id.as_deref()
    }

    /// Records the instance id.
    pub fn set_instance_id(&mut self, id: impl Into<String>) {
        self.build.spec.instance_id = Some(id.into());
    }

    /// Last mirrored instance lifecycle state.
    pub fn instance_state(&self) -> Option<InstanceStatus> {
        self.build.status.as_ref().and_then(|s| s.instance_state)
    }

    /// Mirrors the instance lifecycle state into the status.
    pub fn set_instance_state(&mut self, state: InstanceStatus) {
        self.status_mut().instance_state = Some(state);
    }

    // Build progress flags

    /// The exported artifact, once available.
    pub fn artifact_ref(&self) -> Option<&str> {
        self.build
            .status
            .as_ref()
            .and_then(|s| s.artifact_ref.as_deref())
    }

    /// Records the exported artifact reference.
    pub fn set_artifact_ref(&mut self, reference: impl Into<String>) {
        self.status_mut().artifact_ref = Some(reference.into());
    }

    /// Whether the build has completed.
    pub fn is_ready(&self) -> bool {
        self.build.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Marks the build complete.
    pub fn set_ready(&mut self) {
        self.status_mut().ready = true;
    }

    /// Marks the build machine reachable.
    pub fn set_machine_ready(&mut self) {
        self.status_mut().machine_ready = true;
    }

    /// Whether provisioners finished preparing the machine.
    pub fn is_provisioner_ready(&self) -> bool {
        self.build
            .status
            .as_ref()
            .is_some_and(|s| s.provisioners_ready)
    }

    /// Whether the AWS scaffolding has been torn down.
    pub fn is_cleaned_up(&self) -> bool {
        self.build.status.as_ref().is_some_and(|s| s.cleaned_up)
    }

    /// Marks the AWS scaffolding as torn down.
    pub fn set_cleaned_up(&mut self) {
        self.status_mut().cleaned_up = true;
    }

    /// Records which step failed and why, for the status surface.
    pub fn set_failure(&mut self, reason: &str, err: &ControllerError) {
        let message = err.to_string();
        let status = self.status_mut();
        status.failure_reason = Some(reason.to_string());
        status.failure_message = Some(message);
    }

    /// Clears a previously recorded failure.
    pub fn clear_failure(&mut self) {
        let status = self.status_mut();
        status.failure_reason = None;
        status.failure_message = None;
    }

    // Lifecycle plumbing

    /// Whether the resource is marked for deletion.
    pub fn deletion_requested(&self) -> bool {
        self.build.metadata.deletion_timestamp.is_some()
    }

    /// Whether the cleanup finalizer is present.
    pub fn has_finalizer(&self) -> bool {
        self.build
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == BUILD_FINALIZER))
    }

    /// Adds the cleanup finalizer if absent.
    pub fn ensure_finalizer(&mut self) {
        let finalizers = self.build.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == BUILD_FINALIZER) {
            finalizers.push(BUILD_FINALIZER.to_string());
        }
    }

    /// Removes the cleanup finalizer.
    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = &mut self.build.metadata.finalizers {
            finalizers.retain(|f| f != BUILD_FINALIZER);
        }
    }

    /// When the build request was accepted. Images older than this are
    /// stale leftovers of a previous build under the same name.
    pub fn creation_timestamp(&self) -> Result<DateTime<Utc>, ControllerError> {
        self.build
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .ok_or_else(|| {
                ControllerError::InvalidConfig("AWSBuild has no creation timestamp".to_string())
            })
    }

    /// Name the exported image carries: the build name.
    pub fn image_name(&self) -> &str {
        &self.name
    }

    /// Cloud-init user data creating the build user with the build's
    /// public key, base64-encoded the way EC2 expects it.
    pub fn user_data(&self) -> String {
        let cloud_config = format!(
            "#cloud-config
users:
  - name: {username}
    groups: sudo
    shell: /bin/bash
    sudo: ['ALL=(ALL) NOPASSWD:ALL']
    ssh_authorized_keys:
      - {public_key}
",
            username = self.build.spec.username,
            public_key = self.ssh_key.public_key.trim_end(),
        );
        base64::engine::general_purpose::STANDARD.encode(cloud_config)
    }

    /// Hands SSH connection material for the (possibly now reachable)
    /// instance to the credentials collaborator.
    pub async fn ensure_credentials_secret(
        &self,
        host: Option<&str>,
    ) -> Result<(), ControllerError> {
        self.credentials
            .ensure(
                &self.name,
                &SshCredentials {
                    host: host.map(str::to_string),
                    username: self.build.spec.username.clone(),
                    private_key: self.ssh_key.private_key.clone(),
                    public_key: self.ssh_key.public_key.clone(),
                },
            )
            .await
    }
}
