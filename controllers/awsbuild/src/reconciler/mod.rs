//! Reconciliation logic for AWSBuild resources.
//!
//! The build pipeline is a fixed sequence of five stage reconcilers
//! (network, subnet, security group, instance, image export), each
//! idempotent and resumable, run in order against the shared scope.
//! Teardown runs the stages' delete operations in dependency order.

pub mod image;
pub mod instance;
pub mod network;
pub mod security_group;
pub mod subnet;

#[cfg(test)]
mod image_test;
#[cfg(test)]
mod network_test;
#[cfg(test)]
mod pipeline_test;
#[cfg(test)]
mod security_group_test;
#[cfg(test)]
mod subnet_test;

pub use image::ImageReconciler;
pub use instance::InstanceReconciler;
pub use network::NetworkReconciler;
pub use security_group::SecurityGroupReconciler;
pub use subnet::SubnetReconciler;

use crate::backoff::FibonacciBackoff;
use crate::credentials::{self, CredentialsStore, K8sCredentialsStore, SshKeyPair};
use crate::error::ControllerError;
use crate::scope::BuildScope;
use crds::{AWSBuild, BUILD_FINALIZER};
use ec2_client::{Ec2Client, Ec2ClientTrait};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// How soon to come back while waiting on remote convergence (instance
/// startup, image export, termination).
const REQUEUE_SHORT: Duration = Duration::from_secs(5);

/// A stage of the build pipeline: converge one resource type, or tear it
/// down again.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync {
    /// Create or adopt the stage's resource.
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError>;
    /// Destroy the stage's resource, if this system owns it.
    async fn delete(&self, scope: &mut BuildScope) -> Result<(), ControllerError>;
}

/// Stages in creation order. Each stage reads its predecessors' output
/// from the scope.
fn build_stages() -> [&'static dyn Reconcile; 5] {
    [
        &NetworkReconciler,
        &SubnetReconciler,
        &SecurityGroupReconciler,
        &InstanceReconciler,
        &ImageReconciler,
    ]
}

/// Stages in teardown order: dependents before their dependencies. The
/// image stage has no teardown; exported images are retained.
fn teardown_stages() -> [&'static dyn Reconcile; 4] {
    [
        &InstanceReconciler,
        &SecurityGroupReconciler,
        &SubnetReconciler,
        &NetworkReconciler,
    ]
}

/// Runs the build pipeline once, stopping at the first error.
pub(crate) async fn run_build_pipeline(scope: &mut BuildScope) -> Result<(), ControllerError> {
    for stage in build_stages() {
        stage.reconcile(scope).await?;
    }
    Ok(())
}

/// Runs the teardown pipeline once, stopping at the first error.
pub(crate) async fn run_teardown_pipeline(scope: &mut BuildScope) -> Result<(), ControllerError> {
    for stage in teardown_stages() {
        stage.delete(scope).await?;
    }
    Ok(())
}

/// One pass over a live (non-deleting) build.
pub(crate) async fn reconcile_normal(scope: &mut BuildScope) -> Result<Action, ControllerError> {
    if !scope.is_ready() {
        if let Err(err) = run_build_pipeline(scope).await {
            error!(error = %err, "reconcile error");
            scope.set_failure("Building", &err);
            return Err(err);
        }
        scope.clear_failure();
        scope.ensure_finalizer();
    }

    info!("Reconciling AWSBuild");

    // A finished build tears its scaffolding down; only the artifact and
    // the build record remain.
    if scope.is_ready() && !scope.is_cleaned_up() {
        return reconcile_delete(scope).await;
    }

    let Some(instance_id) = scope.instance_id() else {
        info!("AWSBuild has not started the build yet");
        return Ok(Action::requeue(REQUEUE_SHORT));
    };
    info!(instance_id = %instance_id, "machine is created");
    scope.set_machine_ready();

    let Some(artifact) = scope.artifact_ref() else {
        info!("artifact is not available yet");
        return Ok(Action::requeue(REQUEUE_SHORT));
    };
    info!(artifact = %artifact, "got an available artifact");

    scope.set_ready();
    info!("AWSBuild is reconciled successfully");
    Ok(Action::await_change())
}

/// One pass over a deleting (or self-cleaning) build.
pub(crate) async fn reconcile_delete(scope: &mut BuildScope) -> Result<Action, ControllerError> {
    info!("Reconciling delete AWSBuild");

    match run_teardown_pipeline(scope).await {
        Ok(()) => {
            scope.remove_finalizer();
            scope.set_cleaned_up();
            info!("AWSBuild cleanup finished");
            Ok(Action::await_change())
        }
        Err(err) if err.is_instance_not_terminated() => {
            info!("instance is not terminated yet");
            Ok(Action::requeue(REQUEUE_SHORT))
        }
        Err(err) => {
            error!(error = %err, "cleanup error");
            scope.set_failure("CleaningUp", &err);
            Err(err)
        }
    }
}

/// Reconciles AWSBuild resources: builds the scope for each pass, branches
/// between the build and teardown pipelines, and persists the scope once
/// the pass ends.
pub struct BuildReconciler {
    kube_client: Client,
    aws_build_api: Api<AWSBuild>,
    /// Error backoff state per resource (namespace/name)
    backoffs: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl std::fmt::Debug for BuildReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildReconciler").finish_non_exhaustive()
    }
}

impl BuildReconciler {
    /// Creates a new reconciler instance.
    pub fn new(kube_client: Client, aws_build_api: Api<AWSBuild>) -> Self {
        Self {
            kube_client,
            aws_build_api,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point for one reconciliation of one AWSBuild.
    pub async fn reconcile_aws_build(
        &self,
        build: Arc<AWSBuild>,
    ) -> Result<Action, ControllerError> {
        let name = build.name_any();
        let namespace = build.namespace().unwrap_or_else(|| "default".to_string());
        let resource_key = format!("{namespace}/{name}");
        info!(namespace = %namespace, name = %name, "reconciling");

        // Deletion of a build we never put a finalizer on: nothing to do.
        let has_finalizer = build
            .finalizers()
            .iter()
            .any(|f| f == BUILD_FINALIZER);
        if build.metadata.deletion_timestamp.is_some() && !has_finalizer {
            info!("AWSBuild deleted without cleanup finalizer, ignoring");
            return Ok(Action::await_change());
        }

        let mut scope = self.build_scope((*build).clone()).await?;

        let result = if scope.deletion_requested() {
            reconcile_delete(&mut scope).await
        } else {
            reconcile_normal(&mut scope).await
        };

        // Persist however far the pass got, success or failure, so the
        // next pass resumes from the furthest checkpoint.
        let close_result = self.close(&scope).await;

        let action = result?;
        close_result?;
        self.reset_backoff(&resource_key);
        Ok(action)
    }

    /// Assembles the scope for one pass: cloud client bound to the build's
    /// region and credentials, credentials store, resolved SSH key.
    async fn build_scope(&self, mut build: AWSBuild) -> Result<BuildScope, ControllerError> {
        let namespace = build
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let aws_credentials = match &build.spec.credentials_ref {
            Some(reference) => Some(
                credentials::read_aws_credentials(&self.kube_client, &namespace, reference)
                    .await?,
            ),
            None => None,
        };
        let cloud: Arc<dyn Ec2ClientTrait> =
            Arc::new(Ec2Client::new(build.spec.region.clone(), aws_credentials).await);

        let store: Arc<dyn CredentialsStore> = Arc::new(K8sCredentialsStore::new(
            self.kube_client.clone(),
            namespace,
        ));

        // Teardown needs no SSH material, and a build whose credentials
        // secret is already gone must still be deletable.
        let ssh_key = if build.metadata.deletion_timestamp.is_some() {
            SshKeyPair::default()
        } else {
            credentials::resolve_ssh_key(&store, &mut build).await?
        };

        BuildScope::new(build, cloud, store, ssh_key)
    }

    /// Persists the scope. Status goes first: dropping the finalizer can
    /// let the API server delete the object out from under a later patch.
    async fn close(&self, scope: &BuildScope) -> Result<(), ControllerError> {
        let build = scope.build();
        let pp = PatchParams::default();

        let status = serde_json::json!({ "status": build.status });
        if let Err(err) = self
            .aws_build_api
            .patch_status(scope.name(), &pp, &Patch::Merge(&status))
            .await
        {
            error!(error = %err, "failed to persist AWSBuild status");
            return Err(err.into());
        }

        let patch = serde_json::json!({
            "metadata": { "finalizers": build.metadata.finalizers },
            "spec": build.spec,
        });
        if let Err(err) = self
            .aws_build_api
            .patch(scope.name(), &pp, &Patch::Merge(&patch))
            .await
        {
            error!(error = %err, "failed to persist AWSBuild spec");
            return Err(err.into());
        }

        Ok(())
    }

    /// Delay before retrying a failed resource; grows per the Fibonacci
    /// sequence until the next success.
    pub fn error_backoff(&self, resource_key: &str) -> Duration {
        match self.backoffs.lock() {
            Ok(mut backoffs) => backoffs
                .entry(resource_key.to_string())
                .or_insert_with(|| FibonacciBackoff::new(1, 10))
                .next_delay(),
            Err(err) => {
                warn!(error = %err, "failed to lock backoff state, using default");
                Duration::from_secs(60)
            }
        }
    }

    /// Resets the error backoff after a successful pass.
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut backoffs) = self.backoffs.lock() {
            if let Some(backoff) = backoffs.get_mut(resource_key) {
                backoff.reset();
            }
        }
    }
}
