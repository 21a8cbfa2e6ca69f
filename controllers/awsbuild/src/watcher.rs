//! Kubernetes resource watcher.
//!
//! Wires the AWSBuild API into `kube_runtime::Controller`, which handles
//! reconnection, event batching and retry scheduling. The error policy
//! requeues failed resources with the reconciler's per-resource backoff.

use crate::error::ControllerError;
use crate::reconciler::BuildReconciler;
use crds::AWSBuild;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches a resource type with `kube_runtime::Controller`, driving the
/// given reconcile function and requeueing errors with backoff.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<BuildReconciler>,
    reconcile_fn: F,
    resource_name: &str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(
            Arc<BuildReconciler>,
            Arc<K>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>,
        > + Send
        + Sync
        + Clone
        + 'static,
{
    info!("Starting {} watcher", resource_name);

    // Requeue failed resources with the per-resource Fibonacci backoff.
    let error_policy = |obj: Arc<K>, err: &ControllerError, ctx: Arc<BuildReconciler>| {
        let key = format!(
            "{}/{}",
            obj.namespace().unwrap_or_default(),
            obj.name_any()
        );
        let delay = ctx.error_backoff(&key);
        error!(resource = %key, error = %err, delay_secs = delay.as_secs(), "reconciliation error");
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<BuildReconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    // Debounce batches bursts of status updates into one pass; the
    // concurrency limit is the cross-build worker-count knob.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(err) = res {
                error!(error = %err, "controller error");
            }
        })
        .await;

    Ok(())
}

/// Watches AWSBuild resources for changes.
pub struct Watcher {
    reconciler: Arc<BuildReconciler>,
    aws_build_api: Api<AWSBuild>,
    concurrency: u16,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<BuildReconciler>,
        aws_build_api: Api<AWSBuild>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            aws_build_api,
            concurrency,
        }
    }

    /// Watches AWSBuild resources until the stream ends.
    pub async fn watch_aws_builds(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.aws_build_api.clone(),
            self.reconciler.clone(),
            |ctx, build| Box::pin(async move { ctx.reconcile_aws_build(build).await }),
            "AWSBuild",
            self.concurrency,
        )
        .await
    }
}
