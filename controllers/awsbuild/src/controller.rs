//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the AWSBuild
//! reconciler to its watcher and keeps it running.

use crate::error::ControllerError;
use crate::reconciler::BuildReconciler;
use crate::watcher::Watcher;
use crds::AWSBuild;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for AWSBuild resource management.
#[derive(Debug)]
pub struct Controller {
    aws_build_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        namespace: Option<String>,
        concurrency: u16,
    ) -> Result<Self, ControllerError> {
        info!("Initializing AWSBuild controller");

        let kube_client = Client::try_default().await?;

        let ns = namespace.as_deref().unwrap_or("default");
        let aws_build_api: Api<AWSBuild> = Api::namespaced(kube_client.clone(), ns);

        let reconciler = Arc::new(BuildReconciler::new(kube_client, aws_build_api.clone()));

        let watcher_instance = Arc::new(Watcher::new(reconciler, aws_build_api, concurrency));

        let aws_build_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_aws_builds().await })
        };

        Ok(Self { aws_build_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("AWSBuild controller running");

        // The watcher should run forever; its exit ends the controller.
        tokio::select! {
            result = &mut self.aws_build_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("AWSBuild watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("AWSBuild watcher error: {e}")))?;
            }
        }

        Ok(())
    }
}
