//! Image export reconciler
//!
//! Exports the build instance's root volume as an AMI, exactly once. The
//! stage only runs in the window between "provisioners done" and "build
//! ready", guards against stale images left behind by a previous build
//! under the same name, and drives a small state machine keyed on the
//! provider-reported image state.

use super::Reconcile;
use crate::error::ControllerError;
use crate::scope::BuildScope;
use chrono::{DateTime, Utc};
use ec2_client::{Ec2ClientTrait, ImageState};
use std::sync::Arc;
use tracing::info;

/// Scope surface the image export stage reads and writes.
pub trait ImageScope: Send {
    /// The bound cloud client.
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait>;
    /// Whether provisioners finished preparing the machine.
    fn is_provisioner_ready(&self) -> bool;
    /// Whether the build has completed.
    fn is_ready(&self) -> bool;
    /// Instance the image is taken from.
    fn instance_id(&self) -> Option<&str>;
    /// Name the exported image carries.
    fn image_name(&self) -> &str;
    /// When the build request was accepted.
    fn creation_timestamp(&self) -> Result<DateTime<Utc>, ControllerError>;
    /// Records the exported artifact reference.
    fn set_artifact_ref(&mut self, reference: String);
}

impl ImageScope for BuildScope {
    fn cloud(&self) -> Arc<dyn Ec2ClientTrait> {
        BuildScope::cloud(self)
    }
    fn is_provisioner_ready(&self) -> bool {
        BuildScope::is_provisioner_ready(self)
    }
    fn is_ready(&self) -> bool {
        BuildScope::is_ready(self)
    }
    fn instance_id(&self) -> Option<&str> {
        BuildScope::instance_id(self)
    }
    fn image_name(&self) -> &str {
        BuildScope::image_name(self)
    }
    fn creation_timestamp(&self) -> Result<DateTime<Utc>, ControllerError> {
        BuildScope::creation_timestamp(self)
    }
    fn set_artifact_ref(&mut self, reference: String) {
        BuildScope::set_artifact_ref(self, reference);
    }
}

/// Reconciles the build's exported machine image.
#[derive(Debug, Clone, Copy)]
pub struct ImageReconciler;

#[async_trait::async_trait]
impl Reconcile for ImageReconciler {
    async fn reconcile(&self, scope: &mut BuildScope) -> Result<(), ControllerError> {
        reconcile_image(scope).await
    }

    async fn delete(&self, _scope: &mut BuildScope) -> Result<(), ControllerError> {
        // Exported images are the build's product and are retained.
        Ok(())
    }
}

async fn reconcile_image<S: ImageScope>(scope: &mut S) -> Result<(), ControllerError> {
    info!("Reconciling image creation");

    if !scope.is_provisioner_ready() || scope.is_ready() {
        info!("not ready for exporting the image");
        return Ok(());
    }

    let instance_id = scope.instance_id().map(str::to_string).ok_or_else(|| {
        ControllerError::InvalidConfig("instance ID is not set, cannot create image".to_string())
    })?;

    let image_name = scope.image_name().to_string();
    info!(image_name = %image_name, "ensuring no existing image conflicts");
    ensure_no_stale_image(scope, &image_name).await?;

    let cloud = scope.cloud();
    match cloud.find_image_by_name(&image_name).await? {
        Some(image) if image.state == ImageState::Available => {
            info!(image_id = %image.image_id, "image is available");
            scope.set_artifact_ref(image.image_id);
        }
        Some(image) if image.state == ImageState::Pending => {
            info!(image_id = %image.image_id, "image is still being created, waiting for readiness");
        }
        _ => {
            info!(image_name = %image_name, "creating image");
            cloud.create_image(&instance_id, &image_name).await?;
        }
    }

    info!(image_name = %image_name, "image reconciliation successful");
    Ok(())
}

/// Deregisters images of the target name created before this build
/// existed. An image created at or after the build's own creation time is
/// this build's in-flight or completed export and ends the sweep.
async fn ensure_no_stale_image<S: ImageScope>(
    scope: &S,
    image_name: &str,
) -> Result<(), ControllerError> {
    let build_created = scope.creation_timestamp()?;
    let cloud = scope.cloud();

    for image in cloud.list_images_by_name(image_name).await? {
        let image_created: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&image.creation_date)?.with_timezone(&Utc);

        if image_created < build_created {
            info!(
                image_id = %image.image_id,
                created = %image.creation_date,
                "deregistering outdated image"
            );
            cloud.deregister_image(&image.image_id).await?;
        } else {
            info!(image_id = %image.image_id, "existing image is up-to-date, keeping it");
            return Ok(());
        }
    }

    Ok(())
}
