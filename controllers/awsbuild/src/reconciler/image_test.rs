//! Unit tests for the image export reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{ImageReconciler, Reconcile};
    use crate::scope::BuildScope;
    use crate::test_utils::*;
    use crds::AWSBuildStatus;
    use ec2_client::{managed_tags, Image, ImageState, Instance, MockEc2Client};

    /// Build in the export window: provisioners done, not yet ready, with
    /// a live instance recorded.
    fn export_ready_scope(cloud: &MockEc2Client) -> BuildScope {
        cloud.add_instance(Instance {
            instance_id: "i-run".to_string(),
            state: "running".to_string(),
            public_ip: Some("203.0.113.7".to_string()),
            tags: managed_tags("demo"),
        });
        let mut build = test_build("demo");
        build.spec.instance_id = Some("i-run".to_string());
        build.status = Some(AWSBuildStatus {
            provisioners_ready: true,
            ..AWSBuildStatus::default()
        });
        test_scope(build, cloud)
    }

    fn image(image_id: &str, state: ImageState, creation_date: &str) -> Image {
        Image {
            image_id: image_id.to_string(),
            name: "demo".to_string(),
            state,
            creation_date: creation_date.to_string(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_skips_until_provisioners_are_ready() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("create_image"), 0);
        assert!(scope.artifact_ref().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_skips_after_build_is_ready() {
        let cloud = MockEc2Client::new();
        let mut scope = export_ready_scope(&cloud);
        scope.set_ready();

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("create_image"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_without_instance_is_invalid() {
        let cloud = MockEc2Client::new();
        let mut build = test_build("demo");
        build.status = Some(AWSBuildStatus {
            provisioners_ready: true,
            ..AWSBuildStatus::default()
        });
        let mut scope = test_scope(build, &cloud);

        let err = ImageReconciler.reconcile(&mut scope).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_reconcile_issues_create_when_no_image_exists() {
        let cloud = MockEc2Client::new();
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("create_image"), 1);
        // The export only becomes the artifact once it reports available.
        assert!(scope.artifact_ref().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_waits_while_image_is_pending() {
        let cloud = MockEc2Client::new();
        cloud.add_image(image("ami-new", ImageState::Pending, "2024-05-01T13:00:00Z"));
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("create_image"), 0);
        assert!(scope.artifact_ref().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_records_available_image_as_artifact() {
        let cloud = MockEc2Client::new();
        cloud.add_image(image("ami-new", ImageState::Available, "2024-05-01T13:00:00Z"));
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(scope.artifact_ref(), Some("ami-new"));
        assert_eq!(cloud.call_count("create_image"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_deregisters_only_stale_images() {
        let cloud = MockEc2Client::new();
        // Older than the build's creation time (2024-05-01T12:00:00Z):
        // a leftover from a previous build under the same name.
        cloud.add_image(image("ami-old", ImageState::Available, "2024-04-30T00:00:00Z"));
        // At/after the build's creation time: this build's own export.
        cloud.add_image(image("ami-new", ImageState::Pending, "2024-05-01T13:00:00Z"));
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        let remaining: Vec<String> = cloud.images().into_iter().map(|i| i.image_id).collect();
        assert_eq!(remaining, vec!["ami-new".to_string()]);
        assert_eq!(cloud.call_count("deregister_image"), 1);
        assert_eq!(cloud.call_count("create_image"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_lone_stale_image() {
        let cloud = MockEc2Client::new();
        cloud.add_image(image("ami-old", ImageState::Available, "2024-04-30T00:00:00Z"));
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("deregister_image"), 1);
        assert_eq!(cloud.call_count("create_image"), 1);
        assert!(scope.artifact_ref().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_fails_on_malformed_image_timestamp() {
        let cloud = MockEc2Client::new();
        cloud.add_image(image("ami-bad", ImageState::Available, "yesterday-ish"));
        let mut scope = export_ready_scope(&cloud);

        let err = ImageReconciler.reconcile(&mut scope).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidTimestamp(_)));
    }

    #[tokio::test]
    async fn test_delete_retains_exported_images() {
        let cloud = MockEc2Client::new();
        cloud.add_image(image("ami-new", ImageState::Available, "2024-05-01T13:00:00Z"));
        let mut scope = export_ready_scope(&cloud);

        ImageReconciler.delete(&mut scope).await.unwrap();

        assert_eq!(cloud.images().len(), 1);
        assert_eq!(cloud.call_count("deregister_image"), 0);
    }
}
