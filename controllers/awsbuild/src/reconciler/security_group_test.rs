//! Unit tests for the security group reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{Reconcile, SecurityGroupReconciler};
    use crate::test_utils::*;
    use crds::InstanceStatus;
    use ec2_client::{managed_tags, MockEc2Client, SecurityGroup, Tag};

    #[tokio::test]
    async fn test_reconcile_creates_group_with_ssh_rule() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        SecurityGroupReconciler.reconcile(&mut scope).await.unwrap();

        let group_id = scope.security_group_id().unwrap().to_string();
        assert_eq!(
            cloud.ingress_rules(&group_id),
            vec!["tcp/22 from 0.0.0.0/0".to_string()]
        );
        assert_eq!(cloud.call_count("create_security_group"), 1);
        assert_eq!(cloud.call_count("authorize_ssh_ingress"), 1);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_user_supplied_group() {
        let cloud = MockEc2Client::new();
        let mut build = test_build("demo");
        build.spec.network.security_group_id = Some("sg-user".to_string());
        let mut scope = test_scope(build, &cloud);

        SecurityGroupReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(scope.security_group_id(), Some("sg-user"));
        assert_eq!(cloud.call_count("create_security_group"), 0);
        assert_eq!(cloud.call_count("authorize_ssh_ingress"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_without_vpc_is_invalid() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        let err = SecurityGroupReconciler
            .reconcile(&mut scope)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_reconcile_twice_issues_no_duplicate_creates() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        SecurityGroupReconciler.reconcile(&mut scope).await.unwrap();
        SecurityGroupReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("create_security_group"), 1);
        assert_eq!(cloud.call_count("authorize_ssh_ingress"), 1);
    }

    #[tokio::test]
    async fn test_delete_refused_until_instance_terminated() {
        let not_terminated = [
            InstanceStatus::Provisioning,
            InstanceStatus::Pending,
            InstanceStatus::Running,
            InstanceStatus::Stopping,
            InstanceStatus::Stopped,
            InstanceStatus::ShuttingDown,
            InstanceStatus::Terminating,
        ];

        for state in not_terminated {
            let cloud = MockEc2Client::new();
            cloud.add_security_group(SecurityGroup {
                group_id: "sg-1".to_string(),
                group_name: "demo-forge".to_string(),
                tags: managed_tags("demo-forge"),
            });

            let mut scope = test_scope(test_build("demo"), &cloud);
            scope.set_security_group_id("sg-1");
            scope.set_instance_id("i-1");
            scope.set_instance_state(state);

            let err = SecurityGroupReconciler.delete(&mut scope).await.unwrap_err();
            assert!(
                err.is_instance_not_terminated(),
                "state {state} must refuse deletion"
            );
            assert_eq!(cloud.call_count("delete_security_group"), 0);
        }
    }

    #[tokio::test]
    async fn test_delete_removes_owned_group_once_terminated() {
        let cloud = MockEc2Client::new();
        cloud.add_security_group(SecurityGroup {
            group_id: "sg-1".to_string(),
            group_name: "demo-forge".to_string(),
            tags: managed_tags("demo-forge"),
        });

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_security_group_id("sg-1");
        scope.set_instance_id("i-1");
        scope.set_instance_state(InstanceStatus::Terminated);

        SecurityGroupReconciler.delete(&mut scope).await.unwrap();

        assert!(!cloud.security_group_exists("sg-1"));
    }

    #[tokio::test]
    async fn test_delete_skips_foreign_group() {
        let cloud = MockEc2Client::new();
        cloud.add_security_group(SecurityGroup {
            group_id: "sg-user".to_string(),
            group_name: "user-group".to_string(),
            tags: vec![Tag::new("Name", "user-group")],
        });

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_security_group_id("sg-user");
        scope.set_instance_id("i-1");
        scope.set_instance_state(InstanceStatus::Terminated);

        SecurityGroupReconciler.delete(&mut scope).await.unwrap();

        assert!(cloud.security_group_exists("sg-user"));
        assert_eq!(cloud.call_count("delete_security_group"), 0);
    }

    #[tokio::test]
    async fn test_delete_proceeds_when_no_instance_was_launched() {
        // A build torn down before its instance stage has nothing to wait
        // for; the gate only applies to tracked instances.
        let cloud = MockEc2Client::new();
        cloud.add_security_group(SecurityGroup {
            group_id: "sg-1".to_string(),
            group_name: "demo-forge".to_string(),
            tags: managed_tags("demo-forge"),
        });

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_security_group_id("sg-1");

        SecurityGroupReconciler.delete(&mut scope).await.unwrap();

        assert!(!cloud.security_group_exists("sg-1"));
    }
}
