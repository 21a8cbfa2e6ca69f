//! End-to-end pipeline tests over the mock cloud

#[cfg(test)]
mod tests {
    use crate::reconciler::{reconcile_delete, reconcile_normal};
    use crate::test_utils::*;
    use crds::{AWSBuildStatus, InstanceStatus};
    use ec2_client::{managed_tags, Ec2ClientTrait, Instance, MockEc2Client, SecurityGroup, Subnet, Tag};
    use kube_runtime::controller::Action;
    use std::time::Duration;

    fn requeue_short() -> Action {
        Action::requeue(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_cold_build_creates_the_whole_stack() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        let action = reconcile_normal(&mut scope).await.unwrap();

        // Still waiting on the artifact, so the pass requeues shortly.
        assert_eq!(action, requeue_short());

        // All identifiers populated, one create call each.
        let vpc_id = scope.vpc_id().unwrap().to_string();
        let subnet_id = scope.subnet_id().unwrap().to_string();
        let group_id = scope.security_group_id().unwrap().to_string();
        assert!(scope.instance_id().is_some());
        assert_eq!(cloud.call_count("create_vpc"), 1);
        assert_eq!(cloud.call_count("create_subnet"), 1);
        assert_eq!(cloud.call_count("create_security_group"), 1);
        assert_eq!(cloud.call_count("create_instance"), 1);

        // First /24 out of the default /16.
        let subnet = cloud.find_subnet_by_id(&subnet_id).await.unwrap();
        assert_eq!(subnet.vpc_id, vpc_id);
        assert_eq!(subnet.cidr_block, "10.0.0.0/24");

        // The fixed SSH rule is in place.
        assert_eq!(
            cloud.ingress_rules(&group_id),
            vec!["tcp/22 from 0.0.0.0/0".to_string()]
        );

        // Lifecycle mirrored, progress recorded, cleanup guard armed.
        assert_eq!(scope.instance_state(), Some(InstanceStatus::Pending));
        assert!(scope.build().status.as_ref().unwrap().machine_ready);
        assert!(scope.has_finalizer());
        assert!(!scope.is_ready());
    }

    #[tokio::test]
    async fn test_second_pass_changes_nothing_without_external_changes() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        reconcile_normal(&mut scope).await.unwrap();
        let after_first = serde_json::to_value(scope.build()).unwrap();

        let action = reconcile_normal(&mut scope).await.unwrap();

        assert_eq!(action, requeue_short());
        assert_eq!(after_first, serde_json::to_value(scope.build()).unwrap());
        assert_eq!(cloud.call_count("create_vpc"), 1);
        assert_eq!(cloud.call_count("create_subnet"), 1);
        assert_eq!(cloud.call_count("create_security_group"), 1);
        assert_eq!(cloud.call_count("create_instance"), 1);
    }

    #[tokio::test]
    async fn test_user_supplied_subnet_is_adopted_and_survives_teardown() {
        let cloud = MockEc2Client::new();
        cloud.add_subnet(Subnet {
            subnet_id: "subnet-123".to_string(),
            vpc_id: "vpc-user".to_string(),
            cidr_block: "192.168.0.0/24".to_string(),
            tags: vec![Tag::new("Name", "user-subnet")],
        });

        let mut build = test_build("demo");
        build.spec.network.subnet_id = Some("subnet-123".to_string());
        let mut scope = test_scope(build, &cloud);

        reconcile_normal(&mut scope).await.unwrap();
        assert_eq!(scope.subnet_id(), Some("subnet-123"));
        assert_eq!(cloud.call_count("create_subnet"), 0);

        // Tear everything down, letting the provider finish terminating
        // the instance between passes.
        let action = reconcile_delete(&mut scope).await.unwrap();
        assert_eq!(action, requeue_short());
        let instance_id = scope.instance_id().unwrap().to_string();
        cloud.set_instance_state(&instance_id, "terminated");
        let action = reconcile_delete(&mut scope).await.unwrap();
        assert_eq!(action, Action::await_change());

        // Our scaffolding is gone, the user's subnet is not.
        assert!(scope.is_cleaned_up());
        assert!(!scope.has_finalizer());
        assert!(cloud.subnet_exists("subnet-123"));
        assert_eq!(cloud.call_count("delete_subnet"), 0);
        assert_eq!(cloud.call_count("delete_vpc"), 1);
    }

    #[tokio::test]
    async fn test_delete_with_running_instance_waits_for_termination() {
        let cloud = MockEc2Client::new();
        cloud.add_instance(Instance {
            instance_id: "i-run".to_string(),
            state: "running".to_string(),
            public_ip: None,
            tags: managed_tags("demo"),
        });
        cloud.add_security_group(SecurityGroup {
            group_id: "sg-1".to_string(),
            group_name: "demo-forge".to_string(),
            tags: managed_tags("demo-forge"),
        });

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_instance_id("i-run");
        scope.set_security_group_id("sg-1");
        scope.set_instance_state(InstanceStatus::Running);
        scope.ensure_finalizer();

        let action = reconcile_delete(&mut scope).await.unwrap();

        // Termination was issued and mirrored; the pass reschedules
        // instead of blocking, keeping the finalizer in place.
        assert_eq!(action, requeue_short());
        assert_eq!(cloud.call_count("terminate_instance"), 1);
        assert_eq!(scope.instance_state(), Some(InstanceStatus::Terminating));
        assert_eq!(cloud.call_count("delete_security_group"), 0);
        assert!(cloud.security_group_exists("sg-1"));
        assert!(scope.has_finalizer());
        assert!(!scope.is_cleaned_up());
    }

    #[tokio::test]
    async fn test_finished_build_tears_down_its_scaffolding() {
        let cloud = MockEc2Client::new();
        let mut build = test_build("demo");
        build.status = Some(AWSBuildStatus {
            ready: true,
            artifact_ref: Some("ami-done".to_string()),
            ..AWSBuildStatus::default()
        });
        let mut scope = test_scope(build, &cloud);

        let action = reconcile_normal(&mut scope).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(scope.is_cleaned_up());
    }
}
