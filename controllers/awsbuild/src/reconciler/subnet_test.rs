//! Unit tests for the subnet reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{Reconcile, SubnetReconciler};
    use crate::test_utils::*;
    use ec2_client::{managed_tags, Ec2ClientTrait, Ec2Error, MockEc2Client, Subnet, Tag, Vpc};

    fn vpc(vpc_id: &str, cidr: &str) -> Vpc {
        Vpc {
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr.to_string(),
            tags: managed_tags("demo-forge-vpc"),
        }
    }

    fn existing_subnet(subnet_id: &str, vpc_id: &str, cidr: &str) -> Subnet {
        Subnet {
            subnet_id: subnet_id.to_string(),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr.to_string(),
            tags: managed_tags("demo-forge-vpc-subnet"),
        }
    }

    #[tokio::test]
    async fn test_reconcile_creates_subnet_with_first_free_block() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(vpc("vpc-1", "10.0.0.0/16"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        SubnetReconciler.reconcile(&mut scope).await.unwrap();

        let subnet_id = scope.subnet_id().unwrap().to_string();
        let subnet = cloud.find_subnet_by_id(&subnet_id).await.unwrap();
        assert_eq!(subnet.cidr_block, "10.0.0.0/24");
        assert_eq!(cloud.call_count("create_subnet"), 1);
    }

    #[tokio::test]
    async fn test_reconcile_skips_blocks_already_in_use() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(vpc("vpc-1", "10.0.0.0/16"));
        cloud.add_subnet(existing_subnet("subnet-a", "vpc-1", "10.0.0.0/24"));
        cloud.add_subnet(existing_subnet("subnet-b", "vpc-1", "10.0.1.0/24"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        SubnetReconciler.reconcile(&mut scope).await.unwrap();

        let subnet_id = scope.subnet_id().unwrap().to_string();
        let subnet = cloud.find_subnet_by_id(&subnet_id).await.unwrap();
        assert_eq!(subnet.cidr_block, "10.0.2.0/24");
    }

    #[tokio::test]
    async fn test_reconcile_fails_when_vpc_block_is_exhausted() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(vpc("vpc-1", "10.0.0.0/24"));
        cloud.add_subnet(existing_subnet("subnet-a", "vpc-1", "10.0.0.0/24"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        let err = SubnetReconciler.reconcile(&mut scope).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Ec2(Ec2Error::CidrExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_adopts_user_supplied_subnet() {
        let cloud = MockEc2Client::new();
        // User-supplied infrastructure carries no ownership tag.
        cloud.add_subnet(Subnet {
            subnet_id: "subnet-123".to_string(),
            vpc_id: "vpc-user".to_string(),
            cidr_block: "192.168.0.0/24".to_string(),
            tags: vec![Tag::new("Name", "user-subnet")],
        });

        let mut build = test_build("demo");
        build.spec.network.subnet_id = Some("subnet-123".to_string());
        let mut scope = test_scope(build, &cloud);

        SubnetReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(scope.subnet_id(), Some("subnet-123"));
        assert_eq!(cloud.call_count("create_subnet"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_fails_on_dangling_user_subnet() {
        let cloud = MockEc2Client::new();
        let mut build = test_build("demo");
        build.spec.network.subnet_id = Some("subnet-404".to_string());
        let mut scope = test_scope(build, &cloud);

        let err = SubnetReconciler.reconcile(&mut scope).await.unwrap_err();
        assert!(matches!(err, ControllerError::Ec2(Ec2Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reconcile_twice_issues_no_duplicate_creates() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(vpc("vpc-1", "10.0.0.0/16"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");

        SubnetReconciler.reconcile(&mut scope).await.unwrap();
        let after_first = serde_json::to_value(scope.build()).unwrap();
        SubnetReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(after_first, serde_json::to_value(scope.build()).unwrap());
        assert_eq!(cloud.call_count("create_subnet"), 1);
    }

    #[tokio::test]
    async fn test_delete_never_touches_unowned_subnet() {
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

        SubnetReconciler.delete(&mut scope).await.unwrap();

        assert!(cloud.subnet_exists("subnet-123"));
        assert_eq!(cloud.call_count("delete_subnet"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_owned_subnet() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(vpc("vpc-1", "10.0.0.0/16"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-1");
        SubnetReconciler.reconcile(&mut scope).await.unwrap();
        let subnet_id = scope.subnet_id().unwrap().to_string();

        SubnetReconciler.delete(&mut scope).await.unwrap();

        assert!(!cloud.subnet_exists(&subnet_id));
    }

    #[tokio::test]
    async fn test_delete_is_noop_without_subnet() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        SubnetReconciler.delete(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("delete_subnet"), 0);
    }
}
