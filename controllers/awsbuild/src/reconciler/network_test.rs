//! Unit tests for the network reconciler

#[cfg(test)]
mod tests {
    use crate::reconciler::{NetworkReconciler, Reconcile};
    use crate::test_utils::*;
    use ec2_client::{managed_tags, MockEc2Client, Tag, Vpc};

    fn foreign_vpc(vpc_id: &str, name: &str) -> Vpc {
        Vpc {
            vpc_id: vpc_id.to_string(),
            cidr_block: "172.16.0.0/16".to_string(),
            tags: vec![Tag::new("Name", name)],
        }
    }

    #[tokio::test]
    async fn test_reconcile_creates_vpc_and_gateway() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        NetworkReconciler.reconcile(&mut scope).await.unwrap();

        let vpc_id = scope.vpc_id().unwrap().to_string();
        assert!(cloud.vpc_exists(&vpc_id));
        assert_eq!(scope.vpc_name(), "demo-forge-vpc");
        assert_eq!(cloud.call_count("create_vpc"), 1);
        assert_eq!(cloud.call_count("create_internet_gateway"), 1);
    }

    #[tokio::test]
    async fn test_reconcile_twice_issues_no_duplicate_creates() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        NetworkReconciler.reconcile(&mut scope).await.unwrap();
        let after_first = serde_json::to_value(scope.build()).unwrap();

        NetworkReconciler.reconcile(&mut scope).await.unwrap();
        let after_second = serde_json::to_value(scope.build()).unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(cloud.call_count("create_vpc"), 1);
        assert_eq!(cloud.call_count("create_internet_gateway"), 1);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_vpc_by_name_when_id_is_stale() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(Vpc {
            vpc_id: "vpc-real".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            tags: managed_tags("demo-forge-vpc"),
        });

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-gone");

        NetworkReconciler.reconcile(&mut scope).await.unwrap();

        assert_eq!(scope.vpc_id(), Some("vpc-real"));
        assert_eq!(cloud.call_count("create_vpc"), 0);
    }

    #[tokio::test]
    async fn test_delete_is_noop_without_vpc() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        NetworkReconciler.delete(&mut scope).await.unwrap();

        assert_eq!(cloud.call_count("delete_vpc"), 0);
    }

    #[tokio::test]
    async fn test_delete_skips_foreign_vpc() {
        let cloud = MockEc2Client::new();
        cloud.add_vpc(foreign_vpc("vpc-ext", "someone-elses-vpc"));

        let mut scope = test_scope(test_build("demo"), &cloud);
        scope.set_vpc_id("vpc-ext");

        NetworkReconciler.delete(&mut scope).await.unwrap();

        assert!(cloud.vpc_exists("vpc-ext"));
        assert_eq!(cloud.call_count("delete_vpc"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_owned_vpc() {
        let cloud = MockEc2Client::new();
        let mut scope = test_scope(test_build("demo"), &cloud);

        NetworkReconciler.reconcile(&mut scope).await.unwrap();
        let vpc_id = scope.vpc_id().unwrap().to_string();

        NetworkReconciler.delete(&mut scope).await.unwrap();

        assert!(!cloud.vpc_exists(&vpc_id));
        assert_eq!(cloud.call_count("delete_vpc"), 1);
    }
}
