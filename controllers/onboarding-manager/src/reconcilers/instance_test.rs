//! Unit tests for the Instance reconciler

#[cfg(test)]
mod tests {
    use super::super::InstanceReconciler;
    use crate::test_utils::{host, instance, os, provider, request, Harness};
    use inventory_client::{
        HostState, Instance, InstanceState, OsProviderKind, OsType, StatusIndication,
    };
    use provisioning_client::WorkflowOutcome;
    use reconcile::Reconciler;
    use std::sync::Arc;

    fn reconciler(h: &Harness) -> InstanceReconciler {
        InstanceReconciler::new(
            Arc::clone(&h.client),
            Arc::new(h.workflows.clone()),
            "relay.local:8080",
        )
    }

    /// Onboarded host `host-00000001` with a RUNNING-desired Instance on it
    fn seed(h: &Harness, current: InstanceState) -> Instance {
        let node = host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded);
        let image = os("os-00000001", "t1");
        h.inventory.add_host(node.clone());
        h.inventory.add(image.clone());
        let inst = instance("inst-00000001", &node, &image, InstanceState::Running, current);
        h.inventory.add_instance(inst.clone());
        inst
    }

    #[tokio::test]
    async fn test_successful_provisioning() {
        let h = Harness::new();
        seed(&h, InstanceState::Unspecified);
        h.workflows.push_outcome(WorkflowOutcome::Done);

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_ack(), "{directive:?}");

        let stored = h.inventory.instance("t1", "inst-00000001").unwrap();
        assert_eq!(stored.current_state, InstanceState::Running);
        assert_eq!(stored.provisioning_status, "Provisioned");
        assert_eq!(stored.provisioning_status_indicator, StatusIndication::Idle);
        assert_eq!(
            stored.current_os.map(|os| os.resource_id),
            Some("os-00000001".to_string())
        );

        let node = h.inventory.host("t1", "host-00000001").unwrap();
        assert_eq!(node.host_status, "Rebooting");

        let checks = h.workflows.checks();
        assert_eq!(checks.len(), 1);
        let (device, instance_id) = &checks[0];
        assert_eq!(instance_id, "inst-00000001");
        assert_eq!(device.guid, "uuid-host-00000001");
        assert_eq!(device.hostname, "host-00000001");
        assert_eq!(device.hw_ip, "10.0.0.10");
        assert_eq!(device.os_type, OsType::Mutable);
        assert_eq!(device.os_image_url, "http://relay.local:8080/images/ubuntu-22.04.img");
        assert_eq!(h.workflows.deleted(), vec!["uuid-host-00000001".to_string()]);

        // Re-check is queued without waiting for inventory
        let mut internal = h.client.take_internal_events().unwrap();
        assert_eq!(internal.try_recv().unwrap().resource_id, "inst-00000001");
    }

    #[tokio::test]
    async fn test_provisioned_instance_is_a_no_op() {
        let h = Harness::new();
        seed(&h, InstanceState::Unspecified);
        let reconciler = reconciler(&h);
        assert!(reconciler.reconcile(request("t1", "inst-00000001")).await.is_ack());

        h.inventory.clear_writes();
        assert!(reconciler.reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert!(h.inventory.writes().is_empty());
        assert_eq!(h.workflows.checks().len(), 1);
    }

    #[tokio::test]
    async fn test_in_progress_polls_again() {
        let h = Harness::new();
        seed(&h, InstanceState::Unspecified);
        h.workflows.set_fallback(WorkflowOutcome::InProgress);
        let reconciler = reconciler(&h);

        let directive = reconciler.reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_retry());
        let stored = h.inventory.instance("t1", "inst-00000001").unwrap();
        assert_eq!(stored.provisioning_status, "Provisioning In Progress");
        assert_eq!(stored.provisioning_status_indicator, StatusIndication::InProgress);
        assert!(h.workflows.deleted().is_empty());

        // Nothing changed since the last poll, so nothing is written
        h.inventory.clear_writes();
        assert!(reconciler.reconcile(request("t1", "inst-00000001")).await.is_retry());
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_workflow_latches_failure() {
        let h = Harness::new();
        seed(&h, InstanceState::Unspecified);
        h.workflows.push_outcome(WorkflowOutcome::Aborted);
        let reconciler = reconciler(&h);

        let directive = reconciler.reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_fail());
        let stored = h.inventory.instance("t1", "inst-00000001").unwrap();
        assert!(stored.provisioning_status.starts_with("Provisioning Failed"));
        assert_eq!(stored.provisioning_status_indicator, StatusIndication::Error);

        // Failed stays failed until the Instance is deleted
        h.inventory.clear_writes();
        for _ in 0..3 {
            assert!(reconciler.reconcile(request("t1", "inst-00000001")).await.is_ack());
        }
        assert!(h.inventory.writes().is_empty());
        assert_eq!(h.workflows.checks().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_retries_without_writes() {
        let h = Harness::new();
        seed(&h, InstanceState::Unspecified);
        h.workflows.push_outcome(WorkflowOutcome::Backend);

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_retry());
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_running_without_done_status_is_finished() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Running);
        inst.provisioning_status = "Provisioning In Progress".into();
        inst.provisioning_status_indicator = StatusIndication::InProgress;
        h.inventory.add_instance(inst);

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_ack());
        assert_eq!(h.workflows.checks().len(), 1);
        let stored = h.inventory.instance("t1", "inst-00000001").unwrap();
        assert_eq!(stored.provisioning_status, "Provisioned");
    }

    #[tokio::test]
    async fn test_waits_for_host_onboarding() {
        let h = Harness::new();
        let node = host("host-00000001", "t1", HostState::Onboarded, HostState::Registered);
        let image = os("os-00000001", "t1");
        h.inventory.add_host(node.clone());
        h.inventory.add_instance(instance(
            "inst-00000001",
            &node,
            &image,
            InstanceState::Running,
            InstanceState::Unspecified,
        ));

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_ack());
        assert!(h.workflows.checks().is_empty());
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_provider_owned_host_is_skipped() {
        let h = Harness::new();
        let mut node = host("host-00000001", "t1", HostState::Onboarded, HostState::Onboarded);
        node.provider = Some(provider("t1", "lenovo", "{}"));
        let image = os("os-00000001", "t1");
        h.inventory.add_host(node.clone());
        h.inventory.add_instance(instance(
            "inst-00000001",
            &node,
            &image,
            InstanceState::Running,
            InstanceState::Unspecified,
        ));

        assert!(reconciler(&h).reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert!(h.workflows.checks().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_os_provider_is_skipped() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Unspecified);
        if let Some(os) = inst.desired_os.as_mut() {
            os.os_provider = OsProviderKind::Lenovo;
        }
        h.inventory.add_instance(inst);

        assert!(reconciler(&h).reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert!(h.workflows.checks().is_empty());
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_os_type_fails_without_writes() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Unspecified);
        if let Some(os) = inst.desired_os.as_mut() {
            os.os_type = OsType::Unspecified;
        }
        h.inventory.add_instance(inst);

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_fail());
        assert!(h.workflows.checks().is_empty());
        assert!(h.inventory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cleans_up_and_marks_deleted() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Running);
        inst.desired_state = InstanceState::Deleted;
        h.inventory.add_instance(inst);
        h.workflows.fail_delete(true);

        let directive = reconciler(&h).reconcile(request("t1", "inst-00000001")).await;
        assert!(directive.is_ack());
        let stored = h.inventory.instance("t1", "inst-00000001").unwrap();
        assert_eq!(stored.current_state, InstanceState::Deleted);
    }

    #[tokio::test]
    async fn test_delete_ignores_failed_latch() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Unspecified);
        inst.desired_state = InstanceState::Deleted;
        inst.provisioning_status = "Provisioning Failed".into();
        inst.provisioning_status_indicator = StatusIndication::Error;
        h.inventory.add_instance(inst);

        assert!(reconciler(&h).reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert_eq!(h.workflows.deleted(), vec!["uuid-host-00000001".to_string()]);
        assert_eq!(
            h.inventory.instance("t1", "inst-00000001").unwrap().current_state,
            InstanceState::Deleted
        );
    }

    #[tokio::test]
    async fn test_untrusted_instance() {
        let h = Harness::new();
        let mut inst = seed(&h, InstanceState::Running);
        inst.desired_state = InstanceState::Untrusted;
        h.inventory.add_instance(inst);

        assert!(reconciler(&h).reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert_eq!(
            h.inventory.instance("t1", "inst-00000001").unwrap().current_state,
            InstanceState::Untrusted
        );
        assert!(h.workflows.checks().is_empty());
    }

    #[tokio::test]
    async fn test_deauthorized_host_removes_workflow() {
        let h = Harness::new();
        let mut node = host("host-00000001", "t1", HostState::Untrusted, HostState::Untrusted);
        node.uuid = "uuid-1".into();
        let image = os("os-00000001", "t1");
        h.inventory.add_host(node.clone());
        h.inventory.add_instance(instance(
            "inst-00000001",
            &node,
            &image,
            InstanceState::Running,
            InstanceState::Running,
        ));

        assert!(reconciler(&h).reconcile(request("t1", "inst-00000001")).await.is_ack());
        assert_eq!(h.workflows.deleted(), vec!["uuid-1".to_string()]);
        assert!(h.workflows.checks().is_empty());
        assert!(h.inventory.writes().is_empty());
    }
}
