//! HTTP client tests against a stub inventory service

use futures::StreamExt;
use inventory_client::{
    ClientConfig, EventKind, FieldMask, Host, HostState, InventoryClient, InventoryClientTrait,
    InventoryError, ResourceFilter, ResourceKind,
};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> InventoryClient {
    let mut config = ClientConfig::new(server.uri(), "onboarding-test");
    config.abort_on_unknown_client = false;
    config.timeout = Duration::from_millis(500);
    InventoryClient::new(config).unwrap()
}

#[tokio::test]
async fn test_get_decodes_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/t1/resources/host-1"))
        .and(header("X-Inventory-Client", "onboarding-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "host",
            "resource": {
                "resource_id": "host-1",
                "tenant_id": "t1",
                "uuid": "0000-1111",
                "desired_state": "ONBOARDED",
                "current_state": "REGISTERED"
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let host = Host::try_from(client.get("t1", "host-1").await.unwrap()).unwrap();
    assert_eq!(host.uuid, "0000-1111");
    assert_eq!(host.desired_state, HostState::Onboarded);
    assert_eq!(host.current_state, HostState::Registered);
    assert!(host.host_nics.is_empty());
}

#[tokio::test]
async fn test_error_body_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/t1/resources/host-404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": "NOT_FOUND",
            "message": "no such host"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/tenants/t1/resources/host-busy"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "code": "OPERATION_IN_PROGRESS",
            "message": "busy"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get("t1", "host-404").await.unwrap_err();
    assert!(matches!(err, InventoryError::NotFound(ref m) if m == "no such host"));
    assert!(err.is_convergent());

    let err = client.delete("t1", "host-busy").await.unwrap_err();
    assert!(matches!(err, InventoryError::OperationInProgress(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unknown_client_reported_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/t1/resources/host-1"))
        .respond_with(ResponseTemplate::new(412).set_body_string("who are you"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get("t1", "host-1").await.unwrap_err();
    assert!(matches!(err, InventoryError::Unavailable(_)));
}

#[tokio::test]
async fn test_update_sends_field_mask() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v1/tenants/t1/resources/host-1"))
        .and(body_partial_json(serde_json::json!({
            "field_mask": { "paths": ["current_state"] },
            "resource": { "kind": "host", "resource": { "current_state": "DELETED" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "host",
            "resource": { "resource_id": "host-1", "tenant_id": "t1", "current_state": "DELETED" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let host = Host {
        resource_id: "host-1".into(),
        tenant_id: "t1".into(),
        current_state: HostState::Deleted,
        ..Default::default()
    };
    client
        .update("t1", "host-1", &FieldMask::new(&["current_state"]), host.into())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_without_mask_is_rejected_locally() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let err = client
        .update("t1", "host-1", &FieldMask::default(), Host::default().into())
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_list_passes_filter_and_paging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/hosts"))
        .and(query_param("tenant_id", "t1"))
        .and(query_param("serial_number", "ABC"))
        .and(query_param("limit", "100"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                { "kind": "host", "resource": { "resource_id": "host-1", "tenant_id": "t1", "serial_number": "ABC" } }
            ],
            "has_next": false,
            "total_elements": 1
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let all = inventory_client::list_all(
        &client,
        &ResourceFilter::new(ResourceKind::Host)
            .tenant("t1")
            .field("serial_number", "ABC"),
    )
    .await
    .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].resource_id(), "host-1");
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/t1/resources/host-1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get("t1", "host-1").await.unwrap_err();
    assert!(matches!(err, InventoryError::Http(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_subscribe_streams_ndjson() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/subscriptions"))
        .and(body_partial_json(serde_json::json!({
            "client_name": "onboarding-test",
            "kinds": ["host", "instance"]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "subscription_id": "sub-1" })),
        )
        .mount(&server)
        .await;
    let body = concat!(
        r#"{"kind":"host","tenant_id":"t1","resource_id":"host-1","event_kind":"UPDATED","sequence":1}"#,
        "\n\n",
        r#"{"kind":"instance","tenant_id":"t1","resource_id":"inst-1","event_kind":"CREATED","sequence":2}"#,
        "\n",
        r#"{"error":{"code":"CANCELED","message":"server shutting down"}}"#,
        "\n",
    );
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions/sub-1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .subscribe("onboarding-test", &[ResourceKind::Host, ResourceKind::Instance])
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.resource_id, "host-1");
    assert_eq!(first.event_kind, EventKind::Updated);
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.kind, ResourceKind::Instance);
    let ended = stream.next().await.unwrap();
    assert!(matches!(ended, Err(InventoryError::Canceled(_))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_subscribe_keeps_unterminated_final_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/subscriptions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "subscription_id": "sub-2" })),
        )
        .mount(&server)
        .await;
    let body = concat!(
        r#"{"kind":"host","tenant_id":"t1","resource_id":"host-1","event_kind":"UPDATED","sequence":1}"#,
        "\n",
        r#"{"error":{"code":"CANCELED","message":"server shutting down"}}"#,
    );
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions/sub-2/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .subscribe("onboarding-test", &[ResourceKind::Host])
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.resource_id, "host-1");
    let ended = stream.next().await;
    assert!(matches!(ended, Some(Err(InventoryError::Canceled(_)))));
    assert!(stream.next().await.is_none());
}
