//! HTTP surface of the real-time node: health and upgrade refusals.

mod common;

use axum::body::Body;
use http::{Request, StatusCode};
use tower::ServiceExt;

use common::Cluster;
use interview_rooms_realtime::adapters::websocket::{websocket_router, HealthResponse};

async fn get(app: axum::Router, uri: &str, token: Option<&str>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn health_reports_server_and_load() {
    let cluster = Cluster::new();
    let room = cluster.open_room().await;
    cluster.user("alice");
    let node = cluster.node("node-health");
    let _alice = node.connect_local(room, "alice").await.unwrap();

    let app = websocket_router().with_state(node.websocket_state());
    let (status, body) = get(app, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.server_id, "node-health");
    assert_eq!(health.connections, 1);
    assert_eq!(health.rooms, 1);
}

#[tokio::test]
async fn upgrade_refusals_map_to_status_codes() {
    let cluster = Cluster::new();
    let room = cluster.open_room().await;
    cluster.user("alice");
    let node = cluster.node("node-http");
    let app = websocket_router().with_state(node.websocket_state());

    let (status, body) = get(app.clone(), &format!("/rooms/{}/ws", room), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "AUTH_ERROR");

    let (status, _) = get(app.clone(), "/rooms/not-a-uuid/ws", Some("alice")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = get(app.clone(), &format!("/rooms/{}/ws", unknown), Some("alice")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Cleared to join, but a plain GET cannot be upgraded
    let (status, _) = get(app, &format!("/rooms/{}/ws", room), Some("alice")).await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(node.registry().total_connection_count(), 0);
}

#[tokio::test]
async fn request_that_cannot_upgrade_records_no_participant() {
    let cluster = Cluster::new();
    let room = cluster.open_room().await;
    cluster.user("alice");
    let node = cluster.node("node-http");
    let app = websocket_router().with_state(node.websocket_state());

    for _ in 0..3 {
        let (status, _) = get(app.clone(), &format!("/rooms/{}/ws", room), Some("alice")).await;
        assert!(status.is_client_error());
    }
    assert_eq!(cluster.participants.count_in_room(&room).await, 0);

    // A real connection still creates exactly one record
    let _alice = node.connect_local(room, "alice").await.unwrap();
    assert_eq!(cluster.participants.count_in_room(&room).await, 1);
}
