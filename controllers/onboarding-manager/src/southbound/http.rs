//! HTTP surface of the device-facing service
//!
//! - `POST|GET|PATCH|DELETE /v1/nodes` - interactive node registration
//! - `GET /v1/onboarding/stream` - WebSocket onboarding exchange, one JSON
//!   request and one JSON response per frame
//! - `GET /healthz`, `GET /readyz` - probes
//!
//! The tenant comes from the `ActiveProjectID` header and the caller's roles
//! from the comma separated `X-Roles` header.

use super::api::{NodeQuery, NodeRequest, NodeResponse, OnboardStreamRequest, OnboardStreamResponse, Status};
use super::nodes::NodeService;
use super::session::OnboardingSession;
use super::zero_touch::ZeroTouch;
use crate::error::ControllerError;
use crate::invclient::OnboardingInventoryClient;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use provisioning_client::{CredentialClient, RequestContext};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const TENANT_HEADER: &str = "activeprojectid";
pub const ROLES_HEADER: &str = "x-roles";

#[derive(Clone)]
pub struct AppState {
    pub nodes: Arc<NodeService>,
    pub inventory: Arc<OnboardingInventoryClient>,
    pub credentials: Arc<dyn CredentialClient>,
    pub zero_touch: ZeroTouch,
    /// Flipped by the controller once its initial reconciliation is queued
    pub ready: Arc<AtomicBool>,
    /// Ends open onboarding streams on shutdown
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/nodes",
            get(get_nodes)
                .post(create_nodes)
                .patch(update_nodes)
                .delete(delete_nodes),
        )
        .route("/v1/onboarding/stream", get(onboarding_stream))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` fires
pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Onboarding service listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Onboarding service stopped");
    Ok(())
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    RequestContext {
        tenant_id: header(TENANT_HEADER).map(str::to_string),
        roles: header(ROLES_HEADER)
            .map(|roles| {
                roles
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

async fn create_nodes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NodeRequest>,
) -> Result<Json<NodeResponse>, Status> {
    state
        .nodes
        .create_nodes(&request_context(&headers), request)
        .await
        .map(Json)
}

async fn get_nodes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NodeQuery>,
) -> Result<Json<NodeResponse>, Status> {
    state
        .nodes
        .get_nodes(&request_context(&headers), query)
        .await
        .map(Json)
}

async fn update_nodes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NodeRequest>,
) -> Result<Json<NodeResponse>, Status> {
    state
        .nodes
        .update_nodes(&request_context(&headers), request)
        .await
        .map(Json)
}

async fn delete_nodes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NodeRequest>,
) -> Result<Json<NodeResponse>, Status> {
    state
        .nodes
        .delete_nodes(&request_context(&headers), request)
        .await
        .map(Json)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn onboarding_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// One onboarding session per connection
async fn handle_stream(socket: WebSocket, state: AppState) {
    info!("Onboarding stream started");
    let (mut sender, mut receiver) = socket.split();
    let mut session = OnboardingSession::new(Arc::clone(&state.inventory), Arc::clone(&state.credentials));

    loop {
        let message = tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!("Shutting down onboarding stream");
                break;
            }
            message = receiver.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                warn!("Binary frame on onboarding stream");
                let reply = OnboardStreamResponse::error(Status::invalid_argument("binary frames are not supported"));
                if send_response(&mut sender, &reply).await.is_err() {
                    break;
                }
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                info!("Onboarding stream closed by the device");
                break;
            }
            Some(Err(e)) => {
                error!("Onboarding stream error receiving from stream: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<OnboardStreamRequest>(text.as_str()) {
            Ok(request) => session.handle(&request).await,
            Err(e) => {
                warn!("Malformed onboarding request: {}", e);
                let response = OnboardStreamResponse::error(Status::invalid_argument(format!("invalid request: {e}")));
                if send_response(&mut sender, &response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if send_response(&mut sender, &reply.response).await.is_err() {
            break;
        }
        if reply.close {
            if let Err(e) = sender.send(Message::Close(None)).await {
                debug!("Failed to send close frame: {}", e);
            }
            break;
        }
    }

    if let Some((tenant_id, host_id)) = session.zero_touch_target() {
        let zero_touch = state.zero_touch.clone();
        tokio::spawn(async move {
            if let Err(e) = zero_touch.start(&tenant_id, &host_id).await {
                error!("Failed to start zero touch process for {}: {}", host_id, e);
            }
        });
    }
    info!("Onboarding stream ended in state {:?}", session.state());
}

async fn send_response(
    sender: &mut SplitSink<WebSocket, Message>,
    response: &OnboardStreamResponse,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize onboarding response: {}", e);
            return Err(axum::Error::new(e));
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|e| {
        error!("Failed to send response on the stream: {}", e);
        e
    })
}
