//! WebSocket upgrade handler for interview rooms.
//!
//! Handles the HTTP → WebSocket upgrade and hands the socket to the
//! connection lifecycle:
//! 1. Validate the access token
//! 2. Check the user may join the room (refusals are plain HTTP errors)
//! 3. Refuse requests that cannot be upgraded
//! 4. Record the participant and upgrade to WebSocket
//! 5. Pump outbound frames from the connection's queue to the socket
//! 6. Serve inbound frames until the client leaves or shutdown
//!
//! # Token Extraction
//!
//! Browsers cannot set headers on a WebSocket upgrade, so the token is read
//! from the `Authorization: Bearer` header or the `access_token` query
//! parameter, in that order.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::application::{
    Admission, AdmissionError, AdmitParticipantCommand, AdmitParticipantHandler,
};
use crate::domain::foundation::{AuthError, RoomId};
use crate::domain::participant::{OutboundFrame, Participant};
use crate::ports::{ServerId, SessionValidator};

use super::bridge::BusBridge;
use super::registry::ConnectionRegistry;
use super::session::{ConnectionHandler, InboundMessage, TransportError};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub admission: Arc<AdmitParticipantHandler>,
    pub validator: Arc<dyn SessionValidator>,
    pub connections: Arc<ConnectionHandler>,
    pub registry: Arc<ConnectionRegistry>,
    pub bridge: Arc<BusBridge>,
    pub server_id: ServerId,
    pub shutdown: watch::Receiver<bool>,
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub access_token: Option<String>,
}

/// Why an upgrade request was refused.
#[derive(Debug, thiserror::Error)]
pub enum ConnectRejection {
    #[error("Invalid room id")]
    InvalidRoomId,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

impl ConnectRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            ConnectRejection::InvalidRoomId => StatusCode::BAD_REQUEST,
            ConnectRejection::Auth(AuthError::ServiceUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ConnectRejection::Auth(_) => StatusCode::UNAUTHORIZED,
            ConnectRejection::Admission(AdmissionError::RoomNotFound(_)) => StatusCode::NOT_FOUND,
            ConnectRejection::Admission(AdmissionError::RoomClosed(_)) => StatusCode::CONFLICT,
            ConnectRejection::Admission(AdmissionError::Forbidden) => StatusCode::FORBIDDEN,
            ConnectRejection::Admission(AdmissionError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ConnectRejection::InvalidRoomId => "INVALID_ROOM_ID",
            ConnectRejection::Auth(_) => "AUTH_ERROR",
            ConnectRejection::Admission(AdmissionError::RoomNotFound(_)) => "ROOM_NOT_FOUND",
            ConnectRejection::Admission(AdmissionError::RoomClosed(_)) => "ROOM_CLOSED",
            ConnectRejection::Admission(AdmissionError::Forbidden) => "FORBIDDEN",
            ConnectRejection::Admission(AdmissionError::Unavailable(_)) => "UNAVAILABLE",
        }
    }
}

impl IntoResponse for ConnectRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Admission backend unavailable");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

fn bearer_token<'a>(headers: &'a HeaderMap, query: &'a ConnectQuery) -> Option<&'a str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .or(query.access_token.as_deref())
        .filter(|token| !token.is_empty())
}

/// Validate the token and check the user may join. Writes nothing.
pub async fn check_request(
    state: &WebSocketState,
    room_id: &str,
    headers: &HeaderMap,
    query: &ConnectQuery,
) -> Result<Admission, ConnectRejection> {
    let room_id: RoomId = room_id.parse().map_err(|_| ConnectRejection::InvalidRoomId)?;
    let token = bearer_token(headers, query).ok_or(AuthError::MissingToken)?;
    let user = state.validator.validate(token).await?;

    let admission = state
        .admission
        .check(&AdmitParticipantCommand { room_id, user })
        .await?;
    Ok(admission)
}

/// Validate the token and admit the user, recording the participant.
pub async fn admit_request(
    state: &WebSocketState,
    room_id: &str,
    headers: &HeaderMap,
    query: &ConnectQuery,
) -> Result<Participant, ConnectRejection> {
    let admission = check_request(state, room_id, headers, query).await?;
    Ok(state.admission.complete(admission).await?)
}

/// Handle WebSocket upgrade requests for a room.
///
/// Route: `GET /rooms/:room_id/ws`
///
/// The admission check runs first, so refusals are reported even to
/// requests that could not have been upgraded. The participant is only
/// recorded once the upgrade is known to be valid.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path(room_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<WebSocketState>,
) -> Response {
    let admission = match check_request(&state, &room_id, &headers, &query).await {
        Ok(admission) => admission,
        Err(rejection) => {
            tracing::debug!(room_id = %room_id, error = %rejection, "Connection refused");
            return rejection.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    match state.admission.complete(admission).await {
        Ok(participant) => ws.on_upgrade(move |socket| handle_socket(socket, participant, state)),
        Err(e) => ConnectRejection::from(e).into_response(),
    }
}

/// Run an upgraded socket for its whole lifetime.
async fn handle_socket(socket: WebSocket, participant: Participant, state: WebSocketState) {
    let (sink, stream) = socket.split();
    let (connection, outbound) = state.connections.open(&participant);

    let writer = tokio::spawn(write_frames(sink, outbound));
    let active = state.connections.connect(connection).await;

    let inbound = stream.filter_map(|message| futures::future::ready(inbound_message(message)));
    active.serve(inbound, state.shutdown.clone()).await;

    // The writer ends after the close frame, or once the queue is dropped
    let close_timeout = state.connections.config().close_timeout;
    if tokio::time::timeout(close_timeout, writer).await.is_err() {
        tracing::debug!(participant_id = %participant.id, "Socket writer did not finish in time");
    }
}

fn inbound_message(
    message: Result<Message, axum::Error>,
) -> Option<Result<InboundMessage, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(InboundMessage::Text(text))),
        Ok(Message::Close(_)) => Some(Ok(InboundMessage::Close)),
        Ok(Message::Binary(_)) => {
            tracing::warn!("Received unsupported binary message");
            None
        }
        // Protocol pings are answered by axum
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(TransportError(e.to_string()))),
    }
}

/// Drain the connection's outbound queue into the socket.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.to_string())).await {
                    tracing::debug!(error = %e, "Send error, stopping writer");
                    break;
                }
            }
            OutboundFrame::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub server_id: String,
    pub connections: usize,
    pub rooms: usize,
    pub bus_connected: bool,
}

/// Liveness and local load of this process.
pub async fn health_handler(State(state): State<WebSocketState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        server_id: state.server_id.to_string(),
        connections: state.registry.total_connection_count(),
        rooms: state.registry.active_rooms().len(),
        bus_connected: state.bridge.is_connected(),
    })
}

/// Create axum router for the real-time endpoints.
pub fn websocket_router() -> Router<WebSocketState> {
    Router::new()
        .route("/rooms/:room_id/ws", get(ws_handler))
        .route("/health", get(health_handler))
}
