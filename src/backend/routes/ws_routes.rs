/**
 * WebSocket Routes
 *
 * `GET /ws/{document_id}` authenticates the caller, resolves the document
 * session through the registry, and only then upgrades. Failures before
 * the upgrade are plain HTTP responses:
 *
 * - 401 - missing or invalid token
 * - 404 - unknown document
 * - 503 - session is shutting down (`SESSION_CLOSING`, retry)
 *
 * The token is read from `?token=` or, for browsers that cannot set
 * headers on a WebSocket, from `Sec-WebSocket-Protocol`.
 */
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;

use crate::backend::auth::verify_token;
use crate::backend::collab::{Connection, Frame, Session, TransportError};
use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;
use crate::shared::message::Participant;

/// Configure WebSocket routes
pub fn configure_ws_routes(router: Router<AppState>) -> Router<AppState> {
    router.route("/ws/{document_id}", get(handle_document_socket))
}

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Token offered as a WebSocket subprotocol, skipping a leading `bearer` marker
fn protocol_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find(|entry| !entry.is_empty() && !entry.eq_ignore_ascii_case("bearer"))
                .map(str::to_string)
        })
}

/// Upgrade into a document session
pub async fn handle_document_socket(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, BackendError> {
    let from_protocol = protocol_token(&headers);
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| from_protocol.clone())
        .ok_or_else(|| BackendError::unauthorized("missing token"))?;

    let claims = verify_token(&token, &state.jwt).map_err(|e| {
        tracing::warn!("[WS] Rejected token for {}: {}", document_id, e);
        BackendError::unauthorized("invalid token")
    })?;
    let participant = claims.participant();

    let session = state.registry.get_or_create(&document_id).await?;

    let mut upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    upgrade = upgrade.max_message_size(state.registry.config().max_message_size);
    if let Some(protocol) = from_protocol.filter(|p| *p == token) {
        upgrade = upgrade.protocols([protocol]);
    }

    tracing::info!("[WS] {} connecting to {}", participant.user_id, document_id);
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, session, participant)))
}

async fn serve_socket(socket: WebSocket, session: Session, participant: Participant) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TransportError::Other(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));
    let stream = stream.map(|result| {
        result
            .map(message_to_frame)
            .map_err(|e| TransportError::Other(e.to_string()))
    });

    let user_id = participant.user_id.clone();
    let document_id = session.document_id().to_string();
    if let Err(e) = Connection::new(session, participant).run(sink, stream).await {
        tracing::info!("[WS] {} left {}: {}", user_id, document_id, e);
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}
