use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use crewline_common::types::UserIdentity;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRecord;
use super::DispatchedMessage;
use crate::compress::{self, CompressionConfig};
use crate::error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope};
use crate::pipeline::PipelineVerdict;
use crate::GatewayState;

/// Server pings every `HEARTBEAT_INTERVAL`; a connection that has not
/// answered with a pong within `HEARTBEAT_TIMEOUT` of the last one is
/// presumed dead and disconnected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level frame cap, enforced before any payload validation runs.
/// Larger than the application message limit so oversized-but-parseable
/// payloads still get a structured validation error instead of a bare close.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Origin is checked before the upgrade is accepted: a rejected origin
    // never gets a WebSocket at all, only an HTTP error.
    let origin = headers.get(header::ORIGIN).and_then(|value| value.to_str().ok());
    if let Err(error) = state.gate.validate_origin(origin) {
        warn!(origin = origin.unwrap_or(""), "rejecting websocket handshake");
        return error.into_response();
    }

    // Identity comes from a short-lived token, either as a `token` query
    // parameter or a bearer Authorization header. Token failures are
    // resolved to "no identity" here and rejected after the accept, so the
    // client receives a structured error frame rather than a bare HTTP 401.
    let identity = handshake_token(&params, &headers)
        .and_then(|token| state.tokens.validate_identity_token(&token).ok());

    let channel = params.get("channel").filter(|value| !value.is_empty()).cloned();
    let compression = compress::negotiate(&headers);
    let request_id = request_id_from_headers_or_generate(&headers);

    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(
            request_id,
            handle_socket(state, identity, channel, compression, socket),
        )
        .await;
    })
}

/// Token precedence: explicit `token` query parameter first, then the
/// Authorization bearer header. Browsers cannot set custom headers on
/// WebSocket handshakes, so the query parameter is the common path.
fn handshake_token(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = params.get("token").filter(|value| !value.is_empty()) {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
                .into(),
        })))
        .await;
}

async fn handle_socket(
    state: GatewayState,
    identity: Option<UserIdentity>,
    channel: Option<String>,
    compression: CompressionConfig,
    mut socket: WebSocket,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    // Identity failures are terminal before any registration happens: the
    // client gets the error frame and a close, and no connection is ever
    // counted as opened.
    let identity = match state.gate.validate_authentication(identity.as_ref()) {
        Ok(identity) => identity.clone(),
        Err(error) => {
            warn!(request_id = %request_id, "closing unauthenticated websocket");
            let _ = socket.send(Message::Text(error.to_frame().encode().into())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();

    state
        .registry
        .register(ConnectionRecord::new(
            connection_id,
            identity.user_id,
            channel.clone(),
            compression,
            outbound_sender,
        ))
        .await;
    state
        .metrics
        .connection_opened(connection_id, identity.user_id, channel.as_deref())
        .await;

    info!(
        connection_id = %connection_id,
        user_id = %identity.user_id,
        username = %identity.username,
        channel = channel.as_deref().unwrap_or(""),
        compression = compression.enabled,
        request_id = %request_id,
        "websocket connected"
    );

    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > HEARTBEAT_INTERVAL + HEARTBEAT_TIMEOUT {
                    warn!(
                        connection_id = %connection_id,
                        request_id = %request_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound) => {
                        if compression.should_compress(outbound.len()) {
                            debug!(
                                connection_id = %connection_id,
                                bytes = outbound.len(),
                                "sending compressed frame"
                            );
                        }
                        if socket.send(Message::Text(outbound.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        let started_at = Instant::now();
                        match state.pipeline.process(Some(&identity), &raw_message).await {
                            PipelineVerdict::Dispatch(envelope) => {
                                let message_type = envelope.message_type.clone();
                                if compression.should_compress(envelope.serialized_len()) {
                                    debug!(
                                        connection_id = %connection_id,
                                        message_type = %message_type,
                                        "dispatching compressible payload"
                                    );
                                }
                                state.dispatcher.dispatch(DispatchedMessage {
                                    connection_id,
                                    user_id: identity.user_id,
                                    envelope,
                                });
                                state.metrics.message_sent(
                                    &message_type,
                                    Some(started_at.elapsed().as_secs_f64() * 1_000.0),
                                );
                            }
                            PipelineVerdict::Reject { frame, close } => {
                                if socket
                                    .send(Message::Text(frame.encode().into()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                                if close {
                                    let _ = socket.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    state.registry.deregister(connection_id).await;
    state.metrics.connection_closed(connection_id).await;
    info!(
        connection_id = %connection_id,
        user_id = %identity.user_id,
        request_id = %request_id,
        "websocket disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_token_takes_precedence_over_bearer_header() {
        let mut params = HashMap::new();
        params.insert("token".to_string(), "from-query".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        assert_eq!(handshake_token(&params, &headers).as_deref(), Some("from-query"));
    }

    #[test]
    fn bearer_header_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        assert_eq!(
            handshake_token(&HashMap::new(), &headers).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn missing_or_empty_credentials_yield_no_token() {
        assert_eq!(handshake_token(&HashMap::new(), &HeaderMap::new()), None);

        let mut params = HashMap::new();
        params.insert("token".to_string(), String::new());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(handshake_token(&params, &headers), None);
    }

    #[test]
    fn frame_cap_exceeds_the_application_message_limit() {
        assert!(MAX_FRAME_BYTES > crewline_common::protocol::ws::MAX_MESSAGE_BYTES);
    }
}
