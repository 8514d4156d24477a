//! WebSocket connection handler for the bidirectional binding.
//!
//! Connection flow:
//! 1. Client opens `/ws/chat` and sends `{"type":"auth","token":…}`.
//! 2. Server replies `auth_success`, or `auth_error` and closes.
//! 3. Each `chat` frame drives one turn through the orchestrator; the turn's
//!    events are forwarded as frames with a `sessionId` field.
//! 4. `ping` is answered with `pong` at any time; `cancel` flips the
//!    in-flight turn's cancellation flag.
//! 5. A client disconnect mid-turn closes the subscription only - the turn
//!    keeps running so the assistant message still reaches a terminal
//!    status.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::adapters::http::AppState;
use crate::application::{relay, CancelFlag, DEFAULT_RELAY_CAPACITY};
use crate::domain::foundation::{CorrelationId, Principal, SessionId};

use super::frames::{turn_event_text, ClientFrame, ServerFrame};

/// `GET /ws/chat` - upgrade to the bidirectional binding.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut principal: Option<Principal> = None;

    tracing::debug!("websocket connection established");

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "websocket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(_) => {
                        if send_text(&mut sink, ServerFrame::invalid().to_text())
                            .await
                            .is_err()
                        {
                            break;
                        }
                        continue;
                    }
                };

                match frame {
                    ClientFrame::Auth { token } => {
                        match state.validator.validate(&token).await {
                            Ok(validated) => {
                                let authed = Principal::new(
                                    validated.user_id,
                                    validated.role,
                                    CorrelationId::new(),
                                );
                                tracing::info!(
                                    user_id = %authed.user_id,
                                    "websocket authenticated"
                                );
                                principal = Some(authed);
                                if send_text(&mut sink, ServerFrame::AuthSuccess.to_text())
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = send_text(
                                    &mut sink,
                                    ServerFrame::AuthError {
                                        message: e.to_string(),
                                    }
                                    .to_text(),
                                )
                                .await;
                                // Spec: close on authentication failure.
                                break;
                            }
                        }
                    }

                    ClientFrame::Ping => {
                        if send_text(&mut sink, ServerFrame::Pong.to_text())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }

                    ClientFrame::Chat {
                        session_id,
                        message,
                        provider_override,
                    } => {
                        let Some(principal) = principal.as_ref() else {
                            if send_text(&mut sink, ServerFrame::invalid().to_text())
                                .await
                                .is_err()
                            {
                                break;
                            }
                            continue;
                        };

                        // A fresh correlation id per turn on a long-lived
                        // connection.
                        let principal = Principal::new(
                            principal.user_id.clone(),
                            principal.role,
                            CorrelationId::new(),
                        );

                        let disconnected = run_turn(
                            &state,
                            &principal,
                            &session_id,
                            &message,
                            provider_override.as_deref(),
                            &mut sink,
                            &mut stream,
                        )
                        .await;
                        if disconnected {
                            return;
                        }
                    }

                    // A cancel with no turn in flight has nothing to do.
                    ClientFrame::Cancel => {}
                }
            }
            Message::Ping(data) => {
                if sink.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => {
                tracing::debug!("websocket closed by client");
                break;
            }
            _ => {}
        }
    }

    tracing::debug!("websocket connection closed");
}

/// Runs one turn, forwarding its events while listening for `cancel` and
/// `ping` frames. Returns true if the client disconnected.
async fn run_turn(
    state: &AppState,
    principal: &Principal,
    session_id: &str,
    content: &str,
    provider_override: Option<&str>,
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
) -> bool {
    let parsed: Result<SessionId, _> = session_id.parse();
    let Ok(sid) = parsed else {
        let frame = ServerFrame::Error {
            message: "Session id must be a UUID".to_string(),
        };
        return send_text(sink, frame.to_text()).await.is_err();
    };

    let (sender, mut receiver) = relay(DEFAULT_RELAY_CAPACITY, state.metrics.clone());
    let cancel = CancelFlag::new();

    let orchestrator = state.orchestrator.clone();
    let principal_for_turn = principal.clone();
    let content = content.to_string();
    let provider_override = provider_override.map(String::from);
    let cancel_for_turn = cancel.clone();

    let turn = tokio::spawn(async move {
        orchestrator
            .handle_turn(
                &principal_for_turn,
                sid,
                &content,
                provider_override.as_deref(),
                sender,
                cancel_for_turn,
            )
            .await
    });

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Some(event) => {
                        if send_text(sink, turn_event_text(&event, session_id))
                            .await
                            .is_err()
                        {
                            // Write failure: the client is gone. Drop the
                            // subscription; the turn keeps running detached.
                            drop(receiver);
                            return true;
                        }
                    }
                    // Relay closed after the terminal event: turn over.
                    None => return false,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Cancel) => cancel.cancel(),
                            Ok(ClientFrame::Ping) => {
                                if send_text(sink, ServerFrame::Pong.to_text())
                                    .await
                                    .is_err()
                                {
                                    drop(receiver);
                                    return true;
                                }
                            }
                            // One turn in flight per connection.
                            Ok(ClientFrame::Chat { .. }) => {
                                let frame = ServerFrame::Error {
                                    message: "A turn is already in progress".to_string(),
                                };
                                if send_text(sink, frame.to_text()).await.is_err() {
                                    drop(receiver);
                                    return true;
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            drop(receiver);
                            return true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Disconnect mid-stream: keep the turn running so
                        // persistence completes; discard further events.
                        drop(receiver);
                        drop(turn);
                        return true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket read error mid-turn");
                        drop(receiver);
                        drop(turn);
                        return true;
                    }
                }
            }
        }
    }
}

async fn send_text(
    sink: &mut SplitSink<WebSocket, Message>,
    text: String,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(text)).await
}
