pub mod protocol;
pub mod registry;

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as ProviderMessage;

use crate::openai::realtime::{self, ProviderSocket};
use crate::tenants::Tenant;
use crate::tools;
use crate::AppState;
use protocol::{ClientMessage, ServerMessage};

/// How long the client has to send `create_session` after connecting.
const CREATE_SESSION_DEADLINE: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler for GET /bridge.
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// One browser demo call: Provisioning → Bridged → Closed.
///
/// The registry entry is inserted here and removed here, after
/// `run_session` returns — every exit path inside it funnels through this
/// single removal, so the table is back to baseline no matter how the
/// session ended.
async fn handle_session(mut client: WebSocket, state: AppState) {
    tracing::info!("Bridge client connected");

    let Some(business_name) = await_create_session(&mut client).await else {
        return;
    };

    let Some(tenant) = state.tenants.by_name(&business_name).cloned() else {
        tracing::info!(business = %business_name, "Unknown business for bridge session");
        let frame = ServerMessage::error(format!("no such business: {business_name}"));
        let _ = client
            .send(Message::Text(frame.to_json().into()))
            .await;
        return;
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    state
        .bridge_sessions
        .insert(session_id.clone(), tenant.id.clone())
        .await;

    run_session(client, &state, &tenant, &session_id).await;

    state.bridge_sessions.remove(&session_id).await;
}

/// Wait for the client's `create_session` request.
async fn await_create_session(client: &mut WebSocket) -> Option<String> {
    let deadline = tokio::time::sleep(CREATE_SESSION_DEADLINE);
    let mut deadline = pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("No create_session before deadline, closing");
                let frame = ServerMessage::error("expected create_session");
                let _ = client.send(Message::Text(frame.to_json().into())).await;
                return None;
            }
            msg = client.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Err(e)) => {
                        tracing::warn!("Bridge socket error before session: {e}");
                        return None;
                    }
                    _ => continue,
                };
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::CreateSession { business_name }) => {
                        return Some(business_name);
                    }
                    Ok(_) => {
                        let frame = ServerMessage::error("create_session must come first");
                        let _ = client.send(Message::Text(frame.to_json().into())).await;
                    }
                    Err(e) => {
                        tracing::warn!("Malformed bridge frame: {e}");
                        let frame = ServerMessage::error("malformed frame");
                        let _ = client.send(Message::Text(frame.to_json().into())).await;
                    }
                }
            }
        }
    }
}

async fn run_session(mut client: WebSocket, state: &AppState, tenant: &Tenant, session_id: &str) {
    // Provisioning, racing the client's own socket: a client that leaves
    // now must not leave an orphaned provider connection behind. Dropping
    // the pinned future tears down whatever it had opened.
    let schemas = tools::schemas(&tenant.agent.tools);
    let mut provisioning = pin!(realtime::provision(&state.config.openai, tenant, schemas));
    let provider = loop {
        tokio::select! {
            result = &mut provisioning => match result {
                Ok(provider) => break provider,
                Err(e) => {
                    tracing::error!(session_id, "Provisioning failed: {e}");
                    let frame = ServerMessage::error("could not start realtime session");
                    let _ = client.send(Message::Text(frame.to_json().into())).await;
                    return;
                }
            },
            msg = client.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id, "Client left during provisioning");
                    return;
                }
                Some(Ok(_)) => {
                    tracing::debug!(session_id, "Frame before session ready, dropping");
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id, "Bridge socket error during provisioning: {e}");
                    return;
                }
            }
        }
    };

    let created = ServerMessage::SessionCreated {
        session_id: session_id.to_string(),
    };
    if client
        .send(Message::Text(created.to_json().into()))
        .await
        .is_err()
    {
        // Provider socket drops here, closing it
        return;
    }

    tracing::info!(session_id, tenant = %tenant.id, "Bridged");
    relay(client, provider, state, tenant, session_id).await;

    tracing::info!(session_id, "Bridge session closing");
}

/// Relay loop for a bridged session.
///
/// Both sockets are split; writer tasks drain bounded queues so a slow
/// consumer on either side backs up into `try_send` drops (audio only)
/// instead of unbounded memory. Dropping the queue senders on exit closes
/// both writers, which close their sinks.
async fn relay(
    client: WebSocket,
    provider: ProviderSocket,
    state: &AppState,
    tenant: &Tenant,
    session_id: &str,
) {
    let queue = state.config.bridge.outbound_queue;
    let idle_timeout = Duration::from_secs(state.config.bridge.idle_timeout_secs);

    let (client_sink, mut client_stream) = client.split();
    let (client_tx, client_rx) = mpsc::channel::<Message>(queue);
    tokio::spawn(drain_to_client(client_sink, client_rx));

    let (provider_sink, mut provider_stream) = provider.split();
    let (provider_tx, provider_rx) = mpsc::channel::<ProviderMessage>(queue);
    tokio::spawn(drain_to_provider(provider_sink, provider_rx));

    let max_deadline =
        tokio::time::sleep(Duration::from_secs(state.config.bridge.max_session_secs));
    let mut max_deadline = pin!(max_deadline);
    let idle = tokio::time::sleep(idle_timeout);
    let mut idle = pin!(idle);

    let mut dropped_audio: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut max_deadline => {
                tracing::info!(session_id, "Max session duration reached");
                break;
            }
            // Idle means no traffic in either direction: a silent client
            // still listening to a streaming response is not idle.
            _ = &mut idle => {
                tracing::info!(session_id, "Bridge session idle, closing");
                break;
            }
            msg = client_stream.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !forward_client_frame(&text, &provider_tx, &client_tx, &mut dropped_audio).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Raw audio frames get wrapped for the provider
                        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                        let event = serde_json::json!({
                            "type": "input_audio_buffer.append",
                            "audio": b64,
                        });
                        match provider_tx
                            .try_send(ProviderMessage::Text(event.to_string().into()))
                        {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => dropped_audio += 1,
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(session_id, "Client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id, "Client socket error: {e}");
                        break;
                    }
                }
            }
            msg = provider_stream.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                match msg {
                    Some(Ok(ProviderMessage::Text(text))) => {
                        if !forward_provider_event(
                            text.as_str(),
                            state,
                            tenant,
                            session_id,
                            &provider_tx,
                            &client_tx,
                            &mut dropped_audio,
                        ).await {
                            break;
                        }
                    }
                    Some(Ok(ProviderMessage::Ping(payload))) => {
                        let _ = provider_tx.try_send(ProviderMessage::Pong(payload));
                    }
                    Some(Ok(ProviderMessage::Close(_))) | None => {
                        tracing::info!(session_id, "Provider disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id, "Provider socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    if dropped_audio > 0 {
        tracing::debug!(session_id, dropped_audio, "Dropped audio frames under backpressure");
    }

    // One structured goodbye, then closing the queues closes the writers
    let goodbye = Message::Text(ServerMessage::Disconnected.to_json().into());
    let _ = client_tx.send(goodbye).await;
}

/// Forward one client frame to the provider. Returns false when the
/// session should end.
async fn forward_client_frame(
    text: &str,
    provider_tx: &mpsc::Sender<ProviderMessage>,
    client_tx: &mpsc::Sender<Message>,
    dropped_audio: &mut u64,
) -> bool {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Audio { .. }) => {
            // Forwarded verbatim; droppable under backpressure
            match provider_tx.try_send(ProviderMessage::Text(text.to_string().into())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    *dropped_audio += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        }
        Ok(ClientMessage::CreateSession { .. }) => {
            let frame = ServerMessage::error("session already created");
            let _ = client_tx.try_send(Message::Text(frame.to_json().into()));
            true
        }
        Ok(ClientMessage::StartListening) | Ok(ClientMessage::StopListening) => {
            // Control frames must not be dropped
            provider_tx
                .send(ProviderMessage::Text(text.to_string().into()))
                .await
                .is_ok()
        }
        Err(e) => {
            tracing::warn!("Malformed client frame: {e}");
            let frame = ServerMessage::error("malformed frame");
            let _ = client_tx.try_send(Message::Text(frame.to_json().into()));
            true
        }
    }
}

/// Forward one provider event to the client, routing tool calls through
/// the executor first. Returns false when the session should end.
async fn forward_provider_event(
    text: &str,
    state: &AppState,
    tenant: &Tenant,
    session_id: &str,
    provider_tx: &mpsc::Sender<ProviderMessage>,
    client_tx: &mpsc::Sender<Message>,
    dropped_audio: &mut u64,
) -> bool {
    let event_type = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_default();

    if event_type == "response.function_call_arguments.done" {
        dispatch_tool_call(text, state, tenant, session_id, provider_tx);
    }

    let frame = Message::Text(text.to_string().into());
    if is_droppable(&event_type) {
        match client_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                *dropped_audio += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    } else {
        client_tx.send(frame).await.is_ok()
    }
}

/// Audio deltas can be shed under backpressure; everything else is
/// control or transcript state the client needs.
fn is_droppable(event_type: &str) -> bool {
    event_type.ends_with("audio.delta")
}

/// Run a tool call off the relay loop and feed the result back into the
/// provider conversation. A failing tool produces an error result the
/// model can voice; it never tears the session down.
fn dispatch_tool_call(
    text: &str,
    state: &AppState,
    tenant: &Tenant,
    session_id: &str,
    provider_tx: &mpsc::Sender<ProviderMessage>,
) {
    let event: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    let name = event
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let call_id = event
        .get("call_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let arguments = event
        .get("arguments")
        .and_then(|v| v.as_str())
        .unwrap_or("{}")
        .to_string();
    if name.is_empty() || call_id.is_empty() {
        tracing::warn!(session_id, "Tool call event missing name or call_id");
        return;
    }

    tracing::info!(session_id, tool = %name, "Tool call");
    let executor = Arc::clone(&state.tools);
    let tenant = tenant.clone();
    let provider_tx = provider_tx.clone();
    tokio::spawn(async move {
        let result = executor.execute(&tenant, &name, &arguments).await;
        let output = serde_json::json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": result.to_string(),
            }
        });
        if provider_tx
            .send(ProviderMessage::Text(output.to_string().into()))
            .await
            .is_ok()
        {
            let resume = serde_json::json!({ "type": "response.create" });
            let _ = provider_tx
                .send(ProviderMessage::Text(resume.to_string().into()))
                .await;
        }
    });
}

async fn drain_to_client(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn drain_to_provider(
    mut sink: SplitSink<ProviderSocket, ProviderMessage>,
    mut rx: mpsc::Receiver<ProviderMessage>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
