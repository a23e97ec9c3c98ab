use futures_util::SinkExt;
use http::header::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::OpenAiConfig;
use crate::tenants::Tenant;

pub type ProviderSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a realtime speech-to-speech session for a tenant's agent.
///
/// Connects the provider WebSocket and sends the `session.update` carrying
/// the tenant's voice, instructions, audio formats, turn detection, and
/// tool schemas. The returned socket is ready to relay.
pub async fn provision(
    openai: &OpenAiConfig,
    tenant: &Tenant,
    tools: Vec<serde_json::Value>,
) -> Result<ProviderSocket, RealtimeError> {
    let url = format!("{}?model={}", openai.realtime_url, openai.realtime_model);
    let mut request = url
        .into_client_request()
        .map_err(|e| RealtimeError::Request(e.to_string()))?;

    let auth = HeaderValue::from_str(&format!("Bearer {}", openai.api_key))
        .map_err(|e| RealtimeError::Request(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert("Authorization", auth);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (mut socket, _) = connect_async(request)
        .await
        .map_err(|e| RealtimeError::Connect(e.to_string()))?;

    let update = session_update(tenant, tools);
    socket
        .send(Message::Text(update.to_string().into()))
        .await
        .map_err(|e| RealtimeError::Configure(e.to_string()))?;

    tracing::info!(tenant = %tenant.id, "Realtime session provisioned");
    Ok(socket)
}

/// The `session.update` payload configuring the provider session.
pub fn session_update(tenant: &Tenant, tools: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "type": "session.update",
        "session": {
            "modalities": ["audio", "text"],
            "voice": tenant.agent.voice,
            "instructions": tenant.instructions(),
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "turn_detection": { "type": "server_vad" },
            "tools": tools,
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Invalid realtime request: {0}")]
    Request(String),
    #[error("Failed to connect realtime socket: {0}")]
    Connect(String),
    #[error("Failed to configure realtime session: {0}")]
    Configure(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::test_tenant;

    #[test]
    fn session_update_carries_agent_config() {
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");
        let tools = vec![serde_json::json!({"type":"function","name":"send_sms"})];

        let update = session_update(&tenant, tools);
        assert_eq!(update["type"], "session.update");
        let session = &update["session"];
        assert_eq!(session["voice"], "alloy");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert!(session["instructions"]
            .as_str()
            .expect("instructions should be a string")
            .contains("Acme HVAC"));
        assert_eq!(session["tools"].as_array().map(|t| t.len()), Some(1));
    }
}
