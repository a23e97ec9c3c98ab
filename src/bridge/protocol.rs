use serde::{Deserialize, Serialize};

/// Frames the browser client sends over the bridge WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateSession {
        #[serde(rename = "businessName")]
        business_name: String,
    },
    /// Base64 PCM16 audio chunk.
    Audio { data: String },
    StartListening,
    StopListening,
}

/// Frames the bridge sends back to the browser client. Provider events are
/// forwarded verbatim and don't appear here.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionCreated { session_id: String },
    Error { message: String },
    Disconnected,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of these enums cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_session() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"create_session","businessName":"Acme HVAC"}"#,
        )
        .expect("create_session should parse");
        match msg {
            ClientMessage::CreateSession { business_name } => {
                assert_eq!(business_name, "Acme HVAC");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_control_messages() {
        assert!(matches!(
            serde_json::from_str(r#"{"type":"start_listening"}"#),
            Ok(ClientMessage::StartListening)
        ));
        assert!(matches!(
            serde_json::from_str(r#"{"type":"audio","data":"AAAA"}"#),
            Ok(ClientMessage::Audio { .. })
        ));
    }

    #[test]
    fn malformed_frame_is_a_parse_error() {
        let result: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"launch"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_messages_tag_their_type() {
        let json = ServerMessage::error("no such business").to_json();
        let value: serde_json::Value =
            serde_json::from_str(&json).expect("should serialize");
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "no such business");
    }
}
