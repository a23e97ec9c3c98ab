use serde::Deserialize;

/// Call-lifecycle events delivered by the telephony provider's webhook.
///
/// Tagged union so unexpected or malformed payloads fail at the parse
/// boundary instead of producing undefined behavior downstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
pub enum CallEvent {
    #[serde(rename = "call.initiated")]
    Initiated {
        #[serde(default)]
        call_id: String,
        /// The number the caller dialed, E.164.
        to: String,
    },
    #[serde(rename = "call.answered")]
    Answered {
        #[serde(default)]
        call_id: String,
        to: String,
    },
    #[serde(rename = "call.gather.ended")]
    GatherEnded {
        call_id: String,
        #[serde(default)]
        to: Option<String>,
        /// Transcript of what the caller said. Empty means the gather
        /// timed out in silence.
        #[serde(default)]
        speech: String,
    },
    #[serde(rename = "call.hangup")]
    Hangup { call_id: String },
}

impl CallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::Initiated { call_id, .. }
            | CallEvent::Answered { call_id, .. }
            | CallEvent::GatherEnded { call_id, .. }
            | CallEvent::Hangup { call_id } => call_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_initiated_without_call_id() {
        let event: CallEvent =
            serde_json::from_str(r#"{"event":"call.initiated","to":"+15551234567"}"#)
                .expect("initiated should parse");
        match event {
            CallEvent::Initiated { call_id, to } => {
                assert!(call_id.is_empty());
                assert_eq!(to, "+15551234567");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_gather_ended_with_speech() {
        let event: CallEvent = serde_json::from_str(
            r#"{"event":"call.gather.ended","call_id":"abc123","speech":"I need a quote"}"#,
        )
        .expect("gather.ended should parse");
        match event {
            CallEvent::GatherEnded {
                call_id,
                to,
                speech,
            } => {
                assert_eq!(call_id, "abc123");
                assert!(to.is_none());
                assert_eq!(speech, "I need a quote");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_a_parse_error() {
        let result: Result<CallEvent, _> =
            serde_json::from_str(r#"{"event":"call.teleported","call_id":"x"}"#);
        assert!(result.is_err());
    }
}
