use serde::Serialize;

/// A call-control directive returned to the telephony provider.
///
/// The webhook response is a JSON array of these; the provider executes
/// them in order on the active call.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "instruction", rename_all = "lowercase")]
pub enum Instruction {
    Say { text: String, voice: String },
    Gather { timeout_secs: u32 },
    Transfer { to: String },
    Hangup,
}

impl Instruction {
    pub fn say(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Instruction::Say {
            text: text.into(),
            voice: voice.into(),
        }
    }

    pub fn gather(timeout_secs: u32) -> Self {
        Instruction::Gather { timeout_secs }
    }

    pub fn transfer(to: impl Into<String>) -> Self {
        Instruction::Transfer { to: to.into() }
    }
}

pub const NOT_IN_SERVICE: &str =
    "We're sorry, this number is not in service. Goodbye.";
pub const FALLBACK_VOICE: &str = "alloy";

/// Response for calls to numbers no tenant owns. Fail closed: a polite
/// message and a hangup, never an error status.
pub fn not_in_service() -> Vec<Instruction> {
    vec![
        Instruction::say(NOT_IN_SERVICE, FALLBACK_VOICE),
        Instruction::Hangup,
    ]
}

/// Escalation set: transfer when the tenant has a number for it,
/// apologize and hang up when it doesn't.
pub fn escalate(text: &str, voice: &str, transfer_to: Option<&str>) -> Vec<Instruction> {
    match transfer_to {
        Some(number) => vec![
            Instruction::say(text, voice),
            Instruction::transfer(number),
        ],
        None => vec![
            Instruction::say(
                "I'm sorry, I can't help with that right now. Please call back \
                 during business hours. Goodbye.",
                voice,
            ),
            Instruction::Hangup,
        ],
    }
}
