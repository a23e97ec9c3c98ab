use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::WebhookConfig;
use crate::openai::chat::{ChatMessage, ReplyModel};
use crate::retry::RetryPolicy;
use crate::session::{SessionRegistry, Speaker};
use crate::telephony::instructions::{self, Instruction};
use crate::tenants::Tenant;

/// What the model decided should happen after its reply is spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    Continue,
    EndCall,
    Escalate,
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    reply: String,
    #[serde(default = "default_action")]
    action: TurnAction,
}

fn default_action() -> TurnAction {
    TurnAction::Continue
}

const REPLY_FORMAT: &str = "Respond with a single JSON object: \
    {\"reply\": \"what you say to the caller\", \"action\": \"continue\"}. \
    Use action \"end_call\" when the conversation is finished, \"escalate\" \
    when the caller needs a human, otherwise \"continue\".";

const SILENCE_REPROMPT: &str = "Sorry, I didn't catch that. How can I help you?";
const SILENCE_GOODBYE: &str =
    "It seems like now isn't a good time. Please call back anytime. Goodbye.";
const ESCALATE_LINE: &str = "Let me connect you with someone who can help.";

/// Per-turn conversation driver for the webhook call path.
///
/// Appends the utterance to the call's history, asks the model for a reply
/// under a timeout, and maps the outcome to the next instruction set. Every
/// failure path still produces spoken instructions — the caller never gets
/// silence or a dropped call from here.
pub struct TurnHandler {
    model: Arc<dyn ReplyModel>,
    sessions: SessionRegistry,
    config: WebhookConfig,
    retry: RetryPolicy,
}

impl TurnHandler {
    pub fn new(
        model: Arc<dyn ReplyModel>,
        sessions: SessionRegistry,
        config: WebhookConfig,
    ) -> Self {
        Self {
            model,
            sessions,
            config,
            retry: RetryPolicy::webhook_default(),
        }
    }

    /// Process one gathered utterance and return the next instructions.
    pub async fn handle_utterance(
        &self,
        call_id: &str,
        tenant: &Tenant,
        speech: &str,
    ) -> Vec<Instruction> {
        let session = self.sessions.get_or_create(call_id, &tenant.id).await;
        // Held for the whole turn: racing deliveries for this call wait here,
        // so history never interleaves across turns.
        let mut session = session.lock().await;

        let speech = speech.trim();
        if speech.is_empty() {
            session.reprompts += 1;
            if session.reprompts > self.config.max_reprompts {
                tracing::info!(call_id, "Max reprompts reached, ending call");
                return vec![
                    Instruction::say(SILENCE_GOODBYE, &tenant.agent.voice),
                    Instruction::Hangup,
                ];
            }
            return vec![
                Instruction::say(SILENCE_REPROMPT, &tenant.agent.voice),
                Instruction::gather(self.config.gather_timeout_secs),
            ];
        }
        session.reprompts = 0;
        session.push(Speaker::Caller, speech);

        let messages = self.build_messages(tenant, &session);
        let content = match self.call_model(call_id, &messages).await {
            Some(content) => content,
            None => {
                session.push(Speaker::Agent, ESCALATE_LINE);
                return instructions::escalate(
                    ESCALATE_LINE,
                    &tenant.agent.voice,
                    tenant.transfer_number.as_deref(),
                );
            }
        };

        let (reply, action) = parse_reply(&content);
        session.push(Speaker::Agent, reply.clone());
        tracing::info!(call_id, ?action, reply_len = reply.len(), "Turn completed");

        match action {
            TurnAction::Continue => vec![
                Instruction::say(reply, &tenant.agent.voice),
                Instruction::gather(self.config.gather_timeout_secs),
            ],
            TurnAction::EndCall => vec![
                Instruction::say(reply, &tenant.agent.voice),
                Instruction::Hangup,
            ],
            TurnAction::Escalate => instructions::escalate(
                &reply,
                &tenant.agent.voice,
                tenant.transfer_number.as_deref(),
            ),
        }
    }

    /// Release session state on hangup.
    pub async fn end_call(&self, call_id: &str) {
        self.sessions.end(call_id).await;
    }

    fn build_messages(
        &self,
        tenant: &Tenant,
        session: &crate::session::CallSession,
    ) -> Vec<ChatMessage> {
        let mut messages =
            Vec::with_capacity(self.config.max_history_turns + 1);
        messages.push(ChatMessage::system(format!(
            "{}\n\n{REPLY_FORMAT}",
            tenant.instructions()
        )));
        for turn in session.recent_history(self.config.max_history_turns) {
            messages.push(match turn.speaker {
                Speaker::Caller => ChatMessage::user(&turn.text),
                Speaker::Agent => ChatMessage::assistant(&turn.text),
            });
        }
        messages
    }

    /// One model call, retried per policy, each attempt under the webhook
    /// timeout budget. None means every attempt failed.
    async fn call_model(&self, call_id: &str, messages: &[ChatMessage]) -> Option<String> {
        let timeout = Duration::from_millis(self.config.model_timeout_ms);
        for attempt in self.retry.attempts() {
            if let Some(delay) = self.retry.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }
            match tokio::time::timeout(timeout, self.model.reply(messages)).await {
                Ok(Ok(content)) => return Some(content),
                Ok(Err(e)) => {
                    tracing::warn!(call_id, attempt, "Model call failed: {e}");
                }
                Err(_) => {
                    tracing::warn!(call_id, attempt, "Model call timed out");
                }
            }
        }
        None
    }
}

/// Parse the model's reply into spoken text and an action.
///
/// Accepts the requested JSON shape, with or without a markdown fence.
/// Anything else is spoken verbatim with the conversation continuing —
/// a malformed reply must not break the call.
fn parse_reply(content: &str) -> (String, TurnAction) {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<ModelReply>(stripped) {
        Ok(parsed) if !parsed.reply.trim().is_empty() => {
            (parsed.reply, parsed.action)
        }
        _ => (trimmed.to_string(), TurnAction::Continue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::chat::ChatError;
    use crate::tenants::test_tenant;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted model: pops replies front-to-back, errors when exhausted.
    struct ScriptedModel {
        replies: Vec<Result<String, ()>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ()>>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReplyModel for ScriptedModel {
        async fn reply(&self, _messages: &[ChatMessage]) -> Result<String, ChatError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(i) {
                Some(Ok(content)) => Ok(content.clone()),
                _ => Err(ChatError::Api("scripted failure".to_string())),
            }
        }
    }

    fn handler(replies: Vec<Result<String, ()>>) -> TurnHandler {
        TurnHandler::new(
            Arc::new(ScriptedModel::new(replies)),
            SessionRegistry::new(Duration::from_secs(60)),
            WebhookConfig::default(),
        )
    }

    #[test]
    fn parses_json_reply_with_action() {
        let (reply, action) =
            parse_reply(r#"{"reply":"Goodbye now.","action":"end_call"}"#);
        assert_eq!(reply, "Goodbye now.");
        assert_eq!(action, TurnAction::EndCall);
    }

    #[test]
    fn parses_fenced_json_reply() {
        let (reply, action) =
            parse_reply("```json\n{\"reply\":\"Sure thing.\"}\n```");
        assert_eq!(reply, "Sure thing.");
        assert_eq!(action, TurnAction::Continue);
    }

    #[test]
    fn plain_text_reply_continues() {
        let (reply, action) = parse_reply("We open at 8 AM.");
        assert_eq!(reply, "We open at 8 AM.");
        assert_eq!(action, TurnAction::Continue);
    }

    #[tokio::test]
    async fn reply_is_spoken_then_gathered() {
        let handler = handler(vec![Ok(
            r#"{"reply":"We can do Tuesday.","action":"continue"}"#.to_string(),
        )]);
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");

        let set = handler
            .handle_utterance("abc123", &tenant, "I need a quote")
            .await;
        assert_eq!(
            set[0],
            Instruction::say("We can do Tuesday.", "alloy")
        );
        assert!(matches!(set[1], Instruction::Gather { .. }));
    }

    #[tokio::test]
    async fn session_created_transparently_for_unknown_call() {
        let sessions = SessionRegistry::new(Duration::from_secs(60));
        let handler = TurnHandler::new(
            Arc::new(ScriptedModel::new(vec![Ok(
                r#"{"reply":"Happy to help."}"#.to_string(),
            )])),
            sessions.clone(),
            WebhookConfig::default(),
        );
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");

        assert_eq!(sessions.len().await, 0);
        let set = handler
            .handle_utterance("abc123", &tenant, "I need a quote")
            .await;
        assert_eq!(sessions.len().await, 1);
        assert!(matches!(set[0], Instruction::Say { .. }));
    }

    #[tokio::test]
    async fn second_failure_degrades_to_transfer() {
        let handler = handler(vec![Err(()), Err(())]);
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");

        let set = handler
            .handle_utterance("abc123", &tenant, "hello?")
            .await;
        assert!(matches!(set[0], Instruction::Say { .. }));
        assert_eq!(
            set.last(),
            Some(&Instruction::transfer("+15550001111"))
        );
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let handler = handler(vec![
            Err(()),
            Ok(r#"{"reply":"Second try worked."}"#.to_string()),
        ]);
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");

        let set = handler
            .handle_utterance("abc123", &tenant, "hello?")
            .await;
        assert_eq!(
            set[0],
            Instruction::say("Second try worked.", "alloy")
        );
    }

    #[tokio::test]
    async fn silence_reprompts_then_hangs_up() {
        let handler = handler(vec![]);
        let tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");

        // Default allows two reprompts, the third silence ends the call
        for _ in 0..2 {
            let set = handler.handle_utterance("abc123", &tenant, "  ").await;
            assert!(matches!(set.last(), Some(Instruction::Gather { .. })));
        }
        let set = handler.handle_utterance("abc123", &tenant, "").await;
        assert!(matches!(set.last(), Some(Instruction::Hangup)));
    }

    #[tokio::test]
    async fn escalation_without_transfer_number_apologizes() {
        let mut tenant = test_tenant("Acme HVAC", "+15551234567", "Hi");
        tenant.transfer_number = None;
        let handler = handler(vec![Ok(
            r#"{"reply":"Let me get someone.","action":"escalate"}"#.to_string(),
        )]);

        let set = handler
            .handle_utterance("abc123", &tenant, "I want a manager")
            .await;
        assert!(matches!(set.last(), Some(Instruction::Hangup)));
    }
}
