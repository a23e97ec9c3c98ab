use std::time::Duration;

use axum::extract::State;
use axum::Json;

use crate::greeting;
use crate::telephony::events::CallEvent;
use crate::telephony::instructions::{self, Instruction};
use crate::tenants::Tenant;
use crate::AppState;

/// Handle POST /telephony/events — the provider's call-lifecycle webhook.
///
/// Always answers 200 with a valid instruction array: the provider treats
/// any non-2xx or malformed body as a failure and ends the call, so even
/// unparseable input gets a spoken fallback rather than an error status.
pub async fn handle_event(
    State(state): State<AppState>,
    body: String,
) -> Json<Vec<Instruction>> {
    let event: CallEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Unparseable webhook event: {e}");
            return Json(instructions::not_in_service());
        }
    };

    tracing::debug!(call_id = event.call_id(), "Webhook event received");

    let instructions = match event {
        CallEvent::Initiated { call_id, to } | CallEvent::Answered { call_id, to } => {
            answer_call(&state, &call_id, &to).await
        }
        CallEvent::GatherEnded {
            call_id,
            to,
            speech,
        } => gathered_speech(&state, &call_id, to.as_deref(), &speech).await,
        CallEvent::Hangup { call_id } => {
            state.turns.end_call(&call_id).await;
            Vec::new()
        }
    };

    Json(instructions)
}

/// First instruction on a new call: greet and open a gather window.
async fn answer_call(state: &AppState, call_id: &str, to: &str) -> Vec<Instruction> {
    let Some(tenant) = state.tenants.by_number(to) else {
        tracing::info!(to, "Call to unassigned number");
        return instructions::not_in_service();
    };

    if !call_id.is_empty() {
        state.sessions.get_or_create(call_id, &tenant.id).await;
    }

    let greeting = if tenant.greeting.is_empty() {
        greeting::select_greeting(&tenant.name)
    } else {
        tenant.greeting.clone()
    };
    tracing::info!(call_id, tenant = %tenant.id, "Answering call");

    vec![
        Instruction::say(greeting, &tenant.agent.voice),
        Instruction::gather(state.config.webhook.gather_timeout_secs),
    ]
}

/// A gather finished: run the turn handler under the webhook deadline.
async fn gathered_speech(
    state: &AppState,
    call_id: &str,
    to: Option<&str>,
    speech: &str,
) -> Vec<Instruction> {
    let Some(tenant) = resolve_tenant(state, call_id, to).await else {
        tracing::warn!(call_id, "Gather for unresolvable tenant");
        return instructions::not_in_service();
    };

    // The turn handler bounds its own model calls, but the webhook deadline
    // is absolute: degrade to a transfer rather than answer late.
    let deadline = Duration::from_millis(state.config.webhook.model_timeout_ms * 2);
    match tokio::time::timeout(
        deadline,
        state.turns.handle_utterance(call_id, &tenant, speech),
    )
    .await
    {
        Ok(set) => set,
        Err(_) => {
            tracing::error!(call_id, "Turn exceeded webhook deadline");
            instructions::escalate(
                "Let me connect you with someone who can help.",
                &tenant.agent.voice,
                tenant.transfer_number.as_deref(),
            )
        }
    }
}

/// Tenant for a gather event: dialed number when present, otherwise the
/// tenant remembered on the call's session. A gather carrying neither a
/// known number nor an existing session has no tenant to answer as, so the
/// caller fails closed with the not-in-service set.
async fn resolve_tenant(
    state: &AppState,
    call_id: &str,
    to: Option<&str>,
) -> Option<Tenant> {
    if let Some(tenant) = to.and_then(|n| state.tenants.by_number(n)) {
        return Some(tenant.clone());
    }
    let session = state.sessions.get(call_id).await?;
    let tenant_id = session.lock().await.tenant_id.clone();
    state.tenants.by_id(&tenant_id).cloned()
}
