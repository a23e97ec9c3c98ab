pub mod collaborators;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::tenants::Tenant;
use collaborators::{AppointmentBackend, AppointmentRequest, SmsBackend};

/// How long a booking's idempotency key stays remembered. Model retries
/// within one conversation land well inside this window.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct ScheduleAppointmentParams {
    customer_name: String,
    customer_phone: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    requested_time: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendSmsParams {
    to: String,
    message: String,
}

struct RememberedBooking {
    request: AppointmentRequest,
    result: serde_json::Value,
    at: Instant,
}

/// Executes tool calls the model emits mid-conversation.
///
/// Every call is fault-isolated: the result is always a JSON object the
/// model can relate to the caller — `{"ok": true, ...}` on success,
/// `{"ok": false, "error": ...}` on any failure. Nothing here terminates
/// the surrounding call session.
pub struct ToolExecutor {
    appointments: Arc<dyn AppointmentBackend>,
    sms: Arc<dyn SmsBackend>,
    bookings: Mutex<HashMap<String, RememberedBooking>>,
}

impl ToolExecutor {
    pub fn new(appointments: Arc<dyn AppointmentBackend>, sms: Arc<dyn SmsBackend>) -> Self {
        Self {
            appointments,
            sms,
            bookings: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch a tool call by name with its JSON-encoded arguments.
    pub async fn execute(
        &self,
        tenant: &Tenant,
        name: &str,
        arguments: &str,
    ) -> serde_json::Value {
        if !tenant.agent.tools.iter().any(|t| t == name) {
            tracing::warn!(tenant = %tenant.id, tool = name, "Tool not enabled");
            return error_result(format!("tool '{name}' is not available"));
        }

        let result = match name {
            "schedule_appointment" => self.schedule_appointment(tenant, arguments).await,
            "get_business_info" => Ok(business_info(tenant)),
            "send_sms" => self.send_sms(tenant, arguments).await,
            other => Err(ToolError::Unknown(other.to_string())),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tenant = %tenant.id, tool = name, "Tool call failed: {e}");
                error_result(e.to_string())
            }
        }
    }

    async fn schedule_appointment(
        &self,
        tenant: &Tenant,
        arguments: &str,
    ) -> Result<serde_json::Value, ToolError> {
        let params: ScheduleAppointmentParams =
            serde_json::from_str(arguments).map_err(|e| ToolError::BadArguments(e.to_string()))?;
        if params.customer_name.trim().is_empty() {
            return Err(ToolError::MissingField("customer_name"));
        }
        if params.customer_phone.trim().is_empty() {
            return Err(ToolError::MissingField("customer_phone"));
        }

        let request = AppointmentRequest {
            tenant_id: tenant.id.clone(),
            customer_name: params.customer_name,
            customer_phone: params.customer_phone,
            service: params.service,
            requested_time: params.requested_time,
        };
        let key = params
            .idempotency_key
            .map(|k| format!("{}:{k}", tenant.id))
            .unwrap_or_else(|| format!("{}:{}", tenant.id, uuid::Uuid::new_v4()));

        // Replay of an identical booking returns the original record
        // without touching the collaborator again.
        {
            let mut bookings = self.bookings.lock().await;
            bookings.retain(|_, b| b.at.elapsed() < IDEMPOTENCY_TTL);
            if let Some(remembered) = bookings.get(&key) {
                if remembered.request == request {
                    tracing::info!(tenant = %tenant.id, "Duplicate booking deduped");
                    return Ok(remembered.result.clone());
                }
                return Err(ToolError::IdempotencyConflict);
            }
        }

        let record = self
            .appointments
            .create(&request, &key)
            .await
            .map_err(|e| ToolError::Collaborator(e.to_string()))?;

        let result = serde_json::json!({
            "ok": true,
            "appointment_id": record.id,
            "confirmation_scheduled": record.confirmation_scheduled,
        });
        self.bookings.lock().await.insert(
            key,
            RememberedBooking {
                request,
                result: result.clone(),
                at: Instant::now(),
            },
        );
        Ok(result)
    }

    async fn send_sms(
        &self,
        tenant: &Tenant,
        arguments: &str,
    ) -> Result<serde_json::Value, ToolError> {
        let params: SendSmsParams =
            serde_json::from_str(arguments).map_err(|e| ToolError::BadArguments(e.to_string()))?;
        if params.to.trim().is_empty() {
            return Err(ToolError::MissingField("to"));
        }

        self.sms
            .send(&tenant.id, &params.to, &params.message)
            .await
            .map_err(|e| ToolError::Collaborator(e.to_string()))?;

        Ok(serde_json::json!({ "ok": true, "sent": true }))
    }
}

fn business_info(tenant: &Tenant) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "name": tenant.name,
        "phone_number": tenant.phone_number,
        "hours": tenant.hours.as_ref().map(|h| {
            serde_json::json!({ "open_hour": h.open_hour, "close_hour": h.close_hour })
        }),
        "tone": tenant.tone,
    })
}

fn error_result(message: String) -> serde_json::Value {
    serde_json::json!({ "ok": false, "error": message })
}

/// Function schemas for the tools a tenant's agent may call, in the
/// provider's tool-declaration format.
pub fn schemas(enabled: &[String]) -> Vec<serde_json::Value> {
    enabled
        .iter()
        .filter_map(|name| match name.as_str() {
            "schedule_appointment" => Some(serde_json::json!({
                "type": "function",
                "name": "schedule_appointment",
                "description": "Book an appointment for the caller.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "customer_name": { "type": "string" },
                        "customer_phone": { "type": "string" },
                        "service": { "type": "string" },
                        "requested_time": { "type": "string" },
                        "idempotency_key": { "type": "string" }
                    },
                    "required": ["customer_name", "customer_phone"]
                }
            })),
            "get_business_info" => Some(serde_json::json!({
                "type": "function",
                "name": "get_business_info",
                "description": "Look up the business's hours and contact details.",
                "parameters": { "type": "object", "properties": {} }
            })),
            "send_sms" => Some(serde_json::json!({
                "type": "function",
                "name": "send_sms",
                "description": "Text a message to a phone number.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": { "type": "string" },
                        "message": { "type": "string" }
                    },
                    "required": ["to", "message"]
                }
            })),
            other => {
                tracing::warn!(tool = other, "Unknown tool in tenant config");
                None
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("Invalid arguments: {0}")]
    BadArguments(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Idempotency key reused with different parameters")]
    IdempotencyConflict,
    #[error("{0}")]
    Collaborator(String),
}
