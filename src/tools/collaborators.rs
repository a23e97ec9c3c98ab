use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Appointment creation request forwarded to the scheduling collaborator.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppointmentRequest {
    pub tenant_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: String,
    /// The collaborator schedules the confirmation notification; our
    /// responsibility ends here.
    pub confirmation_scheduled: bool,
}

/// Seam to the appointment service. HTTP in production, fakes in tests.
#[async_trait]
pub trait AppointmentBackend: Send + Sync {
    async fn create(
        &self,
        request: &AppointmentRequest,
        idempotency_key: &str,
    ) -> Result<AppointmentRecord, CollaboratorError>;
}

/// Seam to the SMS sender.
#[async_trait]
pub trait SmsBackend: Send + Sync {
    async fn send(
        &self,
        tenant_id: &str,
        to: &str,
        message: &str,
    ) -> Result<(), CollaboratorError>;
}

/// HTTP client for the internal appointment service.
pub struct HttpAppointments {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpAppointments {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }
}

#[async_trait]
impl AppointmentBackend for HttpAppointments {
    async fn create(
        &self,
        request: &AppointmentRequest,
        idempotency_key: &str,
    ) -> Result<AppointmentRecord, CollaboratorError> {
        if self.base_url.is_empty() {
            return Err(CollaboratorError::NotConfigured("appointments"));
        }

        let url = format!("{}/appointments", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", &self.token))
            // The collaborator dedupes retries across processes by this key
            .header("Idempotency-Key", idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api(format!("{status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))
    }
}

/// HTTP client for the internal SMS sender.
pub struct HttpSms {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSms {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }
}

#[async_trait]
impl SmsBackend for HttpSms {
    async fn send(
        &self,
        tenant_id: &str,
        to: &str,
        message: &str,
    ) -> Result<(), CollaboratorError> {
        if self.base_url.is_empty() {
            return Err(CollaboratorError::NotConfigured("sms"));
        }

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "to": to,
            "message": message,
        });
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", &self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api(format!("{status}: {body}")));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator not configured: {0}")]
    NotConfigured(&'static str),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Collaborator error: {0}")]
    Api(String),
}
