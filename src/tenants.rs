use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// A business account using the receptionist, resolved by its phone number.
///
/// Loaded once at startup and read-only afterwards — tenant CRUD lives in an
/// external system, this service only consumes the published directory.
#[derive(Debug, Deserialize, Clone)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// E.164 number callers dial to reach this tenant.
    pub phone_number: String,
    /// Exact greeting spoken on answer. Empty selects a time-aware fallback.
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub hours: Option<BusinessHours>,
    #[serde(default = "default_tone")]
    pub tone: String,
    /// Number to transfer escalated calls to. Unset escalations hang up
    /// with an apology instead.
    #[serde(default)]
    pub transfer_number: Option<String>,
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_tone() -> String {
    "friendly and professional".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessHours {
    /// Opening hour, 0-23 local time.
    pub open_hour: u32,
    /// Closing hour, 0-23 local time.
    pub close_hour: u32,
}

impl BusinessHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.open_hour <= self.close_hour {
            (self.open_hour..self.close_hour).contains(&hour)
        } else {
            // Overnight hours, e.g. 20-4
            hour >= self.open_hour || hour < self.close_hour
        }
    }
}

/// Per-tenant voice agent settings. Immutable for the duration of a call.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Instruction template. `{business}` and `{tone}` are substituted.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Names of tools this tenant's agent may call.
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            instructions: default_instructions(),
            tools: default_tools(),
        }
    }
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_instructions() -> String {
    "You are the receptionist for {business}. Be {tone}. Keep replies short \
     and natural for voice. Help callers book appointments, answer questions \
     about the business, and take messages. If the caller asks for a human \
     or you cannot help, escalate."
        .to_string()
}

fn default_tools() -> Vec<String> {
    vec![
        "schedule_appointment".to_string(),
        "get_business_info".to_string(),
        "send_sms".to_string(),
    ]
}

impl Tenant {
    /// Render the agent instruction template for this tenant.
    pub fn instructions(&self) -> String {
        self.agent
            .instructions
            .replace("{business}", &self.name)
            .replace("{tone}", &self.tone)
    }
}

#[derive(Debug, Deserialize)]
struct TenantsFile {
    #[serde(default, rename = "tenant")]
    tenants: Vec<Tenant>,
}

/// Directory of tenants keyed by called number and by business name.
///
/// At most one tenant per phone number — duplicate numbers in the file are
/// a load error, not a silent overwrite.
pub struct TenantDirectory {
    by_number: HashMap<String, Tenant>,
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl TenantDirectory {
    pub fn load(path: &Path) -> Result<Self, TenantError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TenantError::Io(path.display().to_string(), e.to_string()))?;
        let parsed: TenantsFile =
            toml::from_str(&contents).map_err(|e| TenantError::Parse(e.to_string()))?;
        Self::from_tenants(parsed.tenants)
    }

    pub fn from_tenants(tenants: Vec<Tenant>) -> Result<Self, TenantError> {
        let mut by_number = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for tenant in tenants {
            by_name
                .insert(tenant.name.to_lowercase(), tenant.phone_number.clone());
            by_id.insert(tenant.id.clone(), tenant.phone_number.clone());
            if let Some(existing) =
                by_number.insert(tenant.phone_number.clone(), tenant)
            {
                return Err(TenantError::DuplicateNumber(existing.phone_number));
            }
        }
        Ok(Self {
            by_number,
            by_name,
            by_id,
        })
    }

    /// Resolve a tenant by the number the caller dialed.
    pub fn by_number(&self, number: &str) -> Option<&Tenant> {
        self.by_number.get(number)
    }

    /// Resolve a tenant by business name (used by the browser bridge,
    /// which identifies the demo by name rather than by dialed number).
    pub fn by_name(&self, name: &str) -> Option<&Tenant> {
        self.by_name
            .get(&name.to_lowercase())
            .and_then(|number| self.by_number.get(number))
    }

    /// Resolve a tenant by its id (sessions remember the tenant id,
    /// not the dialed number).
    pub fn by_id(&self, id: &str) -> Option<&Tenant> {
        self.by_id
            .get(id)
            .and_then(|number| self.by_number.get(number))
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Failed to read tenants file {0}: {1}")]
    Io(String, String),
    #[error("Failed to parse tenants file: {0}")]
    Parse(String),
    #[error("Duplicate phone number in tenants file: {0}")]
    DuplicateNumber(String),
}

#[cfg(test)]
pub(crate) fn test_tenant(name: &str, number: &str, greeting: &str) -> Tenant {
    Tenant {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        phone_number: number.to_string(),
        greeting: greeting.to_string(),
        hours: Some(BusinessHours {
            open_hour: 8,
            close_hour: 18,
        }),
        tone: "friendly".to_string(),
        transfer_number: Some("+15550001111".to_string()),
        agent: AgentConfig::default(),
    }
}
