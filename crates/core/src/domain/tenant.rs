use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// Identity of the business account on the messaging channel (for example a
/// phone-number id). Inbound traffic is routed to a tenant through it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_hour: u32,
}

impl RateLimitPolicy {
    pub fn new(per_second: u32, per_minute: u32, per_hour: u32) -> Self {
        Self { per_second, per_minute, per_hour }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self { per_second: 10, per_minute: 250, per_hour: 5_000 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveFlow {
    /// Guided one-question-per-turn flow.
    Catalog,
    /// Guided flow plus the express booking track on explicit booking intent.
    Booking,
}

impl ActiveFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Booking => "booking",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "catalog" => Some(Self::Catalog),
            "booking" => Some(Self::Booking),
            _ => None,
        }
    }
}

/// Per-tenant settings handed to the conversation engine on every call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant_id: TenantId,
    pub display_name: String,
    pub currency: String,
    pub active_flow: ActiveFlow,
}

#[derive(Clone, Debug)]
pub struct TenantChannelCredential {
    pub tenant_id: TenantId,
    pub channel_identity: ChannelIdentity,
    pub secret: SecretString,
    pub rate_limit: RateLimitPolicy,
}
