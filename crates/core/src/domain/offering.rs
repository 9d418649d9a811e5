use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferingId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub tenant_id: TenantId,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: u32,
    pub active: bool,
}
