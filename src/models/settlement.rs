use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Verified,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettlementStatus::Pending),
            "verified" => Some(SettlementStatus::Verified),
            _ => None,
        }
    }
}

/// Reconciliation record for one rider's outstanding cash. `expected` is
/// the ledger balance frozen at request time, `declared` what the rider
/// says they are handing in, `actual` what the admin counted. A non-zero
/// variance is flagged and posted as a ledger adjustment, never silently
/// absorbed.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub id: i64,
    pub rider_id: i64,
    pub expected: Decimal,
    pub declared: Decimal,
    pub actual: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub status: SettlementStatus,
    pub requested_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<i64>,
}
