use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    InFlight, // a booking call owns this order right now
    Booked,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::InFlight => "in_flight",
            SyncState::Booked => "booked",
            SyncState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_flight" => Some(SyncState::InFlight),
            "booked" => Some(SyncState::Booked),
            "failed" => Some(SyncState::Failed),
            _ => None,
        }
    }
}

/// Per-order record of the external booking with a courier provider. One
/// row per order; its state is what makes `create_booking` idempotent and
/// retryable without ever double-booking.
#[derive(Debug, Clone, Serialize)]
pub struct LogisticsSyncStatus {
    pub order_id: i64,
    pub provider: String,
    pub state: SyncState,
    pub tracking_id: Option<String>,
    pub attempts: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
