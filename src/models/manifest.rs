use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Party;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Draft,      // being filled, membership editable
    Dispatched, // frozen, parcels on the road
    Closed,     // every line terminal and settled
}

impl ManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestStatus::Draft => "draft",
            ManifestStatus::Dispatched => "dispatched",
            ManifestStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ManifestStatus::Draft),
            "dispatched" => Some(ManifestStatus::Dispatched),
            "closed" => Some(ManifestStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOutcome {
    Pending,
    Delivered,
    Returned,    // customer refused at the door, parcel coming back
    Rejected,    // could not deliver (absent, wrong address, ...)
    Rescheduled, // pulled off this manifest, order back to packed
    Lost,        // carrier lost the parcel, nothing coming back
}

impl LineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineOutcome::Pending => "pending",
            LineOutcome::Delivered => "delivered",
            LineOutcome::Returned => "returned",
            LineOutcome::Rejected => "rejected",
            LineOutcome::Rescheduled => "rescheduled",
            LineOutcome::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LineOutcome::Pending),
            "delivered" => Some(LineOutcome::Delivered),
            "returned" => Some(LineOutcome::Returned),
            "rejected" => Some(LineOutcome::Rejected),
            "rescheduled" => Some(LineOutcome::Rescheduled),
            "lost" => Some(LineOutcome::Lost),
            _ => None,
        }
    }

    /// A line with a terminal outcome no longer blocks settlement.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LineOutcome::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestLine {
    pub order_id: i64,
    pub outcome: LineOutcome,
    pub note: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// A batch of orders under one custody holder. The manifest, not the
/// individual order, is the unit of rider/courier accountability: a parcel
/// rejected mid-route stays on it.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub id: i64,
    pub owner: Party,
    pub status: ManifestStatus,
    pub lines: Vec<ManifestLine>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn line(&self, order_id: i64) -> Option<&ManifestLine> {
        self.lines.iter().find(|l| l.order_id == order_id)
    }

    /// Eligible for settlement: dispatched and nothing still pending.
    pub fn settleable(&self) -> bool {
        self.status == ManifestStatus::Dispatched
            && self.lines.iter().all(|l| l.outcome.is_terminal())
    }
}
