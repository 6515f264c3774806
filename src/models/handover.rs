use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Party;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverStatus {
    PendingVerification,
    Processed,
}

impl HandoverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoverStatus::PendingVerification => "pending_verification",
            HandoverStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_verification" => Some(HandoverStatus::PendingVerification),
            "processed" => Some(HandoverStatus::Processed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    Sellable,
    Damaged,
    Expired,
}

impl ItemCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCondition::Sellable => "sellable",
            ItemCondition::Damaged => "damaged",
            ItemCondition::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sellable" => Some(ItemCondition::Sellable),
            "damaged" => Some(ItemCondition::Damaged),
            "expired" => Some(ItemCondition::Expired),
            _ => None,
        }
    }

    /// Only sellable goods go back into on-hand stock.
    pub fn restockable(&self) -> bool {
        matches!(self, ItemCondition::Sellable)
    }
}

/// One claimed item line on a return handover. `verified_qty` stays None
/// until an admin counts the physical goods; the claimed number is what the
/// rider or courier says they are carrying.
#[derive(Debug, Clone, Serialize)]
pub struct HandoverLine {
    pub order_id: i64,
    pub variant_id: i64,
    pub claimed_qty: i64,
    pub verified_qty: Option<i64>,
    pub condition: ItemCondition,
    pub disputed: bool,
    pub note: Option<String>,
}

impl HandoverLine {
    pub fn resolved(&self) -> bool {
        self.verified_qty.is_some() && !self.disputed
    }
}

/// Physical custody transfer of returned goods back to the hub. This is
/// the trust boundary for inventory: stock is credited when a line here is
/// verified, never when an order status changes.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnHandover {
    pub id: i64,
    pub source: Party,
    pub status: HandoverStatus,
    pub lines: Vec<HandoverLine>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ReturnHandover {
    pub fn unresolved_lines(&self) -> usize {
        self.lines.iter().filter(|l| !l.resolved()).count()
    }
}
