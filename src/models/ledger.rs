use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    CodCollected,         // + at delivery
    CashHandover,         // - when cash physically reaches the hub
    SettlementAdjustment, // +/- variance posted at settlement verification
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::CodCollected => "cod_collected",
            LedgerEntryKind::CashHandover => "cash_handover",
            LedgerEntryKind::SettlementAdjustment => "settlement_adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cod_collected" => Some(LedgerEntryKind::CodCollected),
            "cash_handover" => Some(LedgerEntryKind::CashHandover),
            "settlement_adjustment" => Some(LedgerEntryKind::SettlementAdjustment),
            _ => None,
        }
    }
}

/// Append-only cash ledger row for one rider. There is no stored balance
/// anywhere: the balance IS the sum of these rows, and `balance_after` is a
/// per-row snapshot of that sum for statements and audits.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub rider_id: i64,
    pub kind: LedgerEntryKind,
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub order_id: Option<i64>,
    pub settlement_id: Option<i64>,
    pub actor_id: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
