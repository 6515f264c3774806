use serde::Deserialize;

use crate::models::handover::{HandoverStatus, ItemCondition};
use crate::models::Party;
use crate::store::{LineVerification, NewHandoverLine};

#[derive(Deserialize)]
pub struct CreateHandoverRequest {
    pub source: Party,
    pub lines: Vec<HandoverLineRequest>,
}

#[derive(Deserialize)]
pub struct HandoverLineRequest {
    pub order_id: i64,
    pub variant_id: i64,
    pub quantity: i64,
    pub condition: ItemCondition,
    pub note: Option<String>,
}

impl HandoverLineRequest {
    pub fn into_line(self) -> NewHandoverLine {
        NewHandoverLine {
            order_id: self.order_id,
            variant_id: self.variant_id,
            quantity: self.quantity,
            condition: self.condition,
            note: self.note,
        }
    }
}

#[derive(Deserialize)]
pub struct ProcessHandoverRequest {
    pub lines: Vec<LineVerdictRequest>,
}

/// One admin verdict. `verified_qty` is the physical count; leaving it
/// out while `disputed` is false parks the line unresolved.
#[derive(Deserialize)]
pub struct LineVerdictRequest {
    pub order_id: i64,
    pub variant_id: i64,
    pub verified_qty: Option<i64>,
    pub condition: Option<ItemCondition>,
    #[serde(default)]
    pub disputed: bool,
    pub note: Option<String>,
}

impl LineVerdictRequest {
    pub fn into_verification(self) -> LineVerification {
        LineVerification {
            order_id: self.order_id,
            variant_id: self.variant_id,
            verified_qty: self.verified_qty,
            condition: self.condition,
            disputed: self.disputed,
            note: self.note,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct HandoverListQuery {
    pub status: Option<HandoverStatus>,
}
