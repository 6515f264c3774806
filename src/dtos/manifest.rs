use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::Party;
use crate::store::OutcomeInput;

#[derive(Deserialize)]
pub struct CreateManifestRequest {
    /// Tagged owner: {"kind": "rider", "rider_id": 7} or
    /// {"kind": "courier", "provider": "ncm"}.
    pub owner: Party,
    pub order_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct AddOrderRequest {
    pub order_id: i64,
}

#[derive(Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeRequest {
    Delivered {
        proof: Option<String>,
        cod_collected: Option<Decimal>,
    },
    Rejected {
        reason: String,
    },
    Returned {
        reason: String,
    },
}

impl OutcomeRequest {
    pub fn into_input(self) -> OutcomeInput {
        match self {
            OutcomeRequest::Delivered {
                proof,
                cod_collected,
            } => OutcomeInput::Delivered {
                proof,
                cod_collected,
            },
            OutcomeRequest::Rejected { reason } => OutcomeInput::Rejected { reason },
            OutcomeRequest::Returned { reason } => OutcomeInput::Returned { reason },
        }
    }
}
