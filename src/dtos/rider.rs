use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CollectionRequest {
    pub amount: Decimal,
    pub order_id: Option<i64>,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct CashHandoverRequest {
    pub amount: Decimal,
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub rider_id: i64,
    pub balance: Decimal,
}
