use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RequestSettlementRequest {
    pub declared: Decimal,
}

#[derive(Deserialize)]
pub struct VerifySettlementRequest {
    pub actual: Decimal,
}

#[derive(Deserialize, Default)]
pub struct SettlementListQuery {
    pub rider_id: Option<i64>,
}
