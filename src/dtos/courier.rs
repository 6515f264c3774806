use serde::Deserialize;

#[derive(Deserialize)]
pub struct BookOrderRequest {
    pub order_id: i64,
}

#[derive(Deserialize)]
pub struct BookBulkRequest {
    pub order_ids: Vec<i64>,
}
