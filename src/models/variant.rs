use serde::Serialize;

/// Sellable SKU with its on-hand stock. Stock only moves at pack time
/// (down) and at verified return processing (up); both ride the same
/// transaction as the owning status change.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Variant {
    pub id: i64,
    pub sku: String,
    pub product_name: String,
    pub stock_on_hand: i64,
}
