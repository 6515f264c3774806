// src/store/postgres.rs
//
// Postgres OpsStore. Each intent runs in one transaction: the rows it will
// judge are taken FOR UPDATE, the predicate is evaluated in Rust against
// the locked snapshot, and only then are the writes issued. Refused
// transition attempts are logged outside the transaction so the failed
// activity row survives the rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Row};

use crate::error::OpsError;
use crate::models::handover::{HandoverLine, HandoverStatus, ItemCondition, ReturnHandover};
use crate::models::ledger::{LedgerEntry, LedgerEntryKind};
use crate::models::manifest::{LineOutcome, Manifest, ManifestLine, ManifestStatus};
use crate::models::order::{
    FulfillmentType, NewOrder, Order, OrderActivity, OrderLine, OrderStatus,
};
use crate::models::settlement::{Settlement, SettlementStatus};
use crate::models::sync::{LogisticsSyncStatus, SyncState};
use crate::models::variant::Variant;
use crate::models::{Actor, Party, Role};

use super::memory::{check_distinct, refuse_reserved_target, validate_new_order};
use super::{
    BookingClaim, LineVerification, ManifestFilter, NewHandoverLine, OpsStore, OrderFilter,
    OutcomeInput,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== Row shapes ====================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    customer_name: String,
    customer_phone: String,
    delivery_address: String,
    destination_branch: Option<String>,
    fulfillment: String,
    status: String,
    subtotal: Decimal,
    shipping_charge: Decimal,
    discount: Decimal,
    cod_due: Decimal,
    paid_amount: Decimal,
    rider_id: Option<i64>,
    courier: Option<String>,
    tracking_id: Option<String>,
    delivery_proof: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> Result<Order, OpsError> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            delivery_address: self.delivery_address,
            destination_branch: self.destination_branch,
            fulfillment: parse_fulfillment(&self.fulfillment)?,
            status: parse_status(&self.status)?,
            lines,
            subtotal: self.subtotal,
            shipping_charge: self.shipping_charge,
            discount: self.discount,
            cod_due: self.cod_due,
            paid_amount: self.paid_amount,
            rider_id: self.rider_id,
            courier: self.courier,
            tracking_id: self.tracking_id,
            delivery_proof: self.delivery_proof,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ManifestRow {
    id: i64,
    owner_kind: String,
    owner_rider_id: Option<i64>,
    owner_courier: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl ManifestRow {
    fn into_manifest(self, lines: Vec<ManifestLine>) -> Result<Manifest, OpsError> {
        Ok(Manifest {
            id: self.id,
            owner: parse_party(&self.owner_kind, self.owner_rider_id, self.owner_courier)?,
            status: ManifestStatus::parse(&self.status)
                .ok_or_else(|| decode_err(format!("bad manifest status {}", self.status)))?,
            lines,
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HandoverRow {
    id: i64,
    source_kind: String,
    source_rider_id: Option<i64>,
    source_courier: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl HandoverRow {
    fn into_handover(self, lines: Vec<HandoverLine>) -> Result<ReturnHandover, OpsError> {
        Ok(ReturnHandover {
            id: self.id,
            source: parse_party(&self.source_kind, self.source_rider_id, self.source_courier)?,
            status: HandoverStatus::parse(&self.status)
                .ok_or_else(|| decode_err(format!("bad handover status {}", self.status)))?,
            lines,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    id: i64,
    rider_id: i64,
    expected: Decimal,
    declared: Decimal,
    actual: Option<Decimal>,
    variance: Option<Decimal>,
    status: String,
    requested_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
    verified_by: Option<i64>,
}

impl SettlementRow {
    fn into_settlement(self) -> Result<Settlement, OpsError> {
        Ok(Settlement {
            id: self.id,
            rider_id: self.rider_id,
            expected: self.expected,
            declared: self.declared,
            actual: self.actual,
            variance: self.variance,
            status: SettlementStatus::parse(&self.status)
                .ok_or_else(|| decode_err(format!("bad settlement status {}", self.status)))?,
            requested_at: self.requested_at,
            verified_at: self.verified_at,
            verified_by: self.verified_by,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SyncRow {
    order_id: i64,
    provider: String,
    state: String,
    tracking_id: Option<String>,
    attempts: i32,
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl SyncRow {
    fn into_sync(self) -> Result<LogisticsSyncStatus, OpsError> {
        Ok(LogisticsSyncStatus {
            order_id: self.order_id,
            provider: self.provider,
            state: SyncState::parse(&self.state)
                .ok_or_else(|| decode_err(format!("bad sync state {}", self.state)))?,
            tracking_id: self.tracking_id,
            attempts: self.attempts,
            last_synced_at: self.last_synced_at,
            last_error: self.last_error,
        })
    }
}

// ==================== Parse helpers ====================

fn decode_err(msg: String) -> OpsError {
    OpsError::Storage(sqlx::Error::Decode(msg.into()))
}

fn parse_status(s: &str) -> Result<OrderStatus, OpsError> {
    OrderStatus::parse(s).ok_or_else(|| decode_err(format!("bad order status {s}")))
}

fn parse_fulfillment(s: &str) -> Result<FulfillmentType, OpsError> {
    FulfillmentType::parse(s).ok_or_else(|| decode_err(format!("bad fulfillment {s}")))
}

fn parse_party(
    kind: &str,
    rider_id: Option<i64>,
    courier: Option<String>,
) -> Result<Party, OpsError> {
    match (kind, rider_id, courier) {
        ("rider", Some(rider_id), _) => Ok(Party::Rider { rider_id }),
        ("courier", _, Some(provider)) => Ok(Party::Courier { provider }),
        _ => Err(decode_err(format!("bad party kind {kind}"))),
    }
}

fn party_cols(party: &Party) -> (&'static str, Option<i64>, Option<String>) {
    match party {
        Party::Rider { rider_id } => ("rider", Some(*rider_id), None),
        Party::Courier { provider } => ("courier", None, Some(provider.clone())),
    }
}

// ==================== Connection-level helpers ====================

async fn fetch_order_lines(
    conn: &mut PgConnection,
    order_id: i64,
) -> Result<Vec<OrderLine>, OpsError> {
    let rows = sqlx::query(
        "SELECT variant_id, quantity, unit_price FROM order_lines WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|r| {
            Ok(OrderLine {
                variant_id: r.try_get("variant_id")?,
                quantity: r.try_get("quantity")?,
                unit_price: r.try_get("unit_price")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(OpsError::Storage)
}

async fn fetch_order(
    conn: &mut PgConnection,
    order_id: i64,
    for_update: bool,
) -> Result<Order, OpsError> {
    let sql = if for_update {
        "SELECT * FROM orders WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM orders WHERE id = $1"
    };
    let row = sqlx::query_as::<_, OrderRow>(sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(OpsError::not_found("order", order_id))?;
    let lines = fetch_order_lines(conn, order_id).await?;
    row.into_order(lines)
}

async fn fetch_manifest_lines(
    conn: &mut PgConnection,
    manifest_id: i64,
) -> Result<Vec<ManifestLine>, OpsError> {
    let rows = sqlx::query(
        "SELECT order_id, outcome, note, recorded_at
         FROM manifest_lines WHERE manifest_id = $1 ORDER BY id",
    )
    .bind(manifest_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|r| {
            let outcome: String = r.try_get("outcome").map_err(OpsError::Storage)?;
            Ok(ManifestLine {
                order_id: r.try_get("order_id").map_err(OpsError::Storage)?,
                outcome: LineOutcome::parse(&outcome)
                    .ok_or_else(|| decode_err(format!("bad line outcome {outcome}")))?,
                note: r.try_get("note").map_err(OpsError::Storage)?,
                recorded_at: r.try_get("recorded_at").map_err(OpsError::Storage)?,
            })
        })
        .collect()
}

async fn fetch_manifest(
    conn: &mut PgConnection,
    manifest_id: i64,
    for_update: bool,
) -> Result<Manifest, OpsError> {
    let sql = if for_update {
        "SELECT * FROM manifests WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM manifests WHERE id = $1"
    };
    let row = sqlx::query_as::<_, ManifestRow>(sql)
        .bind(manifest_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(OpsError::not_found("manifest", manifest_id))?;
    let lines = fetch_manifest_lines(conn, manifest_id).await?;
    row.into_manifest(lines)
}

async fn fetch_handover_lines(
    conn: &mut PgConnection,
    handover_id: i64,
) -> Result<Vec<HandoverLine>, OpsError> {
    let rows = sqlx::query(
        "SELECT order_id, variant_id, claimed_qty, verified_qty, condition, disputed, note
         FROM handover_lines WHERE handover_id = $1 ORDER BY id",
    )
    .bind(handover_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|r| {
            let condition: String = r.try_get("condition").map_err(OpsError::Storage)?;
            Ok(HandoverLine {
                order_id: r.try_get("order_id").map_err(OpsError::Storage)?,
                variant_id: r.try_get("variant_id").map_err(OpsError::Storage)?,
                claimed_qty: r.try_get("claimed_qty").map_err(OpsError::Storage)?,
                verified_qty: r.try_get("verified_qty").map_err(OpsError::Storage)?,
                condition: ItemCondition::parse(&condition)
                    .ok_or_else(|| decode_err(format!("bad condition {condition}")))?,
                disputed: r.try_get("disputed").map_err(OpsError::Storage)?,
                note: r.try_get("note").map_err(OpsError::Storage)?,
            })
        })
        .collect()
}

async fn fetch_handover(
    conn: &mut PgConnection,
    handover_id: i64,
    for_update: bool,
) -> Result<ReturnHandover, OpsError> {
    let sql = if for_update {
        "SELECT * FROM return_handovers WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM return_handovers WHERE id = $1"
    };
    let row = sqlx::query_as::<_, HandoverRow>(sql)
        .bind(handover_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(OpsError::not_found("handover", handover_id))?;
    let lines = fetch_handover_lines(conn, handover_id).await?;
    row.into_handover(lines)
}

async fn insert_activity(
    conn: &mut PgConnection,
    order_id: i64,
    actor: Actor,
    from: OrderStatus,
    to: OrderStatus,
    note: Option<&str>,
    succeeded: bool,
) -> Result<(), OpsError> {
    sqlx::query(
        "INSERT INTO order_activity (order_id, actor_id, actor_role, from_status, to_status, note, succeeded)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(order_id)
    .bind(actor.id)
    .bind(actor.role.as_str())
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(note)
    .bind(succeeded)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn set_order_status(
    conn: &mut PgConnection,
    order_id: i64,
    to: OrderStatus,
) -> Result<(), OpsError> {
    sqlx::query("UPDATE orders SET status = $1, updated_at = now() WHERE id = $2")
        .bind(to.as_str())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// The open manifest bound to an order, if any (draft membership, or a
/// still-pending line on a dispatched manifest).
async fn binding_manifest_id(
    conn: &mut PgConnection,
    order_id: i64,
) -> Result<Option<i64>, OpsError> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT m.id FROM manifests m
         JOIN manifest_lines ml ON ml.manifest_id = m.id
         WHERE ml.order_id = $1
           AND (m.status = 'draft' OR (m.status = 'dispatched' AND ml.outcome = 'pending'))
         LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Ledger appends serialize per rider so every balance_after snapshot is
/// computed against a settled sum.
async fn ledger_append(
    conn: &mut PgConnection,
    rider_id: i64,
    kind: LedgerEntryKind,
    delta: Decimal,
    order_id: Option<i64>,
    settlement_id: Option<i64>,
    actor: Actor,
    note: Option<&str>,
) -> Result<LedgerEntry, OpsError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(rider_id)
        .execute(&mut *conn)
        .await?;
    let balance: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(delta), 0) FROM rider_ledger WHERE rider_id = $1",
    )
    .bind(rider_id)
    .fetch_one(&mut *conn)
    .await?;
    let balance_after = balance + delta;
    let row = sqlx::query(
        "INSERT INTO rider_ledger (rider_id, kind, delta, balance_after, order_id, settlement_id, actor_id, note)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id, created_at",
    )
    .bind(rider_id)
    .bind(kind.as_str())
    .bind(delta)
    .bind(balance_after)
    .bind(order_id)
    .bind(settlement_id)
    .bind(actor.id)
    .bind(note)
    .fetch_one(&mut *conn)
    .await?;
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(OpsError::Storage)?,
        rider_id,
        kind,
        delta,
        balance_after,
        order_id,
        settlement_id,
        actor_id: actor.id,
        note: note.map(str::to_string),
        created_at: row.try_get("created_at").map_err(OpsError::Storage)?,
    })
}

async fn check_manifestable(
    conn: &mut PgConnection,
    order_id: i64,
    owner: &Party,
) -> Result<(), OpsError> {
    let order = fetch_order(conn, order_id, true).await?;
    match owner {
        Party::Rider { .. } if !order.fulfillment.rider_carried() => {
            return Err(OpsError::validation(format!(
                "order {} is {}, rider manifests carry inside-valley orders only",
                order.order_number,
                order.fulfillment.as_str()
            )))
        }
        Party::Courier { .. } if !order.fulfillment.courier_carried() => {
            return Err(OpsError::validation(format!(
                "order {} is {}, courier manifests carry outside-valley orders only",
                order.order_number,
                order.fulfillment.as_str()
            )))
        }
        _ => {}
    }
    if order.status != OrderStatus::Packed {
        return Err(OpsError::validation(format!(
            "order {} is {}, only packed orders join a manifest",
            order.order_number,
            order.status.as_str()
        )));
    }
    if binding_manifest_id(conn, order_id).await?.is_some() {
        return Err(OpsError::OrderAlreadyManifested(order_id));
    }
    Ok(())
}

impl PgStore {
    /// Failed transition attempts are recorded on their own connection so
    /// the rollback of the owning transaction cannot erase them.
    async fn log_refused(
        &self,
        order_id: i64,
        actor: Actor,
        from: OrderStatus,
        to: OrderStatus,
        note: Option<&str>,
    ) -> Result<(), OpsError> {
        let mut conn = self.pool.acquire().await?;
        insert_activity(&mut conn, order_id, actor, from, to, note, false).await
    }
}

// ==================== Trait impl ====================

#[async_trait]
impl OpsStore for PgStore {
    // ---- variants ----

    async fn insert_variant(
        &self,
        sku: &str,
        product_name: &str,
        stock_on_hand: i64,
    ) -> Result<Variant, OpsError> {
        if stock_on_hand < 0 {
            return Err(OpsError::validation("stock_on_hand must not be negative"));
        }
        let row = sqlx::query(
            "INSERT INTO variants (sku, product_name, stock_on_hand) VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(sku)
        .bind(product_name)
        .bind(stock_on_hand)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                OpsError::validation(format!("sku {sku} already exists"))
            }
            _ => OpsError::Storage(e),
        })?;
        Ok(Variant {
            id: row.try_get("id").map_err(OpsError::Storage)?,
            sku: sku.to_string(),
            product_name: product_name.to_string(),
            stock_on_hand,
        })
    }

    async fn get_variant(&self, id: i64) -> Result<Variant, OpsError> {
        sqlx::query_as::<_, Variant>("SELECT * FROM variants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OpsError::not_found("variant", id))
    }

    async fn list_variants(&self) -> Result<Vec<Variant>, OpsError> {
        Ok(
            sqlx::query_as::<_, Variant>("SELECT * FROM variants ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ---- orders ----

    async fn insert_order(&self, new: NewOrder, _actor: Actor) -> Result<Order, OpsError> {
        validate_new_order(&new)?;
        let mut tx = self.pool.begin().await?;
        for line in &new.lines {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM variants WHERE id = $1")
                    .bind(line.variant_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                return Err(OpsError::not_found("variant", line.variant_id));
            }
        }
        let subtotal = new.subtotal();
        let cod_due = new.cod_due();
        let order_id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (order_number, customer_name, customer_phone, delivery_address,
                                 destination_branch, fulfillment, status, subtotal,
                                 shipping_charge, discount, cod_due, paid_amount)
             VALUES ('', $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING id",
        )
        .bind(&new.customer_name)
        .bind(&new.customer_phone)
        .bind(&new.delivery_address)
        .bind(&new.destination_branch)
        .bind(new.fulfillment.as_str())
        .bind(OrderStatus::Intake.as_str())
        .bind(subtotal)
        .bind(new.shipping_charge)
        .bind(new.discount)
        .bind(cod_due)
        .bind(new.paid_amount)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query("UPDATE orders SET order_number = $1 WHERE id = $2")
            .bind(format!("PX-{order_id:05}"))
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        for line in &new.lines {
            sqlx::query(
                "INSERT INTO order_lines (order_id, variant_id, quantity, unit_price)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order_id)
            .bind(line.variant_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }
        let order = fetch_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Order, OpsError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn find_order_by_tracking(
        &self,
        provider: &str,
        tracking_id: &str,
    ) -> Result<Option<Order>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE courier = $1 AND tracking_id = $2",
        )
        .bind(provider)
        .bind(tracking_id)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let lines = fetch_order_lines(&mut conn, row.id).await?;
                Ok(Some(row.into_order(lines)?))
            }
        }
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR fulfillment = $2)
               AND ($3::bigint IS NULL OR rider_id = $3)
             ORDER BY id DESC",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.fulfillment.map(|f| f.as_str()))
        .bind(filter.rider_id)
        .fetch_all(&mut *conn)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = fetch_order_lines(&mut conn, row.id).await?;
            out.push(row.into_order(lines)?);
        }
        Ok(out)
    }

    async fn order_activity(&self, order_id: i64) -> Result<Vec<OrderActivity>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, order_id, false).await?;
        let rows = sqlx::query(
            "SELECT * FROM order_activity WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|r| {
                let role: String = r.try_get("actor_role").map_err(OpsError::Storage)?;
                let from: String = r.try_get("from_status").map_err(OpsError::Storage)?;
                let to: String = r.try_get("to_status").map_err(OpsError::Storage)?;
                Ok(OrderActivity {
                    id: r.try_get("id").map_err(OpsError::Storage)?,
                    order_id,
                    actor_id: r.try_get("actor_id").map_err(OpsError::Storage)?,
                    actor_role: Role::parse(&role)
                        .ok_or_else(|| decode_err(format!("bad role {role}")))?,
                    from_status: parse_status(&from)?,
                    to_status: parse_status(&to)?,
                    note: r.try_get("note").map_err(OpsError::Storage)?,
                    succeeded: r.try_get("succeeded").map_err(OpsError::Storage)?,
                    created_at: r.try_get("created_at").map_err(OpsError::Storage)?,
                })
            })
            .collect()
    }

    async fn transition_order(
        &self,
        order_id: i64,
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<Order, OpsError> {
        let mut tx = self.pool.begin().await?;
        let order = fetch_order(&mut tx, order_id, true).await?;
        refuse_reserved_target(&order, to)?;
        if !order.status.can_move_to(to, order.fulfillment) {
            let from = order.status;
            tx.rollback().await?;
            self.log_refused(order_id, actor, from, to, note.as_deref())
                .await?;
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to,
            });
        }
        set_order_status(&mut tx, order_id, to).await?;
        insert_activity(
            &mut tx,
            order_id,
            actor,
            order.status,
            to,
            note.as_deref(),
            true,
        )
        .await?;
        // A parcel marked lost or RTO while its manifest line is still
        // pending would park that manifest with no recordable outcome
        // left; close the line with the matching verdict.
        let line_outcome = match to {
            OrderStatus::LostInTransit => Some(LineOutcome::Lost),
            OrderStatus::Rto => Some(LineOutcome::Returned),
            _ => None,
        };
        if let Some(outcome) = line_outcome {
            sqlx::query(
                "UPDATE manifest_lines ml
                 SET outcome = $1, note = $2, recorded_at = now()
                 FROM manifests m
                 WHERE m.id = ml.manifest_id
                   AND m.status = 'dispatched'
                   AND ml.order_id = $3
                   AND ml.outcome = 'pending'",
            )
            .bind(outcome.as_str())
            .bind(format!("order marked {}", to.as_str()))
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        }
        let updated = fetch_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn pack_order(&self, order_id: i64, actor: Actor) -> Result<Order, OpsError> {
        let mut tx = self.pool.begin().await?;
        let order = fetch_order(&mut tx, order_id, true).await?;
        let from = order.status;
        if !from.can_move_to(OrderStatus::Packed, order.fulfillment) {
            tx.rollback().await?;
            self.log_refused(order_id, actor, from, OrderStatus::Packed, None)
                .await?;
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to: OrderStatus::Packed,
            });
        }

        let mut needed: std::collections::HashMap<i64, i64> = std::collections::HashMap::new();
        for line in &order.lines {
            *needed.entry(line.variant_id).or_insert(0) += line.quantity;
        }
        for (&variant_id, &qty) in &needed {
            // Conditional decrement doubles as the stock guard.
            let res = sqlx::query(
                "UPDATE variants SET stock_on_hand = stock_on_hand - $1
                 WHERE id = $2 AND stock_on_hand >= $1",
            )
            .bind(qty)
            .bind(variant_id)
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() == 0 {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT stock_on_hand FROM variants WHERE id = $1")
                        .bind(variant_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                let available = available.ok_or(OpsError::not_found("variant", variant_id))?;
                tx.rollback().await?;
                self.log_refused(
                    order_id,
                    actor,
                    from,
                    OrderStatus::Packed,
                    Some(&format!("insufficient stock for variant {variant_id}")),
                )
                .await?;
                return Err(OpsError::InsufficientStock {
                    variant_id,
                    available,
                    requested: qty,
                });
            }
        }
        set_order_status(&mut tx, order_id, OrderStatus::Packed).await?;
        insert_activity(&mut tx, order_id, actor, from, OrderStatus::Packed, None, true).await?;
        let updated = fetch_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn cancel_order(
        &self,
        order_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        let mut tx = self.pool.begin().await?;
        let order = fetch_order(&mut tx, order_id, true).await?;
        if binding_manifest_id(&mut tx, order_id).await?.is_some() {
            return Err(OpsError::OrderAlreadyManifested(order_id));
        }
        let from = order.status;
        if !from.can_move_to(OrderStatus::Cancelled, order.fulfillment) {
            tx.rollback().await?;
            self.log_refused(order_id, actor, from, OrderStatus::Cancelled, Some(reason))
                .await?;
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to: OrderStatus::Cancelled,
            });
        }
        set_order_status(&mut tx, order_id, OrderStatus::Cancelled).await?;
        insert_activity(
            &mut tx,
            order_id,
            actor,
            from,
            OrderStatus::Cancelled,
            Some(reason),
            true,
        )
        .await?;
        let updated = fetch_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    // ---- manifests ----

    async fn create_manifest(
        &self,
        owner: Party,
        order_ids: Vec<i64>,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        check_distinct(&order_ids)?;
        let mut tx = self.pool.begin().await?;
        for &order_id in &order_ids {
            check_manifestable(&mut tx, order_id, &owner).await?;
        }
        let (kind, rider_id, courier) = party_cols(&owner);
        let manifest_id: i64 = sqlx::query_scalar(
            "INSERT INTO manifests (owner_kind, owner_rider_id, owner_courier, status)
             VALUES ($1, $2, $3, 'draft') RETURNING id",
        )
        .bind(kind)
        .bind(rider_id)
        .bind(courier)
        .fetch_one(&mut *tx)
        .await?;
        for &order_id in &order_ids {
            sqlx::query(
                "INSERT INTO manifest_lines (manifest_id, order_id, outcome)
                 VALUES ($1, $2, 'pending')",
            )
            .bind(manifest_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        }
        let manifest = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        tracing::info!(
            manifest_id,
            orders = manifest.lines.len(),
            actor_id = actor.id,
            "Manifest created"
        );
        Ok(manifest)
    }

    async fn get_manifest(&self, id: i64) -> Result<Manifest, OpsError> {
        let mut conn = self.pool.acquire().await?;
        fetch_manifest(&mut conn, id, false).await
    }

    async fn list_manifests(&self, filter: ManifestFilter) -> Result<Vec<Manifest>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL OR (owner_kind = 'rider' AND owner_rider_id = $2))
               AND ($3::text IS NULL OR (owner_kind = 'courier' AND owner_courier = $3))
             ORDER BY id DESC",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.rider_id)
        .bind(filter.provider.as_deref())
        .fetch_all(&mut *conn)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = fetch_manifest_lines(&mut conn, row.id).await?;
            out.push(row.into_manifest(lines)?);
        }
        Ok(out)
    }

    async fn manifest_for_order(&self, order_id: i64) -> Result<Option<Manifest>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        match binding_manifest_id(&mut conn, order_id).await? {
            None => Ok(None),
            Some(id) => Ok(Some(fetch_manifest(&mut conn, id, false).await?)),
        }
    }

    async fn add_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        _actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if manifest.status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, only drafts accept edits",
                manifest.status.as_str()
            )));
        }
        check_manifestable(&mut tx, order_id, &manifest.owner).await?;
        sqlx::query(
            "INSERT INTO manifest_lines (manifest_id, order_id, outcome) VALUES ($1, $2, 'pending')",
        )
        .bind(manifest_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn remove_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        _actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if manifest.status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, only drafts accept edits",
                manifest.status.as_str()
            )));
        }
        let res = sqlx::query(
            "DELETE FROM manifest_lines WHERE manifest_id = $1 AND order_id = $2",
        )
        .bind(manifest_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(OpsError::not_found("manifest line", order_id));
        }
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn dispatch_manifest(
        &self,
        manifest_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if manifest.status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, it dispatches exactly once",
                manifest.status.as_str()
            )));
        }
        if manifest.lines.is_empty() {
            return Err(OpsError::validation("manifest has no orders"));
        }
        let order_ids: Vec<i64> = manifest.lines.iter().map(|l| l.order_id).collect();
        for &order_id in &order_ids {
            let order = fetch_order(&mut tx, order_id, true).await?;
            if order.status != OrderStatus::Packed {
                let to = match &manifest.owner {
                    Party::Rider { .. } => OrderStatus::Assigned,
                    Party::Courier { .. } => OrderStatus::HandedToCourier,
                };
                return Err(OpsError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to,
                });
            }
        }

        let note = format!("manifest {manifest_id} dispatched");
        for &order_id in &order_ids {
            match &manifest.owner {
                Party::Rider { rider_id } => {
                    sqlx::query("UPDATE orders SET rider_id = $1 WHERE id = $2")
                        .bind(rider_id)
                        .bind(order_id)
                        .execute(&mut *tx)
                        .await?;
                    set_order_status(&mut tx, order_id, OrderStatus::Assigned).await?;
                    insert_activity(
                        &mut tx,
                        order_id,
                        actor,
                        OrderStatus::Packed,
                        OrderStatus::Assigned,
                        Some(&note),
                        true,
                    )
                    .await?;
                    set_order_status(&mut tx, order_id, OrderStatus::OutForDelivery).await?;
                    insert_activity(
                        &mut tx,
                        order_id,
                        actor,
                        OrderStatus::Assigned,
                        OrderStatus::OutForDelivery,
                        None,
                        true,
                    )
                    .await?;
                }
                Party::Courier { provider } => {
                    sqlx::query("UPDATE orders SET courier = $1 WHERE id = $2")
                        .bind(provider)
                        .bind(order_id)
                        .execute(&mut *tx)
                        .await?;
                    set_order_status(&mut tx, order_id, OrderStatus::HandedToCourier).await?;
                    insert_activity(
                        &mut tx,
                        order_id,
                        actor,
                        OrderStatus::Packed,
                        OrderStatus::HandedToCourier,
                        Some(&note),
                        true,
                    )
                    .await?;
                    set_order_status(&mut tx, order_id, OrderStatus::InTransit).await?;
                    insert_activity(
                        &mut tx,
                        order_id,
                        actor,
                        OrderStatus::HandedToCourier,
                        OrderStatus::InTransit,
                        None,
                        true,
                    )
                    .await?;
                }
            }
        }
        sqlx::query("UPDATE manifests SET status = 'dispatched', dispatched_at = now() WHERE id = $1")
            .bind(manifest_id)
            .execute(&mut *tx)
            .await?;
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        tracing::info!(manifest_id, orders = order_ids.len(), "Manifest dispatched");
        Ok(updated)
    }

    async fn record_outcome(
        &self,
        manifest_id: i64,
        order_id: i64,
        outcome: OutcomeInput,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if manifest.status != ManifestStatus::Dispatched {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, outcomes are recorded on dispatched manifests",
                manifest.status.as_str()
            )));
        }
        let line = manifest
            .line(order_id)
            .ok_or(OpsError::not_found("manifest line", order_id))?;
        if line.outcome != LineOutcome::Pending {
            return Err(OpsError::validation(format!(
                "outcome for order {order_id} already recorded as {}",
                line.outcome.as_str()
            )));
        }
        let order = fetch_order(&mut tx, order_id, true).await?;
        let from = order.status;

        let (line_outcome, line_note) = match outcome {
            OutcomeInput::Delivered {
                proof,
                cod_collected,
            } => {
                if proof.is_none() && order.fulfillment.requires_proof() {
                    return Err(OpsError::validation(
                        "delivery proof (photo or signature reference) is required",
                    ));
                }
                if !from.can_move_to(OrderStatus::Delivered, order.fulfillment) {
                    tx.rollback().await?;
                    self.log_refused(order_id, actor, from, OrderStatus::Delivered, None)
                        .await?;
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::Delivered,
                    });
                }
                let collected = cod_collected.unwrap_or(order.cod_due);
                if collected < Decimal::ZERO {
                    return Err(OpsError::validation("collected amount must not be negative"));
                }
                sqlx::query("UPDATE orders SET delivery_proof = $1 WHERE id = $2")
                    .bind(&proof)
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
                set_order_status(&mut tx, order_id, OrderStatus::Delivered).await?;
                insert_activity(&mut tx, order_id, actor, from, OrderStatus::Delivered, None, true)
                    .await?;

                let mut note = None;
                if collected != order.cod_due {
                    tracing::warn!(
                        order_id,
                        cod_due = %order.cod_due,
                        %collected,
                        "COD collected differs from due"
                    );
                    note = Some(format!(
                        "COD mismatch on {}: due {}, collected {collected}",
                        order.order_number, order.cod_due
                    ));
                }
                if let Party::Rider { rider_id } = manifest.owner {
                    if collected > Decimal::ZERO {
                        ledger_append(
                            &mut tx,
                            rider_id,
                            LedgerEntryKind::CodCollected,
                            collected,
                            Some(order_id),
                            None,
                            actor,
                            note.as_deref(),
                        )
                        .await?;
                    }
                }
                (LineOutcome::Delivered, note)
            }
            OutcomeInput::Rejected { reason } => {
                if !from.can_move_to(OrderStatus::Rejected, order.fulfillment) {
                    tx.rollback().await?;
                    self.log_refused(order_id, actor, from, OrderStatus::Rejected, None)
                        .await?;
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::Rejected,
                    });
                }
                set_order_status(&mut tx, order_id, OrderStatus::Rejected).await?;
                insert_activity(
                    &mut tx,
                    order_id,
                    actor,
                    from,
                    OrderStatus::Rejected,
                    Some(&reason),
                    true,
                )
                .await?;
                set_order_status(&mut tx, order_id, OrderStatus::ReturnInitiated).await?;
                insert_activity(
                    &mut tx,
                    order_id,
                    actor,
                    OrderStatus::Rejected,
                    OrderStatus::ReturnInitiated,
                    Some("rejected parcel returning to hub"),
                    true,
                )
                .await?;
                (LineOutcome::Rejected, Some(reason))
            }
            OutcomeInput::Returned { reason } => {
                if !from.can_move_to(OrderStatus::ReturnInitiated, order.fulfillment) {
                    tx.rollback().await?;
                    self.log_refused(order_id, actor, from, OrderStatus::ReturnInitiated, None)
                        .await?;
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::ReturnInitiated,
                    });
                }
                set_order_status(&mut tx, order_id, OrderStatus::ReturnInitiated).await?;
                insert_activity(
                    &mut tx,
                    order_id,
                    actor,
                    from,
                    OrderStatus::ReturnInitiated,
                    Some(&reason),
                    true,
                )
                .await?;
                (LineOutcome::Returned, Some(reason))
            }
        };

        sqlx::query(
            "UPDATE manifest_lines SET outcome = $1, note = $2, recorded_at = now()
             WHERE manifest_id = $3 AND order_id = $4",
        )
        .bind(line_outcome.as_str())
        .bind(&line_note)
        .bind(manifest_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn reschedule_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if manifest.status != ManifestStatus::Dispatched {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, reschedule applies after dispatch",
                manifest.status.as_str()
            )));
        }
        let line = manifest
            .line(order_id)
            .ok_or(OpsError::not_found("manifest line", order_id))?;
        if line.outcome != LineOutcome::Pending {
            return Err(OpsError::validation(format!(
                "outcome for order {order_id} already recorded as {}",
                line.outcome.as_str()
            )));
        }
        let order = fetch_order(&mut tx, order_id, true).await?;
        let from = order.status;
        if !from.can_move_to(OrderStatus::Packed, order.fulfillment) {
            tx.rollback().await?;
            self.log_refused(order_id, actor, from, OrderStatus::Packed, None)
                .await?;
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to: OrderStatus::Packed,
            });
        }
        sqlx::query("UPDATE orders SET rider_id = NULL WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        set_order_status(&mut tx, order_id, OrderStatus::Packed).await?;
        insert_activity(
            &mut tx,
            order_id,
            actor,
            from,
            OrderStatus::Packed,
            Some("rescheduled off manifest"),
            true,
        )
        .await?;
        sqlx::query(
            "UPDATE manifest_lines SET outcome = 'rescheduled', recorded_at = now()
             WHERE manifest_id = $1 AND order_id = $2",
        )
        .bind(manifest_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn close_manifest(&self, manifest_id: i64, _actor: Actor) -> Result<Manifest, OpsError> {
        let mut tx = self.pool.begin().await?;
        let manifest = fetch_manifest(&mut tx, manifest_id, true).await?;
        if !manifest.settleable() {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is not settleable ({} with {} pending lines)",
                manifest.status.as_str(),
                manifest
                    .lines
                    .iter()
                    .filter(|l| l.outcome == LineOutcome::Pending)
                    .count()
            )));
        }
        sqlx::query("UPDATE manifests SET status = 'closed', closed_at = now() WHERE id = $1")
            .bind(manifest_id)
            .execute(&mut *tx)
            .await?;
        let updated = fetch_manifest(&mut tx, manifest_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    // ---- return gate ----

    async fn create_handover(
        &self,
        source: Party,
        lines: Vec<NewHandoverLine>,
        _actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        if lines.is_empty() {
            return Err(OpsError::validation("handover needs at least one line"));
        }
        let mut tx = self.pool.begin().await?;
        for line in &lines {
            if line.quantity <= 0 {
                return Err(OpsError::validation("claimed quantity must be positive"));
            }
            let order = fetch_order(&mut tx, line.order_id, true).await?;
            if !matches!(order.status, OrderStatus::ReturnInitiated | OrderStatus::Rto) {
                return Err(OpsError::validation(format!(
                    "order {} is {}, no return in progress",
                    order.order_number,
                    order.status.as_str()
                )));
            }
            let ordered: i64 = order
                .lines
                .iter()
                .filter(|l| l.variant_id == line.variant_id)
                .map(|l| l.quantity)
                .sum();
            if ordered == 0 {
                return Err(OpsError::validation(format!(
                    "variant {} is not on order {}",
                    line.variant_id, order.order_number
                )));
            }
            if line.quantity > ordered {
                return Err(OpsError::validation(format!(
                    "claimed {} of variant {} exceeds the {} ordered on {}",
                    line.quantity, line.variant_id, ordered, order.order_number
                )));
            }
            let pending: Option<i64> = sqlx::query_scalar(
                "SELECT h.id FROM return_handovers h
                 JOIN handover_lines hl ON hl.handover_id = h.id
                 WHERE hl.order_id = $1 AND h.status = 'pending_verification'
                 LIMIT 1",
            )
            .bind(line.order_id)
            .fetch_optional(&mut *tx)
            .await?;
            if pending.is_some() {
                return Err(OpsError::validation(format!(
                    "order {} already has a handover pending verification",
                    order.order_number
                )));
            }
        }
        let (kind, rider_id, courier) = party_cols(&source);
        let handover_id: i64 = sqlx::query_scalar(
            "INSERT INTO return_handovers (source_kind, source_rider_id, source_courier, status)
             VALUES ($1, $2, $3, 'pending_verification') RETURNING id",
        )
        .bind(kind)
        .bind(rider_id)
        .bind(courier)
        .fetch_one(&mut *tx)
        .await?;
        for line in &lines {
            sqlx::query(
                "INSERT INTO handover_lines (handover_id, order_id, variant_id, claimed_qty, condition, note)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(handover_id)
            .bind(line.order_id)
            .bind(line.variant_id)
            .bind(line.quantity)
            .bind(line.condition.as_str())
            .bind(&line.note)
            .execute(&mut *tx)
            .await?;
        }
        let handover = fetch_handover(&mut tx, handover_id, false).await?;
        tx.commit().await?;
        Ok(handover)
    }

    async fn get_handover(&self, id: i64) -> Result<ReturnHandover, OpsError> {
        let mut conn = self.pool.acquire().await?;
        fetch_handover(&mut conn, id, false).await
    }

    async fn list_handovers(
        &self,
        status: Option<HandoverStatus>,
    ) -> Result<Vec<ReturnHandover>, OpsError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, HandoverRow>(
            "SELECT * FROM return_handovers
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY id DESC",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = fetch_handover_lines(&mut conn, row.id).await?;
            out.push(row.into_handover(lines)?);
        }
        Ok(out)
    }

    async fn process_handover(
        &self,
        handover_id: i64,
        verifications: Vec<LineVerification>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        if verifications.is_empty() {
            return Err(OpsError::validation("nothing to verify"));
        }
        let mut tx = self.pool.begin().await?;
        let handover = fetch_handover(&mut tx, handover_id, true).await?;
        if handover.status == HandoverStatus::Processed {
            return Err(OpsError::HandoverAlreadyProcessed(handover_id));
        }
        for v in &verifications {
            let line = handover
                .lines
                .iter()
                .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                .ok_or(OpsError::not_found("handover line", v.order_id))?;
            if line.verified_qty.is_some() {
                return Err(OpsError::validation(format!(
                    "line for order {} variant {} is already verified, stock is credited once",
                    v.order_id, v.variant_id
                )));
            }
            match (v.verified_qty, v.disputed) {
                (Some(q), false) if q < 0 => {
                    return Err(OpsError::validation("verified quantity must not be negative"))
                }
                (Some(_), false) | (None, true) => {}
                (Some(_), true) => {
                    return Err(OpsError::validation(
                        "a line is either verified or disputed, not both",
                    ))
                }
                (None, false) => {
                    return Err(OpsError::validation(
                        "verdict needs a verified quantity or a dispute flag",
                    ))
                }
            }
        }

        for v in &verifications {
            if v.disputed {
                sqlx::query(
                    "UPDATE handover_lines SET disputed = TRUE, note = COALESCE($1, note)
                     WHERE handover_id = $2 AND order_id = $3 AND variant_id = $4",
                )
                .bind(&v.note)
                .bind(handover_id)
                .bind(v.order_id)
                .bind(v.variant_id)
                .execute(&mut *tx)
                .await?;
                continue;
            }
            let verified = v.verified_qty.unwrap_or(0);
            let line = handover
                .lines
                .iter()
                .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                .ok_or(OpsError::not_found("handover line", v.order_id))?;
            let condition = v.condition.unwrap_or(line.condition);
            let mut note = v.note.clone();
            if verified != line.claimed_qty {
                let msg = format!(
                    "discrepancy: claimed {}, verified {verified}",
                    line.claimed_qty
                );
                tracing::warn!(
                    handover_id,
                    order_id = v.order_id,
                    variant_id = v.variant_id,
                    claimed = line.claimed_qty,
                    verified,
                    "Return verification discrepancy"
                );
                note = Some(match note {
                    Some(n) => format!("{n}; {msg}"),
                    None => msg,
                });
            }
            if verified > 0 && condition.restockable() {
                sqlx::query(
                    "UPDATE variants SET stock_on_hand = stock_on_hand + $1 WHERE id = $2",
                )
                .bind(verified)
                .bind(v.variant_id)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query(
                "UPDATE handover_lines
                 SET verified_qty = $1, condition = $2, disputed = FALSE, note = $3
                 WHERE handover_id = $4 AND order_id = $5 AND variant_id = $6",
            )
            .bind(verified)
            .bind(condition.as_str())
            .bind(&note)
            .bind(handover_id)
            .bind(v.order_id)
            .bind(v.variant_id)
            .execute(&mut *tx)
            .await?;
        }

        let refreshed = fetch_handover(&mut tx, handover_id, false).await?;
        let mut order_ids: Vec<i64> = refreshed.lines.iter().map(|l| l.order_id).collect();
        order_ids.sort_unstable();
        order_ids.dedup();
        for order_id in order_ids {
            let all_resolved = refreshed
                .lines
                .iter()
                .filter(|l| l.order_id == order_id)
                .all(|l| l.resolved());
            if !all_resolved {
                continue;
            }
            let order = fetch_order(&mut tx, order_id, true).await?;
            if order.status == OrderStatus::Returned {
                continue;
            }
            if !order.status.can_move_to(OrderStatus::Returned, order.fulfillment) {
                return Err(OpsError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Returned,
                });
            }
            set_order_status(&mut tx, order_id, OrderStatus::Returned).await?;
            insert_activity(
                &mut tx,
                order_id,
                actor,
                order.status,
                OrderStatus::Returned,
                Some(&format!("return verified (handover {handover_id})")),
                true,
            )
            .await?;
        }

        if refreshed.unresolved_lines() == 0 {
            sqlx::query(
                "UPDATE return_handovers SET status = 'processed', processed_at = now() WHERE id = $1",
            )
            .bind(handover_id)
            .execute(&mut *tx)
            .await?;
        }
        let updated = fetch_handover(&mut tx, handover_id, false).await?;
        tx.commit().await?;
        Ok(updated)
    }

    // ---- rider cash ledger ----

    async fn append_ledger_entry(
        &self,
        rider_id: i64,
        kind: LedgerEntryKind,
        delta: Decimal,
        order_id: Option<i64>,
        settlement_id: Option<i64>,
        actor: Actor,
        note: Option<String>,
    ) -> Result<LedgerEntry, OpsError> {
        if delta == Decimal::ZERO {
            return Err(OpsError::validation("ledger delta must not be zero"));
        }
        let mut tx = self.pool.begin().await?;
        let entry = ledger_append(
            &mut tx,
            rider_id,
            kind,
            delta,
            order_id,
            settlement_id,
            actor,
            note.as_deref(),
        )
        .await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn rider_balance(&self, rider_id: i64) -> Result<Decimal, OpsError> {
        let balance: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM rider_ledger WHERE rider_id = $1",
        )
        .bind(rider_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn rider_statement(&self, rider_id: i64) -> Result<Vec<LedgerEntry>, OpsError> {
        let rows = sqlx::query(
            "SELECT * FROM rider_ledger WHERE rider_id = $1 ORDER BY id DESC",
        )
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let kind: String = r.try_get("kind").map_err(OpsError::Storage)?;
                Ok(LedgerEntry {
                    id: r.try_get("id").map_err(OpsError::Storage)?,
                    rider_id,
                    kind: LedgerEntryKind::parse(&kind)
                        .ok_or_else(|| decode_err(format!("bad ledger kind {kind}")))?,
                    delta: r.try_get("delta").map_err(OpsError::Storage)?,
                    balance_after: r.try_get("balance_after").map_err(OpsError::Storage)?,
                    order_id: r.try_get("order_id").map_err(OpsError::Storage)?,
                    settlement_id: r.try_get("settlement_id").map_err(OpsError::Storage)?,
                    actor_id: r.try_get("actor_id").map_err(OpsError::Storage)?,
                    note: r.try_get("note").map_err(OpsError::Storage)?,
                    created_at: r.try_get("created_at").map_err(OpsError::Storage)?,
                })
            })
            .collect()
    }

    // ---- settlements ----

    async fn create_settlement(
        &self,
        rider_id: i64,
        declared: Decimal,
        _actor: Actor,
    ) -> Result<Settlement, OpsError> {
        if declared < Decimal::ZERO {
            return Err(OpsError::validation("declared amount must not be negative"));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(rider_id)
            .execute(&mut *tx)
            .await?;
        let open: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM settlements WHERE rider_id = $1 AND status = 'pending' LIMIT 1",
        )
        .bind(rider_id)
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_some() {
            return Err(OpsError::SettlementAlreadyPending(rider_id));
        }
        let expected: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM rider_ledger WHERE rider_id = $1",
        )
        .bind(rider_id)
        .fetch_one(&mut *tx)
        .await?;
        let row = sqlx::query_as::<_, SettlementRow>(
            "INSERT INTO settlements (rider_id, expected, declared, status)
             VALUES ($1, $2, $3, 'pending') RETURNING *",
        )
        .bind(rider_id)
        .bind(expected)
        .bind(declared)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.into_settlement()
    }

    async fn get_settlement(&self, id: i64) -> Result<Settlement, OpsError> {
        sqlx::query_as::<_, SettlementRow>("SELECT * FROM settlements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OpsError::not_found("settlement", id))?
            .into_settlement()
    }

    async fn list_settlements(&self, rider_id: Option<i64>) -> Result<Vec<Settlement>, OpsError> {
        let rows = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM settlements
             WHERE ($1::bigint IS NULL OR rider_id = $1)
             ORDER BY id DESC",
        )
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_settlement()).collect()
    }

    async fn verify_settlement(
        &self,
        settlement_id: i64,
        actual: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError> {
        if actual < Decimal::ZERO {
            return Err(OpsError::validation("verified amount must not be negative"));
        }
        let mut tx = self.pool.begin().await?;
        let settlement = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM settlements WHERE id = $1 FOR UPDATE",
        )
        .bind(settlement_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OpsError::not_found("settlement", settlement_id))?
        .into_settlement()?;
        if settlement.status != SettlementStatus::Pending {
            return Err(OpsError::validation(format!(
                "settlement {settlement_id} is already verified"
            )));
        }
        let variance = actual - settlement.expected;
        if variance != Decimal::ZERO {
            tracing::warn!(
                settlement_id,
                rider_id = settlement.rider_id,
                expected = %settlement.expected,
                %actual,
                %variance,
                "Settlement variance detected"
            );
            ledger_append(
                &mut tx,
                settlement.rider_id,
                LedgerEntryKind::SettlementAdjustment,
                variance,
                None,
                Some(settlement_id),
                actor,
                Some(&format!(
                    "settlement variance: expected {}, verified {actual}",
                    settlement.expected
                )),
            )
            .await?;
        }
        sqlx::query(
            "UPDATE settlements
             SET actual = $1, variance = $2, status = 'verified', verified_at = now(), verified_by = $3
             WHERE id = $4",
        )
        .bind(actual)
        .bind(variance)
        .bind(actor.id)
        .bind(settlement_id)
        .execute(&mut *tx)
        .await?;
        // The rider's fully-accounted road batches close with the cash.
        sqlx::query(
            "UPDATE manifests m SET status = 'closed', closed_at = now()
             WHERE m.owner_kind = 'rider' AND m.owner_rider_id = $1 AND m.status = 'dispatched'
               AND NOT EXISTS (SELECT 1 FROM manifest_lines ml
                               WHERE ml.manifest_id = m.id AND ml.outcome = 'pending')",
        )
        .bind(settlement.rider_id)
        .execute(&mut *tx)
        .await?;
        let updated = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM settlements WHERE id = $1",
        )
        .bind(settlement_id)
        .fetch_one(&mut *tx)
        .await?
        .into_settlement()?;
        tx.commit().await?;
        Ok(updated)
    }

    // ---- logistics sync ----

    async fn claim_booking(
        &self,
        order_id: i64,
        provider: &str,
    ) -> Result<BookingClaim, OpsError> {
        let mut tx = self.pool.begin().await?;
        let order = fetch_order(&mut tx, order_id, true).await?;
        if !order.fulfillment.courier_carried() {
            return Err(OpsError::validation(format!(
                "order {} is {}, only outside-valley orders book a courier",
                order.order_number,
                order.fulfillment.as_str()
            )));
        }
        if !matches!(
            order.status,
            OrderStatus::Packed | OrderStatus::HandedToCourier | OrderStatus::InTransit
        ) {
            return Err(OpsError::validation(format!(
                "order {} is {}, not bookable",
                order.order_number,
                order.status.as_str()
            )));
        }
        let row = sqlx::query_as::<_, SyncRow>(
            "SELECT * FROM logistics_sync WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;
        let claim = match row {
            None => {
                sqlx::query(
                    "INSERT INTO logistics_sync (order_id, provider, state, attempts)
                     VALUES ($1, $2, 'in_flight', 1)",
                )
                .bind(order_id)
                .bind(provider)
                .execute(&mut *tx)
                .await?;
                BookingClaim::Claimed { attempts: 1 }
            }
            Some(row) => {
                let sync = row.into_sync()?;
                match (sync.state, sync.tracking_id) {
                    (SyncState::Booked, Some(tracking_id)) => {
                        if sync.provider != provider {
                            return Err(OpsError::validation(format!(
                                "order {order_id} is already booked with {}",
                                sync.provider
                            )));
                        }
                        BookingClaim::AlreadyBooked { tracking_id }
                    }
                    (SyncState::InFlight, _) => BookingClaim::InFlight,
                    _ => {
                        let attempts = sync.attempts + 1;
                        sqlx::query(
                            "UPDATE logistics_sync
                             SET provider = $1, state = 'in_flight', tracking_id = NULL, attempts = $2
                             WHERE order_id = $3",
                        )
                        .bind(provider)
                        .bind(attempts)
                        .bind(order_id)
                        .execute(&mut *tx)
                        .await?;
                        BookingClaim::Claimed { attempts }
                    }
                }
            }
        };
        tx.commit().await?;
        Ok(claim)
    }

    async fn complete_booking(
        &self,
        order_id: i64,
        provider: &str,
        tracking_id: &str,
    ) -> Result<LogisticsSyncStatus, OpsError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE logistics_sync
             SET state = 'booked', tracking_id = $1, last_synced_at = now(), last_error = NULL
             WHERE order_id = $2 AND provider = $3",
        )
        .bind(tracking_id)
        .bind(order_id)
        .bind(provider)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(OpsError::validation(format!(
                "no booking claim for order {order_id} with {provider}"
            )));
        }
        sqlx::query(
            "UPDATE orders SET courier = $1, tracking_id = $2, updated_at = now() WHERE id = $3",
        )
        .bind(provider)
        .bind(tracking_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        let row = sqlx::query_as::<_, SyncRow>(
            "SELECT * FROM logistics_sync WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.into_sync()
    }

    async fn fail_booking(
        &self,
        order_id: i64,
        provider: &str,
        error: &str,
    ) -> Result<LogisticsSyncStatus, OpsError> {
        let res = sqlx::query(
            "UPDATE logistics_sync
             SET state = 'failed', last_error = $1, last_synced_at = now()
             WHERE order_id = $2 AND provider = $3",
        )
        .bind(error)
        .bind(order_id)
        .bind(provider)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(OpsError::validation(format!(
                "no booking claim for order {order_id} with {provider}"
            )));
        }
        sqlx::query_as::<_, SyncRow>("SELECT * FROM logistics_sync WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await?
            .into_sync()
    }

    async fn sync_status(&self, order_id: i64) -> Result<Option<LogisticsSyncStatus>, OpsError> {
        let row = sqlx::query_as::<_, SyncRow>(
            "SELECT * FROM logistics_sync WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(row.into_sync()?)),
        }
    }

    async fn touch_sync(&self, order_id: i64) -> Result<(), OpsError> {
        let res = sqlx::query(
            "UPDATE logistics_sync SET last_synced_at = now() WHERE order_id = $1",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(OpsError::not_found("sync status", order_id));
        }
        Ok(())
    }
}
