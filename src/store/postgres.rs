//! PostgreSQL event store

use super::{EventStore, OrderUpdate, StoreStats, SubmissionRecord, SubmissionStatus};
use crate::config::DatabaseConfig;
use crate::coordination::machine::ActionKind;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BlockRef, EscrowEvent};
use crate::swap::{ChainSide, SwapId, SwapOrder};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// Event store persisted in PostgreSQL
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Connect to the database
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escrow_events (
                seq BIGSERIAL PRIMARY KEY,
                side VARCHAR(8) NOT NULL,
                swap_id BYTEA NOT NULL,
                block_height BIGINT NOT NULL,
                block_index BIGINT NOT NULL,
                kind VARCHAR(32) NOT NULL,
                observed_at BIGINT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (side, swap_id, block_height, block_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_escrow_events_swap
            ON escrow_events (swap_id, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_cursors (
                side VARCHAR(8) PRIMARY KEY,
                block_height BIGINT NOT NULL,
                block_index BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_orders (
                swap_id BYTEA PRIMARY KEY,
                phase VARCHAR(32) NOT NULL,
                is_open BOOLEAN NOT NULL DEFAULT TRUE,
                order_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_submissions (
                id UUID PRIMARY KEY,
                swap_id BYTEA NOT NULL,
                side VARCHAR(8) NOT NULL,
                kind VARCHAR(16) NOT NULL,
                attempt INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL,
                tx_ref VARCHAR(128),
                detail TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_submissions_swap
            ON action_submissions (swap_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn write_order(&self, order: &SwapOrder, open: bool) -> RelayerResult<()> {
        let order_data = serde_json::to_value(order)?;
        sqlx::query(
            r#"
            UPDATE swap_orders
            SET phase = $2, is_open = $3, order_data = $4, updated_at = NOW()
            WHERE swap_id = $1
            "#,
        )
        .bind(&order.swap_id.as_bytes()[..])
        .bind(order.status.as_str())
        .bind(open)
        .bind(order_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn order_from_row(row: &PgRow) -> RelayerResult<SwapOrder> {
    let data: serde_json::Value = row.try_get("order_data")?;
    Ok(serde_json::from_value(data)?)
}

fn submission_from_row(row: &PgRow) -> RelayerResult<SubmissionRecord> {
    let swap_id: Vec<u8> = row.try_get("swap_id")?;
    let swap_id: [u8; 32] = swap_id
        .try_into()
        .map_err(|_| RelayerError::Store("malformed swap id in action_submissions".into()))?;
    let side: String = row.try_get("side")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(SubmissionRecord {
        id: row.try_get::<Uuid, _>("id")?,
        swap_id: SwapId::from_bytes(swap_id),
        side: side.parse()?,
        kind: match kind.as_str() {
            "reveal" => ActionKind::Reveal,
            _ => ActionKind::Refund,
        },
        attempt: row.try_get::<i32, _>("attempt")? as u32,
        status: match status.as_str() {
            "submitted" => SubmissionStatus::Submitted,
            "already_settled" => SubmissionStatus::AlreadySettled,
            _ => SubmissionStatus::Failed,
        },
        tx_ref: row.try_get("tx_ref")?,
        detail: row.try_get("detail")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event: &EscrowEvent) -> RelayerResult<bool> {
        let payload = serde_json::to_value(event)?;

        let result = sqlx::query(
            r#"
            INSERT INTO escrow_events
                (side, swap_id, block_height, block_index, kind, observed_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (side, swap_id, block_height, block_index) DO NOTHING
            "#,
        )
        .bind(event.side.as_str())
        .bind(&event.swap_id.as_bytes()[..])
        .bind(event.block_ref.height as i64)
        .bind(event.block_ref.index as i64)
        .bind(event.kind.name())
        .bind(event.observed_at as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn events_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<EscrowEvent>> {
        let rows = sqlx::query("SELECT payload FROM escrow_events WHERE swap_id = $1 ORDER BY seq")
            .bind(&swap_id.as_bytes()[..])
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn cursor(&self, side: ChainSide) -> RelayerResult<Option<BlockRef>> {
        let row = sqlx::query("SELECT block_height, block_index FROM chain_cursors WHERE side = $1")
            .bind(side.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            BlockRef::new(
                r.get::<i64, _>("block_height") as u64,
                r.get::<i64, _>("block_index") as u32,
            )
        }))
    }

    async fn save_cursor(&self, side: ChainSide, cursor: BlockRef) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (side, block_height, block_index, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (side)
            DO UPDATE SET block_height = $2, block_index = $3, updated_at = NOW()
            "#,
        )
        .bind(side.as_str())
        .bind(cursor.height as i64)
        .bind(cursor.index as i64)
        .execute(&self.pool)
        .await?;

        debug!("Saved {} cursor at {}", side, cursor);
        Ok(())
    }

    async fn put_order(&self, order: &SwapOrder) -> RelayerResult<bool> {
        let order_data = serde_json::to_value(order)?;
        let result = sqlx::query(
            r#"
            INSERT INTO swap_orders (swap_id, phase, order_data)
            VALUES ($1, $2, $3)
            ON CONFLICT (swap_id) DO NOTHING
            "#,
        )
        .bind(&order.swap_id.as_bytes()[..])
        .bind(order.status.as_str())
        .bind(order_data)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_order(&self, update: &OrderUpdate) -> RelayerResult<()> {
        let mut order = self
            .order(&update.swap_id)
            .await?
            .ok_or_else(|| RelayerError::SwapNotFound {
                swap_id: update.swap_id.to_hex(),
            })?;
        order.status = update.phase;
        order.revealed_secret = update.revealed_secret;
        self.write_order(&order, update.open).await
    }

    async fn order(&self, swap_id: &SwapId) -> RelayerResult<Option<SwapOrder>> {
        let row = sqlx::query("SELECT order_data FROM swap_orders WHERE swap_id = $1")
            .bind(&swap_id.as_bytes()[..])
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn open_orders(&self) -> RelayerResult<Vec<SwapOrder>> {
        let rows = sqlx::query("SELECT order_data FROM swap_orders WHERE is_open ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn record_submission(&self, record: &SubmissionRecord) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO action_submissions
                (id, swap_id, side, kind, attempt, status, tx_ref, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.swap_id.as_bytes()[..])
        .bind(record.side.as_str())
        .bind(record.kind.as_str())
        .bind(record.attempt as i32)
        .bind(record.status.as_str())
        .bind(record.tx_ref.as_deref())
        .bind(record.detail.as_deref())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn submissions_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<SubmissionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, swap_id, side, kind, attempt, status, tx_ref, detail, created_at
            FROM action_submissions
            WHERE swap_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(&swap_id.as_bytes()[..])
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(submission_from_row).collect()
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let mut stats = StoreStats::default();

        let rows = sqlx::query(
            r#"
            SELECT phase, COUNT(*) AS total, COUNT(*) FILTER (WHERE is_open) AS open
            FROM swap_orders
            GROUP BY phase
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let phase: String = row.get("phase");
            stats
                .orders_by_phase
                .insert(phase, row.get::<i64, _>("total") as u64);
            stats.open_orders += row.get::<i64, _>("open") as u64;
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM escrow_events) AS events,
                (SELECT COUNT(*) FROM action_submissions) AS submissions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.events = row.get::<i64, _>("events") as u64;
        stats.submissions = row.get::<i64, _>("submissions") as u64;

        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
