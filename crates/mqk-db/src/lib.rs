// core-rs/crates/mqk-db/src/lib.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "MQK_DATABASE_URL";

/// Connect to Postgres using MQK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using MQK_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='scheduler_jobs'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_scheduler_jobs_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_scheduler_jobs_table: bool,
}

// ---------------------------------------------------------------------------
// Autonomy policy state (singleton row, read-modify-write under a transaction)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PolicyStateRow {
    pub min_edge_override: Option<f64>,
    pub max_trades_per_scan_override: Option<i64>,
    pub leverage_cap_override: Option<i64>,
    pub observation_only_until: Option<DateTime<Utc>>,
    pub full_auto_override: Option<bool>,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Loads the singleton policy-state row, if one has ever been written.
pub async fn load_policy_state(pool: &PgPool) -> Result<Option<PolicyStateRow>> {
    let row = sqlx::query_as::<_, PolicyStateSql>(
        r#"
        select min_edge_override, max_trades_per_scan_override, leverage_cap_override,
               observation_only_until, full_auto_override, reason, updated_at
        from autonomy_policy_state where id = true
        "#,
    )
    .fetch_optional(pool)
    .await
    .context("load_policy_state failed")?;
    Ok(row.map(Into::into))
}

/// Upserts the singleton policy-state row. Concurrent writers converge
/// because every write here is monotonically tightening; last-writer-wins
/// is an accepted outcome, not a bug (§5).
pub async fn save_policy_state(pool: &PgPool, state: &PolicyStateRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into autonomy_policy_state
            (id, min_edge_override, max_trades_per_scan_override, leverage_cap_override,
             observation_only_until, full_auto_override, reason, updated_at)
        values (true, $1, $2, $3, $4, $5, $6, $7)
        on conflict (id) do update set
            min_edge_override = excluded.min_edge_override,
            max_trades_per_scan_override = excluded.max_trades_per_scan_override,
            leverage_cap_override = excluded.leverage_cap_override,
            observation_only_until = excluded.observation_only_until,
            full_auto_override = excluded.full_auto_override,
            reason = excluded.reason,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(state.min_edge_override)
    .bind(state.max_trades_per_scan_override)
    .bind(state.leverage_cap_override)
    .bind(state.observation_only_until)
    .bind(state.full_auto_override)
    .bind(&state.reason)
    .bind(state.updated_at)
    .execute(pool)
    .await
    .context("save_policy_state failed")?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct PolicyStateSql {
    min_edge_override: Option<f64>,
    max_trades_per_scan_override: Option<i64>,
    leverage_cap_override: Option<i64>,
    observation_only_until: Option<DateTime<Utc>>,
    full_auto_override: Option<bool>,
    reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<PolicyStateSql> for PolicyStateRow {
    fn from(r: PolicyStateSql) -> Self {
        PolicyStateRow {
            min_edge_override: r.min_edge_override,
            max_trades_per_scan_override: r.max_trades_per_scan_override,
            leverage_cap_override: r.leverage_cap_override,
            observation_only_until: r.observation_only_until,
            full_auto_override: r.full_auto_override,
            reason: r.reason,
            updated_at: r.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Perp trade journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub id: Uuid,
    pub hypothesis_id: String,
    pub symbol: String,
    pub side: String,
    pub signal_class: String,
    pub regime: String,
    pub confidence: f64,
    pub expected_edge: f64,
    pub leverage: f64,
    pub probe_size_micros: i64,
    pub opened_at: DateTime<Utc>,
}

pub async fn insert_trade(pool: &PgPool, trade: &NewTrade) -> Result<()> {
    sqlx::query(
        r#"
        insert into perp_trades
            (id, hypothesis_id, symbol, side, signal_class, regime, confidence,
             expected_edge, leverage, probe_size_micros, opened_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(trade.id)
    .bind(&trade.hypothesis_id)
    .bind(&trade.symbol)
    .bind(&trade.side)
    .bind(&trade.signal_class)
    .bind(&trade.regime)
    .bind(trade.confidence)
    .bind(trade.expected_edge)
    .bind(trade.leverage)
    .bind(trade.probe_size_micros)
    .bind(trade.opened_at)
    .execute(pool)
    .await
    .context("insert_trade failed")?;
    Ok(())
}

pub async fn close_trade(pool: &PgPool, trade_id: Uuid, closed_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("update perp_trades set closed_at = $2 where id = $1")
        .bind(trade_id)
        .bind(closed_at)
        .execute(pool)
        .await
        .context("close_trade failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub signal_class: String,
    pub regime: String,
    pub outcome: String,
    pub thesis_correct: Option<bool>,
    pub captured_r: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

pub async fn insert_journal_entry(pool: &PgPool, entry: &NewJournalEntry) -> Result<()> {
    sqlx::query(
        r#"
        insert into perp_trade_journal
            (id, trade_id, signal_class, regime, outcome, thesis_correct, captured_r, closed_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.trade_id)
    .bind(&entry.signal_class)
    .bind(&entry.regime)
    .bind(&entry.outcome)
    .bind(entry.thesis_correct)
    .bind(entry.captured_r)
    .bind(entry.closed_at)
    .execute(pool)
    .await
    .context("insert_journal_entry failed")?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JournalEntryRow {
    pub signal_class: String,
    pub regime: String,
    pub outcome: String,
    pub thesis_correct: Option<bool>,
    pub captured_r: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Most recent `limit` resolved journal entries, newest first — the shape
/// the global trade gate's signal-performance guard and the reflective
/// mutator both fold over.
pub async fn recent_journal_entries(pool: &PgPool, limit: i64) -> Result<Vec<JournalEntryRow>> {
    let rows = sqlx::query_as::<_, JournalEntryRow>(
        r#"
        select signal_class, regime, outcome, thesis_correct, captured_r, closed_at
        from perp_trade_journal
        where closed_at is not null
        order by closed_at desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_journal_entries failed")?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Paper perp book snapshot persistence (mqk-broker-paper::PaperPerpBook)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaperBookRow {
    pub cash_micros: i64,
    pub realized_pnl_micros: i64,
    pub fee_bps: i64,
}

#[derive(Debug, Clone)]
pub struct PaperPositionRow {
    pub symbol: String,
    pub side: String,
    pub size_micros: i64,
    pub avg_entry_micros: i64,
}

#[derive(Debug, Clone)]
pub struct PaperOrderRow {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub kind: String,
    pub size_micros: i64,
    pub filled_micros: i64,
    pub limit_price_micros: Option<i64>,
    pub reduce_only: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaperFillRow {
    pub fill_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub price_micros: i64,
    pub size_micros: i64,
    pub fee_micros: i64,
    pub realized_pnl_micros: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PaperBookSnapshot {
    pub book: Option<PaperBookRow>,
    pub positions: Vec<PaperPositionRow>,
    pub orders: Vec<PaperOrderRow>,
    pub fills: Vec<PaperFillRow>,
}

#[derive(sqlx::FromRow)]
struct PaperBookSql {
    cash_micros: i64,
    realized_pnl_micros: i64,
    fee_bps: i64,
}

impl From<PaperBookSql> for PaperBookRow {
    fn from(r: PaperBookSql) -> Self {
        PaperBookRow {
            cash_micros: r.cash_micros,
            realized_pnl_micros: r.realized_pnl_micros,
            fee_bps: r.fee_bps,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaperPositionSql {
    symbol: String,
    side: String,
    size_micros: i64,
    avg_entry_micros: i64,
}

impl From<PaperPositionSql> for PaperPositionRow {
    fn from(r: PaperPositionSql) -> Self {
        PaperPositionRow {
            symbol: r.symbol,
            side: r.side,
            size_micros: r.size_micros,
            avg_entry_micros: r.avg_entry_micros,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaperOrderSql {
    order_id: String,
    symbol: String,
    side: String,
    kind: String,
    size_micros: i64,
    filled_micros: i64,
    limit_price_micros: Option<i64>,
    reduce_only: bool,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<PaperOrderSql> for PaperOrderRow {
    fn from(r: PaperOrderSql) -> Self {
        PaperOrderRow {
            order_id: r.order_id,
            symbol: r.symbol,
            side: r.side,
            kind: r.kind,
            size_micros: r.size_micros,
            filled_micros: r.filled_micros,
            limit_price_micros: r.limit_price_micros,
            reduce_only: r.reduce_only,
            status: r.status,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaperFillSql {
    fill_id: String,
    order_id: String,
    symbol: String,
    side: String,
    price_micros: i64,
    size_micros: i64,
    fee_micros: i64,
    realized_pnl_micros: i64,
}

impl From<PaperFillSql> for PaperFillRow {
    fn from(r: PaperFillSql) -> Self {
        PaperFillRow {
            fill_id: r.fill_id,
            order_id: r.order_id,
            symbol: r.symbol,
            side: r.side,
            price_micros: r.price_micros,
            size_micros: r.size_micros,
            fee_micros: r.fee_micros,
            realized_pnl_micros: r.realized_pnl_micros,
        }
    }
}

/// Loads the full persisted paper-book state for startup recovery. A
/// daemon that has never traded gets back an empty snapshot, not an error.
pub async fn load_paper_book(pool: &PgPool) -> Result<PaperBookSnapshot> {
    let book = sqlx::query_as::<_, PaperBookSql>(
        "select cash_micros, realized_pnl_micros, fee_bps from paper_perp_book where id = true",
    )
    .fetch_optional(pool)
    .await
    .context("load_paper_book: book row failed")?
    .map(Into::into);

    let positions = sqlx::query_as::<_, PaperPositionSql>(
        "select symbol, side, size_micros, avg_entry_micros from paper_perp_positions",
    )
    .fetch_all(pool)
    .await
    .context("load_paper_book: positions failed")?
    .into_iter()
    .map(Into::into)
    .collect();

    let orders = sqlx::query_as::<_, PaperOrderSql>(
        r#"
        select order_id, symbol, side, kind, size_micros, filled_micros,
               limit_price_micros, reduce_only, status, created_at
        from paper_perp_orders
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_paper_book: orders failed")?
    .into_iter()
    .map(Into::into)
    .collect();

    let fills = sqlx::query_as::<_, PaperFillSql>(
        r#"
        select fill_id, order_id, symbol, side, price_micros, size_micros,
               fee_micros, realized_pnl_micros
        from paper_perp_fills
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_paper_book: fills failed")?
    .into_iter()
    .map(Into::into)
    .collect();

    Ok(PaperBookSnapshot { book, positions, orders, fills })
}

/// Persists a post-mutation snapshot in a single transaction: upserts the
/// singleton book row, replaces the position set (small and fully
/// superseded by every mutation), upserts every order (status transitions
/// in place), and appends only the fills produced by this mutation — fills
/// are an append-only ledger, never rewritten.
pub async fn persist_paper_book(
    pool: &PgPool,
    book: &PaperBookRow,
    positions: &[PaperPositionRow],
    orders: &[PaperOrderRow],
    new_fills: &[PaperFillRow],
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("persist_paper_book: begin failed")?;

    sqlx::query(
        r#"
        insert into paper_perp_book (id, cash_micros, realized_pnl_micros, fee_bps, updated_at)
        values (true, $1, $2, $3, $4)
        on conflict (id) do update set
            cash_micros = excluded.cash_micros,
            realized_pnl_micros = excluded.realized_pnl_micros,
            fee_bps = excluded.fee_bps,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(book.cash_micros)
    .bind(book.realized_pnl_micros)
    .bind(book.fee_bps)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("persist_paper_book: upsert book failed")?;

    sqlx::query("delete from paper_perp_positions")
        .execute(&mut *tx)
        .await
        .context("persist_paper_book: clear positions failed")?;
    for p in positions {
        sqlx::query(
            r#"
            insert into paper_perp_positions (symbol, side, size_micros, avg_entry_micros, updated_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&p.symbol)
        .bind(&p.side)
        .bind(p.size_micros)
        .bind(p.avg_entry_micros)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("persist_paper_book: insert position failed")?;
    }

    for o in orders {
        sqlx::query(
            r#"
            insert into paper_perp_orders
                (order_id, symbol, side, kind, size_micros, filled_micros,
                 limit_price_micros, reduce_only, status, created_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (order_id) do update set
                filled_micros = excluded.filled_micros,
                status = excluded.status
            "#,
        )
        .bind(&o.order_id)
        .bind(&o.symbol)
        .bind(&o.side)
        .bind(&o.kind)
        .bind(o.size_micros)
        .bind(o.filled_micros)
        .bind(o.limit_price_micros)
        .bind(o.reduce_only)
        .bind(&o.status)
        .bind(o.created_at)
        .execute(&mut *tx)
        .await
        .context("persist_paper_book: upsert order failed")?;
    }

    for f in new_fills {
        sqlx::query(
            r#"
            insert into paper_perp_fills
                (fill_id, order_id, symbol, side, price_micros, size_micros,
                 fee_micros, realized_pnl_micros, created_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            on conflict (fill_id) do nothing
            "#,
        )
        .bind(&f.fill_id)
        .bind(&f.order_id)
        .bind(&f.symbol)
        .bind(&f.side)
        .bind(f.price_micros)
        .bind(f.size_micros)
        .bind(f.fee_micros)
        .bind(f.realized_pnl_micros)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("persist_paper_book: insert fill failed")?;
    }

    tx.commit().await.context("persist_paper_book: commit failed")?;
    Ok(())
}
