//! Concrete collaborators wired into `mqk_runtime::Runtime` at startup.
//!
//! The paper matching book stands in for the exchange client; a thin HTTP
//! oracle stands in for the advisory LLM client. Neither crate is part of
//! this repository's core — both are named as external collaborators — so
//! the adapters here are deliberately small.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqk_broker_paper::{Fill, Order, OrderKind, OrderSide, OrderStatus, PaperPerpBook, Position, PositionSide, SubmitOrder};
use mqk_heartbeat::{
    AdvisoryOracle, ExecuteRequest, ExecuteResponse, Executor, OpenOrder, OpenPosition, OrderType, PositionDataSource,
    Side,
};
use mqk_portfolio::Micros;
use sqlx::PgPool;

/// Paper exchange: order execution and position reporting over a single
/// in-process `PaperPerpBook`. Marks are whatever price accompanied the most
/// recent order for a symbol — there is no live market-data feed behind this
/// build, so a position's mark stays at its last traded price until another
/// order touches that symbol.
///
/// Every mutation (`execute`/`cancel_order`) persists the book, position set,
/// order set, and any newly produced fills in a single transaction via
/// `mqk_db::persist_paper_book`, so a process restart resumes from exactly
/// where the book left off (`PaperExchange::new` reloads the snapshot).
pub struct PaperExchange {
    book: Mutex<PaperPerpBook>,
    marks: Mutex<HashMap<String, Micros>>,
    opened_at: Mutex<HashMap<String, DateTime<Utc>>>,
    order_created_at: Mutex<HashMap<String, DateTime<Utc>>>,
    persisted_fill_count: Mutex<usize>,
    pool: PgPool,
}

impl PaperExchange {
    pub async fn new(pool: PgPool, starting_cash: Micros, fee_bps: i64) -> anyhow::Result<Self> {
        let snapshot = mqk_db::load_paper_book(&pool).await.context("load persisted paper book")?;

        let order_created_at: HashMap<String, DateTime<Utc>> =
            snapshot.orders.iter().map(|o| (o.order_id.clone(), o.created_at)).collect();

        let book = match &snapshot.book {
            Some(row) => PaperPerpBook::restore(
                row.fee_bps,
                Micros::new(row.cash_micros),
                Micros::new(row.realized_pnl_micros),
                snapshot.positions.iter().map(row_to_position).collect(),
                snapshot.orders.iter().map(row_to_order).collect(),
                snapshot.fills.iter().map(row_to_fill).collect(),
            ),
            None => PaperPerpBook::new(starting_cash, fee_bps),
        };
        let persisted_fill_count = book.fills().len();

        Ok(Self {
            book: Mutex::new(book),
            marks: Mutex::new(HashMap::new()),
            opened_at: Mutex::new(HashMap::new()),
            order_created_at: Mutex::new(order_created_at),
            persisted_fill_count: Mutex::new(persisted_fill_count),
            pool,
        })
    }

    fn mark_for(&self, symbol: &str, fallback: Option<f64>) -> Micros {
        if let Some(px) = fallback {
            return micros_from_f64(px);
        }
        self.marks.lock().unwrap().get(symbol).copied().unwrap_or(Micros::ZERO)
    }

    /// Snapshots the in-memory book and writes it through in one
    /// transaction. Called after every order submission and cancellation.
    async fn persist(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let (book_row, position_rows, order_rows, new_fill_rows) = {
            let book = self.book.lock().unwrap();
            let book_row = mqk_db::PaperBookRow {
                cash_micros: book.cash().raw(),
                realized_pnl_micros: book.realized_pnl().raw(),
                fee_bps: book.fee_bps,
            };
            let position_rows: Vec<mqk_db::PaperPositionRow> = book.positions().iter().map(position_to_row).collect();

            let mut created_map = self.order_created_at.lock().unwrap();
            let order_rows: Vec<mqk_db::PaperOrderRow> = book
                .orders()
                .into_iter()
                .map(|o| {
                    let created_at = *created_map.entry(o.order_id.clone()).or_insert(now);
                    order_to_row(&o, created_at)
                })
                .collect();

            let mut persisted = self.persisted_fill_count.lock().unwrap();
            let all_fills = book.fills();
            let new_fill_rows: Vec<mqk_db::PaperFillRow> = all_fills[*persisted..].iter().map(fill_to_row).collect();
            *persisted = all_fills.len();

            (book_row, position_rows, order_rows, new_fill_rows)
        };

        mqk_db::persist_paper_book(&self.pool, &book_row, &position_rows, &order_rows, &new_fill_rows, now)
            .await
            .context("persist paper book snapshot")
    }
}

fn to_position_side_str(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "long",
        PositionSide::Short => "short",
    }
}

fn parse_position_side(s: &str) -> PositionSide {
    match s {
        "short" => PositionSide::Short,
        _ => PositionSide::Long,
    }
}

fn to_order_side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn parse_order_side(s: &str) -> OrderSide {
    match s {
        "sell" => OrderSide::Sell,
        _ => OrderSide::Buy,
    }
}

fn to_order_kind_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "market",
        OrderKind::Limit => "limit",
    }
}

fn parse_order_kind(s: &str) -> OrderKind {
    match s {
        "limit" => OrderKind::Limit,
        _ => OrderKind::Market,
    }
}

fn to_order_status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Open => "open",
        OrderStatus::Filled => "filled",
        OrderStatus::Canceled => "canceled",
    }
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "filled" => OrderStatus::Filled,
        "canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Open,
    }
}

fn position_to_row(p: &Position) -> mqk_db::PaperPositionRow {
    mqk_db::PaperPositionRow {
        symbol: p.symbol.clone(),
        side: to_position_side_str(p.side).to_string(),
        size_micros: p.size_micros,
        avg_entry_micros: p.avg_entry_price.raw(),
    }
}

fn row_to_position(r: &mqk_db::PaperPositionRow) -> Position {
    Position {
        symbol: r.symbol.clone(),
        side: parse_position_side(&r.side),
        size_micros: r.size_micros,
        avg_entry_price: Micros::new(r.avg_entry_micros),
    }
}

fn order_to_row(o: &Order, created_at: DateTime<Utc>) -> mqk_db::PaperOrderRow {
    mqk_db::PaperOrderRow {
        order_id: o.order_id.clone(),
        symbol: o.symbol.clone(),
        side: to_order_side_str(o.side).to_string(),
        kind: to_order_kind_str(o.kind).to_string(),
        size_micros: o.size_micros,
        filled_micros: o.filled_micros,
        limit_price_micros: o.limit_price.map(|p| p.raw()),
        reduce_only: o.reduce_only,
        status: to_order_status_str(o.status).to_string(),
        created_at,
    }
}

fn row_to_order(r: &mqk_db::PaperOrderRow) -> Order {
    Order {
        order_id: r.order_id.clone(),
        symbol: r.symbol.clone(),
        side: parse_order_side(&r.side),
        kind: parse_order_kind(&r.kind),
        size_micros: r.size_micros,
        filled_micros: r.filled_micros,
        limit_price: r.limit_price_micros.map(Micros::new),
        reduce_only: r.reduce_only,
        status: parse_order_status(&r.status),
    }
}

fn fill_to_row(f: &Fill) -> mqk_db::PaperFillRow {
    mqk_db::PaperFillRow {
        fill_id: f.fill_id.clone(),
        order_id: f.order_id.clone(),
        symbol: f.symbol.clone(),
        side: to_order_side_str(f.side).to_string(),
        price_micros: f.price.raw(),
        size_micros: f.size_micros,
        fee_micros: f.fee.raw(),
        realized_pnl_micros: f.realized_pnl.raw(),
    }
}

fn row_to_fill(r: &mqk_db::PaperFillRow) -> Fill {
    Fill {
        fill_id: r.fill_id.clone(),
        order_id: r.order_id.clone(),
        symbol: r.symbol.clone(),
        side: parse_order_side(&r.side),
        price: Micros::new(r.price_micros),
        size_micros: r.size_micros,
        fee: Micros::new(r.fee_micros),
        realized_pnl: Micros::new(r.realized_pnl_micros),
    }
}

/// `ExecuteRequest`/`OpenPosition` carry prices and sizes as `f64`; the book
/// underneath is `Micros`-only. These two helpers are the single conversion
/// point so rounding behavior lives in exactly one place.
fn micros_from_f64(v: f64) -> Micros {
    Micros::new((v * 1_000_000.0).round() as i64)
}

fn micros_to_f64(v: Micros) -> f64 {
    v.raw() as f64 / 1_000_000.0
}

fn to_order_side(side: Side) -> OrderSide {
    match side {
        Side::Long => OrderSide::Buy,
        Side::Short => OrderSide::Sell,
    }
}

fn to_order_kind(order_type: OrderType) -> OrderKind {
    match order_type {
        OrderType::Market => OrderKind::Market,
        OrderType::Limit => OrderKind::Limit,
    }
}

#[async_trait]
impl Executor for PaperExchange {
    async fn execute(&self, req: ExecuteRequest) -> anyhow::Result<ExecuteResponse> {
        let mark = self.mark_for(&req.symbol, req.price);
        let submit = SubmitOrder {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            symbol: req.symbol.clone(),
            side: to_order_side(req.side),
            kind: to_order_kind(req.order_type),
            size_micros: micros_from_f64(req.size).raw(),
            limit_price: if req.order_type == OrderType::Limit { Some(mark) } else { None },
            reduce_only: req.reduce_only,
        };

        let had_position = self.book.lock().unwrap().position(&req.symbol).is_some();

        let result = {
            let mut book = self.book.lock().unwrap();
            book.submit(submit, mark)
        };

        match result {
            Ok(order) => {
                self.marks.lock().unwrap().insert(req.symbol.clone(), mark);
                if !had_position {
                    self.opened_at.lock().unwrap().insert(req.symbol.clone(), Utc::now());
                }
                if self.book.lock().unwrap().position(&req.symbol).is_none() {
                    self.opened_at.lock().unwrap().remove(&req.symbol);
                }
                self.persist().await?;
                Ok(ExecuteResponse {
                    executed: true,
                    message: format!("paper order {} {:?}", order.order_id, order.status),
                })
            }
            Err(e) => Ok(ExecuteResponse {
                executed: false,
                message: e.to_string(),
            }),
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> anyhow::Result<()> {
        self.book.lock().unwrap().cancel(order_id).map_err(anyhow::Error::from)?;
        self.persist().await
    }

    async fn open_orders(&self, symbol: &str) -> anyhow::Result<Vec<OpenOrder>> {
        Ok(self
            .book
            .lock()
            .unwrap()
            .orders()
            .into_iter()
            .filter(|o| o.symbol == symbol && o.status == OrderStatus::Open)
            .map(|o| OpenOrder { order_id: o.order_id, symbol: o.symbol })
            .collect())
    }

    fn provider(&self) -> &str {
        "paper"
    }
}

#[async_trait]
impl PositionDataSource for PaperExchange {
    async fn open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
        let book = self.book.lock().unwrap();
        let marks = self.marks.lock().unwrap();
        let opened = self.opened_at.lock().unwrap();
        let now = Utc::now();

        let mut out = Vec::new();
        for symbol in marks.keys() {
            let Some(pos) = book.position(symbol) else { continue };
            let mark = marks.get(symbol).copied().unwrap_or(pos.avg_entry_price);
            let side = match pos.side {
                mqk_broker_paper::PositionSide::Long => Side::Long,
                mqk_broker_paper::PositionSide::Short => Side::Short,
            };
            let entry = micros_to_f64(pos.avg_entry_price);
            let mark_f64 = micros_to_f64(mark);
            let pnl_per_unit = match side {
                Side::Long => mark_f64 - entry,
                Side::Short => entry - mark_f64,
            };
            let notional = entry * (pos.size_micros as f64 / 1_000_000.0);
            let unrealized_pnl_pct = if notional.abs() > f64::EPSILON {
                pnl_per_unit * (pos.size_micros as f64 / 1_000_000.0) / notional * 100.0
            } else {
                0.0
            };

            out.push(OpenPosition {
                symbol: symbol.clone(),
                side,
                size: pos.size_micros as f64 / 1_000_000.0,
                mark_price: mark_f64,
                unrealized_pnl_pct_of_equity: unrealized_pnl_pct,
                // No liquidation mechanism is modeled in the paper book.
                liq_dist_pct: 100.0,
                funding_rate: 0.0,
                stop_price: None,
                take_profit_price: None,
                opened_at: opened.get(symbol).copied().unwrap_or(now),
            });
        }
        Ok(out)
    }

    async fn mids(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self
            .marks
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), micros_to_f64(*v)))
            .collect())
    }
}

/// `HeartbeatSupervisor` takes `Executor`/`PositionDataSource` by value, but
/// the same exchange handle is both — these forward through the `Arc` so one
/// `Arc<PaperExchange>` can be cloned into each generic slot.
#[async_trait]
impl Executor for Arc<PaperExchange> {
    async fn execute(&self, req: ExecuteRequest) -> anyhow::Result<ExecuteResponse> {
        (**self).execute(req).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()> {
        (**self).cancel_order(symbol, order_id).await
    }

    async fn open_orders(&self, symbol: &str) -> anyhow::Result<Vec<OpenOrder>> {
        (**self).open_orders(symbol).await
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }
}

#[async_trait]
impl PositionDataSource for Arc<PaperExchange> {
    async fn open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
        (**self).open_positions().await
    }

    async fn mids(&self) -> anyhow::Result<HashMap<String, f64>> {
        (**self).mids().await
    }
}

/// Advisory oracle reached over HTTP. Expects a collaborator exposing
/// `POST {base_url} {"prompt": ..., "timeout_ms": ...} -> {"content": ...}`.
pub struct HttpAdvisoryOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdvisoryOracle {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(serde::Serialize)]
struct OracleRequest<'a> {
    prompt: &'a str,
    timeout_ms: u64,
}

#[derive(serde::Deserialize)]
struct OracleResponse {
    content: String,
}

#[async_trait]
impl AdvisoryOracle for HttpAdvisoryOracle {
    async fn decide(&self, prompt: &str, timeout_ms: u64) -> anyhow::Result<String> {
        let fut = self
            .client
            .post(&self.base_url)
            .json(&OracleRequest { prompt, timeout_ms })
            .send();

        let resp = tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
            .await
            .context("advisory oracle call timed out")?
            .context("advisory oracle call failed")?;

        let parsed: OracleResponse = resp.json().await.context("advisory oracle response was not JSON")?;
        Ok(parsed.content)
    }
}
