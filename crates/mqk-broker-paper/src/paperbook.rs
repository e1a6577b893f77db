//! Deterministic paper matching engine for perpetual-style positions.
//!
//! One book per process; a single margin account (cash + realized PnL) shared
//! across symbols, average-entry positions per symbol. Money everywhere is
//! `Micros` (1e-6 fixed point) — never `f64`.

use std::collections::BTreeMap;

use mqk_portfolio::Micros;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct SubmitOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Size in micros (1e-6 of a unit), always positive.
    pub size_micros: i64,
    /// Required for limit orders; ignored for market.
    pub limit_price: Option<Micros>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub size_micros: i64,
    pub filled_micros: i64,
    pub limit_price: Option<Micros>,
    pub reduce_only: bool,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Micros,
    pub size_micros: i64,
    pub fee: Micros,
    pub realized_pnl: Micros,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size_micros: i64,
    pub avg_entry_price: Micros,
}

#[derive(Debug, thiserror::Error)]
pub enum PaperBookError {
    #[error("order {0} not found")]
    OrderNotFound(String),
    #[error("limit order requires a limit price")]
    MissingLimitPrice,
    #[error("reduce-only order would increase or open exposure")]
    ReduceOnlyViolation,
    #[error("order size must be > 0")]
    InvalidSize,
}

/// Scale used by both price and size micros fields (1e-6).
const SCALE: i64 = 1_000_000;

fn notional(price: Micros, size_micros: i64) -> Option<Micros> {
    let value = (price.raw() as i128) * (size_micros as i128) / (SCALE as i128);
    i64::try_from(value).ok().map(Micros::new)
}

#[derive(Debug, Clone)]
pub struct PaperPerpBook {
    pub fee_bps: i64,
    cash: Micros,
    realized_pnl: Micros,
    positions: BTreeMap<String, Position>,
    orders: BTreeMap<String, Order>,
    fills: Vec<Fill>,
    next_fill_seq: u64,
}

impl Default for PaperPerpBook {
    fn default() -> Self {
        Self::new(Micros::ZERO, 5)
    }
}

impl PaperPerpBook {
    pub fn new(starting_cash: Micros, fee_bps: i64) -> Self {
        Self {
            fee_bps,
            cash: starting_cash,
            realized_pnl: Micros::ZERO,
            positions: BTreeMap::new(),
            orders: BTreeMap::new(),
            fills: Vec::new(),
            next_fill_seq: 0,
        }
    }

    /// Rebuilds a book from a persisted snapshot (cash, realized PnL,
    /// positions, orders, fills) so a process restart resumes with the
    /// exact state it left off with. `next_fill_seq` is recovered as the
    /// fill count — fill ids embed the order id, not the sequence number,
    /// so this only needs to keep future ids unique, not match history.
    pub fn restore(
        fee_bps: i64,
        cash: Micros,
        realized_pnl: Micros,
        positions: Vec<Position>,
        orders: Vec<Order>,
        fills: Vec<Fill>,
    ) -> Self {
        let next_fill_seq = fills.len() as u64;
        Self {
            fee_bps,
            cash,
            realized_pnl,
            positions: positions.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
            orders: orders.into_iter().map(|o| (o.order_id.clone(), o)).collect(),
            fills,
            next_fill_seq,
        }
    }

    pub fn cash(&self) -> Micros {
        self.cash
    }

    pub fn realized_pnl(&self) -> Micros {
        self.realized_pnl
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    /// Submits an order. Market orders always fill immediately at `mark`.
    /// Limit orders fill immediately if `mark` already crosses the limit
    /// price, otherwise rest as `Open`.
    pub fn submit(&mut self, req: SubmitOrder, mark: Micros) -> Result<Order, PaperBookError> {
        if req.size_micros <= 0 {
            return Err(PaperBookError::InvalidSize);
        }
        if req.kind == OrderKind::Limit && req.limit_price.is_none() {
            return Err(PaperBookError::MissingLimitPrice);
        }
        if req.reduce_only && self.increases_exposure(&req) {
            return Err(PaperBookError::ReduceOnlyViolation);
        }

        let mut order = Order {
            order_id: req.client_order_id.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            kind: req.kind,
            size_micros: req.size_micros,
            filled_micros: 0,
            limit_price: req.limit_price,
            reduce_only: req.reduce_only,
            status: OrderStatus::Open,
        };

        if self.crosses(&order, mark) {
            self.fill_order(&mut order, mark);
        }

        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    /// Attempts to cross any resting limit orders for `symbol` against an
    /// updated mark. Called by the caller's price-poll loop.
    pub fn try_match_resting(&mut self, symbol: &str, mark: Micros) -> Vec<Fill> {
        let resting_ids: Vec<String> = self
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status == OrderStatus::Open && o.kind == OrderKind::Limit)
            .map(|o| o.order_id.clone())
            .collect();

        let mut fired = Vec::new();
        for id in resting_ids {
            let mut order = self.orders.get(&id).cloned().expect("id came from orders map");
            if self.crosses(&order, mark) {
                let before = self.fills.len();
                self.fill_order(&mut order, mark);
                self.orders.insert(order.order_id.clone(), order);
                fired.extend(self.fills[before..].iter().cloned());
            }
        }
        fired
    }

    /// Idempotent: cancelling a nonexistent or already-terminal order returns
    /// `OrderNotFound` without mutating any state.
    pub fn cancel(&mut self, order_id: &str) -> Result<(), PaperBookError> {
        match self.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Open => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            _ => Err(PaperBookError::OrderNotFound(order_id.to_string())),
        }
    }

    fn increases_exposure(&self, req: &SubmitOrder) -> bool {
        let incoming_side = PositionSide::from_order_side(req.side);
        match self.positions.get(&req.symbol) {
            None => true,
            Some(pos) if pos.side == incoming_side => true,
            Some(pos) => req.size_micros > pos.size_micros,
        }
    }

    fn crosses(&self, order: &Order, mark: Micros) -> bool {
        match order.kind {
            OrderKind::Market => true,
            OrderKind::Limit => {
                let limit = order.limit_price.expect("limit order always carries a price");
                match order.side {
                    OrderSide::Buy => mark <= limit,
                    OrderSide::Sell => mark >= limit,
                }
            }
        }
    }

    /// Fills `order` entirely at `price`, updating cash/realized-PnL/position
    /// and appending a fill row atomically (single in-process call, no
    /// intermediate state is observable to callers).
    fn fill_order(&mut self, order: &mut Order, price: Micros) {
        let remaining = order.size_micros - order.filled_micros;
        let fee = notional(price, remaining)
            .map(|n| Micros::new(n.raw() * self.fee_bps / 10_000))
            .unwrap_or(Micros::ZERO);

        let incoming_side = PositionSide::from_order_side(order.side);
        let realized = self.apply_to_position(&order.symbol, incoming_side, remaining, price);

        self.cash = self.cash.saturating_sub(fee).saturating_add(realized);
        self.realized_pnl = self.realized_pnl.saturating_add(realized);

        order.filled_micros = order.size_micros;
        order.status = OrderStatus::Filled;

        self.next_fill_seq += 1;
        self.fills.push(Fill {
            fill_id: format!("paper:fill:{}:{}", order.order_id, self.next_fill_seq),
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            size_micros: remaining,
            fee,
            realized_pnl: realized,
        });
    }

    /// Updates the book's position for `symbol`, realizing PnL on the
    /// portion of `incoming_size` that offsets an existing opposite-side
    /// position (`min(existing, incoming)` at `price` minus fee already
    /// deducted by the caller). Returns the realized PnL in `Micros`.
    fn apply_to_position(
        &mut self,
        symbol: &str,
        incoming_side: PositionSide,
        incoming_size: i64,
        price: Micros,
    ) -> Micros {
        let Some(existing) = self.positions.get(symbol).cloned() else {
            self.positions.insert(
                symbol.to_string(),
                Position { symbol: symbol.to_string(), side: incoming_side, size_micros: incoming_size, avg_entry_price: price },
            );
            return Micros::ZERO;
        };

        if existing.side == incoming_side {
            let total = existing.size_micros + incoming_size;
            let blended = blended_entry(existing.avg_entry_price, existing.size_micros, price, incoming_size);
            self.positions.insert(
                symbol.to_string(),
                Position { symbol: symbol.to_string(), side: existing.side, size_micros: total, avg_entry_price: blended },
            );
            return Micros::ZERO;
        }

        // opposite side: realize PnL on the overlapping size
        let closing = existing.size_micros.min(incoming_size);
        let pnl_per_unit_sign = match existing.side {
            PositionSide::Long => price.raw() - existing.avg_entry_price.raw(),
            PositionSide::Short => existing.avg_entry_price.raw() - price.raw(),
        };
        let realized = notional(Micros::new(pnl_per_unit_sign), closing).unwrap_or(Micros::ZERO);

        let remaining_existing = existing.size_micros - closing;
        let remaining_incoming = incoming_size - closing;

        if remaining_existing > 0 {
            self.positions.insert(
                symbol.to_string(),
                Position { symbol: symbol.to_string(), side: existing.side, size_micros: remaining_existing, avg_entry_price: existing.avg_entry_price },
            );
        } else if remaining_incoming > 0 {
            self.positions.insert(
                symbol.to_string(),
                Position { symbol: symbol.to_string(), side: existing.side.opposite(), size_micros: remaining_incoming, avg_entry_price: price },
            );
        } else {
            self.positions.remove(symbol);
        }

        realized
    }
}

fn blended_entry(price_a: Micros, size_a: i64, price_b: Micros, size_b: i64) -> Micros {
    let total = size_a + size_b;
    if total == 0 {
        return price_a;
    }
    let weighted = (price_a.raw() as i128) * (size_a as i128) + (price_b.raw() as i128) * (size_b as i128);
    Micros::new((weighted / total as i128) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(dollars: i64) -> Micros {
        Micros::new(dollars * SCALE)
    }

    fn sz(units: i64) -> i64 {
        units * SCALE
    }

    #[test]
    fn market_order_always_fills_at_mark() {
        let mut book = PaperPerpBook::new(px(10_000), 5);
        let order = book
            .submit(
                SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Market, size_micros: sz(1), limit_price: None, reduce_only: false },
                px(100),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        let pos = book.position("BTC").unwrap();
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.size_micros, sz(1));
        assert_eq!(pos.avg_entry_price, px(100));
    }

    #[test]
    fn limit_order_rests_until_mark_crosses() {
        let mut book = PaperPerpBook::new(px(10_000), 5);
        let order = book
            .submit(
                SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Limit, size_micros: sz(1), limit_price: Some(px(90)), reduce_only: false },
                px(100),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert!(book.position("BTC").is_none());

        let fills = book.try_match_resting("BTC", px(89));
        assert_eq!(fills.len(), 1);
        assert_eq!(book.order("o1").unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn opposite_side_fill_realizes_pnl_on_overlap() {
        let mut book = PaperPerpBook::new(px(10_000), 0);
        book.submit(
            SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Market, size_micros: sz(2), limit_price: None, reduce_only: false },
            px(100),
        )
        .unwrap();

        book.submit(
            SubmitOrder { client_order_id: "o2".into(), symbol: "BTC".into(), side: OrderSide::Sell, kind: OrderKind::Market, size_micros: sz(1), limit_price: None, reduce_only: true },
            px(110),
        )
        .unwrap();

        // closed 1 unit at $10 profit
        assert_eq!(book.realized_pnl(), px(10));
        let pos = book.position("BTC").unwrap();
        assert_eq!(pos.size_micros, sz(1));
        assert_eq!(pos.side, PositionSide::Long);
    }

    #[test]
    fn reduce_only_refuses_to_open_new_position() {
        let mut book = PaperPerpBook::new(px(10_000), 5);
        let err = book
            .submit(
                SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Market, size_micros: sz(1), limit_price: None, reduce_only: true },
                px(100),
            )
            .unwrap_err();
        assert!(matches!(err, PaperBookError::ReduceOnlyViolation));
    }

    #[test]
    fn reduce_only_refuses_to_flip_beyond_existing_size() {
        let mut book = PaperPerpBook::new(px(10_000), 0);
        book.submit(
            SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Market, size_micros: sz(1), limit_price: None, reduce_only: false },
            px(100),
        )
        .unwrap();
        let err = book
            .submit(
                SubmitOrder { client_order_id: "o2".into(), symbol: "BTC".into(), side: OrderSide::Sell, kind: OrderKind::Market, size_micros: sz(2), limit_price: None, reduce_only: true },
                px(100),
            )
            .unwrap_err();
        assert!(matches!(err, PaperBookError::ReduceOnlyViolation));
    }

    #[test]
    fn cancel_is_idempotent_for_nonexistent_order() {
        let mut book = PaperPerpBook::new(px(10_000), 5);
        let err = book.cancel("does-not-exist").unwrap_err();
        assert!(matches!(err, PaperBookError::OrderNotFound(_)));
        // repeated call yields the same error and mutates nothing further
        let err2 = book.cancel("does-not-exist").unwrap_err();
        assert!(matches!(err2, PaperBookError::OrderNotFound(_)));
    }

    #[test]
    fn cancel_open_limit_order_succeeds_once() {
        let mut book = PaperPerpBook::new(px(10_000), 5);
        book.submit(
            SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Limit, size_micros: sz(1), limit_price: Some(px(50)), reduce_only: false },
            px(100),
        )
        .unwrap();
        assert!(book.cancel("o1").is_ok());
        assert_eq!(book.order("o1").unwrap().status, OrderStatus::Canceled);
        assert!(book.cancel("o1").is_err());
    }

    #[test]
    fn fee_is_deducted_from_cash() {
        let mut book = PaperPerpBook::new(px(1_000), 50); // 50 bps
        book.submit(
            SubmitOrder { client_order_id: "o1".into(), symbol: "BTC".into(), side: OrderSide::Buy, kind: OrderKind::Market, size_micros: sz(1), limit_price: None, reduce_only: false },
            px(100),
        )
        .unwrap();
        // 50bps of $100 notional = $0.50 fee
        assert_eq!(book.cash(), Micros::new(1_000 * SCALE - 500_000));
    }
}
