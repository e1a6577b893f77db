//! Deterministic paper matching engine for perpetual-style positions.
//!
//! See `paperbook` for the matching/fill/PnL model.

pub mod paperbook;

pub use paperbook::{
    Fill, Order, OrderKind, OrderSide, OrderStatus, PaperBookError, PaperPerpBook, Position, PositionSide,
    SubmitOrder,
};
