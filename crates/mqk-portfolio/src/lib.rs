//! mqk-portfolio
//!
//! Fixed-point money type shared by the paper matching book and the
//! execution adapters. Pure deterministic arithmetic — no IO, no time.

pub mod fixedpoint;

pub use fixedpoint::Micros;
