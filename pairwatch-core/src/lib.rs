//! Pairwatch Core: domain types, document store, market data, catalog and series.
//!
//! This crate holds the data side of the pair tracker:
//! - Domain types (pairs, users, price series records)
//! - The caller-facing error taxonomy with stable error codes
//! - Document store backends and the transactional unit of work
//! - Market-data provider client with retry and circuit breaker
//! - Reference catalog (supported quote-currencies, asset list)
//! - Pair series store (windowed reads, wholesale refresh)

pub mod data;
pub mod domain;
pub mod error;
pub mod store;

pub use error::PairwatchError;
