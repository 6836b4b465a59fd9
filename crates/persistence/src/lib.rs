//! Order service client
//!
//! The relational store of restaurants, tables, menus and orders lives in a
//! separate service. This crate is the thin typed client the gateway consumes:
//! menu lookup at session open, order placement and check requests when a
//! turn completes. The service owns idempotency; calls here are transactional
//! per request.

pub mod client;
pub mod error;

pub use client::{OrderItem, OrderReceipt, OrderServiceClient, OrderServiceConfig};
pub use error::OrderError;
