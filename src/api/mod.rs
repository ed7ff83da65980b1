//! dbcalc API Server module
//!
//! HTTP REST API over the engine.
//! Run with `dbcalc-server`.

pub mod handlers;
pub mod server;

pub use server::{router, run_api_server};
