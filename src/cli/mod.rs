//! CLI command handlers

pub mod commands;

pub use commands::{audit, check, compute, evaluate, functions};
