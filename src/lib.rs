//! dbcalc - derived columns for user-defined tables
//!
//! Formula, lookup and rollup columns computed from a row's stored values
//! and from rows linked through relations, over an always-acyclic
//! dependency graph.
//!
//! # Features
//!
//! - `{column}` formulas with a closed function catalogue (math, text, date, logic)
//! - Tokenizer → parser → typed AST → tree-walking evaluator; no dynamic code execution
//! - Lookup and rollup across relations (sum, avg, min, max, count, median, ...)
//! - Cycle detection at configuration time, with the offending path
//! - Batch recompute with cancellation, per-cell timeouts and rayon fan-out
//!
//! # Example
//!
//! ```no_run
//! use dbcalc::core::{CancellationToken, Engine, MemoryStore};
//! use dbcalc::parser::parse_workbook;
//! use dbcalc::EngineConfig;
//! use std::path::Path;
//!
//! let workbook = parse_workbook(Path::new("shop.yaml"))?;
//! let engine = Engine::new(workbook.schema(), EngineConfig::default())?;
//! let store = MemoryStore::from_workbook(&workbook);
//!
//! for report in engine.recompute_table(&store, "orders", &CancellationToken::new())? {
//!     println!("{}: {} cells", report.column_id, report.cells.len());
//! }
//! # Ok::<(), dbcalc::error::EngineError>(())
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::{evaluate, Engine, Value};
pub use error::{EngineError, EngineResult, EvalError};
pub use types::{Column, ColumnKind, ColumnType, Row, Schema, Table, Workbook};
