//! Bulk recompute of one derived column
//!
//! Rows are independent: each gets its own [`CellResolver`] and its own
//! deadline, and the schema, store and compiled formulas are only read.
//! With the `parallel` feature rows fan out over rayon's pool. A
//! [`CancellationToken`] is checked before each row starts; rows already
//! computed are kept and the rest are reported as unevaluated.

use crate::config::EngineConfig;
use crate::core::expression::{EvalContext, Expression};
use crate::core::relations::CellResolver;
use crate::core::store::RowStore;
use crate::core::value::Value;
use crate::types::{Column, Row, Schema, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Cooperative cancellation shared between a recompute and its caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Outcome of recomputing one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub column_id: String,
    /// `(row_id, value)` in row order; error cells carry their marker.
    pub cells: Vec<(String, Value)>,
    /// Rows skipped because the batch was cancelled.
    pub unevaluated: Vec<String>,
    pub cancelled: bool,
    /// Number of cells holding an error marker.
    pub errors: usize,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn value(&self, row_id: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(id, _)| id == row_id)
            .map(|(_, value)| value)
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.unevaluated.is_empty()
    }
}

/// Everything a batch reads, borrowed for its duration.
pub struct BatchInput<'a> {
    pub schema: &'a Schema,
    pub store: &'a dyn RowStore,
    pub formulas: &'a HashMap<String, Expression>,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
}

impl BatchInput<'_> {
    fn compute(&self, table: &Table, row: &Row, column: &Column) -> Value {
        let ctx = EvalContext::new(self.now).with_timeout(self.config.timeout_ms);
        let resolver = CellResolver::new(
            self.schema,
            self.store,
            self.formulas,
            &ctx,
            self.config.max_relation_depth,
        );
        resolver.value(table, row, column)
    }

    fn compute_unless_cancelled(
        &self,
        table: &Table,
        row: &Row,
        column: &Column,
        token: &CancellationToken,
    ) -> Option<Value> {
        if token.is_cancelled() {
            return None;
        }
        Some(self.compute(table, row, column))
    }
}

/// Recompute `column` for every row of `table` in the store.
pub fn recompute_column(
    input: &BatchInput<'_>,
    table: &Table,
    column: &Column,
    token: &CancellationToken,
) -> BatchReport {
    let start = Instant::now();
    let rows = input.store.rows(&table.id);
    debug!(table = %table.id, column = %column.id, rows = rows.len(), "Recomputing column");

    let results = compute_rows(input, table, rows, column, token);

    let mut report = BatchReport {
        column_id: column.id.clone(),
        ..BatchReport::default()
    };
    for (row, result) in rows.iter().zip(results) {
        match result {
            Some(value) => {
                if value.is_error() {
                    report.errors += 1;
                }
                report.cells.push((row.id.clone(), value));
            }
            None => report.unevaluated.push(row.id.clone()),
        }
    }
    report.cancelled = !report.unevaluated.is_empty() || token.is_cancelled();
    report.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        column = %column.id,
        computed = report.cells.len(),
        unevaluated = report.unevaluated.len(),
        errors = report.errors,
        cancelled = report.cancelled,
        duration_ms = report.duration_ms,
        "Recompute finished"
    );
    report
}

#[cfg(feature = "parallel")]
fn compute_rows(
    input: &BatchInput<'_>,
    table: &Table,
    rows: &[Row],
    column: &Column,
    token: &CancellationToken,
) -> Vec<Option<Value>> {
    if input.config.parallel {
        rows.par_iter()
            .map(|row| input.compute_unless_cancelled(table, row, column, token))
            .collect()
    } else {
        compute_sequential(input, table, rows, column, token)
    }
}

#[cfg(not(feature = "parallel"))]
fn compute_rows(
    input: &BatchInput<'_>,
    table: &Table,
    rows: &[Row],
    column: &Column,
    token: &CancellationToken,
) -> Vec<Option<Value>> {
    compute_sequential(input, table, rows, column, token)
}

fn compute_sequential(
    input: &BatchInput<'_>,
    table: &Table,
    rows: &[Row],
    column: &Column,
    token: &CancellationToken,
) -> Vec<Option<Value>> {
    rows.iter()
        .map(|row| input.compute_unless_cancelled(table, row, column, token))
        .collect()
}
