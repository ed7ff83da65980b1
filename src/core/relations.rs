//! Cell resolution across relations
//!
//! [`CellResolver`] computes the value of any column for a given row:
//! stored columns are read from the row, formulas are evaluated, and
//! lookups/rollups follow relation links into other tables, computing
//! derived target columns recursively. The column graph is acyclic, so
//! recursion always terminates; the depth bound only limits fan-out.

use crate::core::coercion::coerce;
use crate::core::dependencies::referenced_column;
use crate::core::expression::{EvalContext, Expression};
use crate::core::store::RowStore;
use crate::core::value::{format_number, Value};
use crate::error::EvalError;
use crate::types::{Aggregation, Column, ColumnKind, RelationConfig, Row, Schema, Table};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Computes cell values for one unit of work (a row, or a batch slice).
///
/// Values are memoized per `(column, row)` unless the depth bound cut them
/// short; a resolver is cheap to create and is not shared between threads.
pub struct CellResolver<'a> {
    schema: &'a Schema,
    store: &'a dyn RowStore,
    formulas: &'a HashMap<String, Expression>,
    ctx: &'a EvalContext,
    max_depth: usize,
    cache: RefCell<HashMap<(String, String), Value>>,
    depth_limited: Cell<bool>,
}

impl<'a> CellResolver<'a> {
    pub fn new(
        schema: &'a Schema,
        store: &'a dyn RowStore,
        formulas: &'a HashMap<String, Expression>,
        ctx: &'a EvalContext,
        max_depth: usize,
    ) -> Self {
        Self {
            schema,
            store,
            formulas,
            ctx,
            max_depth,
            cache: RefCell::new(HashMap::new()),
            depth_limited: Cell::new(false),
        }
    }

    /// Value of `column` for `row` of `table`.
    pub fn value(&self, table: &Table, row: &Row, column: &Column) -> Value {
        self.value_at(table, row, column, 0)
    }

    fn value_at(&self, table: &Table, row: &Row, column: &Column, depth: usize) -> Value {
        if !column.is_derived() && !matches!(column.kind, ColumnKind::Relation(_)) {
            return row.value(&column.id).clone();
        }

        let key = (column.id.clone(), row.id.clone());
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }

        let outer_limited = self.depth_limited.replace(false);
        let value = if depth > self.max_depth {
            debug!(column = %column.id, row = %row.id, depth, "Relation depth exceeded");
            self.depth_limited.set(true);
            Value::Error(EvalError::EvaluationTimeout {
                timeout_ms: self.ctx.timeout_ms(),
            })
        } else if let Err(e) = self.ctx.check_deadline() {
            Value::Error(e)
        } else {
            match &column.kind {
                ColumnKind::Formula(cfg) => {
                    let raw = self.formula(table, row, column, depth);
                    match cfg.return_type {
                        Some(target) => coerce(raw, target).unwrap_or_else(Value::Error),
                        None => raw,
                    }
                }
                ColumnKind::Lookup(cfg) => {
                    self.lookup(table, row, &cfg.relation_column_id, &cfg.target_column_id, depth)
                }
                ColumnKind::Rollup(cfg) => match self.linked_values(
                    table,
                    row,
                    &cfg.relation_column_id,
                    &cfg.target_column_id,
                    depth,
                ) {
                    Ok((values, linked)) => aggregate(cfg.aggregation, &values, linked),
                    Err(e) => Value::Error(e),
                },
                ColumnKind::Relation(cfg) => self.relation(row, column, cfg, depth),
                _ => row.value(&column.id).clone(),
            }
        };

        // A shallower path to the same cell may still succeed.
        let limited = self.depth_limited.get();
        if !limited {
            self.cache.borrow_mut().insert(key, value.clone());
        }
        self.depth_limited.set(outer_limited || limited);
        value
    }

    fn formula(&self, table: &Table, row: &Row, column: &Column, depth: usize) -> Value {
        let compiled;
        let expression = match self.formulas.get(&column.id) {
            Some(expression) => expression,
            None => {
                let ColumnKind::Formula(cfg) = &column.kind else {
                    return Value::Null;
                };
                compiled = match Expression::compile(&cfg.expression) {
                    Ok(expression) => expression,
                    Err(e) => return Value::Error(e),
                };
                &compiled
            }
        };

        expression.evaluate_with(
            |name| {
                referenced_column(table, name)
                    .map(|referenced| self.value_at(table, row, referenced, depth + 1))
            },
            self.ctx,
        )
    }

    /// Values of `target_column_id` across every row linked through
    /// `relation_column_id`, plus the number of linked rows found.
    fn linked_values(
        &self,
        table: &Table,
        row: &Row,
        relation_column_id: &str,
        target_column_id: &str,
        depth: usize,
    ) -> Result<(Vec<Value>, usize), EvalError> {
        let (_, target_table, target_column) =
            self.relation_target(table, relation_column_id, target_column_id)?;

        let mut values = Vec::new();
        for target_id in self.store.linked_row_ids(&row.id, relation_column_id) {
            match self.store.row(&target_table.id, target_id) {
                Some(target_row) => {
                    values.push(self.value_at(target_table, target_row, target_column, depth + 1))
                }
                None => debug!(
                    relation = relation_column_id,
                    row = %target_id,
                    "Skipping link to missing row"
                ),
            }
        }
        let linked = values.len();
        Ok((values, linked))
    }

    fn relation_target(
        &self,
        table: &Table,
        relation_column_id: &str,
        target_column_id: &str,
    ) -> Result<(&'a RelationConfig, &'a Table, &'a Column), EvalError> {
        let relation = self
            .schema
            .table(&table.id)
            .and_then(|t| t.column(relation_column_id))
            .and_then(|c| match &c.kind {
                ColumnKind::Relation(cfg) => Some(cfg),
                _ => None,
            })
            .ok_or_else(|| EvalError::UnknownColumn {
                name: relation_column_id.to_string(),
            })?;
        let target_table = self
            .schema
            .table(&relation.target_table_id)
            .ok_or_else(|| EvalError::UnknownColumn {
                name: target_column_id.to_string(),
            })?;
        let target_column = target_table
            .column(target_column_id)
            .ok_or_else(|| EvalError::UnknownColumn {
                name: target_column_id.to_string(),
            })?;
        Ok((relation, target_table, target_column))
    }

    fn lookup(
        &self,
        table: &Table,
        row: &Row,
        relation_column_id: &str,
        target_column_id: &str,
        depth: usize,
    ) -> Value {
        let single = match self.relation_target(table, relation_column_id, target_column_id) {
            Ok((relation, _, _)) => relation.relation_type.is_single_target(),
            Err(e) => return Value::Error(e),
        };
        match self.linked_values(table, row, relation_column_id, target_column_id, depth) {
            Ok((values, _)) => collapse(values, single),
            Err(e) => Value::Error(e),
        }
    }

    /// A relation column reads as its display field, or as the linked row ids.
    fn relation(&self, row: &Row, column: &Column, config: &RelationConfig, depth: usize) -> Value {
        let single = config.relation_type.is_single_target();
        let target_ids = self.store.linked_row_ids(&row.id, &column.id);

        let display = config.display_field.as_deref().and_then(|field| {
            let target_table = self.schema.table(&config.target_table_id)?;
            referenced_column(target_table, field).map(|c| (target_table, c))
        });

        let values = match display {
            None => target_ids.iter().map(|id| Value::text(id.as_str())).collect(),
            Some((target_table, display_column)) => target_ids
                .iter()
                .filter_map(|id| self.store.row(&target_table.id, id))
                .map(|target_row| self.value_at(target_table, target_row, display_column, depth + 1))
                .collect(),
        };
        collapse(values, single)
    }
}

/// Single-target relations yield one value (or Null); others a list.
fn collapse(values: Vec<Value>, single: bool) -> Value {
    if single {
        values.into_iter().next().unwrap_or_default()
    } else {
        Value::List(values)
    }
}

fn flatten(values: &[Value], out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::List(items) => flatten(items, out),
            other => out.push(other.clone()),
        }
    }
}

/// Aggregate linked values for a rollup.
///
/// `linked_rows` is the number of linked rows, which is what `count`
/// reports regardless of their values.
pub fn aggregate(aggregation: Aggregation, values: &[Value], linked_rows: usize) -> Value {
    let mut items = Vec::with_capacity(values.len());
    flatten(values, &mut items);

    if aggregation.requires_numeric() {
        if let Some(err) = items.iter().find(|v| v.is_error()) {
            return err.clone();
        }
    }

    let numbers = || -> Vec<f64> { items.iter().filter_map(Value::as_number).collect() };

    match aggregation {
        Aggregation::Count => Value::Number(linked_rows as f64),
        Aggregation::Sum => Value::Number(numbers().iter().sum()),
        Aggregation::Avg => {
            let nums = numbers();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Number(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        Aggregation::Min => numbers()
            .into_iter()
            .reduce(f64::min)
            .map_or(Value::Null, Value::Number),
        Aggregation::Max => numbers()
            .into_iter()
            .reduce(f64::max)
            .map_or(Value::Null, Value::Number),
        Aggregation::Median => {
            let mut nums = numbers();
            if nums.is_empty() {
                return Value::Null;
            }
            nums.sort_by(f64::total_cmp);
            let mid = nums.len() / 2;
            let median = if nums.len() % 2 == 0 {
                (nums[mid - 1] + nums[mid]) / 2.0
            } else {
                nums[mid]
            };
            Value::Number(median)
        }
        Aggregation::Unique => {
            let distinct: HashSet<String> = items
                .iter()
                .filter(|v| !v.is_null())
                .map(Value::to_display_string)
                .collect();
            Value::Number(distinct.len() as f64)
        }
        Aggregation::Empty => {
            Value::Number(values.iter().filter(|v| v.is_empty()).count() as f64)
        }
        Aggregation::NotEmpty => {
            Value::Number(values.iter().filter(|v| !v.is_empty()).count() as f64)
        }
    }
}

/// Render a rollup result: `-` for Null, plain counts, two decimals for
/// numeric aggregations.
pub fn format_rollup_value(value: &Value, aggregation: Aggregation) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Number(n) if aggregation.is_counting() => format_number(*n),
        Value::Number(n) => format!("{:.2}", n),
        other => other.to_display_string(),
    }
}
