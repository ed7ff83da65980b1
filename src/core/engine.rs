//! The derived-column engine
//!
//! An [`Engine`] owns a validated schema, its acyclic column graph and the
//! compiled formulas. Every mutation goes through validation first and
//! leaves the engine untouched when it fails; evaluation only ever reads.

use crate::config::EngineConfig;
use crate::core::batch::{self, BatchInput, BatchReport, CancellationToken};
use crate::core::dependencies::{
    column_edges, ColumnDependencies, CycleCheck, DependencyEdge, DependencyKind,
};
use crate::core::expression::{self, EvalContext, Evaluation, Expression};
use crate::core::relations::CellResolver;
use crate::core::store::RowStore;
use crate::core::value::Value;
use crate::error::{EngineError, EngineResult, EvalError};
use crate::types::{Column, ColumnKind, ColumnType, Schema, Table};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A column and, recursively, the columns it reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyNode {
    pub column_id: String,
    pub table_id: String,
    pub column_type: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DependencyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyNode>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    schema: Schema,
    config: EngineConfig,
    dependencies: ColumnDependencies,
    formulas: HashMap<String, Expression>,
    order: Vec<String>,
}

impl Engine {
    /// Validate `schema` and prepare it for evaluation.
    pub fn new(schema: Schema, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let dependencies = ColumnDependencies::build(&schema)?;
        let order = dependencies.evaluation_order()?;
        let formulas = compile_formulas(&schema)?;
        info!(
            tables = schema.tables.len(),
            formulas = formulas.len(),
            "Engine ready"
        );
        Ok(Self {
            schema,
            config,
            dependencies,
            formulas,
            order,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dependencies(&self) -> &ColumnDependencies {
        &self.dependencies
    }

    /// Every column id, dependencies first.
    pub fn evaluation_order(&self) -> &[String] {
        &self.order
    }

    fn table(&self, table_id: &str) -> EngineResult<&Table> {
        self.schema
            .table(table_id)
            .ok_or_else(|| EngineError::Validation(format!("Unknown table '{}'", table_id)))
    }

    fn column(&self, column_id: &str) -> EngineResult<(&Table, &Column)> {
        self.schema
            .column(column_id)
            .ok_or_else(|| EngineError::Validation(format!("Unknown column '{}'", column_id)))
    }

    /// Add a new column to `table_id`.
    ///
    /// Rejected with `CyclicDependency` when it would close a cycle, and
    /// with `Validation`/`InvalidConfig` for bad configuration.
    pub fn add_column(&mut self, table_id: &str, column: Column) -> EngineResult<()> {
        if self.schema.column(&column.id).is_some() {
            return Err(EngineError::InvalidConfig(format!(
                "Duplicate column id '{}'",
                column.id
            )));
        }
        let mut schema = self.schema.clone();
        schema
            .table_mut(table_id)
            .ok_or_else(|| EngineError::Validation(format!("Unknown table '{}'", table_id)))?
            .columns
            .push(column.clone());
        self.apply(schema, table_id, column)
    }

    /// Replace the configuration of an existing column.
    pub fn update_column(&mut self, column: Column) -> EngineResult<()> {
        let table_id = self.column(&column.id)?.0.id.clone();
        let mut schema = self.schema.clone();
        if let Some(slot) = schema
            .table_mut(&table_id)
            .and_then(|t| t.columns.iter_mut().find(|c| c.id == column.id))
        {
            *slot = column.clone();
        }
        self.apply(schema, &table_id, column)
    }

    fn apply(&mut self, schema: Schema, table_id: &str, column: Column) -> EngineResult<()> {
        schema.check_unique_ids()?;
        let table = schema
            .table(table_id)
            .ok_or_else(|| EngineError::Validation(format!("Unknown table '{}'", table_id)))?;

        let mut dependencies = self.dependencies.clone();
        dependencies.set_column(&schema, table, &column)?;
        // Columns left dangling by an earlier removal regain their edges.
        for (other_table, other) in schema.columns() {
            if other.id == column.id {
                continue;
            }
            let reconnects = column_edges(&schema, other_table, other)
                .is_ok_and(|edges| edges.iter().any(|e| e.to_column_id == column.id));
            if reconnects {
                dependencies.set_column(&schema, other_table, other)?;
            }
        }
        // Downstream columns must still hold against the edited schema.
        for id in dependencies.affected_by(&column.id) {
            let Some((dep_table, dep)) = schema.column(&id) else {
                continue;
            };
            match column_edges(&schema, dep_table, dep) {
                Ok(_) => dependencies.set_column(&schema, dep_table, dep)?,
                Err(e) if self.was_valid(&id) => return Err(e),
                Err(_) => {}
            }
        }
        let order = dependencies.evaluation_order()?;

        if let ColumnKind::Formula(cfg) = &column.kind {
            let compiled = Expression::compile(&cfg.expression)?;
            self.formulas.insert(column.id.clone(), compiled);
        } else {
            self.formulas.remove(&column.id);
        }
        debug!(table = table_id, column = %column.id, "Column saved");

        self.schema = schema;
        self.dependencies = dependencies;
        self.order = order;
        Ok(())
    }

    /// Whether a column's configuration held before the pending edit.
    fn was_valid(&self, column_id: &str) -> bool {
        self.schema
            .column(column_id)
            .is_some_and(|(table, column)| column_edges(&self.schema, table, column).is_ok())
    }

    /// Remove a column and its edges. Returns the columns left referencing
    /// it; their cells evaluate to an unknown-column error until fixed.
    pub fn remove_column(&mut self, column_id: &str) -> EngineResult<Vec<String>> {
        let table_id = self.column(column_id)?.0.id.clone();
        if let Some(table) = self.schema.table_mut(&table_id) {
            table.columns.retain(|c| c.id != column_id);
        }
        self.formulas.remove(column_id);
        let broken = self.dependencies.remove_column(column_id);
        self.order.retain(|id| id != column_id);
        if !broken.is_empty() {
            warn!(column = column_id, dependents = ?broken, "Removed column still referenced");
        }
        Ok(broken)
    }

    pub fn would_create_cycle(&self, edge: &DependencyEdge) -> CycleCheck {
        self.dependencies.would_create_cycle(edge)
    }

    /// Evaluate a free-standing expression with the configured timeout.
    pub fn evaluate(
        &self,
        source: &str,
        row: &HashMap<String, Value>,
        target: Option<ColumnType>,
    ) -> Result<Evaluation, EvalError> {
        expression::evaluate(source, row, target, self.config.timeout_ms)
    }

    /// Value of one cell. Per-cell failures come back as an error-tagged
    /// value; only unknown tables, rows or columns are `Err`.
    pub fn compute_cell(
        &self,
        store: &dyn RowStore,
        table_id: &str,
        row_id: &str,
        column_id: &str,
    ) -> EngineResult<Value> {
        let table = self.table(table_id)?;
        let column = table.column(column_id).ok_or_else(|| {
            EngineError::Validation(format!(
                "Unknown column '{}' in table '{}'",
                column_id, table_id
            ))
        })?;
        let row = store.row(table_id, row_id).ok_or_else(|| {
            EngineError::Validation(format!("Unknown row '{}' in table '{}'", row_id, table_id))
        })?;

        let ctx = EvalContext::new(Utc::now()).with_timeout(self.config.timeout_ms);
        let resolver = CellResolver::new(
            &self.schema,
            store,
            &self.formulas,
            &ctx,
            self.config.max_relation_depth,
        );
        Ok(resolver.value(table, row, column))
    }

    fn batch_input<'a>(&'a self, store: &'a dyn RowStore) -> BatchInput<'a> {
        BatchInput {
            schema: &self.schema,
            store,
            formulas: &self.formulas,
            config: &self.config,
            now: Utc::now(),
        }
    }

    /// Recompute one column across every row of its table.
    pub fn recompute_column(
        &self,
        store: &dyn RowStore,
        column_id: &str,
        token: &CancellationToken,
    ) -> EngineResult<BatchReport> {
        let (table, column) = self.column(column_id)?;
        Ok(batch::recompute_column(
            &self.batch_input(store),
            table,
            column,
            token,
        ))
    }

    /// Recompute every derived column of a table, dependencies first.
    ///
    /// After cancellation the remaining columns still get a report, with
    /// all their rows unevaluated.
    pub fn recompute_table(
        &self,
        store: &dyn RowStore,
        table_id: &str,
        token: &CancellationToken,
    ) -> EngineResult<Vec<BatchReport>> {
        let table = self.table(table_id)?;
        let input = self.batch_input(store);
        let reports = self
            .order
            .iter()
            .filter_map(|id| table.column(id))
            .filter(|column| column.is_derived())
            .map(|column| batch::recompute_column(&input, table, column, token))
            .collect();
        Ok(reports)
    }

    /// The dependency tree under `column_id`.
    pub fn dependency_tree(&self, column_id: &str) -> EngineResult<DependencyNode> {
        let (table, column) = self.column(column_id)?;
        Ok(self.node(table, column, None))
    }

    fn node(&self, table: &Table, column: &Column, kind: Option<DependencyKind>) -> DependencyNode {
        let kinds: HashMap<String, DependencyKind> = self
            .dependencies
            .edges()
            .into_iter()
            .filter(|edge| edge.from_column_id == column.id)
            .map(|edge| (edge.to_column_id, edge.kind))
            .collect();

        let mut children: Vec<DependencyNode> = self
            .dependencies
            .dependencies(&column.id)
            .iter()
            .filter_map(|id| self.schema.column(id))
            .map(|(t, c)| self.node(t, c, kinds.get(&c.id).copied()))
            .collect();
        children.sort_by(|a, b| a.column_id.cmp(&b.column_id));

        DependencyNode {
            column_id: column.id.clone(),
            table_id: table.id.clone(),
            column_type: column.column_type(),
            kind,
            expression: match &column.kind {
                ColumnKind::Formula(cfg) => Some(cfg.expression.clone()),
                _ => None,
            },
            dependencies: children,
        }
    }
}

fn compile_formulas(schema: &Schema) -> EngineResult<HashMap<String, Expression>> {
    let mut formulas = HashMap::new();
    for (_, column) in schema.columns() {
        if let ColumnKind::Formula(cfg) = &column.kind {
            formulas.insert(column.id.clone(), Expression::compile(&cfg.expression)?);
        }
    }
    Ok(formulas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use crate::types::{Aggregation, RelationLink, RelationType, Row};
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        Schema::new(vec![
            Table::new("orders", "Orders")
                .with_column(Column::simple("qty", ColumnKind::Number))
                .with_column(Column::simple("price", ColumnKind::Number))
                .with_column(Column::formula("total", "{qty} * {price}"))
                .with_column(Column::relation("customer", "customers", RelationType::ManyToOne))
                .with_column(Column::lookup("customer_name", "customer", "name")),
            Table::new("customers", "Customers")
                .with_column(Column::simple("name", ColumnKind::Text))
                .with_column(Column::relation("orders_rel", "orders", RelationType::OneToMany))
                .with_column(Column::rollup("revenue", "orders_rel", "total", Aggregation::Sum)),
        ])
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert_rows(
            "orders",
            vec![
                Row::new("o1").with_value("qty", 2.0).with_value("price", 10.0),
                Row::new("o2").with_value("qty", 3.0).with_value("price", 1.5),
            ],
        );
        store.insert_rows("customers", vec![Row::new("c1").with_value("name", "Ada")]);
        for order in ["o1", "o2"] {
            store.add_link(RelationLink::new(order, "c1", "customer"));
            store.add_link(RelationLink::new("c1", order, "orders_rel"));
        }
        store
    }

    fn engine() -> Engine {
        Engine::new(schema(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_new_rejects_cycles() {
        let mut schema = schema();
        schema.tables[0].columns.push(Column::formula("a", "{b} + 1"));
        schema.tables[0].columns.push(Column::formula("b", "{a} + 1"));
        let err = Engine::new(schema, EngineConfig::default()).unwrap_err();
        assert!(err.cycle_path().is_some());
    }

    #[test]
    fn test_compute_cell_follows_relations() {
        let engine = engine();
        let store = store();
        assert_eq!(
            engine.compute_cell(&store, "customers", "c1", "revenue").unwrap(),
            Value::Number(24.5)
        );
        assert_eq!(
            engine.compute_cell(&store, "orders", "o2", "customer_name").unwrap(),
            Value::text("Ada")
        );
        assert!(engine.compute_cell(&store, "orders", "o9", "total").is_err());
    }

    #[test]
    fn test_add_column_cycle_leaves_engine_unchanged() {
        let mut engine = engine();
        engine
            .add_column("orders", Column::lookup("customer_revenue", "customer", "revenue"))
            .unwrap();
        let before = engine.schema().clone();

        let err = engine
            .update_column(Column::formula("total", "{qty} * {customer_revenue}"))
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
        assert_eq!(engine.schema(), &before);
    }

    #[test]
    fn test_add_column_self_reference_rejected() {
        let mut engine = engine();
        let err = engine
            .add_column("orders", Column::formula("loop", "{loop} * 2"))
            .unwrap_err();
        assert_eq!(err.cycle_path(), Some(&["loop".to_string()][..]));
        assert!(engine.schema().column("loop").is_none());
    }

    #[test]
    fn test_add_then_compute() {
        let mut engine = engine();
        engine
            .add_column("orders", Column::formula("with_tax", "round({total} * 1.2, 2)"))
            .unwrap();
        let store = store();
        assert_eq!(
            engine.compute_cell(&store, "orders", "o2", "with_tax").unwrap(),
            Value::Number(5.4)
        );
        assert!(engine.add_column("orders", Column::formula("with_tax", "1")).is_err());
    }

    #[test]
    fn test_update_column_rechecks_rollup_over_it() {
        let mut engine = engine();
        engine
            .add_column("customers", Column::rollup("qty_sum", "orders_rel", "qty", Aggregation::Sum))
            .unwrap();
        let before = engine.schema().clone();

        let err = engine
            .update_column(Column::simple("qty", ColumnKind::Text))
            .unwrap_err();
        assert!(err.to_string().contains("qty_sum"), "{}", err);
        assert_eq!(engine.schema(), &before);
        assert_eq!(
            engine.compute_cell(&store(), "customers", "c1", "qty_sum").unwrap(),
            Value::Number(5.0)
        );
    }

    #[test]
    fn test_update_relation_target_rechecks_rollups() {
        let mut schema = schema();
        schema.tables.push(Table::new("other", "Other").with_column(Column::simple("x", ColumnKind::Number)));
        let mut engine = Engine::new(schema, EngineConfig::default()).unwrap();
        engine
            .add_column("customers", Column::rollup("qty_sum", "orders_rel", "qty", Aggregation::Sum))
            .unwrap();

        let err = engine
            .update_column(Column::relation("orders_rel", "other", RelationType::OneToMany))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(
            engine.compute_cell(&store(), "customers", "c1", "qty_sum").unwrap(),
            Value::Number(5.0)
        );
    }

    #[test]
    fn test_remove_column_breaks_dependents() {
        let mut engine = engine();
        let broken = engine.remove_column("qty").unwrap();
        assert_eq!(broken, vec!["total".to_string()]);
        let value = engine.compute_cell(&store(), "orders", "o1", "total").unwrap();
        assert_eq!(
            value,
            Value::Error(EvalError::UnknownColumn {
                name: "qty".to_string()
            })
        );
    }

    #[test]
    fn test_recompute_table_orders_columns() {
        let engine = engine();
        let reports = engine
            .recompute_table(&store(), "orders", &CancellationToken::new())
            .unwrap();
        let ids: Vec<&str> = reports.iter().map(|r| r.column_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"total"));
        assert!(ids.contains(&"customer_name"));
        assert_eq!(reports[0].cells.len(), 2);
    }

    #[test]
    fn test_recompute_table_after_cancel() {
        let engine = engine();
        let token = CancellationToken::new();
        token.cancel();
        let reports = engine.recompute_table(&store(), "orders", &token).unwrap();
        assert!(reports.iter().all(|r| r.cancelled && r.unevaluated.len() == 2));
    }

    #[test]
    fn test_dependency_tree() {
        let engine = engine();
        let tree = engine.dependency_tree("revenue").unwrap();
        let children: Vec<&str> = tree.dependencies.iter().map(|d| d.column_id.as_str()).collect();
        assert_eq!(children, vec!["orders_rel", "total"]);
        let total = &tree.dependencies[1];
        assert_eq!(total.kind, Some(DependencyKind::Rollup));
        assert_eq!(total.expression.as_deref(), Some("{qty} * {price}"));
        assert_eq!(total.dependencies.len(), 2);
    }

    #[test]
    fn test_evaluate_uses_config_timeout() {
        let engine = engine();
        let row = HashMap::from([("a".to_string(), Value::Number(5.0))]);
        let evaluation = engine.evaluate("{a} * 2", &row, None).unwrap();
        assert_eq!(evaluation.result, Value::Number(10.0));
    }
}
