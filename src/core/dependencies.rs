//! Column dependency graph
//!
//! Derives [`DependencyEdge`]s from formula, lookup, rollup and relation
//! configuration, checks the relation invariants, and keeps the graph over
//! all columns of all tables acyclic.

use crate::core::expression::Expression;
use crate::core::graph::{CycleError, DependencyGraph};
use crate::core::value::Value;
use crate::error::{EngineError, EngineResult};
use crate::types::{Column, ColumnKind, ColumnType, Schema, Table};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

/// Chains of lookups and formulas deeper than this are not considered numeric.
const MAX_NUMERIC_PROBE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    FormulaReference,
    Lookup,
    Rollup,
}

/// `from_column_id` depends on `to_column_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_column_id: String,
    pub to_column_id: String,
    pub kind: DependencyKind,
}

impl DependencyEdge {
    pub fn new(from: &str, to: &str, kind: DependencyKind) -> Self {
        Self {
            from_column_id: from.to_string(),
            to_column_id: to.to_string(),
            kind,
        }
    }
}

/// Answer to "would this edge create a cycle?".
///
/// Serializes as `false` or `{"cycle_path": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleCheck {
    Acyclic,
    Cycle { cycle_path: Vec<String> },
}

impl CycleCheck {
    pub fn is_cycle(&self) -> bool {
        matches!(self, CycleCheck::Cycle { .. })
    }
}

impl Serialize for CycleCheck {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CycleCheck::Acyclic => serializer.serialize_bool(false),
            CycleCheck::Cycle { cycle_path } => {
                let mut s = serializer.serialize_struct("CycleCheck", 1)?;
                s.serialize_field("cycle_path", cycle_path)?;
                s.end()
            }
        }
    }
}

impl From<CycleError<String>> for EngineError {
    fn from(err: CycleError<String>) -> Self {
        EngineError::CyclicDependency { path: err.path }
    }
}

/// Find a column of `table` by name, falling back to its id.
pub fn referenced_column<'a>(table: &'a Table, reference: &str) -> Option<&'a Column> {
    table
        .column_by_name(reference)
        .or_else(|| table.column(reference))
}

/// Edges a column contributes, after checking its configuration.
pub fn column_edges(schema: &Schema, table: &Table, column: &Column) -> EngineResult<Vec<DependencyEdge>> {
    match &column.kind {
        ColumnKind::Formula(cfg) => {
            let expression = Expression::compile(&cfg.expression).map_err(|e| {
                EngineError::Validation(format!("Formula column '{}': {}", column.id, e))
            })?;
            expression
                .references()
                .iter()
                .map(|name| {
                    referenced_column(table, name)
                        .map(|target| {
                            DependencyEdge::new(&column.id, &target.id, DependencyKind::FormulaReference)
                        })
                        .ok_or_else(|| {
                            EngineError::Validation(format!(
                                "Formula column '{}' references unknown column {{{}}} in table '{}'",
                                column.id, name, table.id
                            ))
                        })
                })
                .collect()
        }

        ColumnKind::Lookup(cfg) => {
            check_relation_target(schema, table, column, &cfg.relation_column_id, &cfg.target_column_id)?;
            Ok(vec![
                DependencyEdge::new(&column.id, &cfg.relation_column_id, DependencyKind::Lookup),
                DependencyEdge::new(&column.id, &cfg.target_column_id, DependencyKind::Lookup),
            ])
        }

        ColumnKind::Rollup(cfg) => {
            let target =
                check_relation_target(schema, table, column, &cfg.relation_column_id, &cfg.target_column_id)?;
            if cfg.aggregation.requires_numeric() && !is_numeric_column(schema, target, 0) {
                return Err(EngineError::Validation(format!(
                    "Rollup column '{}' uses {:?} over non-numeric column '{}' ({})",
                    column.id,
                    cfg.aggregation,
                    target.id,
                    target.column_type()
                )));
            }
            Ok(vec![
                DependencyEdge::new(&column.id, &cfg.relation_column_id, DependencyKind::Rollup),
                DependencyEdge::new(&column.id, &cfg.target_column_id, DependencyKind::Rollup),
            ])
        }

        ColumnKind::Relation(cfg) => {
            let target_table = schema.table(&cfg.target_table_id).ok_or_else(|| {
                EngineError::Validation(format!(
                    "Relation column '{}' targets unknown table '{}'",
                    column.id, cfg.target_table_id
                ))
            })?;
            match &cfg.display_field {
                None => Ok(Vec::new()),
                Some(field) => {
                    let display = referenced_column(target_table, field).ok_or_else(|| {
                        EngineError::Validation(format!(
                            "Relation column '{}' displays unknown field '{}' of table '{}'",
                            column.id, field, target_table.id
                        ))
                    })?;
                    Ok(vec![DependencyEdge::new(&column.id, &display.id, DependencyKind::Lookup)])
                }
            }
        }

        _ => Ok(Vec::new()),
    }
}

/// Check that `relation_column_id` is a relation on `table` and that
/// `target_column_id` lives on the relation's target table.
fn check_relation_target<'a>(
    schema: &'a Schema,
    table: &Table,
    column: &Column,
    relation_column_id: &str,
    target_column_id: &str,
) -> EngineResult<&'a Column> {
    let relation = match table.column(relation_column_id).map(|c| &c.kind) {
        Some(ColumnKind::Relation(cfg)) => cfg,
        Some(_) => {
            return Err(EngineError::Validation(format!(
                "Column '{}': '{}' is not a relation column",
                column.id, relation_column_id
            )))
        }
        None => {
            return Err(EngineError::Validation(format!(
                "Column '{}': relation column '{}' does not exist on table '{}'",
                column.id, relation_column_id, table.id
            )))
        }
    };
    schema
        .table(&relation.target_table_id)
        .and_then(|t| t.column(target_column_id))
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "Column '{}': target column '{}' does not exist on table '{}'",
                column.id, target_column_id, relation.target_table_id
            ))
        })
}

/// Whether a column always yields numbers (or Null).
///
/// A formula without a return type is numeric when its outermost operation
/// is, reading each referenced column as a number or text by its own kind.
pub fn is_numeric_column(schema: &Schema, column: &Column, depth: usize) -> bool {
    match &column.kind {
        ColumnKind::Number | ColumnKind::Rollup(_) => true,
        ColumnKind::Formula(cfg) => match cfg.return_type {
            Some(return_type) => return_type == ColumnType::Number,
            None if depth < MAX_NUMERIC_PROBE => {
                formula_yields_number(schema, column, &cfg.expression, depth)
            }
            None => false,
        },
        ColumnKind::Lookup(cfg) if depth < MAX_NUMERIC_PROBE => schema
            .column(&cfg.target_column_id)
            .is_some_and(|(_, target)| is_numeric_column(schema, target, depth + 1)),
        _ => false,
    }
}

fn formula_yields_number(schema: &Schema, column: &Column, expression: &str, depth: usize) -> bool {
    let Some((table, _)) = schema.column(&column.id) else {
        return false;
    };
    let Ok(compiled) = Expression::compile(expression) else {
        return false;
    };
    compiled
        .ast_with(|name| {
            let numeric = referenced_column(table, name).is_some_and(|referenced| {
                referenced.id != column.id && is_numeric_column(schema, referenced, depth + 1)
            });
            Some(if numeric {
                Value::Number(0.0)
            } else {
                Value::text("")
            })
        })
        .is_ok_and(|ast| ast.yields_number())
}

/// The acyclic dependency graph over every column of a schema
#[derive(Debug, Clone, Default)]
pub struct ColumnDependencies {
    graph: DependencyGraph<String, DependencyKind>,
}

impl ColumnDependencies {
    /// Validate the whole schema and build its graph.
    pub fn build(schema: &Schema) -> EngineResult<Self> {
        schema.check_unique_ids()?;

        let mut deps = Self::default();
        for (_, column) in schema.columns() {
            deps.graph.add_node(column.id.clone());
        }
        for (table, column) in schema.columns() {
            for edge in column_edges(schema, table, column)? {
                deps.insert(edge)?;
            }
        }
        debug!(
            columns = deps.graph.node_count(),
            edges = deps.graph.edge_count(),
            "Built column dependency graph"
        );
        Ok(deps)
    }

    fn insert(&mut self, edge: DependencyEdge) -> EngineResult<()> {
        self.graph
            .add_edge(edge.from_column_id, edge.to_column_id, edge.kind)
            .map_err(EngineError::from)
    }

    /// Would adding `edge` close a cycle?
    pub fn would_create_cycle(&self, edge: &DependencyEdge) -> CycleCheck {
        match self
            .graph
            .would_create_cycle(&edge.from_column_id, &edge.to_column_id)
        {
            Some(cycle_path) => CycleCheck::Cycle { cycle_path },
            None => CycleCheck::Acyclic,
        }
    }

    /// Replace the outgoing edges of `column` (new or edited) on `table`.
    ///
    /// Nothing changes when the configuration is invalid or would close a
    /// cycle.
    pub fn set_column(&mut self, schema: &Schema, table: &Table, column: &Column) -> EngineResult<()> {
        let edges = column_edges(schema, table, column)?;
        let mut next = self.clone();
        next.graph.add_node(column.id.clone());
        next.graph.clear_dependencies(&column.id);
        for edge in edges {
            next.insert(edge)?;
        }
        *self = next;
        Ok(())
    }

    /// Drop a column and its edges. Returns the columns that depended on it.
    pub fn remove_column(&mut self, column_id: &str) -> Vec<String> {
        let column_id = column_id.to_string();
        let dependents = self.graph.dependents(&column_id);
        self.graph.remove_node(&column_id);
        dependents
    }

    pub fn dependencies(&self, column_id: &str) -> Vec<String> {
        self.graph.dependencies(&column_id.to_string())
    }

    pub fn dependents(&self, column_id: &str) -> Vec<String> {
        self.graph.dependents(&column_id.to_string())
    }

    /// Columns whose values change when `column_id` changes.
    pub fn affected_by(&self, column_id: &str) -> Vec<String> {
        self.graph.transitive_dependents(&column_id.to_string())
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.graph
            .edges()
            .into_iter()
            .map(|(from_column_id, to_column_id, kind)| DependencyEdge {
                from_column_id,
                to_column_id,
                kind,
            })
            .collect()
    }

    /// All column ids, dependencies first.
    pub fn evaluation_order(&self) -> EngineResult<Vec<String>> {
        self.graph.topological_order().map_err(EngineError::from)
    }
}
