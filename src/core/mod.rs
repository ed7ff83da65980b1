//! Derived-column engine: values, formulas, relations and the dependency graph

pub mod batch;
pub mod coercion;
pub mod dependencies;
pub mod engine;
pub mod expression;
pub mod functions;
pub mod graph;
pub mod relations;
pub mod store;
pub mod tasks;
pub mod value;

pub use batch::{BatchReport, CancellationToken};
pub use coercion::coerce;
pub use dependencies::{ColumnDependencies, CycleCheck, DependencyEdge, DependencyKind};
pub use engine::{DependencyNode, Engine};
pub use expression::{evaluate, extract_references, validate_formula, Evaluation, Expression};
pub use graph::{CycleError, DependencyGraph};
pub use relations::{aggregate, format_rollup_value};
pub use store::{MemoryStore, RowStore};
pub use tasks::{TaskDependencies, TaskDependency};
pub use value::Value;
