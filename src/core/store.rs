//! Row storage seen by the engine
//!
//! The engine never fetches rows itself. Callers hand it a [`RowStore`]
//! holding everything a recompute may read, pre-fetched in bulk.

use crate::core::value::{parse_datetime, Value};
use crate::types::{ColumnKind, RelationLink, Row, Workbook};
use std::collections::HashMap;
use tracing::warn;

/// Read access to rows and relation links
pub trait RowStore: Sync {
    fn row(&self, table_id: &str, row_id: &str) -> Option<&Row>;

    fn rows(&self, table_id: &str) -> &[Row];

    /// Target row ids linked from `source_row_id` through a relation column,
    /// in link order.
    fn linked_row_ids(&self, source_row_id: &str, relation_column_id: &str) -> &[String];
}

/// In-memory [`RowStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Row>>,
    row_index: HashMap<String, HashMap<String, usize>>,
    /// relation column id → source row id → target row ids
    links: HashMap<String, HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a table, replacing rows with the same id.
    pub fn insert_rows(&mut self, table_id: &str, rows: impl IntoIterator<Item = Row>) {
        let table = self.tables.entry(table_id.to_string()).or_default();
        let index = self.row_index.entry(table_id.to_string()).or_default();
        for row in rows {
            match index.get(&row.id) {
                Some(&i) => table[i] = row,
                None => {
                    index.insert(row.id.clone(), table.len());
                    table.push(row);
                }
            }
        }
    }

    pub fn add_link(&mut self, link: RelationLink) {
        let targets = self
            .links
            .entry(link.relation_column_id)
            .or_default()
            .entry(link.source_row_id)
            .or_default();
        if !targets.contains(&link.target_row_id) {
            targets.push(link.target_row_id);
        }
    }

    pub fn add_links(&mut self, links: impl IntoIterator<Item = RelationLink>) {
        for link in links {
            self.add_link(link);
        }
    }

    /// Overwrite one stored value. Returns false when the row is unknown.
    pub fn set_value(&mut self, table_id: &str, row_id: &str, column_id: &str, value: Value) -> bool {
        let Some(&i) = self.row_index.get(table_id).and_then(|idx| idx.get(row_id)) else {
            return false;
        };
        match self.tables.get_mut(table_id).and_then(|rows| rows.get_mut(i)) {
            Some(row) => {
                row.values.insert(column_id.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Load a workbook's rows and links.
    ///
    /// Every row ends up with exactly its table's column ids: missing values
    /// become Null and unknown keys are dropped. Text in date columns is
    /// parsed into date-times.
    pub fn from_workbook(workbook: &Workbook) -> Self {
        let mut store = Self::new();
        for table in &workbook.tables {
            let rows = table.rows.iter().map(|row| {
                let mut values = HashMap::with_capacity(table.columns.len());
                for column in &table.columns {
                    let raw = row.values.get(&column.id).cloned().unwrap_or_default();
                    let value = match (&column.kind, raw) {
                        (ColumnKind::Date, Value::Text(s)) => match parse_datetime(&s) {
                            Some(dt) => Value::DateTime(dt),
                            None => {
                                warn!(table = %table.id, row = %row.id, column = %column.id,
                                    "Unparseable date '{}' kept as text", s);
                                Value::Text(s)
                            }
                        },
                        (_, other) => other,
                    };
                    values.insert(column.id.clone(), value);
                }
                for key in row.values.keys() {
                    if !table.columns.iter().any(|c| &c.id == key) {
                        warn!(table = %table.id, row = %row.id, "Dropping value for unknown column '{}'", key);
                    }
                }
                Row {
                    id: row.id.clone(),
                    values,
                }
            });
            let rows: Vec<Row> = rows.collect();
            store.insert_rows(&table.id, rows);
        }
        store.add_links(workbook.links.iter().cloned());
        store
    }
}

impl RowStore for MemoryStore {
    fn row(&self, table_id: &str, row_id: &str) -> Option<&Row> {
        let i = *self.row_index.get(table_id)?.get(row_id)?;
        self.tables.get(table_id)?.get(i)
    }

    fn rows(&self, table_id: &str) -> &[Row] {
        self.tables
            .get(table_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn linked_row_ids(&self, source_row_id: &str, relation_column_id: &str) -> &[String] {
        self.links
            .get(relation_column_id)
            .and_then(|by_source| by_source.get(source_row_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
