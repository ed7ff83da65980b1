use crate::core::value::Value;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

//==============================================================================
// Column configuration
//==============================================================================

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Email,
    Phone,
    Url,
    Select,
    Relation,
    Formula,
    Lookup,
    Rollup,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Email => "email",
            ColumnType::Phone => "phone",
            ColumnType::Url => "url",
            ColumnType::Select => "select",
            ColumnType::Relation => "relation",
            ColumnType::Formula => "formula",
            ColumnType::Lookup => "lookup",
            ColumnType::Rollup => "rollup",
        }
    }

    /// Formula, lookup and rollup columns are computed by the engine.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            ColumnType::Formula | ColumnType::Lookup | ColumnType::Rollup
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
            .map_err(|_| EngineError::InvalidConfig(format!("Unknown column type '{}'", s)))
    }
}

/// Cardinality of a relation column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationType {
    /// Only `many_to_one` relations resolve to a single target row.
    pub fn is_single_target(&self) -> bool {
        matches!(self, RelationType::ManyToOne)
    }
}

/// Rollup aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Median,
    Unique,
    Empty,
    NotEmpty,
}

impl Aggregation {
    /// Aggregations that only make sense over a numeric target column.
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            Aggregation::Sum
                | Aggregation::Avg
                | Aggregation::Min
                | Aggregation::Max
                | Aggregation::Median
        )
    }

    /// Aggregations whose result is a count of linked rows.
    pub fn is_counting(&self) -> bool {
        matches!(
            self,
            Aggregation::Count | Aggregation::Unique | Aggregation::Empty | Aggregation::NotEmpty
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaConfig {
    pub expression: String,
    /// Type the result is coerced into; raw result when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ColumnType>,
    /// Column names the author declared as dependencies (checked by validation only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl FormulaConfig {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            return_type: None,
            dependencies: None,
        }
    }

    pub fn returning(mut self, return_type: ColumnType) -> Self {
        self.return_type = Some(return_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub target_table_id: String,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    pub relation_column_id: String,
    pub target_column_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupConfig {
    pub relation_column_id: String,
    pub target_column_id: String,
    pub aggregation: Aggregation,
}

/// Column type together with its type-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
    Date,
    Boolean,
    Email,
    Phone,
    Url,
    Select,
    Relation(RelationConfig),
    Formula(FormulaConfig),
    Lookup(LookupConfig),
    Rollup(RollupConfig),
}

impl ColumnKind {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnKind::Text => ColumnType::Text,
            ColumnKind::Number => ColumnType::Number,
            ColumnKind::Date => ColumnType::Date,
            ColumnKind::Boolean => ColumnType::Boolean,
            ColumnKind::Email => ColumnType::Email,
            ColumnKind::Phone => ColumnType::Phone,
            ColumnKind::Url => ColumnType::Url,
            ColumnKind::Select => ColumnType::Select,
            ColumnKind::Relation(_) => ColumnType::Relation,
            ColumnKind::Formula(_) => ColumnType::Formula,
            ColumnKind::Lookup(_) => ColumnType::Lookup,
            ColumnKind::Rollup(_) => ColumnType::Rollup,
        }
    }
}

/// A column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    /// A stored column whose id and name are the same.
    pub fn simple(id: &str, kind: ColumnKind) -> Self {
        Self::new(id, id, kind)
    }

    pub fn formula(id: &str, expression: &str) -> Self {
        Self::simple(id, ColumnKind::Formula(FormulaConfig::new(expression)))
    }

    pub fn relation(id: &str, target_table_id: &str, relation_type: RelationType) -> Self {
        Self::simple(
            id,
            ColumnKind::Relation(RelationConfig {
                target_table_id: target_table_id.to_string(),
                relation_type,
                display_field: None,
            }),
        )
    }

    pub fn lookup(id: &str, relation_column_id: &str, target_column_id: &str) -> Self {
        Self::simple(
            id,
            ColumnKind::Lookup(LookupConfig {
                relation_column_id: relation_column_id.to_string(),
                target_column_id: target_column_id.to_string(),
            }),
        )
    }

    pub fn rollup(
        id: &str,
        relation_column_id: &str,
        target_column_id: &str,
        aggregation: Aggregation,
    ) -> Self {
        Self::simple(
            id,
            ColumnKind::Rollup(RollupConfig {
                relation_column_id: relation_column_id.to_string(),
                target_column_id: target_column_id.to_string(),
                aggregation,
            }),
        )
    }

    pub fn column_type(&self) -> ColumnType {
        self.kind.column_type()
    }

    pub fn is_derived(&self) -> bool {
        self.column_type().is_derived()
    }
}

//==============================================================================
// Schema
//==============================================================================

/// Schema of one user-authored table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// All tables known to the engine. Column ids are unique across tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn table(&self, table_id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    pub fn table_mut(&mut self, table_id: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == table_id)
    }

    /// Find a column anywhere in the schema, with the table that owns it.
    pub fn column(&self, column_id: &str) -> Option<(&Table, &Column)> {
        self.tables
            .iter()
            .find_map(|t| t.column(column_id).map(|c| (t, c)))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Table, &Column)> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter().map(move |c| (t, c)))
    }

    /// Reject duplicate table ids, duplicate column ids, and duplicate
    /// column names within a table.
    pub fn check_unique_ids(&self) -> EngineResult<()> {
        let mut table_ids = HashSet::new();
        let mut column_ids = HashSet::new();
        for table in &self.tables {
            if !table_ids.insert(table.id.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "Duplicate table id '{}'",
                    table.id
                )));
            }
            let mut names = HashSet::new();
            for column in &table.columns {
                if !column_ids.insert(column.id.as_str()) {
                    return Err(EngineError::InvalidConfig(format!(
                        "Duplicate column id '{}'",
                        column.id
                    )));
                }
                if !names.insert(column.name.as_str()) {
                    return Err(EngineError::InvalidConfig(format!(
                        "Table '{}' has two columns named '{}'",
                        table.id, column.name
                    )));
                }
            }
        }
        Ok(())
    }
}

//==============================================================================
// Rows and links
//==============================================================================

/// A row of one table; values are keyed by column id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default)]
    pub values: HashMap<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, column_id: &str, value: impl Into<Value>) -> Self {
        self.values.insert(column_id.to_string(), value.into());
        self
    }

    /// Missing entries read as Null.
    pub fn value(&self, column_id: &str) -> &Value {
        const NULL: Value = Value::Null;
        self.values.get(column_id).unwrap_or(&NULL)
    }
}

/// One edge of a relation column between a source row and a target row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationLink {
    pub source_row_id: String,
    pub target_row_id: String,
    pub relation_column_id: String,
}

impl RelationLink {
    pub fn new(source_row_id: &str, target_row_id: &str, relation_column_id: &str) -> Self {
        Self {
            source_row_id: source_row_id.to_string(),
            target_row_id: target_row_id.to_string(),
            relation_column_id: relation_column_id.to_string(),
        }
    }
}

//==============================================================================
// Workbook document
//==============================================================================

/// A table together with its rows, as stored in a workbook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookTable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Self-contained document bundling a schema, its rows and relation links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub tables: Vec<WorkbookTable>,
    #[serde(default)]
    pub links: Vec<RelationLink>,
}

impl Workbook {
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.tables
                .iter()
                .map(|t| Table {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    columns: t.columns.clone(),
                })
                .collect(),
        )
    }

    pub fn table(&self, table_id: &str) -> Option<&WorkbookTable> {
        self.tables.iter().find(|t| t.id == table_id)
    }
}
