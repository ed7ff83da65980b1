use crate::error::{EngineError, EngineResult};
use crate::types::{ColumnKind, Workbook};
use jsonschema::JSONSchema;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Parse a workbook file (YAML or JSON).
///
/// The document is checked against the embedded JSON Schema first. Schema
/// violations are logged and parsing continues, so deserialization reports
/// the precise error when the document really is malformed. Structural
/// checks that the schema cannot express (unique row ids, links pointing at
/// relation columns and existing rows) are enforced.
///
/// # Example
/// ```no_run
/// use dbcalc::parser::parse_workbook;
/// use std::path::Path;
///
/// let workbook = parse_workbook(Path::new("shop.yaml"))?;
/// println!("Tables: {}", workbook.tables.len());
/// # Ok::<(), dbcalc::error::EngineError>(())
/// ```
pub fn parse_workbook(path: &Path) -> EngineResult<Workbook> {
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = content.len(), "Parsing workbook");
    parse_workbook_str(&content)
}

/// Parse a workbook from YAML (or JSON, which YAML accepts) text.
pub fn parse_workbook_str(content: &str) -> EngineResult<Workbook> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    let json: serde_json::Value = serde_json::to_value(&yaml)
        .map_err(|e| EngineError::Parse(format!("Failed to convert YAML to JSON: {}", e)))?;

    if let Err(e) = validate_against_schema(&json) {
        warn!("{}", e);
    }

    let workbook: Workbook = serde_json::from_value(json)?;
    check_workbook(&workbook)?;
    Ok(workbook)
}

/// Validate a JSON document against the workbook JSON Schema
pub fn validate_against_schema(json: &serde_json::Value) -> EngineResult<()> {
    let schema_str = include_str!("../../schema/workbook.schema.json");
    let schema_value: serde_json::Value = serde_json::from_str(schema_str)
        .map_err(|e| EngineError::Validation(format!("Failed to parse schema: {}", e)))?;

    let compiled_schema = JSONSchema::compile(&schema_value)
        .map_err(|e| EngineError::Validation(format!("Failed to compile schema: {}", e)))?;

    if let Err(errors) = compiled_schema.validate(json) {
        let error_messages: Vec<String> = errors.map(|e| format!("  - {}", e)).collect();
        return Err(EngineError::Validation(format!(
            "Schema validation failed:\n{}",
            error_messages.join("\n")
        )));
    }

    Ok(())
}

/// Row ids unique per table; every link goes through a relation column
/// between rows that exist in the right tables.
pub fn check_workbook(workbook: &Workbook) -> EngineResult<()> {
    for table in &workbook.tables {
        let mut seen = HashSet::new();
        for row in &table.rows {
            if !seen.insert(row.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Table '{}' has duplicate row id '{}'",
                    table.id, row.id
                )));
            }
        }
    }

    let schema = workbook.schema();
    let has_row = |table_id: &str, row_id: &str| {
        workbook
            .table(table_id)
            .is_some_and(|t| t.rows.iter().any(|r| r.id == row_id))
    };

    for link in &workbook.links {
        let (source_table, column) = schema.column(&link.relation_column_id).ok_or_else(|| {
            EngineError::Validation(format!(
                "Link {} -> {} uses unknown column '{}'",
                link.source_row_id, link.target_row_id, link.relation_column_id
            ))
        })?;
        let ColumnKind::Relation(relation) = &column.kind else {
            return Err(EngineError::Validation(format!(
                "Link {} -> {}: column '{}' is not a relation",
                link.source_row_id, link.target_row_id, column.id
            )));
        };
        if !has_row(&source_table.id, &link.source_row_id) {
            return Err(EngineError::Validation(format!(
                "Link source row '{}' not found in table '{}'",
                link.source_row_id, source_table.id
            )));
        }
        if !has_row(&relation.target_table_id, &link.target_row_id) {
            return Err(EngineError::Validation(format!(
                "Link target row '{}' not found in table '{}'",
                link.target_row_id, relation.target_table_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::types::{Aggregation, ColumnType, RelationType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SHOP: &str = r#"
tables:
  - id: orders
    name: Orders
    columns:
      - { id: qty, name: Quantity, type: number }
      - { id: price, name: Price, type: number }
      - id: total
        name: Total
        type: formula
        expression: "{Quantity} * {Price}"
        return_type: number
      - id: customer
        name: Customer
        type: relation
        target_table_id: customers
        relation_type: many_to_one
        display_field: name
    rows:
      - id: o1
        values: { qty: 2, price: 9.5 }
  - id: customers
    name: Customers
    columns:
      - { id: name, name: name, type: text }
      - id: orders
        name: Orders
        type: relation
        target_table_id: orders
        relation_type: one_to_many
      - id: spent
        name: Spent
        type: rollup
        relation_column_id: orders
        target_column_id: total
        aggregation: sum
    rows:
      - id: c1
        values: { name: Ada }
links:
  - { source_row_id: o1, target_row_id: c1, relation_column_id: customer }
  - { source_row_id: c1, target_row_id: o1, relation_column_id: orders }
"#;

    #[test]
    fn test_parse_workbook_yaml() {
        let workbook = parse_workbook_str(SHOP).unwrap();
        assert_eq!(workbook.tables.len(), 2);
        assert_eq!(workbook.links.len(), 2);

        let orders = workbook.table("orders").unwrap();
        assert_eq!(orders.columns[2].column_type(), ColumnType::Formula);
        match &orders.columns[2].kind {
            ColumnKind::Formula(cfg) => {
                assert_eq!(cfg.expression, "{Quantity} * {Price}");
                assert_eq!(cfg.return_type, Some(ColumnType::Number));
            }
            other => panic!("expected formula, got {:?}", other),
        }
        match &orders.columns[3].kind {
            ColumnKind::Relation(cfg) => {
                assert_eq!(cfg.relation_type, RelationType::ManyToOne);
                assert_eq!(cfg.display_field.as_deref(), Some("name"));
            }
            other => panic!("expected relation, got {:?}", other),
        }
        assert_eq!(orders.rows[0].value("price"), &Value::Number(9.5));

        let customers = workbook.table("customers").unwrap();
        match &customers.columns[2].kind {
            ColumnKind::Rollup(cfg) => assert_eq!(cfg.aggregation, Aggregation::Sum),
            other => panic!("expected rollup, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_workbook_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tables": [{{"id": "t", "name": "T", "columns": [{{"id": "a", "name": "a", "type": "number"}}], "rows": [{{"id": "r1", "values": {{"a": 1}}}}]}}]}}"#
        )
        .unwrap();
        let workbook = parse_workbook(file.path()).unwrap();
        assert_eq!(workbook.tables[0].rows[0].value("a"), &Value::Number(1.0));
    }

    #[test]
    fn test_schema_rejects_bad_aggregation() {
        let json = serde_json::json!({
            "tables": [{
                "id": "t", "name": "T",
                "columns": [{
                    "id": "r", "name": "r", "type": "rollup",
                    "relation_column_id": "x", "target_column_id": "y",
                    "aggregation": "product"
                }]
            }]
        });
        assert!(validate_against_schema(&json).is_err());
    }

    #[test]
    fn test_unknown_column_type_fails() {
        let yaml = "tables:\n  - id: t\n    name: T\n    columns:\n      - { id: a, name: a, type: currency }\n";
        assert!(parse_workbook_str(yaml).is_err());
    }

    #[test]
    fn test_duplicate_row_ids_rejected() {
        let yaml = "tables:\n  - id: t\n    name: T\n    rows:\n      - id: r1\n      - id: r1\n";
        let err = parse_workbook_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate row id"));
    }

    #[test]
    fn test_link_through_non_relation_rejected() {
        let yaml = SHOP.replace(
            "relation_column_id: customer }",
            "relation_column_id: qty }",
        );
        let err = parse_workbook_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("not a relation"));
    }

    #[test]
    fn test_link_to_missing_row_rejected() {
        let yaml = SHOP.replace("target_row_id: c1", "target_row_id: c9");
        assert!(parse_workbook_str(&yaml).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            parse_workbook(Path::new("/nonexistent/workbook.yaml")),
            Err(EngineError::Io(_))
        ));
    }
}
