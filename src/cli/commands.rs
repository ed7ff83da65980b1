use crate::config::EngineConfig;
use crate::core::functions::{catalogue, Namespace};
use crate::core::{
    format_rollup_value, validate_formula, BatchReport, CancellationToken, DependencyNode, Engine,
    MemoryStore, Value,
};
use crate::error::{EngineError, EngineResult};
use crate::parser;
use crate::types::{Column, ColumnKind, ColumnType, Table, Workbook};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn load_engine(file: &Path, config: EngineConfig) -> EngineResult<(Workbook, Engine)> {
    let workbook = parser::parse_workbook(file)?;
    let engine = Engine::new(workbook.schema(), config)?;
    Ok((workbook, engine))
}

fn find_column<'a>(table: &'a Table, reference: &str) -> Option<&'a Column> {
    table
        .column(reference)
        .or_else(|| table.column_by_name(reference))
}

/// Render a cell, with error markers in red.
fn format_cell(value: &Value, column: &Column) -> String {
    match (value, &column.kind) {
        (Value::Error(e), _) => format!("#{} ({})", e.kind(), e).red().to_string(),
        (_, ColumnKind::Rollup(cfg)) => format_rollup_value(value, cfg.aggregation),
        (Value::Null, _) => "-".dimmed().to_string(),
        (Value::List(_), _) => format!("[{}]", value.to_display_string()),
        _ => value.to_display_string(),
    }
}

/// Execute the evaluate command
pub fn evaluate(
    expression: String,
    row: Option<String>,
    return_type: Option<String>,
    timeout_ms: Option<u64>,
) -> EngineResult<()> {
    println!("{}", "🧮 dbcalc - Evaluating expression".bold().green());
    println!("   Expression: {}", expression.bright_yellow());

    let row: HashMap<String, Value> = match row {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| EngineError::Parse(format!("--row must be a JSON object: {}", e)))?,
        None => HashMap::new(),
    };
    let target = return_type
        .map(|t| t.parse::<ColumnType>())
        .transpose()?;
    let timeout_ms = timeout_ms.or(EngineConfig::default().timeout_ms);

    match crate::core::evaluate(&expression, &row, target, timeout_ms) {
        Ok(evaluation) => {
            println!(
                "   Result: {} ({})",
                evaluation.result.to_display_string().bold().green(),
                evaluation.result.type_name().cyan()
            );
            println!(
                "   Evaluated at: {}",
                evaluation
                    .evaluated_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                    .dimmed()
            );
            Ok(())
        }
        Err(e) => {
            println!("\n{}", format!("❌ {}: {}", e.kind(), e).bold().red());
            Err(e.into())
        }
    }
}

/// Execute the check command: load, validate relations and cycles, lint formulas
pub fn check(files: Vec<PathBuf>) -> EngineResult<()> {
    let mut failed = 0;
    for file in &files {
        println!("{}", "✅ Checking workbook".bold().green());
        println!("   File: {}", file.display());

        match check_one(file) {
            Ok(()) => {}
            Err(e) => {
                failed += 1;
                println!("{}", format!("❌ {}", e).bold().red());
            }
        }
        println!();
    }

    if failed == 0 {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "{} of {} workbook(s) failed validation",
            failed,
            files.len()
        )))
    }
}

fn check_one(file: &Path) -> EngineResult<()> {
    let (workbook, engine) = load_engine(file, EngineConfig::default())?;

    let derived = engine
        .schema()
        .columns()
        .filter(|(_, c)| c.is_derived())
        .count();
    let rows: usize = workbook.tables.iter().map(|t| t.rows.len()).sum();
    println!(
        "   Found {} tables, {} derived columns, {} rows, {} links",
        workbook.tables.len(),
        derived,
        rows,
        workbook.links.len()
    );

    let mut problems = Vec::new();
    for (table, column) in engine.schema().columns() {
        if let ColumnKind::Formula(cfg) = &column.kind {
            let validation = validate_formula(cfg);
            for error in validation.errors {
                problems.push(format!("{}.{}: {}", table.id, column.id, error));
            }
        }
    }

    if problems.is_empty() {
        println!("{}", "   No dependency cycles, all formulas valid".green());
        Ok(())
    } else {
        for problem in &problems {
            println!("   {}", problem.yellow());
        }
        Err(EngineError::Validation(format!(
            "{} formula problem(s) in {}",
            problems.len(),
            file.display()
        )))
    }
}

/// Execute the compute command: recompute derived columns and print them
pub fn compute(
    file: PathBuf,
    table: Option<String>,
    timeout_ms: Option<u64>,
    config: Option<PathBuf>,
    sequential: bool,
) -> EngineResult<()> {
    println!("{}", "🔥 dbcalc - Computing derived columns".bold().green());
    println!("   File: {}\n", file.display());

    let mut engine_config = match &config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };
    if timeout_ms.is_some() {
        engine_config = engine_config.with_timeout_ms(timeout_ms);
    }
    if sequential {
        engine_config = engine_config.with_parallel(false);
    }

    let (workbook, engine) = load_engine(&file, engine_config)?;
    let store = MemoryStore::from_workbook(&workbook);
    let token = CancellationToken::new();

    let table_ids: Vec<String> = match table {
        Some(id) => {
            if engine.schema().table(&id).is_none() {
                return Err(EngineError::Validation(format!("Unknown table '{}'", id)));
            }
            vec![id]
        }
        None => engine.schema().tables.iter().map(|t| t.id.clone()).collect(),
    };

    let mut cells = 0;
    let mut errors = 0;
    for table_id in &table_ids {
        let reports = engine.recompute_table(&store, table_id, &token)?;
        let Some(table) = engine.schema().table(table_id) else {
            continue;
        };
        println!("   📊 Table: {}", table.name.bright_blue().bold());
        if reports.is_empty() {
            println!("      {}", "(no derived columns)".dimmed());
        }
        for report in &reports {
            if let Some(column) = table.column(&report.column_id) {
                print_report(column, report);
            }
            cells += report.cells.len();
            errors += report.errors;
        }
        println!();
    }

    let summary = format!("✅ Computed {} cells ({} errors)", cells, errors);
    if errors == 0 {
        println!("{}", summary.bold().green());
    } else {
        println!("{}", summary.bold().yellow());
    }
    Ok(())
}

fn print_report(column: &Column, report: &BatchReport) {
    println!(
        "      {} ({}, {} ms)",
        column.name.cyan(),
        column.column_type(),
        report.duration_ms
    );
    for (row_id, value) in &report.cells {
        println!("         {} = {}", row_id, format_cell(value, column));
    }
    for row_id in &report.unevaluated {
        println!("         {} = {}", row_id, "(not evaluated)".dimmed());
    }
}

/// Execute the audit command - show a column's dependency chain
pub fn audit(file: PathBuf, table: String, column: String) -> EngineResult<()> {
    println!("{}", "🔍 dbcalc - Audit Trail".bold().green());
    println!("   File: {}", file.display());
    println!("   Column: {}\n", format!("{}.{}", table, column).bright_blue().bold());

    let (_, engine) = load_engine(&file, EngineConfig::default())?;
    let owner = engine
        .schema()
        .table(&table)
        .ok_or_else(|| EngineError::Validation(format!("Unknown table '{}'", table)))?;
    let target = find_column(owner, &column).ok_or_else(|| {
        EngineError::Validation(format!(
            "Column '{}' not found in table '{}'. Available: {:?}",
            column,
            table,
            owner.column_names()
        ))
    })?;

    println!("{}", "📋 Column Information:".bold().cyan());
    println!("   Type: {}", target.column_type().to_string().cyan());
    match &target.kind {
        ColumnKind::Formula(cfg) => println!("   Formula: {}", cfg.expression.bright_yellow()),
        ColumnKind::Lookup(cfg) => println!(
            "   Lookup: {} → {}",
            cfg.relation_column_id, cfg.target_column_id
        ),
        ColumnKind::Rollup(cfg) => println!(
            "   Rollup: {:?} of {} → {}",
            cfg.aggregation, cfg.relation_column_id, cfg.target_column_id
        ),
        ColumnKind::Relation(cfg) => println!(
            "   Relation: {:?} to {}",
            cfg.relation_type, cfg.target_table_id
        ),
        _ => {}
    }
    println!();

    let tree = engine.dependency_tree(&target.id)?;
    println!("{}", "🌳 Dependency Tree:".bold().cyan());
    if tree.dependencies.is_empty() {
        println!("   No dependencies (stored value)");
    } else {
        for dep in &tree.dependencies {
            print_dependency(dep, 1);
        }
    }

    let mut dependents = engine.dependencies().affected_by(&target.id);
    dependents.sort();
    if !dependents.is_empty() {
        println!("\n{}", "⬆️  Recomputed when this column changes:".bold().cyan());
        for id in dependents {
            println!("   {}", id.bright_blue());
        }
    }
    Ok(())
}

fn print_dependency(dep: &DependencyNode, indent: usize) {
    let prefix = "   ".repeat(indent);
    print!("{}└─ {} ", prefix, dep.column_id.bright_blue());
    print!("({} in {})", dep.column_type.to_string().cyan(), dep.table_id);
    if let Some(ref expression) = dep.expression {
        print!(" {}", expression.yellow());
    }
    println!();

    for child in &dep.dependencies {
        print_dependency(child, indent + 1);
    }
}

/// Execute the functions command - list the function catalogue
pub fn functions() -> EngineResult<()> {
    println!("{}", "📚 dbcalc - Function Catalogue".bold().green());
    let all = catalogue();
    for namespace in Namespace::ALL {
        println!("\n   {}", namespace.as_str().to_uppercase().bold().cyan());
        for info in all.iter().filter(|f| f.namespace == namespace) {
            println!(
                "      {:<12} {:<5} {}  {}",
                info.name.bright_blue(),
                info.arity.to_string(),
                info.description,
                info.example.dimmed()
            );
        }
    }
    println!("\n   {} functions", all.len());
    Ok(())
}
