//! cqls - explain query objects as CQL

use anyhow::Context;
use cassandra_service::query::{compile, normalize, resolve, MaterializedView, Paginate, Statement};
use cassandra_service::{IdField, Schema};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cqls")]
#[command(about = "Inspect how cassandra-service translates query objects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SELECT a query object compiles to
    Explain {
        /// Schema file (YAML)
        #[arg(short, long)]
        schema: PathBuf,

        /// Materialized view as name=col1,col2 (repeatable)
        #[arg(long = "view", value_parser = parse_view)]
        views: Vec<MaterializedView>,

        /// Default page size
        #[arg(long)]
        paginate: Option<usize>,

        /// The query object, as JSON
        query: String,
    },

    /// Show the key and field types of a schema
    Schema {
        /// Schema file (YAML)
        path: PathBuf,
    },
}

fn parse_view(arg: &str) -> Result<MaterializedView, String> {
    let (name, keys) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=col1,col2, got '{}'", arg))?;
    let keys: Vec<&str> = keys.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Err(format!("view '{}' has no key columns", name));
    }
    Ok(MaterializedView::new(name.trim(), &keys))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            schema,
            views,
            paginate,
            query,
        } => explain(&schema, &views, paginate, &query),
        Commands::Schema { path } => show_schema(&path),
    }
}

fn explain(path: &PathBuf, views: &[MaterializedView], page_size: Option<usize>, query: &str) -> anyhow::Result<()> {
    let schema = Schema::from_yaml_file(path).with_context(|| format!("loading schema {:?}", path))?;
    let raw: serde_json::Value = serde_json::from_str(query).context("query must be JSON")?;
    let raw = raw.as_object().context("query must be a JSON object")?;

    let paginate = Paginate {
        default: page_size,
        max: None,
    };
    let parsed = normalize(raw, &paginate, &Default::default())?;
    let predicate = compile(&parsed, &schema);
    let view = resolve(&predicate.columns(), views);

    let mut stmt = Statement::select(&schema.keyspace, &schema.table_name).with_predicate(predicate);
    if let Some(view) = view {
        stmt = stmt.from_view(view);
    }
    stmt.select = parsed.controls.select.clone();
    stmt.order_by = parsed.controls.sort.clone();
    stmt.limit = parsed.controls.limit;
    stmt.per_partition_limit = parsed.controls.limit_per_partition;
    stmt.allow_filtering = parsed.controls.allow_filtering;

    let (cql, params) = stmt.to_cql();
    println!("{}", cql);
    if !params.is_empty() {
        println!("params: {}", serde_json::Value::Array(params));
    }
    if let Some(view) = view {
        println!("view:   {}", view);
    }
    if !parsed.controls.filters.is_empty() {
        println!("named filters (not applied here): {}", parsed.controls.filters.join(", "));
    }

    Ok(())
}

fn show_schema(path: &PathBuf) -> anyhow::Result<()> {
    let schema = Schema::from_yaml_file(path).with_context(|| format!("loading schema {:?}", path))?;

    println!("{}.{}", schema.keyspace, schema.table_name);
    match schema.id_field() {
        IdField::Single(column) => println!("id:        {}", column),
        IdField::Composite(columns) => println!("id:        {} (composite)", columns.join(", ")),
    }
    println!("partition: {}", schema.partition_columns().join(", "));
    println!();

    if schema.fields.is_empty() {
        println!("No fields declared.");
        return Ok(());
    }
    for (name, def) in &schema.fields {
        let required = if def.required { " (required)" } else { "" };
        println!("  {}: {}{}", name, def.field_type, required);
    }

    Ok(())
}
