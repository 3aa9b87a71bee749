//! db-querier - Main entry point.
//!
//! Renders entity queries to SQL for a chosen dialect, or executes them
//! against a live database and prints the result as JSON.

use clap::Parser;
use db_querier::config::{Command, Config, DatabaseConfig, Operation, OperationArgs};
use db_querier::models::{Dialect, EntityRegistry, Record};
use db_querier::query::{DescriptorBuilder, Query, QueryDescriptor, RpcQuery};
use db_querier::sql::SqlGenerator;
use db_querier::{DbError, DbResult, Pool};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only the JSON result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_registry(config: &Config) -> DbResult<EntityRegistry> {
    let text = std::fs::read_to_string(&config.entities).map_err(|e| {
        DbError::validation(
            "entities",
            format!("cannot read {}: {e}", config.entities.display()),
        )
    })?;
    EntityRegistry::from_json(&text)
}

/// Parse `--payload` as one record or an array of records.
fn parse_payloads(payload: Option<&str>) -> DbResult<Vec<Record>> {
    let text = payload.ok_or_else(|| DbError::validation("payload", "--payload is required"))?;
    let json: JsonValue = serde_json::from_str(text)
        .map_err(|e| DbError::validation("payload", format!("invalid JSON: {e}")))?;
    match json {
        JsonValue::Object(record) => Ok(vec![record]),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::Object(record) => Ok(record),
                _ => Err(DbError::validation("payload", "array items must be objects")),
            })
            .collect(),
        _ => Err(DbError::validation(
            "payload",
            "expected an object or an array of objects",
        )),
    }
}

fn single_payload(args: &OperationArgs) -> DbResult<Record> {
    let mut records = parse_payloads(args.payload.as_deref())?;
    if records.len() != 1 {
        return Err(DbError::validation("payload", "expected a single record"));
    }
    Ok(records.remove(0))
}

fn build_descriptor(
    registry: &EntityRegistry,
    dialect: Dialect,
    args: &OperationArgs,
) -> DbResult<QueryDescriptor> {
    let (entity, query) = RpcQuery::parse(&args.query)?.into_parts()?;
    let meta = registry.get(&entity)?;
    let builder = DescriptorBuilder::new(&meta);

    match args.op {
        Operation::FindMany => builder.select(&query),
        Operation::FindOne => builder.select(&query.limit(1)),
        Operation::Count => builder.count(query.filter.as_ref()),
        Operation::InsertMany => builder.insert(
            &parse_payloads(args.payload.as_deref())?,
            dialect.supports_returning(),
        ),
        Operation::UpdateMany => builder.update(query.filter.as_ref(), &single_payload(args)?),
        Operation::DeleteMany => builder.delete(query.filter.as_ref()),
        Operation::UpsertMany => builder.upsert(
            &args.conflict_paths,
            &parse_payloads(args.payload.as_deref())?,
        ),
    }
}

fn render(registry: &EntityRegistry, dialect: Dialect, args: &OperationArgs) -> DbResult<JsonValue> {
    let descriptor = build_descriptor(registry, dialect, args)?;
    let stmt = SqlGenerator::new(dialect).generate(&descriptor)?;
    Ok(json!({
        "sql": stmt.text,
        "params": stmt.params,
        "returnsRows": stmt.returns_rows,
    }))
}

async fn exec(pool: &Pool, args: &OperationArgs) -> DbResult<JsonValue> {
    let (entity, query): (String, Query) = RpcQuery::parse(&args.query)?.into_parts()?;
    let mut querier = pool.get_querier().await?;

    let result = match args.op {
        Operation::FindMany => querier.find_many(&entity, &query).await.map(|rows| json!(rows)),
        Operation::FindOne => querier.find_one(&entity, &query).await.map(|row| json!(row)),
        Operation::Count => querier
            .count(&entity, query.filter.as_ref())
            .await
            .map(|count| json!({ "count": count })),
        Operation::InsertMany => match parse_payloads(args.payload.as_deref()) {
            Ok(payloads) => querier
                .insert_many(&entity, &payloads)
                .await
                .map(|ids| json!({ "ids": ids })),
            Err(e) => Err(e),
        },
        Operation::UpdateMany => match single_payload(args) {
            Ok(payload) => querier
                .update_many(&entity, &query, &payload)
                .await
                .map(|affected| json!({ "affected": affected })),
            Err(e) => Err(e),
        },
        Operation::DeleteMany => querier
            .delete_many(&entity, &query)
            .await
            .map(|affected| json!({ "affected": affected })),
        Operation::UpsertMany => match parse_payloads(args.payload.as_deref()) {
            Ok(payloads) => querier
                .upsert_many(&entity, &args.conflict_paths, &payloads)
                .await
                .map(|affected| json!({ "affected": affected })),
            Err(e) => Err(e),
        },
    };

    querier.release()?;
    result
}

async fn run(config: &Config) -> DbResult<JsonValue> {
    let registry = load_registry(config)?;
    info!(entities = registry.len(), "Loaded entity definitions");

    match &config.command {
        Command::Render { dialect, args } => render(&registry, *dialect, args),
        Command::Exec { database, args } => {
            let db_config = DatabaseConfig::parse(database)?;
            info!(dialect = %db_config.dialect, "Connecting to database");
            let pool = Pool::connect(db_config, Arc::new(registry)).await?;
            let result = exec(&pool, args).await;
            pool.close().await;
            result
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    match run(&config).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Operation failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Suggestion: {suggestion}");
            }
            Err(e.into())
        }
    }
}
