//! Mirrorgraph CLI: mirror a REST API into a local SQLite-backed graph.
//!
//! Usage:
//!   mirrorgraph fetch <entity> [--where key=value]... [--limit N] [--config path] [--db path]
//!   mirrorgraph show <entity>
//!   mirrorgraph get <entity> <id>
//!   mirrorgraph clear

use clap::{Parser, Subcommand};
use mirrorgraph::graph::{AttributeType, EntityDescriptor};
use mirrorgraph::{
    Config, FetchRequest, IncrementalStore, ManagedObject, OpenStore, Predicate, PropertyValue, ResourceId,
    SqliteStore, StoreContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mirrorgraph",
    version,
    about = "Incrementally synchronized local mirror of a REST API"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to config file (default: $XDG_CONFIG_HOME/mirrorgraph/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an entity from the server and print the merged objects
    Fetch {
        entity: String,
        /// Equality filter, repeatable
        #[arg(long = "where", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the locally mirrored objects of an entity, without the network
    Show { entity: String },
    /// Load one object by resource identifier
    Get { entity: String, id: String },
    /// Delete the mirrored objects of the configured context
    Clear,
}

fn open_store(cli: &Cli) -> Result<(IncrementalStore, Arc<StoreContext>), String> {
    let config = Config::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let model = config.model().map_err(|e| e.to_string())?;
    let transport = config.transport().map_err(|e| e.to_string())?;

    let mut store = IncrementalStore::new(
        model,
        Arc::new(config.adapter()),
        Arc::new(transport),
        config.store.clone(),
    )
    .map_err(|e| e.to_string())?;

    if let Some(db_path) = cli.db.clone().or_else(Config::default_database_path) {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let backing = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
        store = store.with_backing_store(Arc::new(backing));
    }

    let context = store.root_context().map_err(|e| e.to_string())?;
    Ok((store, context))
}

/// Typed filter value, so local re-queries compare like with like
fn filter_value(kind: Option<AttributeType>, raw: &str) -> PropertyValue {
    match kind {
        Some(AttributeType::Integer) => raw.parse::<i64>().map(PropertyValue::from).ok(),
        Some(AttributeType::Float) => raw.parse::<f64>().map(PropertyValue::Float).ok(),
        Some(AttributeType::Boolean) => raw.parse::<bool>().map(PropertyValue::from).ok(),
        _ => None,
    }
    .unwrap_or_else(|| PropertyValue::from(raw))
}

fn parse_filters(entity: &EntityDescriptor, filters: &[String]) -> Result<Option<Predicate>, String> {
    let terms = filters
        .iter()
        .map(|filter| {
            filter
                .split_once('=')
                .map(|(key, value)| Predicate::equals(key, filter_value(entity.attribute(key), value)))
                .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", filter))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match terms.len() {
        0 => None,
        1 => terms.into_iter().next(),
        _ => Some(Predicate::And(terms)),
    })
}

fn print_object(object: &ManagedObject) {
    let attributes: serde_json::Map<String, serde_json::Value> = object
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    let line = serde_json::json!({
        "entity": object.entity,
        "id": object.resource_id.as_ref().map(|r| r.as_str()),
        "materialized": object.attributes_materialized,
        "attributes": attributes,
    });
    println!("{}", line);
}

async fn cmd_fetch(
    store: &IncrementalStore,
    context: &Arc<StoreContext>,
    entity: &str,
    filters: &[String],
    limit: Option<usize>,
) -> i32 {
    let Some(descriptor) = store.model().entity(entity) else {
        eprintln!("Error: unknown entity '{}'", entity);
        return 1;
    };
    let mut request = FetchRequest::new(entity);
    match parse_filters(descriptor, filters) {
        Ok(Some(predicate)) => request = request.with_predicate(predicate),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    }
    if let Some(limit) = limit {
        request = request.limit(limit);
    }

    match store.fetch(context, request).await {
        Ok(outcome) => {
            for object in &outcome.result.objects {
                print_object(object);
            }
            if !outcome.report.is_clean() {
                eprintln!(
                    "Warning: {} fields skipped, {} representations rejected",
                    outcome.report.conflicts.len(),
                    outcome.report.rejected.len()
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_show(store: &IncrementalStore, context: &StoreContext, entity: &str) -> i32 {
    if store.model().entity(entity).is_none() {
        eprintln!("Error: unknown entity '{}'", entity);
        return 1;
    }
    let result = context.execute(&FetchRequest::new(entity));
    for object in &result.objects {
        print_object(object);
    }
    0
}

async fn cmd_get(store: &IncrementalStore, context: &Arc<StoreContext>, entity: &str, id: &str) -> i32 {
    let object_id = match store.reference(context, entity, &ResourceId::from(id)) {
        Ok(object_id) => object_id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.materialize_attributes(context, object_id).await {
        Ok(object) => {
            print_object(&object);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_clear(store: &IncrementalStore, context: &StoreContext) -> i32 {
    match store.clear_persisted(context.name()) {
        Ok(count) => {
            println!("Cleared {} objects from context '{}'", count, context.name());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mirrorgraph=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (store, context) = match open_store(&cli) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Fetch {
            entity,
            filters,
            limit,
        } => cmd_fetch(&store, &context, entity, filters, *limit).await,
        Commands::Show { entity } => cmd_show(&store, &context, entity),
        Commands::Get { entity, id } => cmd_get(&store, &context, entity, id).await,
        Commands::Clear => cmd_clear(&store, &context),
    };
    std::process::exit(code);
}
