//! # KaguraDB CLI
//!
//! Thin driver over a snapshot file: each invocation opens the blob,
//! runs one operation, and saves it back when the operation mutated.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use kagura_core::config::DatabaseConfig;
use kagura_core::value::Value;
use kagura_index::{IndexKind, IndexOptions};
use kagura_query::QueryOptions;
use kagura_storage::Database;

#[derive(Parser)]
#[command(name = "kagura")]
#[command(about = "KaguraDB - embeddable document store with dual indexes")]
struct Cli {
    /// Snapshot file backing the store
    #[arg(long, global = true, default_value = "kagura.db")]
    db: PathBuf,

    /// Passphrase for sealed snapshots
    #[arg(long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Equality,
    Ordered,
    Both,
}

impl From<KindArg> for IndexKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Equality => IndexKind::Equality,
            KindArg::Ordered => IndexKind::Ordered,
            KindArg::Both => IndexKind::Both,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print store statistics
    Stats,
    /// Create a collection
    CreateCollection { name: String },
    /// Drop a collection and all its indexes
    DropCollection { name: String },
    /// Insert a JSON document
    Insert { collection: String, json: String },
    /// Find documents matching a JSON filter
    Find {
        collection: String,
        #[arg(default_value = "{}")]
        filter: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents matching a JSON filter
    Count {
        collection: String,
        #[arg(default_value = "{}")]
        filter: String,
    },
    /// Delete documents matching a JSON filter
    Delete { collection: String, filter: String },
    /// Create an index on a field
    CreateIndex {
        collection: String,
        field: String,
        #[arg(long, value_enum, default_value_t = KindArg::Both)]
        kind: KindArg,
        #[arg(long)]
        unique: bool,
        #[arg(long, default_value_t = 1)]
        shards: usize,
    },
    /// List the indexes on a collection
    ListIndexes { collection: String },
}

fn parse_json(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("failed to parse {what} as JSON"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DatabaseConfig::default();
    config.snapshot.path = Some(cli.db.clone());
    config.snapshot.passphrase = cli.passphrase.clone();
    let db = Database::open(config)?;

    match cli.command {
        Commands::Stats => {
            let stats = db.stats();
            println!("memory: {} bytes", stats.memory_usage);
            for collection in &stats.collections {
                println!(
                    "collection {}: {} documents, {} bytes",
                    collection.name, collection.documents, collection.size_bytes
                );
            }
            for index in &stats.indexes {
                println!(
                    "index {}.{}: {:?}, {} entries, {} bytes",
                    index.descriptor.collection,
                    index.descriptor.field,
                    index.descriptor.kind,
                    index.entries,
                    index.size_bytes
                );
            }
            println!(
                "queries: {} ({} cache hits, mean probe length {:.2})",
                stats.counters.queries_executed, stats.query_cache.hits, stats.probe_lengths.mean
            );
        }
        Commands::CreateCollection { name } => {
            db.create_collection(&name, None)?;
            db.save()?;
            println!("created collection {name}");
        }
        Commands::DropCollection { name } => {
            db.drop_collection(&name)?;
            db.save()?;
            println!("dropped collection {name}");
        }
        Commands::Insert { collection, json } => {
            let body = parse_json(&json, "document")?;
            let id = db.insert(&collection, body)?;
            db.save()?;
            println!("{id}");
        }
        Commands::Find {
            collection,
            filter,
            limit,
        } => {
            let filter = parse_json(&filter, "filter")?;
            let mut options = QueryOptions::default();
            options.limit = limit;
            for doc in db.find(&collection, &filter, &options)? {
                println!("{}\t{}", doc.id, doc.body);
            }
        }
        Commands::Count { collection, filter } => {
            let filter = parse_json(&filter, "filter")?;
            println!("{}", db.count(&collection, &filter)?);
        }
        Commands::Delete { collection, filter } => {
            let filter = parse_json(&filter, "filter")?;
            let deleted = db.delete(&collection, &filter)?;
            db.save()?;
            println!("deleted {deleted}");
        }
        Commands::CreateIndex {
            collection,
            field,
            kind,
            unique,
            shards,
        } => {
            if shards > 1 && !shards.is_power_of_two() {
                bail!("--shards must be a power of two");
            }
            db.create_index(
                &collection,
                &field,
                IndexOptions {
                    kind: kind.into(),
                    unique,
                    shard_count: shards,
                },
            )?;
            db.save()?;
            println!("created index on {collection}.{field}");
        }
        Commands::ListIndexes { collection } => {
            for descriptor in db.list_indexes(&collection)? {
                println!(
                    "{}.{}: {:?}{}{}",
                    descriptor.collection,
                    descriptor.field,
                    descriptor.kind,
                    if descriptor.unique { ", unique" } else { "" },
                    if descriptor.shard_count > 1 {
                        format!(", {} shards", descriptor.shard_count)
                    } else {
                        String::new()
                    }
                );
            }
        }
    }
    Ok(())
}
