//! Arbor command line tool.
//!
//! ```bash
//! # Import leaves from a tabular file
//! arbor import --from items.csv --data-dir ./data --name items --trees 10 --dim 100 --bucket-size 50
//!
//! # Import leaves from a foreign dump, remapping positions to keys
//! arbor import --from items.ann --map keys.csv --data-dir ./data --name items --trees 10 --dim 100 --bucket-size 50
//!
//! # Summarize an existing store
//! arbor inspect --data-dir ./data --name items
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use arbor_common::{ForestConfig, StoreConfig};
use arbor_import::{ByteOrder, ImportOptions, LeafWriter, import_file};
use arbor_storage::{NodeKind, NodeStore};

/// Arbor - node store for random projection forests
#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Import and inspect Arbor node stores")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import items as leaf nodes
    Import {
        /// Input file (.csv for tabular rows, anything else is a foreign dump)
        #[arg(short, long)]
        from: PathBuf,

        /// Store directory
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Store name
        #[arg(short, long)]
        name: String,

        /// Number of trees
        #[arg(short, long)]
        trees: usize,

        /// Vector dimension
        #[arg(long)]
        dim: usize,

        /// Bucket threshold K
        #[arg(short = 'k', long)]
        bucket_size: usize,

        /// Key remap file (externalKey,foreignIndex), foreign dumps only
        #[arg(short, long)]
        map: Option<PathBuf>,

        /// Byte order of a foreign dump: little or big
        #[arg(long, default_value = "little")]
        byte_order: ByteOrder,

        /// Skip fsync after each write
        #[arg(long)]
        no_fsync: bool,
    },

    /// Print a summary of a store
    Inspect {
        /// Store directory
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Store name
        #[arg(short, long)]
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Import {
            from,
            data_dir,
            name,
            trees,
            dim,
            bucket_size,
            map,
            byte_order,
            no_fsync,
        } => {
            let config = StoreConfig {
                data_dir,
                name,
                forest: ForestConfig::new(trees, dim, bucket_size),
                fsync_enabled: !no_fsync,
            };
            let options = ImportOptions {
                dim,
                byte_order,
                remap: map,
            };
            run_import(&from, config, &options)
        }
        Commands::Inspect { data_dir, name } => run_inspect(data_dir, name),
    }
}

fn run_import(from: &std::path::Path, config: StoreConfig, options: &ImportOptions) -> Result<()> {
    let start = Instant::now();
    let store = NodeStore::open(config).context("failed to open store")?;
    let mut writer = LeafWriter::new(&store);

    let count = import_file(from, options, &mut writer)
        .with_context(|| format!("failed to import {}", from.display()))?;
    store.flush()?;

    println!(
        "Imported {} items from {} in {:.2?}",
        count,
        from.display(),
        start.elapsed()
    );
    Ok(())
}

fn run_inspect(data_dir: PathBuf, name: String) -> Result<()> {
    let config = StoreConfig::from_meta(data_dir, name).context("failed to read store meta")?;
    let store = NodeStore::open(config).context("failed to open store")?;

    let (mut leaves, mut buckets, mut internals, mut free) = (0u64, 0u64, 0u64, 0u64);
    for node in store.iter()? {
        let node = node.context("iteration stopped")?;
        if node.free {
            free += 1;
            continue;
        }
        match node.kind {
            NodeKind::Leaf { .. } => leaves += 1,
            NodeKind::Bucket { .. } => buckets += 1,
            NodeKind::Internal { .. } => internals += 1,
        }
    }

    let forest = store.forest();
    println!("Store:       {}", store.config().node_path().display());
    println!(
        "Forest:      {} trees, dim {}, bucket size {}",
        forest.trees, forest.dim, forest.bucket_size
    );
    println!("Record size: {} bytes", store.record_size());
    println!("Nodes:       {}", store.node_count()?);
    println!("  leaves:    {}", leaves);
    println!("  buckets:   {}", buckets);
    println!("  internal:  {}", internals);
    println!("  free:      {}", free);
    Ok(())
}
