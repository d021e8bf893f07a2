//! Cost Reconciler
//!
//! Prices cluster compute usage against billed Azure costs when they are
//! available for the window, and against the public retail catalog
//! otherwise.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::FromEnv;
use domain_compute_cost::PricingTier;
use eyre::{Result, bail};
use serde_json::json;
use tracing::info;

mod bootstrap;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "cost-reconciler")]
#[command(about = "Reconcile cluster compute usage with Azure pricing")]
struct Cli {
    /// Print the Prometheus exposition to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cost records for every node array of the given clusters
    Cost {
        /// Cluster names. Defaults to CLUSTER_NAMES.
        #[arg(short, long, value_delimiter = ',')]
        clusters: Option<Vec<String>>,

        /// Window start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,
    },

    /// Which price source a window would use
    Strategy {
        #[arg(long)]
        start: DateTime<Utc>,

        #[arg(long)]
        end: DateTime<Utc>,
    },

    /// Retail rate of one SKU
    Rate {
        #[arg(long)]
        sku: String,

        #[arg(long)]
        region: String,

        /// regular, spot or lowpriority
        #[arg(long, default_value_t = PricingTier::Regular)]
        tier: PricingTier,
    },

    /// (SKU, region) pairs billed under a meter id
    Meter {
        #[arg(long)]
        meter_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    observability::init_metrics();

    let facade = bootstrap::build_facade(&config).await?;

    match cli.command {
        Commands::Cost {
            clusters,
            start,
            end,
        } => {
            if end <= start {
                bail!("--end must be after --start");
            }
            let clusters = clusters.unwrap_or_else(|| config.default_clusters.clone());
            if clusters.is_empty() {
                bail!("No clusters given: pass --clusters or set CLUSTER_NAMES");
            }

            info!(clusters = ?clusters, %start, %end, "Reconciling cluster costs");
            let records = facade.get_cluster_cost(&clusters, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::Strategy { start, end } => {
            let strategy = facade.select_strategy(start, end).await?;
            println!("{}", json!({ "strategy": strategy }));
        }

        Commands::Rate { sku, region, tier } => {
            let entry = facade.retail_rate(&sku, &region, tier).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }

        Commands::Meter { meter_id } => {
            let identities = facade.meter_identities(&meter_id).await?;
            println!("{}", serde_json::to_string_pretty(&identities)?);
        }
    }

    if cli.print_metrics {
        eprintln!("{}", observability::render_metrics());
    }

    Ok(())
}
