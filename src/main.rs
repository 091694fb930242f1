//! # Service Public BJ CLI (`spbj`)
//!
//! ## Usage
//!
//! ```bash
//! spbj --config ./config/spbj.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `spbj serve stdio` | MCP server over stdin/stdout |
//! | `spbj serve http` | REST tool endpoints plus `/mcp` |
//! | `spbj scrape` | Refresh catalogs from the live websites |
//! | `spbj status` | Catalog counts, optionally live provider status |
//! | `spbj providers` | Enabled providers in routing order |
//!
//! ## Examples
//!
//! ```bash
//! # Warm the cache for one provider and fetch a single service
//! spbj scrape --provider service-public-bj --query "passeport" --service-id PS00123
//!
//! # Serve MCP to a desktop client
//! spbj serve stdio
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use service_public_bj::bootstrap::AppContext;
use service_public_bj::config;
use service_public_bj::provider::SearchOptions;
use service_public_bj::{mcp, server};

/// Aggregates Beninese government-service websites behind MCP tools.
#[derive(Parser)]
#[command(
    name = "spbj",
    about = "Service Public BJ: government-service directory exposed as MCP tools",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/spbj.toml`. A missing file means defaults;
    /// environment variables override either.
    #[arg(long, global = true, default_value = "./config/spbj.toml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `service_public_bj=trace`. Falls back to `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a tool server.
    Serve {
        #[arg(value_enum, default_value = "stdio")]
        transport: Transport,
    },

    /// Refresh catalogs from the live websites, then save the snapshot.
    ///
    /// Categories are always refreshed. `--query` adds a live search and
    /// `--service-id` a live detail fetch.
    Scrape {
        /// Restrict to one provider id.
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        query: Option<String>,

        #[arg(long)]
        service_id: Option<String>,

        /// Maximum search results to fetch.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print catalog counts per provider.
    Status {
        #[arg(long)]
        provider: Option<String>,

        /// Also query each provider's live status.
        #[arg(long)]
        live: bool,
    },

    /// List enabled providers in routing order.
    Providers,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let cfg = config::load_config(&cli.config)?;
    let app = AppContext::boot(cfg).await?;

    let outcome = run(&app, cli.command).await;
    app.shutdown().await?;
    outcome
}

async fn run(app: &AppContext, command: Commands) -> anyhow::Result<()> {
    let orchestrator = &app.orchestrator;
    match command {
        Commands::Serve { transport } => match transport {
            Transport::Stdio => mcp::run_stdio(app).await?,
            Transport::Http => server::run_server(app).await?,
        },
        Commands::Scrape {
            provider,
            query,
            service_id,
            limit,
        } => {
            let provider = provider.as_deref();
            let categories = orchestrator.list_categories(provider, None, true).await?;
            println!(
                "{}: {} categories ({})",
                categories.provider_id,
                categories.value.len(),
                categories.source.as_str()
            );
            print_warnings(&categories.warnings);

            if let Some(query) = query {
                let options = SearchOptions {
                    limit,
                    refresh: true,
                    ..SearchOptions::default()
                };
                let page = orchestrator.search_services(&query, provider, &options).await?;
                println!(
                    "{}: {} of {} results for \"{}\"",
                    page.provider_id,
                    page.value.results.len(),
                    page.value.total_results,
                    query
                );
                for service in &page.value.results {
                    println!("  {}  {}", service.id, service.title);
                }
                print_warnings(&page.warnings);
            }

            if let Some(service_id) = service_id {
                let details = orchestrator
                    .get_service_details(&service_id, provider, true)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
        }
        Commands::Status { provider, live } => {
            let ids: Vec<String> = match provider {
                Some(id) => vec![id],
                None => orchestrator.list_providers().into_iter().map(|d| d.id).collect(),
            };
            for id in &ids {
                let (categories, services, details) = app.catalog_counts(id);
                println!(
                    "{}: {} categories, {} services, {} details",
                    id, categories, services, details
                );
            }
            if live {
                let status = match ids.as_slice() {
                    [single] => orchestrator.scraper_status(Some(single.as_str())).await?,
                    _ => orchestrator.scraper_status(None).await?,
                };
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
        }
        Commands::Providers => {
            for descriptor in orchestrator.list_providers() {
                println!(
                    "{:<20} priority {:<5} {}",
                    descriptor.id, descriptor.priority, descriptor.name
                );
            }
        }
    }
    Ok(())
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  warning: {}", warning);
    }
}
