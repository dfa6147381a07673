//! llmpool - LLM provider pools with priority failover

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmpool::config::{Config, KeySource};
use llmpool::pool::{PoolManager, PoolType};
use llmpool::storage::{self, providers};

#[derive(Parser)]
#[command(name = "llmpool")]
#[command(about = "LLM provider pools with priority failover")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Print the ordered channels of each pool
    Channels {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Only this pool (metadata or analysis)
        #[arg(short, long)]
        pool: Option<String>,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("llmpool={},tower_http=info", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn report_key_sources(key_sources: &[(String, KeySource)]) {
    for (name, source) in key_sources {
        match source {
            KeySource::None => tracing::warn!(provider = %name, "No API key configured"),
            _ => tracing::info!(provider = %name, source = %source, "API key resolved"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "Loaded configuration");
            report_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            llmpool::api::run_server(cfg).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;

            println!("Configuration OK: {}", config);
            println!("  listen:      {}", cfg.server.listen);
            println!("  database:    {}", cfg.database().path);
            println!("  max_retries: {}", cfg.router.max_retries);
            println!("  providers:   {}", cfg.providers.len());
            for (name, source) in &key_sources {
                println!("    {:<24} key: {}", name, source);
            }
            Ok(())
        }

        Commands::Channels { config, pool } => {
            let (cfg, _) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);

            let targets = match pool {
                Some(name) => vec![name.parse::<PoolType>()?],
                None => PoolType::ALL.to_vec(),
            };

            let db = storage::init_pool(&cfg.database().path).await?;
            providers::import_seed(&db, &cfg.providers).await?;
            let manager = PoolManager::new(db);

            for pool in targets {
                let snapshot = manager.rebuild(pool).await?;
                println!("{} ({} channels)", pool, snapshot.len());
                for (position, channel) in snapshot.channels.iter().enumerate() {
                    println!(
                        "  {:>2}. {:<40} {:<10} primary={:<5} priority={} weight={}",
                        position + 1,
                        channel.id,
                        channel.api_family.as_str(),
                        channel.is_primary,
                        channel.priority,
                        channel.weight
                    );
                }
            }
            Ok(())
        }
    }
}
