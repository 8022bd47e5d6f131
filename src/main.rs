use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use persona_prompt_cache::cache::spawn_maintenance;
use persona_prompt_cache::connection::{HealthCheckConfig, Neo4jSettings};
use persona_prompt_cache::{CacheConfig, LanguageCode, Neo4jClient, Neo4jEntryStore, PromptCache};

#[derive(Parser)]
#[command(name = "prompt-cache")]
#[command(about = "Operator tool for the affinity-aware prompt cache", long_about = None)]
struct Cli {
    /// Neo4j URI
    #[arg(long, env = "NEO4J_URI")]
    uri: Option<String>,

    /// Neo4j database
    #[arg(long, env = "NEO4J_DATABASE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check database connectivity
    Health,

    /// Look up the cached prompt for a relationship state
    Lookup {
        user_id: String,
        character_id: String,

        /// Affinity level (0-100)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        affinity_level: u8,

        /// Language code (ja, en, ko, zh)
        #[arg(default_value = "ja")]
        language: LanguageCode,
    },

    /// Prune stale, expired and never-reused entries
    Cleanup {
        /// Prune entries unused for this many days
        #[arg(short, long)]
        days_old: Option<u32>,
    },

    /// Drop every entry generated against a superseded character version
    Invalidate {
        character_id: String,

        /// The version that was replaced
        old_version: u32,
    },

    /// Show usage analytics
    Stats {
        /// Trailing window in days
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Run maintenance once, or keep running it on the configured interval
    Maintain {
        #[arg(long)]
        watch: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_cache(client: &Neo4jClient) -> Result<PromptCache> {
    let store = Neo4jEntryStore::from_client(client);
    store.ensure_schema().await?;

    let config = CacheConfig::from_env()?;
    Ok(PromptCache::new(config, Arc::new(store))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "persona_prompt_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut settings = Neo4jSettings::from_env();
    if let Some(uri) = cli.uri {
        settings.uri = uri;
    }
    if let Some(database) = cli.database {
        settings.database = database;
    }

    let client = Neo4jClient::connect(&settings, HealthCheckConfig::default())
        .await
        .with_context(|| format!("connecting to {}", settings.uri))?;

    match cli.command {
        Commands::Health => {
            let result = client.health_check_with_retry().await;
            print_json(&result)?;
            std::process::exit(result.status.exit_code());
        }

        Commands::Lookup {
            user_id,
            character_id,
            affinity_level,
            language,
        } => {
            let cache = open_cache(&client).await?;
            let entry = cache
                .lookup(&user_id, &character_id, affinity_level, language)
                .await?;
            print_json(&entry)?;
        }

        Commands::Cleanup { days_old } => {
            let cache = open_cache(&client).await?;
            let deleted = cache.cleanup(days_old).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }

        Commands::Invalidate {
            character_id,
            old_version,
        } => {
            let cache = open_cache(&client).await?;
            let deleted = cache.invalidate(&character_id, old_version).await?;
            print_json(&serde_json::json!({
                "character_id": character_id,
                "version": old_version,
                "deleted": deleted,
            }))?;
        }

        Commands::Stats { days } => {
            let cache = open_cache(&client).await?;
            print_json(&cache.usage_stats(days).await?)?;
        }

        Commands::Maintain { watch } => {
            let cache = Arc::new(open_cache(&client).await?);

            if watch {
                if !cache.config().enable_auto_cleanup {
                    anyhow::bail!("auto cleanup is disabled (PROMPT_CACHE_AUTO_CLEANUP=false)");
                }
                let handle = spawn_maintenance(cache.clone());
                tokio::signal::ctrl_c().await?;
                info!("Stopping maintenance");
                handle.abort();
                print_json(&cache.stats().await)?;
            } else {
                print_json(&cache.run_maintenance().await?)?;
            }
        }
    }

    Ok(())
}
