//! Neo4j connection management and health checks
//!
//! [`Neo4jClient`] owns the pooled `neo4rs::Graph` shared by the entry store
//! and the operator CLI.

use crate::error::{PromptCacheError, Result};
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Connection parameters
#[derive(Debug, Clone)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            database: "neo4j".to_string(),
            max_connections: 16,
            fetch_size: 500,
        }
    }
}

impl Neo4jSettings {
    /// Read `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD` and `NEO4J_DATABASE`,
    /// falling back to local defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| std::env::var(name).unwrap_or(fallback);

        Self {
            uri: var("NEO4J_URI", defaults.uri),
            user: var("NEO4J_USER", defaults.user),
            password: var("NEO4J_PASSWORD", defaults.password),
            database: var("NEO4J_DATABASE", defaults.database),
            ..defaults
        }
    }
}

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Attempts after the first failure
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Response time above which a responsive database counts as degraded
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            degraded_threshold_ms: 1000,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Database is healthy and responsive
    Healthy,
    /// Database is responsive but slow (above degraded threshold)
    Degraded,
    /// Database is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Process exit code for the operator CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => 0,
            HealthStatus::Unhealthy => 1,
        }
    }
}

/// Detailed health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub database_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, database_name: Option<String>, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            database_name,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            database_name: None,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }
}

/// Pooled Neo4j client
pub struct Neo4jClient {
    graph: Graph,
    health_config: HealthCheckConfig,
}

impl Neo4jClient {
    /// Connect with default pool and health check settings
    ///
    /// # Example
    /// ```no_run
    /// use persona_prompt_cache::Neo4jClient;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let client = Neo4jClient::new(
    ///         "bolt://localhost:7687",
    ///         "neo4j",
    ///         "password",
    ///         "neo4j"
    ///     ).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(uri: &str, user: &str, password: &str, database: &str) -> Result<Self> {
        let settings = Neo4jSettings {
            uri: uri.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
            ..Neo4jSettings::default()
        };
        Self::connect(&settings, HealthCheckConfig::default()).await
    }

    pub async fn connect(settings: &Neo4jSettings, health_config: HealthCheckConfig) -> Result<Self> {
        info!(
            "Connecting to Neo4j at {} (database: {})",
            settings.uri, settings.database
        );

        let config = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .db(settings.database.as_str())
            .fetch_size(settings.fetch_size)
            .max_connections(settings.max_connections)
            .build()
            .map_err(|e| PromptCacheError::ConfigError(e.to_string()))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| PromptCacheError::StoreUnavailable(e.to_string()))?;

        info!("Successfully connected to Neo4j");

        Ok(Self {
            graph,
            health_config,
        })
    }

    /// Simple health check using RETURN 1
    pub async fn health_check(&self) -> Result<bool> {
        debug!("Executing simple health check (RETURN 1)");

        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| PromptCacheError::StoreUnavailable(e.to_string()))?;

        debug!("Simple health check passed");
        Ok(true)
    }

    /// Health check using `CALL db.info()`. Never fails; errors are captured
    /// in the result.
    pub async fn health_check_detailed(&self) -> HealthCheckResult {
        debug!("Executing detailed health check (CALL db.info())");
        let start = Instant::now();

        match self.graph.execute(query("CALL db.info()")).await {
            Ok(mut result) => {
                let elapsed = start.elapsed();

                match result.next().await {
                    Ok(Some(row)) => {
                        let db_name: Option<String> = row.get("name").ok();
                        debug!("Detailed health check passed ({}ms)", elapsed.as_millis());
                        HealthCheckResult::healthy(elapsed, db_name, self.health_config.degraded_threshold_ms)
                    }
                    Ok(None) => {
                        error!("Detailed health check returned no results");
                        HealthCheckResult::unhealthy(elapsed, "No result returned from db.info()")
                    }
                    Err(e) => {
                        error!("Detailed health check failed to read results: {}", e);
                        HealthCheckResult::unhealthy(elapsed, &format!("Failed to read results: {}", e))
                    }
                }
            }
            Err(e) => {
                let elapsed = start.elapsed();
                error!("Detailed health check query failed: {}", e);
                HealthCheckResult::unhealthy(elapsed, &format!("Query execution failed: {}", e))
            }
        }
    }

    /// Detailed health check, retried while unhealthy
    pub async fn health_check_with_retry(&self) -> HealthCheckResult {
        let mut retry_count = 0;

        loop {
            let mut result = self.health_check_detailed().await;

            if result.status.is_operational() || retry_count >= self.health_config.max_retries {
                result.retry_count = retry_count;
                return result;
            }

            retry_count += 1;
            warn!(
                "Health check failed (attempt {}/{}), retrying after {:?}",
                retry_count,
                self.health_config.max_retries + 1,
                self.health_config.retry_delay
            );
            tokio::time::sleep(self.health_config.retry_delay).await;
        }
    }

    /// Underlying graph handle, cheap to clone
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.health_config
    }
}
