//! Postgres connections for the listing and document stores
//!
//! The engine never writes. Vector and relational lookups issue raw
//! parameterized statements against [`DbPool::read`], which prefers the
//! read replica when one is configured.

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DbPool {
    primary: DatabaseConnection,
    replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

async fn connect(label: &str, url: &str, config: &DatabaseConfig) -> Result<DatabaseConnection> {
    info!(target_db = label, "Connecting to listings database");
    Database::connect(connect_options(url, config))
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("{} connection failed: {}", label, e),
        })
}

impl DbPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect("primary", &config.url, config).await?;
        let replica = match config.read_url {
            Some(ref url) => Some(connect("replica", url, config).await?),
            None => None,
        };

        Ok(Self { primary, replica })
    }

    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Readiness check over every open connection
    pub async fn ping(&self) -> Result<()> {
        let targets = std::iter::once(("primary", &self.primary))
            .chain(self.replica.as_ref().map(|conn| ("replica", conn)));

        for (label, conn) in targets {
            conn.execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("{} ping failed: {}", label, e),
                })?;
        }
        Ok(())
    }
}
