//! Configuration management for PropForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! Component sections (analyzer, routing, memory, prompt) are defined next
//! to the component they configure and embedded here.

use crate::context::{
    AnalyzerConfig, EntityKind, MemoryConfig, PromptConfig, RoutingConfig, SourceKind,
};
use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Per-source lookup settings
    pub retrieval: RetrievalConfig,

    /// Which stores back the sources, and how entities become filters
    pub store: StoreConfig,

    pub analyzer: AnalyzerConfig,

    pub routing: RoutingConfig,

    pub memory: MemoryConfig,

    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Header carrying the pre-authenticated user role
    #[serde(default = "default_role_header")]
    pub role_header: String,

    /// Role assumed when the header is absent
    #[serde(default = "default_role")]
    pub default_role: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (per client address)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Timeout applied to every single source lookup
    #[serde(default = "default_source_timeout")]
    pub source_timeout_ms: u64,

    /// Results requested from each source
    #[serde(default = "default_results_per_source")]
    pub results_per_source: usize,
}

/// Store backend selection and entity filter bindings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `postgres` or `memory`
    #[serde(default = "default_store_provider")]
    pub provider: String,

    /// JSON fixtures seeding the in-memory stores
    pub fixtures_path: Option<String>,

    /// pgvector table holding every collection's documents
    #[serde(default = "default_documents_table")]
    pub documents_table: String,

    #[serde(default = "default_tables")]
    pub tables: Vec<TableSchema>,

    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionSchema>,
}

/// Maps an entity kind onto a table column or metadata key
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldBinding {
    pub entity: EntityKind,
    pub field: String,
}

/// Read contract of one relational table
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TableSchema {
    pub table: String,

    /// How extracted entities filter this table
    #[serde(default)]
    pub bindings: Vec<FieldBinding>,

    /// Columns rendered into the context text; empty renders every column
    #[serde(default)]
    pub display_columns: Vec<String>,

    pub order_by: Option<String>,

    #[serde(default)]
    pub order_desc: bool,
}

/// Metadata filter bindings of one vector collection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectionSchema {
    pub collection: String,

    #[serde(default)]
    pub bindings: Vec<FieldBinding>,
}

impl StoreConfig {
    pub fn table(&self, table: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn collection(&self, collection: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.collection == collection)
    }
}

/// `[a-z_][a-z0-9_]*`, the only identifiers allowed into SQL text
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_role_header() -> String { "X-User-Role".to_string() }
fn default_role() -> String { "guest".to_string() }
fn default_database_url() -> String { "postgres://localhost/propforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "propforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }
fn default_source_timeout() -> u64 { 800 }
fn default_results_per_source() -> usize { 5 }
fn default_store_provider() -> String { "postgres".to_string() }
fn default_documents_table() -> String { "documents".to_string() }

fn bind(entity: EntityKind, field: &str) -> FieldBinding {
    FieldBinding { entity, field: field.to_string() }
}

fn default_tables() -> Vec<TableSchema> {
    use EntityKind::*;

    vec![
        TableSchema {
            table: "listings".into(),
            bindings: vec![
                bind(BudgetRange, "price"),
                bind(BedroomCount, "bedrooms"),
                bind(Location, "community"),
                bind(PropertyType, "property_type"),
                bind(TransactionType, "listing_type"),
            ],
            display_columns: vec![
                "title".into(), "community".into(), "property_type".into(),
                "bedrooms".into(), "price".into(), "listing_type".into(),
            ],
            order_by: Some("price".into()),
            order_desc: false,
        },
        TableSchema {
            table: "transactions".into(),
            bindings: vec![
                bind(Location, "community"),
                bind(PropertyType, "property_type"),
                bind(BedroomCount, "bedrooms"),
            ],
            display_columns: vec![
                "community".into(), "property_type".into(), "bedrooms".into(),
                "price".into(), "price_per_sqft".into(), "transaction_date".into(),
            ],
            order_by: Some("transaction_date".into()),
            order_desc: true,
        },
        TableSchema {
            table: "developers".into(),
            bindings: vec![bind(DeveloperName, "name")],
            display_columns: vec![],
            order_by: None,
            order_desc: false,
        },
        TableSchema {
            table: "projects".into(),
            bindings: vec![bind(DeveloperName, "developer"), bind(Location, "community")],
            display_columns: vec![
                "name".into(), "developer".into(), "community".into(),
                "status".into(), "handover".into(), "starting_price".into(),
            ],
            order_by: None,
            order_desc: false,
        },
    ]
}

fn default_collections() -> Vec<CollectionSchema> {
    use EntityKind::*;

    vec![
        CollectionSchema { collection: "neighborhoods".into(), bindings: vec![bind(Location, "community")] },
        CollectionSchema { collection: "market_reports".into(), bindings: vec![bind(Location, "community")] },
        CollectionSchema { collection: "developer_profiles".into(), bindings: vec![bind(DeveloperName, "developer")] },
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            role_header: default_role_header(),
            default_role: default_role(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout(),
            results_per_source: default_results_per_source(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            fixtures_path: None,
            documents_table: default_documents_table(),
            tables: default_tables(),
            collections: default_collections(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Check cross-section consistency. Run once at startup.
    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.routing.validate()?;
        self.memory.validate()?;

        if self.server.request_timeout_secs == 0 || self.server.max_concurrent_requests == 0 {
            return Err(AppError::Configuration {
                message: "server.request_timeout_secs and max_concurrent_requests must be positive".into(),
            });
        }

        if self.retrieval.source_timeout_ms == 0 || self.retrieval.results_per_source == 0 {
            return Err(AppError::Configuration {
                message: "retrieval.source_timeout_ms and results_per_source must be positive".into(),
            });
        }

        match self.store.provider.as_str() {
            "postgres" | "memory" => {}
            other => {
                return Err(AppError::Configuration {
                    message: format!("unknown store.provider '{}'", other),
                })
            }
        }

        if !is_valid_identifier(&self.store.documents_table) {
            return Err(invalid_identifier("store.documents_table", &self.store.documents_table));
        }

        for source in self.routing.all_sources() {
            if source.kind == SourceKind::Relational && !is_valid_identifier(&source.source_id) {
                return Err(invalid_identifier("relational source", &source.source_id));
            }
        }

        for table in &self.store.tables {
            let columns = table
                .bindings
                .iter()
                .map(|b| &b.field)
                .chain(table.display_columns.iter())
                .chain(table.order_by.iter());
            for name in std::iter::once(&table.table).chain(columns) {
                if !is_valid_identifier(name) {
                    return Err(invalid_identifier(&format!("table {}", table.table), name));
                }
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get per-source lookup timeout as Duration
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.source_timeout_ms)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

fn invalid_identifier(context: &str, name: &str) -> AppError {
    AppError::Configuration {
        message: format!("{}: '{}' is not a valid identifier", context, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.role_header, "X-User-Role");
        assert_eq!(config.retrieval.source_timeout_ms, 800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_config_files_load() {
        let base = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default");
        let config = AppConfig::from_file(base).unwrap();
        assert_eq!(config.store.provider, "postgres");
        assert_eq!(config.memory.prompt_turns, 6);
        assert_eq!(config.server.max_concurrent_requests, 100);
        assert_eq!(config.observability.service_name, "propforge-gateway");
        assert!(config.validate().is_ok());

        let dev = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/development");
        let config = AppConfig::from_file(dev).unwrap();
        assert_eq!(config.store.provider, "memory");
        assert_eq!(config.embedding.provider, "mock");
        // sections absent from the file keep their defaults
        assert_eq!(config.retrieval.results_per_source, 5);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/propforge");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("listings"));
        assert!(is_valid_identifier("_price_per_sqft2"));
        assert!(!is_valid_identifier("Listings"));
        assert!(!is_valid_identifier("2bed"));
        assert!(!is_valid_identifier("price; DROP TABLE listings"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_validate_rejects_bad_column() {
        let mut config = AppConfig::default();
        config.store.tables[0].order_by = Some("price desc".into());
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_server_limits() {
        let mut config = AppConfig::default();
        config.server.max_concurrent_requests = 0;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));

        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 0;
        assert!(config.validate().is_err());
        assert_eq!(AppConfig::default().request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = AppConfig::default();
        config.store.provider = "mongo".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config: AppConfig = Config::builder()
            .set_override("server.port", 9000)
            .unwrap()
            .set_override("memory.window_size", 4)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.memory.window_size, 4);
        assert_eq!(config.memory.decay_factor, 0.85);
        assert_eq!(config.routing.routes.len(), 8);
    }
}
