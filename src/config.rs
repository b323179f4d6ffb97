use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the meallog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration for food image storage
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Nutrition analysis provider configuration
    pub analysis: AnalysisConfig,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for food image storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for uploaded food images
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Public base URL for the bucket (CDN or public bucket).
    /// When set, resolved image URLs are `{public_base_url}/{key}` and do not
    /// expire; otherwise a presigned GET URL is issued.
    pub public_base_url: Option<String>,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Nutrition analysis provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the generative model API
    #[serde(default = "default_analysis_endpoint")]
    pub endpoint_url: String,
    /// Model identifier
    #[serde(default = "default_analysis_model")]
    pub model: String,
    /// API key for the analysis provider
    pub api_key: String,
    /// Instruction prompt sent alongside the image
    #[serde(default = "default_analysis_prompt")]
    pub prompt: String,
    /// Request timeout in seconds
    #[serde(default = "default_analysis_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Identity provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Base URL of the identity toolkit API
    #[serde(default = "default_identity_endpoint")]
    pub endpoint_url: String,
    /// API key for the identity provider
    pub api_key: String,
    /// Request timeout in seconds
    #[serde(default = "default_identity_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// API configuration for the HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "meallog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "food-images".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    86400 // 24 hours
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_analysis_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_analysis_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_analysis_prompt() -> String {
    "This is a picture of food. Analyze it and reply with a single JSON object \
     with the keys: calories (kcal), protein (grams), carbs (grams), fat (grams) \
     and description (a short sentence describing the dish). Reply with the JSON \
     object only."
        .to_string()
}

fn default_analysis_timeout_secs() -> u64 {
    30
}

fn default_identity_endpoint() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_identity_timeout_secs() -> u64 {
    10
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "meallog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/meallog").required(false))
            .add_source(config::File::with_name("/etc/meallog/meallog").required(false))
            // Override with environment variables
            // MEALLOG__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("MEALLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Get analysis request timeout as Duration
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis.request_timeout_secs)
    }

    /// Get identity request timeout as Duration
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_key_prefix(), "food-images");
        assert_eq!(default_presigned_url_expiry_secs(), 86400);
        assert_eq!(default_analysis_model(), "gemini-1.5-flash");
        assert_eq!(default_max_upload_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config {
            service: ServiceConfig::default(),
            s3: S3Config {
                bucket: "meals".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
                key_prefix: default_key_prefix(),
                public_base_url: None,
                presigned_url_expiry_secs: 60,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/meallog".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_secs: 5,
                idle_timeout_secs: 600,
                run_migrations: true,
            },
            analysis: AnalysisConfig {
                endpoint_url: default_analysis_endpoint(),
                model: default_analysis_model(),
                api_key: "key".to_string(),
                prompt: default_analysis_prompt(),
                request_timeout_secs: 30,
            },
            identity: IdentityConfig {
                endpoint_url: default_identity_endpoint(),
                api_key: "key".to_string(),
                request_timeout_secs: 10,
            },
            api: ApiConfig {
                host: default_api_host(),
                port: default_api_port(),
                cors_enabled: true,
                cors_origins: vec![],
                max_upload_bytes: default_max_upload_bytes(),
            },
        };

        assert_eq!(config.presigned_url_expiry(), Duration::from_secs(60));
        assert_eq!(config.db_connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.analysis_timeout(), Duration::from_secs(30));
    }
}
