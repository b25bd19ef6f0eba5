//! Configuration management
//!
//! Everything is read from the environment (after loading a `.env` file when
//! present). `validate` reports every problem at once.

use anyhow::Context;
use sipflow_common::env;
use std::path::PathBuf;
use uuid::Uuid;

use crate::auth::ticket::{DEFAULT_TICKET_PREFIX, TICKET_TTL};
use crate::auth::AbacConfig;
use crate::bucket::BucketConfig;
use crate::childwf::ChildWorkflows;
use crate::ingest::{DEFAULT_TASK_QUEUE, DEFAULT_UPLOAD_MAX_SIZE};
use crate::oidc::{
    OidcConfig, DEFAULT_RETRY_BACKOFF_COEFFICIENT, DEFAULT_RETRY_INITIAL_INTERVAL,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_INTERVAL, DEFAULT_TOKEN_EXPIRY_LEEWAY,
};
use crate::sipsource::{RetentionPeriod, SipSourceConfig};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 9000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL, creating the file when missing.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sipflow.db?mode=rwc";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Workflow Engine Constants
// ============================================================================

/// Default address of the Temporal HTTP API.
pub const DEFAULT_TEMPORAL_ADDRESS: &str = "http://localhost:7243";

pub const DEFAULT_TEMPORAL_NAMESPACE: &str = "default";

// ============================================================================
// Bucket Prefixes
// ============================================================================

pub const INTERNAL_BUCKET_PREFIX: &str = "INTERNAL_BUCKET";
pub const UPLOAD_BUCKET_PREFIX: &str = "UPLOAD_BUCKET";
pub const SIP_SOURCE_BUCKET_PREFIX: &str = "SIP_SOURCE";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub temporal: TemporalConfig,
    pub upload: UploadConfig,
    pub internal_bucket: BucketConfig,
    pub sip_source: SipSourceConfig,
    pub storage: StorageConfig,
    pub child_workflows: Option<ChildWorkflows>,
}

/// Server-specific configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// API authentication
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    /// HS256 shared secret.
    pub jwt_secret: Option<String>,
    /// RS256 public key in PEM format.
    pub jwt_public_key: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub abac: AbacConfig,
    pub ticket_ttl_secs: u64,
    pub ticket_prefix: String,
}

#[derive(Debug, Clone)]
pub struct TemporalConfig {
    pub address: String,
    pub namespace: String,
    pub task_queue: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_size: u64,
    /// Seconds, negative means forever.
    pub retention_period_secs: i64,
    pub bucket: BucketConfig,
}

/// Storage API client
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub address: Option<String>,
    pub default_permanent_location_id: Option<Uuid>,
    pub oidc: OidcConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var_or("SIPFLOW_HOST", DEFAULT_SERVER_HOST),
                port: env::parse_or("SIPFLOW_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env::parse_or(
                    "SIPFLOW_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            database: DatabaseConfig {
                url: env::var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env::parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            cors: CorsConfig {
                allowed_origins: match env::list("CORS_ALLOWED_ORIGINS") {
                    origins if origins.is_empty() => vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                    origins => origins,
                },
                allow_credentials: env::parse_or("CORS_ALLOW_CREDENTIALS", true)?,
            },
            auth: AuthConfig::from_env()?,
            temporal: TemporalConfig {
                address: env::var_or("TEMPORAL_ADDRESS", DEFAULT_TEMPORAL_ADDRESS),
                namespace: env::var_or("TEMPORAL_NAMESPACE", DEFAULT_TEMPORAL_NAMESPACE),
                task_queue: env::var_or("TEMPORAL_TASK_QUEUE", DEFAULT_TASK_QUEUE),
            },
            upload: UploadConfig {
                max_size: env::parse_or("UPLOAD_MAX_SIZE", DEFAULT_UPLOAD_MAX_SIZE)?,
                retention_period_secs: env::parse_or("UPLOAD_RETENTION_PERIOD", -1)?,
                bucket: required_bucket(UPLOAD_BUCKET_PREFIX)?,
            },
            internal_bucket: required_bucket(INTERNAL_BUCKET_PREFIX)?,
            sip_source: SipSourceConfig {
                id: env::parse("SIP_SOURCE_ID")?,
                name: env::var("SIP_SOURCE_NAME"),
                bucket: BucketConfig::from_env(SIP_SOURCE_BUCKET_PREFIX)?,
                retention_period: RetentionPeriod::from_secs(env::parse_or(
                    "SIP_SOURCE_RETENTION_PERIOD",
                    -1,
                )?),
            },
            storage: StorageConfig::from_env()?,
            child_workflows: match env::var("SIPFLOW_CHILD_WORKFLOWS_FILE") {
                Some(path) => Some(
                    ChildWorkflows::load(PathBuf::from(&path))
                        .with_context(|| format!("load child workflows from {path}"))?,
                ),
                None => None,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration, reporting every problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        let errs = self.problems();
        if !errs.is_empty() {
            anyhow::bail!("invalid configuration: {}", errs.join("; "));
        }

        if self.cors.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("CORS allows every origin");
        }

        Ok(())
    }

    fn problems(&self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.server.port == 0 {
            errs.push("Server port must be greater than 0".to_string());
        }
        if self.database.url.is_empty() {
            errs.push("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            errs.push("Database max_connections must be greater than 0".to_string());
        }
        if self.upload.max_size == 0 {
            errs.push("Upload max size must be greater than 0".to_string());
        }

        errs.extend(self.auth.validate());
        errs.extend(self.storage.validate());
        errs.extend(self.sip_source.validate());
        if let Some(child_workflows) = &self.child_workflows {
            errs.extend(child_workflows.validate());
        }

        errs
    }
}

impl AuthConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            enabled: env::parse_or("AUTH_ENABLED", false)?,
            jwt_secret: env::var("AUTH_JWT_SECRET"),
            jwt_public_key: env::var("AUTH_JWT_PUBLIC_KEY"),
            issuer: env::var("AUTH_ISSUER"),
            audience: env::var("AUTH_AUDIENCE"),
            abac: AbacConfig {
                enabled: env::parse_or("AUTH_ABAC_ENABLED", false)?,
                claim_path: env::var_or("AUTH_ABAC_CLAIM_PATH", ""),
                claim_path_separator: env::var_or("AUTH_ABAC_CLAIM_PATH_SEPARATOR", ""),
                claim_value_prefix: env::var_or("AUTH_ABAC_CLAIM_VALUE_PREFIX", ""),
            },
            ticket_ttl_secs: env::parse_or("AUTH_TICKET_TTL_SECS", TICKET_TTL.as_secs())?,
            ticket_prefix: env::var_or("AUTH_TICKET_PREFIX", DEFAULT_TICKET_PREFIX),
        })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if !self.enabled {
            return errs;
        }
        match (&self.jwt_secret, &self.jwt_public_key) {
            (None, None) => errs.push("missing JWT secret or public key with auth. enabled".into()),
            (Some(_), Some(_)) => {
                errs.push("JWT secret and public key are mutually exclusive".into())
            },
            _ => {},
        }
        if self.abac.enabled && self.abac.claim_path.is_empty() {
            errs.push("missing ABAC claim path with ABAC enabled".into());
        }
        if self.ticket_ttl_secs == 0 {
            errs.push("Ticket TTL must be greater than 0".into());
        }
        errs
    }
}

impl StorageConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            address: env::var("STORAGE_ADDRESS"),
            default_permanent_location_id: env::parse("STORAGE_DEFAULT_PERMANENT_LOCATION_ID")?,
            oidc: OidcConfig {
                enabled: env::parse_or("STORAGE_OIDC_ENABLED", false)?,
                provider_url: env::var("STORAGE_OIDC_PROVIDER_URL"),
                token_url: env::var("STORAGE_OIDC_TOKEN_URL"),
                client_id: env::var("STORAGE_OIDC_CLIENT_ID"),
                client_secret: env::var("STORAGE_OIDC_CLIENT_SECRET"),
                scopes: env::list("STORAGE_OIDC_SCOPES"),
                audience: env::var("STORAGE_OIDC_AUDIENCE"),
                token_expiry_leeway_secs: env::parse_or(
                    "STORAGE_OIDC_TOKEN_EXPIRY_LEEWAY_SECS",
                    DEFAULT_TOKEN_EXPIRY_LEEWAY.as_secs() as i64,
                )?,
                retry_max_attempts: env::parse_or(
                    "STORAGE_OIDC_RETRY_MAX_ATTEMPTS",
                    DEFAULT_RETRY_MAX_ATTEMPTS,
                )?,
                retry_initial_interval_ms: env::parse_or(
                    "STORAGE_OIDC_RETRY_INITIAL_INTERVAL_MS",
                    DEFAULT_RETRY_INITIAL_INTERVAL.as_millis() as i64,
                )?,
                retry_max_interval_ms: env::parse_or(
                    "STORAGE_OIDC_RETRY_MAX_INTERVAL_MS",
                    DEFAULT_RETRY_MAX_INTERVAL.as_millis() as i64,
                )?,
                retry_backoff_coefficient: env::parse_or(
                    "STORAGE_OIDC_RETRY_BACKOFF_COEFFICIENT",
                    DEFAULT_RETRY_BACKOFF_COEFFICIENT,
                )?,
            },
        })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.address.is_none() {
            errs.push("missing storage API address".to_string());
        }
        if self.default_permanent_location_id.map_or(true, |id| id.is_nil()) {
            errs.push("missing storage default permanent location ID".to_string());
        }
        errs.extend(self.oidc.validate());
        errs
    }
}

fn required_bucket(prefix: &str) -> anyhow::Result<BucketConfig> {
    BucketConfig::from_env(prefix)?.with_context(|| {
        format!("missing bucket configuration, set {prefix}_URL or {prefix}_S3_BUCKET")
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            auth: AuthConfig {
                enabled: false,
                jwt_secret: None,
                jwt_public_key: None,
                issuer: None,
                audience: None,
                abac: AbacConfig::default(),
                ticket_ttl_secs: TICKET_TTL.as_secs(),
                ticket_prefix: DEFAULT_TICKET_PREFIX.to_string(),
            },
            temporal: TemporalConfig {
                address: DEFAULT_TEMPORAL_ADDRESS.to_string(),
                namespace: DEFAULT_TEMPORAL_NAMESPACE.to_string(),
                task_queue: DEFAULT_TASK_QUEUE.to_string(),
            },
            upload: UploadConfig {
                max_size: DEFAULT_UPLOAD_MAX_SIZE,
                retention_period_secs: -1,
                bucket: BucketConfig::Memory,
            },
            internal_bucket: BucketConfig::Memory,
            sip_source: SipSourceConfig::default(),
            storage: StorageConfig::default(),
            child_workflows: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SIPFLOW_PORT",
        "STORAGE_ADDRESS",
        "STORAGE_DEFAULT_PERMANENT_LOCATION_ID",
        "STORAGE_OIDC_ENABLED",
        "INTERNAL_BUCKET_URL",
        "UPLOAD_BUCKET_URL",
        "AUTH_ENABLED",
        "UPLOAD_RETENTION_PERIOD",
        "SIPFLOW_CHILD_WORKFLOWS_FILE",
    ];

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.storage.address = Some("http://localhost:8000".into());
        config.storage.default_permanent_location_id = Some(Uuid::new_v4());
        config
    }

    fn set_required_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
        std::env::set_var("STORAGE_ADDRESS", "http://localhost:8000");
        std::env::set_var(
            "STORAGE_DEFAULT_PERMANENT_LOCATION_ID",
            "f2cc963f-c14d-4eaa-b950-bd207189a1f1",
        );
        std::env::set_var("INTERNAL_BUCKET_URL", "mem://");
        std::env::set_var("UPLOAD_BUCKET_URL", "mem://");
    }

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_storage_settings_are_all_reported() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("missing storage API address"));
        assert!(err.contains("missing storage default permanent location ID"));
    }

    #[test]
    fn test_storage_oidc_problems_are_reported() {
        let mut config = valid_config();
        config.storage.oidc.enabled = true;
        config.storage.oidc.retry_max_attempts = -1;
        config.storage.oidc.retry_backoff_coefficient = 0.5;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("missing OIDC providerURL or tokenURL with storage OIDC auth. enabled"));
        assert!(err.contains("missing OIDC client credentials with storage OIDC auth. enabled"));
        assert!(err.contains("invalid storage OIDC retry max attempts, value must be >= 0"));
        assert!(err.contains("invalid storage OIDC retry backoff coefficient, value must be >= 1"));
    }

    #[test]
    fn test_auth_requires_a_key() {
        let mut config = valid_config();
        config.auth.enabled = true;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("missing JWT secret or public key with auth. enabled"));

        config.auth.jwt_secret = Some("secret".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_incomplete_sip_source() {
        let mut config = valid_config();
        config.sip_source.name = Some("minio".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("SIP source: missing ID"));
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        set_required_env();
        std::env::set_var("SIPFLOW_PORT", "9100");
        std::env::set_var("UPLOAD_RETENTION_PERIOD", "3600");

        let config = Config::load().unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.upload.retention_period_secs, 3600);
        assert_eq!(config.upload.bucket, BucketConfig::Memory);
        assert_eq!(config.temporal.task_queue, "global");
        assert!(!config.auth.enabled);
        assert!(config.child_workflows.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_values() {
        set_required_env();
        std::env::set_var("SIPFLOW_PORT", "not-a-port");
        assert!(Config::load().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_requires_buckets() {
        set_required_env();
        std::env::remove_var("INTERNAL_BUCKET_URL");
        let err = Config::load().unwrap_err().to_string();
        assert!(err.contains("INTERNAL_BUCKET_URL"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_child_workflows_file() {
        set_required_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("childwf.toml");
        std::fs::write(
            &path,
            r#"
[[child_workflows]]
type = "poststorage"
namespace = "default"
taskQueue = "poststorage"
workflowName = "poststorage"
"#,
        )
        .unwrap();
        std::env::set_var("SIPFLOW_CHILD_WORKFLOWS_FILE", &path);

        let config = Config::load().unwrap();
        assert_eq!(config.child_workflows.unwrap().child_workflows.len(), 1);
        clear_env();
    }
}
