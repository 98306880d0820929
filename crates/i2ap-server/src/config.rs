//! Configuration management
//!
//! All settings come from `I2AP_*` environment variables (optionally seeded
//! from a `.env` file). Unset or empty variables fall back to the defaults
//! below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::events::EventLogKind;
use crate::storage::config::StorageSettings;
use crate::warehouse::config::MartSettings;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 3101;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default directory holding `{object}.json` table layouts.
pub const DEFAULT_DDL_DIRECTORY: &str = "./ddl";

/// Default directory holding `{object}.sql` query templates.
pub const DEFAULT_SQL_DIRECTORY: &str = "./sql";

/// Default Salesforce REST API version.
pub const DEFAULT_SALESFORCE_API_VERSION: &str = "58.0";

/// Default CORS allowed origin.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "*";

/// Where `filelog` job events are written
pub const DEFAULT_EVENT_LOG_DIRECTORY: &str = "./logs/events";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub project: ProjectConfig,
    pub buckets: BucketConfig,
    pub storage: StorageSettings,
    pub mart: MartSettings,
    pub salesforce: SalesforceSettings,
    pub events: EventSettings,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Shared secret expected in the `Tt-I2ap-Id` / `Tt-I2ap-Sec` headers
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Warehouse project and template locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_id: String,
    pub dataset: String,
    pub ddl_dir: PathBuf,
    pub sql_dir: PathBuf,
}

/// Buckets used by the services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Incoming files for FileToDb
    pub stage: String,
    /// Processed files are moved here
    pub archive: String,
    /// Job-state records
    pub state: String,
}

/// Salesforce credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct SalesforceSettings {
    pub user: String,
    pub password: String,
    pub token: String,
    pub sandbox: bool,
    pub api_version: String,
    /// Overrides the login host, mostly for tests
    pub login_url: Option<String>,
}

impl std::fmt::Debug for SalesforceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceSettings")
            .field("user", &self.user)
            .field("sandbox", &self.sandbox)
            .field("api_version", &self.api_version)
            .field("login_url", &self.login_url)
            .finish_non_exhaustive()
    }
}

impl SalesforceSettings {
    pub fn is_configured(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

/// Job event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    pub kind: EventLogKind,
    pub log_name: Option<String>,
    /// Directory of the daily event files, used by `filelog` only
    pub directory: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse().ok());
        let flag = |key: &str| {
            var(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y"))
                .unwrap_or(false)
        };

        // A non-empty override port wins over the regular one
        let port = var("I2AP_OVERRIDE_PORT")
            .or_else(|| var("I2AP_PORT"))
            .map(|p| {
                p.trim()
                    .parse::<u16>()
                    .map_err(|_| anyhow::anyhow!("Invalid port: {}", p))
            })
            .transpose()?
            .unwrap_or(DEFAULT_SERVER_PORT);

        let config = Config {
            server: ServerConfig {
                host: var("I2AP_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port,
                shutdown_timeout_secs: parsed("I2AP_SHUTDOWN_TIMEOUT")
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            cors: CorsConfig {
                allowed_origins: var("I2AP_CORS_ORIGINS")
                    .unwrap_or_else(|| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            auth: AuthConfig {
                client_id: var("I2AP_CLIENT_ID").unwrap_or_default(),
                client_secret: var("I2AP_CLIENT_SECRET").unwrap_or_default(),
            },
            project: ProjectConfig {
                project_id: var("I2AP_PROJECT_ID").unwrap_or_default(),
                dataset: var("I2AP_DATASET").unwrap_or_default(),
                ddl_dir: PathBuf::from(
                    var("I2AP_DDL_DIRECTORY").unwrap_or_else(|| DEFAULT_DDL_DIRECTORY.to_string()),
                ),
                sql_dir: PathBuf::from(
                    var("I2AP_SQL_DIRECTORY").unwrap_or_else(|| DEFAULT_SQL_DIRECTORY.to_string()),
                ),
            },
            buckets: BucketConfig {
                stage: var("I2AP_STAGE_BUCKET").unwrap_or_default(),
                archive: var("I2AP_ARCHIVE_BUCKET").unwrap_or_default(),
                state: var("I2AP_STATE_BUCKET").unwrap_or_default(),
            },
            storage: StorageSettings::from_lookup(&var)?,
            mart: MartSettings::from_lookup(&var)?,
            salesforce: SalesforceSettings {
                user: var("I2AP_SALESFORCE_USER").unwrap_or_default(),
                password: var("I2AP_SALESFORCE_PASSWORD").unwrap_or_default(),
                token: var("I2AP_SALESFORCE_TOKEN").unwrap_or_default(),
                sandbox: flag("I2AP_SALESFORCE_SANDBOX"),
                api_version: var("I2AP_SALESFORCE_VERSION")
                    .unwrap_or_else(|| DEFAULT_SALESFORCE_API_VERSION.to_string()),
                login_url: var("I2AP_SALESFORCE_LOGIN_URL"),
            },
            events: EventSettings {
                kind: var("I2AP_LOG_TYPE")
                    .map(|t| t.parse())
                    .transpose()?
                    .unwrap_or_default(),
                log_name: var("I2AP_LOG_NAME"),
                directory: PathBuf::from(
                    var("I2AP_EVENT_LOG_DIRECTORY")
                        .unwrap_or_else(|| DEFAULT_EVENT_LOG_DIRECTORY.to_string()),
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.auth.client_id.is_empty() || self.auth.client_secret.is_empty() {
            anyhow::bail!("I2AP_CLIENT_ID and I2AP_CLIENT_SECRET must both be set");
        }

        if self.buckets.state.is_empty() {
            anyhow::bail!("I2AP_STATE_BUCKET must be set; job status cannot be tracked without it");
        }

        if self.project.dataset.is_empty() {
            anyhow::bail!("I2AP_DATASET must be set");
        }

        self.mart.validate()?;

        if self.buckets.stage.is_empty() {
            tracing::warn!("No stage bucket configured - FileToDb requests will fail");
        }

        if !self.salesforce.is_configured() {
            tracing::warn!("No Salesforce credentials configured - Sync requests will fail");
        }

        Ok(())
    }
}
