use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::models::ChannelIdentity;

// =============================================================================
// Unified config (figment-deserialized from defaults / canal.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   canal.toml:      [auth]
//                    enabled = true
//
//   env var:         CANAL_AUTH__ENABLED=true   (double underscore = nesting)
//
//   (single underscore stays within field names: CANAL_CLIENT__PAGE_SIZE)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Auth-related tunables (lives under `[auth]` in canal.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Credential table under `[auth.tokens]`: bearer token → the identity it
    /// speaks for, e.g. `"s3cret" = "psychologist:4"`.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Server tuning knobs (lives under `[server]` in canal.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Client tunables (lives under `[client]` in canal.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Identity to connect as, e.g. "admin" or "psychologist:3".
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// How often the degraded-link poller reconciles while the socket is down.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            identity: None,
            token: None,
            page_size: default_page_size(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

fn default_max_message_bytes() -> usize {
    4096
}
fn default_server_url() -> String {
    "http://127.0.0.1:7740".to_string()
}
fn default_page_size() -> i64 {
    50
}
fn default_resync_interval_secs() -> u64 {
    20
}

/// Build a figment that layers: defaults → canal.toml → CANAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CANAL_AUTH__ENABLED=true`  →  `auth.enabled = true`
///   `CANAL_CLIENT__SERVER_URL=...`  →  `client.server_url = ...`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("canal.toml")))
        .merge(Env::prefixed("CANAL_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the binary)
// =============================================================================

/// Authentication configuration (runtime view, identities pre-parsed).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Whether the server checks bearer credentials at all
    pub enabled: bool,
    pub tokens: HashMap<String, ChannelIdentity>,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Result<Self> {
        let mut tokens = HashMap::new();
        for (token, identity) in &fc.tokens {
            let identity = identity.parse::<ChannelIdentity>().map_err(|e| {
                anyhow::anyhow!("Invalid identity in [auth.tokens]: {}", e)
            })?;
            tokens.insert(token.clone(), identity);
        }
        Ok(Self {
            enabled: fc.enabled,
            tokens,
        })
    }
}

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Reject message bodies longer than this many bytes
    pub max_message_bytes: usize,
    /// Channel capacity for frames queued to one socket
    pub send_channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            max_message_bytes: fc.max_message_bytes,
            send_channel_capacity: 100,
        }
    }
}

/// Client runtime view used by the CLI commands.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: String,
    pub identity: Option<String>,
    pub token: Option<String>,
    pub page_size: i64,
    pub resync_interval: Duration,
}

impl ClientConfig {
    pub fn from_file(fc: &ClientFileConfig) -> Self {
        Self {
            server_url: fc.server_url.trim_end_matches('/').to_string(),
            identity: fc.identity.clone(),
            token: fc.token.clone(),
            page_size: fc.page_size,
            resync_interval: Duration::from_secs(fc.resync_interval_secs.max(1)),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct CanalConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl CanalConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = custom_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not find home directory")
                .join(".canal")
        });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("canal.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("canal.toml")
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }
}
