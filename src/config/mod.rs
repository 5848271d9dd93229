//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod fulfillment;
mod server;

pub use fulfillment::FulfillmentConfig;
pub use server::ServerConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "AUTOGROCER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "AUTOGROCER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "AUTOGROCER_LOG";
/// Environment variable carrying the shared secret for ordering webhooks.
pub const INTERNAL_SECRET_ENV_VAR: &str = "INTERNAL_SECRET";

use serde::Deserialize;

use crate::coordination::CoordinationConfig;
use crate::dispatch::DispatchConfig;
use crate::fleet::FleetConfig;
use crate::ledger::LedgerConfig;
use crate::services::SweeperConfig;
use crate::settlement::SettlementConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// gRPC listener.
    pub server: ServerConfig,
    /// Stock ledger backend.
    pub ledger: LedgerConfig,
    /// Per-order coordination store backend.
    pub coordination: CoordinationConfig,
    /// Work order dispatch backend.
    pub dispatch: DispatchConfig,
    /// Pricing and ordering collaborators.
    pub settlement: SettlementConfig,
    /// Completion threshold and settlement deadline.
    pub fulfillment: FulfillmentConfig,
    /// Expired stock housekeeping.
    pub sweeper: SweeperConfig,
    /// Robot fleet (simulated in-process or remote workers).
    pub fleet: FleetConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Reject an in-process fleet whose size differs from the completion
    /// threshold. Each worker reports once per order, so a mismatch means
    /// orders settle early or never.
    pub fn check_simulated_fleet(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.fleet.simulate {
            return Ok(());
        }
        let workers = self.fleet.aisles.len() as u64;
        if workers != self.fulfillment.fleet_size {
            return Err(format!(
                "fleet.aisles lists {} workers but fulfillment.fleet_size is {}",
                workers, self.fulfillment.fleet_size
            )
            .into());
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
