use crate::dispatch::eligibility::EligibilityPolicy;
use crate::dispatch::model::OrderType;
use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for `location_freshness_minutes`, one week
const MAX_FRESHNESS_MINUTES: i64 = 7 * 24 * 60;

/// Main configuration for the dispatch engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub dispatch: DispatchSettings,
    pub timeouts: TimeoutConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchSettings {
    /// Locations older than this are treated as unknown
    pub location_freshness_minutes: i64,
    /// Order types that count toward `restricted_type_cap`
    pub restricted_types: Vec<OrderType>,
    /// Max simultaneous restricted-type orders per agent
    pub restricted_type_cap: usize,
    /// Max simultaneous active orders of any type per agent
    pub max_active_assignments: usize,
    /// Radius used when an order does not carry one
    pub default_radius_km: f64,
    /// Carrying capacity for agents registered without one
    pub default_capacity_kg: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    pub store_ms: u64,
    pub notification_ms: u64,
    /// How long shutdown waits for queued notifications
    pub shutdown_drain_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// JSON output instead of compact text
    pub json_logs: bool,
    pub metrics_enabled: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            location_freshness_minutes: 15,
            restricted_types: vec![OrderType::Food, OrderType::Fast],
            restricted_type_cap: 2,
            max_active_assignments: 5,
            default_radius_km: 5.0,
            default_capacity_kg: 20.0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_ms: 2_000,
            notification_ms: 3_000,
            shutdown_drain_ms: 10_000,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl DispatchSettings {
    pub fn policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            restricted_types: self.restricted_types.clone(),
            restricted_type_cap: self.restricted_type_cap,
            max_active_assignments: self.max_active_assignments,
        }
    }
}

impl TimeoutConfig {
    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn notification(&self) -> Duration {
        Duration::from_millis(self.notification_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

impl DispatchConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (courier-dispatch.toml, .courier-dispatch-rc)
    /// 3. Environment variables (COURIER_DISPATCH_DISPATCH__DEFAULT_RADIUS_KM=3.5)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`DispatchConfig::load`], resolving files relative to `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_path = dir.join("courier-dispatch.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".courier-dispatch-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("COURIER_DISPATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DispatchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;
        if dispatch.location_freshness_minutes <= 0
            || dispatch.location_freshness_minutes > MAX_FRESHNESS_MINUTES
        {
            bail!(
                "dispatch.location_freshness_minutes must be between 1 and {}",
                MAX_FRESHNESS_MINUTES
            );
        }
        if dispatch.default_radius_km.is_nan() || dispatch.default_radius_km <= 0.0 {
            bail!("dispatch.default_radius_km must be positive");
        }
        if dispatch.default_capacity_kg.is_nan() || dispatch.default_capacity_kg < 0.0 {
            bail!("dispatch.default_capacity_kg must not be negative");
        }
        if dispatch.max_active_assignments == 0 {
            bail!("dispatch.max_active_assignments must be at least 1");
        }
        if self.timeouts.store_ms == 0 || self.timeouts.notification_ms == 0 {
            bail!("timeouts must be non-zero");
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

static CONFIG: std::sync::LazyLock<Result<DispatchConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = DispatchConfig::load_env_file();
        DispatchConfig::load()
    });

/// Process-wide configuration, loaded on first use
pub fn config() -> Result<&'static DispatchConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
