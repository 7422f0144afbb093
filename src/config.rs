//! Configuration management for the reflector
//!
//! Loads, validates, and defaults the application configuration from a YAML
//! file. Values the specification fixes as protocol constants (register
//! addresses, `ALIVE_REGISTER`, `MAX_CONNECTION`) are not configurable here;
//! they live as `pub const`s in [`crate::registers`].

use crate::error::{EvseError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Modbus TCP server bind configuration
    pub modbus: ModbusServerConfig,

    /// Event bus (IPC) configuration
    pub event_bus: EventBusConfig,

    /// Cold-start persistence (read-only SQLite databases)
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Watchdog/failsafe tunables
    pub watchdog: WatchdogConfig,
}

/// Modbus TCP server parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusServerConfig {
    /// Bind address (spec fixes this to loopback)
    pub bind_address: String,

    /// TCP port (spec fixes this to 502)
    pub port: u16,

    /// Maximum concurrent clients (spec fixes this to 1)
    pub max_connections: usize,
}

/// Event bus IPC parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Unix domain socket path the dealer endpoint connects to
    pub socket_path: String,

    /// Client identity string announced on the bus
    pub client_id: String,

    /// Reconnect backoff when the IPC endpoint drops
    pub reconnect_delay_ms: u64,
}

/// Paths to the four read-only cold-start SQLite databases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub agent_db: String,
    pub vfactory_db: String,
    pub system_db: String,
    pub webconfig_db: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR) used until the kernel
    /// loglevel watcher overrides it
    pub level: String,

    /// Directory holding daily-rotated log files
    pub directory: String,

    /// Number of rotated backups to retain
    pub backup_count: u32,

    /// Whether to also log to stdout
    pub console_output: bool,

    /// Whether to emit JSON-formatted log lines
    pub json_format: bool,

    /// Path to the kernel printk control file polled for level changes
    pub kernel_loglevel_path: String,

    /// Poll interval for the kernel loglevel watcher, in milliseconds
    pub kernel_loglevel_poll_ms: u64,
}

/// Watchdog/failsafe tunables not fixed by the specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Minimum failsafe period floor in seconds (spec: `max(1, round(timeout/2))`)
    pub min_period_seconds: u64,

    /// Date/time and session tick interval in seconds (spec fixes this to 1)
    pub tick_interval_seconds: u64,
}

impl Default for ModbusServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 502,
            max_connections: 1,
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/lib/routing.ipc".to_string(),
            client_id: "MODBUSTCP".to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            agent_db: "/var/lib/vestel/agent.db".to_string(),
            vfactory_db: "/run/media/mmcblk1p3/vfactory.db".to_string(),
            system_db: "/usr/lib/vestel/system.db".to_string(),
            webconfig_db: "/var/lib/vestel/webconfig.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            directory: "/var/log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
            kernel_loglevel_path: "/proc/sys/kernel/printk".to_string(),
            kernel_loglevel_poll_ms: 2000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            min_period_seconds: 1,
            tick_interval_seconds: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus: ModbusServerConfig::default(),
            event_bus: EventBusConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, trying well-known paths before falling back to defaults
    pub fn load() -> Result<Self> {
        let default_paths = [
            "evse_modbus.yaml",
            "/data/evse_modbus.yaml",
            "/etc/evse-modbus/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.modbus.bind_address.is_empty() {
            return Err(EvseError::validation(
                "modbus.bind_address",
                "must not be empty",
            ));
        }

        if self.modbus.port == 0 {
            return Err(EvseError::validation(
                "modbus.port",
                "must be greater than 0",
            ));
        }

        if self.modbus.max_connections == 0 {
            return Err(EvseError::validation(
                "modbus.max_connections",
                "must be at least 1",
            ));
        }

        if self.event_bus.socket_path.is_empty() {
            return Err(EvseError::validation(
                "event_bus.socket_path",
                "must not be empty",
            ));
        }

        if self.watchdog.min_period_seconds == 0 {
            return Err(EvseError::validation(
                "watchdog.min_period_seconds",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.modbus.max_connections, 1);
        assert_eq!(config.event_bus.client_id, "MODBUSTCP");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.modbus.bind_address = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.modbus.port = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.modbus.max_connections = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.watchdog.min_period_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.modbus.port, deserialized.modbus.port);
        assert_eq!(config.persistence.agent_db, deserialized.persistence.agent_db);
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = Config::default();
        config.save_to_file(tmp.path()).unwrap();
        let loaded = Config::from_file(tmp.path()).unwrap();
        assert_eq!(loaded.modbus.port, config.modbus.port);
    }
}
