//! Configuration for the link, the backend and the dashboard loops
//!
//! Every setting has a default; a TOML file only needs the ones it changes.

use crate::link::{LinkConfig, DEFAULT_READ_BUFFER_SIZE};
use crate::monitor::{
    DEFAULT_GOAL_AMPS, DEFAULT_INITIAL_READING, DEFAULT_POLL_INTERVAL, DEFAULT_SIMULATION_STEP,
};
use crate::transport::{RfcommConfig, DEFAULT_CONNECT_TIMEOUT};
use anyhow::{bail, Context, Result};
use bluer::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `device_address`
pub const DEVICE_ENV: &str = "POWER_LINK_DEVICE";

/// Bluetooth transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BluetoothMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    Rfcomm,
    /// Use TCP simulation (for development)
    #[default]
    TcpSimulation,
}

/// Bluetooth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Bluetooth transport mode
    pub mode: BluetoothMode,
    /// Adapter name (e.g. "hci0"); the default adapter when unset
    pub adapter: Option<String>,
    /// TCP simulation address (when mode is TcpSimulation)
    pub tcp_address: String,
    /// How long an RFCOMM connect may take
    pub connect_timeout_ms: u64,
    /// Bytes requested per read
    pub read_buffer_size: usize,
    /// Bound on a single read; unset waits for as long as the remote is silent
    pub read_timeout_ms: Option<u64>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            mode: BluetoothMode::TcpSimulation,
            adapter: None,
            tcp_address: "127.0.0.1:9000".into(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_timeout_ms: None,
        }
    }
}

impl BluetoothConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            read_buffer_size: self.read_buffer_size,
            read_timeout: self.read_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn rfcomm_config(&self) -> RfcommConfig {
        RfcommConfig {
            adapter_name: self.adapter.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Dashboard loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between polls and between simulation steps
    pub poll_interval_ms: u64,
    /// Reading shown before the meter reports
    pub initial_reading: f32,
    /// Consumption goal in amperes
    pub goal_amps: f32,
    /// Start the simulated load on launch
    pub simulate: bool,
    /// Amperes added per simulation step
    pub simulation_step: f32,
    /// Delay before the front end retries a lost link
    pub reconnect_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            initial_reading: DEFAULT_INITIAL_READING,
            goal_amps: DEFAULT_GOAL_AMPS,
            simulate: false,
            simulation_step: DEFAULT_SIMULATION_STEP,
            reconnect_delay_ms: 5000,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MAC address of the paired meter
    pub device_address: String,
    /// Bluetooth settings
    pub bluetooth: BluetoothConfig,
    /// Dashboard loop settings
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_address: "00:00:00:00:00:00".into(),
            bluetooth: BluetoothConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` when given, apply the environment override, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(address) = std::env::var(DEVICE_ENV) {
            config.device_address = address;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parsed device address
    pub fn device(&self) -> Result<Address> {
        self.device_address
            .trim()
            .parse()
            .with_context(|| format!("invalid device address {:?}", self.device_address))
    }

    pub fn validate(&self) -> Result<()> {
        self.device()?;
        if self.bluetooth.read_buffer_size == 0 {
            bail!("bluetooth.read_buffer_size must be positive");
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be positive");
        }
        if self.monitor.reconnect_delay_ms == 0 {
            bail!("monitor.reconnect_delay_ms must be positive");
        }
        if !self.monitor.initial_reading.is_finite() {
            bail!("monitor.initial_reading must be a finite number");
        }
        if !self.monitor.simulation_step.is_finite() {
            bail!("monitor.simulation_step must be a finite number");
        }
        if !(self.monitor.goal_amps.is_finite() && self.monitor.goal_amps > 0.0) {
            bail!("monitor.goal_amps must be a positive number");
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
        assert_eq!(config.bluetooth.mode, BluetoothMode::TcpSimulation);
        assert_eq!(config.bluetooth.read_buffer_size, 1024);
        assert!(config.bluetooth.read_timeout_ms.is_none());
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.monitor.goal_amps, 0.15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            device_address = "98:D3:31:F5:12:34"

            [bluetooth]
            mode = "rfcomm"
            adapter = "hci1"
            read_timeout_ms = 3000

            [monitor]
            goal_amps = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.bluetooth.mode, BluetoothMode::Rfcomm);
        assert_eq!(config.bluetooth.tcp_address, "127.0.0.1:9000");
        assert_eq!(
            config.bluetooth.link_config().read_timeout,
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            config.bluetooth.rfcomm_config().adapter_name.as_deref(),
            Some("hci1")
        );
        assert_eq!(config.monitor.goal_amps, 0.5);
        assert_eq!(config.monitor.simulation_step, DEFAULT_SIMULATION_STEP);
        assert_eq!(config.device().unwrap().to_string(), "98:D3:31:F5:12:34");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.device_address = "lamp".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.goal_amps = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let config = Config::from_toml("[monitor]\nreconnect_delay_ms = 0").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml("[monitor]\ninitial_reading = nan").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml("[monitor]\nsimulation_step = inf").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::from_toml("[bluetooth]\nmode = \"carrier-pigeon\"").is_err());
    }
}
