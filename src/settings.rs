use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{benchmark::BenchmarkConfig, statistics::StatisticsConfig};

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub sampling: SamplingConfig,
    pub statistics: StatisticsConfig,
    pub persistence: PersistenceConfig,
    pub battery: BatteryConfig,
    pub sensors: SensorConfig,
    pub benchmark: BenchmarkSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Time between power samples in milliseconds
    pub interval_ms: u64,
    /// Readings closer together than this reuse the previous value
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// How often lifetime statistics are saved, in seconds
    pub save_interval_secs: u64,
    /// Overrides the default state directory
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Overrides the capacity reported by the battery
    pub capacity_mwh: Option<f64>,
    /// Minimum time between scheduled estimate updates
    pub min_update_interval_ms: u64,
    /// Time after a charger change before readings are trusted
    pub charger_settle_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// power_supply interface, e.g. "BAT0". Detected when unset.
    pub power_supply: Option<String>,
    /// backlight interface, e.g. "intel_backlight". Detected when unset.
    pub backlight: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub settle_ms: u64,
    pub measure_ms: u64,
    /// Brightness step on the 0-255 scale
    pub brightness_step: f64,
    /// CPU load step as a fraction
    pub cpu_load_step: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            debounce_ms: 50,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_mwh: None,
            min_update_interval_ms: 5000,
            charger_settle_ms: 3000,
        }
    }
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            settle_ms: 5000,
            measure_ms: 10000,
            brightness_step: 25.0,
            cpu_load_step: 0.1,
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl PersistenceConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 30,
            state_dir: None,
        }
    }
}

impl BatteryConfig {
    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn charger_settle(&self) -> Duration {
        Duration::from_millis(self.charger_settle_ms)
    }
}

impl BenchmarkSettings {
    pub fn brightness(&self) -> BenchmarkConfig {
        BenchmarkConfig::brightness(
            self.brightness_step,
            Duration::from_millis(self.settle_ms),
            Duration::from_millis(self.measure_ms),
        )
    }

    pub fn cpu_load(&self) -> BenchmarkConfig {
        BenchmarkConfig::cpu_load(
            self.cpu_load_step,
            Duration::from_millis(self.settle_ms),
            Duration::from_millis(self.measure_ms),
        )
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config: PowerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load the configuration from the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::get_config_path()?)
    }

    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = Self::load_config(&config_path)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    /// load configuration from file, create default if doesn't exist
    pub fn load_config(path: &Path) -> Result<PowerConfig> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("couldn't read {}", path.display()))?;
            let config: PowerConfig = serde_json::from_str(&content)
                .with_context(|| format!("couldn't parse {}", path.display()))?;
            log::info!("loaded configuration from: {}", path.display());
            Ok(config)
        } else {
            let default_config = PowerConfig::default();

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let content = serde_json::to_string_pretty(&default_config)?;
            fs::write(path, content)?;
            log::info!("created default configuration at: {}", path.display());

            Ok(default_config)
        }
    }

    /// `$XDG_CONFIG_HOME/cadenza-power/config.json`
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("couldn't find config directory")?;
        Ok(config_dir.join("cadenza-power").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Update configuration and save to file
    pub fn update_config(&mut self, config: PowerConfig) -> Result<()> {
        self.config = config;
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, content)
            .with_context(|| format!("couldn't write {}", self.config_path.display()))?;
        log::info!("saved configuration to: {}", self.config_path.display());
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        self.config = Self::load_config(&self.config_path)?;
        log::info!("reloaded configuration from file");
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) -> Result<()> {
        self.config = PowerConfig::default();
        self.save()?;
        log::info!("reset configuration to defaults");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadenza-power/config.json");

        let manager = ConfigManager::with_path(path.clone()).unwrap();
        assert_eq!(manager.config(), &PowerConfig::default());
        assert!(path.exists());

        let reloaded = ConfigManager::load_config(&path).unwrap();
        assert_eq!(reloaded, PowerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "sampling": { "interval_ms": 250 }, "battery": { "capacity_mwh": 52000.0 } }"#,
        )
        .unwrap();

        let config = ConfigManager::load_config(&path).unwrap();
        assert_eq!(config.sampling.interval(), Duration::from_millis(250));
        assert_eq!(config.sampling.debounce_ms, 50);
        assert_eq!(config.battery.capacity_mwh, Some(52000.0));
        assert_eq!(config.battery.charger_settle(), Duration::from_secs(3));
        assert_eq!(config.statistics, StatisticsConfig::default());
    }

    #[test]
    fn test_update_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut manager = ConfigManager::with_path(path.clone()).unwrap();

        let mut config = manager.config().clone();
        config.sensors.backlight = Some("intel_backlight".into());
        config.persistence.save_interval_secs = 60;
        manager.update_config(config.clone()).unwrap();

        manager.reload().unwrap();
        assert_eq!(manager.config(), &config);

        manager.reset_to_defaults().unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.config(), &PowerConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(ConfigManager::load_config(&path).is_err());
    }
}
