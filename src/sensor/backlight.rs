use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::{Sensor, SensorError, sysfs::read_number};

const BACKLIGHT_ROOT: &str = "/sys/class/backlight";

/// Brightness levels are normalized to `0..=MAX_LEVEL`.
pub const MAX_LEVEL: f64 = 255.0;

/// A sysfs backlight interface.
#[derive(Debug, Clone)]
pub struct Backlight {
    dir: PathBuf,
    max_brightness: u32,
}

impl Backlight {
    /// Open the named interface, or the first one found.
    pub fn detect(interface: Option<&str>) -> Result<Self> {
        Self::detect_in(Path::new(BACKLIGHT_ROOT), interface)
    }

    pub fn detect_in(root: &Path, interface: Option<&str>) -> Result<Self> {
        let dir = match interface {
            Some(name) => root.join(name),
            None => {
                let mut entries = fs::read_dir(root)
                    .with_context(|| format!("couldn't list {}", root.display()))?;
                match entries.next() {
                    Some(entry) => entry?.path(),
                    None => anyhow::bail!("no backlight interface found"),
                }
            }
        };

        Self::open(dir)
    }

    pub fn open(dir: PathBuf) -> Result<Self> {
        let max_path = dir.join("max_brightness");
        let max_content = fs::read_to_string(&max_path)
            .with_context(|| format!("couldn't read {}", max_path.display()))?;
        let max_brightness: u32 = max_content.trim().parse()?;
        if max_brightness == 0 {
            anyhow::bail!("{} reports a max brightness of zero", dir.display());
        }

        Ok(Self {
            dir,
            max_brightness,
        })
    }

    pub fn max_brightness(&self) -> u32 {
        self.max_brightness
    }

    /// Current brightness on the `0..=MAX_LEVEL` scale.
    pub fn read_level(&self) -> Result<f64, SensorError> {
        let raw = read_number(&self.dir.join("brightness"))?;
        Ok(raw / self.max_brightness as f64 * MAX_LEVEL)
    }

    /// Set brightness from the `0..=MAX_LEVEL` scale.
    pub fn write_level(&self, level: f64) -> Result<()> {
        let raw = (level.clamp(0.0, MAX_LEVEL) / MAX_LEVEL * self.max_brightness as f64).round();
        let path = self.dir.join("brightness");
        fs::write(&path, format!("{}\n", raw as u32))
            .with_context(|| format!("couldn't write {}", path.display()))
    }
}

/// Screen brightness on the `0..=MAX_LEVEL` scale.
#[derive(Debug, Clone)]
pub struct BacklightSensor {
    backlight: Backlight,
}

impl BacklightSensor {
    pub fn new(backlight: Backlight) -> Self {
        Self { backlight }
    }
}

impl Sensor for BacklightSensor {
    fn name(&self) -> &str {
        "brightness"
    }

    fn is_supported(&self) -> bool {
        self.backlight.dir.join("brightness").exists()
    }

    fn measure(&self) -> Result<f64, SensorError> {
        self.backlight.read_level()
    }
}
