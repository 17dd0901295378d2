use std::sync::Mutex;

use anyhow::Result;

use crate::{sensor::Backlight, sync::lock};

/// A device setting a benchmark sweeps over.
pub trait Parameter: Send + Sync {
    fn name(&self) -> &str;

    fn set(&self, value: f64) -> Result<()>;

    /// Put the device back the way it was before the sweep.
    fn restore(&self) -> Result<()> {
        Ok(())
    }
}

/// Screen brightness on the `0..=255` scale.
#[derive(Debug)]
pub struct BacklightParameter {
    backlight: Backlight,
    original: Mutex<Option<f64>>,
}

impl BacklightParameter {
    pub fn new(backlight: Backlight) -> Self {
        Self {
            backlight,
            original: Mutex::new(None),
        }
    }
}

impl Parameter for BacklightParameter {
    fn name(&self) -> &str {
        "brightness"
    }

    fn set(&self, value: f64) -> Result<()> {
        {
            let mut original = lock(&self.original);
            if original.is_none() {
                *original = Some(self.backlight.read_level()?);
            }
        }
        self.backlight.write_level(value)
    }

    fn restore(&self) -> Result<()> {
        let original = lock(&self.original).take();
        match original {
            Some(level) => self.backlight.write_level(level),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_backlight_sweep_restores_original() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("acpi_video0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("max_brightness"), "100\n").unwrap();
        fs::write(dir.join("brightness"), "40\n").unwrap();

        let parameter = BacklightParameter::new(Backlight::open(dir.clone()).unwrap());
        parameter.set(255.0).unwrap();
        parameter.set(0.0).unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "0");

        parameter.restore().unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "40");
    }
}
