use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    thread,
};

use super::{Sensor, SensorError, sysfs::read_number};
use crate::sync::lock;

const PROC_STAT: &str = "/proc/stat";
const PROC_LOADAVG: &str = "/proc/loadavg";
const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

/// One-minute load from `/proc/loadavg` content as a fraction of `cores`,
/// clamped to `0.0..=1.0`.
pub fn loadavg_fraction(content: &str, cores: usize) -> Option<f64> {
    // "0.52 0.58 0.59 1/512 12345"
    let one_min: f64 = content.split_whitespace().next()?.parse().ok()?;
    if !one_min.is_finite() {
        return None;
    }
    Some((one_min / cores.max(1) as f64).clamp(0.0, 1.0))
}

/// Aggregate load from the load average, for when no tick delta exists yet.
pub fn read_loadavg(path: &Path) -> Option<f64> {
    let content = fs::read_to_string(path).ok()?;
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    loadavg_fraction(&content, cores)
}

/// Cumulative jiffies of one `/proc/stat` cpu line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parse the aggregate line (`core == None`) or `cpuN` from `/proc/stat`
    /// content.
    pub fn parse(content: &str, core: Option<usize>) -> Option<Self> {
        let label = match core {
            Some(n) => format!("cpu{n}"),
            None => "cpu".to_string(),
        };

        let line = content
            .lines()
            .find(|line| line.split_whitespace().next() == Some(label.as_str()))?;

        // user nice system idle iowait irq softirq steal ...
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(str::parse)
            .collect::<Result<_, _>>()
            .ok()?;
        if fields.len() < 4 {
            return None;
        }

        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    /// Busy fraction between an earlier snapshot and this one.
    pub fn load_since(&self, earlier: &Self) -> Option<f64> {
        let total = self.total.checked_sub(earlier.total)?;
        let busy = self.busy.checked_sub(earlier.busy)?;
        (total > 0).then(|| (busy as f64 / total as f64).clamp(0.0, 1.0))
    }
}

/// CPU load in `0.0..=1.0` for one core or all of them, measured as the busy
/// share of jiffies since the previous read.
///
/// The first read has no previous snapshot and reports the normalized load
/// average instead.
#[derive(Debug)]
pub struct CpuLoadSensor {
    name: String,
    core: Option<usize>,
    stat_path: PathBuf,
    loadavg_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl CpuLoadSensor {
    pub fn new(core: Option<usize>) -> Self {
        Self::with_paths(core, PROC_STAT, PROC_LOADAVG)
    }

    pub fn with_paths(
        core: Option<usize>,
        stat_path: impl Into<PathBuf>,
        loadavg_path: impl Into<PathBuf>,
    ) -> Self {
        let name = match core {
            Some(n) => format!("cpu{n} load"),
            None => "cpu load".to_string(),
        };

        Self {
            name,
            core,
            stat_path: stat_path.into(),
            loadavg_path: loadavg_path.into(),
            previous: Mutex::new(None),
        }
    }
}

impl Sensor for CpuLoadSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_supported(&self) -> bool {
        self.stat_path.exists()
    }

    fn measure(&self) -> Result<f64, SensorError> {
        let content = fs::read_to_string(&self.stat_path).map_err(|source| SensorError::Read {
            name: self.name.clone(),
            source,
        })?;
        let times = CpuTimes::parse(&content, self.core)
            .ok_or_else(|| SensorError::Unavailable(self.name.clone()))?;

        let previous = lock(&self.previous).replace(times);
        match previous.and_then(|p| times.load_since(&p)) {
            Some(load) => Ok(load),
            None => Ok(read_loadavg(&self.loadavg_path).unwrap_or(0.0)),
        }
    }
}

/// Current CPU frequency in MHz, for one core or averaged over all cores.
#[derive(Debug, Clone)]
pub struct CpuFrequencySensor {
    name: String,
    core: Option<usize>,
    root: PathBuf,
}

impl CpuFrequencySensor {
    pub fn new(core: Option<usize>) -> Self {
        Self::with_root(core, CPU_SYSFS_ROOT)
    }

    pub fn with_root(core: Option<usize>, root: impl Into<PathBuf>) -> Self {
        let name = match core {
            Some(n) => format!("cpu{n} frequency"),
            None => "cpu frequency".to_string(),
        };

        Self {
            name,
            core,
            root: root.into(),
        }
    }

    fn frequency_path(root: &Path, core: usize) -> PathBuf {
        root.join(format!("cpu{core}"))
            .join("cpufreq")
            .join("scaling_cur_freq")
    }

    fn core_paths(&self) -> Vec<PathBuf> {
        if let Some(core) = self.core {
            return vec![Self::frequency_path(&self.root, core)];
        }

        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| {
                let name = entry.ok()?.file_name();
                let index: usize = name.to_str()?.strip_prefix("cpu")?.parse().ok()?;
                Some(Self::frequency_path(&self.root, index))
            })
            .filter(|path| path.exists())
            .collect();
        paths.sort();
        paths
    }
}

impl Sensor for CpuFrequencySensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_supported(&self) -> bool {
        self.core_paths().iter().any(|path| path.exists())
    }

    fn measure(&self) -> Result<f64, SensorError> {
        let paths = self.core_paths();
        if paths.is_empty() {
            return Err(SensorError::Unavailable(self.name.clone()));
        }

        let mut sum = 0.0;
        for path in &paths {
            // kHz
            sum += read_number(path)? / 1000.0;
        }
        Ok(sum / paths.len() as f64)
    }
}
