// CORESHIFT PLATFORM
// EVERYTHING THE GOVERNOR TOUCHES OUTSIDE ITSELF, BEHIND ONE TRAIT:
//   ONLINE SET, PER-CPU IDLE/WALL COUNTERS, CLOCK SPEED, HOTPLUG WRITES.
//
// SysfsPlatform IS THE LINUX IMPLEMENTATION. ROOTS ARE CONFIGURABLE SO THE
// SAME CODE RUNS AGAINST A FAKE TREE IN TESTS.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::error::HotplugError;
use crate::{CoreId, PRIMARY_CORE};

pub type CoreSet = BTreeSet<CoreId>;

pub const SYS_CPU_ROOT: &str = "/sys/devices/system/cpu";
pub const PROC_ROOT: &str = "/proc";

// CUMULATIVE COUNTERS, MICROSECONDS
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CoreTimes {
    pub idle_us: u64,
    pub wall_us: u64,
}

pub trait CpuPlatform: Send + Sync {
    // HIGHEST POSSIBLE CPU ID + 1
    fn possible_cores(&self) -> u32;

    // CPUS THAT EXIST ON THIS BOOT. A VM CAN ADVERTISE 64 POSSIBLE AND HAVE 4.
    // ONLY THESE ARE EVER HOTPLUG TARGETS.
    fn present_cores(&self) -> CoreSet;

    fn online_cores(&self) -> io::Result<CoreSet>;

    fn core_times(&self, core: CoreId) -> io::Result<CoreTimes>;

    // CURRENT OPERATING FREQUENCY (kHz)
    fn current_freq(&self) -> io::Result<u32>;

    // MAXIMUM OPERATING FREQUENCY (kHz)
    fn max_freq(&self) -> io::Result<u32>;

    // SYNCHRONOUS HOTPLUG REQUEST. RETURNS ONCE THE TRANSITION COMPLETED
    // OR WAS REFUSED
    fn set_online(&self, core: CoreId, online: bool) -> Result<(), HotplugError>;
}

// PARSE A KERNEL CPU LIST: "0-3,5,7-8"
pub fn parse_cpu_list(raw: &str) -> CoreSet {
    let mut set = CoreSet::new();
    for range in raw.trim().split(',') {
        let parts: Vec<&str> = range.trim().split('-').collect();
        match parts.len() {
            1 => {
                if let Ok(cpu) = parts[0].parse::<CoreId>() {
                    set.insert(cpu);
                }
            }
            2 => {
                if let (Ok(lo), Ok(hi)) = (parts[0].parse::<CoreId>(), parts[1].parse::<CoreId>()) {
                    set.extend(lo..=hi);
                }
            }
            _ => {}
        }
    }
    set
}

// user nice system idle iowait irq softirq steal
const STAT_WALL_FIELDS: usize = 8;

// USER_HZ: /proc/stat COUNTS IN THESE
fn clock_ticks_per_sec() -> u64 {
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz <= 0 { 100 } else { hz as u64 }
}

pub struct SysfsPlatform {
    cpu_root: PathBuf,
    proc_stat: PathBuf,
    possible: u32,
    ticks_per_sec: u64,
    stat_line: Regex,
}

impl SysfsPlatform {
    pub fn system() -> Result<Self> {
        Self::new(SYS_CPU_ROOT, PROC_ROOT)
    }

    pub fn new(cpu_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Result<Self> {
        let cpu_root = cpu_root.into();
        let proc_stat = proc_root.into().join("stat");

        let possible_path = cpu_root.join("possible");
        let raw = fs::read_to_string(&possible_path)
            .with_context(|| format!("reading {}", possible_path.display()))?;
        let possible = match parse_cpu_list(&raw).last() {
            Some(&highest) => highest + 1,
            None => bail!("{} lists no cpus", possible_path.display()),
        };

        Ok(Self {
            cpu_root,
            proc_stat,
            possible,
            ticks_per_sec: clock_ticks_per_sec(),
            stat_line: Regex::new(r"^cpu(\d+)\s+(.+)$")?,
        })
    }

    pub fn cpu_root(&self) -> &Path {
        &self.cpu_root
    }

    fn online_path(&self, core: CoreId) -> PathBuf {
        self.cpu_root.join(format!("cpu{}", core)).join("online")
    }

    fn read_u32(path: &Path) -> io::Result<u32> {
        let raw = fs::read_to_string(path)?;
        raw.trim().parse::<u32>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e))
        })
    }

    fn is_online(&self, core: CoreId) -> io::Result<bool> {
        Ok(Self::read_u32(&self.online_path(core))? != 0)
    }

    fn ticks_to_us(&self, ticks: u64) -> u64 {
        (ticks as u128 * 1_000_000 / self.ticks_per_sec as u128) as u64
    }
}

impl CpuPlatform for SysfsPlatform {
    fn possible_cores(&self) -> u32 {
        self.possible
    }

    // NO present FILE: EVERY POSSIBLE CPU WITH A cpuN DIRECTORY
    fn present_cores(&self) -> CoreSet {
        match fs::read_to_string(self.cpu_root.join("present")) {
            Ok(raw) => parse_cpu_list(&raw)
                .into_iter()
                .filter(|&c| c < self.possible)
                .collect(),
            Err(_) => (0..self.possible)
                .filter(|c| self.cpu_root.join(format!("cpu{}", c)).is_dir())
                .collect(),
        }
    }

    // NO online FILE = NOT HOTPLUGGABLE (USUALLY CPU 0) = ALWAYS ONLINE
    fn online_cores(&self) -> io::Result<CoreSet> {
        let mut set = CoreSet::new();
        for core in 0..self.possible {
            match self.is_online(core) {
                Ok(true) => {
                    set.insert(core);
                }
                Ok(false) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if self.cpu_root.join(format!("cpu{}", core)).is_dir() {
                        set.insert(core);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(set)
    }

    // IDLE = idle + iowait, WALL = user THROUGH steal.
    // guest AND guest_nice ARE ALREADY COUNTED INSIDE user AND nice.
    fn core_times(&self, core: CoreId) -> io::Result<CoreTimes> {
        let raw = fs::read_to_string(&self.proc_stat)?;
        for line in raw.lines() {
            let Some(caps) = self.stat_line.captures(line) else {
                continue;
            };
            if caps[1].parse::<CoreId>().ok() != Some(core) {
                continue;
            }
            let fields: Vec<u64> = caps[2]
                .split_whitespace()
                .filter_map(|s| s.parse().ok())
                .collect();
            if fields.len() < 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("cpu{}: short /proc/stat line", core),
                ));
            }
            let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
            let total: u64 = fields.iter().take(STAT_WALL_FIELDS).sum();
            return Ok(CoreTimes {
                idle_us: self.ticks_to_us(idle),
                wall_us: self.ticks_to_us(total),
            });
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("cpu{} not in {}", core, self.proc_stat.display()),
        ))
    }

    fn current_freq(&self) -> io::Result<u32> {
        Self::read_u32(&self.cpu_root.join("cpu0/cpufreq/scaling_cur_freq"))
    }

    fn max_freq(&self) -> io::Result<u32> {
        Self::read_u32(&self.cpu_root.join("cpu0/cpufreq/cpuinfo_max_freq"))
    }

    fn set_online(&self, core: CoreId, online: bool) -> Result<(), HotplugError> {
        if core == PRIMARY_CORE {
            return Err(HotplugError::Primary(core));
        }
        if core >= self.possible {
            return Err(HotplugError::NoSuchCore(core));
        }
        let path = self.online_path(core);
        match self.is_online(core) {
            Ok(current) if current == online => {
                return Err(HotplugError::AlreadyInState { core, online });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HotplugError::NoSuchCore(core));
            }
            Err(source) => return Err(HotplugError::Rejected { core, online, source }),
        }
        fs::write(&path, if online { "1" } else { "0" })
            .map_err(|source| HotplugError::Rejected { core, online, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_ranges_and_singles() {
        let set = parse_cpu_list("0-3,5,7-8\n");
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 5, 7, 8]);
    }

    #[test]
    fn cpu_list_single_cpu() {
        assert_eq!(parse_cpu_list("0").len(), 1);
    }

    #[test]
    fn cpu_list_ignores_garbage() {
        assert!(parse_cpu_list("").is_empty());
        assert_eq!(parse_cpu_list("x,2,1-2-3").into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn clock_ticks_nonzero() {
        assert!(clock_ticks_per_sec() > 0);
    }
}
