// CORESHIFT KNOB DIRECTORY
// ONE FILE PER KNOB, SAME SHAPE AS A SYSFS ATTRIBUTE GROUP:
//   echo 250 > /run/coreshift/load_all_threshold
//   cat /run/coreshift/min_active_cores
//
// THE DAEMON POLLS THE DIRECTORY. A FILE THAT DIFFERS FROM WHAT WE LAST WROTE
// IS AN EXTERNAL WRITE: APPLY IT, OR PUT THE CURRENT VALUE BACK IF IT'S
// GARBAGE. A KNOB CHANGED IN-PROCESS IS WRITTEN OUT ON THE NEXT POLL.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::tuning::{Knob, Tunables, ACTIVE_SWITCH, DEBUG_SWITCH};

pub const SUSPEND_SWITCH: &str = "suspended";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: Vec<String>,
    pub rejected: Vec<String>,
    // Some(true) = SUSPEND REQUESTED, Some(false) = RESUME REQUESTED
    pub suspend: Option<bool>,
}

pub struct KnobDir {
    root: PathBuf,
    written: HashMap<String, String>,
    suspended: bool,
}

fn knob_names() -> impl Iterator<Item = &'static str> {
    Knob::ALL.into_iter().map(Knob::name).chain([ACTIVE_SWITCH, DEBUG_SWITCH])
}

impl KnobDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("creating {}", root.display()))?;
        Ok(Self { root, written: HashMap::new(), suspended: false })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn put(&mut self, name: &str, value: String) -> io::Result<()> {
        fs::write(self.root.join(name), format!("{}\n", value))?;
        self.written.insert(name.to_string(), value);
        Ok(())
    }

    // WRITE EVERY KNOB, BOTH SWITCHES AND THE SUSPEND FLAG
    pub fn publish(&mut self, tunables: &Tunables) -> Result<()> {
        for name in knob_names() {
            let value = tunables.read(name)?;
            self.put(name, value)
                .with_context(|| format!("writing {}", self.root.join(name).display()))?;
        }
        let flag = if self.suspended { "1" } else { "0" };
        self.put(SUSPEND_SWITCH, flag.to_string())?;
        Ok(())
    }

    // PICK UP EXTERNAL WRITES AND PUSH OUT IN-PROCESS CHANGES
    pub fn sync(&mut self, tunables: &Tunables) -> SyncReport {
        let mut report = SyncReport::default();

        for name in knob_names() {
            let current = match tunables.read(name) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let on_disk = match fs::read_to_string(self.root.join(name)) {
                Ok(raw) => raw.trim().to_string(),
                Err(_) => {
                    // DELETED OR UNREADABLE: RECREATE
                    let _ = self.put(name, current);
                    continue;
                }
            };

            let last = self.written.get(name).cloned().unwrap_or_default();
            if on_disk == last {
                if current != last {
                    let _ = self.put(name, current);
                }
                continue;
            }

            match tunables.write(name, &on_disk) {
                Ok(()) => {
                    info!(knob = name, value = %on_disk, "knob updated");
                    self.written.insert(name.to_string(), on_disk);
                    report.applied.push(name.to_string());
                }
                Err(e) => {
                    warn!(knob = name, error = %e, "rejected knob write");
                    let _ = self.put(name, current);
                    report.rejected.push(name.to_string());
                }
            }
        }

        self.sync_suspend(&mut report);
        report
    }

    fn sync_suspend(&mut self, report: &mut SyncReport) {
        let path = self.root.join(SUSPEND_SWITCH);
        let flag = if self.suspended { "1" } else { "0" };
        let on_disk = match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().to_string(),
            Err(_) => {
                let _ = self.put(SUSPEND_SWITCH, flag.to_string());
                return;
            }
        };
        if on_disk == flag {
            return;
        }
        match on_disk.as_str() {
            "1" | "0" => {
                self.suspended = on_disk == "1";
                self.written.insert(SUSPEND_SWITCH.to_string(), on_disk);
                report.suspend = Some(self.suspended);
            }
            _ => {
                warn!(knob = SUSPEND_SWITCH, value = %on_disk, "rejected knob write");
                let _ = self.put(SUSPEND_SWITCH, flag.to_string());
                report.rejected.push(SUSPEND_SWITCH.to_string());
            }
        }
    }
}
