// HOST READINESS CHECK
// CAN THIS MACHINE HOTPLUG CPUS, AND CAN WE SEE WHAT WE NEED TO DECIDE?

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Result};

use coreshift::platform::{parse_cpu_list, PROC_ROOT, SYS_CPU_ROOT};

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.contains("CONFIG_HOTPLUG_CPU=y");
    if found {
        println!("  CONFIG_HOTPLUG_CPU    OK");
    } else {
        println!("  CONFIG_HOTPLUG_CPU    NOT FOUND -- cpus cannot be taken offline");
    }
    found
}

// EVERY NON-PRIMARY CPU SHOULD EXPOSE AN online FILE
fn check_hotplug_files(cpu_root: &Path) -> bool {
    let possible = std::fs::read_to_string(cpu_root.join("possible")).unwrap_or_default();
    let cpus = parse_cpu_list(&possible);
    if cpus.is_empty() {
        println!("  possible cpus         UNKNOWN");
        return false;
    }

    let hotpluggable = cpus
        .iter()
        .filter(|&&c| c != 0)
        .filter(|c| cpu_root.join(format!("cpu{}/online", c)).exists())
        .count();
    let candidates = cpus.len().saturating_sub(1);
    println!("  possible cpus         {}", cpus.len());
    println!("  hotpluggable          {}/{}", hotpluggable, candidates);
    candidates == 0 || hotpluggable > 0
}

pub fn run_check() -> Result<()> {
    println!("CORESHIFT HOST CHECK");
    println!();

    let mut ok = true;
    let cpu_root = Path::new(SYS_CPU_ROOT);

    let root = unsafe { libc::geteuid() } == 0;
    if root {
        println!("  {:<22}OK", "root");
    } else {
        println!("  {:<22}NO (hotplug writes will be refused)", "root");
        ok = false;
    }

    let stat = Path::new(PROC_ROOT).join("stat");
    if std::fs::read_to_string(&stat).is_ok() {
        println!("  {:<22}OK", stat.display());
    } else {
        println!("  {:<22}UNREADABLE", stat.display());
        ok = false;
    }
    println!();

    println!("CPU HOTPLUG:");
    if !check_hotplug_files(cpu_root) {
        ok = false;
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    // OPTIONAL: WITHOUT CPUFREQ THE LOAD IS NOT FREQUENCY-SCALED
    let cpufreq = cpu_root.join("cpu0/cpufreq");
    if cpufreq.join("cpuinfo_max_freq").exists() {
        let governor = std::fs::read_to_string(cpufreq.join("scaling_governor")).unwrap_or_default();
        let governor = governor.trim();
        println!("  cpufreq               OK (governor: {})",
                 if governor.is_empty() { "unknown" } else { governor });
    } else {
        println!("  cpufreq               NOT AVAILABLE (load will not be frequency-scaled)");
    }
    println!();

    if !ok {
        println!("SOME CHECKS FAILED");
        bail!("host is not ready for coreshift");
    }
    println!("ALL CHECKS PASSED");
    Ok(())
}
