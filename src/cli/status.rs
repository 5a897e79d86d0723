// ONE-SHOT LOAD SNAPSHOT
// SAMPLES THE ONLINE CPUS OVER ONE WINDOW AND PRINTS WHAT THE GOVERNOR
// WOULD SEE: PER-CPU LOAD, AGGREGATE, AND THE THRESHOLDS AT DEFAULT KNOBS.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use coreshift::hysteresis::thresholds;
use coreshift::platform::{CpuPlatform, SysfsPlatform};
use coreshift::sampler::{FreqScale, Sampler};
use coreshift::tuning::Tunables;

pub fn run_status(window_ms: u64) -> Result<()> {
    let platform = SysfsPlatform::system()?;
    let total = platform.possible_cores();
    let present = platform.present_cores().len() as u32;
    let online = platform.online_cores().context("reading online cpus")?;

    let mut sampler = Sampler::new(total as usize);
    sampler.prime(&online, |c| platform.core_times(c));
    thread::sleep(Duration::from_millis(window_ms.max(1)));

    let freq = match (platform.current_freq(), platform.max_freq()) {
        (Ok(cur), Ok(max)) => FreqScale::new(cur, max),
        _ => FreqScale::UNSCALED,
    };
    let load = sampler
        .sample(&online, freq, |c| platform.core_times(c))
        .context("sampling cpu load")?;

    println!("CORESHIFT STATUS ({} ms window)", window_ms);
    println!();
    println!("{:<6} {:<8} {:<12} {:<12}", "CPU", "LOAD%", "IDLE_US", "WALL_US");
    println!("{}", "-".repeat(40));
    for s in sampler.last_samples() {
        println!("{:<6} {:<8} {:<12} {:<12}", s.core, s.load_pct, s.idle_delta_us, s.wall_delta_us);
    }
    println!();

    let online_count = online.len() as u32;
    let limits = Tunables::new().snapshot(present);
    let t = thresholds(online_count, &limits);
    println!("  ONLINE:            {}/{} ({} possible)", online_count, present, total);
    if freq.max > 0 {
        println!("  FREQ:              {}/{} kHz", freq.cur, freq.max);
    } else {
        println!("  FREQ:              unknown (unscaled)");
    }
    println!("  AGGREGATE LOAD:    {}", load);
    println!("  UP THRESHOLD:      {}", t.up);
    println!("  DOWN THRESHOLD:    {}", t.down);
    println!("  ALL-ON THRESHOLD:  {}", limits.load_all_threshold);
    Ok(())
}
