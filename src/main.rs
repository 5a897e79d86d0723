// CORESHIFT v1.0.0 -- HYSTERESIS CPU HOTPLUG GOVERNOR
// BRINGS CPUS ONLINE UNDER SUSTAINED LOAD, TAKES THEM OFFLINE WHEN IDLE
//
// DECISIONS HAPPEN ON THE GOVERNOR THREAD (SEE governor.rs)
// THIS THREAD HANDLES: CONFIGURATION, KNOB DIRECTORY, SHUTDOWN, REPORTING

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coreshift::governor::Governor;
use coreshift::knobfs::KnobDir;
use coreshift::platform::{CpuPlatform, SysfsPlatform};
use coreshift::tuning::{self, Knob, Tunables};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// HOW OFTEN THE KNOB DIRECTORY IS POLLED
const KNOB_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "coreshift")]
#[command(about = "CORESHIFT -- HYSTERESIS CPU HOTPLUG GOVERNOR")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    // VERIFY ROOT, HOTPLUG FILES, KERNEL CONFIG
    Check,
    // SAMPLE ONE WINDOW AND PRINT PER-CPU LOAD
    Status {
        #[arg(long, default_value_t = 200)]
        window_ms: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    // AGGREGATE LOAD ABOVE WHICH EVERY CPU COMES UP
    #[arg(long, default_value_t = tuning::DEFAULT_LOAD_ALL_THRESHOLD)]
    load_all_threshold: u32,

    // UP THRESHOLD = COEF * ONLINE^2
    #[arg(long, default_value_t = tuning::DEFAULT_PER_CORE_LOAD_COEFFICIENT)]
    per_core_load_coefficient: u32,

    // CONSECUTIVE HIGH SAMPLES BEFORE ONE CPU COMES UP (0 = NEVER)
    #[arg(long, default_value_t = tuning::DEFAULT_UP_HYSTERESIS_LIMIT)]
    up_hysteresis_limit: u32,

    // CONSECUTIVE VERY HIGH SAMPLES BEFORE ALL CPUS COME UP (0 = NEVER)
    #[arg(long, default_value_t = tuning::DEFAULT_ALL_HYSTERESIS_LIMIT)]
    all_hysteresis_limit: u32,

    // DOWN THRESHOLD = COEF * (ONLINE-1)^2 - OFFSET
    #[arg(long, default_value_t = tuning::DEFAULT_DOWN_LOAD_OFFSET)]
    down_load_offset: u32,

    // CONSECUTIVE LOW SAMPLES BEFORE ONE CPU GOES DOWN (0 = NEVER)
    #[arg(long, default_value_t = tuning::DEFAULT_DOWN_HYSTERESIS_LIMIT)]
    down_hysteresis_limit: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_SAMPLE_INTERVAL_MS)]
    sample_interval_ms: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_MIN_ACTIVE_CORES)]
    min_active_cores: u32,

    // CLAMPED TO THE NUMBER OF PRESENT CPUS
    #[arg(long, default_value_t = tuning::DEFAULT_MAX_ACTIVE_CORES)]
    max_active_cores: u32,

    // LET THE SYSTEM SETTLE BEFORE THE FIRST DECISION (BOOT)
    #[arg(long, default_value_t = 20_000)]
    startup_delay_ms: u64,

    // EXPOSE KNOBS AS ONE FILE EACH (e.g. /run/coreshift)
    #[arg(long)]
    knob_dir: Option<PathBuf>,

    // START WITH THE GOVERNOR SWITCHED OFF
    #[arg(long)]
    inactive: bool,

    // LOG EVERY CYCLE AT INFO
    #[arg(long)]
    debug: bool,

    // LEAVE CPUS AS THEY ARE ON EXIT (DEFAULT: BRING EVERYTHING BACK UP)
    #[arg(long)]
    no_restore: bool,

    // DUMP FULL CYCLE LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

impl RunArgs {
    fn apply(&self, tunables: &Tunables) {
        tunables.set(Knob::LoadAllThreshold, self.load_all_threshold);
        tunables.set(Knob::PerCoreLoadCoefficient, self.per_core_load_coefficient);
        tunables.set(Knob::UpHysteresisLimit, self.up_hysteresis_limit);
        tunables.set(Knob::AllHysteresisLimit, self.all_hysteresis_limit);
        tunables.set(Knob::DownLoadOffset, self.down_load_offset);
        tunables.set(Knob::DownHysteresisLimit, self.down_hysteresis_limit);
        tunables.set(Knob::SampleIntervalMs, self.sample_interval_ms);
        tunables.set(Knob::MinActiveCores, self.min_active_cores);
        tunables.set(Knob::MaxActiveCores, self.max_active_cores);
        tunables.set_active(!self.inactive);
        tunables.set_debug(self.debug);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Command::Check) => return cli::check::run_check(),
        Some(Command::Status { window_ms }) => return cli::status::run_status(window_ms),
        None => {}
    }
    let args = cli.run;

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let platform = Arc::new(SysfsPlatform::system()?);
    let total = platform.possible_cores();
    let present = platform.present_cores().len() as u32;
    let tunables = Arc::new(Tunables::new());
    args.apply(&tunables);

    let limits = tunables.snapshot(present);
    println!("CORESHIFT v1.0.0");
    println!("CPUS:            {} present, {} possible", present, total);
    println!("ACTIVE CORES:    {}..={}", limits.min_active_cores, limits.max_active_cores);
    println!("INTERVAL:        {} ms (first cycle after {} ms)",
             limits.sample_interval_ms, args.startup_delay_ms);
    println!("THRESHOLDS:      all={} coef={} offset={}",
             limits.load_all_threshold, limits.per_core_load_coefficient, limits.down_load_offset);
    println!("HYSTERESIS:      up={} all={} down={}",
             limits.up_hysteresis_limit, limits.all_hysteresis_limit, limits.down_hysteresis_limit);
    if let Some(dir) = &args.knob_dir {
        println!("KNOBS:           {}", dir.display());
    }
    println!();

    let mut knob_dir = match &args.knob_dir {
        Some(path) => {
            let mut dir = KnobDir::create(path)?;
            dir.publish(&tunables)?;
            Some(dir)
        }
        None => None,
    };

    let governor = Governor::new(Arc::clone(&platform), Arc::clone(&tunables));
    let worker = governor.spawn(Duration::from_millis(args.startup_delay_ms))?;

    println!("CORESHIFT IS ACTIVE (CTRL+C TO EXIT)");

    while !SHUTDOWN.load(Ordering::Relaxed) {
        thread::sleep(KNOB_POLL);
        let Some(dir) = knob_dir.as_mut() else {
            continue;
        };
        match dir.sync(&tunables).suspend {
            Some(true) => {
                let offlined = governor.suspend();
                info!(cores = ?offlined, "suspend requested");
            }
            Some(false) => governor.resume(),
            None => {}
        }
    }

    println!("CORESHIFT IS SHUTTING DOWN");
    governor.shutdown();
    if worker.join().is_err() {
        warn!("governor thread panicked");
    }

    if !args.no_restore {
        let restored = governor.restore_all_online();
        if !restored.is_empty() {
            println!("RESTORED {} CPUS ONLINE", restored.len());
        }
    }

    if args.dump_log {
        governor.dump_log();
    }
    governor.summary();

    println!("CORESHIFT OUT.");
    Ok(())
}
