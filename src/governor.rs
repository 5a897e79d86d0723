// CORESHIFT GOVERNOR
// ONE WORKER THREAD, ONE CYCLE AT A TIME:
//   SAMPLE -> DECIDE -> SELECT -> HOTPLUG -> SLEEP sample_interval_ms -> ...
//
// ALL ENGINE STATE (BASELINES, STREAKS, EVENT LOG) AND THE SUSPEND/SHUTDOWN
// FLAGS SIT BEHIND ONE MUTEX. A CYCLE HOLDS IT FROM SAMPLE TO HOTPLUG, SO
// suspend() WAITS OUT AN IN-FLIGHT CYCLE AND NO CYCLE STARTS WHILE SUSPENDED.
// THE CONDVAR IS THE TIMER: WAITING ON IT RELEASES THE MUTEX.
//
// KNOBS ARE ATOMICS OUTSIDE THE MUTEX. WRITERS NEVER WAIT ON A CYCLE.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::HotplugError;
use crate::event::{EventLog, Outcome, Totals};
use crate::hysteresis::{thresholds, Action, HysteresisState};
use crate::platform::{CoreSet, CpuPlatform};
use crate::sampler::{FreqScale, Sampler};
use crate::selector;
use crate::tuning::{Limits, Tunables};
use crate::{CoreId, PRIMARY_CORE};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CycleReport {
    pub outcome: Outcome,
    pub load: u64,
    pub online: u32,
    pub action: Action,
    // CORES WHOSE STATE ACTUALLY CHANGED
    pub changed: Vec<CoreId>,
}

impl CycleReport {
    fn skipped(outcome: Outcome, online: u32) -> Self {
        Self { outcome, load: 0, online, action: Action::None, changed: Vec::new() }
    }
}

struct Engine {
    sampler: Sampler,
    hysteresis: HysteresisState,
    log: EventLog,
}

struct LoopState {
    engine: Engine,
    suspended: bool,
    shutdown: bool,
}

struct Shared<P> {
    platform: Arc<P>,
    tunables: Arc<Tunables>,
    state: Mutex<LoopState>,
    wake: Condvar,
}

pub struct Governor<P: CpuPlatform> {
    shared: Arc<Shared<P>>,
}

impl<P: CpuPlatform> Clone for Governor<P> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<P: CpuPlatform + 'static> Governor<P> {
    pub fn new(platform: Arc<P>, tunables: Arc<Tunables>) -> Self {
        let mut sampler = Sampler::new(platform.possible_cores() as usize);
        // FIRST WINDOW STARTS NOW, NOT AT BOOT
        if let Ok(online) = platform.online_cores() {
            sampler.prime(&online, |c| platform.core_times(c));
        }

        let engine = Engine {
            sampler,
            hysteresis: HysteresisState::new(),
            log: EventLog::new(),
        };

        Self {
            shared: Arc::new(Shared {
                platform,
                tunables,
                state: Mutex::new(LoopState { engine, suspended: false, shutdown: false }),
                wake: Condvar::new(),
            }),
        }
    }

    // RUN ONE SAMPLE/DECIDE/EXECUTE CYCLE NOW. A SUSPENDED GOVERNOR DOES
    // NOTHING AND REPORTS Inactive
    pub fn run_cycle(&self) -> CycleReport {
        let mut st = self.shared.state.lock();
        if st.suspended || st.shutdown {
            return CycleReport::skipped(Outcome::Inactive, 0);
        }
        cycle(&*self.shared, &mut st.engine)
    }

    // START THE WORKER THREAD. THE FIRST CYCLE RUNS AFTER startup_delay,
    // THEN EVERY sample_interval_ms (RE-READ EACH CYCLE)
    pub fn spawn(&self, startup_delay: Duration) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("coreshift".to_string())
            .spawn(move || worker(shared, startup_delay))
    }

    // STOP THE WORKER AFTER ITS CURRENT CYCLE. DOES NOT TOUCH CORE STATE
    pub fn shutdown(&self) {
        let mut st = self.shared.state.lock();
        st.shutdown = true;
        self.shared.wake.notify_all();
    }

    // PARK THE LOOP AND TAKE EVERY NON-PRIMARY CORE OFFLINE. BLOCKS UNTIL
    // ANY IN-FLIGHT CYCLE HAS FINISHED. RETURNS THE CORES TAKEN OFFLINE
    pub fn suspend(&self) -> Vec<CoreId> {
        let mut st = self.shared.state.lock();
        if st.suspended {
            return Vec::new();
        }
        st.suspended = true;
        self.shared.wake.notify_all();
        st.engine.hysteresis.reset();

        // ONLINE SET UNREADABLE: TRY EVERY POSSIBLE ID, THE ACTUATOR
        // SORTS OUT WHICH ONES ARE ALREADY DOWN OR ABSENT
        let platform = &self.shared.platform;
        let candidates: Vec<CoreId> = match platform.online_cores() {
            Ok(set) => set.into_iter().rev().filter(|&c| c != PRIMARY_CORE).collect(),
            Err(e) => {
                warn!(error = %e, "suspend: reading online cpus, trying every cpu");
                (PRIMARY_CORE + 1..platform.possible_cores()).rev().collect()
            }
        };

        let mut offlined = Vec::new();
        for core in candidates {
            match platform.set_online(core, false) {
                Ok(()) => offlined.push(core),
                Err(HotplugError::AlreadyInState { .. }) | Err(HotplugError::NoSuchCore(_)) => {}
                Err(e) => warn!(cpu = core, error = %e, "suspend: offline failed"),
            }
        }
        info!(offlined = offlined.len(), "suspended");
        offlined
    }

    // RE-ARM THE LOOP. THE NEXT CYCLE RUNS ONE FULL INTERVAL FROM NOW
    pub fn resume(&self) {
        let mut st = self.shared.state.lock();
        if !st.suspended {
            return;
        }
        st.suspended = false;

        let platform = &self.shared.platform;
        match platform.online_cores() {
            Ok(online) => st.engine.sampler.prime(&online, |c| platform.core_times(c)),
            Err(e) => warn!(error = %e, "resume: reading online cpus"),
        }
        self.shared.wake.notify_all();
        info!("resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    // BRING EVERY OFFLINE CORE BACK UP, IGNORING max_active_cores. USED ON
    // EXIT SO THE MACHINE ISN'T LEFT RUNNING ON FEWER CORES
    pub fn restore_all_online(&self) -> Vec<CoreId> {
        let _st = self.shared.state.lock();
        let platform = &self.shared.platform;
        let online = match platform.online_cores() {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "restore: reading online cpus");
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for core in selector::select_all_to_activate(&online, &platform.present_cores()) {
            match platform.set_online(core, true) {
                Ok(()) => restored.push(core),
                Err(e) => warn!(cpu = core, error = %e, "restore: online failed"),
            }
        }
        restored
    }

    pub fn hysteresis(&self) -> HysteresisState {
        self.shared.state.lock().engine.hysteresis
    }

    pub fn totals(&self) -> Totals {
        self.shared.state.lock().engine.log.totals()
    }

    pub fn dump_log(&self) {
        self.shared.state.lock().engine.log.dump();
    }

    pub fn summary(&self) {
        self.shared.state.lock().engine.log.summary();
    }
}

fn interval<P: CpuPlatform>(shared: &Shared<P>) -> Duration {
    shared.tunables.snapshot(shared.platform.possible_cores()).sample_interval()
}

fn worker<P: CpuPlatform>(shared: Arc<Shared<P>>, startup_delay: Duration) {
    info!(startup_delay_ms = startup_delay.as_millis() as u64, "governor thread started");
    let mut st = shared.state.lock();
    let mut delay = startup_delay;

    loop {
        // ARM THE TIMER. WAKES EARLY ONLY FOR SUSPEND OR SHUTDOWN.
        let deadline = Instant::now() + delay;
        while !st.shutdown && !st.suspended && Instant::now() < deadline {
            shared.wake.wait_until(&mut st, deadline);
        }
        if st.shutdown {
            break;
        }
        if st.suspended {
            while st.suspended && !st.shutdown {
                shared.wake.wait(&mut st);
            }
            delay = interval(&*shared);
            continue;
        }

        cycle(&*shared, &mut st.engine);
        delay = interval(&*shared);
    }
    info!("governor thread stopped");
}

// FREQUENCY UNKNOWN (NO CPUFREQ, VM) -> AGGREGATE UNSCALED
fn freq_scale<P: CpuPlatform>(platform: &P) -> FreqScale {
    match (platform.current_freq(), platform.max_freq()) {
        (Ok(cur), Ok(max)) => FreqScale::new(cur, max),
        _ => FreqScale::UNSCALED,
    }
}

fn cycle<P: CpuPlatform>(shared: &Shared<P>, engine: &mut Engine) -> CycleReport {
    let report = evaluate(shared, engine);
    engine.log.record(report.load, report.online, report.action, report.outcome);
    report
}

fn evaluate<P: CpuPlatform>(shared: &Shared<P>, engine: &mut Engine) -> CycleReport {
    let platform = &*shared.platform;
    let tunables = &*shared.tunables;

    if !tunables.active() {
        return CycleReport::skipped(Outcome::Inactive, 0);
    }

    let online = match platform.online_cores() {
        Ok(set) => set,
        Err(e) => {
            warn!(error = %e, "reading online cpus, skipping cycle");
            return CycleReport::skipped(Outcome::Anomaly, 0);
        }
    };
    let online_count = online.len() as u32;
    let present = platform.present_cores();
    let limits = tunables.snapshot(present.len() as u32);

    let load = match engine.sampler.sample(&online, freq_scale(platform), |c| platform.core_times(c)) {
        Ok(load) => load,
        Err(e) => {
            debug!(error = %e, "sample rejected, skipping decision");
            return CycleReport::skipped(Outcome::Anomaly, online_count);
        }
    };

    if !limits.is_consistent() {
        warn!(
            min = limits.min_active_cores,
            max = limits.max_active_cores,
            "min_active_cores above max_active_cores, refusing to act"
        );
        return CycleReport { load, ..CycleReport::skipped(Outcome::Inconsistent, online_count) };
    }

    let action = engine.hysteresis.decide(load, online_count, &limits);
    trace_cycle(tunables.debug(), load, online_count, &limits, &engine.hysteresis);

    if action == Action::None {
        return CycleReport { load, ..CycleReport::skipped(Outcome::Idle, online_count) };
    }

    let changed = execute(platform, &engine.sampler, action, &online, &present, &limits);
    let outcome = if changed.is_empty() {
        // STREAKS STAY AT THEIR LIMIT: PERSISTENT PRESSURE RETRIES NEXT CYCLE
        Outcome::Failed
    } else {
        engine.hysteresis.commit(action);
        info!(action = action.label(), load, online = online_count, cores = ?changed, "hotplug");
        Outcome::Acted
    };

    CycleReport { outcome, load, online: online_count, action, changed }
}

fn trace_cycle(verbose: bool, load: u64, online: u32, limits: &Limits, h: &HysteresisState) {
    let t = thresholds(online, limits);
    if verbose {
        info!(load, online, up = t.up, down = t.down,
              up_streak = h.up_streak, all_streak = h.all_streak, down_streak = h.down_streak, "cycle");
    } else {
        debug!(load, online, up = t.up, down = t.down,
               up_streak = h.up_streak, all_streak = h.all_streak, down_streak = h.down_streak, "cycle");
    }
}

// CARRY OUT ONE ACTION. RETURNS THE CORES THE ACTUATOR CONFIRMED.
fn execute<P: CpuPlatform>(
    platform: &P,
    sampler: &Sampler,
    action: Action,
    online: &CoreSet,
    present: &CoreSet,
    limits: &Limits,
) -> Vec<CoreId> {
    let mut changed = Vec::new();
    match action {
        Action::None => {}
        Action::AddOne => match selector::select_to_activate(online, present) {
            Some(core) => match platform.set_online(core, true) {
                Ok(()) => changed.push(core),
                Err(e) => warn!(cpu = core, error = %e, "online failed"),
            },
            None => warn!("no offline cpu left to bring up"),
        },
        Action::AddAll => {
            let mut count = online.len() as u32;
            for core in selector::select_all_to_activate(online, present) {
                if count >= limits.max_active_cores {
                    break;
                }
                match platform.set_online(core, true) {
                    Ok(()) => {
                        count += 1;
                        changed.push(core);
                    }
                    Err(e) => warn!(cpu = core, error = %e, "online failed"),
                }
            }
        }
        Action::RemoveOne => {
            let most_idle = selector::select_to_deactivate(online, |c| {
                platform.core_times(c).map(|now| sampler.recent_idle(c, now)).unwrap_or(0)
            });
            match most_idle {
                Some(core) => match platform.set_online(core, false) {
                    Ok(()) => changed.push(core),
                    Err(e) => warn!(cpu = core, error = %e, "offline failed"),
                },
                None => warn!("no non-primary cpu left to take down"),
            }
        }
    }
    changed
}
