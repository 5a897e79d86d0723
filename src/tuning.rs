// CORESHIFT TUNING
// PURE-RUST MODULE: KNOB DEFAULTS, RUNTIME KNOB STORE, PER-CYCLE LIMITS
// SHARED BETWEEN THE GOVERNOR THREAD, THE KNOB DIRECTORY POLLER AND TESTS
//
// EVERY KNOB IS ITS OWN ATOMIC. WRITERS NEVER BLOCK THE DECISION LOOP.
// THE LOOP TAKES ONE SNAPSHOT PER CYCLE, SO A WRITE LANDS AT WORST ONE
// CYCLE LATE AND NO CYCLE SEES A KNOB CHANGE HALFWAY THROUGH.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::error::KnobError;

// LOAD UNITS: ONE FULLY BUSY CORE AT MAX FREQUENCY CONTRIBUTES 100

pub const DEFAULT_LOAD_ALL_THRESHOLD: u32        = 180;  // ABOVE THIS: BRING EVERYTHING UP
pub const DEFAULT_PER_CORE_LOAD_COEFFICIENT: u32 = 30;   // UP THRESHOLD = COEF * N^2
pub const DEFAULT_UP_HYSTERESIS_LIMIT: u32       = 4;
pub const DEFAULT_ALL_HYSTERESIS_LIMIT: u32      = 2;
pub const DEFAULT_DOWN_LOAD_OFFSET: u32          = 20;
pub const DEFAULT_DOWN_HYSTERESIS_LIMIT: u32     = 10;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u32        = 100;
pub const DEFAULT_MIN_ACTIVE_CORES: u32          = 1;
pub const DEFAULT_MAX_ACTIVE_CORES: u32          = 4;

const KNOB_COUNT: usize = 9;

// NAMED KNOBS

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Knob {
    LoadAllThreshold = 0,
    PerCoreLoadCoefficient = 1,
    UpHysteresisLimit = 2,
    AllHysteresisLimit = 3,
    DownLoadOffset = 4,
    DownHysteresisLimit = 5,
    SampleIntervalMs = 6,
    MinActiveCores = 7,
    MaxActiveCores = 8,
}

impl Knob {
    pub const ALL: [Knob; KNOB_COUNT] = [
        Knob::LoadAllThreshold,
        Knob::PerCoreLoadCoefficient,
        Knob::UpHysteresisLimit,
        Knob::AllHysteresisLimit,
        Knob::DownLoadOffset,
        Knob::DownHysteresisLimit,
        Knob::SampleIntervalMs,
        Knob::MinActiveCores,
        Knob::MaxActiveCores,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::LoadAllThreshold => "load_all_threshold",
            Self::PerCoreLoadCoefficient => "per_core_load_coefficient",
            Self::UpHysteresisLimit => "up_hysteresis_limit",
            Self::AllHysteresisLimit => "all_hysteresis_limit",
            Self::DownLoadOffset => "down_load_offset",
            Self::DownHysteresisLimit => "down_hysteresis_limit",
            Self::SampleIntervalMs => "sample_interval_ms",
            Self::MinActiveCores => "min_active_cores",
            Self::MaxActiveCores => "max_active_cores",
        }
    }

    pub fn default_value(self) -> u32 {
        match self {
            Self::LoadAllThreshold => DEFAULT_LOAD_ALL_THRESHOLD,
            Self::PerCoreLoadCoefficient => DEFAULT_PER_CORE_LOAD_COEFFICIENT,
            Self::UpHysteresisLimit => DEFAULT_UP_HYSTERESIS_LIMIT,
            Self::AllHysteresisLimit => DEFAULT_ALL_HYSTERESIS_LIMIT,
            Self::DownLoadOffset => DEFAULT_DOWN_LOAD_OFFSET,
            Self::DownHysteresisLimit => DEFAULT_DOWN_HYSTERESIS_LIMIT,
            Self::SampleIntervalMs => DEFAULT_SAMPLE_INTERVAL_MS,
            Self::MinActiveCores => DEFAULT_MIN_ACTIVE_CORES,
            Self::MaxActiveCores => DEFAULT_MAX_ACTIVE_CORES,
        }
    }
}

impl fmt::Display for Knob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Knob {
    type Err = KnobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Knob::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| KnobError::UnknownKnob(s.to_string()))
    }
}

// SWITCHES LIVE NEXT TO THE NUMERIC KNOBS ON THE CONFIG SURFACE
pub const ACTIVE_SWITCH: &str = "active";
pub const DEBUG_SWITCH: &str = "debug";

// RUNTIME KNOB STORE (ATOMICS ONLY, NO MUTEX)

pub struct Tunables {
    values: [AtomicU32; KNOB_COUNT],
    active: AtomicBool,
    debug: AtomicBool,
}

impl Tunables {
    pub fn new() -> Self {
        Self {
            values: Knob::ALL.map(|k| AtomicU32::new(k.default_value())),
            active: AtomicBool::new(true),
            debug: AtomicBool::new(false),
        }
    }

    pub fn get(&self, knob: Knob) -> u32 {
        self.values[knob as usize].load(Ordering::Relaxed)
    }

    pub fn set(&self, knob: Knob, value: u32) {
        self.values[knob as usize].store(value, Ordering::Relaxed);
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, on: bool) {
        self.active.store(on, Ordering::Relaxed);
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    // READ ANY KNOB OR SWITCH BY NAME, FORMATTED THE WAY IT IS WRITTEN BACK
    pub fn read(&self, name: &str) -> Result<String, KnobError> {
        match name {
            ACTIVE_SWITCH => Ok(bool_text(self.active()).to_string()),
            DEBUG_SWITCH => Ok(bool_text(self.debug()).to_string()),
            _ => Ok(self.get(name.parse()?).to_string()),
        }
    }

    // WRITE ANY KNOB OR SWITCH BY NAME. NUMERIC KNOBS TAKE ONE UNSIGNED
    // DECIMAL; SWITCHES ALSO ACCEPT Y/N
    pub fn write(&self, name: &str, input: &str) -> Result<(), KnobError> {
        let input = input.trim();
        match name {
            ACTIVE_SWITCH => self.set_active(parse_switch(ACTIVE_SWITCH, input)?),
            DEBUG_SWITCH => self.set_debug(parse_switch(DEBUG_SWITCH, input)?),
            _ => {
                let knob: Knob = name.parse()?;
                let value = input.parse::<u32>().map_err(|_| KnobError::InvalidValue {
                    knob: knob.name(),
                    value: input.to_string(),
                })?;
                self.set(knob, value);
            }
        }
        Ok(())
    }

    // ONE READ PER KNOB, CLAMPED SO NOTHING DOWNSTREAM DIVIDES BY ZERO
    // OR INDEXES PAST THE CORES THAT EXIST. PASS THE PRESENT COUNT
    pub fn snapshot(&self, total_cores: u32) -> Limits {
        let total = total_cores.max(1);
        Limits {
            load_all_threshold: self.get(Knob::LoadAllThreshold),
            per_core_load_coefficient: self.get(Knob::PerCoreLoadCoefficient),
            up_hysteresis_limit: self.get(Knob::UpHysteresisLimit),
            all_hysteresis_limit: self.get(Knob::AllHysteresisLimit),
            down_load_offset: self.get(Knob::DownLoadOffset),
            down_hysteresis_limit: self.get(Knob::DownHysteresisLimit),
            sample_interval_ms: self.get(Knob::SampleIntervalMs).max(1),
            min_active_cores: self.get(Knob::MinActiveCores).max(1),
            max_active_cores: self.get(Knob::MaxActiveCores).min(total),
        }
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

fn bool_text(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

fn parse_switch(knob: &'static str, input: &str) -> Result<bool, KnobError> {
    match input {
        "1" | "y" | "Y" => Ok(true),
        "0" | "n" | "N" => Ok(false),
        _ => Err(KnobError::InvalidValue { knob, value: input.to_string() }),
    }
}

// PER-CYCLE LIMITS
// PLAIN COPY OF THE KNOBS, TAKEN ONCE AT THE TOP OF EACH CYCLE

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Limits {
    pub load_all_threshold: u32,
    pub per_core_load_coefficient: u32,
    pub up_hysteresis_limit: u32,
    pub all_hysteresis_limit: u32,
    pub down_load_offset: u32,
    pub down_hysteresis_limit: u32,
    pub sample_interval_ms: u32,
    pub min_active_cores: u32,
    pub max_active_cores: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            load_all_threshold: DEFAULT_LOAD_ALL_THRESHOLD,
            per_core_load_coefficient: DEFAULT_PER_CORE_LOAD_COEFFICIENT,
            up_hysteresis_limit: DEFAULT_UP_HYSTERESIS_LIMIT,
            all_hysteresis_limit: DEFAULT_ALL_HYSTERESIS_LIMIT,
            down_load_offset: DEFAULT_DOWN_LOAD_OFFSET,
            down_hysteresis_limit: DEFAULT_DOWN_HYSTERESIS_LIMIT,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            min_active_cores: DEFAULT_MIN_ACTIVE_CORES,
            max_active_cores: DEFAULT_MAX_ACTIVE_CORES,
        }
    }
}

impl Limits {
    // MIN > MAX HAS NO VALID TARGET: THE LOOP REFUSES TO ACT
    pub fn is_consistent(&self) -> bool {
        self.min_active_cores <= self.max_active_cores
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let t = Tunables::new();
        assert_eq!(t.get(Knob::LoadAllThreshold), 180);
        assert_eq!(t.get(Knob::PerCoreLoadCoefficient), 30);
        assert_eq!(t.get(Knob::UpHysteresisLimit), 4);
        assert_eq!(t.get(Knob::AllHysteresisLimit), 2);
        assert_eq!(t.get(Knob::DownLoadOffset), 20);
        assert_eq!(t.get(Knob::DownHysteresisLimit), 10);
        assert_eq!(t.get(Knob::SampleIntervalMs), 100);
        assert_eq!(t.get(Knob::MinActiveCores), 1);
        assert_eq!(t.get(Knob::MaxActiveCores), 4);
        assert!(t.active());
        assert!(!t.debug());
        assert_eq!(t.snapshot(4), Limits::default());
    }

    #[test]
    fn every_knob_round_trips_by_name() {
        let t = Tunables::new();
        for (i, knob) in Knob::ALL.iter().enumerate() {
            let value = 1000 + i as u32;
            t.write(knob.name(), &value.to_string()).unwrap();
            assert_eq!(t.read(knob.name()).unwrap(), value.to_string());
            assert_eq!(t.get(*knob), value);
        }
    }

    #[test]
    fn write_accepts_trailing_newline() {
        // echo 50 > knob LEAVES A NEWLINE
        let t = Tunables::new();
        t.write("down_load_offset", "50\n").unwrap();
        assert_eq!(t.get(Knob::DownLoadOffset), 50);
    }

    #[test]
    fn write_rejects_garbage_and_keeps_old_value() {
        let t = Tunables::new();
        assert!(matches!(
            t.write("up_hysteresis_limit", "-3"),
            Err(KnobError::InvalidValue { .. })
        ));
        assert!(t.write("up_hysteresis_limit", "four").is_err());
        assert_eq!(t.get(Knob::UpHysteresisLimit), DEFAULT_UP_HYSTERESIS_LIMIT);
    }

    #[test]
    fn unknown_knob_is_rejected() {
        let t = Tunables::new();
        assert!(matches!(t.read("shift_all"), Err(KnobError::UnknownKnob(_))));
        assert!(matches!(t.write("nope", "1"), Err(KnobError::UnknownKnob(_))));
    }

    #[test]
    fn switches_round_trip() {
        let t = Tunables::new();
        t.write(ACTIVE_SWITCH, "0").unwrap();
        t.write(DEBUG_SWITCH, "Y").unwrap();
        assert_eq!(t.read(ACTIVE_SWITCH).unwrap(), "0");
        assert_eq!(t.read(DEBUG_SWITCH).unwrap(), "1");
        assert!(t.write(ACTIVE_SWITCH, "2").is_err());
        assert!(!t.active());
    }

    #[test]
    fn snapshot_clamps_adversarial_values() {
        let t = Tunables::new();
        t.set(Knob::MinActiveCores, 0);
        t.set(Knob::MaxActiveCores, 64);
        t.set(Knob::SampleIntervalMs, 0);
        let l = t.snapshot(8);
        assert_eq!(l.min_active_cores, 1);   // CORE 0 IS NEVER REMOVABLE
        assert_eq!(l.max_active_cores, 8);   // CAN'T EXCEED WHAT EXISTS
        assert_eq!(l.sample_interval_ms, 1);
        assert!(l.is_consistent());
    }

    #[test]
    fn snapshot_flags_min_above_max() {
        let t = Tunables::new();
        t.set(Knob::MinActiveCores, 3);
        t.set(Knob::MaxActiveCores, 2);
        assert!(!t.snapshot(4).is_consistent());
    }

    #[test]
    fn snapshot_survives_zero_total_cores() {
        let l = Tunables::new().snapshot(0);
        assert_eq!(l.max_active_cores, 1);
        assert!(l.is_consistent());
    }

    #[test]
    fn knob_names_parse_back() {
        for knob in Knob::ALL {
            assert_eq!(knob.name().parse::<Knob>().unwrap(), knob);
        }
    }
}
