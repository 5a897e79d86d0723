// CORESHIFT UTILIZATION SAMPLER
// CUMULATIVE IDLE/WALL COUNTERS IN, ONE AGGREGATE LOAD NUMBER OUT.
//
// PER CORE:  load% = 100 * (wall_delta - idle_delta) / wall_delta
// AGGREGATE: SUM OF load% * cur_freq / max_freq OVER ONLINE CORES
//
// ONE FULLY BUSY CORE AT MAX FREQUENCY = 100. FOUR BUSY CORES AT HALF
// FREQUENCY = 200. THRESHOLDS IN tuning.rs ARE IN THESE UNITS.

use std::io;

use tracing::warn;

use crate::error::SampleError;
use crate::platform::{CoreSet, CoreTimes};
use crate::CoreId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PerCoreSample {
    pub core: CoreId,
    pub idle_delta_us: u64,
    pub wall_delta_us: u64,
    pub load_pct: u32,
}

// FREQUENCY SCALING FACTOR. max == 0 MEANS NO CPUFREQ: LOAD PASSES UNSCALED.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FreqScale {
    pub cur: u32,
    pub max: u32,
}

impl FreqScale {
    pub const UNSCALED: FreqScale = FreqScale { cur: 0, max: 0 };

    pub fn new(cur: u32, max: u32) -> Self {
        Self { cur, max }
    }

    pub fn apply(&self, load_pct: u64) -> u64 {
        if self.max == 0 {
            return load_pct;
        }
        // BOOST CLOCKS CAN REPORT cur > max; NEVER SCALE A CORE PAST 100%
        load_pct * self.cur.min(self.max) as u64 / self.max as u64
    }
}

pub struct Sampler {
    baselines: Vec<CoreTimes>,
    last: Vec<PerCoreSample>,
}

impl Sampler {
    // ONE BASELINE SLOT PER POSSIBLE CPU, ALLOCATED ONCE
    pub fn new(possible_cores: usize) -> Self {
        Self {
            baselines: vec![CoreTimes::default(); possible_cores],
            last: Vec::with_capacity(possible_cores),
        }
    }

    // RECORD CURRENT COUNTERS AS THE BASELINE WITHOUT PRODUCING A SAMPLE
    pub fn prime<F>(&mut self, online: &CoreSet, mut read: F)
    where
        F: FnMut(CoreId) -> io::Result<CoreTimes>,
    {
        for &core in online {
            if let (Some(base), Ok(now)) = (self.baselines.get_mut(core as usize), read(core)) {
                *base = now;
            }
        }
        self.last.clear();
    }

    // SAMPLE EVERY ONLINE CORE AND RETURN THE AGGREGATE LOAD
    // BASELINES ADVANCE FOR EVERY CORE THAT COULD BE READ, EVEN WHEN THE
    // CYCLE IS REJECTED, SO ONE BAD WINDOW NEVER POISONS THE NEXT
    pub fn sample<F>(&mut self, online: &CoreSet, freq: FreqScale, mut read: F) -> Result<u64, SampleError>
    where
        F: FnMut(CoreId) -> io::Result<CoreTimes>,
    {
        self.last.clear();
        let mut failure: Option<SampleError> = None;
        let mut aggregate = 0u64;
        let capacity = self.baselines.len();

        for &core in online {
            let Some(base) = self.baselines.get_mut(core as usize) else {
                warn!(cpu = core, capacity, "online cpu beyond sampler capacity, skipped");
                continue;
            };
            let now = match read(core) {
                Ok(t) => t,
                Err(e) => {
                    failure.get_or_insert(SampleError::Read(e));
                    continue;
                }
            };

            // COUNTERS ARE MONOTONIC. A BACKWARDS STEP READS AS ZERO DELTA.
            let idle_delta_us = now.idle_us.saturating_sub(base.idle_us);
            let wall_delta_us = now.wall_us.saturating_sub(base.wall_us);
            *base = now;

            if wall_delta_us == 0 {
                failure.get_or_insert(SampleError::ZeroWall { core });
                continue;
            }
            if wall_delta_us < idle_delta_us {
                failure.get_or_insert(SampleError::ClockSkew {
                    core,
                    idle_us: idle_delta_us,
                    wall_us: wall_delta_us,
                });
                continue;
            }

            let busy = (wall_delta_us - idle_delta_us) as u128;
            let load_pct = (busy * 100 / wall_delta_us as u128) as u32;
            aggregate += freq.apply(load_pct as u64);
            self.last.push(PerCoreSample { core, idle_delta_us, wall_delta_us, load_pct });
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if self.last.is_empty() {
            return Err(SampleError::NoCores);
        }
        Ok(aggregate)
    }

    // RECENT IDLENESS OF ONE CORE: IDLE TIME IN THE LAST SAMPLED WINDOW PLUS
    // IDLE TIME SINCE THEN. HIGHER = MORE IDLE
    pub fn recent_idle(&self, core: CoreId, now: CoreTimes) -> u64 {
        let window = self.last.iter()
            .find(|s| s.core == core)
            .map(|s| s.idle_delta_us)
            .unwrap_or(0);
        let since = self.baselines
            .get(core as usize)
            .map(|base| now.idle_us.saturating_sub(base.idle_us))
            .unwrap_or(0);
        window + since
    }

    pub fn last_samples(&self) -> &[PerCoreSample] {
        &self.last
    }
}
