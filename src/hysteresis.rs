// CORESHIFT DECISION ENGINE
// THREE STREAK COUNTERS TURN NOISY LOAD SAMPLES INTO RARE, STABLE ACTIONS.
//
//   ALL-ON:    LOAD ABOVE load_all_threshold          -> ONLINE EVERY CORE
//   STEP-UP:   LOAD BETWEEN up AND load_all_threshold -> ONLINE ONE CORE
//   STEP-DOWN: LOAD BELOW down                        -> OFFLINE ONE CORE
//
//   up   = COEF * N^2
//   down = MIN(COEF * (N-1)^2, load_all_threshold) - down_load_offset, FLOOR 0
//
// THE GAP BETWEEN down(N) AND up(N) IS THE DEAD ZONE: NO ACTION, NO OSCILLATION.
// UP/ALL STREAKS RESET ON THE FIRST SAMPLE THAT MISSES. THE DOWN STREAK ONLY
// DECAYS BY ONE, SO A SINGLE SPIKE DOESN'T ERASE A LONG RUN OF IDLE EVIDENCE.

use crate::tuning::Limits;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Action {
    None,
    AddOne,
    AddAll,
    RemoveOne,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AddOne => "ADD_ONE",
            Self::AddAll => "ADD_ALL",
            Self::RemoveOne => "REMOVE_ONE",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Thresholds {
    pub up: u64,
    pub down: u64,
}

// SIGNED MATH, SATURATING AT ZERO. AN OFFSET LARGER THAN THE RAW DOWN LOAD
// MEANS "NEVER STEP DOWN", NOT A WRAPPED-AROUND HUGE THRESHOLD.
pub fn thresholds(online: u32, limits: &Limits) -> Thresholds {
    let coef = limits.per_core_load_coefficient as i64;
    let n = online as i64;
    let below = (n - 1).max(0);
    let offset = limits.down_load_offset as i64;

    let up = coef.saturating_mul(n).saturating_mul(n);
    let down_raw = coef.saturating_mul(below).saturating_mul(below);
    let down = (down_raw - offset)
        .min(limits.load_all_threshold as i64 - offset)
        .max(0);

    Thresholds { up: up as u64, down: down as u64 }
}

// A LIMIT OF ZERO DISABLES THE ACTION
fn reached(streak: u32, limit: u32) -> bool {
    limit > 0 && streak >= limit
}

// STREAKS STOP COUNTING AT THEIR LIMIT. A FAILED ACTION KEEPS THE STREAK
// PINNED THERE SO THE NEXT CYCLE RETRIES, AND A LATER DECAY STARTS FROM IT.
fn bump(streak: u32, limit: u32) -> u32 {
    streak.saturating_add(1).min(limit)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct HysteresisState {
    pub up_streak: u32,
    pub all_streak: u32,
    pub down_streak: u32,
}

impl HysteresisState {
    pub fn new() -> Self {
        Self::default()
    }

    // FEED ONE AGGREGATE LOAD SAMPLE. UPDATES THE STREAK COUNTERS AND RETURNS
    // THE HIGHEST-PRIORITY ACTION WHOSE STREAK REACHED ITS LIMIT
    // POST-ACTION RESETS ARE NOT APPLIED HERE: CALL commit()
    // ONCE THE ACTION HAS ACTUALLY BEEN CARRIED OUT
    pub fn decide(&mut self, load: u64, online: u32, limits: &Limits) -> Action {
        let Thresholds { up, down } = thresholds(online, limits);
        let all = limits.load_all_threshold as u64;
        let mut action = Action::None;

        if online < limits.max_active_cores {
            // ALL-ON
            if load > all {
                self.all_streak = bump(self.all_streak, limits.all_hysteresis_limit);
                if reached(self.all_streak, limits.all_hysteresis_limit) {
                    action = Action::AddAll;
                }
            } else if self.all_streak > 0 {
                self.all_streak = 0;
            }

            // STEP-UP
            if load > up && load < all {
                self.up_streak = bump(self.up_streak, limits.up_hysteresis_limit);
                if reached(self.up_streak, limits.up_hysteresis_limit) && action == Action::None {
                    action = Action::AddOne;
                }
            } else if load <= up && load < all {
                self.up_streak = 0;
            }
        }

        if online > limits.min_active_cores {
            // STEP-DOWN
            if load < down {
                self.down_streak = bump(self.down_streak, limits.down_hysteresis_limit);
                if reached(self.down_streak, limits.down_hysteresis_limit) && action == Action::None {
                    action = Action::RemoveOne;
                }
            } else {
                self.down_streak = self.down_streak.saturating_sub(1);
            }
        }

        action
    }

    // CLEAR HYSTERESIS MEMORY AFTER AN ACTION SUCCEEDED
    pub fn commit(&mut self, action: Action) {
        match action {
            Action::None => {}
            Action::AddOne => {
                self.up_streak = 0;
                self.down_streak = 0;
            }
            Action::AddAll | Action::RemoveOne => self.reset(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_default_two_cores() {
        let t = thresholds(2, &Limits::default());
        assert_eq!(t.up, 120);            // 30 * 2 * 2
        assert_eq!(t.down, 10);           // 30 * 1 * 1 - 20
    }

    #[test]
    fn thresholds_down_capped_by_all_threshold() {
        // 30 * 3 * 3 = 270 > 180, SO DOWN = 180 - 20
        let t = thresholds(4, &Limits::default());
        assert_eq!(t.up, 480);
        assert_eq!(t.down, 160);
    }

    #[test]
    fn thresholds_offset_larger_than_raw_saturates() {
        let limits = Limits { down_load_offset: 500, ..Limits::default() };
        assert_eq!(thresholds(2, &limits).down, 0);
        assert_eq!(thresholds(1, &limits).down, 0);
    }

    #[test]
    fn thresholds_zero_online_does_not_underflow() {
        let t = thresholds(0, &Limits::default());
        assert_eq!(t.up, 0);
        assert_eq!(t.down, 0);
    }

    #[test]
    fn streak_stops_at_limit() {
        let limits = Limits { up_hysteresis_limit: 3, ..Limits::default() };
        let mut s = HysteresisState::new();
        for _ in 0..10 {
            s.decide(150, 2, &limits);
        }
        assert_eq!(s.up_streak, 3);
    }

    #[test]
    fn zero_limit_disables_action() {
        let limits = Limits { up_hysteresis_limit: 0, ..Limits::default() };
        let mut s = HysteresisState::new();
        for _ in 0..10 {
            assert_eq!(s.decide(150, 2, &limits), Action::None);
        }
        assert_eq!(s.up_streak, 0);
    }

    #[test]
    fn commit_none_is_noop() {
        let mut s = HysteresisState { up_streak: 1, all_streak: 2, down_streak: 3 };
        s.commit(Action::None);
        assert_eq!(s, HysteresisState { up_streak: 1, all_streak: 2, down_streak: 3 });
    }

    #[test]
    fn commit_add_one_keeps_all_streak() {
        let mut s = HysteresisState { up_streak: 4, all_streak: 1, down_streak: 3 };
        s.commit(Action::AddOne);
        assert_eq!(s, HysteresisState { up_streak: 0, all_streak: 1, down_streak: 0 });
    }

    #[test]
    fn commit_add_all_and_remove_clear_everything() {
        for action in [Action::AddAll, Action::RemoveOne] {
            let mut s = HysteresisState { up_streak: 4, all_streak: 2, down_streak: 10 };
            s.commit(action);
            assert_eq!(s, HysteresisState::default(), "{:?}", action);
        }
    }
}
