// CORESHIFT DECISION ENGINE TESTS
// SCRIPTED LOAD SEQUENCES AGAINST HysteresisState. NO HARDWARE.

use coreshift::hysteresis::{thresholds, Action, HysteresisState};
use coreshift::knobfs::KnobDir;
use coreshift::platform::CoreSet;
use coreshift::selector::{select_all_to_activate, select_to_deactivate};
use coreshift::tuning::{Knob, Limits, Tunables};
use coreshift::PRIMARY_CORE;

fn limits() -> Limits {
    Limits::default()
}

fn feed(state: &mut HysteresisState, loads: &[u64], online: u32, l: &Limits) -> Vec<Action> {
    loads.iter().map(|&load| state.decide(load, online, l)).collect()
}

// ---------------------------------------------------------------------------
// STEP-UP
// ---------------------------------------------------------------------------

#[test]
fn load_below_up_never_adds() {
    let l = limits();
    for online in 1..l.max_active_cores {
        let up = thresholds(online, &l).up;
        for load in (0..=up).step_by(7).chain([up]) {
            let mut h = HysteresisState::new();
            for _ in 0..50 {
                assert_ne!(h.decide(load, online, &l), Action::AddOne, "online={online} load={load}");
            }
            assert_eq!(h.up_streak, 0);
        }
    }
}

#[test]
fn two_cycles_above_up_add_one_core() {
    let l = Limits { per_core_load_coefficient: 40, up_hysteresis_limit: 2, ..limits() };
    let up = thresholds(2, &l).up;
    assert_eq!(up, 160);

    let mut h = HysteresisState::new();
    assert_eq!(h.decide(up + 1, 2, &l), Action::None);
    assert_eq!(h.up_streak, 1);
    assert_eq!(h.decide(up + 1, 2, &l), Action::AddOne);

    h.commit(Action::AddOne);
    assert_eq!(h.up_streak, 0);
    assert_eq!(h.down_streak, 0);
}

#[test]
fn one_dip_resets_up_streak() {
    let l = limits();
    let mut h = HysteresisState::new();
    // up(2) = 120, LIMIT 4
    let actions = feed(&mut h, &[130, 130, 130, 100, 130, 130, 130], 2, &l);
    assert!(actions.iter().all(|&a| a == Action::None));
    assert_eq!(h.up_streak, 3);
    assert_eq!(h.decide(130, 2, &l), Action::AddOne);
}

// ---------------------------------------------------------------------------
// STEP-DOWN
// ---------------------------------------------------------------------------

#[test]
fn down_streak_decays_by_one() {
    let l = limits();
    // down(3) = MIN(30 * 2^2, 180) - 20 = 100
    assert_eq!(thresholds(3, &l).down, 100);

    let mut h = HysteresisState::new();
    let below = [10u64; 5];
    assert!(feed(&mut h, &below, 3, &l).iter().all(|&a| a == Action::None));
    assert_eq!(h.down_streak, 5);

    // ONE SAMPLE IN THE DEAD ZONE: 5 -> 4, NOT 0
    assert_eq!(h.decide(150, 3, &l), Action::None);
    assert_eq!(h.down_streak, 4);

    assert!(feed(&mut h, &below, 3, &l).iter().all(|&a| a == Action::None));
    assert_eq!(h.down_streak, 9);
    assert_eq!(h.decide(10, 3, &l), Action::RemoveOne);

    h.commit(Action::RemoveOne);
    assert_eq!(h, HysteresisState::new());
}

#[test]
fn remove_never_fires_at_min() {
    let l = Limits { min_active_cores: 2, down_hysteresis_limit: 1, ..limits() };
    let mut h = HysteresisState::new();
    for _ in 0..100 {
        assert_eq!(h.decide(0, 2, &l), Action::None);
    }
    assert_eq!(h.down_streak, 0);
    // ONE ABOVE MIN IT FIRES IMMEDIATELY
    assert_eq!(h.decide(0, 3, &l), Action::RemoveOne);
}

#[test]
fn add_never_fires_at_max() {
    let l = Limits { up_hysteresis_limit: 1, all_hysteresis_limit: 1, ..limits() };
    let mut h = HysteresisState::new();
    for load in [0u64, 500, 1_000, 10_000, u64::MAX] {
        for _ in 0..10 {
            let a = h.decide(load, l.max_active_cores, &l);
            assert!(a != Action::AddOne && a != Action::AddAll, "load={load} -> {a:?}");
        }
    }
    assert_eq!(h.up_streak, 0);
    assert_eq!(h.all_streak, 0);
}

// ---------------------------------------------------------------------------
// ALL-ON
// ---------------------------------------------------------------------------

#[test]
fn add_all_wins_over_other_triggers() {
    let l = limits();
    for load in (0..600u64).step_by(5) {
        for online in 1..l.max_active_cores {
            let mut h = HysteresisState {
                up_streak: l.up_hysteresis_limit - 1,
                all_streak: l.all_hysteresis_limit - 1,
                down_streak: l.down_hysteresis_limit - 1,
            };
            let action = h.decide(load, online, &l);
            if load > l.load_all_threshold as u64 {
                assert_eq!(action, Action::AddAll, "load={load} online={online}");
            }
        }
    }
}

#[test]
fn add_all_after_two_cycles_over_threshold() {
    let l = limits();
    let mut h = HysteresisState::new();
    assert_eq!(feed(&mut h, &[200, 200], 1, &l), vec![Action::None, Action::AddAll]);
    h.commit(Action::AddAll);
    assert_eq!(h, HysteresisState::new());
}

// ---------------------------------------------------------------------------
// STATE
// ---------------------------------------------------------------------------

#[test]
fn dead_zone_is_idempotent() {
    let l = limits();
    // down(2) = 10, up(2) = 120
    let mut h = HysteresisState::new();
    for _ in 0..1_000 {
        assert_eq!(h.decide(60, 2, &l), Action::None);
        assert_eq!(h, HysteresisState::new());
    }
}

#[test]
fn failed_action_keeps_streak_pinned() {
    let l = limits();
    let mut h = HysteresisState::new();
    feed(&mut h, &[130; 4], 2, &l);
    // NO commit(): THE NEXT HIGH SAMPLE RETRIES
    assert_eq!(h.up_streak, 4);
    assert_eq!(h.decide(130, 2, &l), Action::AddOne);
    assert_eq!(h.up_streak, 4);
}

#[test]
fn huge_offset_disables_step_down() {
    let l = Limits { down_load_offset: u32::MAX, down_hysteresis_limit: 1, ..limits() };
    let mut h = HysteresisState::new();
    for online in 2..=4 {
        assert_eq!(thresholds(online, &l).down, 0);
        assert_eq!(h.decide(0, online, &l), Action::None);
    }
}

// ---------------------------------------------------------------------------
// SELECTION + CONFIG SURFACE
// ---------------------------------------------------------------------------

#[test]
fn primary_core_is_never_a_target() {
    let online: CoreSet = (0..8).collect();
    let most_idle_is_primary = |c: u32| if c == PRIMARY_CORE { u64::MAX } else { c as u64 };
    assert_eq!(select_to_deactivate(&online, most_idle_is_primary), Some(7));
    assert!(!select_all_to_activate(&CoreSet::new(), &online).contains(&PRIMARY_CORE));
}

#[test]
fn knob_writes_read_back_before_next_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let t = Tunables::new();
    let mut dir = KnobDir::create(tmp.path()).unwrap();
    dir.publish(&t).unwrap();

    for (i, knob) in Knob::ALL.iter().enumerate() {
        let value = (i as u32 + 2).to_string();
        std::fs::write(tmp.path().join(knob.name()), &value).unwrap();
        dir.sync(&t);
        assert_eq!(t.read(knob.name()).unwrap(), value);
    }
    let l = t.snapshot(16);
    assert_eq!(l.load_all_threshold, 2);
    assert_eq!(l.max_active_cores, 10);
}
