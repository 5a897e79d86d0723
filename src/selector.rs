// CORESHIFT CORE SELECTION
// WHICH CPU TO ONLINE OR OFFLINE. CPU 0 IS NEVER A CANDIDATE.
//
// ONLINE:  LOWEST-NUMBERED OFFLINE CPU (KEEPS THE ACTIVE SET PACKED LOW)
// OFFLINE: MOST IDLE ONLINE CPU SINCE THE LAST SAMPLE, TIES TO LOWEST ID

use crate::platform::CoreSet;
use crate::{CoreId, PRIMARY_CORE};

// CANDIDATES COME FROM THE PRESENT SET, NOT 0..possible
pub fn select_to_activate(online: &CoreSet, present: &CoreSet) -> Option<CoreId> {
    present
        .iter()
        .copied()
        .find(|&c| c != PRIMARY_CORE && !online.contains(&c))
}

// PICK THE ONLINE, NON-PRIMARY CORE WITH THE HIGHEST IDLE INDICATOR
// THE INDICATOR IS POLLED HERE, ONCE PER CANDIDATE
pub fn select_to_deactivate<F>(online: &CoreSet, mut idle_indicator: F) -> Option<CoreId>
where
    F: FnMut(CoreId) -> u64,
{
    let mut best: Option<(CoreId, u64)> = None;
    for &core in online.iter().filter(|&&c| c != PRIMARY_CORE) {
        let idle = idle_indicator(core);
        // STRICT > KEEPS THE FIRST (LOWEST) CORE ON A TIE
        match best {
            Some((_, top)) if idle <= top => {}
            _ => best = Some((core, idle)),
        }
    }
    best.map(|(core, _)| core)
}

// EVERY OFFLINE, NON-PRIMARY CORE IN ASCENDING ORDER. THE CALLER BRINGS
// THEM UP ONE AT A TIME WHILE THE ONLINE COUNT STAYS BELOW THE MAXIMUM
pub fn select_all_to_activate(online: &CoreSet, present: &CoreSet) -> Vec<CoreId> {
    present
        .iter()
        .copied()
        .filter(|&c| c != PRIMARY_CORE && !online.contains(&c))
        .collect()
}
