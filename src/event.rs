// CORESHIFT EVENT LOG
// RECORDS ONE ENTRY PER GOVERNOR CYCLE
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING THE LOOP.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::hysteresis::Action;

const MAX_RECORDS: usize = 8192;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    // GOVERNOR SWITCHED OFF: NOTHING SAMPLED
    Inactive,
    // MIN > MAX: REFUSED TO ACT
    Inconsistent,
    // SAMPLE REJECTED: DECISION SKIPPED
    Anomaly,
    // DECIDED, NOTHING TO DO
    Idle,
    Acted,
    // DECIDED, ACTUATOR REFUSED
    Failed,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Inconsistent => "INCONSISTENT",
            Self::Anomaly => "ANOMALY",
            Self::Idle => "IDLE",
            Self::Acted => "ACTED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CycleRecord {
    pub ts_ns: u64,
    pub load: u64,
    pub online: u32,
    pub action: Action,
    pub outcome: Outcome,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Totals {
    pub cycles: u64,
    pub added: u64,
    pub added_all: u64,
    pub removed: u64,
    pub failed: u64,
    pub anomalies: u64,
    pub skipped: u64,
    pub load_sum: u64,
    pub peak_load: u64,
}

pub struct EventLog {
    records: Vec<CycleRecord>,
    head: usize,
    len: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            records: vec![
                CycleRecord { ts_ns: 0, load: 0, online: 0, action: Action::None, outcome: Outcome::Idle };
                MAX_RECORDS
            ],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE CYCLE. OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn record(&mut self, load: u64, online: u32, action: Action, outcome: Outcome) {
        self.records[self.head] = CycleRecord {
            ts_ns: now_ns(),
            load,
            online,
            action,
            outcome,
        };
        self.head = (self.head + 1) % MAX_RECORDS;
        if self.len < MAX_RECORDS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ITERATE RECORDS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &CycleRecord> {
        let start = if self.len < MAX_RECORDS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.records[(start + i) % MAX_RECORDS])
    }

    pub fn totals(&self) -> Totals {
        let mut t = Totals::default();
        for r in self.iter_chronological() {
            t.cycles += 1;
            match r.outcome {
                Outcome::Acted => match r.action {
                    Action::AddOne => t.added += 1,
                    Action::AddAll => t.added_all += 1,
                    Action::RemoveOne => t.removed += 1,
                    Action::None => {}
                },
                Outcome::Failed => t.failed += 1,
                Outcome::Anomaly => t.anomalies += 1,
                Outcome::Inactive | Outcome::Inconsistent => t.skipped += 1,
                Outcome::Idle => {}
            }
            if matches!(r.outcome, Outcome::Idle | Outcome::Acted | Outcome::Failed) {
                t.load_sum += r.load;
                t.peak_load = t.peak_load.max(r.load);
            }
        }
        t
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<8} {:<12} {:<12}",
            "TIME_S", "LOAD", "ONLINE", "ACTION", "OUTCOME");
        println!("{}", "-".repeat(54));

        for r in std::iter::once(first).chain(iter) {
            let elapsed_s = r.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<8} {:<8} {:<12} {:<12}",
                elapsed_s, r.load, r.online, r.action.label(), r.outcome.label());
        }

        if self.len == MAX_RECORDS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} CYCLES)", MAX_RECORDS);
        }
        println!("TOTAL CYCLES: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let t = self.totals();
        let mut iter = self.iter_chronological();
        let first_ts = iter.next().map(|r| r.ts_ns).unwrap_or(0);
        let last_ts = iter.last().map(|r| r.ts_ns).unwrap_or(first_ts);
        let elapsed_s = last_ts.saturating_sub(first_ts) as f64 / 1_000_000_000.0;
        let decided = t.cycles - t.anomalies - t.skipped;

        println!("\n{}", "=".repeat(50));
        println!("CORESHIFT SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  CYCLES:            {}", t.cycles);
        println!("  CORES ONLINED:     {} (+{} ALL-ON)", t.added, t.added_all);
        println!("  CORES OFFLINED:    {}", t.removed);
        println!("  FAILED ACTIONS:    {}", t.failed);
        println!("  ANOMALIES:         {}", t.anomalies);
        println!("  SKIPPED:           {}", t.skipped);
        if decided > 0 {
            println!("  AVG LOAD:          {:.1}", t.load_sum as f64 / decided as f64);
        }
        println!("  PEAK LOAD:         {}", t.peak_load);
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stores_cycle() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.record(150, 2, Action::AddOne, Outcome::Acted);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records[0].load, 150);
        assert_eq!(log.records[0].online, 2);
        assert_eq!(log.records[0].action, Action::AddOne);
        assert_eq!(log.records[0].outcome, Outcome::Acted);
        assert!(log.records[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_RECORDS {
            log.record(i as u64, 1, Action::None, Outcome::Idle);
        }
        assert_eq!(log.len(), MAX_RECORDS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.record(9999, 1, Action::None, Outcome::Idle);
        assert_eq!(log.len(), MAX_RECORDS);
        assert_eq!(log.head, 1);
        assert_eq!(log.records[0].load, 9999);

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<u64> = log.iter_chronological().map(|r| r.load).collect();
        assert_eq!(ordered[0], 1);
        assert_eq!(*ordered.last().unwrap(), 9999);
        assert_eq!(ordered.len(), MAX_RECORDS);
    }

    #[test]
    fn totals_count_by_outcome() {
        let mut log = EventLog::new();
        log.record(100, 2, Action::None, Outcome::Idle);
        log.record(300, 2, Action::AddAll, Outcome::Acted);
        log.record(0, 4, Action::None, Outcome::Anomaly);
        log.record(5, 4, Action::RemoveOne, Outcome::Acted);
        log.record(5, 3, Action::RemoveOne, Outcome::Failed);
        log.record(0, 3, Action::None, Outcome::Inactive);

        let t = log.totals();
        assert_eq!(t.cycles, 6);
        assert_eq!(t.added_all, 1);
        assert_eq!(t.removed, 1);
        assert_eq!(t.failed, 1);
        assert_eq!(t.anomalies, 1);
        assert_eq!(t.skipped, 1);
        assert_eq!(t.load_sum, 410);
        assert_eq!(t.peak_load, 300);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = EventLog::new();
        log.summary(); // SHOULD NOT PANIC WITH 0 RECORDS
    }

    #[test]
    fn summary_no_panic_only_skipped() {
        let mut log = EventLog::new();
        log.record(0, 1, Action::None, Outcome::Inactive);
        log.record(0, 1, Action::None, Outcome::Inactive);
        log.summary(); // NO DECIDED CYCLES: NO AVERAGE, NO DIVIDE BY ZERO
    }

    #[test]
    fn dump_no_panic() {
        let mut log = EventLog::new();
        log.dump();
        log.record(100, 2, Action::None, Outcome::Idle);
        log.record(200, 2, Action::AddOne, Outcome::Acted);
        log.dump();
    }
}
