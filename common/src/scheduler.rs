use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::config::LOOP_INTERVAL_MS;

/// Pending "run the cycle now" flag shared with event producers. Any number
/// of requests before the next poll collapse into a single rerun.
#[derive(Debug, Clone, Default)]
pub struct RerunSignal(Arc<AtomicBool>);

impl RerunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone)]
pub struct CycleScheduler {
    period_ms: u64,
    last_run_ms: Option<u64>,
    rerun: RerunSignal,
}

impl CycleScheduler {
    pub fn new(period_ms: u64, rerun: RerunSignal) -> Self {
        Self {
            period_ms,
            last_run_ms: None,
            rerun,
        }
    }

    pub fn rerun_signal(&self) -> RerunSignal {
        self.rerun.clone()
    }

    /// Returns true when a cycle should run now. A true result consumes any
    /// pending rerun request and restarts the period.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        let rerun = self.rerun.take();
        let due = self
            .last_run_ms
            .map(|last| now_ms.saturating_sub(last) >= self.period_ms)
            .unwrap_or(true);

        if !rerun && !due {
            return false;
        }
        self.last_run_ms = Some(now_ms);
        true
    }

    /// Time until the next periodic cycle, zero while a rerun is pending.
    pub fn until_due_ms(&self, now_ms: u64) -> u64 {
        if self.rerun.is_pending() {
            return 0;
        }
        match self.last_run_ms {
            Some(last) => self.period_ms.saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        Self::new(LOOP_INTERVAL_MS, RerunSignal::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_immediately_then_on_period() {
        let mut scheduler = CycleScheduler::default();

        assert!(scheduler.poll(0));
        assert!(!scheduler.poll(1_000));
        assert_eq!(scheduler.until_due_ms(1_000), 1_500);
        assert!(!scheduler.poll(2_499));
        assert!(scheduler.poll(2_500));
        assert!(!scheduler.poll(2_600));
    }

    #[test]
    fn many_requests_collapse_into_one_rerun() {
        let mut scheduler = CycleScheduler::default();
        let signal = scheduler.rerun_signal();
        assert!(scheduler.poll(0));

        signal.request();
        signal.request();
        signal.request();
        assert_eq!(scheduler.until_due_ms(100), 0);

        assert!(scheduler.poll(100));
        assert!(!scheduler.poll(200));
        assert!(!signal.is_pending());

        // The period restarts from the extra run.
        assert!(!scheduler.poll(2_550));
        assert!(scheduler.poll(2_600));
    }
}
