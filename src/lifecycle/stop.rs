use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;

/// Cooperative, one-shot cancellation flag shared by every loop.
///
/// Starts cleared, is set at most once and never reset. Loops poll it at each
/// iteration boundary; nothing is interrupted mid-wait.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<CachePadded<AtomicBool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns true for the call that actually set the flag.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `total` in slices of at most `poll`, returning early once stopped.
    /// Returns true if the signal was observed.
    pub fn sleep(&self, total: Duration, poll: Duration) -> bool {
        let deadline = std::time::Instant::now() + total;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(poll));
        }
    }

    /// Resolve once the signal is set, polling every `poll`
    pub async fn stopped(&self, poll: Duration) {
        while !self.is_stopped() {
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn trigger_is_one_shot() {
        let stop = StopSignal::new();
        let clone = stop.clone();
        assert!(!stop.is_stopped());
        assert!(clone.trigger());
        assert!(!stop.trigger());
        assert!(stop.is_stopped());
    }

    #[test]
    fn sleep_returns_early_when_stopped() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.trigger();
        });
        let started = Instant::now();
        assert!(stop.sleep(Duration::from_secs(5), Duration::from_millis(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_runs_full_duration_otherwise() {
        let stop = StopSignal::new();
        let started = Instant::now();
        assert!(!stop.sleep(Duration::from_millis(40), Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
