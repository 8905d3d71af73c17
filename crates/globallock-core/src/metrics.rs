// Metrics for lock acquisition, release and lease loss
// Published through the `metrics` facade; the embedding application installs the recorder

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(
        "globallock_acquire_total",
        "Total number of lock acquisition attempts by outcome"
    );
    describe_histogram!(
        "globallock_wait_seconds",
        "Time spent waiting for a lock before it was acquired"
    );
    describe_counter!("globallock_release_total", "Total number of lock releases");
    describe_gauge!("globallock_held", "Number of lock handles currently held");
    describe_counter!(
        "globallock_lease_lost_total",
        "Total number of leases lost while held"
    );
    describe_gauge!(
        "globallock_store_leases",
        "Live leases in the in-memory lease store"
    );

    tracing::info!("Lock metrics described");
}

/// Record the outcome of an acquisition attempt
pub fn record_acquire(backend: &'static str, outcome: &'static str) {
    counter!("globallock_acquire_total", "backend" => backend, "outcome" => outcome).increment(1);
}

/// Record a successful acquisition and the time spent waiting for it
pub fn record_acquired(backend: &'static str, timer: &Timer) {
    record_acquire(backend, "acquired");
    histogram!("globallock_wait_seconds", "backend" => backend).record(timer.elapsed_secs());
    gauge!("globallock_held", "backend" => backend).increment(1.0);
}

/// Record a release, explicit or by drop
pub fn record_release(backend: &'static str) {
    counter!("globallock_release_total", "backend" => backend).increment(1);
    gauge!("globallock_held", "backend" => backend).decrement(1.0);
}

/// Record an involuntary lease loss
pub fn record_lease_lost(reason: &'static str) {
    counter!("globallock_lease_lost_total", "reason" => reason).increment(1);
}

/// Timer helper for measuring wait duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 1.0);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        let timer = Timer::new();
        record_acquired("memory", &timer);
        record_acquire("memory", "busy");
        record_release("memory");
        record_lease_lost("taken");
    }
}
