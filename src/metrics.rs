//! Process-wide counters published at `/debug/metrics/vars`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct LockWait {
    total_ns: AtomicI64,
    times: AtomicI64,
}

impl LockWait {
    fn record(&self, wait: Duration) {
        self.total_ns
            .fetch_add(wait.as_nanos() as i64, Ordering::Relaxed);
        self.times.fetch_add(1, Ordering::Relaxed);
    }

    fn average_ns(&self) -> f64 {
        let times = self.times.load(Ordering::Relaxed);
        if times == 0 {
            return 0.0;
        }
        self.total_ns.load(Ordering::Relaxed) as f64 / times as f64
    }
}

/// Atomic counters shared by every subsystem.
#[derive(Debug, Default)]
pub struct Metrics {
    sessions: AtomicI64,
    requests_in_flight: AtomicI64,
    requests_total: AtomicI64,
    config_read_duration_bits: AtomicU64,
    describe_total_ns: AtomicI64,
    describe_rlock: LockWait,
    describe_lock: LockWait,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn sessions(&self) -> i64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn request_started(&self) {
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_config_read_duration(&self, duration: Duration) {
        self.config_read_duration_bits
            .store(duration.as_secs_f64().to_bits(), Ordering::Relaxed);
    }

    pub fn describe_total(&self, elapsed: Duration) {
        self.describe_total_ns
            .fetch_add(elapsed.as_nanos() as i64, Ordering::Relaxed);
    }

    pub fn describe_rlock_wait(&self, wait: Duration) {
        self.describe_rlock.record(wait);
    }

    pub fn describe_lock_wait(&self, wait: Duration) {
        self.describe_lock.record(wait);
    }

    /// The JSON document served by the debug listener.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "number_of_sessions": self.sessions.load(Ordering::Relaxed),
            "requests_in_flight": self.requests_in_flight.load(Ordering::Relaxed),
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "config_read_duration": f64::from_bits(
                self.config_read_duration_bits.load(Ordering::Relaxed)
            ),
            "describe_total_time_ns": self.describe_total_ns.load(Ordering::Relaxed),
            "describe_rlock_wait_time_ns": self.describe_rlock.total_ns.load(Ordering::Relaxed),
            "describe_rlock_wait_times": self.describe_rlock.times.load(Ordering::Relaxed),
            "describe_rlock_wait_time_ave_ns": self.describe_rlock.average_ns(),
            "describe_lock_wait_time_ns": self.describe_lock.total_ns.load(Ordering::Relaxed),
            "describe_lock_wait_times": self.describe_lock.times.load(Ordering::Relaxed),
            "describe_lock_wait_time_ave_ns": self.describe_lock.average_ns(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_track_open_and_close() {
        let m = Metrics::new();
        m.session_opened();
        m.session_opened();
        m.session_closed();
        assert_eq!(m.sessions(), 1);
    }

    #[test]
    fn snapshot_contains_lock_averages() {
        let m = Metrics::new();
        m.describe_rlock_wait(Duration::from_nanos(100));
        m.describe_rlock_wait(Duration::from_nanos(300));
        let snap = m.snapshot();
        assert_eq!(snap["describe_rlock_wait_times"], 2);
        assert_eq!(snap["describe_rlock_wait_time_ave_ns"], 200.0);
    }

    #[test]
    fn config_read_duration_round_trips() {
        let m = Metrics::new();
        m.set_config_read_duration(Duration::from_millis(1500));
        assert_eq!(m.snapshot()["config_read_duration"], 1.5);
    }
}
