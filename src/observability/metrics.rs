//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! call outcomes, MQTT transport activity and gateway lifecycle.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Number of latency samples kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Call metrics (atomic for high frequency)
    calls_started: AtomicU64,
    calls_in_flight: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    calls_timed_out: AtomicU64,
    calls_abandoned: AtomicU64,
    replies_unmatched: AtomicU64,

    // MQTT metrics
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    connection_start_time: AtomicU64,

    // Call latencies and per-operation counts (mutex protected)
    call_latencies: Mutex<Vec<u64>>, // in milliseconds
    operation_stats: Mutex<HashMap<String, OperationStats>>,

    // Lifecycle metrics
    gateway_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            calls_started: AtomicU64::new(0),
            calls_in_flight: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            calls_timed_out: AtomicU64::new(0),
            calls_abandoned: AtomicU64::new(0),
            replies_unmatched: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            call_latencies: Mutex::new(Vec::new()),
            operation_stats: Mutex::new(HashMap::new()),
            gateway_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Call metrics
    pub fn call_started(&self, operation: &str) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
        self.calls_in_flight.fetch_add(1, Ordering::Relaxed);
        lock(&self.operation_stats)
            .entry(operation.to_string())
            .or_default()
            .calls += 1;
    }

    fn call_finished(&self) {
        // Saturating: a reset() between start and finish must not wrap
        let _ = self
            .calls_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn call_succeeded(&self, operation: &str, duration: Duration) {
        self.call_finished();
        self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
        lock(&self.operation_stats)
            .entry(operation.to_string())
            .or_default()
            .succeeded += 1;
    }

    pub fn call_failed(&self, operation: &str) {
        self.call_finished();
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
        lock(&self.operation_stats)
            .entry(operation.to_string())
            .or_default()
            .failed += 1;
    }

    pub fn call_timed_out(&self, operation: &str) {
        self.call_finished();
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
        lock(&self.operation_stats)
            .entry(operation.to_string())
            .or_default()
            .timed_out += 1;
    }

    /// The caller dropped the call before it finished
    pub fn call_abandoned(&self, operation: &str) {
        self.call_finished();
        self.calls_abandoned.fetch_add(1, Ordering::Relaxed);
        lock(&self.operation_stats)
            .entry(operation.to_string())
            .or_default()
            .abandoned += 1;
    }

    /// Count a call as started; the returned record must be finished with
    /// one outcome, or it is counted as abandoned when dropped
    pub fn begin_call(&self, operation: &str) -> CallRecord<'_> {
        self.call_started(operation);
        CallRecord {
            collector: self,
            operation: operation.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn reply_unmatched(&self) {
        self.replies_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, duration: Duration) {
        let mut latencies = lock(&self.call_latencies);
        latencies.push(duration.as_millis() as u64);
        if latencies.len() > LATENCY_WINDOW {
            latencies.remove(0);
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_gateway_state(&self, state: &str) {
        let mut current_state = lock(&self.gateway_state);
        if *current_state != state {
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            *current_state = state.to_string();
        }
    }

    pub fn gateway_state(&self) -> String {
        lock(&self.gateway_state).clone()
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.calls_started,
            &self.calls_in_flight,
            &self.calls_succeeded,
            &self.calls_failed,
            &self.calls_timed_out,
            &self.calls_abandoned,
            &self.replies_unmatched,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
            &self.connection_start_time,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        lock(&self.call_latencies).clear();
        lock(&self.operation_stats).clear();
        *lock(&self.gateway_state) = "initializing".to_string();
    }

    /// Calculate latency statistics: (avg, p50, p95, p99)
    fn latency_statistics(&self) -> (f64, f64, f64, f64) {
        let mut sorted = lock(&self.call_latencies).clone();
        if sorted.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        sorted.sort_unstable();

        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.latency_statistics();

        let connection_start = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if connection_start > 0 {
            now.saturating_sub(connection_start)
        } else {
            0
        };

        MetricsSnapshot {
            calls: CallMetrics {
                started: self.calls_started.load(Ordering::Relaxed),
                in_flight: self.calls_in_flight.load(Ordering::Relaxed),
                succeeded: self.calls_succeeded.load(Ordering::Relaxed),
                failed: self.calls_failed.load(Ordering::Relaxed),
                timed_out: self.calls_timed_out.load(Ordering::Relaxed),
                abandoned: self.calls_abandoned.load(Ordering::Relaxed),
                replies_unmatched: self.replies_unmatched.load(Ordering::Relaxed),
                avg_latency_ms: avg,
                latency_p50_ms: p50,
                latency_p95_ms: p95,
                latency_p99_ms: p99,
                operations: lock(&self.operation_stats).clone(),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            lifecycle: LifecycleMetrics {
                current_state: self.gateway_state(),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

/// One in-flight call as seen by a [`MetricsCollector`]
pub struct CallRecord<'a> {
    collector: &'a MetricsCollector,
    operation: String,
    started: Instant,
    finished: bool,
}

impl CallRecord<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn succeeded(mut self) {
        self.finished = true;
        self.collector
            .call_succeeded(&self.operation, self.started.elapsed());
    }

    pub fn failed(mut self) {
        self.finished = true;
        self.collector.call_failed(&self.operation);
    }

    pub fn timed_out(mut self) {
        self.finished = true;
        self.collector.call_timed_out(&self.operation);
    }
}

impl Drop for CallRecord<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.collector.call_abandoned(&self.operation);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-operation call counts
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OperationStats {
    pub calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub abandoned: u64,
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub calls: CallMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct CallMetrics {
    pub started: u64,
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub abandoned: u64,
    pub replies_unmatched: u64,
    pub avg_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub operations: HashMap<String, OperationStats>,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = (lower_index + 1).min(len - 1);
        let weight = index.fract();
        sorted_data[lower_index] as f64 * (1.0 - weight) + sorted_data[upper_index] as f64 * weight
    }
}
