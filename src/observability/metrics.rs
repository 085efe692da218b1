//! Thread-safe metrics collection system
//!
//! Atomic counters for the command queue, protocol traffic and the agent loop,
//! plus per-command-kind dispatch timings behind a mutex.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Command queue metrics
    commands_enqueued: AtomicU64,
    commands_rejected: AtomicU64,
    commands_dispatched: AtomicU64,
    commands_failed: AtomicU64,

    // MQTT metrics
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_active: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    acks_received: AtomicU64,
    publishes_matched: AtomicU64,
    publishes_unmatched: AtomicU64,
    sessions_resumed: AtomicU64,
    sessions_rebuilt: AtomicU64,

    // Dispatch statistics per command kind
    command_stats: Mutex<HashMap<String, CommandStats>>,

    // Loop lifecycle
    loop_state: Mutex<String>,
    uptime_start: AtomicU64,
    service_steps: AtomicU64,
    loop_exits: AtomicU64,
    fatal_exits: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            commands_enqueued: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            commands_dispatched: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            publishes_matched: AtomicU64::new(0),
            publishes_unmatched: AtomicU64::new(0),
            sessions_resumed: AtomicU64::new(0),
            sessions_rebuilt: AtomicU64::new(0),
            command_stats: Mutex::new(HashMap::new()),
            loop_state: Mutex::new("idle".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            service_steps: AtomicU64::new(0),
            loop_exits: AtomicU64::new(0),
            fatal_exits: AtomicU64::new(0),
        }
    }

    // Command queue metrics
    pub fn command_enqueued(&self) {
        self.commands_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched command and how long it took
    pub fn command_dispatched(&self, kind: &str, duration: Duration, success: bool) {
        self.commands_dispatched.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut stats) = self.command_stats.lock() {
            let entry = stats
                .entry(kind.to_string())
                .or_insert_with(|| CommandStats::new(kind));
            entry.record(duration, success);
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_closed(&self) {
        // Saturating: a connection can be closed after a reset
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self, matched: bool) {
        if matched {
            self.publishes_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publishes_unmatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn session_resumed(&self, session_present: bool) {
        if session_present {
            self.sessions_resumed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sessions_rebuilt.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Loop lifecycle
    pub fn set_loop_state(&self, state: &str) {
        if let Ok(mut current) = self.loop_state.lock() {
            *current = state.to_string();
        }
    }

    pub fn service_step(&self) {
        self.service_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn loop_exited(&self, fatal: bool) {
        self.loop_exits.fetch_add(1, Ordering::Relaxed);
        if fatal {
            self.fatal_exits.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let counters = [
            &self.commands_enqueued,
            &self.commands_rejected,
            &self.commands_dispatched,
            &self.commands_failed,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_active,
            &self.messages_published,
            &self.publish_failures,
            &self.acks_received,
            &self.publishes_matched,
            &self.publishes_unmatched,
            &self.sessions_resumed,
            &self.sessions_rebuilt,
            &self.service_steps,
            &self.loop_exits,
            &self.fatal_exits,
        ];
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }

        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut stats) = self.command_stats.lock() {
            stats.clear();
        }
        self.set_loop_state("idle");
    }

    fn build_command_statistics(&self) -> HashMap<String, CommandStatsSnapshot> {
        self.command_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(kind, stats)| (kind.clone(), stats.snapshot()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            commands: CommandMetrics {
                enqueued: load(&self.commands_enqueued),
                rejected: load(&self.commands_rejected),
                dispatched: load(&self.commands_dispatched),
                failed: load(&self.commands_failed),
                by_kind: self.build_command_statistics(),
            },
            mqtt: MqttMetrics {
                connection_attempts: load(&self.connection_attempts),
                connections_established: load(&self.connections_established),
                connection_failures: load(&self.connection_failures),
                connections_active: load(&self.connections_active),
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
                acks_received: load(&self.acks_received),
                publishes_matched: load(&self.publishes_matched),
                publishes_unmatched: load(&self.publishes_unmatched),
                sessions_resumed: load(&self.sessions_resumed),
                sessions_rebuilt: load(&self.sessions_rebuilt),
            },
            lifecycle: LifecycleMetrics {
                loop_state: self
                    .loop_state
                    .lock()
                    .map(|state| state.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
                service_steps: load(&self.service_steps),
                loop_exits: load(&self.loop_exits),
                fatal_exits: load(&self.fatal_exits),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal per-kind statistics (with timing data)
#[derive(Debug)]
struct CommandStats {
    kind: String,
    dispatched: u64,
    failures: u64,
    dispatch_times: Vec<u64>, // microseconds
}

impl CommandStats {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            dispatched: 0,
            failures: 0,
            dispatch_times: Vec::new(),
        }
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.dispatched += 1;
        if !success {
            self.failures += 1;
        }

        self.dispatch_times.push(duration.as_micros() as u64);
        // Keep the last 1000 samples
        if self.dispatch_times.len() > 1000 {
            self.dispatch_times.remove(0);
        }
    }

    fn snapshot(&self) -> CommandStatsSnapshot {
        let mut sorted = self.dispatch_times.clone();
        sorted.sort_unstable();

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        CommandStatsSnapshot {
            kind: self.kind.clone(),
            dispatched: self.dispatched,
            failures: self.failures,
            avg_dispatch_time_us: avg,
            dispatch_time_p95_us: percentile(&sorted, 95.0),
        }
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub commands: CommandMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct CommandMetrics {
    pub enqueued: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub by_kind: HashMap<String, CommandStatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct CommandStatsSnapshot {
    pub kind: String,
    pub dispatched: u64,
    pub failures: u64,
    pub avg_dispatch_time_us: f64,
    pub dispatch_time_p95_us: f64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_active: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub acks_received: u64,
    pub publishes_matched: u64,
    pub publishes_unmatched: u64,
    pub sessions_resumed: u64,
    pub sessions_rebuilt: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub loop_state: String,
    pub uptime_seconds: u64,
    pub service_steps: u64,
    pub loop_exits: u64,
    pub fatal_exits: u64,
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
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
