//! Observability and Metrics
//!
//! Atomic counters for link lifecycle and package traffic. Providers share one
//! `Arc<Metrics>` with every link they create. `LinkProvider::new` records into
//! the process-wide collector from `global_metrics()`; `with_metrics` takes a
//! dedicated one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for link operations
#[derive(Debug)]
pub struct Metrics {
    /// Total links created
    pub links_opened: AtomicU64,
    /// Links currently connected
    pub links_active: AtomicU64,
    /// Connections refused or replaced by the duplicate policy
    pub duplicate_connections: AtomicU64,
    /// Packages successfully written
    pub packages_sent: AtomicU64,
    /// Packages delivered to the inbound sink
    pub packages_received: AtomicU64,
    /// Frame bytes written, delimiter included
    pub bytes_sent: AtomicU64,
    /// Frame bytes read, delimiter excluded
    pub bytes_received: AtomicU64,
    /// Sends reported as failed
    pub send_failures: AtomicU64,
    /// Inbound frames dropped because they did not decode
    pub frames_dropped: AtomicU64,
    /// Packages sealed for sending
    pub encryptions: AtomicU64,
    /// Inbound envelopes that failed to open
    pub decryption_failures: AtomicU64,
    /// Read-side transport failures that forced a disconnect
    pub transport_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            links_opened: AtomicU64::new(0),
            links_active: AtomicU64::new(0),
            duplicate_connections: AtomicU64::new(0),
            packages_sent: AtomicU64::new(0),
            packages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            encryptions: AtomicU64::new(0),
            decryption_failures: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new link
    pub fn link_opened(&self) {
        self.links_opened.fetch_add(1, Ordering::Relaxed);
        self.links_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a link disconnect
    pub fn link_closed(&self) {
        self.links_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn duplicate_connection(&self) {
        self.duplicate_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a package written to a transport
    pub fn package_sent(&self, byte_count: u64) {
        self.packages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a package handed to the inbound sink
    pub fn package_received(&self, byte_count: u64) {
        self.packages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encryption(&self) {
        self.encryptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decryption_failed(&self) {
        self.decryption_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            links_opened: self.links_opened.load(Ordering::Relaxed),
            links_active: self.links_active.load(Ordering::Relaxed),
            duplicate_connections: self.duplicate_connections.load(Ordering::Relaxed),
            packages_sent: self.packages_sent.load(Ordering::Relaxed),
            packages_received: self.packages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            encryptions: self.encryptions.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            links_opened = snapshot.links_opened,
            links_active = snapshot.links_active,
            duplicate_connections = snapshot.duplicate_connections,
            packages_sent = snapshot.packages_sent,
            packages_received = snapshot.packages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            send_failures = snapshot.send_failures,
            frames_dropped = snapshot.frames_dropped,
            encryptions = snapshot.encryptions,
            decryption_failures = snapshot.decryption_failures,
            transport_errors = snapshot.transport_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Link metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub links_opened: u64,
    pub links_active: u64,
    pub duplicate_connections: u64,
    pub packages_sent: u64,
    pub packages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub frames_dropped: u64,
    pub encryptions: u64,
    pub decryption_failures: u64,
    pub transport_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<std::sync::Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| std::sync::Arc::new(Metrics::new()));

/// Get the process-wide metrics instance
pub fn global_metrics() -> std::sync::Arc<Metrics> {
    std::sync::Arc::clone(&METRICS)
}
