//! Receive-side statistics sinks fed by the protocol parsers

use prometheus::{IntCounter, Registry};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters the protocol layer updates while draining responses
pub trait StatsSink {
    /// Bytes drained from the receive buffer
    fn add_rx_bytes(&self, n: u64);

    /// A get that found nothing (ASCII `END` without `VALUE`, HTTP 404, ...)
    fn inc_get_misses(&self);
}

/// Lightweight per-connection counters for the hot path
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub rx_bytes: AtomicU64,
    pub get_misses: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn get_misses(&self) -> u64 {
        self.get_misses.load(Ordering::Relaxed)
    }
}

impl StatsSink for ConnectionStats {
    #[inline]
    fn add_rx_bytes(&self, n: u64) {
        self.rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    fn inc_get_misses(&self) {
        self.get_misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Prometheus-backed sink shared by every connection of a run
pub struct Metrics {
    pub registry: Registry,
    pub rx_bytes: IntCounter,
    pub get_misses: IntCounter,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let rx_bytes =
            IntCounter::new("petrabench_rx_bytes_total", "Total response bytes drained").unwrap();
        let get_misses =
            IntCounter::new("petrabench_get_misses_total", "Total GET misses").unwrap();

        registry.register(Box::new(rx_bytes.clone())).unwrap();
        registry.register(Box::new(get_misses.clone())).unwrap();

        Self {
            registry,
            rx_bytes,
            get_misses,
        }
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for Metrics {
    fn add_rx_bytes(&self, n: u64) {
        self.rx_bytes.inc_by(n);
    }

    fn inc_get_misses(&self) {
        self.get_misses.inc();
    }
}
