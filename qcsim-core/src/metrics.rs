// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Metrics collection and reporting

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const LATENCY_WINDOW: usize = 10_000;

/// Run-wide counters shared by every level stream
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Feeder side
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    bytes_sent: AtomicU64,

    // Receiver side
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,

    // Response latency (microseconds)
    response_latencies: RwLock<Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                messages_sent: AtomicU64::new(0),
                messages_failed: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
                frames_rejected: AtomicU64::new(0),
                response_latencies: RwLock::new(Vec::with_capacity(1024)),
            }),
        }
    }

    // Feeder metrics
    pub fn record_send(&self, bytes: usize, latency_micros: u64) {
        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.response_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > LATENCY_WINDOW {
            latencies.drain(0..LATENCY_WINDOW / 2);
        }
    }

    pub fn record_send_failure(&self) {
        self.inner.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_failed(&self) -> u64 {
        self.inner.messages_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    // Receiver metrics
    pub fn record_frame(&self) {
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_rejected(&self) {
        self.inner.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.inner.frames_rejected.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.response_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p95(&self) -> Option<u64> {
        self.latency_percentile(0.95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_counters() {
        let metrics = Metrics::new();

        metrics.record_send(512, 100);
        metrics.record_send(256, 200);
        metrics.record_send_failure();

        assert_eq!(metrics.messages_sent(), 2);
        assert_eq!(metrics.messages_failed(), 1);
        assert_eq!(metrics.bytes_sent(), 768);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let other = metrics.clone();
        other.record_frame();
        other.record_frame_rejected();
        assert_eq!(metrics.frames_received(), 1);
        assert_eq!(metrics.frames_rejected(), 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = Metrics::new();
        assert_eq!(metrics.latency_p50(), None);

        for i in 1..=100 {
            metrics.record_send(100, i);
        }

        let p50 = metrics.latency_p50().unwrap();
        assert!((45..=55).contains(&p50));

        let p95 = metrics.latency_p95().unwrap();
        assert!((90..=100).contains(&p95));
    }
}
