use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use serde::Serialize;

/// Monotonic dispatch counters. Each counter is an independent atomic
/// word; a snapshot may misorder near-simultaneous events by at most one.
#[derive(Debug, Default)]
pub struct Counters {
    cold_starts: AtomicU64,
    warm_starts: AtomicU64,
    requests_queued: AtomicU64,
    requests_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub cold_starts: u64,
    pub warm_starts: u64,
    pub requests_queued: u64,
    pub requests_failed: u64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cold_starts: self.cold_starts.load(Ordering::Relaxed),
            warm_starts: self.warm_starts.load(Ordering::Relaxed),
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.cold_starts.store(0, Ordering::Relaxed);
        self.warm_starts.store(0, Ordering::Relaxed);
        self.requests_queued.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
    }
}

/// Global counters plus a per-function breakdown. Increments go to both
/// scopes; reset zeroes both.
#[derive(Debug, Default)]
pub struct Stats {
    global: Counters,
    per_function: RwLock<HashMap<String, Arc<Counters>>>,
}

impl Stats {
    fn function(&self, function_id: &str) -> Arc<Counters> {
        if let Some(counters) = self.per_function.read().get(function_id) {
            return counters.clone();
        }
        self.per_function
            .write()
            .entry(function_id.to_string())
            .or_default()
            .clone()
    }

    pub fn record_cold_start(&self, function_id: &str) {
        self.global.cold_starts.fetch_add(1, Ordering::Relaxed);
        self.function(function_id)
            .cold_starts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warm_start(&self, function_id: &str) {
        self.global.warm_starts.fetch_add(1, Ordering::Relaxed);
        self.function(function_id)
            .warm_starts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self, function_id: &str) {
        self.global.requests_queued.fetch_add(1, Ordering::Relaxed);
        self.function(function_id)
            .requests_queued
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, function_id: &str) {
        self.global.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.function(function_id)
            .requests_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn global_snapshot(&self) -> CounterSnapshot {
        self.global.snapshot()
    }

    pub fn function_snapshot(&self, function_id: &str) -> CounterSnapshot {
        self.function(function_id).snapshot()
    }

    /// Zero every counter. Increments racing the reset land in either
    /// epoch, which is acceptable for monotonic dispatch counters.
    pub fn reset(&self) {
        self.global.reset();
        for counters in self.per_function.read().values() {
            counters.reset();
        }
    }
}
