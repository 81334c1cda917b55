// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Diagnostic counters for wrappers and death watchers, and the
// "collect after this many new references" heuristic built on them.
// Values are eventually consistent; only logging and the GC hint read them.

use std::sync::atomic::{AtomicU32, Ordering};

/// Bound on how many threads can bump a creation counter between the
/// increment and the GC check. Almost any large value works.
const MAX_RACING: u32 = 100_000;

#[derive(Debug, Default)]
pub(crate) struct BinderCounters {
    local_created: AtomicU32,
    local_deleted: AtomicU32,
    death_created: AtomicU32,
    death_deleted: AtomicU32,
    collected_at: AtomicU32,
}

impl BinderCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn local_created(&self) {
        self.local_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn local_deleted(&self) {
        self.local_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn death_created(&self) {
        self.death_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn death_deleted(&self) {
        self.death_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn total_created(&self) -> u32 {
        self.local_created
            .load(Ordering::Relaxed)
            .wrapping_add(self.death_created.load(Ordering::Relaxed))
    }

    /// True for exactly one caller each time another `interval` references
    /// have been created since the last collection point.
    pub(crate) fn should_collect(&self, interval: u32) -> bool {
        let total = self.total_created();
        let collected_at = self.collected_at.load(Ordering::Relaxed);
        // Modular arithmetic: "total has recently passed collected_at + interval".
        if total.wrapping_sub(collected_at.wrapping_add(interval)) < MAX_RACING {
            return self
                .collected_at
                .compare_exchange(
                    collected_at,
                    collected_at.wrapping_add(interval),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok();
        }
        false
    }

    /// A collection has run; count from here.
    pub(crate) fn handle_gc(&self) {
        self.collected_at.store(self.total_created(), Ordering::Relaxed);
    }

    pub(crate) fn local_object_count(&self) -> u32 {
        self.local_created
            .load(Ordering::Relaxed)
            .wrapping_sub(self.local_deleted.load(Ordering::Relaxed))
    }

    pub(crate) fn death_object_count(&self) -> u32 {
        self.death_created
            .load(Ordering::Relaxed)
            .wrapping_sub(self.death_deleted.load(Ordering::Relaxed))
    }
}

/// Snapshot of the live-object counters of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinderStats {
    pub local_objects: u32,
    pub proxy_objects: i32,
    pub death_objects: u32,
}
