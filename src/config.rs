// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-process tunables for the bridge and its driver endpoint.

use std::time::Duration;

/// Default binder buffer per process: 1 MiB minus two pages.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024 - 8 * 1024;
/// Default binder pool size per process.
pub const DEFAULT_MAX_THREADS: usize = 15;

/// Configuration of one [`ProcessState`](crate::ProcessState).
#[derive(Debug, Clone)]
pub struct BinderConfig {
    /// Wrapper/watcher creations between forced GC hints.
    pub gc_interval: u32,
    /// Log a warning each time this many more surrogates are live.
    pub proxy_warn_interval: i32,
    /// Upper bound on pool threads executing incoming transactions.
    ///
    /// A nested call back into this process (A calls B, B's handler calls A)
    /// always runs on a pool thread; the thread blocked waiting for B is not
    /// reused. Callback chains need spare threads here or they deadlock.
    pub max_threads: usize,
    /// Bytes of in-flight transaction payload this process accepts.
    /// One-way transactions may use half of it.
    pub transaction_buffer_size: usize,
    /// Live surrogates before the proxy factory refuses to create more.
    pub proxy_map_limit: usize,
    /// `(high, low)` native proxy watermarks for the proxy-limit callback.
    pub proxy_count_watermarks: Option<(u32, u32)>,
    /// Log synchronous calls slower than this.
    pub slow_call_threshold: Option<Duration>,
    /// User id reported as calling identity for this process.
    pub uid: u32,
}

impl BinderConfig {
    pub fn new() -> Self {
        Self {
            gc_interval: 1000,
            proxy_warn_interval: 5000,
            max_threads: DEFAULT_MAX_THREADS,
            transaction_buffer_size: DEFAULT_BUFFER_SIZE,
            proxy_map_limit: 20_000,
            proxy_count_watermarks: None,
            slow_call_threshold: None,
            uid: 10_000,
        }
    }

    /// Defaults overridden by `LIBBINDER_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::new();
        if let Some(v) = env_parse("LIBBINDER_GC_INTERVAL") {
            cfg.gc_interval = v;
        }
        if let Some(v) = env_parse("LIBBINDER_PROXY_WARN_INTERVAL") {
            cfg.proxy_warn_interval = v;
        }
        if let Some(v) = env_parse("LIBBINDER_MAX_THREADS") {
            cfg.max_threads = v;
        }
        if let Some(v) = env_parse("LIBBINDER_BUFFER_SIZE") {
            cfg.transaction_buffer_size = v;
        }
        if let Some(v) = env_parse("LIBBINDER_PROXY_MAP_LIMIT") {
            cfg.proxy_map_limit = v;
        }
        cfg
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
