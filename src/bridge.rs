// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// State shared by everything one process creates: identity, configuration,
// runtime hooks, counters, the surrogate cache and the finalizer queue.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bp_binder::BpBinder;
use crate::config::BinderConfig;
use crate::counters::BinderCounters;
use crate::driver::DriverInner;
use crate::error::BinderError;
use crate::finalizer::FinalizerQueue;
use crate::proxy::{BinderProxy, ProxyCache};
use crate::runtime::Runtime;
use crate::transaction::{Pid, Uid};

type SyspropCallback = Arc<dyn Fn() + Send + Sync>;

/// Native proxy counting for the proxy-limit callback.
#[derive(Default)]
struct ProxyTracker {
    enabled: bool,
    count: u32,
    high: u32,
    low: u32,
    limit_reached: bool,
}

pub(crate) struct Bridge {
    pid: Pid,
    uid: Uid,
    config: BinderConfig,
    runtime: Arc<dyn Runtime>,
    driver: Weak<DriverInner>,
    pub(crate) counters: BinderCounters,
    pub(crate) cache: ProxyCache,
    pub(crate) finalizer: FinalizerQueue,
    sysprop_callbacks: Mutex<Vec<SyspropCallback>>,
    tracker: Mutex<ProxyTracker>,
}

impl Bridge {
    pub(crate) fn new(
        pid: Pid,
        config: BinderConfig,
        runtime: Arc<dyn Runtime>,
        driver: Weak<DriverInner>,
    ) -> Arc<Self> {
        let mut tracker = ProxyTracker::default();
        if let Some((high, low)) = config.proxy_count_watermarks {
            tracker.enabled = true;
            tracker.high = high;
            tracker.low = low;
        }
        Arc::new(Self {
            pid,
            uid: config.uid,
            cache: ProxyCache::new(config.proxy_map_limit, config.proxy_warn_interval),
            finalizer: FinalizerQueue::start(format!("binder-reaper:{pid}")),
            config,
            runtime,
            driver,
            counters: BinderCounters::new(),
            sysprop_callbacks: Mutex::new(Vec::new()),
            tracker: Mutex::new(tracker),
        })
    }

    pub(crate) fn pid(&self) -> Pid {
        self.pid
    }

    pub(crate) fn uid(&self) -> Uid {
        self.uid
    }

    pub(crate) fn config(&self) -> &BinderConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &dyn Runtime {
        &*self.runtime
    }

    pub(crate) fn driver(&self) -> &Weak<DriverInner> {
        &self.driver
    }

    /// Surrogate for `proxy`, created or existing.
    pub(crate) fn object_for_binder(
        self: &Arc<Self>,
        proxy: Arc<BpBinder>,
    ) -> Result<Arc<BinderProxy>, BinderError> {
        self.cache.object_for_binder(self, proxy)
    }

    /// Ask the runtime to collect if enough wrappers/watchers were created
    /// since the last collection. Must not be called with a registry lock held.
    pub(crate) fn gc_if_many_new_refs(&self) {
        if self.counters.should_collect(self.config.gc_interval) {
            debug!(
                pid = self.pid,
                local = self.counters.local_object_count(),
                death = self.counters.death_object_count(),
                "forcing collection"
            );
            self.runtime.force_gc();
        }
    }

    // -----------------------------------------------------------------------
    // System properties
    // -----------------------------------------------------------------------

    pub(crate) fn add_sysprop_callback(&self, cb: SyspropCallback) {
        self.sysprop_callbacks.lock().push(cb);
    }

    pub(crate) fn report_sysprop_change(&self) {
        let callbacks: Vec<SyspropCallback> = self.sysprop_callbacks.lock().clone();
        for cb in callbacks {
            cb();
        }
    }

    // -----------------------------------------------------------------------
    // Proxy-limit tracking
    // -----------------------------------------------------------------------

    pub(crate) fn set_proxy_count_enabled(&self, enabled: bool) {
        self.tracker.lock().enabled = enabled;
    }

    pub(crate) fn set_proxy_count_watermarks(&self, high: u32, low: u32) {
        let mut t = self.tracker.lock();
        t.high = high;
        t.low = low;
    }

    pub(crate) fn proxy_count(&self) -> u32 {
        self.tracker.lock().count
    }

    /// Count a new native proxy. Fires the proxy-limit callback when the
    /// count reaches the high watermark.
    pub(crate) fn proxy_created(&self) {
        let fire = {
            let mut t = self.tracker.lock();
            t.count += 1;
            if t.enabled && !t.limit_reached && t.high > 0 && t.count >= t.high {
                t.limit_reached = true;
                true
            } else {
                false
            }
        };
        if fire {
            self.proxy_limit_callback();
        }
    }

    pub(crate) fn proxy_destroyed(&self) {
        let mut t = self.tracker.lock();
        t.count = t.count.saturating_sub(1);
        if t.limit_reached && t.count <= t.low {
            t.limit_reached = false;
        }
    }

    fn proxy_limit_callback(&self) {
        let dump = self.cache.dump_debug_info();
        warn!(
            pid = self.pid,
            uid = self.uid,
            live = dump.live,
            handles = ?dump.handles,
            "binder proxy limit reached"
        );
        self.runtime.proxy_limit_reached(self.uid);
    }
}
