// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One simulated process attached to a driver. This is the surface other
// components use: expose handlers, resolve handles, transact, watch death,
// and read the diagnostic counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::info;

use crate::bp_binder::BpBinder;
use crate::bridge::Bridge;
use crate::config::BinderConfig;
use crate::counters::BinderStats;
use crate::death::DeathCallback;
use crate::driver::pool::ThreadPool;
use crate::driver::Driver;
use crate::error::BinderError;
use crate::local::{LocalBinder, LocalObjectWrapper};
use crate::object::{BinderObject, DeathLink};
use crate::parcel::Parcel;
use crate::runtime::{DefaultRuntime, Runtime};
use crate::status::Status;
use crate::thread_state;
use crate::transaction::{Pid, RemoteHandle, Uid, FLAG_ONEWAY, SYSPROPS_TRANSACTION};

/// Translation for operations that may report a dead remote.
fn remote_err(status: Status) -> BinderError {
    BinderError::from_status(status, true, 0)
}

pub struct ProcessState {
    bridge: Arc<Bridge>,
    driver: Driver,
    pool: Arc<ThreadPool>,
    handles: Mutex<HashMap<RemoteHandle, Weak<BpBinder>>>,
    killed: AtomicBool,
}

impl ProcessState {
    /// Attach a new process to `driver` with the default runtime hooks.
    pub fn open(driver: &Driver, config: BinderConfig) -> Self {
        Self::open_with_runtime(driver, config, Arc::new(DefaultRuntime))
    }

    pub fn open_with_runtime(
        driver: &Driver,
        config: BinderConfig,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        let (pid, pool) = driver.inner().register_process(
            config.uid,
            config.max_threads,
            config.transaction_buffer_size,
        );
        info!(pid, uid = config.uid, max_threads = config.max_threads, "opened binder process");
        let bridge = Bridge::new(pid, config, runtime, Arc::downgrade(driver.inner()));
        Self {
            bridge,
            driver: driver.clone(),
            pool,
            handles: Mutex::new(HashMap::new()),
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.bridge.pid()
    }

    pub fn uid(&self) -> Uid {
        self.bridge.uid()
    }

    pub fn config(&self) -> &BinderConfig {
        self.bridge.config()
    }

    pub fn is_alive(&self) -> bool {
        !self.killed.load(Ordering::Acquire) && self.driver.is_process_alive(self.pid())
    }

    // -----------------------------------------------------------------------
    // Object resolution
    // -----------------------------------------------------------------------

    /// The single wrapper exposing `binder` from this process.
    pub fn resolve_local(
        &self,
        binder: &Arc<LocalBinder>,
    ) -> Result<Arc<LocalObjectWrapper>, BinderError> {
        binder.holder().get(&self.bridge, binder)
    }

    /// Expose `binder` and hand process `to` a reference to it, as writing it
    /// into a transaction would.
    pub fn publish_to(&self, binder: &Arc<LocalBinder>, to: Pid) -> Result<RemoteHandle, BinderError> {
        let wrapper = self.resolve_local(binder)?;
        let handle = wrapper.publish().map_err(remote_err)?;
        self.transfer(handle, to)?;
        Ok(handle)
    }

    /// Pass on a handle this process owns or holds to process `to`.
    pub fn transfer(&self, handle: RemoteHandle, to: Pid) -> Result<(), BinderError> {
        self.driver
            .inner()
            .transfer(self.pid(), handle, to)
            .map_err(remote_err)
    }

    /// Resolve a handle received from another process. Handles owned by this
    /// process resolve to the handler itself, never to a surrogate.
    pub fn resolve_remote(&self, handle: RemoteHandle) -> Result<BinderObject, BinderError> {
        let driver = self.driver.inner();
        let owner = driver.owner_of(handle).map_err(remote_err)?;
        if owner == self.pid() {
            let wrapper = driver.local_target(self.pid(), handle).map_err(remote_err)?;
            return Ok(BinderObject::Local(Arc::clone(wrapper.object())));
        }
        let target = self.proxy_for_handle(handle).map_err(remote_err)?;
        let proxy = self.bridge.object_for_binder(target)?;
        Ok(BinderObject::Proxy(proxy))
    }

    fn proxy_for_handle(&self, handle: RemoteHandle) -> Result<Arc<BpBinder>, Status> {
        let driver = self.driver.inner();
        let created = {
            let mut handles = self.handles.lock();
            if let Some(existing) = handles.get(&handle).and_then(Weak::upgrade) {
                driver.consume_transfers(self.pid(), handle);
                return Ok(existing);
            }
            driver.acquire(self.pid(), handle)?;
            let proxy = BpBinder::new(handle, Arc::clone(&self.bridge));
            handles.retain(|_, w| w.strong_count() > 0);
            handles.insert(handle, Arc::downgrade(&proxy));
            proxy
        };
        self.bridge.proxy_created();
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Perform a transaction on `target`. A one-way call returns once the
    /// driver accepted it.
    pub fn invoke(
        &self,
        target: &BinderObject,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        one_way: bool,
    ) -> Result<bool, BinderError> {
        let flags = if one_way { FLAG_ONEWAY } else { 0 };
        let result = target.transact(code, data, reply, flags);
        if code == SYSPROPS_TRANSACTION {
            // A handler that was never exposed has no wrapper to refresh through.
            if let BinderObject::Local(local) = target {
                if local.wrapper().is_none() {
                    self.bridge.report_sysprop_change();
                }
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Death notification
    // -----------------------------------------------------------------------

    pub fn watch_death(
        &self,
        target: &BinderObject,
        callback: Arc<dyn DeathCallback>,
    ) -> Result<DeathLink, BinderError> {
        // Local objects never die while this process lives.
        if let BinderObject::Proxy(proxy) = target {
            proxy.link_to_death(Arc::clone(&callback))?;
        }
        Ok(DeathLink {
            target: target.clone(),
            callback,
        })
    }

    pub fn unwatch_death(&self, link: &DeathLink) -> Result<bool, BinderError> {
        match &link.target {
            BinderObject::Proxy(proxy) => proxy.unlink_to_death(&link.callback),
            BinderObject::Local(_) => Ok(true),
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics and collection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> BinderStats {
        BinderStats {
            local_objects: self.local_object_count(),
            proxy_objects: self.proxy_object_count(),
            death_objects: self.death_object_count(),
        }
    }

    pub fn local_object_count(&self) -> u32 {
        self.bridge.counters.local_object_count()
    }

    pub fn proxy_object_count(&self) -> i32 {
        self.bridge.cache.num_proxies()
    }

    pub fn death_object_count(&self) -> u32 {
        self.bridge.counters.death_object_count()
    }

    /// A collection has run; restart the forced-collection countdown.
    pub fn handle_gc(&self) {
        self.bridge.counters.handle_gc();
    }

    /// Run queued surrogate finalizers now.
    pub fn run_finalizers(&self) {
        self.bridge.finalizer.run_pending();
    }

    pub fn pending_finalizers(&self) -> usize {
        self.bridge.finalizer.pending()
    }

    /// Send reference releases queued on the calling thread.
    pub fn flush_pending_commands(&self) {
        thread_state::flush_commands();
    }

    // -----------------------------------------------------------------------
    // Thread pool
    // -----------------------------------------------------------------------

    /// See [`BinderConfig::max_threads`] for how nested calls use the pool.
    pub fn set_max_threads(&self, max_threads: usize) -> Result<(), BinderError> {
        self.pool.set_max_threads(max_threads).map_err(BinderError::from)
    }

    pub fn block_until_thread_available(&self) {
        self.pool.block_until_thread_available();
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    // -----------------------------------------------------------------------
    // Context manager and system properties
    // -----------------------------------------------------------------------

    /// Register `binder` as the driver-wide context object.
    pub fn become_context_manager(&self, binder: &Arc<LocalBinder>) -> Result<(), BinderError> {
        let wrapper = self.resolve_local(binder)?;
        let handle = wrapper.publish().map_err(remote_err)?;
        self.driver
            .inner()
            .set_context_manager(self.pid(), handle)
            .map_err(BinderError::from)
    }

    pub fn context_object(&self) -> Result<BinderObject, BinderError> {
        let handle = self.driver.inner().context_manager().map_err(remote_err)?;
        self.resolve_remote(handle)
    }

    /// Run `cb` whenever this process receives a property refresh.
    pub fn add_sysprop_change_callback<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.bridge.add_sysprop_callback(Arc::new(cb));
    }

    // -----------------------------------------------------------------------
    // Native proxy limit
    // -----------------------------------------------------------------------

    pub fn set_binder_proxy_count_enabled(&self, enabled: bool) {
        self.bridge.set_proxy_count_enabled(enabled);
    }

    pub fn set_binder_proxy_count_watermarks(&self, high: u32, low: u32) {
        self.bridge.set_proxy_count_watermarks(high, low);
    }

    /// Native proxies currently alive in this process.
    pub fn binder_proxy_count(&self) -> u32 {
        self.bridge.proxy_count()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Terminate this process: its objects die and watchers elsewhere are
    /// notified.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.driver.kill_process(self.pid());
        self.bridge.finalizer.shutdown();
    }
}

impl Drop for ProcessState {
    fn drop(&mut self) {
        self.kill();
    }
}
