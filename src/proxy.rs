// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Surrogates for remote objects and the per-process cache that keeps at most
// one live surrogate per handle.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::bp_binder::{BpBinder, DeathRecipient};
use crate::bridge::Bridge;
use crate::death::{DeathCallback, DeathWatcher, DeathWatcherList};
use crate::error::BinderError;
use crate::parcel::Parcel;
use crate::status::Status;
use crate::thread_state;
use crate::transaction::{is_one_way, RemoteHandle};

// ---------------------------------------------------------------------------
// Native data
// ---------------------------------------------------------------------------

/// Native bookkeeping behind one surrogate. Allocated before the factory
/// decides whether a new surrogate is needed, filled in only if it is.
pub(crate) struct ProxyNativeData {
    object: OnceLock<Arc<BpBinder>>,
    orgue: OnceLock<Arc<DeathWatcherList>>,
}

impl ProxyNativeData {
    fn new() -> Self {
        Self {
            object: OnceLock::new(),
            orgue: OnceLock::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// BinderProxy
// ---------------------------------------------------------------------------

/// Application-visible stand-in for a remote object.
pub struct BinderProxy {
    handle: RemoteHandle,
    native: Option<Box<ProxyNativeData>>,
    bridge: Arc<Bridge>,
}

impl BinderProxy {
    pub fn handle(&self) -> RemoteHandle {
        self.handle
    }

    fn target(&self) -> Option<&Arc<BpBinder>> {
        self.native.as_ref().and_then(|n| n.object.get())
    }

    fn orgue(&self) -> Option<&Arc<DeathWatcherList>> {
        self.native.as_ref().and_then(|n| n.orgue.get())
    }

    fn finalized() -> BinderError {
        BinderError::IllegalState("Binder has been finalized!".into())
    }

    /// Send a transaction. `Ok(false)` if the remote does not know `code`.
    pub fn transact(
        &self,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result<bool, BinderError> {
        let target = self.target().ok_or_else(Self::finalized)?;

        let policy_before = thread_state::strict_mode_policy();
        let started = self.bridge.config().slow_call_threshold.map(|t| (t, Instant::now()));

        let result = target.transact(code, data, flags);

        if let Some((threshold, start)) = started {
            let elapsed = start.elapsed();
            if !is_one_way(flags) && elapsed > threshold {
                warn!(
                    handle = %self.handle,
                    code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow binder call"
                );
            }
        }

        let policy_after = thread_state::strict_mode_policy();
        if policy_after != policy_before {
            self.bridge.runtime().strict_mode_policy_changed(policy_after);
        }

        match result {
            Ok(out) => {
                *reply = out;
                Ok(true)
            }
            Err(Status::UnknownTransaction) => Ok(false),
            Err(status) => Err(BinderError::from_status(status, true, data.data_size())),
        }
    }

    pub fn ping_binder(&self) -> bool {
        self.target().is_some_and(|t| t.ping() == Status::Ok)
    }

    pub fn is_binder_alive(&self) -> bool {
        self.target().is_some_and(|t| t.is_binder_alive())
    }

    pub fn interface_descriptor(&self) -> Result<String, BinderError> {
        let target = self
            .target()
            .ok_or_else(|| BinderError::Runtime("No binder found for object".into()))?;
        target
            .interface_descriptor()
            .map_err(|status| BinderError::from_status(status, true, 0))
    }

    /// Register `callback` to run once when the remote object dies.
    pub fn link_to_death(&self, callback: Arc<dyn DeathCallback>) -> Result<(), BinderError> {
        let (target, list) = match (self.target(), self.orgue()) {
            (Some(target), Some(list)) => (target, list),
            _ => return Err(Self::finalized()),
        };
        let watcher = DeathWatcher::new(&self.bridge, callback, list);
        let recipient: Arc<dyn DeathRecipient> = watcher.clone();
        if let Err(status) = target.link_to_death(Arc::downgrade(&recipient)) {
            watcher.clear_reference();
            return Err(BinderError::from_status(status, true, 0));
        }
        Ok(())
    }

    /// Remove a registration made by [`link_to_death`](Self::link_to_death).
    ///
    /// `Ok(true)` when the link is gone, including when death already severed
    /// it. `NoSuchElement` if `callback` was never linked or already unlinked.
    pub fn unlink_to_death(&self, callback: &Arc<dyn DeathCallback>) -> Result<bool, BinderError> {
        let (target, list) = match (self.target(), self.orgue()) {
            (Some(target), Some(list)) => (target, list),
            _ => return Err(Self::finalized()),
        };
        let mut status = Status::NameNotFound;
        if let Some(watcher) = list.find(callback) {
            let recipient: Arc<dyn DeathRecipient> = watcher.clone();
            status = match target.unlink_to_death(&Arc::downgrade(&recipient)) {
                Ok(()) => {
                    watcher.clear_reference();
                    Status::Ok
                }
                Err(status) => status,
            };
        }
        match status {
            Status::Ok | Status::DeadObject => Ok(true),
            _ => Err(BinderError::NoSuchElement("Death link does not exist".into())),
        }
    }

    /// Watchers registered through this surrogate, notified ones included.
    pub fn death_watcher_count(&self) -> usize {
        self.orgue().map_or(0, |l| l.len())
    }
}

impl Drop for BinderProxy {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            let bridge = Arc::clone(&self.bridge);
            self.bridge
                .finalizer
                .enqueue(move || bridge.cache.destroy(native));
        }
    }
}

impl std::fmt::Debug for BinderProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinderProxy")
            .field("handle", &self.handle)
            .field("pid", &self.bridge.pid())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProxyMap
// ---------------------------------------------------------------------------

pub(crate) enum ProxyInstance {
    /// A new surrogate adopted the native data.
    Created(Arc<BinderProxy>),
    /// A live surrogate already existed; the native data is handed back.
    Existing(Arc<BinderProxy>, Box<ProxyNativeData>),
}

/// Surrogate factory. Dedups against live surrogates by handle.
struct ProxyMap {
    entries: Mutex<HashMap<RemoteHandle, Weak<BinderProxy>>>,
    limit: usize,
}

/// Summary logged when the proxy limit is hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProxyMapDump {
    pub(crate) live: usize,
    pub(crate) handles: Vec<RemoteHandle>,
}

const DUMP_HANDLES: usize = 10;

impl ProxyMap {
    fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            limit,
        }
    }

    fn get_instance(
        &self,
        bridge: &Arc<Bridge>,
        handle: RemoteHandle,
        native: Box<ProxyNativeData>,
    ) -> Result<ProxyInstance, BinderError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&handle).and_then(Weak::upgrade) {
            return Ok(ProxyInstance::Existing(existing, native));
        }
        if entries.len() >= self.limit {
            entries.retain(|_, w| w.strong_count() > 0);
            if entries.len() >= self.limit {
                return Err(BinderError::Runtime(format!(
                    "Binder ProxyMap has too many entries: {}",
                    entries.len()
                )));
            }
        }
        let proxy = Arc::new(BinderProxy {
            handle,
            native: Some(native),
            bridge: Arc::clone(bridge),
        });
        entries.insert(handle, Arc::downgrade(&proxy));
        Ok(ProxyInstance::Created(proxy))
    }

    fn dump(&self) -> ProxyMapDump {
        let entries = self.entries.lock();
        let mut handles: Vec<RemoteHandle> = entries
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(h, _)| *h)
            .collect();
        handles.sort();
        let live = handles.len();
        handles.truncate(DUMP_HANDLES);
        ProxyMapDump { live, handles }
    }
}

// ---------------------------------------------------------------------------
// ProxyCache
// ---------------------------------------------------------------------------

struct CacheState {
    /// One spare native record left over from a lost creation race.
    native_cache: Option<Box<ProxyNativeData>>,
    num_proxies: i32,
    warned_at: i32,
}

/// Guarantees one live surrogate per handle in a process.
pub(crate) struct ProxyCache {
    state: Mutex<CacheState>,
    map: ProxyMap,
    warn_interval: i32,
}

impl ProxyCache {
    pub(crate) fn new(map_limit: usize, warn_interval: i32) -> Self {
        Self {
            state: Mutex::new(CacheState {
                native_cache: None,
                num_proxies: 0,
                warned_at: 0,
            }),
            map: ProxyMap::new(map_limit),
            warn_interval,
        }
    }

    /// The surrogate for `target`, created if no live one exists.
    pub(crate) fn object_for_binder(
        &self,
        bridge: &Arc<Bridge>,
        target: Arc<BpBinder>,
    ) -> Result<Arc<BinderProxy>, BinderError> {
        let handle = target.handle();
        let mut st = self.state.lock();
        let native = st
            .native_cache
            .take()
            .unwrap_or_else(|| Box::new(ProxyNativeData::new()));

        // On error the factory consumed the record; it is not recycled.
        let instance = match self.map.get_instance(bridge, handle, native) {
            Ok(instance) => instance,
            Err(err) => {
                drop(st);
                // No surrogate took the reference; hand it back now.
                drop(target);
                thread_state::flush_commands();
                return Err(err);
            }
        };
        match instance {
            ProxyInstance::Created(proxy) => {
                if let Some(native) = proxy.native.as_deref() {
                    let _ = native.object.set(target);
                    let _ = native.orgue.set(DeathWatcherList::new());
                }
                st.num_proxies += 1;
                if self.warn_interval > 0 && st.num_proxies >= st.warned_at + self.warn_interval {
                    st.warned_at += self.warn_interval;
                    warn!("Unexpectedly many live BinderProxies: {}", st.num_proxies);
                }
                trace!(%handle, live = st.num_proxies, "created binder proxy");
                Ok(proxy)
            }
            ProxyInstance::Existing(proxy, native) => {
                st.native_cache = Some(native);
                Ok(proxy)
            }
        }
    }

    /// Finalizer for a collected surrogate.
    pub(crate) fn destroy(&self, native: Box<ProxyNativeData>) {
        let mut st = self.state.lock();
        drop(native);
        // Make the dropped node reference visible to the driver now.
        thread_state::flush_commands();
        st.num_proxies -= 1;
    }

    pub(crate) fn num_proxies(&self) -> i32 {
        self.state.lock().num_proxies
    }

    /// Debug dump of the surrogate map, taken under the cache lock.
    pub(crate) fn dump_debug_info(&self) -> ProxyMapDump {
        let _st = self.state.lock();
        self.map.dump()
    }
}
