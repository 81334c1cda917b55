// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process binder driver. Simulated processes register here and exchange
// transactions through it. The driver owns the node table (one node per
// exported local object), per-process strong references on nodes, each
// process's thread pool, and death notification.

pub(crate) mod pool;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, info};

use crate::bp_binder::BpBinder;
use crate::local::LocalObjectWrapper;
use crate::parcel::Parcel;
use crate::status::{Status, StatusResult};
use crate::thread_state;
use crate::transaction::{is_one_way, CallerInfo, Pid, RemoteHandle, Uid};

use pool::{ReplySlot, ThreadPool, Transaction};

/// First simulated pid handed out.
const FIRST_PID: Pid = 1000;

// ---------------------------------------------------------------------------
// Node table
// ---------------------------------------------------------------------------

struct Node {
    owner: Pid,
    target: Weak<LocalObjectWrapper>,
    /// Strong hold on the wrapper while anyone outside the owner refers to it.
    pinned: Option<Arc<LocalObjectWrapper>>,
    refs: HashMap<Pid, u32>,
    /// References written to a process but not yet picked up by it.
    transfers: HashMap<Pid, u32>,
    dead: bool,
    is_context: bool,
    death_links: Vec<(Pid, Weak<BpBinder>)>,
}

impl Node {
    fn unreferenced(&self) -> bool {
        self.refs.is_empty() && self.transfers.is_empty()
    }

    /// Drop the pin if nothing outside the owner needs the wrapper.
    /// The caller drops the returned wrapper after unlocking.
    fn take_unused_pin(&mut self) -> Option<Arc<LocalObjectWrapper>> {
        if self.unreferenced() && !self.is_context {
            self.pinned.take()
        } else {
            None
        }
    }

    fn is_garbage(&self) -> bool {
        self.unreferenced()
            && self.pinned.is_none()
            && (self.dead || self.target.strong_count() == 0)
    }

    fn ensure_pinned(&mut self) -> StatusResult<()> {
        if self.pinned.is_none() {
            self.pinned = Some(self.target.upgrade().ok_or(Status::DeadObject)?);
        }
        Ok(())
    }
}

struct ProcEntry {
    uid: Uid,
    pool: Arc<ThreadPool>,
}

struct DriverState {
    nodes: Slab<Node>,
    procs: HashMap<Pid, ProcEntry>,
    next_pid: Pid,
    context_manager: Option<RemoteHandle>,
}

impl DriverState {
    fn node(&self, handle: RemoteHandle) -> StatusResult<&Node> {
        self.nodes.get(handle.0 as usize).ok_or(Status::DeadObject)
    }

    fn node_mut(&mut self, handle: RemoteHandle) -> StatusResult<&mut Node> {
        self.nodes.get_mut(handle.0 as usize).ok_or(Status::DeadObject)
    }

    fn live_node_mut(&mut self, handle: RemoteHandle) -> StatusResult<&mut Node> {
        let node = self.node_mut(handle)?;
        if node.dead {
            return Err(Status::DeadObject);
        }
        Ok(node)
    }

    fn remove_if_garbage(&mut self, handle: RemoteHandle) {
        let key = handle.0 as usize;
        if self.nodes.get(key).is_some_and(Node::is_garbage) {
            self.nodes.remove(key);
            if self.context_manager == Some(handle) {
                self.context_manager = None;
            }
        }
    }
}

pub(crate) struct DriverInner {
    state: Mutex<DriverState>,
}

/// Shared binder driver. Cloning yields another handle to the same driver.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DriverInner {
                state: Mutex::new(DriverState {
                    nodes: Slab::new(),
                    procs: HashMap::new(),
                    next_pid: FIRST_PID,
                    context_manager: None,
                }),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DriverInner> {
        &self.inner
    }

    /// Simulate the death of process `pid`.
    pub fn kill_process(&self, pid: Pid) {
        self.inner.kill_process(pid);
    }

    pub fn is_process_alive(&self, pid: Pid) -> bool {
        self.inner.state.lock().procs.contains_key(&pid)
    }

    pub fn process_count(&self) -> usize {
        self.inner.state.lock().procs.len()
    }

    /// Nodes currently in the table, dead ones included.
    pub fn node_count(&self) -> usize {
        self.inner.state.lock().nodes.len()
    }

    /// Strong references process `pid` holds on `handle`.
    pub fn ref_count(&self, pid: Pid, handle: RemoteHandle) -> u32 {
        let st = self.inner.state.lock();
        st.node(handle)
            .ok()
            .and_then(|n| n.refs.get(&pid).copied())
            .unwrap_or(0)
    }

    /// Death links registered on `handle` by any process.
    pub fn death_link_count(&self, handle: RemoteHandle) -> usize {
        let st = self.inner.state.lock();
        st.node(handle).map_or(0, |n| n.death_links.len())
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverInner {
    // -----------------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------------

    pub(crate) fn register_process(
        &self,
        uid: Uid,
        max_threads: usize,
        buffer_size: usize,
    ) -> (Pid, Arc<ThreadPool>) {
        let mut st = self.state.lock();
        let pid = st.next_pid;
        st.next_pid += 1;
        let pool = ThreadPool::new(pid, uid, max_threads, buffer_size);
        st.procs.insert(
            pid,
            ProcEntry {
                uid,
                pool: Arc::clone(&pool),
            },
        );
        debug!(pid, uid, "binder process registered");
        (pid, pool)
    }

    pub(crate) fn kill_process(&self, pid: Pid) {
        let mut pins = Vec::new();
        let mut obituaries = Vec::new();
        let pool = {
            let mut st = self.state.lock();
            let Some(entry) = st.procs.remove(&pid) else {
                return;
            };
            let DriverState { nodes, procs, .. } = &mut *st;
            let mut garbage = Vec::new();
            for (key, node) in nodes.iter_mut() {
                node.refs.remove(&pid);
                node.transfers.remove(&pid);
                node.death_links.retain(|(p, _)| *p != pid);
                if node.owner == pid {
                    node.dead = true;
                    node.is_context = false;
                    pins.extend(node.pinned.take());
                    for (linked, proxy) in node.death_links.drain(..) {
                        if let Some(p) = procs.get(&linked) {
                            obituaries.push((Arc::clone(&p.pool), proxy));
                        }
                    }
                } else if let Some(pin) = node.take_unused_pin() {
                    pins.push(pin);
                }
                if node.is_garbage() {
                    garbage.push(key);
                }
            }
            for key in garbage {
                nodes.remove(key);
            }
            if let Some(cm) = st.context_manager {
                if st.node(cm).map_or(true, |n| n.dead) {
                    st.context_manager = None;
                }
            }
            info!(pid, uid = entry.uid, obituaries = obituaries.len(), "binder process died");
            entry.pool
        };
        pool.shutdown();
        for (pool, proxy) in obituaries {
            pool.submit_obituary(proxy);
        }
        drop(pins);
    }

    // -----------------------------------------------------------------------
    // Nodes and references
    // -----------------------------------------------------------------------

    /// Create a node for `wrapper`, owned by `owner`.
    pub(crate) fn publish(
        &self,
        owner: Pid,
        wrapper: &Arc<LocalObjectWrapper>,
    ) -> StatusResult<RemoteHandle> {
        let mut st = self.state.lock();
        if !st.procs.contains_key(&owner) {
            return Err(Status::DeadObject);
        }
        let key = st.nodes.insert(Node {
            owner,
            target: Arc::downgrade(wrapper),
            pinned: None,
            refs: HashMap::new(),
            transfers: HashMap::new(),
            dead: false,
            is_context: false,
            death_links: Vec::new(),
        });
        let handle = RemoteHandle(key as u32);
        debug!(owner, %handle, "node published");
        Ok(handle)
    }

    /// Whether `handle` is still the live node for the wrapper at `wrapper`.
    pub(crate) fn is_node_for(&self, handle: RemoteHandle, wrapper: *const LocalObjectWrapper) -> bool {
        let st = self.state.lock();
        st.node(handle)
            .is_ok_and(|n| !n.dead && std::ptr::eq(Weak::as_ptr(&n.target), wrapper))
    }

    /// Hand a reference on `handle` from `from` to `to`.
    pub(crate) fn transfer(&self, from: Pid, handle: RemoteHandle, to: Pid) -> StatusResult<()> {
        let mut st = self.state.lock();
        if !st.procs.contains_key(&to) {
            return Err(Status::DeadObject);
        }
        let node = st.live_node_mut(handle)?;
        if node.owner != from && !node.refs.contains_key(&from) {
            return Err(Status::PermissionDenied);
        }
        if node.owner == to {
            return Ok(());
        }
        node.ensure_pinned()?;
        *node.transfers.entry(to).or_insert(0) += 1;
        Ok(())
    }

    /// Take a strong reference for `pid`, consuming its pending transfers.
    pub(crate) fn acquire(&self, pid: Pid, handle: RemoteHandle) -> StatusResult<()> {
        let mut st = self.state.lock();
        let node = st.live_node_mut(handle)?;
        let pending = node.transfers.remove(&pid).unwrap_or(0);
        let held = node.refs.get(&pid).copied().unwrap_or(0);
        if pending == 0 && held == 0 && !node.is_context {
            return Err(Status::NameNotFound);
        }
        node.ensure_pinned()?;
        *node.refs.entry(pid).or_insert(0) += 1;
        Ok(())
    }

    /// `pid` already holds a reference; fold any new transfers into it.
    pub(crate) fn consume_transfers(&self, pid: Pid, handle: RemoteHandle) {
        let pin = {
            let mut st = self.state.lock();
            match st.node_mut(handle) {
                Ok(node) => {
                    node.transfers.remove(&pid);
                    node.take_unused_pin()
                }
                Err(_) => None,
            }
        };
        drop(pin);
    }

    pub(crate) fn release(&self, pid: Pid, handle: RemoteHandle) {
        let pin = {
            let mut st = self.state.lock();
            let Ok(node) = st.node_mut(handle) else {
                return;
            };
            if let Some(count) = node.refs.get_mut(&pid) {
                *count -= 1;
                if *count == 0 {
                    node.refs.remove(&pid);
                }
            }
            // The releasing proxy is already gone; so is its link.
            node.death_links.retain(|(_, w)| w.strong_count() > 0);
            let pin = node.take_unused_pin();
            st.remove_if_garbage(handle);
            pin
        };
        drop(pin);
    }

    /// The wrapper at `wrapper` is gone; drop its node if nothing refers to it.
    pub(crate) fn forget(&self, handle: RemoteHandle, wrapper: *const LocalObjectWrapper) {
        let mut st = self.state.lock();
        let owned = st
            .node(handle)
            .is_ok_and(|n| std::ptr::eq(Weak::as_ptr(&n.target), wrapper));
        if owned {
            st.remove_if_garbage(handle);
        }
    }

    pub(crate) fn owner_of(&self, handle: RemoteHandle) -> StatusResult<Pid> {
        let st = self.state.lock();
        let node = st.node(handle)?;
        if node.dead {
            return Err(Status::DeadObject);
        }
        Ok(node.owner)
    }

    /// The wrapper behind `handle`, for its owning process only.
    pub(crate) fn local_target(
        &self,
        pid: Pid,
        handle: RemoteHandle,
    ) -> StatusResult<Arc<LocalObjectWrapper>> {
        let st = self.state.lock();
        let node = st.node(handle)?;
        if node.owner != pid {
            return Err(Status::PermissionDenied);
        }
        node.target.upgrade().ok_or(Status::DeadObject)
    }

    pub(crate) fn is_alive(&self, handle: RemoteHandle) -> bool {
        let st = self.state.lock();
        st.node(handle).is_ok_and(|n| !n.dead)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    pub(crate) fn transact(
        &self,
        caller: CallerInfo,
        handle: RemoteHandle,
        code: u32,
        data: Parcel,
        flags: u32,
    ) -> StatusResult<Parcel> {
        // Releases queued on this thread go out ahead of the call.
        thread_state::flush_commands();
        let (pool, target) = {
            let st = self.state.lock();
            if !st.procs.contains_key(&caller.pid) {
                return Err(Status::DeadObject);
            }
            let node = st.node(handle)?;
            if node.dead {
                return Err(Status::DeadObject);
            }
            if node.owner != caller.pid && !node.refs.contains_key(&caller.pid) {
                return Err(Status::BadValue);
            }
            let pool = st
                .procs
                .get(&node.owner)
                .map(|p| Arc::clone(&p.pool))
                .ok_or(Status::DeadObject)?;
            let target = node.target.upgrade().ok_or(Status::DeadObject)?;
            (pool, target)
        };
        let reply = if is_one_way(flags) {
            None
        } else {
            Some(ReplySlot::new())
        };
        pool.submit(Transaction {
            target,
            handle,
            code,
            data,
            flags,
            caller,
            reply: reply.clone(),
        })?;
        match reply {
            Some(slot) => slot.wait(),
            None => Ok(Parcel::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Death notification
    // -----------------------------------------------------------------------

    pub(crate) fn link_death(
        &self,
        pid: Pid,
        handle: RemoteHandle,
        proxy: Weak<BpBinder>,
    ) -> StatusResult<()> {
        let mut st = self.state.lock();
        let node = st.live_node_mut(handle)?;
        node.death_links.retain(|(_, w)| w.strong_count() > 0);
        node.death_links.push((pid, proxy));
        Ok(())
    }

    pub(crate) fn unlink_death(
        &self,
        pid: Pid,
        handle: RemoteHandle,
        proxy: *const BpBinder,
    ) -> StatusResult<()> {
        let mut st = self.state.lock();
        let node = st.live_node_mut(handle)?;
        node.death_links
            .retain(|(p, w)| !(*p == pid && std::ptr::eq(Weak::as_ptr(w), proxy)));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Context manager
    // -----------------------------------------------------------------------

    pub(crate) fn set_context_manager(&self, pid: Pid, handle: RemoteHandle) -> StatusResult<()> {
        let mut st = self.state.lock();
        if let Some(current) = st.context_manager {
            if current != handle && st.node(current).is_ok_and(|n| !n.dead) {
                return Err(Status::AlreadyExists);
            }
        }
        let node = st.live_node_mut(handle)?;
        if node.owner != pid {
            return Err(Status::PermissionDenied);
        }
        node.ensure_pinned()?;
        node.is_context = true;
        st.context_manager = Some(handle);
        Ok(())
    }

    pub(crate) fn context_manager(&self) -> StatusResult<RemoteHandle> {
        let st = self.state.lock();
        match st.context_manager {
            Some(handle) if st.node(handle).is_ok_and(|n| !n.dead) => Ok(handle),
            _ => Err(Status::NameNotFound),
        }
    }
}
