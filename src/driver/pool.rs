// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-process binder thread pool: a work queue plus condition variable,
// worker threads spawned on demand, transaction buffer accounting, and
// per-node serialization of one-way calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::bp_binder::BpBinder;
use crate::local::LocalObjectWrapper;
use crate::parcel::Parcel;
use crate::status::{Status, StatusResult};
use crate::thread_state::{self, TransactionScope};
use crate::transaction::{is_one_way, CallerInfo, Pid, RemoteHandle, Uid};

// ---------------------------------------------------------------------------
// Reply slot
// ---------------------------------------------------------------------------

enum SlotState {
    Pending,
    Ready(StatusResult<Parcel>),
    Taken,
}

/// Where a synchronous caller waits for its reply. The first completion wins;
/// a worker finishing after its process was killed is ignored.
pub(crate) struct ReplySlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl ReplySlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn complete(&self, result: StatusResult<Parcel>) {
        let mut st = self.state.lock();
        if matches!(*st, SlotState::Pending) {
            *st = SlotState::Ready(result);
            self.cond.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> StatusResult<Parcel> {
        let mut st = self.state.lock();
        loop {
            match std::mem::replace(&mut *st, SlotState::Taken) {
                SlotState::Pending => {
                    *st = SlotState::Pending;
                    self.cond.wait(&mut st);
                }
                SlotState::Ready(result) => return result,
                SlotState::Taken => return Err(Status::InvalidOperation),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

pub(crate) struct Transaction {
    pub(crate) target: Arc<LocalObjectWrapper>,
    pub(crate) handle: RemoteHandle,
    pub(crate) code: u32,
    pub(crate) data: Parcel,
    pub(crate) flags: u32,
    pub(crate) caller: CallerInfo,
    pub(crate) reply: Option<Arc<ReplySlot>>,
}

impl Transaction {
    fn fail(self, status: Status) {
        if let Some(slot) = &self.reply {
            slot.complete(Err(status));
        }
    }
}

enum Work {
    Transaction(Transaction),
    Obituary(Weak<BpBinder>),
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

struct PoolState {
    queue: VecDeque<Work>,
    threads: usize,
    idle: usize,
    executing: usize,
    spawned: usize,
    max_threads: usize,
    buffer_limit: usize,
    buffer_used: usize,
    async_used: usize,
    async_busy: HashSet<RemoteHandle>,
    async_pending: HashMap<RemoteHandle, VecDeque<Transaction>>,
    in_flight: Vec<Arc<ReplySlot>>,
    quit: bool,
}

pub(crate) struct ThreadPool {
    pid: Pid,
    uid: Uid,
    state: Mutex<PoolState>,
    /// Signalled when work arrives or the pool quits.
    work: Condvar,
    /// Signalled when a worker finishes an item.
    avail: Condvar,
}

impl ThreadPool {
    pub(crate) fn new(pid: Pid, uid: Uid, max_threads: usize, buffer_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            pid,
            uid,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                threads: 0,
                idle: 0,
                executing: 0,
                spawned: 0,
                max_threads: max_threads.max(1),
                buffer_limit,
                buffer_used: 0,
                async_used: 0,
                async_busy: HashSet::new(),
                async_pending: HashMap::new(),
                in_flight: Vec::new(),
                quit: false,
            }),
            work: Condvar::new(),
            avail: Condvar::new(),
        })
    }

    /// Accept a transaction for execution on this pool.
    pub(crate) fn submit(self: &Arc<Self>, tx: Transaction) -> StatusResult<()> {
        let size = tx.data.data_size();
        let one_way = is_one_way(tx.flags);
        let mut st = self.state.lock();
        if st.quit {
            return Err(Status::DeadObject);
        }
        if st.buffer_used + size > st.buffer_limit
            || (one_way && st.async_used + size > st.buffer_limit / 2)
        {
            warn!(
                pid = self.pid,
                size,
                used = st.buffer_used,
                limit = st.buffer_limit,
                "binder buffer exhausted"
            );
            return Err(Status::FailedTransaction);
        }
        st.buffer_used += size;
        if let Some(slot) = &tx.reply {
            st.in_flight.push(Arc::clone(slot));
        }
        if one_way {
            st.async_used += size;
            if !st.async_busy.insert(tx.handle) {
                st.async_pending.entry(tx.handle).or_default().push_back(tx);
                return Ok(());
            }
        }
        st.queue.push_back(Work::Transaction(tx));
        self.wake(&mut st);
        Ok(())
    }

    /// Queue delivery of a death notice to `proxy`.
    pub(crate) fn submit_obituary(self: &Arc<Self>, proxy: Weak<BpBinder>) {
        let mut st = self.state.lock();
        if st.quit {
            return;
        }
        st.queue.push_back(Work::Obituary(proxy));
        self.wake(&mut st);
    }

    fn wake(self: &Arc<Self>, st: &mut PoolState) {
        if st.queue.len() > st.idle && st.threads < st.max_threads {
            self.spawn_worker(st);
        }
        self.work.notify_one();
    }

    fn spawn_worker(self: &Arc<Self>, st: &mut PoolState) {
        st.spawned += 1;
        let name = format!("binder:{}_{}", self.pid, st.spawned);
        let pool = Arc::clone(self);
        match thread::Builder::new().name(name).spawn(move || pool.run()) {
            Ok(_) => st.threads += 1,
            Err(e) => warn!(pid = self.pid, "failed to spawn binder thread: {e}"),
        }
    }

    fn run(self: Arc<Self>) {
        thread_state::bind_process(self.pid, self.uid);
        loop {
            let work = {
                let mut st = self.state.lock();
                loop {
                    if st.quit {
                        st.threads -= 1;
                        return;
                    }
                    if let Some(work) = st.queue.pop_front() {
                        st.executing += 1;
                        break work;
                    }
                    st.idle += 1;
                    self.work.wait(&mut st);
                    st.idle -= 1;
                }
            };
            match work {
                Work::Transaction(tx) => self.execute(tx),
                Work::Obituary(proxy) => {
                    if let Some(proxy) = proxy.upgrade() {
                        proxy.send_obituary();
                    }
                }
            }
            thread_state::flush_commands();
            self.state.lock().executing -= 1;
            self.avail.notify_all();
        }
    }

    fn execute(self: &Arc<Self>, tx: Transaction) {
        let Transaction {
            target,
            handle,
            code,
            mut data,
            flags,
            caller,
            reply,
        } = tx;
        trace!(pid = self.pid, %handle, code, "executing transaction");
        let mut out = Parcel::new();
        let status = {
            let _scope = TransactionScope::enter(&caller);
            target.transact(code, &mut data, &mut out, flags)
        };
        drop(target);
        if let Some(slot) = &reply {
            slot.complete(status.into_result().map(|()| out));
        }

        let size = data.data_size();
        let mut st = self.state.lock();
        st.buffer_used = st.buffer_used.saturating_sub(size);
        if let Some(slot) = &reply {
            st.in_flight.retain(|s| !Arc::ptr_eq(s, slot));
        }
        if is_one_way(flags) {
            st.async_used = st.async_used.saturating_sub(size);
            let next = st.async_pending.get_mut(&handle).and_then(VecDeque::pop_front);
            match next {
                Some(next) => {
                    st.queue.push_back(Work::Transaction(next));
                    self.wake(&mut st);
                }
                None => {
                    st.async_pending.remove(&handle);
                    st.async_busy.remove(&handle);
                }
            }
        }
    }

    /// Stop accepting work. In-flight synchronous calls fail with
    /// `FailedTransaction`; queued ones with `DeadObject`.
    pub(crate) fn shutdown(&self) {
        let (in_flight, queued) = {
            let mut st = self.state.lock();
            if st.quit {
                return;
            }
            st.quit = true;
            let mut queued: Vec<Transaction> = Vec::new();
            for work in st.queue.drain(..) {
                if let Work::Transaction(tx) = work {
                    queued.push(tx);
                }
            }
            for (_, pending) in st.async_pending.drain() {
                queued.extend(pending);
            }
            (std::mem::take(&mut st.in_flight), queued)
        };
        // Queued calls are listed in flight too; they fail as dead first.
        for tx in queued {
            tx.fail(Status::DeadObject);
        }
        for slot in in_flight {
            slot.complete(Err(Status::FailedTransaction));
        }
        self.work.notify_all();
        self.avail.notify_all();
    }

    pub(crate) fn set_max_threads(&self, max_threads: usize) -> StatusResult<()> {
        if max_threads == 0 {
            return Err(Status::BadValue);
        }
        self.state.lock().max_threads = max_threads;
        self.avail.notify_all();
        Ok(())
    }

    /// Block while every pool thread is busy executing work.
    pub(crate) fn block_until_thread_available(&self) {
        let mut st = self.state.lock();
        while !st.quit && st.executing >= st.max_threads {
            self.avail.wait(&mut st);
        }
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.state.lock().threads
    }
}
