// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Deferred finalization. Surrogates never release their native state from
// the stack that dropped them; the release is queued here and run by a
// dedicated reaper thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

type Finalizer = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    items: VecDeque<Finalizer>,
    running: usize,
    quit: bool,
    reaper: Option<ThreadId>,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// Finalizer queue drained by one reaper thread.
#[derive(Clone)]
pub(crate) struct FinalizerQueue {
    shared: Arc<Shared>,
}

impl FinalizerQueue {
    /// Start a queue whose reaper thread is called `name`.
    pub(crate) fn start(name: String) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                running: 0,
                quit: false,
                reaper: None,
            }),
            cond: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        match thread::Builder::new().name(name).spawn(move || reap(worker)) {
            Ok(handle) => shared.state.lock().reaper = Some(handle.thread().id()),
            Err(e) => {
                // Without a reaper every finalizer runs on the dropping thread.
                warn!("failed to spawn finalizer thread: {e}");
                shared.state.lock().quit = true;
            }
        }
        Self { shared }
    }

    /// Queue `f` for the reaper. Runs it inline once the queue is shut down.
    pub(crate) fn enqueue<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut st = self.shared.state.lock();
        if st.quit {
            drop(st);
            run_guarded(Box::new(f));
            return;
        }
        st.items.push_back(Box::new(f));
        drop(st);
        self.shared.cond.notify_all();
    }

    /// Run everything queued so far and wait for the reaper to go idle.
    pub(crate) fn run_pending(&self) {
        loop {
            let mut st = self.shared.state.lock();
            if let Some(f) = st.items.pop_front() {
                st.running += 1;
                drop(st);
                run_guarded(f);
                let mut st = self.shared.state.lock();
                st.running -= 1;
                drop(st);
                self.shared.cond.notify_all();
                continue;
            }
            // The reaper calling in here would wait on itself.
            let on_reaper = st.reaper == Some(thread::current().id());
            while st.running > 0 && st.items.is_empty() && !on_reaper {
                self.shared.cond.wait(&mut st);
            }
            if st.items.is_empty() {
                return;
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        let st = self.shared.state.lock();
        st.items.len() + st.running
    }

    /// Stop the reaper once the queue drains.
    pub(crate) fn shutdown(&self) {
        self.shared.state.lock().quit = true;
        self.shared.cond.notify_all();
    }
}

fn reap(shared: Arc<Shared>) {
    let mut st = shared.state.lock();
    loop {
        if let Some(f) = st.items.pop_front() {
            st.running += 1;
            drop(st);
            run_guarded(f);
            st = shared.state.lock();
            st.running -= 1;
            shared.cond.notify_all();
            continue;
        }
        if st.quit {
            break;
        }
        shared.cond.wait(&mut st);
    }
}

fn run_guarded(f: Finalizer) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("finalizer panicked");
    }
}
