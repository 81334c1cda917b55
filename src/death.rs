// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Death notification on surrogates. A watcher bridges one application
// callback to the native obituary list; each surrogate keeps its watchers
// in a shared list guarded by one mutex.
//
// Lock order: watcher back-reference, then list, then watcher callback slot.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, warn};

use crate::bp_binder::DeathRecipient;
use crate::bridge::Bridge;
use crate::runtime::panic_message;
use crate::transaction::RemoteHandle;

/// Application callback run when a remote object dies.
pub trait DeathCallback: Send + Sync + 'static {
    fn binder_died(&self, who: RemoteHandle);

    /// Name used in leak diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn callback_addr(cb: &Arc<dyn DeathCallback>) -> *const () {
    Arc::as_ptr(cb) as *const ()
}

/// Strong before death is delivered, weak after.
enum RecipientRef {
    Strong(Arc<dyn DeathCallback>),
    Weak(Weak<dyn DeathCallback>),
}

impl RecipientRef {
    fn addr(&self) -> *const () {
        match self {
            RecipientRef::Strong(cb) => callback_addr(cb),
            RecipientRef::Weak(cb) => cb.as_ptr() as *const (),
        }
    }

    fn demote(&mut self) {
        if let RecipientRef::Strong(cb) = self {
            *self = RecipientRef::Weak(Arc::downgrade(cb));
        }
    }
}

// ---------------------------------------------------------------------------
// DeathWatcher
// ---------------------------------------------------------------------------

pub(crate) struct DeathWatcher {
    bridge: Arc<Bridge>,
    object: Mutex<RecipientRef>,
    type_name: &'static str,
    list: Mutex<Weak<DeathWatcherList>>,
}

impl DeathWatcher {
    /// Create a watcher for `callback` and add it to `list`.
    pub(crate) fn new(
        bridge: &Arc<Bridge>,
        callback: Arc<dyn DeathCallback>,
        list: &Arc<DeathWatcherList>,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            bridge: Arc::clone(bridge),
            type_name: callback.type_name(),
            object: Mutex::new(RecipientRef::Strong(callback)),
            list: Mutex::new(Arc::downgrade(list)),
        });
        list.add(Arc::clone(&watcher));
        bridge.counters.death_created();
        bridge.gc_if_many_new_refs();
        watcher
    }

    /// Whether this watcher is for `callback`, notified or not.
    pub(crate) fn matches(&self, callback: &Arc<dyn DeathCallback>) -> bool {
        self.object.lock().addr() == callback_addr(callback)
    }

    pub(crate) fn is_armed(&self) -> bool {
        matches!(*self.object.lock(), RecipientRef::Strong(_))
    }

    /// Leave the list after a successful unlink. A second call is a no-op.
    pub(crate) fn clear_reference(&self) {
        let list = std::mem::take(&mut *self.list.lock()).upgrade();
        match list {
            Some(list) => list.remove(self),
            None => error!("clear_reference() on death watcher whose list is gone"),
        }
    }

    fn warn_if_still_live(&self) {
        if self.is_armed() {
            warn!(
                "BinderProxy is being destroyed but the application did not call \
                 unwatch_death to unlink all of its death recipients beforehand. \
                 Releasing leaked death recipient: {}",
                self.type_name
            );
        }
    }
}

impl DeathRecipient for DeathWatcher {
    fn binder_died(&self, who: RemoteHandle) {
        let callback = match &*self.object.lock() {
            RecipientRef::Strong(cb) => Arc::clone(cb),
            RecipientRef::Weak(_) => return,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| callback.binder_died(who)));
        if let Err(payload) = result {
            self.bridge.runtime().uncaught_fatal(&format!(
                "*** Uncaught exception returned from death notification: {}",
                panic_message(&*payload)
            ));
        }
        drop(callback);

        // Demote under the list lock so a concurrent walk of the list never
        // sees the callback released mid-iteration.
        let list = self.list.lock().upgrade();
        match list {
            Some(list) => {
                let _guard = list.lock();
                self.object.lock().demote();
            }
            None => self.object.lock().demote(),
        }
    }
}

impl Drop for DeathWatcher {
    fn drop(&mut self) {
        self.bridge.counters.death_deleted();
    }
}

// ---------------------------------------------------------------------------
// DeathWatcherList
// ---------------------------------------------------------------------------

/// Watchers registered through one surrogate.
pub(crate) struct DeathWatcherList {
    watchers: Mutex<Vec<Arc<DeathWatcher>>>,
}

impl DeathWatcherList {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            watchers: Mutex::new(Vec::new()),
        })
    }

    fn add(&self, watcher: Arc<DeathWatcher>) {
        self.watchers.lock().push(watcher);
    }

    fn remove(&self, watcher: &DeathWatcher) {
        self.watchers
            .lock()
            .retain(|w| !std::ptr::eq(Arc::as_ptr(w), watcher));
    }

    pub(crate) fn find(&self, callback: &Arc<dyn DeathCallback>) -> Option<Arc<DeathWatcher>> {
        self.watchers
            .lock()
            .iter()
            .find(|w| w.matches(callback))
            .cloned()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Arc<DeathWatcher>>> {
        self.watchers.lock()
    }

    pub(crate) fn len(&self) -> usize {
        self.watchers.lock().len()
    }
}

impl Drop for DeathWatcherList {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().iter() {
            watcher.warn_if_still_live();
        }
    }
}
