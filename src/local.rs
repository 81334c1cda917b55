// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Local side of the bridge: application handlers, the one-wrapper-per-handler
// registry, and the wrapper that dispatches incoming transactions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::bridge::Bridge;
use crate::error::{BinderError, HandlerError};
use crate::parcel::Parcel;
use crate::runtime::panic_message;
use crate::status::{Status, StatusResult};
use crate::thread_state;
use crate::transaction::{RemoteHandle, INTERFACE_TRANSACTION, PING_TRANSACTION, SYSPROPS_TRANSACTION};

/// Application-defined object that answers transactions.
pub trait Binder: Send + Sync + 'static {
    /// Interface descriptor returned for `INTERFACE_TRANSACTION`.
    fn descriptor(&self) -> &str {
        ""
    }

    /// Handle one transaction. `Ok(false)` means the code is not understood.
    ///
    /// `Err(HandlerError::Exception)` is logged and the caller sees an unknown
    /// transaction. `Err(HandlerError::Fatal)` and panics are unrecoverable and
    /// go to [`Runtime::uncaught_fatal`](crate::Runtime::uncaught_fatal).
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result<bool, HandlerError>;
}

// ---------------------------------------------------------------------------
// LocalBinder
// ---------------------------------------------------------------------------

/// A handler plus its wrapper registry slot. This is the identity that
/// [`ProcessState::resolve_local`](crate::ProcessState::resolve_local) dedups on.
pub struct LocalBinder {
    handler: Box<dyn Binder>,
    holder: BinderHolder,
}

impl LocalBinder {
    pub fn new<B: Binder>(handler: B) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            holder: BinderHolder::new(),
        })
    }

    pub fn descriptor(&self) -> &str {
        self.handler.descriptor()
    }

    /// Same-process call: runs the handler on the calling thread.
    ///
    /// `SYSPROPS_TRANSACTION` refreshes the process exposing this handler.
    /// A handler that was never exposed belongs to no process, so the
    /// refresh only happens when the call goes through
    /// [`ProcessState::invoke`](crate::ProcessState::invoke).
    pub fn transact(
        &self,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result<bool, BinderError> {
        match code {
            PING_TRANSACTION => Ok(true),
            INTERFACE_TRANSACTION => {
                reply.write_string(self.descriptor());
                Ok(true)
            }
            _ => {
                let mut data = Parcel::from_slice(data.data());
                let result = self.handler.on_transact(code, &mut data, reply, flags);
                if code == SYSPROPS_TRANSACTION {
                    if let Some(wrapper) = self.holder.get_existing() {
                        wrapper.bridge.report_sysprop_change();
                    }
                }
                Ok(result?)
            }
        }
    }

    pub(crate) fn holder(&self) -> &BinderHolder {
        &self.holder
    }

    /// Wrapper currently exposing this handler, if any.
    pub fn wrapper(&self) -> Option<Arc<LocalObjectWrapper>> {
        self.holder.get_existing()
    }
}

// ---------------------------------------------------------------------------
// BinderHolder
// ---------------------------------------------------------------------------

/// Weak slot for the single wrapper of one handler.
pub(crate) struct BinderHolder {
    wrapper: Mutex<Weak<LocalObjectWrapper>>,
}

impl BinderHolder {
    fn new() -> Self {
        Self {
            wrapper: Mutex::new(Weak::new()),
        }
    }

    /// The live wrapper for `object`, creating it in `bridge`'s process if
    /// there is none.
    pub(crate) fn get(
        &self,
        bridge: &Arc<Bridge>,
        object: &Arc<LocalBinder>,
    ) -> Result<Arc<LocalObjectWrapper>, BinderError> {
        let (wrapper, created) = {
            let mut slot = self.wrapper.lock();
            match slot.upgrade() {
                Some(existing) => (existing, false),
                None => {
                    let wrapper = LocalObjectWrapper::new(Arc::clone(bridge), Arc::clone(object));
                    *slot = Arc::downgrade(&wrapper);
                    (wrapper, true)
                }
            }
        };
        if wrapper.bridge.pid() != bridge.pid() {
            return Err(BinderError::IllegalState(format!(
                "binder is already exposed by process {}",
                wrapper.bridge.pid()
            )));
        }
        if created {
            bridge.gc_if_many_new_refs();
        }
        Ok(wrapper)
    }

    pub(crate) fn get_existing(&self) -> Option<Arc<LocalObjectWrapper>> {
        self.wrapper.lock().upgrade()
    }
}

// ---------------------------------------------------------------------------
// LocalObjectWrapper
// ---------------------------------------------------------------------------

/// Exposes one [`LocalBinder`] to other processes and dispatches their
/// transactions into it.
pub struct LocalObjectWrapper {
    bridge: Arc<Bridge>,
    object: Arc<LocalBinder>,
    node: Mutex<Option<RemoteHandle>>,
}

impl LocalObjectWrapper {
    fn new(bridge: Arc<Bridge>, object: Arc<LocalBinder>) -> Arc<Self> {
        bridge.counters.local_created();
        trace!(pid = bridge.pid(), descriptor = object.descriptor(), "creating local wrapper");
        Arc::new(Self {
            bridge,
            object,
            node: Mutex::new(None),
        })
    }

    pub fn object(&self) -> &Arc<LocalBinder> {
        &self.object
    }

    /// Driver handle, once the wrapper has been sent to another process.
    pub fn handle(&self) -> Option<RemoteHandle> {
        *self.node.lock()
    }

    /// Node for this wrapper, created on first exposure.
    pub(crate) fn publish(self: &Arc<Self>) -> StatusResult<RemoteHandle> {
        let driver = self.bridge.driver().upgrade().ok_or(Status::DeadObject)?;
        let mut node = self.node.lock();
        if let Some(handle) = *node {
            if driver.is_node_for(handle, Arc::as_ptr(self)) {
                return Ok(handle);
            }
        }
        let handle = driver.publish(self.bridge.pid(), self)?;
        *node = Some(handle);
        Ok(handle)
    }

    /// Entry point for transactions arriving from the driver.
    pub(crate) fn transact(&self, code: u32, data: &mut Parcel, reply: &mut Parcel, flags: u32) -> Status {
        match code {
            PING_TRANSACTION => Status::Ok,
            _ => self.on_transact(code, data, reply, flags),
        }
    }

    fn on_transact(&self, code: u32, data: &mut Parcel, reply: &mut Parcel, flags: u32) -> Status {
        let policy_before = thread_state::strict_mode_policy();

        let handled = if code == INTERFACE_TRANSACTION {
            reply.write_string(self.object.descriptor());
            true
        } else {
            self.exec_transact(code, data, reply, flags)
        };

        // The handler may have changed the thread policy; put it back.
        if thread_state::strict_mode_policy() != policy_before {
            thread_state::set_strict_mode_policy(policy_before);
            self.bridge.runtime().strict_mode_policy_changed(policy_before);
        }

        // Property refresh reaches the base dispatch whatever the handler did.
        if code == SYSPROPS_TRANSACTION {
            self.bridge.report_sysprop_change();
        }

        if handled {
            Status::Ok
        } else {
            Status::UnknownTransaction
        }
    }

    fn exec_transact(&self, code: u32, data: &mut Parcel, reply: &mut Parcel, flags: u32) -> bool {
        let handler = &self.object.handler;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.on_transact(code, data, reply, flags)
        }));
        let runtime = self.bridge.runtime();
        match result {
            Ok(Ok(handled)) => handled,
            Ok(Err(err)) if !err.is_fatal() => {
                runtime.log_exception(
                    "*** Uncaught remote exception! (Exceptions are not yet supported across processes.)",
                    &err,
                );
                false
            }
            Ok(Err(err)) => {
                runtime.uncaught_fatal(&err.to_string());
                false
            }
            Err(payload) => {
                runtime.uncaught_fatal(&panic_message(&*payload));
                false
            }
        }
    }
}

impl std::fmt::Debug for LocalObjectWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObjectWrapper")
            .field("descriptor", &self.object.descriptor())
            .field("pid", &self.bridge.pid())
            .finish()
    }
}

impl Drop for LocalObjectWrapper {
    fn drop(&mut self) {
        trace!(pid = self.bridge.pid(), descriptor = self.object.descriptor(), "destroying local wrapper");
        self.bridge.counters.local_deleted();
        if let Some(handle) = *self.node.get_mut() {
            if let Some(driver) = self.bridge.driver().upgrade() {
                driver.forget(handle, self as *const Self);
            }
        }
    }
}
