// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Native proxy for one remote handle. Holds this process's strong
// reference on the driver node and the obituary list for the handle.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::bridge::Bridge;
use crate::driver::DriverInner;
use crate::parcel::Parcel;
use crate::status::{Status, StatusResult};
use crate::thread_state::{self, PendingRelease};
use crate::transaction::{CallerInfo, RemoteHandle, INTERFACE_TRANSACTION, PING_TRANSACTION};

/// Receives the death of a remote handle.
pub(crate) trait DeathRecipient: Send + Sync {
    fn binder_died(&self, who: RemoteHandle);
}

struct Obituaries {
    list: Vec<Weak<dyn DeathRecipient>>,
    /// Death was delivered; no further links are accepted.
    sent: bool,
    /// The driver holds a death link for this proxy.
    registered: bool,
}

pub(crate) struct BpBinder {
    handle: RemoteHandle,
    bridge: Arc<Bridge>,
    driver: Weak<DriverInner>,
    obituaries: Mutex<Obituaries>,
    descriptor: OnceLock<String>,
    me: Weak<BpBinder>,
}

fn same_recipient(a: &Weak<dyn DeathRecipient>, b: &Weak<dyn DeathRecipient>) -> bool {
    std::ptr::eq(a.as_ptr() as *const (), b.as_ptr() as *const ())
}

impl BpBinder {
    /// The caller must already hold a driver reference on `handle`; it passes
    /// to the new proxy.
    pub(crate) fn new(handle: RemoteHandle, bridge: Arc<Bridge>) -> Arc<Self> {
        let driver = bridge.driver().clone();
        Arc::new_cyclic(|me| Self {
            handle,
            bridge,
            driver,
            obituaries: Mutex::new(Obituaries {
                list: Vec::new(),
                sent: false,
                registered: false,
            }),
            descriptor: OnceLock::new(),
            me: me.clone(),
        })
    }

    pub(crate) fn handle(&self) -> RemoteHandle {
        self.handle
    }

    fn driver(&self) -> StatusResult<Arc<DriverInner>> {
        self.driver.upgrade().ok_or(Status::DeadObject)
    }

    pub(crate) fn transact(&self, code: u32, data: &Parcel, flags: u32) -> StatusResult<Parcel> {
        if self.obituaries.lock().sent {
            return Err(Status::DeadObject);
        }
        let caller = CallerInfo {
            pid: self.bridge.pid(),
            uid: self.bridge.uid(),
            strict_mode_policy: thread_state::strict_mode_policy(),
        };
        self.driver()?
            .transact(caller, self.handle, code, data.clone(), flags)
    }

    pub(crate) fn ping(&self) -> Status {
        match self.transact(PING_TRANSACTION, &Parcel::new(), 0) {
            Ok(_) => Status::Ok,
            Err(status) => status,
        }
    }

    pub(crate) fn is_binder_alive(&self) -> bool {
        if self.obituaries.lock().sent {
            return false;
        }
        self.driver.upgrade().is_some_and(|d| d.is_alive(self.handle))
    }

    pub(crate) fn interface_descriptor(&self) -> StatusResult<String> {
        if let Some(desc) = self.descriptor.get() {
            return Ok(desc.clone());
        }
        let mut reply = self.transact(INTERFACE_TRANSACTION, &Parcel::new(), 0)?;
        let desc = reply.read_string()?;
        if !desc.is_empty() {
            let _ = self.descriptor.set(desc.clone());
        }
        Ok(desc)
    }

    pub(crate) fn link_to_death(&self, recipient: Weak<dyn DeathRecipient>) -> StatusResult<()> {
        let mut ob = self.obituaries.lock();
        if ob.sent {
            return Err(Status::DeadObject);
        }
        if !ob.registered {
            self.driver()?
                .link_death(self.bridge.pid(), self.handle, self.me.clone())?;
            ob.registered = true;
        }
        ob.list.push(recipient);
        Ok(())
    }

    /// `NameNotFound` if `recipient` is not linked, `DeadObject` if death was
    /// already delivered.
    pub(crate) fn unlink_to_death(&self, recipient: &Weak<dyn DeathRecipient>) -> StatusResult<()> {
        let mut ob = self.obituaries.lock();
        if ob.sent {
            return Err(Status::DeadObject);
        }
        let pos = ob
            .list
            .iter()
            .position(|r| same_recipient(r, recipient))
            .ok_or(Status::NameNotFound)?;
        ob.list.remove(pos);
        if ob.list.is_empty() && ob.registered {
            ob.registered = false;
            if let Some(driver) = self.driver.upgrade() {
                // A dead node has no links left to remove.
                let _ = driver.unlink_death(self.bridge.pid(), self.handle, self as *const Self);
            }
        }
        Ok(())
    }

    /// Deliver death to every linked recipient, once.
    pub(crate) fn send_obituary(&self) {
        let list = {
            let mut ob = self.obituaries.lock();
            if ob.sent {
                return;
            }
            ob.sent = true;
            ob.registered = false;
            std::mem::take(&mut ob.list)
        };
        trace!(handle = %self.handle, recipients = list.len(), "sending obituary");
        for recipient in list {
            if let Some(recipient) = recipient.upgrade() {
                recipient.binder_died(self.handle);
            }
        }
    }
}

impl Drop for BpBinder {
    fn drop(&mut self) {
        self.bridge.proxy_destroyed();
        thread_state::queue_release(PendingRelease {
            driver: self.driver.clone(),
            pid: self.bridge.pid(),
            handle: self.handle,
        });
    }
}
