// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-thread IPC state: the identity of whoever the thread is currently
// serving, the propagated strict-mode policy, and outbound driver commands
// that are batched until the next flush.

use std::cell::RefCell;
use std::sync::Weak;

use crate::driver::DriverInner;
use crate::error::BinderError;
use crate::transaction::{CallerInfo, Pid, RemoteHandle, Uid};

/// Outbound command waiting for the next flush.
pub(crate) struct PendingRelease {
    pub(crate) driver: Weak<DriverInner>,
    pub(crate) pid: Pid,
    pub(crate) handle: RemoteHandle,
}

impl PendingRelease {
    fn apply(self) {
        if let Some(driver) = self.driver.upgrade() {
            driver.release(self.pid, self.handle);
        }
    }
}

struct IpcThreadState {
    own_pid: Pid,
    own_uid: Uid,
    calling_pid: Pid,
    calling_uid: Uid,
    strict_mode_policy: i32,
    pending: Vec<PendingRelease>,
}

impl IpcThreadState {
    fn new() -> Self {
        let (pid, uid) = os_identity();
        Self {
            own_pid: pid,
            own_uid: uid,
            calling_pid: pid,
            calling_uid: uid,
            strict_mode_policy: 0,
            pending: Vec::new(),
        }
    }
}

impl Drop for IpcThreadState {
    fn drop(&mut self) {
        for cmd in self.pending.drain(..) {
            cmd.apply();
        }
    }
}

thread_local! {
    static STATE: RefCell<IpcThreadState> = RefCell::new(IpcThreadState::new());
}

#[cfg(unix)]
fn os_identity() -> (Pid, Uid) {
    unsafe { (libc::getpid(), libc::getuid()) }
}

#[cfg(not(unix))]
fn os_identity() -> (Pid, Uid) {
    (std::process::id() as Pid, 0)
}

// ---------------------------------------------------------------------------
// Calling identity
// ---------------------------------------------------------------------------

/// Pid of the process whose transaction this thread is executing, or this
/// thread's own process outside a transaction.
pub fn calling_pid() -> Pid {
    STATE.with(|s| s.borrow().calling_pid)
}

pub fn calling_uid() -> Uid {
    STATE.with(|s| s.borrow().calling_uid)
}

/// Reset the calling identity to this thread's own process and return a
/// token that restores the previous one.
pub fn clear_calling_identity() -> i64 {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        let token = ((s.calling_uid as i64) << 32) | (s.calling_pid as u32 as i64);
        s.calling_pid = s.own_pid;
        s.calling_uid = s.own_uid;
        token
    })
}

/// Restore an identity saved by [`clear_calling_identity`].
pub fn restore_calling_identity(token: i64) -> Result<(), BinderError> {
    let uid = (token >> 32) as i32;
    // No uids are ever allocated in this range; a token there is corrupt.
    if uid > 0 && uid < 999 {
        return Err(BinderError::IllegalState(format!(
            "Restoring bad calling ident: 0x{token:x}"
        )));
    }
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.calling_uid = (token >> 32) as u32;
        s.calling_pid = token as u32 as i32;
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Strict mode
// ---------------------------------------------------------------------------

pub fn strict_mode_policy() -> i32 {
    STATE.with(|s| s.borrow().strict_mode_policy)
}

pub fn set_strict_mode_policy(policy: i32) {
    STATE.with(|s| s.borrow_mut().strict_mode_policy = policy);
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

pub(crate) fn queue_release(cmd: PendingRelease) {
    let mut cmd = Some(cmd);
    let _ = STATE.try_with(|s| {
        if let Some(cmd) = cmd.take() {
            s.borrow_mut().pending.push(cmd);
        }
    });
    // Thread is exiting and nothing would flush later.
    if let Some(cmd) = cmd {
        cmd.apply();
    }
}

/// Apply every command queued on this thread.
pub fn flush_commands() {
    loop {
        let cmds = match STATE.try_with(|s| std::mem::take(&mut s.borrow_mut().pending)) {
            Ok(cmds) => cmds,
            Err(_) => return,
        };
        if cmds.is_empty() {
            return;
        }
        for cmd in cmds {
            cmd.apply();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker binding and transaction scope
// ---------------------------------------------------------------------------

/// Make this thread a member of process `pid`.
pub(crate) fn bind_process(pid: Pid, uid: Uid) {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.own_pid = pid;
        s.own_uid = uid;
        s.calling_pid = pid;
        s.calling_uid = uid;
    });
}

/// Adopts a caller's identity and strict-mode policy for the duration of an
/// incoming transaction.
pub(crate) struct TransactionScope {
    calling_pid: Pid,
    calling_uid: Uid,
    strict_mode_policy: i32,
}

impl TransactionScope {
    pub(crate) fn enter(caller: &CallerInfo) -> Self {
        STATE.with(|s| {
            let mut s = s.borrow_mut();
            let saved = Self {
                calling_pid: s.calling_pid,
                calling_uid: s.calling_uid,
                strict_mode_policy: s.strict_mode_policy,
            };
            s.calling_pid = caller.pid;
            s.calling_uid = caller.uid;
            s.strict_mode_policy = caller.strict_mode_policy;
            saved
        })
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let _ = STATE.try_with(|s| {
            let mut s = s.borrow_mut();
            s.calling_pid = self.calling_pid;
            s.calling_uid = self.calling_uid;
            s.strict_mode_policy = self.strict_mode_policy;
        });
    }
}
