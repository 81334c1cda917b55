// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared fixtures for the integration tests: a runtime that records every
// hook instead of aborting, a recording echo handler, and polling helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use libbinder::{
    Binder, BinderConfig, DeathCallback, Driver, HandlerError, LocalBinder, Parcel, ProcessState,
    RemoteHandle, Runtime, FIRST_CALL_TRANSACTION, LAST_CALL_TRANSACTION,
};

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingRuntime {
    pub gc_hints: AtomicUsize,
    pub exceptions: Mutex<Vec<String>>,
    pub fatal: Mutex<Vec<String>>,
    pub policy_resets: Mutex<Vec<i32>>,
    pub proxy_limits: Mutex<Vec<u32>>,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gc_hints(&self) -> usize {
        self.gc_hints.load(Ordering::SeqCst)
    }

    pub fn fatal_count(&self) -> usize {
        self.fatal.lock().unwrap().len()
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.lock().unwrap().len()
    }
}

impl Runtime for RecordingRuntime {
    fn force_gc(&self) {
        self.gc_hints.fetch_add(1, Ordering::SeqCst);
    }

    fn strict_mode_policy_changed(&self, policy: i32) {
        self.policy_resets.lock().unwrap().push(policy);
    }

    fn log_exception(&self, msg: &str, err: &HandlerError) {
        self.exceptions.lock().unwrap().push(format!("{msg}: {err}"));
    }

    fn uncaught_fatal(&self, msg: &str) {
        self.fatal.lock().unwrap().push(msg.to_owned());
    }

    fn proxy_limit_reached(&self, uid: u32) {
        self.proxy_limits.lock().unwrap().push(uid);
    }
}

pub fn open(driver: &Driver, config: BinderConfig) -> (ProcessState, Arc<RecordingRuntime>) {
    let rt = RecordingRuntime::new();
    let ps = ProcessState::open_with_runtime(driver, config, rt.clone());
    (ps, rt)
}

pub fn open_default(driver: &Driver) -> (ProcessState, Arc<RecordingRuntime>) {
    open(driver, BinderConfig::new())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// One observed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub code: u32,
    pub size: usize,
    pub flags: u32,
    pub calling_pid: i32,
    pub calling_uid: u32,
    pub policy: i32,
}

/// Echoes application-range transactions back and records everything.
pub struct Echo {
    pub descriptor: &'static str,
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl Echo {
    pub fn new(descriptor: &'static str) -> (Self, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                descriptor,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Binder for Echo {
    fn descriptor(&self) -> &str {
        self.descriptor
    }

    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result<bool, HandlerError> {
        self.calls.lock().unwrap().push(Call {
            code,
            size: data.data_size(),
            flags,
            calling_pid: libbinder::thread_state::calling_pid(),
            calling_uid: libbinder::thread_state::calling_uid(),
            policy: libbinder::thread_state::strict_mode_policy(),
        });
        if (FIRST_CALL_TRANSACTION..=LAST_CALL_TRANSACTION).contains(&code) {
            reply.write_bytes(data.data());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Handler built from a closure.
pub struct FnBinder<F>(pub F);

impl<F> Binder for FnBinder<F>
where
    F: Fn(u32, &mut Parcel, &mut Parcel) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        _flags: u32,
    ) -> Result<bool, HandlerError> {
        (self.0)(code, data, reply)
    }
}

pub fn fn_binder<F>(f: F) -> Arc<LocalBinder>
where
    F: Fn(u32, &mut Parcel, &mut Parcel) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    LocalBinder::new(FnBinder(f))
}

/// Counts deaths delivered to it.
#[derive(Default)]
pub struct DeathCounter {
    pub deaths: AtomicUsize,
    pub last: Mutex<Option<RemoteHandle>>,
}

impl DeathCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.deaths.load(Ordering::SeqCst)
    }
}

impl DeathCallback for DeathCounter {
    fn binder_died(&self, who: RemoteHandle) {
        *self.last.lock().unwrap() = Some(who);
        self.deaths.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Poll `pred` until it holds or `timeout` passes.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, pred: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pred()
}

pub const WAIT: Duration = Duration::from_secs(5);
