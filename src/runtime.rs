// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Callbacks from the bridge into the host runtime.

use std::any::Any;

use tracing::error;

use crate::error::HandlerError;
use crate::transaction::Uid;

/// Host-runtime hooks invoked by the bridge.
///
/// Every method has a default; embedders override what they track.
pub trait Runtime: Send + Sync + 'static {
    /// Enough wrappers/watchers were created that a collection is worthwhile.
    fn force_gc(&self) {}

    /// A handler changed the thread's strict-mode policy; host bookkeeping
    /// should be reset to `policy`.
    fn strict_mode_policy_changed(&self, _policy: i32) {}

    /// A recoverable handler error escaped dispatch.
    fn log_exception(&self, msg: &str, err: &HandlerError) {
        error!("{msg}: {err}");
    }

    /// An unrecoverable error occurred while dispatching. The default reports
    /// and aborts the process; continuing would run with broken invariants.
    fn uncaught_fatal(&self, msg: &str) {
        error!("fatal error thrown during binder transaction: {msg}");
        std::process::abort();
    }

    /// This process holds more native proxies than its high watermark.
    fn proxy_limit_reached(&self, _uid: Uid) {}
}

/// Runtime with all default hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRuntime;

impl Runtime for DefaultRuntime {}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
