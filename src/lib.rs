// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Binder-style object bridge. Local handlers are exposed to other processes
// through deduplicated wrappers, remote handles resolve to one surrogate per
// process, remote death is delivered once per watcher, and transport
// statuses are translated into a single error taxonomy. Processes are
// simulated on top of an in-process driver.

pub mod status;
pub use status::{Status, StatusResult};

mod error;
pub use error::{BinderError, HandlerError, LARGE_PARCEL_THRESHOLD};

mod parcel;
pub use parcel::Parcel;

pub mod transaction;
pub use transaction::{
    CallerInfo, Pid, RemoteHandle, Uid, FIRST_CALL_TRANSACTION, FLAG_ONEWAY,
    INTERFACE_TRANSACTION, LAST_CALL_TRANSACTION, PING_TRANSACTION, SYSPROPS_TRANSACTION,
};

mod config;
pub use config::{BinderConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_THREADS};

mod counters;
pub use counters::BinderStats;

mod runtime;
pub use runtime::{DefaultRuntime, Runtime};

pub mod thread_state;

mod finalizer;

mod driver;
pub use driver::Driver;

mod bp_binder;

mod local;
pub use local::{Binder, LocalBinder, LocalObjectWrapper};

mod death;
pub use death::DeathCallback;

mod proxy;
pub use proxy::BinderProxy;

mod bridge;

mod object;
pub use object::{BinderObject, DeathLink};

mod process;
pub use process::ProcessState;
