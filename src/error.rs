// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Caller-visible error taxonomy and the status → error translation applied
// at every bridge call site that can see a transport status.

use tracing::error;

use crate::status::{Status, EBADF, EFBIG, EMFILE, EMLINK, ENFILE, ENOSPC, EROFS, ESPIPE};

/// Payload size above which a `FailedTransaction` is reported as
/// `TransactionTooLarge` rather than "remote probably died".
///
/// This is a heuristic: the transport does not say why a transaction failed.
/// Callers may depend on the exact value.
pub const LARGE_PARCEL_THRESHOLD: usize = 200 * 1024;

/// Errors surfaced to users of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinderError {
    /// Generic failure with a description.
    #[error("{0}")]
    Runtime(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("illegal argument")]
    IllegalArgument,
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("permission denied")]
    Security,
    #[error("parcel format error: {0}")]
    ParcelFormat(String),
    /// Target process or object no longer exists.
    #[error("dead object: {0}")]
    DeadObject(String),
    #[error("transaction too large: {0}")]
    TransactionTooLarge(String),
    /// Unrecognised failure on a call site that may report remote errors.
    #[error("remote exception: {0}")]
    Remote(String),
    #[error("unexpected null")]
    NullPointer,
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Error raised by a handler called in-process.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl BinderError {
    pub fn is_dead_object(&self) -> bool {
        matches!(self, BinderError::DeadObject(_))
    }

    pub fn is_transaction_too_large(&self) -> bool {
        matches!(self, BinderError::TransactionTooLarge(_))
    }

    /// Translate a transport status into a caller-visible error.
    ///
    /// `can_throw_remote` marks call sites documented to surface remote
    /// conditions (`DeadObject`, `TransactionTooLarge`, `Remote`); elsewhere
    /// those downgrade to `Runtime`. `parcel_size` feeds the
    /// `FailedTransaction` heuristic.
    pub fn from_status(status: Status, can_throw_remote: bool, parcel_size: usize) -> BinderError {
        match status {
            Status::UnknownError => BinderError::Runtime("Unknown error".into()),
            Status::NoMemory => BinderError::OutOfMemory,
            Status::InvalidOperation => BinderError::UnsupportedOperation,
            Status::BadValue | Status::BadType => BinderError::IllegalArgument,
            Status::BadIndex => BinderError::IndexOutOfBounds,
            Status::NameNotFound => BinderError::NoSuchElement("name not found".into()),
            Status::PermissionDenied => BinderError::Security,
            Status::NotEnoughData => BinderError::ParcelFormat("Not enough data".into()),
            Status::NoInit => BinderError::Runtime("Not initialized".into()),
            Status::AlreadyExists => BinderError::Runtime("Item already exists".into()),
            Status::DeadObject => {
                if can_throw_remote {
                    BinderError::DeadObject("binder died".into())
                } else {
                    BinderError::Runtime("binder died".into())
                }
            }
            Status::UnknownTransaction => BinderError::Runtime("Unknown transaction code".into()),
            Status::FailedTransaction => {
                error!("!!! FAILED BINDER TRANSACTION !!!  (parcel size = {parcel_size})");
                if can_throw_remote && parcel_size > LARGE_PARCEL_THRESHOLD {
                    BinderError::TransactionTooLarge(format!("data parcel size {parcel_size} bytes"))
                } else {
                    let msg =
                        "Transaction failed on small parcel; remote process probably died".to_owned();
                    if can_throw_remote {
                        BinderError::DeadObject(msg)
                    } else {
                        BinderError::Runtime(msg)
                    }
                }
            }
            Status::FdsNotAllowed => {
                BinderError::Runtime("Not allowed to write file descriptors here".into())
            }
            Status::UnexpectedNull => BinderError::NullPointer,
            Status::Errno(e) => match errno_description(e) {
                Some(desc) => BinderError::Runtime(desc.into()),
                None => unknown_code(status, can_throw_remote),
            },
            Status::Ok | Status::WouldBlock | Status::TimedOut | Status::Other(_) => {
                unknown_code(status, can_throw_remote)
            }
        }
    }
}

impl From<Status> for BinderError {
    /// Translation for call sites that do not surface remote conditions.
    fn from(status: Status) -> BinderError {
        BinderError::from_status(status, false, 0)
    }
}

fn errno_description(e: i32) -> Option<&'static str> {
    let desc = match e {
        EBADF => "Bad file descriptor",
        ENFILE => "File table overflow",
        EMFILE => "Too many open files",
        EFBIG => "File too large",
        ENOSPC => "No space left on device",
        ESPIPE => "Illegal seek",
        EROFS => "Read-only file system",
        EMLINK => "Too many links",
        _ => return None,
    };
    Some(desc)
}

fn unknown_code(status: Status, can_throw_remote: bool) -> BinderError {
    let msg = format!("Unknown binder error code. 0x{:x}", status.to_raw() as u32);
    error!("{msg}");
    if can_throw_remote {
        BinderError::Remote(msg)
    } else {
        BinderError::Runtime(msg)
    }
}

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Error returned by application dispatch code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Recoverable: logged, and the transaction answers `UnknownTransaction`.
    #[error("{0}")]
    Exception(String),
    /// Unrecoverable: reported through `Runtime::uncaught_fatal`.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Fatal(_))
    }
}
