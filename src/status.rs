// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport status codes.
// Raw values follow the binder status_t convention: 0 is success, negated
// errno values for OS-derived conditions, and a block of codes counted up
// from i32::MIN for binder-specific failures.

use std::fmt;

#[cfg(unix)]
mod errno {
    pub use libc::{
        EBADF, EBADMSG, EEXIST, EFBIG, EINVAL, EMFILE, EMLINK, ENFILE, ENODATA, ENODEV, ENOENT,
        ENOMEM, ENOSPC, ENOSYS, EOVERFLOW, EPERM, EPIPE, EROFS, ESPIPE, ETIMEDOUT, EWOULDBLOCK,
    };
}

#[cfg(not(unix))]
mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const EWOULDBLOCK: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const ENODEV: i32 = 19;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const ESPIPE: i32 = 29;
    pub const EROFS: i32 = 30;
    pub const EMLINK: i32 = 31;
    pub const EPIPE: i32 = 32;
    pub const ENOSYS: i32 = 38;
    pub const ENODATA: i32 = 61;
    pub const EBADMSG: i32 = 74;
    pub const EOVERFLOW: i32 = 75;
    pub const ETIMEDOUT: i32 = 110;
}

pub use errno::{EBADF, EFBIG, EMFILE, EMLINK, ENFILE, ENOSPC, EROFS, ESPIPE};

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

const OK: i32 = 0;
const UNKNOWN_ERROR: i32 = i32::MIN;
const NO_MEMORY: i32 = -errno::ENOMEM;
const INVALID_OPERATION: i32 = -errno::ENOSYS;
const BAD_VALUE: i32 = -errno::EINVAL;
const BAD_TYPE: i32 = UNKNOWN_ERROR + 1;
const NAME_NOT_FOUND: i32 = -errno::ENOENT;
const PERMISSION_DENIED: i32 = -errno::EPERM;
const NO_INIT: i32 = -errno::ENODEV;
const ALREADY_EXISTS: i32 = -errno::EEXIST;
const DEAD_OBJECT: i32 = -errno::EPIPE;
const FAILED_TRANSACTION: i32 = UNKNOWN_ERROR + 2;
const BAD_INDEX: i32 = -errno::EOVERFLOW;
const NOT_ENOUGH_DATA: i32 = -errno::ENODATA;
const WOULD_BLOCK: i32 = -errno::EWOULDBLOCK;
const TIMED_OUT: i32 = -errno::ETIMEDOUT;
const UNKNOWN_TRANSACTION: i32 = -errno::EBADMSG;
const FDS_NOT_ALLOWED: i32 = UNKNOWN_ERROR + 7;
const UNEXPECTED_NULL: i32 = UNKNOWN_ERROR + 8;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Outcome of a transport-level operation.
///
/// `Errno` carries a positive OS error number that has no dedicated binder
/// meaning (`EBADF`, `EMFILE`, ...). `Other` carries any raw value this crate
/// does not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    UnknownError,
    NoMemory,
    InvalidOperation,
    BadValue,
    BadType,
    NameNotFound,
    PermissionDenied,
    NoInit,
    AlreadyExists,
    DeadObject,
    FailedTransaction,
    BadIndex,
    NotEnoughData,
    WouldBlock,
    TimedOut,
    UnknownTransaction,
    FdsNotAllowed,
    UnexpectedNull,
    Errno(i32),
    Other(i32),
}

pub type StatusResult<T> = Result<T, Status>;

impl Status {
    /// Every named (non-payload) status, in declaration order.
    pub const NAMED: [Status; 19] = [
        Status::Ok,
        Status::UnknownError,
        Status::NoMemory,
        Status::InvalidOperation,
        Status::BadValue,
        Status::BadType,
        Status::NameNotFound,
        Status::PermissionDenied,
        Status::NoInit,
        Status::AlreadyExists,
        Status::DeadObject,
        Status::FailedTransaction,
        Status::BadIndex,
        Status::NotEnoughData,
        Status::WouldBlock,
        Status::TimedOut,
        Status::UnknownTransaction,
        Status::FdsNotAllowed,
        Status::UnexpectedNull,
    ];

    pub fn to_raw(self) -> i32 {
        match self {
            Status::Ok => OK,
            Status::UnknownError => UNKNOWN_ERROR,
            Status::NoMemory => NO_MEMORY,
            Status::InvalidOperation => INVALID_OPERATION,
            Status::BadValue => BAD_VALUE,
            Status::BadType => BAD_TYPE,
            Status::NameNotFound => NAME_NOT_FOUND,
            Status::PermissionDenied => PERMISSION_DENIED,
            Status::NoInit => NO_INIT,
            Status::AlreadyExists => ALREADY_EXISTS,
            Status::DeadObject => DEAD_OBJECT,
            Status::FailedTransaction => FAILED_TRANSACTION,
            Status::BadIndex => BAD_INDEX,
            Status::NotEnoughData => NOT_ENOUGH_DATA,
            Status::WouldBlock => WOULD_BLOCK,
            Status::TimedOut => TIMED_OUT,
            Status::UnknownTransaction => UNKNOWN_TRANSACTION,
            Status::FdsNotAllowed => FDS_NOT_ALLOWED,
            Status::UnexpectedNull => UNEXPECTED_NULL,
            Status::Errno(e) => -e,
            Status::Other(raw) => raw,
        }
    }

    /// Decode a raw status value. Named codes win over `Errno`, so
    /// `Status::Errno(EPIPE)` decodes back as `DeadObject`.
    pub fn from_raw(raw: i32) -> Status {
        match raw {
            OK => Status::Ok,
            UNKNOWN_ERROR => Status::UnknownError,
            NO_MEMORY => Status::NoMemory,
            INVALID_OPERATION => Status::InvalidOperation,
            BAD_VALUE => Status::BadValue,
            BAD_TYPE => Status::BadType,
            NAME_NOT_FOUND => Status::NameNotFound,
            PERMISSION_DENIED => Status::PermissionDenied,
            NO_INIT => Status::NoInit,
            ALREADY_EXISTS => Status::AlreadyExists,
            DEAD_OBJECT => Status::DeadObject,
            FAILED_TRANSACTION => Status::FailedTransaction,
            BAD_INDEX => Status::BadIndex,
            NOT_ENOUGH_DATA => Status::NotEnoughData,
            WOULD_BLOCK => Status::WouldBlock,
            TIMED_OUT => Status::TimedOut,
            UNKNOWN_TRANSACTION => Status::UnknownTransaction,
            FDS_NOT_ALLOWED => Status::FdsNotAllowed,
            UNEXPECTED_NULL => Status::UnexpectedNull,
            r if r < 0 && r > -4096 => Status::Errno(-r),
            r => Status::Other(r),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// `Ok(())` for `Status::Ok`, `Err(self)` otherwise.
    pub fn into_result(self) -> StatusResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Status> for i32 {
    fn from(s: Status) -> i32 {
        s.to_raw()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Errno(e) => write!(f, "Errno({e})"),
            Status::Other(raw) => write!(f, "Other(0x{:x})", *raw as u32),
            named => write!(f, "{named:?}"),
        }
    }
}
