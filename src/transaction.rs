// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transaction codes, flags and identities shared by the driver and the bridge.

use std::fmt;

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

/// First code available to application protocols.
pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;
/// Last code available to application protocols.
pub const LAST_CALL_TRANSACTION: u32 = 0x00ff_ffff;

/// Liveness check, answered by the base dispatch without reaching the handler.
pub const PING_TRANSACTION: u32 = pack_chars(b'_', b'P', b'N', b'G');
/// Interface descriptor query.
pub const INTERFACE_TRANSACTION: u32 = pack_chars(b'_', b'N', b'T', b'F');
/// System-property refresh notification. Always reaches the base dispatch,
/// whatever the handler does with it.
pub const SYSPROPS_TRANSACTION: u32 = pack_chars(b'_', b'S', b'P', b'R');

/// Fire-and-forget: the caller does not wait for a reply.
pub const FLAG_ONEWAY: u32 = 0x0000_0001;

/// Simulated process id.
pub type Pid = i32;
/// Simulated user id.
pub type Uid = u32;

/// Driver-assigned identity of an exported local object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteHandle(pub u32);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

/// Identity and propagated policy of the thread that sent a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerInfo {
    pub pid: Pid,
    pub uid: Uid,
    pub strict_mode_policy: i32,
}

pub fn is_one_way(flags: u32) -> bool {
    flags & FLAG_ONEWAY != 0
}
