// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transaction buffer. The bridge treats the contents as opaque bytes; the
// typed helpers exist for handlers and for the few reserved transactions
// the base dispatch answers itself (interface descriptor).

use crate::status::{Status, StatusResult};

/// An owning byte buffer carrying transaction arguments or results.
#[derive(Clone, Default)]
pub struct Parcel {
    data: Vec<u8>,
    pos: usize,
}

impl Parcel {
    /// Create an empty parcel.
    pub const fn new() -> Self {
        Self { data: Vec::new(), pos: 0 }
    }

    /// Create a parcel from raw bytes (copies the data).
    pub fn from_slice(data: &[u8]) -> Self {
        Self { data: data.to_vec(), pos: 0 }
    }

    /// Create a parcel taking ownership of a `Vec<u8>`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes written.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_position(&self) -> usize {
        self.pos
    }

    /// Move the read cursor. Positions past the end clamp to the end.
    pub fn set_data_position(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn data_avail(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Drop all contents and rewind.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    // -- writing ------------------------------------------------------------

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    // -- reading ------------------------------------------------------------

    /// Read exactly `len` bytes, or fail with `NotEnoughData`.
    pub fn read_bytes(&mut self, len: usize) -> StatusResult<&[u8]> {
        if self.data_avail() < len {
            return Err(Status::NotEnoughData);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    fn read_array<const N: usize>(&mut self) -> StatusResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_i32(&mut self) -> StatusResult<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> StatusResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> StatusResult<i64> {
        self.read_array().map(i64::from_le_bytes)
    }

    pub fn read_string(&mut self) -> StatusResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Status::BadValue)
    }
}

impl PartialEq for Parcel {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Parcel {}

impl std::fmt::Debug for Parcel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parcel")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl From<Vec<u8>> for Parcel {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for Parcel {
    fn from(s: &[u8]) -> Self {
        Self::from_slice(s)
    }
}
