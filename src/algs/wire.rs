//! Fixed little-endian wire records exchanged by the distributed linear
//! algebra and by interface redistribution.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// One vector entry: global id and value.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub gid_le: u64,
    pub value_le: u64,
}

impl WireEntry {
    pub fn new(gid: u64, value: f64) -> Self {
        Self {
            gid_le: gid.to_le(),
            value_le: value.to_bits().to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.value_le))
    }
}

/// One sparse matrix entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireTriplet {
    pub row_le: u64,
    pub col_le: u64,
    pub value_le: u64,
}

impl WireTriplet {
    pub fn new(row: u64, col: u64, value: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            value_le: value.to_bits().to_le(),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.value_le))
    }
}

/// Flag bits carried by [`WireNodeState::flags_le`].
pub mod node_flags {
    pub const ACTIVE: u32 = 1 << 0;
    pub const ACTIVE_OLD: u32 = 1 << 1;
    pub const SLIP: u32 = 1 << 2;
    pub const SLIP_OLD: u32 = 1 << 3;
    pub const DBC: u32 = 1 << 4;
}

/// History state of one slave node, shipped to its new owner on
/// redistribution.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNodeState {
    pub gid_le: u64,
    pub flags_le: u32,
    pub dbc_mask_le: u32,
    pub lm: [f64; 3],
    pub lm_old: [f64; 3],
    pub lm_uzawa: [f64; 3],
    pub jump: [f64; 3],
    pub d_old: f64,
    pub m_old: f64,
    pub traction_old: [f64; 3],
}

const_assert_eq!(size_of::<WireEntry>(), 16);
const_assert_eq!(size_of::<WireTriplet>(), 24);
const_assert_eq!(size_of::<WireNodeState>(), 8 + 4 + 4 + 5 * 24 + 16);
