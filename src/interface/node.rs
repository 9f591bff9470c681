//! Per-node contact data carried by slave (and master) nodes.

use crate::algs::wire::{WireNodeState, node_flags};
use crate::linalg::Gid;
use serde::{Deserialize, Serialize};

/// Contact state of one node.
///
/// Vectors are stored with three components; only the first `dofs.len()`
/// are meaningful.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactNode {
    pub gid: Gid,
    pub dofs: Vec<Gid>,
    /// Multiplier dofs, assigned by `update_lag_mult_sets`.
    pub lm_dofs: Vec<Gid>,
    pub x_ref: [f64; 3],
    pub x_spatial: [f64; 3],
    /// Position at the last converged step.
    pub x_old: [f64; 3],
    pub normal: [f64; 3],
    pub normal_old: [f64; 3],
    pub txi: [f64; 3],
    pub teta: [f64; 3],
    pub active: bool,
    pub active_old: bool,
    pub slip: bool,
    pub slip_old: bool,
    /// Dirichlet flag per dof.
    pub dbc: [bool; 3],
    pub lm: [f64; 3],
    pub lm_old: [f64; 3],
    pub lm_uzawa: [f64; 3],
    /// Weighted normal gap.
    pub gap: f64,
    /// Lumped mortar weights, current and last converged.
    pub d: f64,
    pub m: f64,
    pub d_old: f64,
    pub m_old: f64,
    /// Relative tangential movement since the last converged step.
    pub jump: [f64; 3],
    /// Penalty traction of the last converged step.
    pub traction_old: [f64; 3],
}

impl ContactNode {
    pub fn new(gid: Gid, dofs: Vec<Gid>, x_ref: [f64; 3]) -> Self {
        Self {
            gid,
            dofs,
            x_ref,
            x_spatial: x_ref,
            x_old: x_ref,
            ..Default::default()
        }
    }

    pub fn num_dof(&self) -> usize {
        self.dofs.len()
    }

    pub fn is_dbc(&self) -> bool {
        self.dbc.iter().any(|d| *d)
    }

    /// Normal component of the current multiplier.
    pub fn lm_normal(&self) -> f64 {
        dot(&self.lm, &self.normal)
    }

    /// Multiplier with the normal part removed.
    pub fn lm_tangential(&self) -> [f64; 3] {
        let zn = self.lm_normal();
        std::array::from_fn(|k| self.lm[k] - zn * self.normal[k])
    }

    pub(crate) fn to_wire(&self) -> WireNodeState {
        let mut flags = 0;
        for (set, bit) in [
            (self.active, node_flags::ACTIVE),
            (self.active_old, node_flags::ACTIVE_OLD),
            (self.slip, node_flags::SLIP),
            (self.slip_old, node_flags::SLIP_OLD),
            (self.is_dbc(), node_flags::DBC),
        ] {
            if set {
                flags |= bit;
            }
        }
        let dbc_mask = self
            .dbc
            .iter()
            .enumerate()
            .fold(0u32, |m, (k, d)| if *d { m | (1 << k) } else { m });
        WireNodeState {
            gid_le: self.gid.to_le(),
            flags_le: flags.to_le(),
            dbc_mask_le: dbc_mask.to_le(),
            lm: self.lm,
            lm_old: self.lm_old,
            lm_uzawa: self.lm_uzawa,
            jump: self.jump,
            d_old: self.d_old,
            m_old: self.m_old,
            traction_old: self.traction_old,
        }
    }

    /// Take over the history carried by `w`; geometry stays untouched.
    pub(crate) fn apply_wire(&mut self, w: &WireNodeState) {
        let flags = u32::from_le(w.flags_le);
        let mask = u32::from_le(w.dbc_mask_le);
        self.active = flags & node_flags::ACTIVE != 0;
        self.active_old = flags & node_flags::ACTIVE_OLD != 0;
        self.slip = flags & node_flags::SLIP != 0;
        self.slip_old = flags & node_flags::SLIP_OLD != 0;
        self.dbc = std::array::from_fn(|k| mask & (1 << k) != 0);
        self.lm = w.lm;
        self.lm_old = w.lm_old;
        self.lm_uzawa = w.lm_uzawa;
        self.jump = w.jump;
        self.d_old = w.d_old;
        self.m_old = w.m_old;
        self.traction_old = w.traction_old;
    }
}

pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}
