//! Global map builder.
//!
//! [`ContactStrategy::setup`] merges the per-interface maps into the global
//! slave/master/active/multiplier maps and returns a fresh [`GlobalMaps`]
//! value; nothing is patched in place. History matrices and multiplier
//! vectors are then carried over onto the new maps.

use super::ContactStrategy;
use crate::algs::communicator::{CollectiveExt, Communicator, agree};
use crate::config::LagMultQuad;
use crate::contact_error::ContactError;
use crate::interface::{ActiveSetMaps, ContactInterface, NonsmoothMaps};
use crate::linalg::{DistSparseMatrix, DistVector, DofMap, Gid};
use hashbrown::HashSet;

/// Every global map of the strategy, rebuilt as a unit.
#[derive(Clone, Debug, Default)]
pub struct GlobalMaps {
    pub slave_nodes: DofMap,
    pub master_nodes: DofMap,
    pub slave_dofs: DofMap,
    pub master_dofs: DofMap,
    pub slave_master_dofs: DofMap,
    /// Problem dofs that are neither slave nor master.
    pub internal_dofs: DofMap,
    /// Internal dofs followed by slave and master dofs.
    pub displacement_dofs: DofMap,
    /// Multiplier dofs aligned with `slave_dofs` entry by entry.
    pub lm_dofs: DofMap,
    pub active: ActiveSetMaps,
    pub nonsmooth: Option<NonsmoothMaps>,
    /// Self-contact multiplier dofs and the reference dofs they belong to.
    pub self_contact: Option<(DofMap, DofMap)>,
}

/// Maps in the layout of the problem discretization, kept from the first
/// setup when parallel redistribution is on.
#[derive(Clone, Debug)]
pub struct UnredistributedMaps {
    pub slave_dofs: DofMap,
    pub master_dofs: DofMap,
    pub slave_master_dofs: DofMap,
    pub lm_dofs: DofMap,
}

/// Dual-quadratic slave transformation and its inverse.
#[derive(Clone, Debug)]
pub struct Trafo {
    pub trafo: DistSparseMatrix,
    pub inverse: DistSparseMatrix,
}

fn relabel(err: ContactError, set: &'static str) -> ContactError {
    match err {
        ContactError::DuplicateGlobalId { gid, .. } => ContactError::OverlappingSets { set, gid },
        other => other,
    }
}

/// *Collective.* Union of the per-interface active, inactive and slip sets.
/// The sets of two interfaces must not overlap.
pub fn merge_active_sets<C: Communicator, I: ContactInterface>(
    comm: &C,
    interfaces: &[I],
    frictional: bool,
) -> Result<ActiveSetMaps, ContactError> {
    let merge = |name: &'static str, pick: fn(&ActiveSetMaps) -> &DofMap| {
        DofMap::merge_many(comm, name, interfaces.iter().map(|i| pick(i.active_set())), false)
            .map_err(|e| relabel(e, name))
    };
    let mut out = ActiveSetMaps {
        active_nodes: merge("active nodes", |a| &a.active_nodes)?,
        active_dofs: merge("active dofs", |a| &a.active_dofs)?,
        inactive_nodes: merge("inactive nodes", |a| &a.inactive_nodes)?,
        inactive_dofs: merge("inactive dofs", |a| &a.inactive_dofs)?,
        active_n: merge("active normal dofs", |a| &a.active_n)?,
        active_t: merge("active tangential dofs", |a| &a.active_t)?,
        ..ActiveSetMaps::empty()
    };
    if frictional {
        out.slip_nodes = merge("slip nodes", |a| &a.slip_nodes)?;
        out.slip_dofs = merge("slip dofs", |a| &a.slip_dofs)?;
        out.slip_t = merge("slip tangential dofs", |a| &a.slip_t)?;
    }
    Ok(out)
}

/// *Collective.* Multiplier map aligned with `slave_dofs`: the multiplier
/// of a slave dof is looked up in the first interface that owns the dof.
pub fn deterministic_lm_map<C: Communicator, I: ContactInterface>(
    comm: &C,
    interfaces: &[I],
    slave_dofs: &DofMap,
) -> Result<DofMap, ContactError> {
    let lookup = |sgid: Gid| -> Result<Gid, ContactError> {
        let (iface, slid) = interfaces
            .iter()
            .find_map(|i| i.slave_row_dofs().lid(sgid).map(|l| (i, l)))
            .ok_or(ContactError::SlaveDofNotFound {
                gid: sgid,
                rank: comm.rank(),
            })?;
        iface
            .lag_mult_dofs()
            .and_then(|lm| lm.gid(slid))
            .ok_or(ContactError::LagrangeMultiplierNotAssigned { gid: sgid })
    };
    let local: Result<Vec<Gid>, ContactError> = slave_dofs.iter().map(lookup).collect();
    let gids = agree(comm, local)?;
    DofMap::new(comm, "lm dofs", gids)
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    /// *Collective.* Rebuild every global map from the interfaces and carry
    /// history matrices and multipliers over onto the new maps.
    ///
    /// `init` marks the first build; `redistributed` a rebuild after the
    /// interfaces changed their parallel layout.
    pub fn setup(&mut self, redistributed: bool, init: bool) -> Result<(), ContactError> {
        let result = self.rebuild_global_state(redistributed, init);
        agree(&self.comm, result)
    }

    pub(crate) fn rebuild_global_state(
        &mut self,
        redistributed: bool,
        init: bool,
    ) -> Result<(), ContactError> {
        if init {
            self.flags.self_contact = self.interfaces.iter().any(|i| i.is_self_contact());
        }
        if self.flags.self_contact && redistributed {
            return Err(ContactError::UnsupportedCombination(
                "self contact with parallel redistribution",
            ));
        }
        let maps = self.build_maps(redistributed, init)?;
        self.maps = maps;

        if self.maps.active.active_nodes.num_global() > 0 {
            self.flags.in_contact = true;
            self.flags.was_in_contact = true;
            self.flags.was_in_contact_last_time_step = true;
        }

        self.carry_over_history(redistributed)?;
        self.trafo = self.build_trafo()?;

        if init && self.params.parallel.redist != crate::config::ParallelRedist::None {
            for iface in &mut self.interfaces {
                iface.store_unredistributed_maps();
            }
            self.unredistributed = Some(UnredistributedMaps {
                slave_dofs: self.maps.slave_dofs.clone(),
                master_dofs: self.maps.master_dofs.clone(),
                slave_master_dofs: self.maps.slave_master_dofs.clone(),
                lm_dofs: self.maps.lm_dofs.clone(),
            });
        }

        self.algebra.post_setup(&self.maps, redistributed, init)?;
        log::debug!(
            "setup done: {} slave dofs, {} master dofs, {} active nodes",
            self.maps.slave_dofs.num_global(),
            self.maps.master_dofs.num_global(),
            self.maps.active.active_nodes.num_global()
        );
        Ok(())
    }

    fn build_maps(&mut self, redistributed: bool, init: bool) -> Result<GlobalMaps, ContactError> {
        let comm = &self.comm;
        let mut offset = self.lm_offset()?;
        let mut sc_lm: Vec<DofMap> = Vec::new();
        let mut sc_ref: Vec<DofMap> = Vec::new();
        for iface in &mut self.interfaces {
            if self.flags.self_contact {
                let reference = if iface.is_self_contact() {
                    DofMap::merge(
                        comm,
                        "self contact reference dofs",
                        iface.slave_row_dofs(),
                        iface.master_row_dofs(),
                        false,
                    )?
                } else {
                    iface.slave_row_dofs().clone()
                };
                let lm = iface.update_lag_mult_sets(offset, redistributed, Some(&reference))?;
                offset += lm.num_global() as u64;
                sc_lm.push(lm);
                sc_ref.push(reference);
            } else {
                let lm = iface.update_lag_mult_sets(offset, redistributed, None)?;
                offset += lm.num_global() as u64;
            }
            iface.build_active_set(init, &self.params)?;
        }

        let ifaces = &self.interfaces;
        let merge = |name: &'static str, pick: fn(&I) -> &DofMap| {
            DofMap::merge_many(comm, name, ifaces.iter().map(pick), false)
        };
        let slave_nodes = merge("slave nodes", |i| i.slave_row_nodes())?;
        let master_nodes = merge("master nodes", |i| i.master_row_nodes())?;
        let slave_dofs = merge("slave dofs", |i| i.slave_row_dofs())?;
        let master_dofs = merge("master dofs", |i| i.master_row_dofs())?;
        let active = merge_active_sets(comm, ifaces, self.flags.friction)?;

        let nonsmooth = if self.params.nonsmooth_geometries {
            let parts: Vec<&NonsmoothMaps> =
                ifaces.iter().filter_map(|i| i.nonsmooth_maps()).collect();
            Some(NonsmoothMaps {
                vertex_dofs: DofMap::merge_many(comm, "vertex dofs", parts.iter().map(|p| &p.vertex_dofs), false)?,
                edge_dofs: DofMap::merge_many(comm, "edge dofs", parts.iter().map(|p| &p.edge_dofs), false)?,
                surface_dofs: DofMap::merge_many(comm, "surface dofs", parts.iter().map(|p| &p.surface_dofs), false)?,
            })
        } else {
            None
        };

        let lm_dofs = deterministic_lm_map(comm, ifaces, &slave_dofs)?;

        // redistribution only moves contact dofs, so the internal map stays
        let internal_dofs = if redistributed && self.maps.internal_dofs.num_global() > 0 {
            self.maps.internal_dofs.clone()
        } else {
            let without_slave = DofMap::split(comm, "internal dofs", &self.problem_dofs, &slave_dofs)?;
            DofMap::split(comm, "internal dofs", &without_slave, &master_dofs)?
        };
        let slave_master_dofs = DofMap::merge(
            comm,
            "slave and master dofs",
            &slave_dofs,
            &master_dofs,
            self.flags.self_contact,
        )?;
        let displacement_dofs = DofMap::merge(
            comm,
            "displacement dofs",
            &internal_dofs,
            &slave_master_dofs,
            false,
        )?;

        let self_contact = if self.flags.self_contact {
            Some((
                DofMap::merge_many(comm, "self contact lm dofs", &sc_lm, false)?,
                DofMap::merge_many(comm, "self contact reference dofs", &sc_ref, true)?,
            ))
        } else {
            None
        };

        Ok(GlobalMaps {
            slave_nodes,
            master_nodes,
            slave_dofs,
            master_dofs,
            slave_master_dofs,
            internal_dofs,
            displacement_dofs,
            lm_dofs,
            active,
            nonsmooth,
            self_contact,
        })
    }

    /// First multiplier id: one past the largest problem dof.
    fn lm_offset(&self) -> Result<u64, ContactError> {
        let local = self.problem_dofs.iter().max().unwrap_or(0);
        let global = self.comm.max_all(local)?;
        Ok(global.max(self.params.max_dof) + 1)
    }

    fn carry_over_history(&mut self, redistributed: bool) -> Result<(), ContactError> {
        let comm = &self.comm;
        let slave = &self.maps.slave_dofs;
        let master = &self.maps.master_dofs;
        let rebuild = |old: &DistSparseMatrix, cols: &DofMap| -> Result<DistSparseMatrix, ContactError> {
            if redistributed && old.is_completed() && old.num_global_nonzeros(comm)? > 0 {
                old.row_col_transform(comm, slave, cols)
            } else {
                let mut fresh = DistSparseMatrix::new(old.name().to_string(), slave);
                fresh.complete(comm, cols)?;
                Ok(fresh)
            }
        };
        self.mortar.d_old = rebuild(&self.mortar.d_old, slave)?;
        self.mortar.m_old = rebuild(&self.mortar.m_old, master)?;
        self.mortar.d_old_mod = match (&self.mortar.d_old_mod, redistributed) {
            (Some(old_mod), true) => Some(rebuild(old_mod, slave)?),
            _ => None,
        };
        self.mortar.d = DistSparseMatrix::new("D", slave);
        self.mortar.m = DistSparseMatrix::new("M", slave);
        self.mortar.d_mod = None;

        let carry = |v: &DistVector| -> Result<DistVector, ContactError> {
            if redistributed {
                v.export_to(comm, slave)
            } else {
                Ok(DistVector::zeros(slave))
            }
        };
        self.lm.z = carry(&self.lm.z)?;
        self.lm.z_incr = carry(&self.lm.z_incr)?;
        self.lm.z_old = carry(&self.lm.z_old)?;
        self.lm.z_uzawa = carry(&self.lm.z_uzawa)?;

        self.stresses = None;
        Ok(())
    }

    /// Transformation matrices for dual or Petrov-Galerkin multipliers on
    /// quadratic slave elements; `None` when not needed.
    fn build_trafo(&self) -> Result<Option<Trafo>, ContactError> {
        let p = &self.params;
        let applies = p.uses_dual_shape() && (p.dim == 3 || (p.dim == 2 && p.lm_quad == LagMultQuad::Lin));
        if !applies || !self.interfaces.iter().any(|i| i.has_quadratic_slave()) {
            return Ok(None);
        }
        // locally linear multipliers couple master dofs too
        let rows = if p.lm_quad == LagMultQuad::Lin {
            &self.maps.slave_master_dofs
        } else {
            &self.maps.slave_dofs
        };
        let mut trafo = DistSparseMatrix::new("trafo", rows);
        let mut inverse = DistSparseMatrix::new("inverse trafo", rows);
        let mut done_before: HashSet<Gid> = HashSet::new();
        for iface in &self.interfaces {
            iface.assemble_trafo(&mut trafo, &mut inverse, &mut done_before)?;
        }
        trafo.complete(&self.comm, rows)?;
        inverse.complete(&self.comm, rows)?;
        Ok(Some(Trafo { trafo, inverse }))
    }

    /// True once any slave dof is transformed.
    pub fn dual_quad_slave_trafo(&self) -> bool {
        self.trafo.is_some()
    }

    pub fn trafo(&self) -> Option<&Trafo> {
        self.trafo.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::ContactParams;
    use crate::interface::{ContactNode, NodePair, NodeToNodeInterface};

    fn iface(first: u64) -> NodeToNodeInterface<NoComm> {
        let params = ContactParams::default();
        let pairs = (first..first + 2)
            .map(|k| {
                let s = ContactNode::new(k, vec![3 * k, 3 * k + 1, 3 * k + 2], [0.0; 3]);
                let m = k + 50;
                let mm = ContactNode::new(m, vec![3 * m, 3 * m + 1, 3 * m + 2], [0.0, 0.0, 1.0]);
                NodePair::new(s, mm, [0.0, 0.0, 1.0], 1.0)
            })
            .collect();
        NodeToNodeInterface::new(NoComm, 0, &params, pairs, None).unwrap()
    }

    #[test]
    fn lm_lookup_needs_assigned_multipliers() {
        let ifaces = vec![iface(0)];
        let slave = ifaces[0].slave_row_dofs().clone();
        let err = deterministic_lm_map(&NoComm, &ifaces, &slave).unwrap_err();
        assert!(matches!(err, ContactError::LagrangeMultiplierNotAssigned { gid: 0 }));

        let stray = DofMap::new(&NoComm, "slave", vec![999]).unwrap();
        let err = deterministic_lm_map(&NoComm, &ifaces, &stray).unwrap_err();
        assert!(matches!(err, ContactError::SlaveDofNotFound { gid: 999, rank: 0 }));
    }

    #[test]
    fn overlapping_active_sets_are_rejected() {
        let params = ContactParams {
            init_contact_by_gap: true,
            init_contact_gap_value: 2.0,
            ..Default::default()
        };
        let mut a = iface(0);
        let mut b = iface(0);
        a.build_active_set(true, &params).unwrap();
        b.build_active_set(true, &params).unwrap();
        let err = merge_active_sets(&NoComm, &[a, b], false).unwrap_err();
        assert_eq!(err, ContactError::OverlappingSets { set: "active nodes", gid: 0 });
    }
}
