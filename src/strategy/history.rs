//! Nodal storage, end-of-step update, restart and Dirichlet bookkeeping.

use super::ContactStrategy;
use crate::algs::communicator::{Communicator, agree};
use crate::config::{IntStrategy, SolvingStrategy};
use crate::contact_error::ContactError;
use crate::interface::{ContactInterface, ContactNode, HistoryKind, StateKind};
use crate::linalg::{DistSparseMatrix, DistVector, DofMap};
use crate::restart::{RestartReader, RestartWriter};

const ACTIVE_TOGGLE: &str = "activetoggle";
const SLIP_TOGGLE: &str = "sliptoggle";
const LM_OLD: &str = "lagrmultold";

/// Which mortar matrices `store_dm` overwrites.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmStore {
    /// `D, M ← D_old, M_old`
    Current,
    /// `D_old, M_old ← D, M`
    Old,
}

/// Normal and tangential contact stresses on the slave dofs.
#[derive(Clone, Debug)]
pub struct ContactStresses {
    pub normal: DistVector,
    pub tangential: DistVector,
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    /// Write the k-th component of the local slave-dof entries of `v` into
    /// every owned slave node.
    fn store_nodal<F>(&mut self, v: &DistVector, mut apply: F) -> Result<(), ContactError>
    where
        F: FnMut(&mut ContactNode, usize, f64),
    {
        for iface in &mut self.interfaces {
            let local = v.export_to(&self.comm, iface.slave_row_dofs())?;
            let nodes: Vec<u64> = iface.slave_row_nodes().iter().collect();
            for gid in nodes {
                let node = iface.slave_node_mut(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let dofs = node.dofs.clone();
                for (k, dof) in dofs.iter().enumerate() {
                    let value = local.get(*dof).ok_or_else(|| ContactError::GidNotInMap {
                        map: local.map().name().to_string(),
                        gid: *dof,
                    })?;
                    apply(node, k, value);
                }
            }
        }
        Ok(())
    }

    fn for_each_slave_node<F>(&mut self, mut apply: F) -> Result<(), ContactError>
    where
        F: FnMut(&mut ContactNode) -> Result<(), ContactError>,
    {
        for iface in &mut self.interfaces {
            let nodes: Vec<u64> = iface.slave_row_nodes().iter().collect();
            for gid in nodes {
                let node = iface.slave_node_mut(gid).ok_or(ContactError::NodeNotFound(gid))?;
                apply(node)?;
            }
        }
        Ok(())
    }

    /// *Collective.* Nodal multipliers from `z`.
    pub fn store_lm_current(&mut self) -> Result<(), ContactError> {
        let z = self.lm.z.clone();
        self.store_nodal(&z, |n, k, v| n.lm[k] = v)
    }

    /// *Collective.* Nodal multipliers of the last converged step from `z_old`.
    pub fn store_lm_old(&mut self) -> Result<(), ContactError> {
        let z_old = self.lm.z_old.clone();
        self.store_nodal(&z_old, |n, k, v| n.lm_old[k] = v)
    }

    /// *Collective.* Nodal Uzawa multipliers from `z_uzawa`.
    pub fn store_lm_uzawa(&mut self) -> Result<(), ContactError> {
        let z_uzawa = self.lm.z_uzawa.clone();
        self.store_nodal(&z_uzawa, |n, k, v| n.lm_uzawa[k] = v)
    }

    /// *Collective.* Like [`store_lm_current`](Self::store_lm_current), but an
    /// active node that also carries a Dirichlet condition is an error.
    pub fn store_lm_update(&mut self) -> Result<(), ContactError> {
        let result = self.store_lm_update_inner();
        agree(&self.comm, result)
    }

    fn store_lm_update_inner(&mut self) -> Result<(), ContactError> {
        self.store_lm_current()?;
        self.for_each_slave_node(|n| {
            if n.active && n.is_dbc() {
                return Err(ContactError::ActiveDirichletNode(n.gid));
            }
            Ok(())
        })
    }

    /// Copy the current active flags to their old slot.
    pub fn store_active_old(&mut self) -> Result<(), ContactError> {
        self.for_each_slave_node(|n| {
            n.active_old = n.active;
            Ok(())
        })
    }

    /// Copy the current slip flags to their old slot. Frictional only.
    pub fn store_slip_old(&mut self) -> Result<(), ContactError> {
        if !self.flags.friction {
            return Err(ContactError::FrictionRequired);
        }
        self.for_each_slave_node(|n| {
            n.slip_old = n.slip;
            Ok(())
        })
    }

    pub fn store_dm(&mut self, which: DmStore) -> Result<(), ContactError> {
        let mortar = &mut self.mortar;
        match which {
            DmStore::Current => {
                mortar.d = mortar.d_old.clone();
                mortar.m = mortar.m_old.clone();
            }
            DmStore::Old => {
                mortar.d_old = mortar.d.clone();
                mortar.m_old = mortar.m.clone();
                if self.flags.friction && self.trafo.is_some() {
                    mortar.d_old_mod = mortar.d_mod.clone();
                }
            }
        }
        Ok(())
    }

    pub fn store_to_old(&mut self, kind: HistoryKind) -> Result<(), ContactError> {
        for iface in &mut self.interfaces {
            iface.store_to_old(kind)?;
        }
        Ok(())
    }

    /// *Collective.* Mark the slave dofs contained in `dbc_dofs` as
    /// Dirichlet-constrained.
    ///
    /// Dirichlet flags may only be switched on: a slave dof that was marked
    /// before but is missing from `dbc_dofs` is an inconsistency.
    pub fn store_dirichlet_status(&mut self, dbc_dofs: &DofMap) -> Result<(), ContactError> {
        let result = self.store_dirichlet_status_inner(dbc_dofs);
        agree(&self.comm, result)
    }

    fn store_dirichlet_status_inner(&mut self, dbc_dofs: &DofMap) -> Result<(), ContactError> {
        let mut ones = DistVector::zeros(dbc_dofs);
        ones.put_scalar(1.0);
        let toggle = ones.export_to(&self.comm, &self.maps.slave_dofs)?;
        let slave_toggle = toggle.clone();
        self.for_each_slave_node(|n| {
            for (k, dof) in n.dofs.iter().enumerate() {
                let constrained = slave_toggle.get(*dof).unwrap_or(0.0) == 1.0;
                match (constrained, n.dbc[k]) {
                    (true, _) => n.dbc[k] = true,
                    (false, true) => {
                        return Err(ContactError::DirichletInconsistency {
                            node: n.gid,
                            dof: *dof,
                        });
                    }
                    (false, false) => {}
                }
            }
            Ok(())
        })?;
        self.algebra.post_store_dirichlet_status(&self.maps, &toggle)?;
        self.dirichlet_toggle = Some(toggle);
        Ok(())
    }

    /// *Collective.* Close a converged time step: move the multipliers, the
    /// mortar matrices and the active set to their old slots and push
    /// `displacement` as the old state.
    pub fn update(&mut self, displacement: &DistVector) -> Result<(), ContactError> {
        let result = self.update_inner(displacement);
        agree(&self.comm, result)
    }

    fn update_inner(&mut self, displacement: &DistVector) -> Result<(), ContactError> {
        // the self-contact slave set may have changed since the last setup
        self.lm.z_old = self.lm.z.export_to(&self.comm, &self.maps.slave_dofs)?;
        self.store_lm_old()?;
        self.store_dm(DmStore::Old)?;
        self.store_active_old()?;
        self.push_state(StateKind::OldDisplacement, displacement)?;
        self.algebra.reset_active_set();

        self.rebuild_active_set()?;
        let in_contact = self.maps.active.active_nodes.num_global() > 0;
        self.flags.was_in_contact = in_contact;
        self.flags.was_in_contact_last_time_step = in_contact;

        if self.flags.friction {
            self.store_slip_old()?;
            self.store_to_old(HistoryKind::Dm)?;
            self.store_to_old(HistoryKind::PenaltyTraction)?;
        }
        log::debug!(
            "[rank {}] step {} closed with {} active nodes",
            self.comm.rank(),
            self.step,
            self.maps.active.active_nodes.num_global()
        );
        Ok(())
    }

    /// Stresses of the last [`compute_contact_stresses`](Self::compute_contact_stresses).
    pub fn contact_stresses(&self) -> Option<&ContactStresses> {
        self.stresses.as_ref()
    }

    /// *Collective.* Split the nodal multipliers into normal and tangential
    /// contact stresses on the slave dofs.
    pub fn compute_contact_stresses(&mut self) -> Result<&ContactStresses, ContactError> {
        let slave = &self.maps.slave_dofs;
        let mut normal = DistVector::zeros(slave);
        let mut tangential = DistVector::zeros(slave);
        for iface in &self.interfaces {
            for gid in iface.slave_row_nodes().iter() {
                let n = iface.slave_node(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let zn = n.lm_normal();
                let zxi: f64 = n.lm.iter().zip(&n.txi).map(|(a, b)| a * b).sum();
                let zeta: f64 = n.lm.iter().zip(&n.teta).map(|(a, b)| a * b).sum();
                for (k, dof) in n.dofs.iter().enumerate() {
                    normal.set(*dof, -zn * n.normal[k])?;
                    tangential.set(*dof, -zxi * n.txi[k] - zeta * n.teta[k])?;
                }
            }
        }
        Ok(self.stresses.insert(ContactStresses { normal, tangential }))
    }

    fn toggles(&self, forced: bool) -> Result<(DistVector, DistVector), ContactError> {
        let nodes = &self.maps.slave_nodes;
        let mut active = DistVector::zeros(nodes);
        let mut slip = DistVector::zeros(nodes);
        for iface in &self.interfaces {
            for gid in iface.slave_row_nodes().iter() {
                let n = iface.slave_node(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let (a, s) = if forced {
                    (n.active_old, n.slip_old)
                } else {
                    (n.active, n.slip)
                };
                active.set(gid, if a { 1.0 } else { 0.0 })?;
                slip.set(gid, if s { 1.0 } else { 0.0 })?;
            }
        }
        Ok((active, slip))
    }

    /// Write the active/slip toggles and the converged multipliers.
    ///
    /// A `forced` restart happens in the middle of a step and writes the
    /// flags of the last converged step instead of the current ones.
    pub fn do_write_restart<W: RestartWriter>(&self, writer: &mut W, forced: bool) -> Result<(), ContactError> {
        let (active, slip) = self.toggles(forced)?;
        writer.write_vector(ACTIVE_TOGGLE, &active)?;
        if self.flags.friction {
            writer.write_vector(SLIP_TOGGLE, &slip)?;
        }
        writer.write_vector(LM_OLD, &self.lm.z_old)?;
        Ok(())
    }

    /// *Collective.* Rebuild the contact state from a restart written by
    /// [`do_write_restart`](Self::do_write_restart) at `displacement`.
    ///
    /// Current, old and Uzawa multipliers are all read from `lagrmultold`.
    pub fn do_read_restart<R: RestartReader>(
        &mut self,
        reader: &R,
        displacement: &DistVector,
    ) -> Result<(), ContactError> {
        let result = self.do_read_restart_inner(reader, displacement);
        agree(&self.comm, result)
    }

    fn do_read_restart_inner<R: RestartReader>(
        &mut self,
        reader: &R,
        displacement: &DistVector,
    ) -> Result<(), ContactError> {
        self.push_state(StateKind::NewDisplacement, displacement)?;
        self.push_state(StateKind::OldDisplacement, displacement)?;
        self.init_mortar()?;
        self.init_eval_interface()?;
        self.assemble_mortar()?;

        if let Some(trafo) = &self.trafo {
            let d = DistSparseMatrix::matmul(&self.comm, "D", &self.mortar.d, &trafo.inverse)?;
            self.mortar.d = d.row_col_transform(&self.comm, &self.maps.slave_dofs, &self.maps.slave_dofs)?;
        }

        let with_contact = self.params.restart_with_contact;
        if !with_contact {
            self.read_toggles(reader)?;
        }

        let slave = self.maps.slave_dofs.clone();
        let skip_multipliers = with_contact
            || (self.params.int_strategy == IntStrategy::Standard
                && self.params.is_penalty());
        let mut z = DistVector::zeros(&slave);
        if !skip_multipliers {
            reader.read_vector(LM_OLD, &mut z)?;
        }
        self.lm.z = z.clone();
        self.lm.z_old = z;
        self.lm.z_incr = DistVector::zeros(&slave);
        self.store_lm_current()?;
        self.store_lm_old()?;

        if self.params.strategy == SolvingStrategy::Uzawa {
            let mut z_uzawa = DistVector::zeros(&slave);
            if !skip_multipliers {
                reader.read_vector(LM_OLD, &mut z_uzawa)?;
            }
            self.lm.z_uzawa = z_uzawa;
            self.store_lm_uzawa()?;
        }

        self.store_dm(DmStore::Old)?;
        if self.flags.friction {
            self.store_active_old()?;
            self.store_to_old(HistoryKind::Dm)?;
        }

        self.rebuild_active_set()?;
        if self.maps.active.active_nodes.num_global() > 0 {
            self.flags.was_in_contact_last_time_step = true;
        }
        self.evaluate_rel_mov()?;
        self.unbalance.clear();
        log::info!(
            "[rank {}] contact restart read: {} active nodes",
            self.comm.rank(),
            self.maps.active.active_nodes.num_global()
        );
        Ok(())
    }

    fn read_toggles<R: RestartReader>(&mut self, reader: &R) -> Result<(), ContactError> {
        let nodes = self.maps.slave_nodes.clone();
        let mut active = DistVector::zeros(&nodes);
        reader.read_vector(ACTIVE_TOGGLE, &mut active)?;
        let slip = if self.flags.friction {
            let mut slip = DistVector::zeros(&nodes);
            reader.read_vector(SLIP_TOGGLE, &mut slip)?;
            Some(slip)
        } else {
            None
        };
        self.for_each_slave_node(|n| {
            n.active = active.get(n.gid).unwrap_or(0.0) == 1.0;
            if let Some(slip) = &slip {
                n.slip = n.active && slip.get(n.gid).unwrap_or(0.0) == 1.0;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::{ContactParams, FrictionType};
    use crate::interface::{NodePair, NodeToNodeInterface};
    use crate::restart::MemoryRestartStore;

    fn strategy(params: ContactParams) -> ContactStrategy<NoComm, NodeToNodeInterface<NoComm>> {
        let pairs = (0..2)
            .map(|k| {
                let s = ContactNode::new(k, vec![3 * k, 3 * k + 1, 3 * k + 2], [k as f64, 0.0, 0.0]);
                let m = k + 2;
                let mm = ContactNode::new(m, vec![3 * m, 3 * m + 1, 3 * m + 2], [k as f64, 0.0, 0.1]);
                NodePair::new(s, mm, [0.0, 0.0, 1.0], 0.5)
            })
            .collect();
        let iface = NodeToNodeInterface::new(NoComm, 0, &params, pairs, None).unwrap();
        let problem = DofMap::new(&NoComm, "problem", (0..12).collect()).unwrap();
        ContactStrategy::with_penalty(NoComm, params, problem, vec![iface]).unwrap()
    }

    fn penetrate(s: &mut ContactStrategy<NoComm, NodeToNodeInterface<NoComm>>) -> DistVector {
        let mut u = DistVector::zeros(&s.maps().displacement_dofs.clone());
        u.set(2, 0.15).unwrap();
        s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
        u
    }

    #[test]
    fn multipliers_land_on_nodes() {
        let mut s = strategy(ContactParams::default());
        penetrate(&mut s);
        s.lm.z.set(0, 0.0).unwrap();
        s.lm.z.set(1, 0.0).unwrap();
        s.lm.z.set(2, 4.0).unwrap();
        s.store_lm_current().unwrap();
        assert_eq!(s.interfaces()[0].slave_node(0).unwrap().lm, [0.0, 0.0, 4.0]);
        let stresses = s.compute_contact_stresses().unwrap();
        assert_eq!(stresses.normal.get(2), Some(-4.0));
        assert_eq!(stresses.tangential.get(2), Some(0.0));
    }

    #[test]
    fn slip_history_needs_friction() {
        let mut s = strategy(ContactParams::default());
        assert_eq!(s.store_slip_old().unwrap_err(), ContactError::FrictionRequired);
    }

    #[test]
    fn update_moves_state_to_old() {
        let mut s = strategy(ContactParams::default());
        let u = penetrate(&mut s);
        let z = s.multipliers().z.clone();
        assert!(!z.is_locally_zero());
        s.update(&u).unwrap();
        assert_eq!(s.multipliers().z_old.values(), z.values());
        assert_eq!(s.mortar().d_old.get(0, 0), 0.5);
        let node = s.interfaces()[0].slave_node(0).unwrap();
        assert!(node.active_old);
        assert_eq!(node.lm_old, node.lm);
        assert!(s.flags().was_in_contact_last_time_step);
    }

    #[test]
    fn dirichlet_flags_only_switch_on() {
        let mut s = strategy(ContactParams::default());
        let dbc = DofMap::new(&NoComm, "dbc", vec![1, 4, 10]).unwrap();
        s.store_dirichlet_status(&dbc).unwrap();
        assert_eq!(s.interfaces()[0].slave_node(1).unwrap().dbc, [false, true, false]);
        assert_eq!(s.dirichlet_toggle().unwrap().get(1), Some(1.0));
        assert_eq!(s.dirichlet_toggle().unwrap().get(0), Some(0.0));

        let fewer = DofMap::new(&NoComm, "dbc", vec![1]).unwrap();
        assert_eq!(
            s.store_dirichlet_status(&fewer).unwrap_err(),
            ContactError::DirichletInconsistency { node: 1, dof: 4 }
        );
    }

    #[test]
    fn active_dirichlet_node_is_rejected() {
        let mut s = strategy(ContactParams::default());
        let dbc = DofMap::new(&NoComm, "dbc", vec![0]).unwrap();
        s.store_dirichlet_status(&dbc).unwrap();
        penetrate(&mut s);
        assert_eq!(s.store_lm_update().unwrap_err(), ContactError::ActiveDirichletNode(0));
    }

    #[test]
    fn restart_restores_active_set() {
        let params = ContactParams {
            friction: FrictionType::Stick,
            ..Default::default()
        };
        let mut s = strategy(params.clone());
        let u = penetrate(&mut s);
        s.update(&u).unwrap();
        let mut store = MemoryRestartStore::new();
        s.do_write_restart(&mut store, false).unwrap();
        assert!(store.has_vector(SLIP_TOGGLE));

        let mut fresh = strategy(params);
        fresh.do_read_restart(&store, &u).unwrap();
        assert_eq!(fresh.maps().active.active_nodes.gids(), &[0]);
        assert!(fresh.flags().in_contact);
        // standard integration with a penalty strategy does not read multipliers
        assert!(fresh.multipliers().z_old.is_locally_zero());
    }

    #[test]
    fn forced_restart_writes_old_flags() {
        let mut s = strategy(ContactParams::default());
        penetrate(&mut s);
        let mut store = MemoryRestartStore::new();
        s.do_write_restart(&mut store, true).unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.vectors[ACTIVE_TOGGLE].get(&0), Some(&0.0));
        s.do_write_restart(&mut store, false).unwrap();
        assert_eq!(store.snapshot().vectors[ACTIVE_TOGGLE].get(&0), Some(&1.0));
    }
}
