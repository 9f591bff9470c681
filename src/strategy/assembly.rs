//! Mortar assembly driver: the per-Newton-iteration evaluation sequence.

use super::ContactStrategy;
use super::algebra::ContactContribution;
use crate::algs::communicator::{CollectiveExt, Communicator, agree};
use crate::config::{ConstraintDirection, EmOutput, ExtendGhosting};
use crate::contact_error::ContactError;
use crate::interface::{ContactInterface, HistoryKind, StateKind};
use crate::linalg::{DistSparseMatrix, DistVector, DofMap};
use nalgebra::Vector3;
use std::time::Instant;

/// Barrier-separated wall clock for the timing-details output.
struct PhaseClock<'a, C: Communicator> {
    comm: &'a C,
    enabled: bool,
    last: Instant,
}

impl<'a, C: Communicator> PhaseClock<'a, C> {
    fn start(comm: &'a C, enabled: bool) -> Result<Self, ContactError> {
        if enabled {
            comm.barrier()?;
        }
        Ok(Self {
            comm,
            enabled,
            last: Instant::now(),
        })
    }

    fn lap(&mut self, phase: &str) -> Result<(), ContactError> {
        if !self.enabled {
            return Ok(());
        }
        self.comm.barrier()?;
        let elapsed = self.last.elapsed();
        if self.comm.rank() == 0 {
            log::info!("    time for '{phase}': {:.3} ms", elapsed.as_secs_f64() * 1e3);
        }
        self.last = Instant::now();
        Ok(())
    }
}

/// Interface force and moment resultants, summed over all ranks.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct InterfaceForces {
    pub slave_force: [f64; 3],
    pub master_force: [f64; 3],
    pub slave_moment: [f64; 3],
    pub master_moment: [f64; 3],
}

/// Moment of `force` about the origin when applied at `x`.
fn moment(x: &[f64; 3], force: &[f64; 3]) -> [f64; 3] {
    let m = Vector3::from(*x).cross(&Vector3::from(*force));
    [m.x, m.y, m.z]
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    /// *Collective.* One Newton iteration: evaluate the interfaces at
    /// `displacement`, update the active set and return the linearized
    /// contact terms.
    pub fn apply_force_stiff_contact(
        &mut self,
        displacement: &DistVector,
        step: i32,
        iter: i32,
        predictor: bool,
    ) -> Result<ContactContribution, ContactError> {
        let result = self.apply_force_stiff_contact_inner(displacement, step, iter, predictor);
        agree(&self.comm, result)
    }

    fn apply_force_stiff_contact_inner(
        &mut self,
        displacement: &DistVector,
        step: i32,
        iter: i32,
        predictor: bool,
    ) -> Result<ContactContribution, ContactError> {
        self.step = step;
        self.iter = iter;
        let comm = self.comm.clone();
        let mut clock = PhaseClock::start(&comm, self.params.timing_details)?;

        self.push_state(StateKind::NewDisplacement, displacement)?;
        clock.lap("set state")?;

        // self contact: slave and master are only known after the search
        if self.flags.self_contact {
            self.init_eval_interface()?;
            self.init_mortar()?;
        } else {
            self.init_mortar()?;
            self.init_eval_interface()?;
        }
        self.assemble_mortar()?;
        clock.lap("interface evaluation")?;

        if predictor {
            self.evaluate_rel_mov_predict()?;
        } else {
            self.evaluate_rel_mov()?;
            self.update_active_set_semi_smooth()?;
        }
        clock.lap("update active set")?;

        self.initialize()?;
        let mut contribution = self.evaluate()?;
        contribution.constraint_rhs = self.eval_constr_rhs()?;
        clock.lap("modify global system")?;

        self.forces = self.interface_forces()?;
        Ok(contribution)
    }

    /// *Collective.* Search and integrate every interface, then record a
    /// balance sample.
    pub fn init_eval_interface(&mut self) -> Result<(), ContactError> {
        let started = Instant::now();
        self.int_time = 0.0;
        let ghosting = self.params.parallel.ghosting;
        let (step, iter) = (self.step, self.iter);
        for iface in &mut self.interfaces {
            iface.initialize()?;
            match ghosting {
                ExtendGhosting::RoundRobin => {
                    iface.round_robin_detect_ghosting()?;
                    iface.evaluate(0, step, iter)?;
                }
                ExtendGhosting::Binning
                | ExtendGhosting::RedundantAll
                | ExtendGhosting::RedundantMaster => iface.evaluate(0, step, iter)?,
            }
            self.int_time += iface.integration_time();
        }
        self.check_parallel_distribution(started)
    }

    /// *Collective.* Fresh D, M and gap on the current slave layout.
    pub fn init_mortar(&mut self) -> Result<(), ContactError> {
        self.update_global_self_contact_state()?;
        let slave = &self.maps.slave_dofs;
        self.mortar.d = DistSparseMatrix::new("D", slave);
        self.mortar.m = DistSparseMatrix::new("M", slave);
        self.mortar.gap = match self.params.constraint_directions {
            ConstraintDirection::Xyz => DistVector::zeros(slave),
            ConstraintDirection::Ntt => DistVector::zeros(&self.maps.slave_nodes),
        };
        if self.flags.friction && self.trafo.is_some() {
            self.mortar.d_mod = Some(DistSparseMatrix::new("D mod", slave));
        }
        Ok(())
    }

    /// *Collective.* Re-read the slave and master sets of self-contact
    /// interfaces and move `z` and `Δz` onto the new slave map.
    pub fn update_global_self_contact_state(&mut self) -> Result<(), ContactError> {
        if !self.flags.self_contact {
            return Ok(());
        }
        let (sc_lm, sc_ref) = self
            .maps
            .self_contact
            .clone()
            .ok_or(ContactError::UnsupportedCombination(
                "self contact state without self contact multiplier maps",
            ))?;
        let mut lm_parts = Vec::with_capacity(self.interfaces.len());
        for iface in &mut self.interfaces {
            lm_parts.push(iface.update_self_contact_lag_mult_set(&sc_lm, &sc_ref)?);
        }
        let comm = &self.comm;
        let ifaces = &self.interfaces;
        let merge = |name: &'static str, pick: fn(&I) -> &DofMap| {
            DofMap::merge_many(comm, name, ifaces.iter().map(pick), false)
        };
        let slave_nodes = merge("slave nodes", |i| i.slave_row_nodes())?;
        let slave_dofs = merge("slave dofs", |i| i.slave_row_dofs())?;
        let master_nodes = merge("master nodes", |i| i.master_row_nodes())?;
        let master_dofs = merge("master dofs", |i| i.master_row_dofs())?;
        let lm_dofs = DofMap::merge_many(comm, "lm dofs", &lm_parts, false)?;
        let slave_master_dofs =
            DofMap::merge(comm, "slave and master dofs", &slave_dofs, &master_dofs, true)?;

        let (z, lost_z) = self.lm.z.export_to_counting_lost(comm, &slave_dofs)?;
        if lost_z > 0 {
            return Err(ContactError::SelfContactTransfer("lagrange multiplier"));
        }
        let (z_incr, lost_incr) = self.lm.z_incr.export_to_counting_lost(comm, &slave_dofs)?;
        if lost_incr > 0 {
            return Err(ContactError::SelfContactTransfer("lagrange multiplier increment"));
        }
        self.lm.z = z;
        self.lm.z_incr = z_incr;
        self.lm.z_old = self.lm.z_old.export_to(comm, &slave_dofs)?;
        self.lm.z_uzawa = self.lm.z_uzawa.export_to(comm, &slave_dofs)?;

        self.maps.slave_nodes = slave_nodes;
        self.maps.slave_dofs = slave_dofs;
        self.maps.master_nodes = master_nodes;
        self.maps.master_dofs = master_dofs;
        self.maps.slave_master_dofs = slave_master_dofs;
        self.maps.lm_dofs = lm_dofs;
        Ok(())
    }

    /// *Collective.* Collect D, M, gap and normals from every interface and
    /// complete them.
    pub fn assemble_mortar(&mut self) -> Result<(), ContactError> {
        for iface in &self.interfaces {
            iface.assemble_dm(&mut self.mortar.d, &mut self.mortar.m)?;
            iface.assemble_g(&mut self.mortar.gap)?;
        }
        self.mortar.d.complete(&self.comm, &self.maps.slave_dofs)?;
        self.mortar.m.complete(&self.comm, &self.maps.master_dofs)?;
        self.mortar.normals = Some(self.assemble_normal_matrix()?);
        Ok(())
    }

    fn assemble_normal_matrix(&self) -> Result<DistSparseMatrix, ContactError> {
        let mut n = DistSparseMatrix::new("N", &self.maps.slave_nodes);
        for iface in &self.interfaces {
            iface.assemble_normals(&mut n)?;
        }
        n.complete(&self.comm, &self.maps.slave_dofs)?;
        Ok(n)
    }

    /// *Collective.* Push `displacement`, recompute nodal normals and return
    /// the normal matrix (rows: slave nodes, columns: slave dofs).
    pub fn evaluate_normals(&mut self, displacement: &DistVector) -> Result<DistSparseMatrix, ContactError> {
        self.push_state(StateKind::NewDisplacement, displacement)?;
        for iface in &mut self.interfaces {
            iface.evaluate_nodal_normals()?;
        }
        let n = self.assemble_normal_matrix()?;
        self.mortar.normals = Some(n.clone());
        Ok(n)
    }

    /// *Collective.* Tangent matrix and weighted jump for frictional algebras.
    pub(crate) fn assemble_friction_terms(&mut self) -> Result<(), ContactError> {
        let slave = &self.maps.slave_dofs;
        let mut t = DistSparseMatrix::new("T", slave);
        let mut jump = DistVector::zeros(slave);
        for iface in &self.interfaces {
            iface.assemble_tangents(&mut t)?;
            iface.assemble_jump(&mut jump)?;
        }
        t.complete(&self.comm, slave)?;
        self.mortar.tangents = Some(t);
        self.mortar.jump = Some(jump);
        Ok(())
    }

    /// *Collective.* Evaluate the initial configuration once before the first
    /// step: seed the active set from the gap if requested and set up the
    /// friction history.
    pub fn evaluate_reference_state(&mut self) -> Result<(), ContactError> {
        let result = self.evaluate_reference_state_inner();
        agree(&self.comm, result)
    }

    fn evaluate_reference_state_inner(&mut self) -> Result<(), ContactError> {
        if !(self.flags.friction || self.params.init_contact_by_gap) {
            return Ok(());
        }
        self.init_mortar()?;
        self.init_eval_interface()?;
        self.assemble_mortar()?;

        if self.params.init_contact_by_gap {
            for iface in &mut self.interfaces {
                iface.build_active_set(true, &self.params)?;
            }
            self.merge_global_active_set()?;
            if self.maps.active.active_nodes.num_global() == 0 {
                return Err(ContactError::NoActiveNodes);
            }
            self.flags.was_in_contact_last_time_step = true;
        }

        if self.flags.friction {
            self.store_active_old()?;
            self.store_dm(super::DmStore::Old)?;
            self.store_to_old(HistoryKind::Dm)?;
            self.store_to_old(HistoryKind::NormalOld)?;
            if self.trafo.is_some() {
                self.mortar.d_old_mod = self.mortar.d_mod.clone();
            }
            self.evaluate_rel_mov()?;
        }

        self.unbalance.clear();
        Ok(())
    }

    /// *Collective.* Nodal relative movement for friction.
    pub fn evaluate_rel_mov(&mut self) -> Result<(), ContactError> {
        if !self.flags.friction {
            return Ok(());
        }
        let comm = &self.comm;
        let slave = &self.maps.slave_dofs;
        let d_mod = match &self.trafo {
            Some(trafo) => DistSparseMatrix::matmul(comm, "D mod", &self.mortar.d, &trafo.inverse)?
                .row_col_transform(comm, slave, slave)?,
            None => self.mortar.d.clone(),
        };

        let mut xs = DistVector::zeros(slave);
        for iface in &self.interfaces {
            iface.assemble_slave_coord(&mut xs)?;
        }
        if let Some(trafo) = &self.trafo {
            xs = trafo.trafo.multiply(comm, false, &xs)?.export_to(comm, slave)?;
        }
        let redundant = slave.allreduce(comm)?;
        let xs_all = xs.export_to(comm, &redundant)?;

        let d_old_mod = match &self.mortar.d_old_mod {
            Some(m) => m.clone(),
            None => self.mortar.d_old.clone(),
        };
        if !self.params.gp_slip_incr {
            for iface in &mut self.interfaces {
                iface.evaluate_rel_mov(&xs_all, &d_mod, &d_old_mod)?;
            }
        }
        self.mortar.d_mod = Some(d_mod);
        Ok(())
    }

    /// *Collective.* Predictor variant of [`evaluate_rel_mov`](Self::evaluate_rel_mov),
    /// delegated to the algebra.
    pub fn evaluate_rel_mov_predict(&mut self) -> Result<(), ContactError> {
        let (algebra, mut ctx) = self.algebra_parts();
        algebra.evaluate_rel_mov_predict(&mut ctx)
    }

    /// *Collective.* Slave and master force and moment resultants, `Dᵀz`
    /// and `−Mᵀz`. `None` unless interface force output is configured.
    pub fn interface_forces(&mut self) -> Result<Option<InterfaceForces>, ContactError> {
        if self.params.em_output == EmOutput::None {
            return Ok(None);
        }
        let comm = &self.comm;
        let z = self.lm.z.export_to(comm, self.mortar.d.row_map())?;
        let fs = self.mortar.d.multiply(comm, true, &z)?;
        let fm = self.mortar.m.multiply(comm, true, &z)?;

        let mut local = [0.0f64; 12];
        for iface in &self.interfaces {
            for gid in iface.slave_row_nodes().iter() {
                let node = iface.slave_node(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let f: [f64; 3] = std::array::from_fn(|k| {
                    node.dofs.get(k).and_then(|d| fs.get(*d)).unwrap_or(0.0)
                });
                let mom = moment(&node.x_spatial, &f);
                for k in 0..3 {
                    local[k] += f[k];
                    local[6 + k] += mom[k];
                }
            }
            for gid in iface.master_row_nodes().iter() {
                let node = iface.master_node(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let f: [f64; 3] = std::array::from_fn(|k| {
                    -node.dofs.get(k).and_then(|d| fm.get(*d)).unwrap_or(0.0)
                });
                let mom = moment(&node.x_spatial, &f);
                for k in 0..3 {
                    local[3 + k] += f[k];
                    local[9 + k] += mom[k];
                }
            }
        }
        let g = comm.sum_all_slice(&local)?;
        let part = |o: usize| -> [f64; 3] { [g[o], g[o + 1], g[o + 2]] };
        let forces = InterfaceForces {
            slave_force: part(0),
            master_force: part(3),
            slave_moment: part(6),
            master_moment: part(9),
        };
        if matches!(self.params.em_output, EmOutput::Screen | EmOutput::Both) && comm.rank() == 0 {
            log::info!(
                "interface forces: slave {:?} master {:?}",
                forces.slave_force,
                forces.master_force
            );
            log::info!(
                "interface moments: slave {:?} master {:?}",
                forces.slave_moment,
                forces.master_moment
            );
        }
        Ok(Some(forces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::ContactParams;
    use crate::interface::{ContactNode, NodePair, NodeToNodeInterface};

    fn strategy(
        params: ContactParams,
        gap: f64,
    ) -> ContactStrategy<NoComm, NodeToNodeInterface<NoComm>> {
        let pairs = (0..2)
            .map(|k| {
                let s = ContactNode::new(k, vec![3 * k, 3 * k + 1, 3 * k + 2], [k as f64, 0.0, 0.0]);
                let m = k + 2;
                let mm = ContactNode::new(m, vec![3 * m, 3 * m + 1, 3 * m + 2], [k as f64, 0.0, gap]);
                NodePair::new(s, mm, [0.0, 0.0, 1.0], 0.5)
            })
            .collect();
        let iface = NodeToNodeInterface::new(NoComm, 0, &params, pairs, None).unwrap();
        let problem = DofMap::new(&NoComm, "problem", (0..12).collect()).unwrap();
        ContactStrategy::with_penalty(NoComm, params, problem, vec![iface]).unwrap()
    }

    #[test]
    fn penetration_activates_and_balances_forces() {
        let params = ContactParams {
            em_output: EmOutput::Screen,
            ..Default::default()
        };
        let mut s = strategy(params, 0.1);
        let mut u = DistVector::zeros(&s.maps().displacement_dofs.clone());
        u.set(2, 0.15).unwrap();
        u.set(5, 0.15).unwrap();
        let out = s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
        assert_eq!(s.maps().active.active_nodes.num_global(), 2);
        assert!(s.flags().in_contact);
        assert!(out.stiffness.is_some());
        let forces = s.last_interface_forces().copied().unwrap();
        for k in 0..3 {
            assert!((forces.slave_force[k] + forces.master_force[k]).abs() < 1e-9);
        }
        assert!(forces.slave_force[2] > 0.0);
    }

    #[test]
    fn predictor_keeps_active_set() {
        let mut s = strategy(ContactParams::default(), 0.1);
        let mut u = DistVector::zeros(&s.maps().displacement_dofs.clone());
        u.set(2, 0.15).unwrap();
        s.apply_force_stiff_contact(&u, 1, 0, true).unwrap();
        assert_eq!(s.maps().active.active_nodes.num_global(), 0);
        assert!(s.last_interface_forces().is_none());
    }

    #[test]
    fn reference_state_is_skipped_without_friction_or_seeding() {
        let mut s = strategy(ContactParams::default(), 0.1);
        s.evaluate_reference_state().unwrap();
        assert!(!s.mortar().d.is_completed());
    }

    #[test]
    fn normals_have_one_row_per_slave_node() {
        let mut s = strategy(ContactParams::default(), 0.1);
        let u = DistVector::zeros(&s.maps().displacement_dofs.clone());
        let n = s.evaluate_normals(&u).unwrap();
        assert_eq!(n.row_map().gids(), &[0, 1]);
        assert_eq!(n.get(1, 5), 1.0);
    }
}
