//! The abstract contact strategy.
//!
//! [`ContactStrategy`] owns the interfaces of one contact problem together
//! with every piece of global state built on top of them: the merged maps
//! ([`GlobalMaps`]), the mortar matrices ([`MortarState`]), the multiplier
//! vectors ([`Multipliers`]) and the parallel balance history. The algebra
//! that turns this data into stiffness and force contributions is a
//! swappable [`SolutionAlgebra`].
//!
//! Every public operation is collective: all ranks call it in the same order.
//! The operations are spread over submodules by concern:
//!
//! - [`global_maps`]: `setup` and the map merging helpers
//! - [`rebalance`]: balance sampling, the rebalancing policy and redistribution
//! - [`assembly`]: the per-iteration evaluation sequence
//! - [`active_set`]: semi-smooth active-set updates and contact flags
//! - [`history`]: nodal storage, end-of-step update, restart and Dirichlet checks
//! - [`algebra`]: the solution algebra seam and the penalty algebra

pub mod active_set;
pub mod algebra;
pub mod assembly;
pub mod global_maps;
pub mod history;
pub mod rebalance;

pub use active_set::NodeStatus;
pub use algebra::{
    AlgebraContext, ContactAction, ContactContribution, PenaltyAlgebra, SolutionAlgebra,
};
pub use assembly::InterfaceForces;
pub use global_maps::{GlobalMaps, Trafo, UnredistributedMaps};
pub use history::{ContactStresses, DmStore};
pub use rebalance::UnbalanceHistory;

use crate::algs::communicator::{Communicator, agree};
use crate::config::{ContactParams, SolvingStrategy, SystemType};
use crate::contact_error::ContactError;
use crate::interface::{ContactInterface, StateKind};
use crate::linalg::{DistSparseMatrix, DistVector, DofMap};

/// Global contact status flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactFlags {
    pub self_contact: bool,
    /// Fixed at construction from the friction law.
    pub friction: bool,
    pub in_contact: bool,
    pub was_in_contact: bool,
    pub was_in_contact_last_time_step: bool,
}

/// Mortar matrices, gap and the friction helpers of the current iteration.
#[derive(Clone, Debug)]
pub struct MortarState {
    /// Rows and columns: slave dofs.
    pub d: DistSparseMatrix,
    /// Rows: slave dofs, columns: master dofs.
    pub m: DistSparseMatrix,
    pub d_old: DistSparseMatrix,
    pub m_old: DistSparseMatrix,
    /// `D` times the inverse transformation, for transformed slave dofs.
    pub d_mod: Option<DistSparseMatrix>,
    pub d_old_mod: Option<DistSparseMatrix>,
    /// Per slave node (normal-tangential constraints) or per slave dof.
    pub gap: DistVector,
    /// Rows: slave nodes, columns: slave dofs.
    pub normals: Option<DistSparseMatrix>,
    /// Rows: tangential slave dofs, columns: slave dofs.
    pub tangents: Option<DistSparseMatrix>,
    /// Weighted relative tangential movement on the slave dofs.
    pub jump: Option<DistVector>,
}

impl MortarState {
    pub fn new(slave_dofs: &DofMap) -> Self {
        Self {
            d: DistSparseMatrix::new("D", slave_dofs),
            m: DistSparseMatrix::new("M", slave_dofs),
            d_old: DistSparseMatrix::new("D old", slave_dofs),
            m_old: DistSparseMatrix::new("M old", slave_dofs),
            d_mod: None,
            d_old_mod: None,
            gap: DistVector::zeros(slave_dofs),
            normals: None,
            tangents: None,
            jump: None,
        }
    }
}

/// Lagrange multiplier vectors, all on the slave dof map.
#[derive(Clone, Debug)]
pub struct Multipliers {
    pub z: DistVector,
    pub z_old: DistVector,
    pub z_incr: DistVector,
    pub z_uzawa: DistVector,
}

impl Multipliers {
    pub fn zeros(slave_dofs: &DofMap) -> Self {
        Self {
            z: DistVector::zeros(slave_dofs),
            z_old: DistVector::zeros(slave_dofs),
            z_incr: DistVector::zeros(slave_dofs),
            z_uzawa: DistVector::zeros(slave_dofs),
        }
    }
}

/// Dof maps handed to block preconditioners.
#[derive(Clone, Debug)]
pub struct PreconditionerMaps {
    pub master_dofs: DofMap,
    pub slave_dofs: DofMap,
    pub internal_dofs: DofMap,
    pub active_dofs: DofMap,
}

impl PreconditionerMaps {
    /// Block order expected by the contact preconditioners.
    pub fn into_blocks(self) -> [DofMap; 4] {
        [
            self.master_dofs,
            self.slave_dofs,
            self.internal_dofs,
            self.active_dofs,
        ]
    }
}

/// Global state and evaluation protocol of one contact problem.
pub struct ContactStrategy<C: Communicator, I: ContactInterface> {
    comm: C,
    params: ContactParams,
    problem_dofs: DofMap,
    interfaces: Vec<I>,
    algebra: Box<dyn SolutionAlgebra<C>>,
    maps: GlobalMaps,
    unredistributed: Option<UnredistributedMaps>,
    mortar: MortarState,
    lm: Multipliers,
    trafo: Option<Trafo>,
    flags: ContactFlags,
    unbalance: UnbalanceHistory,
    step: i32,
    iter: i32,
    /// Accumulated interface integration time of the current evaluation.
    int_time: f64,
    /// Mean interface velocities of the last redistribution.
    ivel: Vec<f64>,
    stresses: Option<ContactStresses>,
    dirichlet_toggle: Option<DistVector>,
    forces: Option<InterfaceForces>,
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    /// *Collective.* Validate the parameters and build the global maps.
    ///
    /// `problem_dofs` is the row map of the structural problem; the
    /// interfaces are kept in the given order, which fixes the multiplier
    /// numbering.
    pub fn new(
        comm: C,
        params: ContactParams,
        problem_dofs: DofMap,
        interfaces: Vec<I>,
        algebra: Box<dyn SolutionAlgebra<C>>,
    ) -> Result<Self, ContactError> {
        agree(&comm, params.validate())?;
        let empty = DofMap::empty("slave dofs");
        let friction = params.is_frictional();
        let mut strategy = Self {
            comm,
            params,
            problem_dofs,
            interfaces,
            algebra,
            maps: GlobalMaps::default(),
            unredistributed: None,
            mortar: MortarState::new(&empty),
            lm: Multipliers::zeros(&empty),
            trafo: None,
            flags: ContactFlags {
                friction,
                ..Default::default()
            },
            unbalance: UnbalanceHistory::default(),
            step: 0,
            iter: 0,
            int_time: 0.0,
            ivel: Vec::new(),
            stresses: None,
            dirichlet_toggle: None,
            forces: None,
        };
        strategy.setup(false, true)?;
        log::debug!(
            "[rank {}] contact strategy `{}` on {} interfaces",
            strategy.comm.rank(),
            strategy.algebra.name(),
            strategy.interfaces.len()
        );
        Ok(strategy)
    }

    /// *Collective.* Strategy with the [`PenaltyAlgebra`] configured from
    /// `params`.
    pub fn with_penalty(
        comm: C,
        params: ContactParams,
        problem_dofs: DofMap,
        interfaces: Vec<I>,
    ) -> Result<Self, ContactError> {
        let algebra = Box::new(PenaltyAlgebra::new(&params));
        Self::new(comm, params, problem_dofs, interfaces, algebra)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn params(&self) -> &ContactParams {
        &self.params
    }

    pub fn interfaces(&self) -> &[I] {
        &self.interfaces
    }

    /// Direct interface access; call [`setup`](Self::setup) afterwards if the
    /// maps of an interface change.
    pub fn interfaces_mut(&mut self) -> &mut [I] {
        &mut self.interfaces
    }

    pub fn maps(&self) -> &GlobalMaps {
        &self.maps
    }

    pub fn unredistributed_maps(&self) -> Option<&UnredistributedMaps> {
        self.unredistributed.as_ref()
    }

    pub fn mortar(&self) -> &MortarState {
        &self.mortar
    }

    pub fn multipliers(&self) -> &Multipliers {
        &self.lm
    }

    pub fn flags(&self) -> ContactFlags {
        self.flags
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn iteration(&self) -> i32 {
        self.iter
    }

    /// Integration time accumulated during the last interface evaluation.
    pub fn integration_time(&self) -> f64 {
        self.int_time
    }

    pub fn mean_interface_velocities(&self) -> &[f64] {
        &self.ivel
    }

    pub fn algebra(&self) -> &dyn SolutionAlgebra<C> {
        self.algebra.as_ref()
    }

    /// Slave dofs with a Dirichlet condition, set by `store_dirichlet_status`.
    pub fn dirichlet_toggle(&self) -> Option<&DistVector> {
        self.dirichlet_toggle.as_ref()
    }

    /// Interface force summary of the last evaluation, if requested.
    pub fn last_interface_forces(&self) -> Option<&InterfaceForces> {
        self.forces.as_ref()
    }

    pub fn is_self_contact(&self) -> bool {
        self.flags.self_contact
    }

    pub fn is_frictional(&self) -> bool {
        self.flags.friction
    }

    fn uses_contact_system(&self) -> bool {
        self.flags.in_contact || self.flags.was_in_contact || self.flags.was_in_contact_last_time_step
    }

    /// Multipliers are kept as unknowns of the global system.
    pub fn is_saddle_point_system(&self) -> bool {
        self.params.strategy == SolvingStrategy::LagrangeMultiplier
            && self.params.system == SystemType::SaddlePoint
            && self.uses_contact_system()
    }

    /// Multipliers are condensed out of the global system.
    pub fn is_condensed_system(&self) -> bool {
        self.params.strategy == SolvingStrategy::LagrangeMultiplier
            && self.params.system != SystemType::SaddlePoint
            && self.uses_contact_system()
    }

    /// *Collective.* Current multipliers; on the unredistributed slave map
    /// unless `redist` is set.
    pub fn lagrange_multiplier_np(&self, redist: bool) -> Result<DistVector, ContactError> {
        self.on_output_layout(&self.lm.z, redist)
    }

    /// *Collective.* Multipliers of the last converged step.
    pub fn lagrange_multiplier_n(&self, redist: bool) -> Result<DistVector, ContactError> {
        self.on_output_layout(&self.lm.z_old, redist)
    }

    fn on_output_layout(&self, v: &DistVector, redist: bool) -> Result<DistVector, ContactError> {
        match (&self.unredistributed, redist) {
            (Some(orig), false) => v.export_to(&self.comm, &orig.slave_dofs),
            _ => Ok(v.clone()),
        }
    }

    /// Master, slave, internal and active dofs, in the unredistributed
    /// layout when one was recorded.
    pub fn collect_maps_for_preconditioner(&self) -> PreconditionerMaps {
        let (master, slave) = match &self.unredistributed {
            Some(orig) => (orig.master_dofs.clone(), orig.slave_dofs.clone()),
            None => (self.maps.master_dofs.clone(), self.maps.slave_dofs.clone()),
        };
        PreconditionerMaps {
            master_dofs: master,
            slave_dofs: slave,
            internal_dofs: self.maps.internal_dofs.clone(),
            active_dofs: self.maps.active.active_dofs.clone(),
        }
    }

    /// Append the preconditioner blocks to `out`.
    pub fn fill_maps_for_preconditioner(&self, out: &mut Vec<DofMap>) {
        out.extend(self.collect_maps_for_preconditioner().into_blocks());
    }

    /// *Collective.* Push a displacement state into every interface.
    pub fn set_state(&mut self, kind: StateKind, displacement: &DistVector) -> Result<(), ContactError> {
        let result = self.push_state(kind, displacement);
        agree(&self.comm, result)
    }

    /// [`set_state`](Self::set_state) without the failure agreement, for
    /// sequences that agree once at the end.
    pub(crate) fn push_state(&mut self, kind: StateKind, displacement: &DistVector) -> Result<(), ContactError> {
        for iface in &mut self.interfaces {
            iface.set_state(kind, displacement)?;
        }
        Ok(())
    }

    /// Split borrow of the algebra and the state it works on.
    fn algebra_parts(&mut self) -> (&mut dyn SolutionAlgebra<C>, AlgebraContext<'_, C>) {
        let ctx = AlgebraContext {
            comm: &self.comm,
            params: &self.params,
            maps: &self.maps,
            mortar: &self.mortar,
            lm: &mut self.lm,
        };
        (self.algebra.as_mut(), ctx)
    }

    /// *Collective.* Let the algebra prepare a new evaluation.
    pub fn initialize(&mut self) -> Result<(), ContactError> {
        let (algebra, mut ctx) = self.algebra_parts();
        algebra.initialize(&mut ctx)
    }

    /// *Collective.* Contact contribution of the current state, dispatched
    /// on the friction flag.
    pub fn evaluate(&mut self) -> Result<ContactContribution, ContactError> {
        let contribution = if self.flags.friction {
            self.assemble_friction_terms()?;
            let (algebra, mut ctx) = self.algebra_parts();
            algebra.evaluate_friction(&mut ctx)?
        } else {
            let (algebra, mut ctx) = self.algebra_parts();
            algebra.evaluate_contact(&mut ctx)?
        };
        if self.algebra.is_penalty() {
            self.store_lm_current()?;
        }
        Ok(contribution)
    }

    /// *Collective.* Constraint right-hand side of saddle-point algebras.
    pub fn eval_constr_rhs(&mut self) -> Result<Option<DistVector>, ContactError> {
        let (algebra, mut ctx) = self.algebra_parts();
        algebra.evaluate_constraint_rhs(&mut ctx)
    }

    /// *Collective.* Run one of the solution algebra actions.
    pub fn evaluate_action(&mut self, action: ContactAction) -> Result<ContactContribution, ContactError> {
        let result = {
            let (algebra, mut ctx) = self.algebra_parts();
            algebra.evaluate_action(action, &mut ctx)
        };
        agree(&self.comm, result)
    }

    /// *Collective.* Push `dispnp` and let the algebra reset its multipliers.
    pub fn reset(&mut self, dispnp: &DistVector, xnew: &DistVector) -> Result<(), ContactError> {
        let result = self.push_state(StateKind::NewDisplacement, dispnp).and_then(|_| {
            let (algebra, mut ctx) = self.algebra_parts();
            algebra.reset_lagrange_multipliers(&mut ctx, xnew)
        });
        agree(&self.comm, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::interface::{ContactNode, NodePair, NodeToNodeInterface};

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
        let problem = DofMap::new(&NoComm, "problem", (0..15).collect()).unwrap();
        ContactStrategy::with_penalty(NoComm, params, problem, vec![iface]).unwrap()
    }

    #[test]
    fn system_type_needs_contact() {
        let params = ContactParams {
            strategy: SolvingStrategy::LagrangeMultiplier,
            system: SystemType::SaddlePoint,
            ..Default::default()
        };
        let mut s = strategy(params);
        assert!(!s.is_saddle_point_system());
        s.flags.was_in_contact = true;
        assert!(s.is_saddle_point_system());
        assert!(!s.is_condensed_system());
    }

    #[test]
    fn preconditioner_blocks_in_order() {
        let s = strategy(ContactParams::default());
        let mut blocks = Vec::new();
        s.fill_maps_for_preconditioner(&mut blocks);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].gids(), &[6, 7, 8, 9, 10, 11]);
        assert_eq!(blocks[1].gids(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(blocks[2].gids(), &[12, 13, 14]);
        assert_eq!(blocks[3].num_global(), 0);
    }

    #[test]
    fn reset_is_not_implemented_for_penalty() {
        let mut s = strategy(ContactParams::default());
        let u = DistVector::zeros(&s.maps().displacement_dofs.clone());
        let err = s.reset(&u, &u).unwrap_err();
        assert_eq!(err, ContactError::NotImplemented("reset_lagrange_multipliers"));
    }

    #[test]
    fn multipliers_follow_slave_map() {
        let s = strategy(ContactParams::default());
        let z = s.lagrange_multiplier_np(true).unwrap();
        assert_eq!(z.map().gids(), s.maps().slave_dofs.gids());
        // static redistribution records the unredistributed layout at setup
        assert!(s.unredistributed_maps().is_some());
        assert_eq!(s.lagrange_multiplier_n(false).unwrap().map().num_global(), 6);
    }
}
