//! Solution algebra: the seam between the shared contact bookkeeping and
//! the condensation or saddle-point algebra applied on top of it.
//!
//! The strategy owns maps, mortar matrices and multipliers; an algebra only
//! sees them through an [`AlgebraContext`] for the duration of one call.

use super::global_maps::GlobalMaps;
use super::{MortarState, Multipliers};
use crate::algs::communicator::Communicator;
use crate::config::{ConstraintDirection, ContactParams, SolvingStrategy};
use crate::contact_error::ContactError;
use crate::linalg::{DistSparseMatrix, DistVector, DofMap};

/// Closed set of actions an outer solver may request from the algebra.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContactAction {
    EvalForce,
    EvalForceStiff,
    RunPreEvaluate,
    RunPostEvaluate,
    Reset,
    RunPostComputeX,
    RunPreComputeX,
    RunPostIterate,
    RunPreSolve,
    CorrectParameters,
    WeightedGapGradientError,
    StaticConstraintRhs,
    RemoveCondensedContributions,
}

impl ContactAction {
    pub fn name(&self) -> &'static str {
        match self {
            ContactAction::EvalForce => "eval_force",
            ContactAction::EvalForceStiff => "eval_force_stiff",
            ContactAction::RunPreEvaluate => "run_pre_evaluate",
            ContactAction::RunPostEvaluate => "run_post_evaluate",
            ContactAction::Reset => "reset",
            ContactAction::RunPostComputeX => "run_post_compute_x",
            ContactAction::RunPreComputeX => "run_pre_compute_x",
            ContactAction::RunPostIterate => "run_post_iterate",
            ContactAction::RunPreSolve => "run_pre_solve",
            ContactAction::CorrectParameters => "correct_parameters",
            ContactAction::WeightedGapGradientError => "weighted_gap_gradient_error",
            ContactAction::StaticConstraintRhs => "static_constraint_rhs",
            ContactAction::RemoveCondensedContributions => "remove_condensed_contributions",
        }
    }
}

impl std::fmt::Display for ContactAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Linearized contact terms handed back to the structural solver.
///
/// Stiffness and force live on the combined slave and master dofs.
#[derive(Clone, Debug, Default)]
pub struct ContactContribution {
    pub stiffness: Option<DistSparseMatrix>,
    pub force: Option<DistVector>,
    /// Constraint right-hand side of saddle-point systems.
    pub constraint_rhs: Option<DistVector>,
}

impl ContactContribution {
    pub fn is_empty(&self) -> bool {
        self.stiffness.is_none() && self.force.is_none() && self.constraint_rhs.is_none()
    }
}

/// Strategy state lent to an algebra for one call.
pub struct AlgebraContext<'a, C: Communicator> {
    pub comm: &'a C,
    pub params: &'a ContactParams,
    pub maps: &'a GlobalMaps,
    pub mortar: &'a MortarState,
    pub lm: &'a mut Multipliers,
}

/// Algebra applied on top of D, M, gap and the active set.
///
/// The default `reset_lagrange_multipliers` and `evaluate_action` return
/// [`ContactError::NotImplemented`].
pub trait SolutionAlgebra<C: Communicator> {
    fn name(&self) -> &'static str;

    /// No multiplier unknowns in the global system.
    fn is_penalty(&self) -> bool;

    fn initialize(&mut self, ctx: &mut AlgebraContext<'_, C>) -> Result<(), ContactError>;

    fn evaluate_contact(
        &mut self,
        ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError>;

    fn evaluate_friction(
        &mut self,
        ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError>;

    fn evaluate_constraint_rhs(
        &mut self,
        _ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<Option<DistVector>, ContactError> {
        Ok(None)
    }

    fn post_setup(
        &mut self,
        _maps: &GlobalMaps,
        _redistributed: bool,
        _init: bool,
    ) -> Result<(), ContactError> {
        Ok(())
    }

    fn post_store_dirichlet_status(
        &mut self,
        _maps: &GlobalMaps,
        _dbc_toggle: &DistVector,
    ) -> Result<(), ContactError> {
        Ok(())
    }

    /// Called by the end-of-step update before the next step starts.
    fn reset_active_set(&mut self) {}

    /// Reduced relative-movement evaluation of predictor steps.
    fn evaluate_rel_mov_predict(
        &mut self,
        _ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<(), ContactError> {
        Ok(())
    }

    fn reset_lagrange_multipliers(
        &mut self,
        _ctx: &mut AlgebraContext<'_, C>,
        _xnew: &DistVector,
    ) -> Result<(), ContactError> {
        Err(ContactError::NotImplemented("reset_lagrange_multipliers"))
    }

    fn evaluate_action(
        &mut self,
        action: ContactAction,
        _ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError> {
        Err(ContactError::NotImplemented(action.name()))
    }
}

/// Penalty regularization of the normal (and stick) constraints.
///
/// With `B = [D, −M]` and `N` the nodal normals restricted to active nodes,
/// the normal traction is `p = −ε g` (plus `N z_uzawa` for Uzawa), the
/// multipliers `z = Nᵀ p`, the force `Bᵀ z` and the stiffness
/// `ε (N B)ᵀ (N B)`. Frictional evaluation adds `ε_t (T B)ᵀ (T B)` and the
/// matching tangential traction on stick dofs; slip dofs carry no
/// tangential penalty term.
#[derive(Clone, Debug)]
pub struct PenaltyAlgebra {
    penalty: f64,
    penalty_tan: f64,
    uzawa: bool,
}

impl PenaltyAlgebra {
    pub fn new(params: &ContactParams) -> Self {
        Self {
            penalty: params.penalty_parameter,
            penalty_tan: params.penalty_parameter_tan,
            uzawa: params.strategy == SolvingStrategy::Uzawa,
        }
    }

    fn coupling<C: Communicator>(ctx: &AlgebraContext<'_, C>) -> Result<DistSparseMatrix, ContactError> {
        let mut b = DistSparseMatrix::new("B", &ctx.maps.slave_dofs);
        ctx.mortar.d.add_into(&mut b, 1.0);
        ctx.mortar.m.add_into(&mut b, -1.0);
        b.complete(ctx.comm, &ctx.maps.slave_master_dofs)?;
        Ok(b)
    }

    /// `alpha · (A B)ᵀ (A B)` on the combined slave and master dofs.
    fn gram<C: Communicator>(
        ctx: &AlgebraContext<'_, C>,
        a: &DistSparseMatrix,
        b: &DistSparseMatrix,
        alpha: f64,
        into: &mut DistSparseMatrix,
    ) -> Result<(), ContactError> {
        let ab = DistSparseMatrix::matmul(ctx.comm, "A B", a, b)?;
        let abt = ab.transpose(ctx.comm)?;
        DistSparseMatrix::matmul(ctx.comm, "(A B)^T A B", &abt, &ab)?.add_into(into, alpha);
        Ok(())
    }

    fn normal_terms<C: Communicator>(
        &self,
        ctx: &AlgebraContext<'_, C>,
        b: &DistSparseMatrix,
        stiffness: Option<&mut DistSparseMatrix>,
    ) -> Result<DistVector, ContactError> {
        let normals = ctx
            .mortar
            .normals
            .as_ref()
            .ok_or_else(|| ContactError::MatrixNotCompleted("normals".into()))?;
        let gap = match ctx.params.constraint_directions {
            ConstraintDirection::Ntt => ctx.mortar.gap.clone(),
            ConstraintDirection::Xyz => normals.multiply(ctx.comm, false, &ctx.mortar.gap)?,
        };
        let mut p = DistVector::zeros(normals.row_map());
        p.export_from(ctx.comm, &gap)?;
        p.scale(-self.penalty);
        if self.uzawa {
            let zn = normals.multiply(ctx.comm, false, &ctx.lm.z_uzawa)?;
            p.update(1.0, &zn, 1.0)?;
        }
        let active = &ctx.maps.active.active_nodes;
        let gids: Vec<_> = p.map().gids().to_vec();
        for (gid, v) in gids.into_iter().zip(p.values_mut()) {
            if !active.contains(gid) {
                *v = 0.0;
            }
        }
        if let Some(k) = stiffness {
            let n_active = normals.restrict_rows(ctx.comm, active)?;
            Self::gram(ctx, &n_active, b, self.penalty, k)?;
        }
        normals.multiply(ctx.comm, true, &p)
    }

    fn stick_terms<C: Communicator>(
        &self,
        ctx: &AlgebraContext<'_, C>,
        b: &DistSparseMatrix,
        stiffness: Option<&mut DistSparseMatrix>,
    ) -> Result<DistVector, ContactError> {
        let tangents = ctx
            .mortar
            .tangents
            .as_ref()
            .ok_or_else(|| ContactError::MatrixNotCompleted("tangents".into()))?;
        let jump = ctx
            .mortar
            .jump
            .as_ref()
            .ok_or_else(|| ContactError::MapMismatch {
                expected: "relative movement on slave dofs".into(),
                got: "nothing".into(),
            })?;
        let stick: DofMap = DofMap::split(
            ctx.comm,
            "stick tangential dofs",
            &ctx.maps.active.active_t,
            &ctx.maps.active.slip_t,
        )?;
        let t_stick = tangents.restrict_rows(ctx.comm, &stick)?;
        let mut pt = t_stick.multiply(ctx.comm, false, jump)?;
        pt.scale(self.penalty_tan);
        if let Some(k) = stiffness {
            Self::gram(ctx, &t_stick, b, self.penalty_tan, k)?;
        }
        t_stick.multiply(ctx.comm, true, &pt)
    }

    fn contribution<C: Communicator>(
        &self,
        ctx: &mut AlgebraContext<'_, C>,
        frictional: bool,
        with_stiffness: bool,
    ) -> Result<ContactContribution, ContactError> {
        let b = Self::coupling(ctx)?;
        let mut k = with_stiffness
            .then(|| DistSparseMatrix::new("contact stiffness", &ctx.maps.slave_master_dofs));
        let mut z = self.normal_terms(ctx, &b, k.as_mut())?;
        if frictional {
            let zt = self.stick_terms(ctx, &b, k.as_mut())?;
            z.update(1.0, &zt, 1.0)?;
        }
        let force = b.multiply(ctx.comm, true, &z)?;
        if let Some(k) = k.as_mut() {
            k.complete(ctx.comm, &ctx.maps.slave_master_dofs)?;
        }
        ctx.lm.z = z;
        Ok(ContactContribution {
            stiffness: k,
            force: Some(force),
            constraint_rhs: None,
        })
    }
}

impl<C: Communicator> SolutionAlgebra<C> for PenaltyAlgebra {
    fn name(&self) -> &'static str {
        if self.uzawa { "uzawa" } else { "penalty" }
    }

    fn is_penalty(&self) -> bool {
        true
    }

    fn initialize(&mut self, ctx: &mut AlgebraContext<'_, C>) -> Result<(), ContactError> {
        ctx.lm.z = DistVector::zeros(&ctx.maps.slave_dofs);
        Ok(())
    }

    fn evaluate_contact(
        &mut self,
        ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError> {
        self.contribution(ctx, false, true)
    }

    fn evaluate_friction(
        &mut self,
        ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError> {
        self.contribution(ctx, true, true)
    }

    fn evaluate_action(
        &mut self,
        action: ContactAction,
        ctx: &mut AlgebraContext<'_, C>,
    ) -> Result<ContactContribution, ContactError> {
        let frictional = ctx.params.is_frictional();
        match action {
            ContactAction::EvalForce => self.contribution(ctx, frictional, false),
            ContactAction::EvalForceStiff => self.contribution(ctx, frictional, true),
            ContactAction::RunPreEvaluate
            | ContactAction::RunPostEvaluate
            | ContactAction::RunPreComputeX
            | ContactAction::RunPostComputeX
            | ContactAction::RunPreSolve => Ok(ContactContribution::default()),
            // augmentation step of the Uzawa loop
            ContactAction::RunPostIterate if self.uzawa => {
                ctx.lm.z_uzawa = ctx.lm.z.clone();
                Ok(ContactContribution::default())
            }
            ContactAction::RunPostIterate => Ok(ContactContribution::default()),
            other => Err(ContactError::NotImplemented(other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::interface::ActiveSetMaps;

    fn map(name: &str, gids: &[u64]) -> DofMap {
        DofMap::new(&NoComm, name, gids.to_vec()).unwrap()
    }

    /// One slave node (dofs 0..3) facing one master node (dofs 3..6),
    /// penetrating by 0.02 with weight 0.5.
    fn single_pair() -> (GlobalMaps, MortarState) {
        let slave = map("slave dofs", &[0, 1, 2]);
        let master = map("master dofs", &[3, 4, 5]);
        let nodes = map("slave nodes", &[0]);
        let maps = GlobalMaps {
            slave_nodes: nodes.clone(),
            slave_dofs: slave.clone(),
            master_dofs: master.clone(),
            slave_master_dofs: DofMap::merge(&NoComm, "sm", &slave, &master, false).unwrap(),
            active: ActiveSetMaps {
                active_nodes: nodes.clone(),
                ..ActiveSetMaps::empty()
            },
            ..Default::default()
        };
        let mut mortar = MortarState::new(&slave);
        for k in 0..3 {
            mortar.d.assemble(k, k, 0.5);
            mortar.m.assemble(k, k + 3, 0.5);
        }
        mortar.d.complete(&NoComm, &slave).unwrap();
        mortar.m.complete(&NoComm, &master).unwrap();
        mortar.gap = DistVector::from_values(&nodes, vec![-0.01]).unwrap();
        let mut n = DistSparseMatrix::new("N", &nodes);
        n.assemble(0, 2, 1.0);
        n.complete(&NoComm, &slave).unwrap();
        mortar.normals = Some(n);
        (maps, mortar)
    }

    #[test]
    fn penalty_force_and_stiffness() {
        let params = ContactParams {
            penalty_parameter: 100.0,
            ..Default::default()
        };
        let (maps, mortar) = single_pair();
        let mut lm = Multipliers::zeros(&maps.slave_dofs);
        let mut ctx = AlgebraContext {
            comm: &NoComm,
            params: &params,
            maps: &maps,
            mortar: &mortar,
            lm: &mut lm,
        };
        let mut algebra = PenaltyAlgebra::new(&params);
        let out = SolutionAlgebra::<NoComm>::evaluate_contact(&mut algebra, &mut ctx).unwrap();
        let f = out.force.unwrap();
        assert!((f.get(2).unwrap() - 0.5).abs() < 1e-12);
        assert!((f.get(5).unwrap() + 0.5).abs() < 1e-12);
        assert_eq!(f.get(0), Some(0.0));
        let k = out.stiffness.unwrap();
        assert!((k.get(2, 2) - 25.0).abs() < 1e-12);
        assert!((k.get(2, 5) + 25.0).abs() < 1e-12);
        assert!((k.get(5, 5) - 25.0).abs() < 1e-12);
        assert_eq!(k.get(0, 0), 0.0);
        assert!((lm.z.get(2).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inactive_nodes_carry_no_traction() {
        let params = ContactParams::default();
        let (mut maps, mortar) = single_pair();
        maps.active = ActiveSetMaps::empty();
        let mut lm = Multipliers::zeros(&maps.slave_dofs);
        let mut ctx = AlgebraContext {
            comm: &NoComm,
            params: &params,
            maps: &maps,
            mortar: &mortar,
            lm: &mut lm,
        };
        let mut algebra = PenaltyAlgebra::new(&params);
        let out = algebra
            .evaluate_action(ContactAction::EvalForce, &mut ctx)
            .unwrap();
        assert!(out.stiffness.is_none());
        assert!(out.force.unwrap().is_locally_zero());
        let err = algebra
            .evaluate_action(ContactAction::WeightedGapGradientError, &mut ctx)
            .unwrap_err();
        assert_eq!(err, ContactError::NotImplemented("weighted_gap_gradient_error"));
    }
}
