//! Contact configuration: solution strategy, friction, redistribution and
//! ghosting policies.
//!
//! The parameter set is read-only once a strategy is constructed. Every enum
//! parses from the spellings used in input files.

use crate::contact_error::ContactError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

macro_rules! input_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => [$($spelling:literal),+]),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl FromStr for $name {
            type Err = ContactError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($($spelling)|+ => Ok(Self::$variant),)+
                    _ => Err(ContactError::UnknownEnumValue {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

input_enum!(
    /// Algebra applied on top of D, M, gap and the active set.
    SolvingStrategy, "solving strategy" {
        LagrangeMultiplier => ["lagrange", "lagmult", "lagrange_multiplier"],
        Penalty => ["penalty"],
        Uzawa => ["uzawa"],
        AugmentedLagrange => ["augmented", "augmented_lagrange"],
    }
);

input_enum!(
    /// Whether multipliers are condensed out or kept in a saddle-point system.
    SystemType, "system type" {
        Condensed => ["condensed", "condensed_lagmult"],
        SaddlePoint => ["saddlepoint", "saddle_point"],
    }
);

input_enum!(
    FrictionType, "friction type" {
        None => ["none"],
        Stick => ["stick"],
        Tresca => ["tresca"],
        Coulomb => ["coulomb"],
    }
);

input_enum!(
    /// Gap and constraints in Cartesian components or in the normal frame.
    ConstraintDirection, "constraint direction" {
        Xyz => ["xyz"],
        Ntt => ["ntt"],
    }
);

input_enum!(
    ShapeFcn, "Lagrange multiplier shape functions" {
        Standard => ["standard"],
        Dual => ["dual"],
        PetrovGalerkin => ["petrovgalerkin", "petrov_galerkin"],
    }
);

input_enum!(
    /// Interpolation of multipliers on quadratic slave elements.
    LagMultQuad, "Lagrange multiplier interpolation" {
        Quad => ["quad", "quadratic"],
        Lin => ["lin", "linear"],
        Pwlin => ["pwlin", "piecewise_linear"],
        Const => ["const", "constant"],
    }
);

input_enum!(
    /// Structural time integration flavour.
    IntStrategy, "integration strategy" {
        Standard => ["standard"],
        Old => ["old"],
    }
);

input_enum!(
    EmOutput, "interface force output" {
        None => ["none", "no"],
        Screen => ["screen"],
        File => ["file"],
        Both => ["both", "screen_file"],
    }
);

input_enum!(
    /// When the ownership of contact entities is recomputed.
    ParallelRedist, "parallel redistribution policy" {
        None => ["none", "no"],
        Static => ["static"],
        Dynamic => ["dynamic"],
    }
);

input_enum!(
    /// How interfaces extend their ghosted (non-owned) entities.
    ExtendGhosting, "ghosting strategy" {
        RedundantAll => ["redundant_all", "redundantall"],
        RedundantMaster => ["redundant_master", "redundantmaster"],
        RoundRobin => ["roundrobin", "round_robin"],
        Binning => ["binning"],
    }
);

/// Parallel redistribution thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelRedistParams {
    pub redist: ParallelRedist,
    pub ghosting: ExtendGhosting,
    /// Rebalance when the averaged max/min evaluation time ratio reaches this.
    pub max_balance_eval_time: f64,
    /// Rebalance when the averaged element-unbalance indicator reaches this.
    pub max_balance_slave_eles: f64,
    /// Desired minimum number of close slave elements per process.
    pub min_ele_proc: usize,
    /// Use the redistribution path that rebuilds ghosting safely.
    pub safe_redistribute: bool,
}

impl Default for ParallelRedistParams {
    fn default() -> Self {
        Self {
            redist: ParallelRedist::Static,
            ghosting: ExtendGhosting::RedundantMaster,
            max_balance_eval_time: 2.0,
            max_balance_slave_eles: 0.5,
            min_ele_proc: 0,
            safe_redistribute: true,
        }
    }
}

/// Contact parameters shared by the strategy and its interfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactParams {
    pub strategy: SolvingStrategy,
    pub system: SystemType,
    pub friction: FrictionType,
    /// Coulomb coefficient.
    pub friction_coeff: f64,
    /// Tresca bound.
    pub friction_bound: f64,
    pub constraint_directions: ConstraintDirection,
    pub shape_fcn: ShapeFcn,
    pub lm_quad: LagMultQuad,
    pub int_strategy: IntStrategy,
    pub em_output: EmOutput,
    /// Seed the first active set from the initial gap.
    pub init_contact_by_gap: bool,
    pub init_contact_gap_value: f64,
    /// Restarting a run that had no contact before.
    pub restart_with_contact: bool,
    /// Slip increments are computed at Gauss points inside the interfaces.
    pub gp_slip_incr: bool,
    pub timing_details: bool,
    pub nonsmooth_geometries: bool,
    pub semi_smooth_cn: f64,
    pub semi_smooth_ct: f64,
    pub penalty_parameter: f64,
    pub penalty_parameter_tan: f64,
    pub dim: usize,
    /// Largest dof id of the structural problem.
    pub max_dof: u64,
    pub parallel: ParallelRedistParams,
}

impl Default for ContactParams {
    fn default() -> Self {
        Self {
            strategy: SolvingStrategy::Penalty,
            system: SystemType::Condensed,
            friction: FrictionType::None,
            friction_coeff: 0.0,
            friction_bound: 0.0,
            constraint_directions: ConstraintDirection::Ntt,
            shape_fcn: ShapeFcn::Standard,
            lm_quad: LagMultQuad::Quad,
            int_strategy: IntStrategy::Standard,
            em_output: EmOutput::None,
            init_contact_by_gap: false,
            init_contact_gap_value: 0.0,
            restart_with_contact: false,
            gp_slip_incr: false,
            timing_details: false,
            nonsmooth_geometries: false,
            semi_smooth_cn: 1.0,
            semi_smooth_ct: 1.0,
            penalty_parameter: 1.0e3,
            penalty_parameter_tan: 1.0e3,
            dim: 3,
            max_dof: 0,
            parallel: ParallelRedistParams::default(),
        }
    }
}

impl ContactParams {
    pub fn is_frictional(&self) -> bool {
        self.friction != FrictionType::None
    }

    /// Penalty-type algebra: no multiplier unknowns in the global system.
    pub fn is_penalty(&self) -> bool {
        matches!(
            self.strategy,
            SolvingStrategy::Penalty | SolvingStrategy::Uzawa
        )
    }

    pub fn uses_dual_shape(&self) -> bool {
        matches!(self.shape_fcn, ShapeFcn::Dual | ShapeFcn::PetrovGalerkin)
    }

    /// Reject values that no strategy can work with.
    pub fn validate(&self) -> Result<(), ContactError> {
        if !(self.dim == 2 || self.dim == 3) {
            return Err(ContactError::InvalidParameter {
                name: "dim",
                reason: format!("problem dimension must be 2 or 3, got {}", self.dim),
            });
        }
        let non_negative = [
            ("max_balance_eval_time", self.parallel.max_balance_eval_time),
            ("max_balance_slave_eles", self.parallel.max_balance_slave_eles),
            ("semi_smooth_cn", self.semi_smooth_cn),
            ("semi_smooth_ct", self.semi_smooth_ct),
            ("penalty_parameter", self.penalty_parameter),
            ("penalty_parameter_tan", self.penalty_parameter_tan),
            ("friction_coeff", self.friction_coeff),
            ("friction_bound", self.friction_bound),
        ];
        if let Some(&(name, v)) = non_negative.iter().find(|(_, v)| !(*v >= 0.0)) {
            return Err(ContactError::InvalidParameter {
                name,
                reason: format!("must be a non-negative number, got {v}"),
            });
        }
        if !self.init_contact_gap_value.is_finite() {
            return Err(ContactError::InvalidParameter {
                name: "init_contact_gap_value",
                reason: "must be finite".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_spellings() {
        assert_eq!("dynamic".parse::<ParallelRedist>().unwrap(), ParallelRedist::Dynamic);
        assert_eq!(
            "redundant_all".parse::<ExtendGhosting>().unwrap(),
            ExtendGhosting::RedundantAll
        );
        assert_eq!("RoundRobin".parse::<ExtendGhosting>().unwrap(), ExtendGhosting::RoundRobin);
        assert_eq!("Coulomb".parse::<FrictionType>().unwrap(), FrictionType::Coulomb);
    }

    #[test]
    fn unknown_spelling_is_a_configuration_error() {
        let err = "hexagonal".parse::<ExtendGhosting>().unwrap_err();
        assert_eq!(err.class(), crate::contact_error::ErrorClass::Configuration);
        assert!(err.to_string().contains("ghosting strategy"));
    }

    #[test]
    fn validation_rejects_bad_dimension_and_thresholds() {
        let mut p = ContactParams::default();
        assert!(p.validate().is_ok());
        p.dim = 4;
        assert!(p.validate().is_err());
        p.dim = 2;
        p.parallel.max_balance_eval_time = -1.0;
        assert!(matches!(
            p.validate(),
            Err(ContactError::InvalidParameter { name: "max_balance_eval_time", .. })
        ));
    }
}
