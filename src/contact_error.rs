//! ContactError: unified error type for mortar-contact public APIs.
//!
//! Every operation of the contact strategy is collective. A failure on one
//! rank must therefore surface on every rank, which is what
//! [`agree`](crate::algs::communicator::agree) provides on top of this type.
//! Errors are never recovered at this layer; callers are expected to abort.

use crate::linalg::Gid;
use thiserror::Error;

/// Coarse classification of a [`ContactError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unknown enum spelling or an unsupported combination of options.
    Configuration,
    /// Meshing/partitioning bug or a caller contract violation.
    DataConsistency,
    /// Continuing would produce meaningless results.
    Numerical,
    /// Extension point without a base implementation.
    NotImplemented,
    /// Message passing failed or a peer rank reported a failure.
    Communication,
}

/// Unified error type for contact strategy operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContactError {
    // ---------------------------------------------------------------- config
    /// A configuration string did not name a known enum value.
    #[error("Unknown value `{value}` for {kind}")]
    UnknownEnumValue { kind: &'static str, value: String },
    /// Two options were enabled together that cannot work together.
    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(&'static str),
    /// A numeric parameter is out of its admissible range.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    // ---------------------------------------------------------- consistency
    /// A global id appears twice where the maps must be disjoint.
    #[error("Duplicate global id {gid} while building map `{map}`")]
    DuplicateGlobalId { map: String, gid: Gid },
    /// A locally owned slave dof is not part of any interface.
    #[error("Couldn't find global slave dof id #{gid} in the interface maps on rank {rank}")]
    SlaveDofNotFound { gid: Gid, rank: usize },
    /// The interface has not been asked to number its Lagrange multipliers.
    #[error("No Lagrange multiplier dof for slave dof {gid}; update_lag_mult_sets must run first")]
    LagrangeMultiplierNotAssigned { gid: Gid },
    /// Active, inactive or slip sets of two interfaces overlap.
    #[error("Overlapping {set} sets across interfaces at global id {gid}")]
    OverlappingSets { set: &'static str, gid: Gid },
    /// A node is marked Dirichlet-affected but the dof is not in the Dirichlet map.
    #[error(
        "Inconsistency in structure Dirichlet conditions and mortar symmetry conditions at node {node}, dof {dof}"
    )]
    DirichletInconsistency { node: Gid, dof: Gid },
    /// A slave node is active and carries a Dirichlet condition.
    #[error("Slave node {0} is active AND carries Dirichlet conditions")]
    ActiveDirichletNode(Gid),
    /// A global id was looked up in a map that does not contain it.
    #[error("Global id {gid} is not part of map `{map}`")]
    GidNotInMap { map: String, gid: Gid },
    /// Two distributed objects were combined on different maps.
    #[error("Map mismatch: expected `{expected}`, got `{got}`")]
    MapMismatch { expected: String, got: String },
    /// A node id could not be resolved on the interface.
    #[error("Cannot find node with gid {0}")]
    NodeNotFound(Gid),
    /// Node dof count differs from the problem dimension.
    #[error("Inconsistency dim <-> num dof at node {node}: dim {dim}, dofs {num_dof}")]
    DimensionMismatch { node: Gid, dim: usize, num_dof: usize },
    /// Self-contact multiplier transfer lost a nonzero entry.
    #[error("Self contact: the {0} could not be transferred consistently")]
    SelfContactTransfer(&'static str),
    /// Slip history requested for a frictionless problem.
    #[error("Slip state is only available for frictional problems")]
    FrictionRequired,
    /// A matrix operation required a completed matrix.
    #[error("Matrix `{0}` has not been completed")]
    MatrixNotCompleted(String),
    /// A restart vector is missing from the restart data.
    #[error("Restart vector `{0}` not found")]
    MissingRestartVector(String),

    // ------------------------------------------------------------ numerical
    /// Gap-based seeding left the active set empty.
    #[error("No active nodes: choose a bigger value for the initial contact gap")]
    NoActiveNodes,
    /// A reduction produced a value that cannot be used.
    #[error("Numerical failure: {0}")]
    Numerical(String),

    // ------------------------------------------------------ not implemented
    /// Hook without a base implementation; use a concrete solution algebra.
    #[error("Not yet implemented: `{0}`; use a concrete solution strategy")]
    NotImplemented(&'static str),

    // -------------------------------------------------------- communication
    /// Point-to-point or collective communication failed.
    #[error("Communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// Received buffer did not have the announced size.
    #[error("Buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Another rank failed inside a collective operation.
    #[error("Collective operation failed on rank {rank}")]
    RemoteFailure { rank: usize },
}

impl ContactError {
    /// Classify this error according to the fatal-error taxonomy.
    pub fn class(&self) -> ErrorClass {
        use ContactError::*;
        match self {
            UnknownEnumValue { .. } | UnsupportedCombination(_) | InvalidParameter { .. } => {
                ErrorClass::Configuration
            }
            DuplicateGlobalId { .. }
            | SlaveDofNotFound { .. }
            | LagrangeMultiplierNotAssigned { .. }
            | OverlappingSets { .. }
            | DirichletInconsistency { .. }
            | ActiveDirichletNode(_)
            | GidNotInMap { .. }
            | MapMismatch { .. }
            | NodeNotFound(_)
            | DimensionMismatch { .. }
            | SelfContactTransfer(_)
            | FrictionRequired
            | MatrixNotCompleted(_)
            | MissingRestartVector(_) => ErrorClass::DataConsistency,
            NoActiveNodes | Numerical(_) => ErrorClass::Numerical,
            NotImplemented(_) => ErrorClass::NotImplemented,
            CommError { .. } | BufferSizeMismatch { .. } | RemoteFailure { .. } => {
                ErrorClass::Communication
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            ContactError::UnsupportedCombination("self contact + redistribution").class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            ContactError::DuplicateGlobalId {
                map: "slave dofs".into(),
                gid: 4
            }
            .class(),
            ErrorClass::DataConsistency
        );
        assert_eq!(ContactError::NoActiveNodes.class(), ErrorClass::Numerical);
        assert_eq!(
            ContactError::NotImplemented("eval_force").class(),
            ErrorClass::NotImplemented
        );
        assert_eq!(
            ContactError::RemoteFailure { rank: 1 }.class(),
            ErrorClass::Communication
        );
    }

    #[test]
    fn messages_name_the_offender() {
        let e = ContactError::SlaveDofNotFound { gid: 17, rank: 2 };
        assert!(e.to_string().contains("#17"));
        assert!(e.to_string().contains("rank 2"));
    }
}
