#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mortar-contact
//!
//! Global bookkeeping and the Newton evaluation protocol of mortar contact
//! strategies for SPMD finite-element codes.
//!
//! A [`ContactStrategy`](strategy::ContactStrategy) owns a set of contact
//! interfaces and maintains everything that spans them: merged slave,
//! master and multiplier dof maps, the active/inactive/slip sets, the mortar
//! matrices `D` and `M`, the multiplier history and the parallel balance
//! statistics that drive redistribution. The algebra that turns mortar data
//! into stiffness and force contributions sits behind the
//! [`SolutionAlgebra`](strategy::SolutionAlgebra) trait; a penalty algebra
//! ships with the crate.
//!
//! ## Features
//! - Deterministic multiplier numbering, independent of the process count
//! - Semi-smooth active-set updates with Tresca and Coulomb friction
//! - Balance-driven redistribution with configurable ghosting
//! - Restart through the [`RestartWriter`](restart::RestartWriter) and
//!   [`RestartReader`](restart::RestartReader) seams
//! - Pluggable communication backends (serial, threaded, MPI)
//!
//! ## Collectives
//!
//! Operations documented as *collective* must be called by every rank in the
//! same order. A failure on one rank is reported on all ranks: the failing
//! rank returns its own error and the others return
//! [`ContactError::RemoteFailure`](contact_error::ContactError::RemoteFailure).
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mortar-contact = "0.3"
//! # features = ["mpi-support"]
//! ```

pub mod algs;
pub mod config;
pub mod contact_error;
pub mod debug_invariants;
pub mod interface;
pub mod linalg;
pub mod restart;
pub mod strategy;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CollectiveExt, Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{
        ContactParams, ExtendGhosting, FrictionType, ParallelRedist, ParallelRedistParams,
        SolvingStrategy, SystemType,
    };
    pub use crate::contact_error::ContactError;
    pub use crate::interface::{
        ActiveSetMaps, ContactInterface, ContactNode, HistoryKind, NodePair, NodeToNodeInterface,
        StateKind,
    };
    pub use crate::linalg::{DistSparseMatrix, DistVector, DofMap, Gid};
    pub use crate::restart::{MemoryRestartStore, RestartReader, RestartWriter};
    pub use crate::strategy::{
        ContactAction, ContactContribution, ContactStrategy, DmStore, NodeStatus, PenaltyAlgebra,
        SolutionAlgebra,
    };
}
