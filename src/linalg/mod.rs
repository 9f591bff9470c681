//! Distributed linear algebra used by the contact strategy: id maps,
//! vectors and sparse matrices with collective export semantics.

pub mod dof_map;
pub mod sparse;
pub mod vector;

pub use dof_map::{DofMap, Gid};
pub use sparse::DistSparseMatrix;
pub use vector::DistVector;
