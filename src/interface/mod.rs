//! Contract between the strategy and one contact surface pair.
//!
//! An interface owns a slave/master partition of one contact surface pair,
//! runs the geometric search and mortar integration, and exposes its
//! distributed node/dof maps together with assembly operations for D, M,
//! the weighted gap and the active set. Operations marked *collective* must
//! be called on every rank in the same order.

pub mod node;
pub mod node_to_node;

pub use node::ContactNode;
pub use node_to_node::{NodePair, NodeToNodeInterface};

use crate::config::ContactParams;
use crate::contact_error::ContactError;
use crate::linalg::{DistSparseMatrix, DistVector, DofMap, Gid};
use hashbrown::HashSet;
use std::str::FromStr;

/// Whether slave and master are fixed a priori.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterfaceRole {
    Fixed,
    /// Slave and master are decided by the search at every evaluation.
    SelfContact,
}

/// Displacement state pushed into the interfaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StateKind {
    NewDisplacement,
    OldDisplacement,
}

impl FromStr for StateKind {
    type Err = ContactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "displacement" | "new_displacement" => Ok(StateKind::NewDisplacement),
            "olddisplacement" | "old_displacement" => Ok(StateKind::OldDisplacement),
            other => Err(ContactError::UnknownEnumValue {
                kind: "state type",
                value: other.to_string(),
            }),
        }
    }
}

/// Which history is moved to its "old" slot by `store_to_old`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    /// Nodal D/M entries.
    Dm,
    /// Nodal normals.
    NormalOld,
    /// Penalty tractions.
    PenaltyTraction,
}

/// Active, inactive and slip node/dof sets of one interface or of the
/// whole problem.
#[derive(Clone, Debug, Default)]
pub struct ActiveSetMaps {
    pub active_nodes: DofMap,
    pub active_dofs: DofMap,
    pub inactive_nodes: DofMap,
    pub inactive_dofs: DofMap,
    /// First dof of each active node, carrying the normal constraint.
    pub active_n: DofMap,
    /// Remaining dofs of each active node, carrying tangential constraints.
    pub active_t: DofMap,
    pub slip_nodes: DofMap,
    pub slip_dofs: DofMap,
    pub slip_t: DofMap,
}

impl ActiveSetMaps {
    pub fn empty() -> Self {
        Self {
            active_nodes: DofMap::empty("active nodes"),
            active_dofs: DofMap::empty("active dofs"),
            inactive_nodes: DofMap::empty("inactive nodes"),
            inactive_dofs: DofMap::empty("inactive dofs"),
            active_n: DofMap::empty("active normal dofs"),
            active_t: DofMap::empty("active tangential dofs"),
            slip_nodes: DofMap::empty("slip nodes"),
            slip_dofs: DofMap::empty("slip dofs"),
            slip_t: DofMap::empty("slip tangential dofs"),
        }
    }
}

/// Slave dofs classified by the kind of geometric entity they sit on.
#[derive(Clone, Debug, Default)]
pub struct NonsmoothMaps {
    pub vertex_dofs: DofMap,
    pub edge_dofs: DofMap,
    pub surface_dofs: DofMap,
}

/// One contact surface pair as seen by the strategy.
pub trait ContactInterface {
    fn id(&self) -> usize;
    fn role(&self) -> InterfaceRole;

    fn is_self_contact(&self) -> bool {
        self.role() == InterfaceRole::SelfContact
    }

    /// Quadratic slave elements that need the dual-quadratic transformation.
    fn has_quadratic_slave(&self) -> bool {
        false
    }

    // ------------------------------------------------------------- maps
    fn slave_row_nodes(&self) -> &DofMap;
    fn slave_col_nodes(&self) -> &DofMap;
    fn master_row_nodes(&self) -> &DofMap;
    fn master_col_nodes(&self) -> &DofMap;
    fn slave_row_dofs(&self) -> &DofMap;
    fn master_row_dofs(&self) -> &DofMap;
    /// `None` until multiplier dofs have been assigned.
    fn lag_mult_dofs(&self) -> Option<&DofMap>;
    fn active_set(&self) -> &ActiveSetMaps;

    fn nonsmooth_maps(&self) -> Option<&NonsmoothMaps> {
        None
    }

    // ------------------------------------------------------------ nodes
    fn slave_node(&self, gid: Gid) -> Option<&ContactNode>;
    fn slave_node_mut(&mut self, gid: Gid) -> Option<&mut ContactNode>;
    fn master_node(&self, gid: Gid) -> Option<&ContactNode>;

    // ------------------------------------------------------- evaluation
    /// *Collective.* Push a displacement state into the nodes.
    fn set_state(&mut self, kind: StateKind, displacement: &DistVector) -> Result<(), ContactError>;
    /// Reset per-iteration nodal quantities.
    fn initialize(&mut self) -> Result<(), ContactError>;
    /// *Collective.* Search and mortar integration.
    fn evaluate(&mut self, ghosting_step: usize, step: i32, iter: i32) -> Result<(), ContactError>;

    /// *Collective.* Ghosting pre-pass of the round-robin strategy.
    fn round_robin_detect_ghosting(&mut self) -> Result<(), ContactError> {
        Ok(())
    }

    /// Wall time spent in the last integration, in seconds.
    fn integration_time(&self) -> f64;
    fn evaluate_nodal_normals(&mut self) -> Result<(), ContactError>;

    fn assemble_dm(
        &self,
        d: &mut DistSparseMatrix,
        m: &mut DistSparseMatrix,
    ) -> Result<(), ContactError>;
    fn assemble_g(&self, gap: &mut DistVector) -> Result<(), ContactError>;
    /// Rows: slave nodes, columns: slave dofs.
    fn assemble_normals(&self, n: &mut DistSparseMatrix) -> Result<(), ContactError>;
    /// Rows: tangential slave dofs, columns: slave dofs.
    fn assemble_tangents(&self, t: &mut DistSparseMatrix) -> Result<(), ContactError>;
    fn assemble_slave_coord(&self, xs: &mut DistVector) -> Result<(), ContactError>;
    /// Weighted tangential relative movement on the slave dofs.
    fn assemble_jump(&self, jump: &mut DistVector) -> Result<(), ContactError>;
    fn assemble_trafo(
        &self,
        trafo: &mut DistSparseMatrix,
        invtrafo: &mut DistSparseMatrix,
        done_before: &mut HashSet<Gid>,
    ) -> Result<(), ContactError>;

    // ------------------------------------------------------- active set
    /// *Collective.* Rebuild the active/inactive/slip maps from node flags;
    /// with `init`, seed them from the initial configuration.
    fn build_active_set(&mut self, init: bool, params: &ContactParams) -> Result<(), ContactError>;
    /// Semi-smooth Newton update of the node flags.
    fn update_active_set_semi_smooth(&mut self, params: &ContactParams) -> Result<(), ContactError>;
    /// Accumulate the nodal relative movement.
    fn evaluate_rel_mov(
        &mut self,
        xs: &DistVector,
        dmod: &DistSparseMatrix,
        doldmod: &DistSparseMatrix,
    ) -> Result<(), ContactError>;
    fn store_to_old(&mut self, kind: HistoryKind) -> Result<(), ContactError>;

    // -------------------------------------------------------- multipliers
    /// *Collective.* Assign multiplier dofs starting at `offset`. With a
    /// reference map (self-contact), every reference dof receives a
    /// multiplier dof and that map is returned; otherwise the slave-dof
    /// aligned multiplier map is returned.
    fn update_lag_mult_sets(
        &mut self,
        offset: u64,
        redistributed: bool,
        ref_map: Option<&DofMap>,
    ) -> Result<DofMap, ContactError>;
    /// *Collective.* Re-assign multiplier dofs after the self-contact search
    /// changed the slave set.
    fn update_self_contact_lag_mult_set(
        &mut self,
        sc_lm_dofs: &DofMap,
        sc_ref_dofs: &DofMap,
    ) -> Result<DofMap, ContactError>;

    // ------------------------------------------------------ parallelism
    fn store_unredistributed_maps(&mut self);
    /// `(loaded elements, close row elements)` of the last evaluation.
    fn collect_distribution_data(&self) -> (usize, usize);
    /// *Collective.*
    fn update_parallel_layout_and_data_structures(
        &mut self,
        rebalance: bool,
        enforce_ghosting: bool,
        max_dof: u64,
        mean_velocity: f64,
    ) -> Result<(), ContactError>;
    /// *Collective.*
    fn redistribute(&mut self) -> Result<(), ContactError>;
    /// *Collective.*
    fn fill_complete(
        &mut self,
        is_final: bool,
        max_dof: u64,
        mean_velocity: f64,
    ) -> Result<(), ContactError>;
    fn create_search_tree(&mut self) -> Result<(), ContactError>;
    fn print_parallel_distribution(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_displacement_states_parse() {
        assert_eq!("displacement".parse::<StateKind>().unwrap(), StateKind::NewDisplacement);
        assert_eq!(
            "olddisplacement".parse::<StateKind>().unwrap(),
            StateKind::OldDisplacement
        );
        assert!("velocity".parse::<StateKind>().is_err());
    }
}
