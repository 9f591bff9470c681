//! Active/inactive/slip set state machine.
//!
//! Node flags live on the interfaces; the strategy merges the resulting
//! per-interface sets into [`ActiveSetMaps`] and tracks the global contact
//! flags.

use super::ContactStrategy;
use super::global_maps::merge_active_sets;
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::contact_error::ContactError;
use crate::interface::{ActiveSetMaps, ContactInterface};
use itertools::Itertools;

/// Status of one slave node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Inactive,
    Stick,
    Slip,
}

impl NodeStatus {
    fn label(self) -> &'static str {
        match self {
            NodeStatus::Inactive => "inactive",
            NodeStatus::Stick => "stick",
            NodeStatus::Slip => "slip",
        }
    }
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    pub fn active_set(&self) -> &ActiveSetMaps {
        &self.maps.active
    }

    pub fn is_in_contact(&self) -> bool {
        self.flags.in_contact
    }

    pub fn was_in_contact(&self) -> bool {
        self.flags.was_in_contact
    }

    pub fn was_in_contact_last_time_step(&self) -> bool {
        self.flags.was_in_contact_last_time_step
    }

    /// *Collective.* Merge the current interface sets into the global sets
    /// and raise the in-contact flags on a non-empty active set.
    ///
    /// The last-time-step flag is left alone; only setup, gap seeding, the
    /// end-of-step update and a restart move it.
    pub fn merge_global_active_set(&mut self) -> Result<(), ContactError> {
        self.maps.active = merge_active_sets(&self.comm, &self.interfaces, self.flags.friction)?;
        if self.maps.active.active_nodes.num_global() > 0 {
            self.flags.in_contact = true;
            self.flags.was_in_contact = true;
        }
        Ok(())
    }

    /// *Collective.* Rebuild the interface sets from the node flags and
    /// merge them.
    pub fn rebuild_active_set(&mut self) -> Result<(), ContactError> {
        for iface in &mut self.interfaces {
            iface.build_active_set(false, &self.params)?;
        }
        self.merge_global_active_set()
    }

    /// *Collective.* One semi-smooth Newton update of the active and slip
    /// flags, followed by a rebuild of every set.
    pub fn update_active_set_semi_smooth(&mut self) -> Result<(), ContactError> {
        let before = self.maps.active.active_nodes.num_global();
        for iface in &mut self.interfaces {
            iface.update_active_set_semi_smooth(&self.params)?;
        }
        self.rebuild_active_set()?;
        self.flags.in_contact = self.maps.active.active_nodes.num_global() > 0;
        log::debug!(
            "[rank {}] active set: {} -> {} nodes",
            self.comm.rank(),
            before,
            self.maps.active.active_nodes.num_global()
        );
        Ok(())
    }

    /// Status of a locally owned slave node.
    pub fn node_status(&self, gid: u64) -> Option<NodeStatus> {
        let node = self.interfaces.iter().find_map(|i| {
            i.slave_row_nodes()
                .contains(gid)
                .then(|| i.slave_node(gid))
                .flatten()
        })?;
        Some(match (node.active, node.slip) {
            (false, _) => NodeStatus::Inactive,
            (true, false) => NodeStatus::Stick,
            (true, true) => NodeStatus::Slip,
        })
    }

    /// *Collective.* Log gap, normal multiplier and status of every slave
    /// node on rank 0, ordered by node id.
    pub fn print_active_set(&self) -> Result<(), ContactError> {
        let mut lines = Vec::new();
        for iface in &self.interfaces {
            for gid in iface.slave_row_nodes().iter() {
                let node = iface.slave_node(gid).ok_or(ContactError::NodeNotFound(gid))?;
                let status = self.node_status(gid).unwrap_or(NodeStatus::Inactive);
                lines.push((
                    gid,
                    format!(
                        "node {gid:>8}  gap {:>12.5e}  z_n {:>12.5e}  {}",
                        node.gap,
                        node.lm_normal(),
                        status.label()
                    ),
                ));
            }
        }
        let local = lines.iter().map(|(g, l)| format!("{g}\t{l}")).join("\n");
        let all = self.comm.all_gather_bytes(local.as_bytes())?;
        if self.comm.rank() != 0 {
            return Ok(());
        }
        let mut rows: Vec<(u64, String)> = all
            .iter()
            .flat_map(|raw| {
                String::from_utf8_lossy(raw)
                    .lines()
                    .filter_map(|l| {
                        let (g, rest) = l.split_once('\t')?;
                        Some((g.parse().ok()?, rest.to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by_key(|(g, _)| *g);
        log::info!("active set of step {} iteration {}:", self.step, self.iter);
        for (_, row) in rows {
            log::info!("  {row}");
        }
        let active = self.comm.sum_all(self.maps.active.active_nodes.num_local() as u64)?;
        log::info!("  {active} active nodes");
        Ok(())
    }
}
