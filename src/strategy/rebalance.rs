//! Parallel rebalancer: balance sampling, the rebalancing policy and the two
//! redistribution paths.

use super::ContactStrategy;
use crate::algs::communicator::{CollectiveExt, Communicator, agree};
use crate::config::{ExtendGhosting, ParallelRedist, ParallelRedistParams};
use crate::contact_error::ContactError;
use crate::interface::{ContactInterface, StateKind};
use crate::linalg::{DistVector, DofMap};
use std::time::Instant;

/// Balance samples collected since the last rebalancing decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnbalanceHistory {
    /// Max/min ratio of the per-rank evaluation time.
    pub time: Vec<f64>,
    /// 1.0 if any interface showed an element unbalance, else 0.0.
    pub elements: Vec<f64>,
}

impl UnbalanceHistory {
    pub fn push(&mut self, time_ratio: f64, element_unbalance: bool) {
        self.time.push(time_ratio);
        self.elements.push(if element_unbalance { 1.0 } else { 0.0 });
    }

    pub fn clear(&mut self) {
        self.time.clear();
        self.elements.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty() && self.elements.is_empty()
    }

    /// Mean time ratio and mean element indicator; zero when empty.
    pub fn averages(&self) -> (f64, f64) {
        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        (mean(&self.time), mean(&self.elements))
    }
}

/// Max/min time ratio; idle runs count as balanced.
pub fn time_unbalance(t_max: f64, t_min: f64) -> f64 {
    if t_max == 0.0 && t_min == 1.0e12 {
        1.0
    } else {
        t_max / t_min
    }
}

/// Element unbalance of one interface from the close row elements of every
/// rank.
///
/// Three situations count: close elements exist but sit on fewer ranks
/// than available while no minimum is configured; fewer elements than the
/// configured minimum per busy rank; enough elements for one more busy rank
/// while some ranks are idle.
pub fn element_unbalance(close_per_rank: &[usize], min_ele_proc: usize) -> bool {
    let num_proc = close_per_rank.len();
    let total: usize = close_per_rank.iter().sum();
    let busy = close_per_rank.iter().filter(|&&n| n > 0).count();
    let case0 = min_ele_proc == 0 && total > num_proc && busy < num_proc;
    let case1 = min_ele_proc > 0 && total < busy * min_ele_proc && busy > 1;
    let case2 = min_ele_proc > 0 && total >= (busy + 1) * min_ele_proc && busy < num_proc;
    case0 || case1 || case2
}

/// The rebalancing policy on averaged samples.
pub fn rebalance_decision(
    params: &ParallelRedistParams,
    first_time_step: bool,
    time_avg: f64,
    ele_avg: f64,
) -> bool {
    match params.redist {
        ParallelRedist::None => false,
        ParallelRedist::Static => first_time_step,
        ParallelRedist::Dynamic => {
            first_time_step
                || time_avg >= params.max_balance_eval_time
                || ele_avg >= params.max_balance_slave_eles
        }
    }
}

/// Redundant ghosting stays valid once built; round-robin and binning
/// ghosting follow the current distribution.
pub fn is_update_of_ghosting_necessary(ghosting: ExtendGhosting, first_time_step: bool) -> bool {
    match ghosting {
        ExtendGhosting::RedundantAll | ExtendGhosting::RedundantMaster => first_time_step,
        ExtendGhosting::RoundRobin | ExtendGhosting::Binning => true,
    }
}

impl<C: Communicator, I: ContactInterface> ContactStrategy<C, I> {
    pub fn unbalance_history(&self) -> &UnbalanceHistory {
        &self.unbalance
    }

    /// Samples may be injected by drivers that measure balance themselves.
    pub fn unbalance_history_mut(&mut self) -> &mut UnbalanceHistory {
        &mut self.unbalance
    }

    /// No balance sample recorded since the last decision, restart or
    /// reference-state evaluation.
    pub fn is_first_time_step(&self) -> bool {
        self.unbalance.is_empty()
    }

    /// *Collective.* Sample the balance of the evaluation that started at
    /// `started`.
    pub fn check_parallel_distribution(&mut self, started: Instant) -> Result<(), ContactError> {
        let elapsed = started.elapsed().as_secs_f64();
        self.update_parallel_distribution_status(elapsed)
    }

    /// *Collective.* Append one time-ratio and one element-unbalance sample.
    /// Serial runs record nothing.
    pub fn update_parallel_distribution_status(&mut self, my_time: f64) -> Result<(), ContactError> {
        if self.comm.is_serial() {
            return Ok(());
        }
        let loaded: usize = self
            .interfaces
            .iter()
            .map(|i| i.collect_distribution_data().0)
            .sum();
        let (t_max_local, t_min_local) = if loaded == 0 { (0.0, 1.0e12) } else { (my_time, my_time) };
        let t_max = self.comm.max_all(t_max_local)?;
        let t_min = self.comm.min_all(t_min_local)?;
        let ratio = time_unbalance(t_max, t_min);

        let min_ele = self.params.parallel.min_ele_proc;
        let mut unbalanced = false;
        for iface in &self.interfaces {
            let close = iface.collect_distribution_data().1 as u64;
            let per_rank: Vec<usize> = self
                .comm
                .all_gather_one(close)?
                .into_iter()
                .map(|n| n as usize)
                .collect();
            unbalanced |= element_unbalance(&per_rank, min_ele);
        }
        let unbalanced = self.comm.any(unbalanced)?;
        self.unbalance.push(ratio, unbalanced);
        Ok(())
    }

    /// *Collective.* Decide whether this step redistributes. Later steps
    /// consume and clear the recorded samples.
    pub fn is_rebalancing_necessary(&mut self, first_time_step: bool) -> Result<bool, ContactError> {
        if self.comm.is_serial() {
            return Ok(false);
        }
        let (time_avg, ele_avg) = if first_time_step {
            (0.0, 0.0)
        } else {
            let avg = self.unbalance.averages();
            self.unbalance.clear();
            avg
        };
        let rebalance = rebalance_decision(&self.params.parallel, first_time_step, time_avg, ele_avg);
        if self.comm.rank() == 0 {
            if time_avg <= 0.0 {
                log::info!("Parallel balance: t=0/restart");
            } else {
                log::info!(
                    "Parallel balance (time): {time_avg:.3} (limit {:.3})",
                    self.params.parallel.max_balance_eval_time
                );
                log::info!(
                    "Parallel balance (eles): {ele_avg:.3} (limit {:.3})",
                    self.params.parallel.max_balance_slave_eles
                );
            }
        }
        Ok(rebalance)
    }

    /// *Collective.* Mean absolute velocity on the dofs of every interface;
    /// only binning ghosting uses it.
    fn compute_interface_velocities(&self, velocity: &DistVector) -> Result<Vec<f64>, ContactError> {
        let mut ivel = vec![0.0; self.interfaces.len()];
        if self.params.parallel.ghosting != ExtendGhosting::Binning {
            return Ok(ivel);
        }
        for (v, iface) in ivel.iter_mut().zip(&self.interfaces) {
            let dofs = DofMap::merge(
                &self.comm,
                "interface dofs",
                iface.slave_row_dofs(),
                iface.master_row_dofs(),
                true,
            )?;
            *v = velocity.export_to(&self.comm, &dofs)?.mean_value(&self.comm)?.abs();
        }
        Ok(ivel)
    }

    /// *Collective.* Redistribute the interfaces if the policy asks for it
    /// and rebuild the global state. Returns whether a rebalance happened.
    pub fn redistribute_contact(
        &mut self,
        displacement: &DistVector,
        velocity: &DistVector,
    ) -> Result<bool, ContactError> {
        let result = if self.params.parallel.safe_redistribute {
            self.redistribute_with_safe_ghosting(displacement, velocity)
        } else {
            if self.comm.rank() == 0 {
                log::warn!(
                    "The legacy redistribution path is deprecated; enable `safe_redistribute` instead"
                );
            }
            self.redistribute_contact_old(displacement, velocity)
        };
        agree(&self.comm, result)
    }

    fn redistribute_with_safe_ghosting(
        &mut self,
        displacement: &DistVector,
        velocity: &DistVector,
    ) -> Result<bool, ContactError> {
        self.comm.barrier()?;
        let started = Instant::now();

        let first = self.is_first_time_step();
        let rebalance = self.is_rebalancing_necessary(first)?;
        let enforce_ghosting = is_update_of_ghosting_necessary(self.params.parallel.ghosting, first);

        self.ivel = self.compute_interface_velocities(velocity)?;
        if rebalance {
            self.push_state(StateKind::NewDisplacement, displacement)?;
            self.push_state(StateKind::OldDisplacement, displacement)?;
        }
        let max_dof = self.params.max_dof;
        for (iface, v) in self.interfaces.iter_mut().zip(&self.ivel) {
            iface.update_parallel_layout_and_data_structures(rebalance, enforce_ghosting, max_dof, *v)?;
        }
        if rebalance {
            self.rebuild_global_state(true, false)?;
        }

        self.comm.barrier()?;
        if self.comm.rank() == 0 {
            log::info!(
                "Parallel redistribution / ghosting update: {:.3} s (rebalance: {rebalance})",
                started.elapsed().as_secs_f64()
            );
        }
        Ok(rebalance)
    }

    fn redistribute_contact_old(
        &mut self,
        displacement: &DistVector,
        velocity: &DistVector,
    ) -> Result<bool, ContactError> {
        let first = self.is_first_time_step();
        if !self.is_rebalancing_necessary(first)? {
            return Ok(false);
        }
        self.comm.barrier()?;
        let started = Instant::now();

        self.ivel = self.compute_interface_velocities(velocity)?;
        self.push_state(StateKind::NewDisplacement, displacement)?;
        self.push_state(StateKind::OldDisplacement, displacement)?;
        let max_dof = self.params.max_dof;
        for (iface, v) in self.interfaces.iter_mut().zip(&self.ivel) {
            iface.redistribute()?;
            iface.fill_complete(true, max_dof, *v)?;
            iface.print_parallel_distribution();
            iface.create_search_tree()?;
        }
        self.rebuild_global_state(true, false)?;

        self.comm.barrier()?;
        if self.comm.rank() == 0 {
            log::info!(
                "Parallel redistribution: {:.3} s",
                started.elapsed().as_secs_f64()
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_ranks_count_as_balanced() {
        assert_eq!(time_unbalance(0.0, 1.0e12), 1.0);
        assert_eq!(time_unbalance(3.0, 1.5), 2.0);
    }

    #[test]
    fn element_cases() {
        // all elements on one of four ranks, no minimum
        assert!(element_unbalance(&[10, 0, 0, 0], 0));
        // spread everywhere
        assert!(!element_unbalance(&[3, 3, 3, 3], 0));
        // two busy ranks, fewer than the minimum each
        assert!(element_unbalance(&[2, 2, 0, 0], 5));
        // enough for a third busy rank
        assert!(element_unbalance(&[10, 5, 0, 0], 5));
        // exactly one rank's share short of another busy rank
        assert!(!element_unbalance(&[7, 7, 0, 0], 5));
        // one busy rank below the minimum is not split further
        assert!(!element_unbalance(&[3, 0], 5));
    }

    #[test]
    fn policy_table() {
        let mut p = ParallelRedistParams {
            redist: ParallelRedist::None,
            max_balance_eval_time: 2.0,
            max_balance_slave_eles: 0.5,
            ..Default::default()
        };
        assert!(!rebalance_decision(&p, true, 10.0, 1.0));
        p.redist = ParallelRedist::Static;
        assert!(rebalance_decision(&p, true, 0.0, 0.0));
        assert!(!rebalance_decision(&p, false, 10.0, 1.0));
        p.redist = ParallelRedist::Dynamic;
        assert!(rebalance_decision(&p, true, 0.0, 0.0));
        assert!(rebalance_decision(&p, false, 2.0, 0.0));
        assert!(!rebalance_decision(&p, false, 1.999, 0.0));
        assert!(rebalance_decision(&p, false, 1.0, 0.5));
        assert!(!rebalance_decision(&p, false, 1.0, 0.49));
    }

    #[test]
    fn ghosting_refresh() {
        assert!(is_update_of_ghosting_necessary(ExtendGhosting::RedundantAll, true));
        assert!(!is_update_of_ghosting_necessary(ExtendGhosting::RedundantMaster, false));
        assert!(is_update_of_ghosting_necessary(ExtendGhosting::Binning, false));
        assert!(is_update_of_ghosting_necessary(ExtendGhosting::RoundRobin, false));
    }

    #[test]
    fn history_averages() {
        let mut h = UnbalanceHistory::default();
        assert!(h.is_empty());
        h.push(1.0, false);
        h.push(3.0, true);
        assert_eq!(h.averages(), (2.0, 0.5));
        h.clear();
        assert_eq!(h.averages(), (0.0, 0.0));
    }
}
