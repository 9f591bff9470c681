mod util;

use mortar_contact::config::ExtendGhosting;
use mortar_contact::prelude::*;
use mortar_contact::strategy::rebalance::{element_unbalance, rebalance_decision};
use serial_test::serial;
use util::*;

fn dynamic() -> ContactParams {
    ContactParams {
        parallel: ParallelRedistParams {
            redist: ParallelRedist::Dynamic,
            max_balance_eval_time: 2.0,
            max_balance_slave_eles: 0.5,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Every pair on rank 0.
fn lopsided<C: Communicator>(comm: &C, params: ContactParams) -> Strategy<C> {
    let pairs = flat_pairs(2, 2, 0.1);
    let owners = vec![0; pairs.len()];
    let iface = NodeToNodeInterface::new(comm.clone(), 0, &params, pairs, Some(owners)).unwrap();
    let problem = problem_map(comm, &iface);
    ContactStrategy::with_penalty(comm.clone(), params, problem, vec![iface]).unwrap()
}

#[test]
fn serial_runs_never_rebalance() {
    let mut s = flat_strategy(&NoComm, dynamic(), 2, 2, 0.1);
    assert!(s.is_first_time_step());
    assert!(!s.is_rebalancing_necessary(true).unwrap());
    s.update_parallel_distribution_status(1.0).unwrap();
    assert!(s.unbalance_history().is_empty());
    let u = slave_lift(&s, 0.0);
    assert!(!s.redistribute_contact(&u, &u).unwrap());
}

#[test]
#[serial]
fn samples_agree_across_ranks() {
    let histories = run_ranks(2, |c| {
        let mut s = lopsided(&c, dynamic());
        let u = slave_lift(&s, 0.0);
        s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
        s.unbalance_history().clone()
    });
    assert_eq!(histories[0], histories[1]);
    assert_eq!(histories[0].elements.len(), 1);
    // only rank 0 is loaded, so its time is both the maximum and the minimum
    assert_eq!(histories[0].time[0], 1.0);
}

#[test]
#[serial]
fn dynamic_rebalance_spreads_the_pairs() {
    let owned = run_ranks(2, |c| {
        let mut s = lopsided(&c, dynamic());
        let u = slave_lift(&s, 0.0);
        // a later step with poor element balance
        s.unbalance_history_mut().push(1.0, true);
        s.unbalance_history_mut().push(1.0, true);
        assert!(!s.is_first_time_step());
        let rebalanced = s.redistribute_contact(&u, &u).unwrap();
        assert!(s.unbalance_history().is_empty());
        (rebalanced, s.maps().slave_nodes.num_local(), s.maps().lm_dofs.num_global())
    });
    for (rebalanced, _, lm) in &owned {
        assert!(*rebalanced);
        assert_eq!(*lm, 12);
    }
    assert_eq!(owned[0].1, 2);
    assert_eq!(owned[1].1, 2);
}

#[test]
#[serial]
fn balanced_samples_keep_the_layout() {
    let owned = run_ranks(2, |c| {
        let mut s = lopsided(&c, dynamic());
        let u = slave_lift(&s, 0.0);
        s.unbalance_history_mut().push(1.1, false);
        let rebalanced = s.redistribute_contact(&u, &u).unwrap();
        (rebalanced, s.maps().slave_nodes.num_local())
    });
    assert_eq!(owned, vec![(false, 4), (false, 0)]);
}

#[test]
#[serial]
fn legacy_path_rebalances_on_the_first_step() {
    let mut params = ContactParams::default();
    params.parallel.safe_redistribute = false;
    params.parallel.ghosting = ExtendGhosting::RedundantAll;
    let owned = run_ranks(2, |c| {
        let mut s = lopsided(&c, params.clone());
        let u = slave_lift(&s, 0.0);
        let rebalanced = s.redistribute_contact(&u, &u).unwrap();
        let z = s.lagrange_multiplier_np(false).unwrap();
        (rebalanced, s.maps().slave_nodes.num_local(), z.map().num_local())
    });
    assert_eq!(owned[0], (true, 2, 12));
    assert_eq!(owned[1], (true, 2, 0));
}

#[test]
fn policy_matches_the_documented_table() {
    let p = dynamic().parallel;
    assert!(rebalance_decision(&p, true, 0.0, 0.0));
    assert!(rebalance_decision(&p, false, 2.0, 0.0));
    assert!(rebalance_decision(&p, false, 1.0, 0.5));
    assert!(!rebalance_decision(&p, false, 1.9, 0.4));
    assert!(!element_unbalance(&[3, 3], 0));
    assert!(element_unbalance(&[6, 0], 0));
}
