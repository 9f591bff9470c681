mod util;

use mortar_contact::prelude::*;
use std::collections::BTreeMap;
use util::*;

/// (slave dof -> multiplier dof) over all ranks.
fn lm_assignment(size: usize) -> BTreeMap<Gid, Gid> {
    run_ranks(size, |c| {
        let s = flat_strategy(&c, ContactParams::default(), 3, 2, 0.1);
        let maps = s.maps();
        assert_eq!(maps.slave_dofs.num_local(), maps.lm_dofs.num_local());
        maps.slave_dofs
            .iter()
            .zip(maps.lm_dofs.iter())
            .collect::<Vec<_>>()
    })
    .into_iter()
    .flatten()
    .collect()
}

#[test]
fn multiplier_numbering_ignores_rank_count() {
    let serial = lm_assignment(1);
    assert_eq!(serial.len(), 18);
    assert_eq!(lm_assignment(2), serial);
    assert_eq!(lm_assignment(3), serial);
}

#[test]
fn multipliers_start_past_the_problem_dofs() {
    let serial = lm_assignment(1);
    // 12 contact nodes and 2 internal nodes
    let first = 3 * (12 + INTERNAL_NODES);
    let lms: Vec<Gid> = serial.values().copied().collect();
    assert_eq!(lms, (first..first + 18).collect::<Vec<_>>());
}

#[test]
fn max_dof_moves_the_offset() {
    let params = ContactParams {
        max_dof: 1000,
        ..Default::default()
    };
    let s = flat_strategy(&NoComm, params, 1, 1, 0.1);
    assert_eq!(s.maps().lm_dofs.gids(), &[1001, 1002, 1003]);
}

#[test]
fn multipliers_follow_interface_order() {
    let params = ContactParams::default();
    let lower = flat_interface(&NoComm, &params, 1, 1, 0.1);
    let pairs = (10..12)
        .map(|k| {
            let slave = ContactNode::new(k, dofs(k), [0.0, 0.0, 1.0]);
            let master = ContactNode::new(k + 10, dofs(k + 10), [0.0, 0.0, 1.1]);
            NodePair::new(slave, master, [0.0, 0.0, 1.0], 0.5)
        })
        .collect();
    let upper = NodeToNodeInterface::new(NoComm, 1, &params, pairs, None).unwrap();
    let problem = DofMap::new(&NoComm, "problem", (0..66).collect()).unwrap();
    let s = ContactStrategy::with_penalty(NoComm, params, problem, vec![upper, lower]).unwrap();
    let first: Vec<Gid> = s.maps().lm_dofs.iter().take(3).collect();
    // the first interface handed over numbers first
    assert_eq!(first, vec![66, 67, 68]);
    assert_eq!(s.maps().lm_dofs.num_global(), 9);
}
