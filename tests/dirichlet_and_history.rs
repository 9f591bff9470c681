mod util;

use mortar_contact::prelude::*;
use serial_test::serial;
use util::*;

#[test]
#[serial]
fn dirichlet_dofs_owned_elsewhere_are_found() {
    let flags = run_ranks(2, |c| {
        let mut s = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        // every constrained dof is listed by rank 0 only
        let listed = if c.rank() == 0 { vec![2, 11] } else { vec![] };
        let dbc = DofMap::new(&c, "dbc", listed).unwrap();
        s.store_dirichlet_status(&dbc).unwrap();
        s.interfaces()[0]
            .slave_row_nodes()
            .iter()
            .map(|g| (g, s.interfaces()[0].slave_node(g).unwrap().dbc))
            .collect::<Vec<_>>()
    });
    assert_eq!(flags[0], vec![(0, [false, false, true]), (1, [false, false, false])]);
    assert_eq!(flags[1], vec![(2, [false, false, false]), (3, [false, false, true])]);
}

#[test]
#[serial]
fn inconsistency_on_one_rank_fails_everywhere() {
    let results = run_ranks(2, |c| {
        let mut s = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        let all = DofMap::new(&c, "dbc", if c.rank() == 0 { vec![2, 11] } else { vec![] }).unwrap();
        s.store_dirichlet_status(&all).unwrap();
        let fewer = DofMap::new(&c, "dbc", if c.rank() == 0 { vec![2] } else { vec![] }).unwrap();
        s.store_dirichlet_status(&fewer)
    });
    assert_eq!(results[0], Err(ContactError::RemoteFailure { rank: 1 }));
    assert_eq!(
        results[1],
        Err(ContactError::DirichletInconsistency { node: 3, dof: 11 })
    );
}

#[test]
#[serial]
fn update_keeps_the_active_set_across_ranks() {
    let results = run_ranks(2, |c| {
        let mut s = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        let u = slave_lift(&s, 0.15);
        s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
        s.update(&u).unwrap();
        let old = s.lagrange_multiplier_n(false).unwrap();
        let active_old = s.interfaces()[0]
            .slave_row_nodes()
            .iter()
            .all(|g| s.interfaces()[0].slave_node(g).unwrap().active_old);
        (
            active_old,
            s.maps().active.active_nodes.num_global(),
            old.map().same_as(&s.unredistributed_maps().unwrap().slave_dofs),
            s.flags().was_in_contact_last_time_step,
        )
    });
    for r in results {
        assert_eq!(r, (true, 4, true, true));
    }
}

#[test]
fn contact_stresses_oppose_the_multipliers() {
    let mut s = flat_strategy(&NoComm, ContactParams::default(), 2, 2, 0.1);
    let u = slave_lift(&s, 0.15);
    s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
    let z = s.multipliers().z.clone();
    let stresses = s.compute_contact_stresses().unwrap().clone();
    for gid in s.maps().slave_dofs.iter() {
        let normal = stresses.normal.get(gid).unwrap();
        assert!((normal + z.get(gid).unwrap()).abs() < 1e-12);
        assert!(stresses.tangential.get(gid).unwrap().abs() < 1e-12);
    }
    assert!(s.contact_stresses().is_some());
}

#[test]
fn last_step_contact_waits_for_the_update() {
    let mut s = flat_strategy(&NoComm, ContactParams::default(), 2, 2, 0.1);
    let u = slave_lift(&s, 0.15);
    s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
    let flags = s.flags();
    assert!(flags.in_contact);
    assert!(flags.was_in_contact);
    assert!(!flags.was_in_contact_last_time_step);

    s.apply_force_stiff_contact(&u, 1, 1, false).unwrap();
    assert!(!s.flags().was_in_contact_last_time_step);

    s.update(&u).unwrap();
    assert!(s.flags().was_in_contact_last_time_step);
}

#[test]
fn update_leaves_the_current_contact_flag() {
    let mut s = flat_strategy(&NoComm, ContactParams::default(), 2, 2, 0.1);
    let u = slave_lift(&s, 0.15);
    s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
    let gids: Vec<Gid> = s.interfaces()[0].slave_row_nodes().iter().collect();
    for gid in gids {
        s.interfaces_mut()[0].slave_node_mut(gid).unwrap().active = false;
    }
    s.update(&u).unwrap();
    let flags = s.flags();
    assert_eq!(s.maps().active.active_nodes.num_global(), 0);
    assert!(flags.in_contact);
    assert!(!flags.was_in_contact);
    assert!(!flags.was_in_contact_last_time_step);
}

#[test]
#[serial]
fn bad_state_on_one_rank_fails_everywhere() {
    let results = run_ranks(2, |c| {
        let mut s = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        let mut u = slave_lift(&s, 0.0);
        if c.rank() == 1 {
            let gid = s.maps().slave_dofs.gids()[0];
            u.set(gid, f64::NAN).unwrap();
        }
        s.set_state(StateKind::NewDisplacement, &u)
    });
    assert_eq!(results[0], Err(ContactError::RemoteFailure { rank: 1 }));
    assert!(matches!(results[1], Err(ContactError::Numerical(_))));
}
