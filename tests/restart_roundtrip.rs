mod util;

use mortar_contact::config::IntStrategy;
use mortar_contact::prelude::*;
use mortar_contact::restart::RestartSnapshot;
use util::*;

fn converged_step<C: Communicator>(comm: &C, params: ContactParams) -> (Strategy<C>, DistVector) {
    let mut s = flat_strategy(comm, params, 2, 2, 0.1);
    let u = slave_lift(&s, 0.15);
    s.apply_force_stiff_contact(&u, 1, 0, false).unwrap();
    s.update(&u).unwrap();
    (s, u)
}

#[test]
fn snapshot_survives_serialization() {
    let (s, _) = converged_step(&NoComm, ContactParams::default());
    let mut store = MemoryRestartStore::new();
    s.do_write_restart(&mut store, false).unwrap();
    let snap = store.snapshot();
    assert_eq!(snap.vectors["activetoggle"].len(), 4);
    assert!(!snap.vectors.contains_key("sliptoggle"));

    let json = serde_json::to_string(&snap).unwrap();
    let back: RestartSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snap);
    let bin = bincode::serialize(&snap).unwrap();
    let back: RestartSnapshot = bincode::deserialize(&bin).unwrap();
    assert_eq!(back, snap);
}

#[test]
fn multipliers_are_restored_for_old_integration() {
    let params = ContactParams {
        int_strategy: IntStrategy::Old,
        ..Default::default()
    };
    let (s, u) = converged_step(&NoComm, params.clone());
    let mut store = MemoryRestartStore::new();
    s.do_write_restart(&mut store, false).unwrap();

    let mut fresh = flat_strategy(&NoComm, params, 2, 2, 0.1);
    let reader = MemoryRestartStore::from_snapshot(store.snapshot());
    fresh.do_read_restart(&reader, &u).unwrap();
    assert_eq!(fresh.multipliers().z_old.values(), s.multipliers().z_old.values());
    assert_eq!(fresh.multipliers().z.values(), s.multipliers().z_old.values());
    assert!(fresh.multipliers().z_incr.is_locally_zero());
    assert_eq!(fresh.maps().active.active_nodes.num_global(), 4);
    assert!(fresh.is_first_time_step());
}

#[test]
fn uzawa_multipliers_come_from_the_old_multipliers() {
    let params = ContactParams {
        strategy: SolvingStrategy::Uzawa,
        int_strategy: IntStrategy::Old,
        ..Default::default()
    };
    let (s, u) = converged_step(&NoComm, params.clone());
    let mut store = MemoryRestartStore::new();
    s.do_write_restart(&mut store, false).unwrap();
    let keys: Vec<_> = store.snapshot().vectors.keys().cloned().collect();
    assert_eq!(keys, vec!["activetoggle", "lagrmultold"]);

    let mut fresh = flat_strategy(&NoComm, params, 2, 2, 0.1);
    fresh.do_read_restart(&store, &u).unwrap();
    assert!(!s.multipliers().z_old.is_locally_zero());
    assert_eq!(fresh.multipliers().z_uzawa.values(), s.multipliers().z_old.values());
    assert!(fresh.flags().was_in_contact_last_time_step);
}

#[test]
fn restart_with_contact_starts_from_a_clean_active_set() {
    let (s, u) = converged_step(&NoComm, ContactParams::default());
    let mut store = MemoryRestartStore::new();
    s.do_write_restart(&mut store, false).unwrap();

    let params = ContactParams {
        restart_with_contact: true,
        ..Default::default()
    };
    let mut fresh = flat_strategy(&NoComm, params, 2, 2, 0.1);
    fresh.do_read_restart(&store, &u).unwrap();
    assert_eq!(fresh.maps().active.active_nodes.num_global(), 0);
    assert!(fresh.multipliers().z.is_locally_zero());
}

#[test]
fn restart_moves_between_rank_counts() {
    let (s, u) = converged_step(&NoComm, ContactParams::default());
    let store = MemoryRestartStore::new();
    s.do_write_restart(&mut store.clone(), false).unwrap();
    let serial_disp: Vec<(Gid, f64)> = u.iter().collect();

    let active = run_ranks(2, |c| {
        let mut fresh = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        let mut u = DistVector::zeros(&fresh.maps().displacement_dofs.clone());
        for (gid, v) in &serial_disp {
            if u.map().contains(*gid) {
                u.set(*gid, *v).unwrap();
            }
        }
        fresh.do_read_restart(&store, &u).unwrap();
        fresh.maps().active.active_nodes.num_local()
    });
    assert_eq!(active, vec![2, 2]);
}

#[test]
fn missing_toggles_fail_on_every_rank() {
    let results = run_ranks(2, |c| {
        let mut fresh = flat_strategy(&c, ContactParams::default(), 2, 2, 0.1);
        let u = slave_lift(&fresh, 0.0);
        fresh.do_read_restart(&MemoryRestartStore::new(), &u)
    });
    for r in results {
        assert!(matches!(r, Err(ContactError::MissingRestartVector(_))));
    }
}

#[test]
fn parameters_round_trip() {
    let params = ContactParams {
        friction: FrictionType::Coulomb,
        friction_coeff: 0.3,
        ..Default::default()
    };
    let json = serde_json::to_string(&params).unwrap();
    let back: ContactParams = serde_json::from_str(&json).unwrap();
    assert_eq!(back, params);
    let back: ContactParams = bincode::deserialize(&bincode::serialize(&params).unwrap()).unwrap();
    assert_eq!(back, params);
}
