#![allow(dead_code)]
use mortar_contact::prelude::*;
use std::collections::BTreeSet;

/// Internal (non-contact) nodes appended after the contact nodes.
pub const INTERNAL_NODES: u64 = 2;

pub fn dofs(node: u64) -> Vec<Gid> {
    vec![3 * node, 3 * node + 1, 3 * node + 2]
}

/// `nx × ny` slave nodes in the plane z = 0, each facing a master node at
/// z = `gap`. Slave node k has gid k, its master has gid `nx·ny + k`.
pub fn flat_pairs(nx: usize, ny: usize, gap: f64) -> Vec<NodePair> {
    let n = (nx * ny) as u64;
    let weight = 1.0 / n as f64;
    (0..n)
        .map(|k| {
            let x = [(k as usize % nx) as f64, (k as usize / nx) as f64];
            let slave = ContactNode::new(k, dofs(k), [x[0], x[1], 0.0]);
            let master = ContactNode::new(n + k, dofs(n + k), [x[0], x[1], gap]);
            NodePair::new(slave, master, [0.0, 0.0, 1.0], weight)
        })
        .collect()
}

pub fn flat_interface<C: Communicator>(
    comm: &C,
    params: &ContactParams,
    nx: usize,
    ny: usize,
    gap: f64,
) -> NodeToNodeInterface<C> {
    NodeToNodeInterface::new(comm.clone(), 0, params, flat_pairs(nx, ny, gap), None).unwrap()
}

/// Problem row map: contact dofs live with the pair owner, internal dofs on
/// rank 0.
pub fn problem_map<C: Communicator>(comm: &C, iface: &NodeToNodeInterface<C>) -> DofMap {
    let contact: BTreeSet<Gid> = iface
        .pairs()
        .iter()
        .flat_map(|p| p.slave.dofs.iter().chain(&p.master.dofs).copied())
        .collect();
    let mut local: Vec<Gid> = iface
        .slave_row_dofs()
        .iter()
        .chain(iface.master_row_dofs().iter())
        .collect();
    if comm.rank() == 0 {
        let first = contact.iter().max().map_or(0, |m| m + 1);
        local.extend(first..first + 3 * INTERNAL_NODES);
    }
    DofMap::new(comm, "problem dofs", local).unwrap()
}

pub type Strategy<C> = ContactStrategy<C, NodeToNodeInterface<C>>;

pub fn flat_strategy<C: Communicator>(
    comm: &C,
    params: ContactParams,
    nx: usize,
    ny: usize,
    gap: f64,
) -> Strategy<C> {
    let iface = flat_interface(comm, &params, nx, ny, gap);
    let problem = problem_map(comm, &iface);
    ContactStrategy::with_penalty(comm.clone(), params, problem, vec![iface]).unwrap()
}

/// Displacement that moves every slave node by `dz` along z.
pub fn slave_lift<C: Communicator>(s: &Strategy<C>, dz: f64) -> DistVector {
    let map = s.maps().displacement_dofs.clone();
    let mut u = DistVector::zeros(&map);
    for gid in s.maps().slave_dofs.iter() {
        if gid % 3 == 2 {
            u.set(gid, dz).unwrap();
        }
    }
    u
}

/// Run `f` on every rank of a fresh `size`-rank group, one thread per rank.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let comms = RayonComm::group(size);
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| scope.spawn(move || f(c)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
