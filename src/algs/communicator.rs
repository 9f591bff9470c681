//! Thin façade over intra-process (threaded) or inter-process (MPI) collectives.
//!
//! Every contact operation is SPMD: all ranks call the same collectives in the
//! same order. Messages are contiguous byte slices; typed helpers in
//! [`CollectiveExt`] cast plain-old-data through `bytemuck`.
//!
//! Reductions are computed from an all-gather in rank order, so sums are
//! bitwise reproducible for a fixed process count.

use crate::contact_error::ContactError;
use bytemuck::Pod;
use bytes::Bytes;
use dashmap::DashMap;
use num_traits::Zero;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Blocking collective communication interface.
pub trait Communicator: Clone + 'static {
    /// Rank of the calling process within the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;
    /// Gather one variable-length byte buffer from every rank, in rank order.
    fn all_gather_bytes(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, ContactError>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), ContactError> {
        self.all_gather_bytes(&[]).map(|_| ())
    }

    fn is_serial(&self) -> bool {
        self.size() == 1
    }
}

/// Typed collectives derived from [`Communicator::all_gather_bytes`].
pub trait CollectiveExt: Communicator {
    /// All-gather a slice of plain-old-data values from every rank.
    fn all_gather_pod<T: Pod>(&self, local: &[T]) -> Result<Vec<Vec<T>>, ContactError> {
        let width = std::mem::size_of::<T>();
        let gathered = self.all_gather_bytes(bytemuck::cast_slice(local))?;
        gathered
            .into_iter()
            .enumerate()
            .map(|(peer, raw)| {
                if width == 0 || raw.len() % width != 0 {
                    return Err(ContactError::BufferSizeMismatch {
                        neighbor: peer,
                        expected: raw.len().next_multiple_of(width.max(1)),
                        got: raw.len(),
                    });
                }
                Ok(raw
                    .chunks_exact(width)
                    .map(bytemuck::pod_read_unaligned::<T>)
                    .collect())
            })
            .collect()
    }

    /// Gather one value per rank.
    fn all_gather_one<T: Pod>(&self, value: T) -> Result<Vec<T>, ContactError> {
        let all = self.all_gather_pod(std::slice::from_ref(&value))?;
        Ok(all.into_iter().flatten().collect())
    }

    fn max_all<T: Pod + PartialOrd>(&self, value: T) -> Result<T, ContactError> {
        let all = self.all_gather_one(value)?;
        Ok(all
            .into_iter()
            .fold(value, |acc, v| if v > acc { v } else { acc }))
    }

    fn min_all<T: Pod + PartialOrd>(&self, value: T) -> Result<T, ContactError> {
        let all = self.all_gather_one(value)?;
        Ok(all
            .into_iter()
            .fold(value, |acc, v| if v < acc { v } else { acc }))
    }

    /// Sum over ranks, accumulated in rank order.
    fn sum_all<T: Pod + Zero>(&self, value: T) -> Result<T, ContactError> {
        let all = self.all_gather_one(value)?;
        Ok(all.into_iter().fold(T::zero(), |acc, v| acc + v))
    }

    /// Element-wise sum of equally sized slices.
    fn sum_all_slice<T: Pod + Zero>(&self, local: &[T]) -> Result<Vec<T>, ContactError> {
        let all = self.all_gather_pod(local)?;
        let mut out = vec![T::zero(); local.len()];
        for (peer, chunk) in all.iter().enumerate() {
            if chunk.len() != local.len() {
                return Err(ContactError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: local.len() * std::mem::size_of::<T>(),
                    got: chunk.len() * std::mem::size_of::<T>(),
                });
            }
            for (o, v) in out.iter_mut().zip(chunk) {
                *o = *o + *v;
            }
        }
        Ok(out)
    }

    /// True if `flag` is set on any rank.
    fn any(&self, flag: bool) -> Result<bool, ContactError> {
        Ok(self.all_gather_one(flag as u8)?.into_iter().any(|f| f != 0))
    }
}

impl<C: Communicator> CollectiveExt for C {}

/// Collective failure agreement.
///
/// Every rank learns whether any rank failed. The locally failing rank keeps
/// its own error; every other rank receives [`ContactError::RemoteFailure`]
/// naming the lowest failing rank.
pub fn agree<C: Communicator, T>(
    comm: &C,
    result: Result<T, ContactError>,
) -> Result<T, ContactError> {
    let flags = comm.all_gather_one(result.is_err() as u8)?;
    match result {
        Err(e) => {
            log::error!("[rank {}] {e}", comm.rank());
            Err(e)
        }
        Ok(v) => match flags.iter().position(|&f| f != 0) {
            Some(rank) => Err(ContactError::RemoteFailure { rank }),
            None => Ok(v),
        },
    }
}

/// Single-process communicator for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn all_gather_bytes(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, ContactError> {
        Ok(vec![local.to_vec()])
    }
    fn barrier(&self) -> Result<(), ContactError> {
        Ok(())
    }
}

// --- RayonComm: intra-process / multi-thread ---

/// (group, src, dst, sequence number)
type Key = (u64, usize, usize, u64);

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);
static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// A rank that never shows up is a bug in the calling test, not a slow peer.
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// In-process communicator: one instance per simulated rank, each driven by
/// its own thread.
///
/// Clones share the sequence counter of their rank, so a strategy and the
/// interfaces it owns may each hold a clone and still match collectives.
#[derive(Clone, Debug)]
pub struct RayonComm {
    group: u64,
    rank: usize,
    size: usize,
    seq: Arc<AtomicU64>,
}

impl RayonComm {
    /// Create a fresh group of `size` ranks. Element `r` is rank `r`.
    pub fn group(size: usize) -> Vec<RayonComm> {
        let group = NEXT_GROUP.fetch_add(1, Ordering::Relaxed);
        (0..size)
            .map(|rank| RayonComm {
                group,
                rank,
                size,
                seq: Arc::new(AtomicU64::new(0)),
            })
            .collect()
    }

    fn post(&self, dst: usize, seq: u64, payload: Bytes) {
        MAILBOX
            .entry((self.group, self.rank, dst, seq))
            .or_default()
            .push_back(payload);
    }

    fn take(&self, src: usize, seq: u64) -> Result<Vec<u8>, ContactError> {
        let key = (self.group, src, self.rank, seq);
        let started = Instant::now();
        loop {
            if let Some(mut slot) = MAILBOX.get_mut(&key) {
                if let Some(bytes) = slot.pop_front() {
                    let empty = slot.is_empty();
                    drop(slot);
                    if empty {
                        MAILBOX.remove_if(&key, |_, q| q.is_empty());
                    }
                    return Ok(bytes.to_vec());
                }
            }
            if started.elapsed() > RECV_TIMEOUT {
                return Err(ContactError::CommError {
                    neighbor: src,
                    reason: format!("no message for collective #{seq} after {RECV_TIMEOUT:?}"),
                });
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for RayonComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, ContactError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let payload = Bytes::copy_from_slice(local);
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.post(peer, seq, payload.clone());
        }
        (0..self.size)
            .map(|peer| {
                if peer == self.rank {
                    Ok(local.to_vec())
                } else {
                    self.take(peer, seq)
                }
            })
            .collect()
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Communicator;
    use crate::contact_error::ContactError;
    use mpi::Count;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// World communicator. Keeps the MPI environment alive while any clone exists.
    #[derive(Clone)]
    pub struct MpiComm {
        pub world: Arc<SimpleCommunicator>,
        universe: Arc<Universe>,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, ContactError> {
            let universe = mpi::initialize().ok_or_else(|| ContactError::CommError {
                neighbor: 0,
                reason: "MPI has already been initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                universe: Arc::new(universe),
                rank,
                size,
            })
        }

        pub fn universe(&self) -> &Universe {
            &self.universe
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn all_gather_bytes(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, ContactError> {
            let n = local.len() as Count;
            let mut counts = vec![0 as Count; self.size];
            self.world.all_gather_into(&n, &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0 as Count, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut buf = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut partition);
            }
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn barrier(&self) -> Result<(), ContactError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_reductions_are_identity() {
        let c = NoComm;
        assert_eq!(c.max_all(3.5f64).unwrap(), 3.5);
        assert_eq!(c.sum_all(7u64).unwrap(), 7);
        assert!(!c.any(false).unwrap());
        assert!(c.is_serial());
    }

    #[test]
    fn rayon_all_gather_in_rank_order() {
        let comms = RayonComm::group(3);
        let out: Vec<Vec<Vec<u8>>> = std::thread::scope(|s| {
            let hs: Vec<_> = comms
                .iter()
                .map(|c| s.spawn(move || c.all_gather_bytes(&[c.rank() as u8; 2]).unwrap()))
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for per_rank in out {
            assert_eq!(per_rank, vec![vec![0, 0], vec![1, 1], vec![2, 2]]);
        }
    }

    #[test]
    fn rayon_reductions_and_agreement() {
        let comms = RayonComm::group(2);
        let res: Vec<_> = std::thread::scope(|s| {
            let hs: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let mx = c.max_all(c.rank() as f64 + 1.0).unwrap();
                        let mn = c.min_all(c.rank() as i64 - 4).unwrap();
                        let sm = c.sum_all(10usize).unwrap();
                        let local: Result<(), ContactError> = if c.rank() == 1 {
                            Err(ContactError::NoActiveNodes)
                        } else {
                            Ok(())
                        };
                        (mx, mn, sm, agree(c, local))
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(res[0].0, 2.0);
        assert_eq!(res[0].1, -4);
        assert_eq!(res[1].2, 20);
        assert_eq!(res[0].3, Err(ContactError::RemoteFailure { rank: 1 }));
        assert_eq!(res[1].3, Err(ContactError::NoActiveNodes));
    }

    #[test]
    fn clones_share_collective_sequence() {
        let comms = RayonComm::group(2);
        let sums: Vec<f64> = std::thread::scope(|s| {
            let hs: Vec<_> = comms
                .iter()
                .map(|c| {
                    let other = c.clone();
                    s.spawn(move || {
                        let a = c.sum_all(1.0f64).unwrap();
                        let b = other.sum_all(2.0f64).unwrap();
                        a + b
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(sums, vec![6.0, 6.0]);
    }
}
