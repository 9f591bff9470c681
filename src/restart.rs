//! Restart reader/writer seams and an in-memory store.
//!
//! Vectors are stored by global id, so every rank of a run may write its
//! locally owned entries into one shared store and later read them back on
//! a different distribution.

use crate::contact_error::ContactError;
use crate::linalg::{DistVector, Gid};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sink for named restart vectors and scalars.
pub trait RestartWriter {
    fn write_vector(&mut self, key: &str, v: &DistVector) -> Result<(), ContactError>;
    fn write_scalar(&mut self, key: &str, value: f64) -> Result<(), ContactError>;
}

/// Source of named restart vectors and scalars.
pub trait RestartReader {
    /// Fill the locally owned entries of `target`; ids without a stored
    /// value read as zero.
    fn read_vector(&self, key: &str, target: &mut DistVector) -> Result<(), ContactError>;
    fn read_scalar(&self, key: &str) -> Result<f64, ContactError>;
    fn has_vector(&self, key: &str) -> bool;
}

/// Serializable content of a [`MemoryRestartStore`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartSnapshot {
    pub vectors: BTreeMap<String, BTreeMap<Gid, f64>>,
    pub scalars: BTreeMap<String, f64>,
}

/// Restart store shared by the ranks of one process.
///
/// Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryRestartStore {
    inner: Arc<RwLock<RestartSnapshot>>,
}

impl MemoryRestartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RestartSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> RestartSnapshot {
        self.inner.read().clone()
    }

    /// Drop every stored vector and scalar.
    pub fn clear(&self) {
        *self.inner.write() = RestartSnapshot::default();
    }
}

impl RestartWriter for MemoryRestartStore {
    fn write_vector(&mut self, key: &str, v: &DistVector) -> Result<(), ContactError> {
        let mut guard = self.inner.write();
        let entry = guard.vectors.entry(key.to_string()).or_default();
        entry.extend(v.iter());
        Ok(())
    }

    fn write_scalar(&mut self, key: &str, value: f64) -> Result<(), ContactError> {
        self.inner.write().scalars.insert(key.to_string(), value);
        Ok(())
    }
}

impl RestartReader for MemoryRestartStore {
    fn read_vector(&self, key: &str, target: &mut DistVector) -> Result<(), ContactError> {
        let guard = self.inner.read();
        let stored = guard
            .vectors
            .get(key)
            .ok_or_else(|| ContactError::MissingRestartVector(key.to_string()))?;
        let gids: Vec<Gid> = target.map().gids().to_vec();
        for (gid, v) in gids.into_iter().zip(target.values_mut()) {
            *v = stored.get(&gid).copied().unwrap_or(0.0);
        }
        Ok(())
    }

    fn read_scalar(&self, key: &str) -> Result<f64, ContactError> {
        self.inner
            .read()
            .scalars
            .get(key)
            .copied()
            .ok_or_else(|| ContactError::MissingRestartVector(key.to_string()))
    }

    fn has_vector(&self, key: &str) -> bool {
        self.inner.read().vectors.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::linalg::DofMap;

    #[test]
    fn vectors_are_read_back_by_gid() {
        let map = DofMap::new(&NoComm, "nodes", vec![3, 7, 9]).unwrap();
        let v = DistVector::from_values(&map, vec![1.0, 0.0, 2.5]).unwrap();
        let mut store = MemoryRestartStore::new();
        store.write_vector("activetoggle", &v).unwrap();

        let other = DofMap::new(&NoComm, "nodes", vec![9, 3, 11]).unwrap();
        let mut back = DistVector::zeros(&other);
        store.read_vector("activetoggle", &mut back).unwrap();
        assert_eq!(back.values(), &[2.5, 1.0, 0.0]);
        assert!(matches!(
            store.read_vector("sliptoggle", &mut back),
            Err(ContactError::MissingRestartVector(_))
        ));
    }
}
