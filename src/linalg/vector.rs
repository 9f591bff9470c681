//! Distributed dense vector indexed by a [`DofMap`].

use super::dof_map::{DofMap, Gid};
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::WireEntry;
use crate::contact_error::ContactError;
use hashbrown::{HashMap, HashSet};

#[derive(Clone, Debug)]
pub struct DistVector {
    map: DofMap,
    values: Vec<f64>,
}

impl DistVector {
    pub fn zeros(map: &DofMap) -> Self {
        Self {
            map: map.clone(),
            values: vec![0.0; map.num_local()],
        }
    }

    pub fn from_values(map: &DofMap, values: Vec<f64>) -> Result<Self, ContactError> {
        if values.len() != map.num_local() {
            return Err(ContactError::MapMismatch {
                expected: format!("{} ({} local)", map.name(), map.num_local()),
                got: format!("{} values", values.len()),
            });
        }
        Ok(Self {
            map: map.clone(),
            values,
        })
    }

    pub fn map(&self) -> &DofMap {
        &self.map
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// `(gid, value)` pairs of the local part.
    pub fn iter(&self) -> impl Iterator<Item = (Gid, f64)> + '_ {
        self.map.iter().zip(self.values.iter().copied())
    }

    pub fn get(&self, gid: Gid) -> Option<f64> {
        self.map.lid(gid).map(|l| self.values[l])
    }

    pub fn set(&mut self, gid: Gid, value: f64) -> Result<(), ContactError> {
        let l = self.map.try_lid(gid)?;
        self.values[l] = value;
        Ok(())
    }

    pub fn add(&mut self, gid: Gid, value: f64) -> Result<(), ContactError> {
        let l = self.map.try_lid(gid)?;
        self.values[l] += value;
        Ok(())
    }

    pub fn put_scalar(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    /// `self = alpha * x + beta * self`.
    pub fn update(&mut self, alpha: f64, x: &DistVector, beta: f64) -> Result<(), ContactError> {
        self.check_same_map(x)?;
        for (s, xv) in self.values.iter_mut().zip(&x.values) {
            *s = alpha * xv + beta * *s;
        }
        Ok(())
    }

    pub fn dot<C: Communicator>(&self, comm: &C, other: &DistVector) -> Result<f64, ContactError> {
        self.check_same_map(other)?;
        let local: f64 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        comm.sum_all(local)
    }

    pub fn norm2<C: Communicator>(&self, comm: &C) -> Result<f64, ContactError> {
        Ok(self.dot(comm, self)?.sqrt())
    }

    /// Arithmetic mean over all global entries; zero for an empty map.
    pub fn mean_value<C: Communicator>(&self, comm: &C) -> Result<f64, ContactError> {
        let sum = comm.sum_all(self.values.iter().sum::<f64>())?;
        let n = self.map.num_global();
        Ok(if n == 0 { 0.0 } else { sum / n as f64 })
    }

    /// True if every local entry is exactly zero.
    pub fn is_locally_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Collective: re-express on `target`, keeping values at matching ids
    /// and zero-filling the rest. Entries without a home on `target` are
    /// dropped.
    pub fn export_to<C: Communicator>(
        &self,
        comm: &C,
        target: &DofMap,
    ) -> Result<DistVector, ContactError> {
        let mut out = DistVector::zeros(target);
        out.export_from(comm, self)?;
        Ok(out)
    }

    /// Collective: overwrite `self` with the values of `source` at matching
    /// ids; ids absent from `source` become zero.
    pub fn export_from<C: Communicator>(
        &mut self,
        comm: &C,
        source: &DistVector,
    ) -> Result<(), ContactError> {
        let incoming = source.gather_nonzeros(comm)?;
        for (g, v) in self.map.iter().zip(self.values.iter_mut()) {
            *v = incoming.get(&g).copied().unwrap_or(0.0);
        }
        Ok(())
    }

    /// Collective: like [`export_to`](Self::export_to), also reporting how
    /// many nonzero source entries found no home on `target` on any rank.
    pub fn export_to_counting_lost<C: Communicator>(
        &self,
        comm: &C,
        target: &DofMap,
    ) -> Result<(DistVector, usize), ContactError> {
        let out = self.export_to(comm, target)?;
        let homes: HashSet<Gid> = target.gather_all(comm)?.into_iter().collect();
        let lost = self
            .iter()
            .filter(|(g, v)| *v != 0.0 && !homes.contains(g))
            .count();
        Ok((out, comm.sum_all(lost as u64)? as usize))
    }

    fn gather_nonzeros<C: Communicator>(&self, comm: &C) -> Result<HashMap<Gid, f64>, ContactError> {
        let local: Vec<WireEntry> = self
            .iter()
            .filter(|(_, v)| *v != 0.0)
            .map(|(g, v)| WireEntry::new(g, v))
            .collect();
        Ok(comm
            .all_gather_pod(&local)?
            .into_iter()
            .flatten()
            .map(|e| (e.gid(), e.value()))
            .collect())
    }

    fn check_same_map(&self, other: &DistVector) -> Result<(), ContactError> {
        if self.map.gids() != other.map.gids() {
            return Err(ContactError::MapMismatch {
                expected: self.map.name().to_string(),
                got: other.map.name().to_string(),
            });
        }
        Ok(())
    }
}
