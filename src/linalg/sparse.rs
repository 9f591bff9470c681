//! Row-distributed sparse matrix on top of `nalgebra_sparse`.
//!
//! Entries are assembled by global `(row, col)` id. Rows that the calling rank
//! does not own are buffered and shipped to their owner by
//! [`DistSparseMatrix::complete`]. After completion the local rows live in a
//! CSR matrix whose columns index a sorted list of the global column ids that
//! actually occur.

use super::dof_map::{DofMap, Gid};
use super::vector::DistVector;
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::WireTriplet;
use crate::contact_error::ContactError;
use hashbrown::HashMap;
use itertools::Itertools;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

#[derive(Clone, Debug)]
pub struct DistSparseMatrix {
    name: String,
    row_map: DofMap,
    domain_map: Option<DofMap>,
    pending: Vec<(Gid, Gid, f64)>,
    cols: Vec<Gid>,
    csr: CsrMatrix<f64>,
}

impl DistSparseMatrix {
    /// Empty, open matrix with the given row distribution.
    pub fn new(name: impl Into<String>, row_map: &DofMap) -> Self {
        Self {
            name: name.into(),
            row_map: row_map.clone(),
            domain_map: None,
            pending: Vec::new(),
            cols: Vec::new(),
            csr: CsrMatrix::zeros(row_map.num_local(), 0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_map(&self) -> &DofMap {
        &self.row_map
    }

    /// Column space fixed at completion.
    pub fn domain_map(&self) -> Result<&DofMap, ContactError> {
        self.domain_map
            .as_ref()
            .ok_or_else(|| ContactError::MatrixNotCompleted(self.name.clone()))
    }

    pub fn is_completed(&self) -> bool {
        self.domain_map.is_some() && self.pending.is_empty()
    }

    /// Accumulate `value` at `(row, col)`; duplicates are summed.
    pub fn assemble(&mut self, row: Gid, col: Gid, value: f64) {
        self.pending.push((row, col, value));
    }

    /// Set every stored value to zero, keeping rows and the column space.
    pub fn zero(&mut self) {
        self.pending.clear();
        self.csr.values_mut().iter_mut().for_each(|v| *v = 0.0);
    }

    /// Locally stored entries as `(row gid, col gid, value)`.
    pub fn triplets(&self) -> impl Iterator<Item = (Gid, Gid, f64)> + '_ {
        self.csr
            .triplet_iter()
            .map(move |(r, c, v)| (self.row_map.gids()[r], self.cols[c], *v))
    }

    pub fn num_local_nonzeros(&self) -> usize {
        self.csr.nnz()
    }

    pub fn num_global_nonzeros<C: Communicator>(&self, comm: &C) -> Result<usize, ContactError> {
        Ok(comm.sum_all(self.csr.nnz() as u64)? as usize)
    }

    /// Collective: ship off-rank entries to their owners, sum duplicates and
    /// fix the column space to `domain_map`.
    pub fn complete<C: Communicator>(
        &mut self,
        comm: &C,
        domain_map: &DofMap,
    ) -> Result<(), ContactError> {
        let (mine, foreign): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|(r, _, _)| self.row_map.contains(*r));
        let shipped: Vec<WireTriplet> = foreign
            .iter()
            .map(|&(r, c, v)| WireTriplet::new(r, c, v))
            .collect();
        let received: Vec<(Gid, Gid, f64)> = comm
            .all_gather_pod(&shipped)?
            .into_iter()
            .enumerate()
            .filter(|(peer, _)| *peer != comm.rank())
            .flat_map(|(_, ts)| ts)
            .filter(|t| self.row_map.contains(t.row()))
            .map(|t| (t.row(), t.col(), t.value()))
            .collect();

        let sent_total = comm.sum_all(shipped.len() as u64)?;
        let taken_total = comm.sum_all(received.len() as u64)?;
        if sent_total != taken_total {
            return Err(ContactError::MapMismatch {
                expected: format!("rows of `{}` in `{}`", self.name, self.row_map.name()),
                got: format!("{} entries in rows owned by no rank", sent_total - taken_total),
            });
        }

        let entries: Vec<(Gid, Gid, f64)> = self
            .triplets()
            .chain(mine)
            .chain(received)
            .collect();
        self.rebuild(entries)?;
        self.domain_map = Some(domain_map.clone());
        Ok(())
    }

    fn rebuild(&mut self, entries: Vec<(Gid, Gid, f64)>) -> Result<(), ContactError> {
        let cols: Vec<Gid> = entries.iter().map(|t| t.1).sorted_unstable().dedup().collect();
        let col_lid: HashMap<Gid, usize> = cols.iter().enumerate().map(|(i, g)| (*g, i)).collect();
        let mut coo = CooMatrix::new(self.row_map.num_local(), cols.len());
        for (r, c, v) in entries {
            let rl = self.row_map.try_lid(r)?;
            coo.push(rl, col_lid[&c], v);
        }
        self.csr = CsrMatrix::from(&coo);
        self.cols = cols;
        Ok(())
    }

    fn require_completed(&self) -> Result<&DofMap, ContactError> {
        if !self.pending.is_empty() {
            return Err(ContactError::MatrixNotCompleted(self.name.clone()));
        }
        self.domain_map()
    }

    /// Stored value at `(row, col)`; zero if absent or not owned.
    pub fn get(&self, row: Gid, col: Gid) -> f64 {
        let Some(rl) = self.row_map.lid(row) else {
            return 0.0;
        };
        let Ok(cl) = self.cols.binary_search(&col) else {
            return 0.0;
        };
        self.csr
            .get_entry(rl, cl)
            .map(|e| e.into_value())
            .unwrap_or(0.0)
    }

    /// Sum of each locally owned row.
    pub fn row_sums(&self) -> DistVector {
        let mut out = DistVector::zeros(&self.row_map);
        for (o, row) in out.values_mut().iter_mut().zip(self.csr.row_iter()) {
            *o = row.values().iter().sum();
        }
        out
    }

    /// Collective: `y = A x` (on the row map) or `y = Aᵀ x` (on the domain map).
    pub fn multiply<C: Communicator>(
        &self,
        comm: &C,
        transposed: bool,
        x: &DistVector,
    ) -> Result<DistVector, ContactError> {
        let domain = self.require_completed()?.clone();
        let xs = gather_entries(comm, x)?;
        if !transposed {
            let mut y = DistVector::zeros(&self.row_map);
            for (yv, row) in y.values_mut().iter_mut().zip(self.csr.row_iter()) {
                *yv = row
                    .col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(c, a)| a * xs.get(&self.cols[*c]).copied().unwrap_or(0.0))
                    .sum();
            }
            return Ok(y);
        }
        let mut partial: HashMap<Gid, f64> = HashMap::new();
        for (r, c, a) in self.triplets() {
            if let Some(xr) = xs.get(&r) {
                *partial.entry(c).or_default() += a * xr;
            }
        }
        let local: Vec<_> = partial
            .into_iter()
            .sorted_unstable_by_key(|(g, _)| *g)
            .map(|(g, v)| crate::algs::wire::WireEntry::new(g, v))
            .collect();
        let mut y = DistVector::zeros(&domain);
        for e in comm.all_gather_pod(&local)?.into_iter().flatten() {
            if domain.contains(e.gid()) {
                y.add(e.gid(), e.value())?;
            }
        }
        Ok(y)
    }

    /// Collective: `A B`. Rows follow `a`, the column space follows `b`.
    pub fn matmul<C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        a: &DistSparseMatrix,
        b: &DistSparseMatrix,
    ) -> Result<DistSparseMatrix, ContactError> {
        a.require_completed()?;
        let b_domain = b.require_completed()?.clone();
        let mut b_rows: HashMap<Gid, Vec<(Gid, f64)>> = HashMap::new();
        for t in b.gather_triplets(comm)? {
            b_rows.entry(t.0).or_default().push((t.1, t.2));
        }
        let mut out = DistSparseMatrix::new(name, &a.row_map);
        for (r, k, av) in a.triplets() {
            if let Some(row) = b_rows.get(&k) {
                for (c, bv) in row {
                    out.assemble(r, *c, av * bv);
                }
            }
        }
        out.complete(comm, &b_domain)?;
        Ok(out)
    }

    /// Collective: `Aᵀ`, distributed by the former domain map.
    pub fn transpose<C: Communicator>(&self, comm: &C) -> Result<DistSparseMatrix, ContactError> {
        let domain = self.require_completed()?.clone();
        let mut out = DistSparseMatrix::new(format!("{}^T", self.name), &domain);
        for (r, c, v) in self.triplets() {
            out.assemble(c, r, v);
        }
        out.complete(comm, &self.row_map)?;
        Ok(out)
    }

    /// Collective: same entries, re-expressed on a new row distribution and
    /// column space.
    pub fn row_col_transform<C: Communicator>(
        &self,
        comm: &C,
        new_rows: &DofMap,
        new_domain: &DofMap,
    ) -> Result<DistSparseMatrix, ContactError> {
        let mut out = DistSparseMatrix::new(self.name.clone(), new_rows);
        for (r, c, v) in self.triplets() {
            out.assemble(r, c, v);
        }
        out.complete(comm, new_domain)?;
        Ok(out)
    }

    /// Local: `target += alpha * self`, entry by entry.
    pub fn add_into(&self, target: &mut DistSparseMatrix, alpha: f64) {
        for (r, c, v) in self.triplets() {
            target.assemble(r, c, alpha * v);
        }
    }

    /// Collective: copy of the rows whose id is in `rows`; other rows dropped.
    pub fn restrict_rows<C: Communicator>(
        &self,
        comm: &C,
        rows: &DofMap,
    ) -> Result<DistSparseMatrix, ContactError> {
        let domain = self.require_completed()?.clone();
        let mut out = DistSparseMatrix::new(self.name.clone(), rows);
        for (r, c, v) in self.triplets().filter(|(r, _, _)| rows.contains(*r)) {
            out.assemble(r, c, v);
        }
        out.complete(comm, &domain)?;
        Ok(out)
    }

    fn gather_triplets<C: Communicator>(
        &self,
        comm: &C,
    ) -> Result<Vec<(Gid, Gid, f64)>, ContactError> {
        let local: Vec<WireTriplet> = self
            .triplets()
            .map(|(r, c, v)| WireTriplet::new(r, c, v))
            .collect();
        Ok(comm
            .all_gather_pod(&local)?
            .into_iter()
            .flatten()
            .map(|t| (t.row(), t.col(), t.value()))
            .collect())
    }
}

fn gather_entries<C: Communicator>(
    comm: &C,
    x: &DistVector,
) -> Result<HashMap<Gid, f64>, ContactError> {
    let local: Vec<_> = x
        .iter()
        .filter(|(_, v)| *v != 0.0)
        .map(|(g, v)| crate::algs::wire::WireEntry::new(g, v))
        .collect();
    Ok(comm
        .all_gather_pod(&local)?
        .into_iter()
        .flatten()
        .map(|e| (e.gid(), e.value()))
        .collect())
}
