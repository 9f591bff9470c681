//! Distributed map of globally unique ids (dofs or nodes).
//!
//! A `DofMap` stores the ids owned by the calling rank in insertion order,
//! a hash lookup from global to local index, and the cached global count.
//! Constructors that can detect ownership conflicts are collective.

use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::contact_error::ContactError;
use crate::debug_invariants::DebugInvariants;
use hashbrown::{HashMap, HashSet};

/// Global id of a dof or a node.
pub type Gid = u64;

#[derive(Clone, Debug, Default)]
pub struct DofMap {
    name: String,
    gids: Vec<Gid>,
    lids: HashMap<Gid, usize>,
    num_global: usize,
}

impl DofMap {
    /// Map with no entries on any rank. Not collective.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Collective: build a row map from the locally owned ids.
    ///
    /// Fails with [`ContactError::DuplicateGlobalId`] if an id appears twice,
    /// locally or on two ranks.
    pub fn new<C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        gids: Vec<Gid>,
    ) -> Result<Self, ContactError> {
        let name = name.into();
        let all = comm.all_gather_pod(&gids)?;
        let mut seen = HashSet::with_capacity(all.iter().map(Vec::len).sum());
        for gid in all.iter().flatten() {
            if !seen.insert(*gid) {
                return Err(ContactError::DuplicateGlobalId {
                    map: name,
                    gid: *gid,
                });
            }
        }
        Ok(Self::from_parts(name, gids, seen.len()))
    }

    /// Collective: build a map whose ids may be shared by several ranks.
    /// The global count is the sum of the local counts.
    pub fn new_overlapping<C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        gids: Vec<Gid>,
    ) -> Result<Self, ContactError> {
        let name = name.into();
        let mut seen = HashSet::with_capacity(gids.len());
        if let Some(dup) = gids.iter().find(|g| !seen.insert(**g)) {
            return Err(ContactError::DuplicateGlobalId { map: name, gid: *dup });
        }
        let num_global = comm.sum_all(gids.len() as u64)? as usize;
        Ok(Self::from_parts(name, gids, num_global))
    }

    fn from_parts(name: String, gids: Vec<Gid>, num_global: usize) -> Self {
        let lids = gids.iter().enumerate().map(|(l, g)| (*g, l)).collect();
        let map = Self {
            name,
            gids,
            lids,
            num_global,
        };
        crate::debug_invariants!(map.validate_invariants(), "DofMap::from_parts");
        map
    }

    /// Collective: union of two maps, `a`'s ids first.
    ///
    /// With `allow_overlap == false` a shared id is a
    /// [`ContactError::DuplicateGlobalId`]. With overlap allowed, ids present
    /// locally in both maps are kept once.
    pub fn merge<C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        a: &DofMap,
        b: &DofMap,
        allow_overlap: bool,
    ) -> Result<Self, ContactError> {
        Self::merge_many(comm, name, [a, b], allow_overlap)
    }

    /// Collective: union of any number of maps, in iteration order.
    pub fn merge_many<'a, C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        maps: impl IntoIterator<Item = &'a DofMap>,
        allow_overlap: bool,
    ) -> Result<Self, ContactError> {
        let name = name.into();
        let mut gids = Vec::new();
        let mut seen = HashSet::new();
        let mut local_dup = None;
        for map in maps {
            for &g in &map.gids {
                if seen.insert(g) {
                    gids.push(g);
                } else if local_dup.is_none() {
                    local_dup = Some(g);
                }
            }
        }
        if allow_overlap {
            return Self::new_overlapping(comm, name, gids);
        }
        let local = match local_dup {
            Some(g) => [1, g],
            None => [0, 0],
        };
        let dups = comm.all_gather_pod(&local)?;
        if let Some(d) = dups.iter().find(|d| d[0] == 1) {
            return Err(ContactError::DuplicateGlobalId { map: name, gid: d[1] });
        }
        Self::new(comm, name, gids)
    }

    /// Collective: ids of `full` that are not contained in `remove` on any rank.
    pub fn split<C: Communicator>(
        comm: &C,
        name: impl Into<String>,
        full: &DofMap,
        remove: &DofMap,
    ) -> Result<Self, ContactError> {
        let removed: HashSet<Gid> = remove.gather_all(comm)?.into_iter().collect();
        let gids = full
            .gids
            .iter()
            .copied()
            .filter(|g| !removed.contains(g))
            .collect();
        Self::new_overlapping(comm, name, gids)
    }

    /// Collective: fully redundant copy holding every id on every rank,
    /// ordered by owning rank.
    pub fn allreduce<C: Communicator>(&self, comm: &C) -> Result<Self, ContactError> {
        let all = self.gather_all(comm)?;
        Self::new_overlapping(comm, format!("{} (allreduced)", self.name), all)
    }

    /// Collective: every id of the map, concatenated in rank order.
    pub fn gather_all<C: Communicator>(&self, comm: &C) -> Result<Vec<Gid>, ContactError> {
        Ok(comm.all_gather_pod(&self.gids)?.into_iter().flatten().collect())
    }

    /// Same map under another name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    pub fn iter(&self) -> impl Iterator<Item = Gid> + '_ {
        self.gids.iter().copied()
    }

    #[inline]
    pub fn lid(&self, gid: Gid) -> Option<usize> {
        self.lids.get(&gid).copied()
    }

    #[inline]
    pub fn gid(&self, lid: usize) -> Option<Gid> {
        self.gids.get(lid).copied()
    }

    #[inline]
    pub fn contains(&self, gid: Gid) -> bool {
        self.lids.contains_key(&gid)
    }

    pub fn num_local(&self) -> usize {
        self.gids.len()
    }

    pub fn num_global(&self) -> usize {
        self.num_global
    }

    /// Local ids equal and global size equal.
    pub fn same_as(&self, other: &DofMap) -> bool {
        self.num_global == other.num_global && self.gids == other.gids
    }

    /// Local lookup that names the map in the error.
    pub fn try_lid(&self, gid: Gid) -> Result<usize, ContactError> {
        self.lid(gid).ok_or_else(|| ContactError::GidNotInMap {
            map: self.name.clone(),
            gid,
        })
    }
}

impl DebugInvariants for DofMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DofMap");
    }

    fn validate_invariants(&self) -> Result<(), ContactError> {
        if self.lids.len() != self.gids.len() {
            let mut seen = HashSet::new();
            let dup = self.gids.iter().find(|g| !seen.insert(**g)).copied();
            return Err(ContactError::DuplicateGlobalId {
                map: self.name.clone(),
                gid: dup.unwrap_or_default(),
            });
        }
        for (l, g) in self.gids.iter().enumerate() {
            if self.lids.get(g) != Some(&l) {
                return Err(ContactError::GidNotInMap {
                    map: self.name.clone(),
                    gid: *g,
                });
            }
        }
        if self.num_global < self.gids.len() {
            return Err(ContactError::Numerical(format!(
                "map `{}` has {} local but {} global ids",
                self.name,
                self.gids.len(),
                self.num_global
            )));
        }
        Ok(())
    }
}
