//! Conforming node-to-node contact interface.
//!
//! Every slave node faces exactly one master node. Mortar integration then
//! degenerates to lumped weights: `D = diag(w)`, `M(s, m) = w` and the
//! weighted gap `w · n · (x_m − x_s)`. Pair data is replicated on every rank;
//! each pair is row-owned by exactly one rank, and only the owner evaluates
//! it. Redistribution ships nodal history to all replicas and recomputes a
//! balanced block ownership.

use super::node::{ContactNode, dot, norm};
use super::{ActiveSetMaps, ContactInterface, HistoryKind, InterfaceRole, StateKind};
use crate::algs::communicator::{CollectiveExt, Communicator, agree};
use crate::algs::wire::WireNodeState;
use crate::config::{ConstraintDirection, ContactParams, FrictionType};
use crate::contact_error::ContactError;
use crate::linalg::{DistSparseMatrix, DistVector, DofMap, Gid};
use hashbrown::{HashMap, HashSet};
use nalgebra::Vector3;
use std::time::Instant;

/// One slave node and the master node it faces.
#[derive(Clone, Debug)]
pub struct NodePair {
    pub slave: ContactNode,
    pub master: ContactNode,
    /// Unit normal pointing from the slave towards the master surface.
    pub normal: [f64; 3],
    /// Nodal area weight.
    pub weight: f64,
    /// Start active regardless of the gap.
    pub init_active: bool,
}

impl NodePair {
    pub fn new(slave: ContactNode, master: ContactNode, normal: [f64; 3], weight: f64) -> Self {
        Self {
            slave,
            master,
            normal,
            weight,
            init_active: false,
        }
    }

    /// Unweighted normal distance in the current configuration.
    pub fn geometric_gap(&self) -> f64 {
        let d: [f64; 3] =
            std::array::from_fn(|k| self.master.x_spatial[k] - self.slave.x_spatial[k]);
        dot(&self.normal, &d)
    }
}

#[derive(Clone, Debug, Default)]
struct Layout {
    slave_row_nodes: DofMap,
    slave_col_nodes: DofMap,
    master_row_nodes: DofMap,
    master_col_nodes: DofMap,
    slave_row_dofs: DofMap,
    master_row_dofs: DofMap,
    /// Every slave and master dof, on every rank.
    col_dofs: DofMap,
}

/// Reference interface for conforming meshes.
#[derive(Clone, Debug)]
pub struct NodeToNodeInterface<C: Communicator> {
    comm: C,
    id: usize,
    role: InterfaceRole,
    dim: usize,
    directions: ConstraintDirection,
    friction: FrictionType,
    pairs: Vec<NodePair>,
    owner: Vec<usize>,
    slave_index: HashMap<Gid, usize>,
    master_index: HashMap<Gid, usize>,
    layout: Layout,
    lm_dofs: Option<DofMap>,
    active: ActiveSetMaps,
    unredistributed: Option<(DofMap, DofMap)>,
    search_radius: f64,
    mean_velocity: f64,
    int_time: f64,
    num_loaded: usize,
    num_close: usize,
}

fn block_owner(i: usize, n: usize, size: usize) -> usize {
    if n == 0 { 0 } else { i * size / n }
}

impl<C: Communicator> NodeToNodeInterface<C> {
    /// *Collective.* Pairs must be identical on every rank. Without explicit
    /// `owner`s the pairs are split into contiguous, balanced blocks.
    pub fn new(
        comm: C,
        id: usize,
        params: &ContactParams,
        pairs: Vec<NodePair>,
        owner: Option<Vec<usize>>,
    ) -> Result<Self, ContactError> {
        let n = pairs.len();
        let owner = owner.unwrap_or_else(|| (0..n).map(|i| block_owner(i, n, comm.size())).collect());
        if owner.len() != n || owner.iter().any(|&o| o >= comm.size()) {
            return Err(ContactError::InvalidParameter {
                name: "owner",
                reason: format!("need {n} owners below {}", comm.size()),
            });
        }
        for p in &pairs {
            for node in [&p.slave, &p.master] {
                if node.num_dof() != params.dim {
                    return Err(ContactError::DimensionMismatch {
                        node: node.gid,
                        dim: params.dim,
                        num_dof: node.num_dof(),
                    });
                }
            }
        }
        let mut iface = Self {
            comm,
            id,
            role: InterfaceRole::Fixed,
            dim: params.dim,
            directions: params.constraint_directions,
            friction: params.friction,
            pairs,
            owner,
            slave_index: HashMap::new(),
            master_index: HashMap::new(),
            layout: Layout::default(),
            lm_dofs: None,
            active: ActiveSetMaps::empty(),
            unredistributed: None,
            search_radius: f64::INFINITY,
            mean_velocity: 0.0,
            int_time: 0.0,
            num_loaded: 0,
            num_close: 0,
        };
        iface.rebuild_index();
        iface.build_layout()?;
        Ok(iface)
    }

    pub fn with_role(mut self, role: InterfaceRole) -> Self {
        self.role = role;
        self
    }

    /// Pairs farther apart than `radius` do not count as close elements.
    pub fn with_search_radius(mut self, radius: f64) -> Self {
        self.search_radius = radius;
        self
    }

    pub fn owners(&self) -> &[usize] {
        &self.owner
    }

    pub fn pairs(&self) -> &[NodePair] {
        &self.pairs
    }

    pub fn mean_velocity(&self) -> f64 {
        self.mean_velocity
    }

    pub fn unredistributed_maps(&self) -> Option<&(DofMap, DofMap)> {
        self.unredistributed.as_ref()
    }

    fn owned(&self) -> impl Iterator<Item = usize> + '_ {
        let me = self.comm.rank();
        (0..self.pairs.len()).filter(move |&i| self.owner[i] == me)
    }

    fn rebuild_index(&mut self) {
        self.slave_index = self
            .pairs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.slave.gid, i))
            .collect();
        self.master_index = self
            .pairs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.master.gid, i))
            .collect();
    }

    fn build_layout(&mut self) -> Result<(), ContactError> {
        let c = &self.comm;
        let id = self.id;
        let owned: Vec<&NodePair> = self.owned().map(|i| &self.pairs[i]).collect();
        let all: Vec<&NodePair> = self.pairs.iter().collect();
        let row = |what: &str, ids: Vec<Gid>| DofMap::new(c, format!("interface {id} {what}"), ids);
        // redundant ghosting: every rank sees every node
        let col = |what: &str, ids: Vec<Gid>| {
            DofMap::new_overlapping(c, format!("interface {id} {what}"), ids)
        };
        let layout = Layout {
            slave_row_nodes: row("slave row nodes", owned.iter().map(|p| p.slave.gid).collect())?,
            master_row_nodes: row("master row nodes", owned.iter().map(|p| p.master.gid).collect())?,
            slave_row_dofs: row(
                "slave row dofs",
                owned.iter().flat_map(|p| p.slave.dofs.iter().copied()).collect(),
            )?,
            master_row_dofs: row(
                "master row dofs",
                owned.iter().flat_map(|p| p.master.dofs.iter().copied()).collect(),
            )?,
            slave_col_nodes: col("slave col nodes", all.iter().map(|p| p.slave.gid).collect())?,
            master_col_nodes: col("master col nodes", all.iter().map(|p| p.master.gid).collect())?,
            col_dofs: col(
                "col dofs",
                all.iter()
                    .flat_map(|p| p.slave.dofs.iter().chain(&p.master.dofs).copied())
                    .collect(),
            )?,
        };
        let lm_dofs = match &self.lm_dofs {
            Some(lm) => {
                let gids = owned.iter().flat_map(|p| p.slave.lm_dofs.iter().copied()).collect();
                Some(DofMap::new(c, lm.name().to_string(), gids)?)
            }
            None => None,
        };
        self.layout = layout;
        self.lm_dofs = lm_dofs;
        Ok(())
    }

    /// Sorted global list of the reference dofs and the position lookup.
    fn positions(sorted: &[Gid], gid: Gid) -> Option<u64> {
        sorted.binary_search(&gid).ok().map(|p| p as u64)
    }

    fn tangents(n: &[f64; 3], dim: usize) -> ([f64; 3], [f64; 3]) {
        if dim == 2 {
            return ([-n[1], n[0], 0.0], [0.0; 3]);
        }
        let n = Vector3::from(*n);
        let axis = if n.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let t = n.cross(&axis).normalize();
        let e = n.cross(&t);
        (t.into(), e.into())
    }

    /// Ship slave-node history from the owners to every replica.
    fn sync_history(&mut self) -> Result<(), ContactError> {
        let local: Vec<WireNodeState> = self
            .owned()
            .map(|i| self.pairs[i].slave.to_wire())
            .collect();
        for w in self.comm.all_gather_pod(&local)?.into_iter().flatten() {
            let gid = u64::from_le(w.gid_le);
            if let Some(&i) = self.slave_index.get(&gid) {
                self.pairs[i].slave.apply_wire(&w);
            }
        }
        Ok(())
    }
}

impl<C: Communicator> ContactInterface for NodeToNodeInterface<C> {
    fn id(&self) -> usize {
        self.id
    }

    fn role(&self) -> InterfaceRole {
        self.role
    }

    fn slave_row_nodes(&self) -> &DofMap {
        &self.layout.slave_row_nodes
    }
    fn slave_col_nodes(&self) -> &DofMap {
        &self.layout.slave_col_nodes
    }
    fn master_row_nodes(&self) -> &DofMap {
        &self.layout.master_row_nodes
    }
    fn master_col_nodes(&self) -> &DofMap {
        &self.layout.master_col_nodes
    }
    fn slave_row_dofs(&self) -> &DofMap {
        &self.layout.slave_row_dofs
    }
    fn master_row_dofs(&self) -> &DofMap {
        &self.layout.master_row_dofs
    }
    fn lag_mult_dofs(&self) -> Option<&DofMap> {
        self.lm_dofs.as_ref()
    }
    fn active_set(&self) -> &ActiveSetMaps {
        &self.active
    }

    fn slave_node(&self, gid: Gid) -> Option<&ContactNode> {
        self.slave_index.get(&gid).map(|&i| &self.pairs[i].slave)
    }
    fn slave_node_mut(&mut self, gid: Gid) -> Option<&mut ContactNode> {
        let i = *self.slave_index.get(&gid)?;
        Some(&mut self.pairs[i].slave)
    }
    fn master_node(&self, gid: Gid) -> Option<&ContactNode> {
        self.master_index.get(&gid).map(|&i| &self.pairs[i].master)
    }

    fn set_state(&mut self, kind: StateKind, displacement: &DistVector) -> Result<(), ContactError> {
        let u = displacement.export_to(&self.comm, &self.layout.col_dofs)?;
        if let Some((gid, v)) = displacement.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ContactError::Numerical(format!("displacement {v} at dof {gid}")));
        }
        for p in &mut self.pairs {
            for node in [&mut p.slave, &mut p.master] {
                let x: [f64; 3] = std::array::from_fn(|k| {
                    node.x_ref[k] + node.dofs.get(k).and_then(|g| u.get(*g)).unwrap_or(0.0)
                });
                match kind {
                    StateKind::NewDisplacement => node.x_spatial = x,
                    StateKind::OldDisplacement => node.x_old = x,
                }
            }
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ContactError> {
        let owned: Vec<usize> = self.owned().collect();
        for i in owned {
            let s = &mut self.pairs[i].slave;
            s.gap = 0.0;
            s.d = 0.0;
            s.m = 0.0;
        }
        self.num_loaded = 0;
        self.num_close = 0;
        Ok(())
    }

    fn evaluate(&mut self, _ghosting_step: usize, _step: i32, _iter: i32) -> Result<(), ContactError> {
        let started = Instant::now();
        self.evaluate_nodal_normals()?;
        let owned: Vec<usize> = self.owned().collect();
        for &i in &owned {
            let gap = self.pairs[i].geometric_gap();
            let w = self.pairs[i].weight;
            let s = &mut self.pairs[i].slave;
            s.d = w;
            s.m = w;
            s.gap = w * gap;
            if gap <= self.search_radius {
                self.num_close += 1;
            }
        }
        self.num_loaded = owned.len();
        self.int_time = started.elapsed().as_secs_f64();
        Ok(())
    }

    fn integration_time(&self) -> f64 {
        self.int_time
    }

    fn evaluate_nodal_normals(&mut self) -> Result<(), ContactError> {
        let dim = self.dim;
        for p in &mut self.pairs {
            let (t, e) = Self::tangents(&p.normal, dim);
            p.slave.normal = p.normal;
            p.slave.txi = t;
            p.slave.teta = e;
        }
        Ok(())
    }

    fn assemble_dm(
        &self,
        d: &mut DistSparseMatrix,
        m: &mut DistSparseMatrix,
    ) -> Result<(), ContactError> {
        for i in self.owned() {
            let p = &self.pairs[i];
            for (sd, md) in p.slave.dofs.iter().zip(&p.master.dofs) {
                d.assemble(*sd, *sd, p.slave.d);
                m.assemble(*sd, *md, p.slave.m);
            }
        }
        Ok(())
    }

    fn assemble_g(&self, gap: &mut DistVector) -> Result<(), ContactError> {
        for i in self.owned() {
            let s = &self.pairs[i].slave;
            match self.directions {
                ConstraintDirection::Ntt => gap.add(s.gid, s.gap)?,
                ConstraintDirection::Xyz => {
                    for (k, dof) in s.dofs.iter().enumerate() {
                        gap.add(*dof, s.gap * s.normal[k])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn assemble_normals(&self, n: &mut DistSparseMatrix) -> Result<(), ContactError> {
        for i in self.owned() {
            let s = &self.pairs[i].slave;
            for (k, dof) in s.dofs.iter().enumerate() {
                n.assemble(s.gid, *dof, s.normal[k]);
            }
        }
        Ok(())
    }

    fn assemble_tangents(&self, t: &mut DistSparseMatrix) -> Result<(), ContactError> {
        for i in self.owned() {
            let s = &self.pairs[i].slave;
            for (row, dir) in s.dofs.iter().skip(1).zip([&s.txi, &s.teta]) {
                for (k, dof) in s.dofs.iter().enumerate() {
                    t.assemble(*row, *dof, dir[k]);
                }
            }
        }
        Ok(())
    }

    fn assemble_slave_coord(&self, xs: &mut DistVector) -> Result<(), ContactError> {
        for i in self.owned() {
            let s = &self.pairs[i].slave;
            for (k, dof) in s.dofs.iter().enumerate() {
                xs.set(*dof, s.x_spatial[k])?;
            }
        }
        Ok(())
    }

    fn assemble_jump(&self, jump: &mut DistVector) -> Result<(), ContactError> {
        for i in self.owned() {
            let s = &self.pairs[i].slave;
            for (k, dof) in s.dofs.iter().enumerate() {
                jump.set(*dof, s.d * s.jump[k])?;
            }
        }
        Ok(())
    }

    fn assemble_trafo(
        &self,
        trafo: &mut DistSparseMatrix,
        invtrafo: &mut DistSparseMatrix,
        done_before: &mut HashSet<Gid>,
    ) -> Result<(), ContactError> {
        // linear slave elements: the transformation is the identity
        for i in self.owned() {
            for dof in &self.pairs[i].slave.dofs {
                if done_before.insert(*dof) {
                    trafo.assemble(*dof, *dof, 1.0);
                    invtrafo.assemble(*dof, *dof, 1.0);
                }
            }
        }
        Ok(())
    }

    fn build_active_set(&mut self, init: bool, params: &ContactParams) -> Result<(), ContactError> {
        let owned: Vec<usize> = self.owned().collect();
        if init {
            for &i in &owned {
                let by_gap = params.init_contact_by_gap
                    && self.pairs[i].geometric_gap() < params.init_contact_gap_value;
                let active = self.pairs[i].init_active || by_gap;
                let s = &mut self.pairs[i].slave;
                s.active = active;
                if !active {
                    s.slip = false;
                }
            }
        }
        let mut act_nodes = Vec::new();
        let mut act_dofs = Vec::new();
        let mut inact_nodes = Vec::new();
        let mut inact_dofs = Vec::new();
        let mut act_n = Vec::new();
        let mut act_t = Vec::new();
        let mut slip_nodes = Vec::new();
        let mut slip_dofs = Vec::new();
        let mut slip_t = Vec::new();
        for &i in &owned {
            let s = &self.pairs[i].slave;
            if s.active {
                act_nodes.push(s.gid);
                act_dofs.extend(&s.dofs);
                act_n.extend(s.dofs.first());
                act_t.extend(s.dofs.iter().skip(1));
                if s.slip {
                    slip_nodes.push(s.gid);
                    slip_dofs.extend(&s.dofs);
                    slip_t.extend(s.dofs.iter().skip(1));
                }
            } else {
                inact_nodes.push(s.gid);
                inact_dofs.extend(&s.dofs);
            }
        }
        let c = &self.comm;
        self.active = ActiveSetMaps {
            active_nodes: DofMap::new(c, "active nodes", act_nodes)?,
            active_dofs: DofMap::new(c, "active dofs", act_dofs)?,
            inactive_nodes: DofMap::new(c, "inactive nodes", inact_nodes)?,
            inactive_dofs: DofMap::new(c, "inactive dofs", inact_dofs)?,
            active_n: DofMap::new(c, "active normal dofs", act_n)?,
            active_t: DofMap::new(c, "active tangential dofs", act_t)?,
            slip_nodes: DofMap::new(c, "slip nodes", slip_nodes)?,
            slip_dofs: DofMap::new(c, "slip dofs", slip_dofs)?,
            slip_t: DofMap::new(c, "slip tangential dofs", slip_t)?,
        };
        Ok(())
    }

    fn update_active_set_semi_smooth(&mut self, params: &ContactParams) -> Result<(), ContactError> {
        let cn = params.semi_smooth_cn;
        let ct = params.semi_smooth_ct;
        let owned: Vec<usize> = self.owned().collect();
        for i in owned {
            let s = &mut self.pairs[i].slave;
            let nz = s.lm_normal() - cn * s.gap;
            s.active = nz > 0.0;
            if !s.active {
                s.slip = false;
                continue;
            }
            let bound = match self.friction {
                FrictionType::None | FrictionType::Stick => {
                    s.slip = false;
                    continue;
                }
                FrictionType::Tresca => params.friction_bound,
                FrictionType::Coulomb => params.friction_coeff * nz,
            };
            let zt = s.lm_tangential();
            let trial: [f64; 3] = std::array::from_fn(|k| zt[k] + ct * s.d * s.jump[k]);
            s.slip = norm(&trial) - bound > 0.0;
        }
        Ok(())
    }

    fn evaluate_rel_mov(
        &mut self,
        xs: &DistVector,
        dmod: &DistSparseMatrix,
        doldmod: &DistSparseMatrix,
    ) -> Result<(), ContactError> {
        let owned: Vec<usize> = self.owned().collect();
        for i in owned {
            let p = &mut self.pairs[i];
            let Some(&first) = p.slave.dofs.first() else {
                continue;
            };
            let d = dmod.get(first, first);
            let d_old = doldmod.get(first, first);
            if d == 0.0 || d_old == 0.0 {
                p.slave.jump = [0.0; 3];
                continue;
            }
            let mut jump = [0.0; 3];
            for (k, dof) in p.slave.dofs.iter().enumerate() {
                let x = xs.get(*dof).ok_or_else(|| ContactError::GidNotInMap {
                    map: xs.map().name().to_string(),
                    gid: *dof,
                })?;
                let slave = d * x - d_old * p.slave.x_old[k];
                let master = p.slave.m * p.master.x_spatial[k] - p.slave.m_old * p.master.x_old[k];
                jump[k] = (slave - master) / d;
            }
            let jn = dot(&jump, &p.slave.normal);
            p.slave.jump = std::array::from_fn(|k| jump[k] - jn * p.slave.normal[k]);
        }
        Ok(())
    }

    fn store_to_old(&mut self, kind: HistoryKind) -> Result<(), ContactError> {
        for p in &mut self.pairs {
            let s = &mut p.slave;
            match kind {
                HistoryKind::Dm => {
                    s.d_old = s.d;
                    s.m_old = s.m;
                }
                HistoryKind::NormalOld => s.normal_old = s.normal,
                HistoryKind::PenaltyTraction => s.traction_old = s.lm,
            }
        }
        Ok(())
    }

    fn update_lag_mult_sets(
        &mut self,
        offset: u64,
        redistributed: bool,
        ref_map: Option<&DofMap>,
    ) -> Result<DofMap, ContactError> {
        let name = format!("interface {} lm dofs", self.id);
        let owned: Vec<usize> = self.owned().collect();
        if let Some(reference) = ref_map {
            let mut sorted = reference.gather_all(&self.comm)?;
            sorted.sort_unstable();
            for p in &mut self.pairs {
                p.slave.lm_dofs = p
                    .slave
                    .dofs
                    .iter()
                    .filter_map(|g| Self::positions(&sorted, *g).map(|pos| offset + pos))
                    .collect();
            }
            let ref_lm: Vec<Gid> = reference
                .iter()
                .filter_map(|g| Self::positions(&sorted, g).map(|pos| offset + pos))
                .collect();
            let slave_lm: Vec<Gid> = owned
                .iter()
                .flat_map(|&i| self.pairs[i].slave.lm_dofs.clone())
                .collect();
            self.lm_dofs = Some(DofMap::new(&self.comm, name.clone(), slave_lm)?);
            return DofMap::new(&self.comm, format!("{name} (reference)"), ref_lm);
        }
        if !redistributed || self.pairs.iter().any(|p| p.slave.lm_dofs.is_empty()) {
            let mut sorted: Vec<Gid> = self
                .pairs
                .iter()
                .flat_map(|p| p.slave.dofs.iter().copied())
                .collect();
            sorted.sort_unstable();
            for p in &mut self.pairs {
                p.slave.lm_dofs = p
                    .slave
                    .dofs
                    .iter()
                    .filter_map(|g| Self::positions(&sorted, *g).map(|pos| offset + pos))
                    .collect();
            }
        }
        let gids: Vec<Gid> = owned
            .iter()
            .flat_map(|&i| self.pairs[i].slave.lm_dofs.clone())
            .collect();
        let lm = DofMap::new(&self.comm, name, gids)?;
        self.lm_dofs = Some(lm.clone());
        Ok(lm)
    }

    fn update_self_contact_lag_mult_set(
        &mut self,
        sc_lm_dofs: &DofMap,
        sc_ref_dofs: &DofMap,
    ) -> Result<DofMap, ContactError> {
        let owned: Vec<usize> = self.owned().collect();
        let lookup = |dof: &Gid| {
            sc_ref_dofs
                .lid(*dof)
                .and_then(|l| sc_lm_dofs.gid(l))
                .ok_or(ContactError::LagrangeMultiplierNotAssigned { gid: *dof })
        };
        let local: Result<Vec<(usize, Vec<Gid>)>, ContactError> = owned
            .iter()
            .map(|&i| -> Result<(usize, Vec<Gid>), ContactError> {
                let lms = self.pairs[i].slave.dofs.iter().map(lookup).collect::<Result<_, _>>()?;
                Ok((i, lms))
            })
            .collect();
        for (i, lms) in agree(&self.comm, local)? {
            self.pairs[i].slave.lm_dofs = lms;
        }
        let gids: Vec<Gid> = owned
            .iter()
            .flat_map(|&i| self.pairs[i].slave.lm_dofs.clone())
            .collect();
        let lm = DofMap::new(&self.comm, format!("interface {} lm dofs", self.id), gids)?;
        self.lm_dofs = Some(lm.clone());
        Ok(lm)
    }

    fn store_unredistributed_maps(&mut self) {
        self.unredistributed = Some((
            self.layout.slave_row_dofs.clone(),
            self.layout.master_row_dofs.clone(),
        ));
    }

    fn collect_distribution_data(&self) -> (usize, usize) {
        (self.num_loaded, self.num_close)
    }

    fn update_parallel_layout_and_data_structures(
        &mut self,
        rebalance: bool,
        enforce_ghosting: bool,
        max_dof: u64,
        mean_velocity: f64,
    ) -> Result<(), ContactError> {
        if rebalance {
            self.redistribute()?;
        }
        if rebalance || enforce_ghosting {
            self.fill_complete(true, max_dof, mean_velocity)?;
            self.create_search_tree()?;
        }
        Ok(())
    }

    fn redistribute(&mut self) -> Result<(), ContactError> {
        self.sync_history()?;
        let n = self.pairs.len();
        let size = self.comm.size();
        self.owner = (0..n).map(|i| block_owner(i, n, size)).collect();
        Ok(())
    }

    fn fill_complete(
        &mut self,
        _is_final: bool,
        _max_dof: u64,
        mean_velocity: f64,
    ) -> Result<(), ContactError> {
        self.mean_velocity = mean_velocity;
        self.build_layout()
    }

    fn create_search_tree(&mut self) -> Result<(), ContactError> {
        self.rebuild_index();
        Ok(())
    }

    fn print_parallel_distribution(&self) {
        log::info!(
            "interface {} rank {}: {} slave / {} master row nodes",
            self.id,
            self.comm.rank(),
            self.layout.slave_row_nodes.num_local(),
            self.layout.master_row_nodes.num_local()
        );
    }
}
