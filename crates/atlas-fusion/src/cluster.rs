//! Cluster Graph - Fused Groups of Nodes
//!
//! A [`Cluster`] is a connected set of nodes lowered to one kernel. Clusters
//! carry body/input/output node lists and prev/next edges annotated with the
//! pattern each side sees of the other. The [`ClusterSet`] arena owns every
//! cluster; fusion primitives clear slots and rewrite id references, so
//! edges never dangle-own anything.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;

use atlas_core::meta::{BlockSize, DataSize, NumBlock, NumDim};
use atlas_core::node::NodeId;
use atlas_core::pattern::Pattern;
use atlas_core::runtime::Runtime;
use rustc_hash::FxHashSet;

// =============================================================================
// Identifiers
// =============================================================================

/// Stable arena slot of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub(crate) u32);

impl ClusterId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Rebuilds an id from a raw arena index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// One fused group of nodes.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Arena slot.
    pub slot: ClusterId,
    /// Sequential id assigned after topological sorting; `usize::MAX` before.
    pub id: usize,
    pattern: Pattern,
    /// Body nodes computed by this cluster's kernel.
    pub node_list: Vec<NodeId>,
    /// Nodes consumed from outside the cluster.
    pub in_list: Vec<NodeId>,
    /// Nodes consumed outside the cluster (or carrying intra-dependencies).
    pub out_list: Vec<NodeId>,
    prev_list: Vec<ClusterId>,
    prev_pat: Vec<Pattern>,
    next_list: Vec<ClusterId>,
    next_pat: Vec<Pattern>,
    /// Feedback producers this cluster consumes across iterations.
    pub back_list: Vec<ClusterId>,
    /// Clusters consuming this cluster's feedback output.
    pub forw_list: Vec<ClusterId>,
}

impl Cluster {
    fn new(slot: ClusterId) -> Self {
        Self {
            slot,
            id: usize::MAX,
            pattern: Pattern::FREE,
            node_list: Vec::new(),
            in_list: Vec::new(),
            out_list: Vec::new(),
            prev_list: Vec::new(),
            prev_pat: Vec::new(),
            next_list: Vec::new(),
            next_pat: Vec::new(),
            back_list: Vec::new(),
            forw_list: Vec::new(),
        }
    }

    /// Union of the body node patterns.
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Accumulates `pat` into the cluster pattern.
    pub fn add_pattern(&mut self, pat: Pattern) {
        self.pattern += pat;
    }

    /// Direct predecessor clusters.
    pub fn prev_list(&self) -> &[ClusterId] {
        &self.prev_list
    }

    /// Direct successor clusters.
    pub fn next_list(&self) -> &[ClusterId] {
        &self.next_list
    }

    /// Pattern annotation this cluster sees of predecessor `prev`.
    pub fn prev_pattern(&self, prev: ClusterId) -> Pattern {
        let pos = self
            .prev_list
            .iter()
            .position(|p| *p == prev)
            .expect("not a predecessor");
        self.prev_pat[pos]
    }

    /// Pattern annotation this cluster sees of successor `next`.
    pub fn next_pattern(&self, next: ClusterId) -> Pattern {
        let pos = self
            .next_list
            .iter()
            .position(|n| *n == next)
            .expect("not a successor");
        self.next_pat[pos]
    }

    /// Links `prev` as a predecessor, accumulating the annotation if the
    /// edge already exists.
    pub fn add_prev(&mut self, prev: ClusterId, pat: Pattern) {
        assert_ne!(prev, self.slot, "self edge");
        if let Some(pos) = self.prev_list.iter().position(|p| *p == prev) {
            self.prev_pat[pos] += pat;
        } else {
            self.prev_list.push(prev);
            self.prev_pat.push(pat);
        }
    }

    /// Links `next` as a successor, accumulating the annotation if the edge
    /// already exists.
    pub fn add_next(&mut self, next: ClusterId, pat: Pattern) {
        assert_ne!(next, self.slot, "self edge");
        if let Some(pos) = self.next_list.iter().position(|n| *n == next) {
            self.next_pat[pos] += pat;
        } else {
            self.next_list.push(next);
            self.next_pat.push(pat);
        }
    }

    /// Unlinks a predecessor edge if present.
    pub fn remove_prev(&mut self, prev: ClusterId) {
        if let Some(pos) = self.prev_list.iter().position(|p| *p == prev) {
            self.prev_list.remove(pos);
            self.prev_pat.remove(pos);
        }
    }

    /// Unlinks a successor edge if present.
    pub fn remove_next(&mut self, next: ClusterId) {
        if let Some(pos) = self.next_list.iter().position(|n| *n == next) {
            self.next_list.remove(pos);
            self.next_pat.remove(pos);
        }
    }

    /// Whether `node` is in the body list.
    pub fn has_node(&self, node: NodeId) -> bool {
        self.node_list.contains(&node)
    }

    /// Whether `node` appears in any of the three lists.
    pub fn contains(&self, node: NodeId) -> bool {
        self.node_list.contains(&node)
            || self.in_list.contains(&node)
            || self.out_list.contains(&node)
    }

    /// Adds a body node once.
    pub fn add_node(&mut self, node: NodeId) {
        if !self.node_list.contains(&node) {
            self.node_list.push(node);
        }
    }

    /// Adds an input node once.
    pub fn add_input(&mut self, node: NodeId) {
        if !self.in_list.contains(&node) {
            self.in_list.push(node);
        }
    }

    /// Adds an output node once.
    pub fn add_output(&mut self, node: NodeId) {
        if !self.out_list.contains(&node) {
            self.out_list.push(node);
        }
    }

    /// Removes a body node if present.
    pub fn remove_node(&mut self, node: NodeId) {
        self.node_list.retain(|n| *n != node);
    }

    /// The member node with the highest dimensionality, representative of
    /// the cluster's geometry.
    fn representative<'r>(&self, runtime: &'r Runtime) -> &'r atlas_core::node::Node {
        self.node_list
            .iter()
            .chain(&self.out_list)
            .chain(&self.in_list)
            .map(|id| runtime.node(*id))
            .max_by_key(|n| n.meta.num_dim)
            .expect("empty cluster")
    }

    /// Dimensionality of the cluster's iteration space.
    pub fn num_dim(&self, runtime: &Runtime) -> NumDim {
        self.representative(runtime).meta.num_dim
    }

    /// Raster extent of the cluster's iteration space.
    pub fn data_size(&self, runtime: &Runtime) -> DataSize {
        self.representative(runtime).meta.data_size.clone()
    }

    /// Block extent of the cluster's iteration space.
    pub fn block_size(&self, runtime: &Runtime) -> BlockSize {
        self.representative(runtime).meta.block_size.clone()
    }

    /// Blocks per dimension of the cluster's iteration space.
    pub fn num_block(&self, runtime: &Runtime) -> NumBlock {
        self.representative(runtime).meta.num_block()
    }

    /// Concatenated signature of the body nodes, stable across runs.
    pub fn signature(&self, runtime: &Runtime) -> String {
        let mut sig = String::new();
        for id in &self.node_list {
            sig.push_str(&runtime.node(*id).signature());
        }
        sig
    }
}

// =============================================================================
// ClusterSet
// =============================================================================

/// Arena owning every cluster. Removed clusters leave a cleared slot so ids
/// stay stable.
#[derive(Debug, Default)]
pub struct ClusterSet {
    slots: Vec<Option<Cluster>>,
    order: Vec<ClusterId>,
}

impl ClusterSet {
    /// An empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cluster and returns its slot.
    pub fn create(&mut self) -> ClusterId {
        let id = ClusterId(self.slots.len() as u32);
        self.slots.push(Some(Cluster::new(id)));
        id
    }

    /// Immutable access; the slot must be live.
    pub fn get(&self, id: ClusterId) -> &Cluster {
        self.slots[id.index()].as_ref().expect("cleared cluster slot")
    }

    /// Mutable access; the slot must be live.
    pub fn get_mut(&mut self, id: ClusterId) -> &mut Cluster {
        self.slots[id.index()].as_mut().expect("cleared cluster slot")
    }

    /// Whether the slot still holds a cluster.
    pub fn is_live(&self, id: ClusterId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Clears a slot. Edges referring to the id must have been rewritten.
    pub fn remove(&mut self, id: ClusterId) {
        self.slots[id.index()] = None;
    }

    /// Live cluster slots in arena order.
    pub fn live(&self) -> Vec<ClusterId> {
        self.slots
            .iter()
            .flatten()
            .map(|c| c.slot)
            .collect()
    }

    /// Number of live clusters.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether no live cluster exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores the topological ordering computed by the Fusioner.
    pub fn set_order(&mut self, order: Vec<ClusterId>) {
        self.order = order;
    }

    /// Live clusters in topological order. Empty before sorting ran.
    pub fn ordered(&self) -> &[ClusterId] {
        &self.order
    }

    /// Every cluster `node` appears in, as body, input or output.
    pub fn clusters_of(&self, node: NodeId) -> Vec<ClusterId> {
        self.slots
            .iter()
            .flatten()
            .filter(|c| c.contains(node))
            .map(|c| c.slot)
            .collect()
    }

    /// Whether `to` is reachable from `from` along next edges.
    pub fn reaches(&self, from: ClusterId, to: ClusterId) -> bool {
        if from == to {
            return true;
        }
        let mut seen = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            for &next in self.get(cur).next_list() {
                if next == to {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    /// Transitive predecessor query: whether `a` precedes `b`.
    pub fn is_prev_of(&self, a: ClusterId, b: ClusterId) -> bool {
        a != b && self.reaches(a, b)
    }

    /// Transitive successor query: whether `a` follows `b`.
    pub fn is_next_of(&self, a: ClusterId, b: ClusterId) -> bool {
        b != a && self.reaches(b, a)
    }

    /// Asserts the prev/next relation is acyclic. Debug aid; the fusion
    /// primitives keep this invariant by construction.
    pub fn assert_acyclic(&self) {
        for id in self.live() {
            for &next in self.get(id).next_list() {
                assert!(
                    !self.reaches(next, id),
                    "cycle through {id} and {next}"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_annotations_accumulate() {
        let mut set = ClusterSet::new();
        let a = set.create();
        let b = set.create();
        set.get_mut(b).add_prev(a, Pattern::LOCAL);
        set.get_mut(b).add_prev(a, Pattern::FOCAL);
        assert_eq!(set.get(b).prev_list(), &[a]);
        assert!(set.get(b).prev_pattern(a).is(Pattern::LOCAL + Pattern::FOCAL));
    }

    #[test]
    fn test_reachability_is_transitive() {
        let mut set = ClusterSet::new();
        let a = set.create();
        let b = set.create();
        let c = set.create();
        set.get_mut(a).add_next(b, Pattern::LOCAL);
        set.get_mut(b).add_next(c, Pattern::LOCAL);
        assert!(set.is_prev_of(a, c));
        assert!(set.is_next_of(c, a));
        assert!(!set.is_prev_of(c, a));
        set.assert_acyclic();
    }

    #[test]
    #[should_panic(expected = "self edge")]
    fn test_self_edge_rejected() {
        let mut set = ClusterSet::new();
        let a = set.create();
        set.get_mut(a).add_next(a, Pattern::LOCAL);
    }

    #[test]
    fn test_removed_slot_stays_cleared() {
        let mut set = ClusterSet::new();
        let a = set.create();
        let b = set.create();
        set.remove(a);
        assert!(!set.is_live(a));
        assert!(set.is_live(b));
        assert_eq!(set.live(), vec![b]);
    }
}
