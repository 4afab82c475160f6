//! Fusioner - Partitioning the DAG into Fused Clusters
//!
//! Multi-phase fixed-point rewriting over the cluster graph:
//!
//! 1. gentle top-down pipe fusion over FREE/LOCAL clusters, then gentle flat
//!    fusion of sibling clusters sharing an input,
//! 2. bottom-up pipe fusion without the FREE/LOCAL restriction,
//! 3. replication of free nodes into their consumer clusters,
//! 4. linking of boundary nodes as cluster inputs/outputs,
//! 5. id-order and topological sorting.
//!
//! Every primitive preserves acyclicity, node coverage, and pattern-union
//! edge annotations.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

use atlas_core::clock::{Clock, Region, TimedRegion};
use atlas_core::config::Config;
use atlas_core::meta::NumDim;
use atlas_core::node::{Node, NodeId, NodeKind};
use atlas_core::pattern::{can_flat_fuse, can_pipe_fuse, Pattern};
use atlas_core::runtime::Runtime;

use crate::cluster::{ClusterId, ClusterSet};

// =============================================================================
// Fusioner
// =============================================================================

/// The graph-rewriting pass turning a node list into a cluster list.
pub struct Fusioner<'r> {
    runtime: &'r Runtime,
    config: &'r Config,
    clusters: ClusterSet,
    clusters_of: Vec<Vec<ClusterId>>,
    visited: FxHashSet<ClusterId>,
}

impl<'r> Fusioner<'r> {
    /// Runs all phases over the nodes of `runtime`, in creation order.
    pub fn fuse(runtime: &'r Runtime, config: &'r Config, clock: &Clock) -> ClusterSet {
        let _region = TimedRegion::new(clock, Region::Fusion);
        let mut fusioner = Fusioner {
            runtime,
            config,
            clusters: ClusterSet::new(),
            clusters_of: vec![Vec::new(); runtime.len()],
            visited: FxHashSet::default(),
        };

        for node in runtime.nodes() {
            fusioner.process(node.id);
            fusioner.pipe_gently(node.id);
        }
        for node in runtime.nodes() {
            fusioner.flat_gently(node.id);
        }
        debug!(clusters = fusioner.clusters.len(), "gentle fusion done");

        for node in runtime.nodes().iter().rev() {
            assert_eq!(fusioner.clusters_of[node.id.index()].len(), 1);
            let cluster = fusioner.clusters_of[node.id.index()][0];
            fusioner.process_bottom_up(cluster);
        }
        debug!(clusters = fusioner.clusters.len(), "bottom-up fusion done");

        fusioner.forwarding(|n| n.pattern().is(Pattern::FREE));
        fusioner.linking();
        fusioner.sorting();
        debug!(clusters = fusioner.clusters.len(), "fusion complete");

        fusioner.clusters.assert_acyclic();
        fusioner.clusters
    }

    // =========================================================================
    // Phase 1 - Gentle Fusion
    // =========================================================================

    /// Creates a singleton cluster for `node` and links it to the clusters
    /// of its predecessors.
    fn process(&mut self, node: NodeId) {
        let new_cluster = self.clusters.create();
        let pattern = self.runtime.node(node).pattern();
        {
            let cluster = self.clusters.get_mut(new_cluster);
            cluster.add_node(node);
            cluster.add_pattern(pattern);
        }
        self.clusters_of[node.index()].push(new_cluster);

        for &prev in &self.runtime.node(node).prev {
            // Nodes sit in exactly one cluster at this point.
            let prev_cluster = self.clusters_of[prev.index()][0];
            let prev_pattern = self.clusters.get(prev_cluster).pattern();
            self.clusters.get_mut(prev_cluster).add_next(new_cluster, pattern);
            self.clusters.get_mut(new_cluster).add_prev(prev_cluster, prev_pattern);
        }
    }

    fn is_free_or_local(&self, cluster: ClusterId) -> bool {
        let pat = self.clusters.get(cluster).pattern();
        pat.is(Pattern::FREE) || pat.is(Pattern::LOCAL)
    }

    fn num_dim(&self, cluster: ClusterId) -> NumDim {
        self.clusters.get(cluster).num_dim(self.runtime)
    }

    /// Absorbs FREE/LOCAL single-consumer predecessors into the cluster of
    /// `node`, restarting the scan after every fusion.
    fn pipe_gently(&mut self, node: NodeId) {
        if !self.config.code_fusion {
            return;
        }
        let mut group = self.clusters_of[node.index()][0];

        let mut i = 0;
        while i < self.clusters.get(group).prev_list().len() {
            let prev = self.clusters.get(group).prev_list()[i];
            i += 1;

            let fuse_free = self.is_free_or_local(group) && self.is_free_or_local(prev);
            let prev_pat = self.clusters.get(prev).pattern();
            let fuse_dnd0 = !(self.num_dim(group) != NumDim::D0
                && self.num_dim(prev) == NumDim::D0
                && prev_pat.is_not(Pattern::FREE));

            if fuse_free
                && fuse_dnd0
                && self.clusters.get(prev).next_list().len() == 1
                && self.can_pipe(prev, group)
            {
                group = self.pipe_fuse(prev, group);
                i = 0;
            }
        }
    }

    /// Flat-fuses pairs of FREE/LOCAL sibling clusters consuming `node`.
    fn flat_gently(&mut self, node: NodeId) {
        if !self.config.code_fusion {
            return;
        }
        let node_cluster = self.clusters_of[node.index()][0];
        if self.clusters.get(node_cluster).next_list().len() < 2 {
            return;
        }

        // Work over a snapshot of the successor nodes; cluster membership is
        // re-resolved on every step since fusions rewrite it.
        let nexts: Vec<NodeId> = self.runtime.node(node).next.clone();
        for i in 0..nexts.len() {
            let mut left = self.clusters_of[nexts[i].index()][0];
            if !self.is_free_or_local(left) || left == node_cluster {
                continue;
            }
            for &right_node in nexts.iter().skip(i + 1) {
                let right = self.clusters_of[right_node.index()][0];
                if !self.is_free_or_local(right) || right == node_cluster || right == left {
                    continue;
                }
                if self.can_flat(left, right) {
                    left = self.flat_fuse(left, right);
                }
            }
        }
    }

    // =========================================================================
    // Phase 2 - Bottom-Up Pipe Fusion
    // =========================================================================

    /// Greedily pipe-fuses predecessors into `cluster`, then recurses
    /// upward. Visited clusters are memoized so the walk terminates.
    fn process_bottom_up(&mut self, cluster: ClusterId) {
        if !self.config.code_fusion {
            return;
        }
        if !self.visited.insert(cluster) {
            return;
        }

        let mut group = cluster;
        let mut i = 0;
        while i < self.clusters.get(group).prev_list().len() {
            let bot = group;
            let top = self.clusters.get(group).prev_list()[i];
            i += 1;

            let top_pat = self.clusters.get(top).pattern();
            let d0dn = !(top_pat.is_not(Pattern::FREE)
                && self.num_dim(top) == NumDim::D0
                && self.num_dim(bot) != NumDim::D0);

            if d0dn && self.can_pipe(top, bot) {
                group = self.pipe_fuse(top, bot);
                i = 0;
            }
        }

        let mut size = self.clusters.get(group).prev_list().len();
        i = 0;
        while i < size {
            let prev = self.clusters.get(group).prev_list()[i];
            i += 1;
            self.process_bottom_up(prev);
            let now = self.clusters.get(group).prev_list().len();
            if size != now {
                size = now;
                i = 0;
            }
        }
    }

    // =========================================================================
    // Legality
    // =========================================================================

    /// Whether fusing `bot` upward into `top` is legal: no cycle through a
    /// sibling successor of `top`, and the edge patterns compose.
    fn can_pipe(&self, top: ClusterId, bot: ClusterId) -> bool {
        if top == bot {
            return false;
        }
        for &next in self.clusters.get(top).next_list() {
            if next != bot && self.clusters.reaches(next, bot) {
                return false; // fusing would close a cycle
            }
        }
        // The flat check ignores loop tags: a gadget's internals share the
        // iteration geometry of their plain content.
        let loopish = Pattern::LOOP + Pattern::HEAD;
        can_pipe_fuse(
            self.clusters.get(bot).prev_pattern(top),
            self.clusters.get(top).next_pattern(bot),
        ) && can_flat_fuse(
            self.clusters.get(top).pattern().strip(loopish),
            self.clusters.get(bot).pattern().strip(loopish),
        )
    }

    /// Whether flat-fusing two siblings is legal: no ancestry relation in
    /// either direction, and the patterns share a geometry.
    fn can_flat(&self, left: ClusterId, right: ClusterId) -> bool {
        if left == right {
            return false;
        }
        if self.clusters.reaches(left, right) || self.clusters.reaches(right, left) {
            return false;
        }
        can_flat_fuse(
            self.clusters.get(left).pattern(),
            self.clusters.get(right).pattern(),
        )
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    fn move_members(&mut self, from: ClusterId, into: ClusterId) {
        let (nodes, ins, outs) = {
            let c = self.clusters.get(from);
            (c.node_list.clone(), c.in_list.clone(), c.out_list.clone())
        };
        for node in nodes {
            self.clusters.get_mut(into).add_node(node);
            self.retarget(node, from, into);
        }
        for node in ins {
            self.clusters.get_mut(into).add_input(node);
            self.retarget(node, from, into);
        }
        for node in outs {
            self.clusters.get_mut(into).add_output(node);
            self.retarget(node, from, into);
        }
    }

    fn retarget(&mut self, node: NodeId, from: ClusterId, into: ClusterId) {
        let list = &mut self.clusters_of[node.index()];
        list.retain(|c| *c != from);
        if !list.contains(&into) {
            list.push(into);
        }
    }

    /// Moves everything of `bot` into `top` and deletes `bot`. Returns the
    /// surviving cluster.
    fn pipe_fuse(&mut self, top: ClusterId, bot: ClusterId) -> ClusterId {
        assert!(self.can_pipe(top, bot));
        self.move_members(bot, top);

        let bot_prevs: Vec<ClusterId> = self.clusters.get(bot).prev_list().to_vec();
        for prev in bot_prevs {
            if prev == top {
                continue;
            }
            let forward = self.clusters.get(prev).next_pattern(bot);
            let backward = self.clusters.get(bot).prev_pattern(prev);
            self.clusters.get_mut(prev).add_next(top, forward);
            self.clusters.get_mut(top).add_prev(prev, backward);
            self.clusters.get_mut(prev).remove_next(bot);
        }

        let bot_nexts: Vec<ClusterId> = self.clusters.get(bot).next_list().to_vec();
        for next in bot_nexts {
            assert_ne!(next, top, "cycle through fused successor");
            let backward = self.clusters.get(next).prev_pattern(bot)
                + self.clusters.get(bot).prev_pattern(top);
            let forward = self.clusters.get(bot).next_pattern(next);
            self.clusters.get_mut(next).add_prev(top, backward);
            self.clusters.get_mut(top).add_next(next, forward);
            self.clusters.get_mut(next).remove_prev(bot);
        }

        // Predecessor edges of 'top' now also carry 'bot's pattern.
        let absorbed = self.clusters.get(top).next_pattern(bot);
        let top_prevs: Vec<ClusterId> = self.clusters.get(top).prev_list().to_vec();
        for prev in top_prevs {
            self.clusters.get_mut(prev).add_next(top, absorbed);
        }

        self.clusters.get_mut(top).remove_next(bot);
        let bot_pattern = self.clusters.get(bot).pattern();
        self.clusters.get_mut(top).add_pattern(bot_pattern);
        self.clusters.remove(bot);
        top
    }

    /// Moves everything of `right` into `left` and deletes `right`. Returns
    /// the surviving cluster.
    fn flat_fuse(&mut self, left: ClusterId, right: ClusterId) -> ClusterId {
        assert!(self.can_flat(left, right));
        self.move_members(right, left);

        let right_prevs: Vec<ClusterId> = self.clusters.get(right).prev_list().to_vec();
        for prev in right_prevs {
            assert_ne!(prev, left);
            let forward = self.clusters.get(prev).next_pattern(right);
            let backward = self.clusters.get(right).prev_pattern(prev);
            self.clusters.get_mut(prev).add_next(left, forward);
            self.clusters.get_mut(left).add_prev(prev, backward);
            self.clusters.get_mut(prev).remove_next(right);
        }

        let right_nexts: Vec<ClusterId> = self.clusters.get(right).next_list().to_vec();
        for next in right_nexts {
            assert_ne!(next, left);
            let backward = self.clusters.get(next).prev_pattern(right);
            let forward = self.clusters.get(right).next_pattern(next);
            self.clusters.get_mut(next).add_prev(left, backward);
            self.clusters.get_mut(left).add_next(next, forward);
            self.clusters.get_mut(next).remove_prev(right);
        }

        let right_pattern = self.clusters.get(right).pattern();
        self.clusters.get_mut(left).add_pattern(right_pattern);
        self.clusters.remove(right);
        left
    }

    // =========================================================================
    // Phase 3 - Free-Node Forwarding
    // =========================================================================

    /// Replicates every body node satisfying `pred` into the clusters of its
    /// consumers, then drops node-free clusters and stale edges.
    fn forwarding(&mut self, pred: impl Fn(&Node) -> bool) {
        let mut forward: FxHashMap<(ClusterId, ClusterId), Vec<NodeId>> = FxHashMap::default();

        for cluster in self.clusters.live() {
            let body: Vec<NodeId> = self.clusters.get(cluster).node_list.clone();
            for node in body {
                if !pred(self.runtime.node(node)) {
                    continue;
                }
                let mut forwarded = false;

                for next_node in self.runtime.node(node).next.clone() {
                    for next_cluster in self.clusters_of[next_node.index()].clone() {
                        if self.clusters.get(next_cluster).contains(node) {
                            continue;
                        }
                        self.clusters.get_mut(next_cluster).add_node(node);
                        self.clusters_of[node.index()].push(next_cluster);
                        forwarded = true;
                        forward.entry((cluster, next_cluster)).or_default().push(node);
                    }
                }

                if forwarded {
                    let all_outside = self
                        .runtime
                        .node(node)
                        .next
                        .iter()
                        .all(|n| !self.clusters.get(cluster).has_node(*n));
                    if all_outside {
                        self.clusters.get_mut(cluster).remove_node(node);
                        self.clusters_of[node.index()].retain(|c| *c != cluster);
                    }
                }
            }
        }

        // Drop cluster edges that only carried replicated nodes.
        for (&(cluster, next_cluster), _) in &forward {
            let mut linked = false;
            for &node in &self.clusters.get(cluster).node_list {
                if pred(self.runtime.node(node)) {
                    continue;
                }
                for next in &self.runtime.node(node).next {
                    if self.clusters.get(next_cluster).has_node(*next) {
                        linked = true;
                    }
                }
            }
            if !linked {
                self.clusters.get_mut(cluster).remove_next(next_cluster);
                self.clusters.get_mut(next_cluster).remove_prev(cluster);
            }
        }

        // Drop clusters left without any member.
        for cluster in self.clusters.live() {
            let empty = {
                let c = self.clusters.get(cluster);
                c.node_list.is_empty() && c.in_list.is_empty() && c.out_list.is_empty()
            };
            if empty {
                let prevs = self.clusters.get(cluster).prev_list().to_vec();
                let nexts = self.clusters.get(cluster).next_list().to_vec();
                for prev in prevs {
                    self.clusters.get_mut(prev).remove_next(cluster);
                }
                for next in nexts {
                    self.clusters.get_mut(next).remove_prev(cluster);
                }
                self.clusters.remove(cluster);
            }
        }
    }

    // =========================================================================
    // Phase 4 - Linking
    // =========================================================================

    /// Marks boundary nodes as cluster inputs/outputs, publishes intra-
    /// dependency and terminal outputs, wires feedback back/forw edges, and
    /// moves scalar free nodes into the input list.
    fn linking(&mut self) {
        for cluster in self.clusters.live() {
            assert!(
                !self.clusters.get(cluster).node_list.is_empty(),
                "empty cluster reached linking"
            );
            let body: Vec<NodeId> = self.clusters.get(cluster).node_list.clone();
            for node in body {
                for next_node in self.runtime.node(node).next.clone() {
                    for next_cluster in self.clusters_of[next_node.index()].clone() {
                        if !self.clusters.get(next_cluster).has_node(node) {
                            self.clusters.get_mut(cluster).add_output(node);
                            self.clusters.get_mut(next_cluster).add_input(node);
                        }
                    }
                }
            }
        }

        // Patterns with intra-dependencies publish their nodes.
        for cluster in self.clusters.live() {
            let pat = self.clusters.get(cluster).pattern();
            if pat.is_not(Pattern::RADIAL) && pat.is_not(Pattern::SPREAD) {
                continue;
            }
            let body: Vec<NodeId> = self.clusters.get(cluster).node_list.clone();
            for node in body {
                let npat = self.runtime.node(node).pattern();
                if npat.is(Pattern::RADIAL) || npat.is(Pattern::SPREAD) {
                    self.clusters.get_mut(cluster).add_output(node);
                }
            }
        }

        // Terminal writes are outputs even without successors.
        for cluster in self.clusters.live() {
            let body: Vec<NodeId> = self.clusters.get(cluster).node_list.clone();
            for node in body {
                if self.runtime.node(node).is_output() {
                    self.clusters.get_mut(cluster).add_output(node);
                }
            }
        }

        // Feedback twins create back/forw edges between their clusters.
        for cluster in self.clusters.live() {
            let body: Vec<NodeId> = self.clusters.get(cluster).node_list.clone();
            for node in body {
                let NodeKind::Feedback {
                    feed_in: false,
                    twin: Some(twin),
                } = &self.runtime.node(node).kind
                else {
                    continue;
                };
                let head_cluster = self.clusters_of[twin.index()][0];
                if head_cluster == cluster {
                    continue;
                }
                self.clusters.get_mut(cluster).add_output(node);
                self.clusters.get_mut(head_cluster).add_input(node);
                let body_cluster = self.clusters.get_mut(cluster);
                if !body_cluster.back_list.contains(&head_cluster) {
                    body_cluster.back_list.push(head_cluster);
                }
                let head = self.clusters.get_mut(head_cluster);
                if !head.forw_list.contains(&cluster) {
                    head.forw_list.push(cluster);
                }
            }
        }

        // Scalar free nodes become kernel arguments, improving reuse of
        // compiled kernels across programs.
        for cluster in self.clusters.live() {
            let moved: Vec<NodeId> = self
                .clusters
                .get(cluster)
                .node_list
                .iter()
                .copied()
                .filter(|&n| {
                    let node = self.runtime.node(n);
                    node.meta.num_dim == NumDim::D0 && node.pattern().is(Pattern::FREE)
                })
                .collect();
            for node in moved {
                self.clusters.get_mut(cluster).remove_node(node);
                self.clusters.get_mut(cluster).add_input(node);
            }
        }
    }

    // =========================================================================
    // Phase 5 - Sorting
    // =========================================================================

    /// Sorts node lists by id and the cluster list topologically, breaking
    /// ties by each cluster's last node id; assigns sequential cluster ids.
    fn sorting(&mut self) {
        for cluster in self.clusters.live() {
            let c = self.clusters.get_mut(cluster);
            c.node_list.sort_unstable();
            c.in_list.sort_unstable();
            c.out_list.sort_unstable();
        }

        let live = self.clusters.live();
        let mut pending: FxHashMap<ClusterId, usize> = live
            .iter()
            .map(|&id| (id, self.clusters.get(id).prev_list().len()))
            .collect();

        let tie_key = |set: &ClusterSet, id: ClusterId| -> NodeId {
            let c = set.get(id);
            c.node_list
                .iter()
                .chain(&c.in_list)
                .chain(&c.out_list)
                .copied()
                .max()
                .expect("empty cluster")
        };

        let mut heap: BinaryHeap<Reverse<(NodeId, ClusterId)>> = pending
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(&id, _)| Reverse((tie_key(&self.clusters, id), id)))
            .collect();

        let mut order = Vec::with_capacity(live.len());
        while let Some(Reverse((_, id))) = heap.pop() {
            order.push(id);
            for &next in self.clusters.get(id).next_list() {
                let deps = pending.get_mut(&next).expect("unknown cluster");
                *deps -= 1;
                if *deps == 0 {
                    heap.push(Reverse((tie_key(&self.clusters, next), next)));
                }
            }
        }
        assert_eq!(order.len(), live.len(), "cycle in cluster graph");

        for (seq, &id) in order.iter().enumerate() {
            self.clusters.get_mut(id).id = seq;
        }
        self.clusters.set_order(order);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::meta::{DataType, MemOrder, MetaData};
    use atlas_core::node::{BinaryOp, UnaryOp};
    use atlas_core::value::Value;

    fn raster_meta() -> MetaData {
        MetaData::new(
            NumDim::D2,
            vec![8, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        )
    }

    fn fuse(rt: &Runtime) -> ClusterSet {
        Fusioner::fuse(rt, &Config::default(), &Clock::new())
    }

    #[test]
    fn test_local_chain_forms_one_cluster() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(1.0), raster_meta());
        let one = rt.constant(Value::F32(1.0), raster_meta());
        assert_eq!(c, one);
        let add = rt.binary(BinaryOp::Add, c, c);
        let w = rt.write(add, "out");

        let clusters = fuse(&rt);
        assert_eq!(clusters.len(), 1);
        let id = clusters.ordered()[0];
        let cluster = clusters.get(id);
        assert!(cluster.pattern().is(Pattern::LOCAL));
        assert!(cluster.has_node(c) && cluster.has_node(add) && cluster.has_node(w));
        assert_eq!(cluster.out_list, vec![w]);
    }

    #[test]
    fn test_read_cluster_stays_separate() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let neg = rt.unary(UnaryOp::Neg, r);
        let conv = rt.convolution(neg, &[3, 3], vec![1.0 / 9.0; 9]);
        let w = rt.write(conv, "out");

        let clusters = fuse(&rt);
        assert_eq!(clusters.len(), 2);
        let read_cluster = clusters.clusters_of(r)[0];
        let compute_cluster = clusters.clusters_of(conv)[0];
        assert_ne!(read_cluster, compute_cluster);

        let compute = clusters.get(compute_cluster);
        assert!(compute.pattern().is(Pattern::FOCAL + Pattern::LOCAL));
        assert!(compute.has_node(neg) && compute.has_node(w));
        assert!(compute.in_list.contains(&r));
        assert!(clusters.get(read_cluster).out_list.contains(&r));
        assert!(clusters.is_prev_of(read_cluster, compute_cluster));
    }

    #[test]
    fn test_flat_fuse_of_sibling_locals() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let two = rt.scalar_constant(Value::F32(2.0));
        let one = rt.scalar_constant(Value::F32(1.0));
        let mul = rt.binary(BinaryOp::Mul, r, two);
        let add = rt.binary(BinaryOp::Add, r, one);
        let wa = rt.write(mul, "a");
        let wb = rt.write(add, "b");

        let clusters = fuse(&rt);
        // One cluster for the read, one fused sibling cluster.
        assert_eq!(clusters.len(), 2);
        let sibling = clusters.clusters_of(mul)[0];
        assert_eq!(sibling, clusters.clusters_of(add)[0]);
        let cluster = clusters.get(sibling);
        assert!(cluster.out_list.contains(&wa) && cluster.out_list.contains(&wb));
        assert!(cluster.in_list.contains(&r));
    }

    #[test]
    fn test_free_node_replication() {
        let mut rt = Runtime::new();
        let pi = rt.constant(Value::F32(3.1415), raster_meta());
        let conv_a = rt.convolution(pi, &[3, 3], vec![1.0; 9]);
        let conv_b = rt.focal_func(atlas_core::node::FocalOp::Max, pi, &[3, 3]);
        let conv_c = rt.focal_func(atlas_core::node::FocalOp::Min, pi, &[3, 3]);
        rt.write(conv_a, "a");
        rt.write(conv_b, "b");
        rt.write(conv_c, "c");

        let clusters = fuse(&rt);
        // The constant replicates into all three focal clusters and its own
        // cluster disappears.
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters.clusters_of(pi).len(), 3);
        for id in clusters.live() {
            assert!(clusters.get(id).has_node(pi));
        }
    }

    #[test]
    fn test_no_fusion_when_disabled() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(1.0), raster_meta());
        let add = rt.binary(BinaryOp::Add, c, c);
        rt.write(add, "out");

        let config = Config {
            code_fusion: false,
            ..Config::default()
        };
        let clusters = Fusioner::fuse(&rt, &config, &Clock::new());
        // Phase 3 still replicates the free constant into the add cluster.
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_cluster_pattern_is_union_of_body() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let neg = rt.unary(UnaryOp::Neg, r);
        let conv = rt.convolution(neg, &[3, 3], vec![1.0; 9]);
        rt.write(conv, "out");

        let clusters = fuse(&rt);
        for id in clusters.live() {
            let cluster = clusters.get(id);
            let mut union = Pattern::FREE;
            for &node in &cluster.node_list {
                union += rt.node(node).pattern();
            }
            assert_eq!(cluster.pattern(), union);
        }
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let build = || {
            let mut rt = Runtime::new();
            let r = rt.read(raster_meta(), "dem");
            let neg = rt.unary(UnaryOp::Neg, r);
            let conv = rt.convolution(neg, &[3, 3], vec![1.0; 9]);
            let sum = rt.zonal(atlas_core::node::ReduceOp::Sum, conv);
            let scaled = rt.binary(BinaryOp::Mul, conv, sum);
            rt.write(scaled, "out");
            rt
        };
        let rt = build();
        let a = fuse(&rt);
        let b = fuse(&rt);
        let partition = |set: &ClusterSet| -> Vec<Vec<NodeId>> {
            set.ordered()
                .iter()
                .map(|&id| set.get(id).node_list.clone())
                .collect()
        };
        assert_eq!(partition(&a), partition(&b));
    }

    #[test]
    fn test_sorting_assigns_topological_ids() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let neg = rt.unary(UnaryOp::Neg, r);
        let conv = rt.convolution(neg, &[3, 3], vec![1.0; 9]);
        rt.write(conv, "out");

        let clusters = fuse(&rt);
        let order = clusters.ordered();
        for (pos, &id) in order.iter().enumerate() {
            assert_eq!(clusters.get(id).id, pos);
            for &next in clusters.get(id).next_list() {
                assert!(clusters.get(next).id > pos);
            }
        }
    }
}
