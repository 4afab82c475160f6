//! Runtime Arena - Node Ownership, Factories, and Structural CSE
//!
//! The [`Runtime`] exclusively owns every node of the DAG. Nodes are built
//! through factory methods that consult a common-subexpression table keyed by
//! structural identity: two factory calls with equal keys return the same
//! [`NodeId`]. The runtime also hosts the per-coordinate constant folding
//! used by value prediction.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rustc_hash::FxHashMap;
use std::fmt::Write as _;

use crate::mask::Mask;
use crate::meta::{Coord, DataType, MetaData, NumDim};
use crate::node::{
    BinaryOp, FocalOp, Node, NodeId, NodeKind, PercentOp, ReduceOp, StatKind, UnaryOp,
};
use crate::value::{ValFix, Value};

// =============================================================================
// Structural Keys
// =============================================================================

/// Structural identity of a node: subkind tag, metadata, intrinsic
/// attributes, and positional predecessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    class: char,
    meta: MetaData,
    attr: String,
    prev: Vec<NodeId>,
}

impl NodeKey {
    fn new(kind: &NodeKind, meta: &MetaData, prev: &[NodeId]) -> Self {
        let mut attr = String::new();
        match kind {
            NodeKind::Constant { value } => {
                let _ = write!(attr, "{:?}:{:016x}", value.data_type(), value.as_f64().to_bits());
            }
            NodeKind::Index { dim } => {
                let _ = write!(attr, "{dim}");
            }
            NodeKind::Read { path } | NodeKind::Write { path } => {
                attr.push_str(path);
            }
            NodeKind::Unary { op } => {
                let _ = write!(attr, "{op:?}");
            }
            NodeKind::Binary { op } => {
                let _ = write!(attr, "{op:?}");
            }
            NodeKind::Neighbor { offset } => {
                let _ = write!(attr, "{offset:?}");
            }
            NodeKind::Convolution { window, weights } => {
                let _ = write!(attr, "{:?}", window.size());
                for w in weights {
                    let _ = write!(attr, ":{:016x}", w.to_bits());
                }
            }
            NodeKind::FocalFunc { op, window } => {
                let _ = write!(attr, "{op:?}{:?}", window.size());
            }
            NodeKind::FocalPercent { op, window } => {
                let _ = write!(attr, "{op:?}{:?}", window.size());
            }
            NodeKind::Zonal { op } => {
                let _ = write!(attr, "{op:?}");
            }
            NodeKind::SummaryItem { which } => {
                let _ = write!(attr, "{which:?}");
            }
            NodeKind::Radial { start } => {
                let _ = write!(attr, "{start:?}");
            }
            NodeKind::Feedback { feed_in, .. } => {
                let _ = write!(attr, "{feed_in}");
            }
            NodeKind::FocalFlow
            | NodeKind::Summary { .. }
            | NodeKind::LoopCond
            | NodeKind::LoopHead
            | NodeKind::LoopTail
            | NodeKind::Switch
            | NodeKind::Identity => {}
        }
        Self {
            class: kind.class_signature(),
            meta: meta.clone(),
            attr,
            prev: prev.to_vec(),
        }
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Arena owning the node graph, with a CSE table over structural keys.
#[derive(Debug, Default)]
pub struct Runtime {
    nodes: Vec<Node>,
    cse: FxHashMap<NodeKey, NodeId>,
}

impl Runtime {
    /// An empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable access by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of owned nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes were created yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn intern(&mut self, meta: MetaData, kind: NodeKind, prev: Vec<NodeId>) -> NodeId {
        let key = NodeKey::new(&kind, &meta, &prev);
        if let Some(&id) = self.cse.get(&key) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        for &p in &prev {
            let next = &mut self.nodes[p.index()].next;
            if !next.contains(&id) {
                next.push(id);
            }
        }
        self.nodes.push(Node {
            id,
            meta,
            kind,
            prev,
            next: Vec::new(),
        });
        self.cse.insert(key, id);
        id
    }

    // =========================================================================
    // Factories
    // =========================================================================

    /// A constant raster or scalar.
    pub fn constant(&mut self, value: Value, meta: MetaData) -> NodeId {
        self.intern(meta, NodeKind::Constant { value }, Vec::new())
    }

    /// A scalar constant.
    pub fn scalar_constant(&mut self, value: Value) -> NodeId {
        let meta = MetaData::scalar(value.data_type());
        self.constant(value, meta)
    }

    /// The cell index along `dim`.
    pub fn index(&mut self, meta: MetaData, dim: usize) -> NodeId {
        assert!(dim < meta.num_dim.ndim());
        self.intern(meta, NodeKind::Index { dim }, Vec::new())
    }

    /// A raster read from external storage.
    pub fn read(&mut self, meta: MetaData, path: &str) -> NodeId {
        self.intern(meta, NodeKind::Read { path: path.to_owned() }, Vec::new())
    }

    /// A raster written to external storage.
    pub fn write(&mut self, prev: NodeId, path: &str) -> NodeId {
        let meta = self.node(prev).meta.clone();
        self.intern(meta, NodeKind::Write { path: path.to_owned() }, vec![prev])
    }

    /// A cell-wise unary operation.
    pub fn unary(&mut self, op: UnaryOp, prev: NodeId) -> NodeId {
        let meta = self.node(prev).meta.clone();
        self.intern(meta, NodeKind::Unary { op }, vec![prev])
    }

    /// A cell-wise binary operation with scalar broadcasting.
    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let (lm, rm) = (self.node(lhs).meta.clone(), self.node(rhs).meta.clone());
        let mut meta = if lm.num_dim >= rm.num_dim { lm.clone() } else { rm.clone() };
        meta.data_type = match op {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::And
            | BinaryOp::Or => DataType::B8,
            _ => promote(lm.data_type, rm.data_type),
        };
        self.intern(meta, NodeKind::Binary { op }, vec![lhs, rhs])
    }

    /// Access to the neighbor cell at `offset`.
    pub fn neighbor(&mut self, prev: NodeId, offset: Coord) -> NodeId {
        let meta = self.node(prev).meta.clone();
        assert_eq!(offset.len(), meta.num_dim.ndim());
        self.intern(meta, NodeKind::Neighbor { offset }, vec![prev])
    }

    /// A weighted window sum over `prev`.
    pub fn convolution(&mut self, prev: NodeId, size: &[i32], weights: Vec<f64>) -> NodeId {
        let meta = self.node(prev).meta.clone();
        let window = Mask::full(size);
        assert_eq!(weights.len(), size.iter().map(|s| *s as usize).product::<usize>());
        self.intern(meta, NodeKind::Convolution { window, weights }, vec![prev])
    }

    /// A window aggregation over `prev`.
    pub fn focal_func(&mut self, op: FocalOp, prev: NodeId, size: &[i32]) -> NodeId {
        let meta = self.node(prev).meta.clone();
        let window = Mask::full(size);
        self.intern(meta, NodeKind::FocalFunc { op, window }, vec![prev])
    }

    /// The share of window cells relating to the center cell.
    pub fn focal_percent(&mut self, op: PercentOp, prev: NodeId, size: &[i32]) -> NodeId {
        let mut meta = self.node(prev).meta.clone();
        meta.data_type = DataType::F32;
        let window = Mask::full(size);
        self.intern(meta, NodeKind::FocalPercent { op, window }, vec![prev])
    }

    /// Steepest-descent flow direction over the 3x3 neighborhood.
    pub fn focal_flow(&mut self, prev: NodeId) -> NodeId {
        let mut meta = self.node(prev).meta.clone();
        meta.data_type = DataType::U8;
        self.intern(meta, NodeKind::FocalFlow, vec![prev])
    }

    /// A whole-raster reduction to a scalar.
    pub fn zonal(&mut self, op: ReduceOp, prev: NodeId) -> NodeId {
        let dtype = self.node(prev).meta.data_type;
        self.intern(MetaData::scalar(dtype), NodeKind::Zonal { op }, vec![prev])
    }

    /// A summary node with the requested statistic children. The children are
    /// reachable both through the returned ids and the summary's kind record.
    pub fn summary(&mut self, prev: NodeId, stats: &[StatKind]) -> NodeId {
        let dtype = self.node(prev).meta.data_type;
        let summary = self.intern(
            MetaData::scalar(dtype),
            NodeKind::Summary {
                min: None,
                max: None,
                mean: None,
                std: None,
            },
            vec![prev],
        );
        let mut children: [Option<NodeId>; 4] = [None; 4];
        for &which in stats {
            let child = self.intern(
                MetaData::scalar(dtype),
                NodeKind::SummaryItem { which },
                vec![summary],
            );
            children[which as usize] = Some(child);
        }
        if let NodeKind::Summary { min, max, mean, std } = &mut self.nodes[summary.index()].kind {
            *min = children[StatKind::Min as usize];
            *max = children[StatKind::Max as usize];
            *mean = children[StatKind::Mean as usize];
            *std = children[StatKind::Std as usize];
        }
        summary
    }

    /// A wavefront scan over `prev` starting at cell `start`.
    pub fn radial(&mut self, prev: NodeId, start: Coord) -> NodeId {
        let meta = self.node(prev).meta.clone();
        assert_eq!(start.len(), meta.num_dim.ndim());
        self.intern(meta, NodeKind::Radial { start }, vec![prev])
    }

    /// A cell-wise copy.
    pub fn identity(&mut self, prev: NodeId) -> NodeId {
        let meta = self.node(prev).meta.clone();
        self.intern(meta, NodeKind::Identity, vec![prev])
    }

    // =========================================================================
    // Loop Gadget
    // =========================================================================

    /// The loop continuation condition over a scalar predicate.
    pub fn loop_cond(&mut self, pred: NodeId) -> NodeId {
        assert_eq!(self.node(pred).meta.num_dim, NumDim::D0);
        self.intern(MetaData::scalar(DataType::B8), NodeKind::LoopCond, vec![pred])
    }

    /// The loop entry boundary over an initial value.
    pub fn loop_head(&mut self, init: NodeId) -> NodeId {
        let meta = self.node(init).meta.clone();
        self.intern(meta, NodeKind::LoopHead, vec![init])
    }

    /// Selects between the initial value and the fed-back value.
    pub fn switch(&mut self, cond: NodeId, initial: NodeId, fed: NodeId) -> NodeId {
        let meta = self.node(initial).meta.clone();
        self.intern(meta, NodeKind::Switch, vec![cond, initial, fed])
    }

    /// The loop exit boundary. Predecessor slot 0 is the condition, slot 1
    /// the switch (see [`Node::switch_input`]).
    pub fn loop_tail(&mut self, cond: NodeId, switch: NodeId) -> NodeId {
        let meta = self.node(switch).meta.clone();
        self.intern(meta, NodeKind::LoopTail, vec![cond, switch])
    }

    /// The feed-in endpoint of a loop-carried value, hanging off the loop
    /// head. Its twin is linked once [`Runtime::feedback_out`] exists.
    pub fn feedback_in(&mut self, head: NodeId) -> NodeId {
        let meta = self.node(head).meta.clone();
        self.intern(
            meta,
            NodeKind::Feedback {
                feed_in: true,
                twin: None,
            },
            vec![head],
        )
    }

    /// The feed-out endpoint over the iterated result; links the twins
    /// symmetrically.
    pub fn feedback_out(&mut self, feed_in: NodeId, result: NodeId) -> NodeId {
        assert!(matches!(
            self.node(feed_in).kind,
            NodeKind::Feedback { feed_in: true, .. }
        ));
        let meta = self.node(feed_in).meta.clone();
        let feed_out = self.intern(
            meta,
            NodeKind::Feedback {
                feed_in: false,
                twin: None,
            },
            vec![result],
        );
        if let NodeKind::Feedback { twin, .. } = &mut self.nodes[feed_in.index()].kind {
            *twin = Some(feed_out);
        }
        if let NodeKind::Feedback { twin, .. } = &mut self.nodes[feed_out.index()].kind {
            *twin = Some(feed_in);
        }
        feed_out
    }

    // =========================================================================
    // Constant Folding
    // =========================================================================

    /// Folds the value of `node` at block coordinate `coord` from the entries
    /// of its predecessors, updating `map`. Entries the node cannot fold stay
    /// (or become) unknown.
    pub fn compute_fixed(
        &self,
        node: NodeId,
        coord: &Coord,
        map: &mut FxHashMap<(NodeId, Coord), ValFix>,
    ) {
        let n = self.node(node);
        let key = (node, coord.clone());
        let fix = match &n.kind {
            NodeKind::Constant { value } => ValFix::fixed(*value),
            NodeKind::Read { .. } | NodeKind::Index { .. } => {
                // Inputs keep whatever the block cache seeded.
                map.entry(key).or_insert_with(ValFix::unknown);
                return;
            }
            NodeKind::Unary { op } => match self.fixed_of(n.prev[0], coord, map) {
                Some(v) => ValFix::fixed(Value::from_f64(
                    fold_unary(*op, v.as_f64()),
                    n.meta.data_type,
                )),
                None => ValFix::unknown(),
            },
            NodeKind::Binary { op } => self.fold_binary(n, *op, coord, map),
            NodeKind::Neighbor { .. }
            | NodeKind::Convolution { .. }
            | NodeKind::FocalFunc { .. }
            | NodeKind::FocalPercent { .. } => self.fold_focal(n, coord, map),
            NodeKind::FocalFlow | NodeKind::Radial { .. } => ValFix::unknown(),
            NodeKind::Zonal { op } => match self.fixed_of(n.prev[0], coord, map) {
                Some(v) if matches!(op, ReduceOp::Min | ReduceOp::Max | ReduceOp::Mean) => {
                    ValFix::fixed(v.convert(n.meta.data_type))
                }
                _ => ValFix::unknown(),
            },
            NodeKind::Summary { .. } => match self.fixed_of(n.prev[0], coord, map) {
                Some(v) => ValFix::fixed(v.convert(n.meta.data_type)),
                None => ValFix::unknown(),
            },
            NodeKind::SummaryItem { which } => match self.fixed_of(n.prev[0], coord, map) {
                Some(v) => {
                    let folded = match which {
                        StatKind::Std => Value::zero(n.meta.data_type),
                        _ => v.convert(n.meta.data_type),
                    };
                    ValFix::fixed(folded)
                }
                None => ValFix::unknown(),
            },
            NodeKind::Switch => match self.fixed_of(n.prev[0], coord, map) {
                Some(cond) => {
                    let chosen = if cond.as_bool() { n.prev[1] } else { n.prev[2] };
                    match self.fixed_of(chosen, coord, map) {
                        Some(v) => ValFix::fixed(v),
                        None => ValFix::unknown(),
                    }
                }
                None => ValFix::unknown(),
            },
            NodeKind::LoopTail => match self.fixed_of(n.switch_input(), coord, map) {
                Some(v) => ValFix::fixed(v),
                None => ValFix::unknown(),
            },
            NodeKind::Write { .. }
            | NodeKind::Identity
            | NodeKind::LoopCond
            | NodeKind::LoopHead
            | NodeKind::Feedback { .. } => match self.fixed_of(n.prev[0], coord, map) {
                Some(v) => ValFix::fixed(v),
                None => ValFix::unknown(),
            },
        };
        map.insert(key, fix);
    }

    fn fixed_of(
        &self,
        id: NodeId,
        coord: &Coord,
        map: &FxHashMap<(NodeId, Coord), ValFix>,
    ) -> Option<Value> {
        // Scalar predecessors live at the empty coordinate and broadcast.
        let fix = map
            .get(&(id, coord.clone()))
            .or_else(|| map.get(&(id, Coord::new())))?;
        if fix.fixed {
            fix.value
        } else {
            None
        }
    }

    fn fold_binary(
        &self,
        n: &Node,
        op: BinaryOp,
        coord: &Coord,
        map: &FxHashMap<(NodeId, Coord), ValFix>,
    ) -> ValFix {
        let lhs = self.fixed_of(n.prev[0], coord, map);
        let rhs = self.fixed_of(n.prev[1], coord, map);
        // Absorbing elements fold even when the other side is unknown.
        let absorbed = match op {
            BinaryOp::Mul => [lhs, rhs]
                .iter()
                .flatten()
                .any(|v| v.as_f64() == 0.0)
                .then(|| Value::zero(n.meta.data_type)),
            BinaryOp::And => [lhs, rhs]
                .iter()
                .flatten()
                .any(|v| !v.as_bool())
                .then_some(Value::B8(false)),
            BinaryOp::Or => [lhs, rhs]
                .iter()
                .flatten()
                .any(|v| v.as_bool())
                .then_some(Value::B8(true)),
            _ => None,
        };
        if let Some(v) = absorbed {
            return ValFix::fixed(v);
        }
        match (lhs, rhs) {
            (Some(a), Some(b)) => ValFix::fixed(Value::from_f64(
                fold_binary(op, a.as_f64(), b.as_f64()),
                n.meta.data_type,
            )),
            _ => ValFix::unknown(),
        }
    }

    fn fold_focal(
        &self,
        n: &Node,
        coord: &Coord,
        map: &FxHashMap<(NodeId, Coord), ValFix>,
    ) -> ValFix {
        let ndim = n.meta.num_dim.ndim();
        let space = n.input_reach(ndim).block_space(&n.meta.block_size);
        let mut uniform: Option<Value> = None;
        for offset in &space {
            let at: Coord = coord.iter().zip(offset).map(|(c, o)| c + o).collect();
            match self.fixed_of(n.prev[0], &at, map) {
                Some(v) => match uniform {
                    Some(u) if u == v => {}
                    Some(_) => return ValFix::unknown(),
                    None => uniform = Some(v),
                },
                None => return ValFix::unknown(),
            }
        }
        let Some(v) = uniform else {
            return ValFix::unknown();
        };
        let folded = match &n.kind {
            NodeKind::Neighbor { .. } => v,
            NodeKind::Convolution { weights, .. } => Value::from_f64(
                v.as_f64() * weights.iter().sum::<f64>(),
                n.meta.data_type,
            ),
            NodeKind::FocalFunc { op, window } => match op {
                FocalOp::Sum => Value::from_f64(
                    v.as_f64() * window.offsets().len() as f64,
                    n.meta.data_type,
                ),
                FocalOp::Min | FocalOp::Max | FocalOp::Mean => v.convert(n.meta.data_type),
            },
            NodeKind::FocalPercent { op, .. } => {
                let share = match op {
                    PercentOp::Greater => 0.0,
                    PercentOp::Equal => 1.0,
                };
                Value::from_f64(share, n.meta.data_type)
            }
            _ => unreachable!(),
        };
        ValFix::fixed(folded)
    }
}

fn promote(a: DataType, b: DataType) -> DataType {
    fn rank(t: DataType) -> u8 {
        match t {
            DataType::B8 => 0,
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 3,
            DataType::I64 => 4,
            DataType::F32 => 5,
            DataType::F64 => 6,
        }
    }
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}

fn fold_unary(op: UnaryOp, v: f64) -> f64 {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Not => f64::from(v == 0.0),
        UnaryOp::Abs => v.abs(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
        UnaryOp::Sin => v.sin(),
        UnaryOp::Cos => v.cos(),
        UnaryOp::Tanh => v.tanh(),
    }
}

fn fold_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Eq => f64::from(a == b),
        BinaryOp::Ne => f64::from(a != b),
        BinaryOp::Lt => f64::from(a < b),
        BinaryOp::Gt => f64::from(a > b),
        BinaryOp::And => f64::from(a != 0.0 && b != 0.0),
        BinaryOp::Or => f64::from(a != 0.0 || b != 0.0),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MemOrder;

    fn raster_meta() -> MetaData {
        MetaData::new(
            NumDim::D2,
            vec![8, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        )
    }

    #[test]
    fn test_cse_returns_identical_handles() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let a = rt.unary(UnaryOp::Neg, r);
        let b = rt.unary(UnaryOp::Neg, r);
        assert_eq!(a, b);
        assert_eq!(rt.len(), 2);

        let c = rt.unary(UnaryOp::Abs, r);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cse_distinguishes_constants() {
        let mut rt = Runtime::new();
        let one = rt.scalar_constant(Value::F64(1.0));
        let one_again = rt.scalar_constant(Value::F64(1.0));
        let two = rt.scalar_constant(Value::F64(2.0));
        assert_eq!(one, one_again);
        assert_ne!(one, two);
    }

    #[test]
    fn test_successor_lists_stay_symmetric() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let neg = rt.unary(UnaryOp::Neg, r);
        let w = rt.write(neg, "out");
        assert_eq!(rt.node(r).next, vec![neg]);
        assert_eq!(rt.node(neg).next, vec![w]);
        assert_eq!(rt.node(w).prev, vec![neg]);
    }

    #[test]
    fn test_binary_type_promotion() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let c = rt.scalar_constant(Value::F64(2.0));
        let mul = rt.binary(BinaryOp::Mul, r, c);
        assert_eq!(rt.node(mul).meta.data_type, DataType::F64);
        assert_eq!(rt.node(mul).meta.num_dim, NumDim::D2);

        let cmp = rt.binary(BinaryOp::Lt, r, c);
        assert_eq!(rt.node(cmp).meta.data_type, DataType::B8);
    }

    #[test]
    fn test_summary_children_are_positioned() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let s = rt.summary(r, &[StatKind::Min, StatKind::Max]);
        let NodeKind::Summary { min, max, mean, .. } = &rt.node(s).kind else {
            panic!("not a summary");
        };
        assert!(min.is_some() && max.is_some() && mean.is_none());
        assert_eq!(rt.node(min.unwrap()).prev, vec![s]);
    }

    #[test]
    fn test_feedback_twins_link_both_ways() {
        let mut rt = Runtime::new();
        let init = rt.read(raster_meta(), "dem");
        let head = rt.loop_head(init);
        let fin = rt.feedback_in(head);
        let fout = rt.feedback_out(fin, head);
        let NodeKind::Feedback { twin: t1, feed_in } = &rt.node(fin).kind else {
            panic!()
        };
        let NodeKind::Feedback { twin: t2, .. } = &rt.node(fout).kind else {
            panic!()
        };
        assert!(*feed_in);
        assert_eq!(*t1, Some(fout));
        assert_eq!(*t2, Some(fin));
    }

    #[test]
    fn test_loop_tail_positional_contract() {
        let mut rt = Runtime::new();
        let init = rt.read(raster_meta(), "dem");
        let zero = rt.scalar_constant(Value::I32(0));
        let cond = rt.loop_cond(zero);
        let head = rt.loop_head(init);
        let fin = rt.feedback_in(head);
        let sw = rt.switch(cond, head, fin);
        let tail = rt.loop_tail(cond, sw);
        assert_eq!(rt.node(tail).switch_input(), sw);
    }

    #[test]
    fn test_constant_folding_through_locals() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(3.0), raster_meta());
        let neg = rt.unary(UnaryOp::Neg, c);
        let two = rt.scalar_constant(Value::F32(2.0));
        let mul = rt.binary(BinaryOp::Mul, neg, two);

        let mut map = FxHashMap::default();
        let coord = vec![0, 0];
        rt.compute_fixed(c, &coord, &mut map);
        rt.compute_fixed(two, &Coord::new(), &mut map);
        rt.compute_fixed(neg, &coord, &mut map);
        rt.compute_fixed(mul, &coord, &mut map);

        let out = map[&(mul, coord)];
        assert!(out.fixed);
        assert_eq!(out.value, Some(Value::F32(-6.0)));
    }

    #[test]
    fn test_multiply_by_fixed_zero_absorbs() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let zero = rt.constant(Value::F32(0.0), raster_meta());
        let mul = rt.binary(BinaryOp::Mul, r, zero);

        let mut map = FxHashMap::default();
        let coord = vec![1, 1];
        rt.compute_fixed(zero, &coord, &mut map);
        rt.compute_fixed(mul, &coord, &mut map);
        assert_eq!(map[&(mul, coord)].value, Some(Value::F32(0.0)));
    }

    #[test]
    fn test_focal_fold_needs_uniform_neighborhood() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(1.0), raster_meta());
        let conv = rt.convolution(c, &[3, 3], vec![1.0; 9]);

        let mut map = FxHashMap::default();
        // All nine neighbor blocks fold to the same constant.
        for dy in -1..=1 {
            for dx in -1..=1 {
                rt.compute_fixed(c, &vec![dy, dx], &mut map);
            }
        }
        rt.compute_fixed(conv, &vec![0, 0], &mut map);
        assert_eq!(map[&(conv, vec![0, 0])].value, Some(Value::F32(9.0)));
    }
}
