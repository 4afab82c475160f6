//! Node Graph - Operations of the Tiled Map-Algebra DAG
//!
//! Nodes form a directed acyclic graph over tiled rasters. The subkind set is
//! closed, so operations are one [`NodeKind`] variant each and every dispatch
//! is an exhaustive match. Predecessor lists are positional (their order is a
//! contract, see [`Node::switch_input`]); successor lists are unordered.
//! Nodes are owned by the [`Runtime`](crate::runtime::Runtime) arena and refer
//! to each other through [`NodeId`] only.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::fmt::Write as _;

use crate::mask::Mask;
use crate::meta::{in_range, Coord, MetaData, NumBlock, NumDim};
use crate::pattern::Pattern;
use crate::value::Value;

// =============================================================================
// Identifiers
// =============================================================================

/// Arena index of a node. Monotonic in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Rebuilds an id from a raw arena index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// =============================================================================
// Operator Sets
// =============================================================================

/// Cell-wise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
}

/// Cell-wise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    And,
    Or,
}

/// Zonal (whole-raster) reduction operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    Mean,
}

/// Neighborhood aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FocalOp {
    Sum,
    Min,
    Max,
    Mean,
}

/// Relation tested by a focal-percent node against the center cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PercentOp {
    Greater,
    Equal,
}

/// Statistic produced by a summary child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StatKind {
    Min,
    Max,
    Mean,
    Std,
}

// =============================================================================
// NodeKind
// =============================================================================

/// The closed set of node subkinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Compile-time constant raster or scalar.
    Constant {
        /// The cell value.
        value: Value,
    },
    /// Cell index along one dimension.
    Index {
        /// Queried axis.
        dim: usize,
    },
    /// Raster read from external storage.
    Read {
        /// Storage locator.
        path: String,
    },
    /// Raster written to external storage.
    Write {
        /// Storage locator.
        path: String,
    },
    /// Cell-wise unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
    },
    /// Cell-wise binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
    },
    /// Access to a single shifted neighbor cell.
    Neighbor {
        /// Cell offset of the accessed neighbor.
        offset: Coord,
    },
    /// Weighted window sum.
    Convolution {
        /// Neighborhood window.
        window: Mask,
        /// Row-major cell weights.
        weights: Vec<f64>,
    },
    /// Window aggregation.
    FocalFunc {
        /// Aggregator.
        op: FocalOp,
        /// Neighborhood window.
        window: Mask,
    },
    /// Share of window cells relating to the center cell.
    FocalPercent {
        /// Tested relation.
        op: PercentOp,
        /// Neighborhood window.
        window: Mask,
    },
    /// Steepest-descent flow direction over the 3x3 neighborhood.
    FocalFlow,
    /// Whole-raster reduction to a scalar.
    Zonal {
        /// Reduction operator.
        op: ReduceOp,
    },
    /// Umbrella statistics node; children are queried by statistic.
    Summary {
        /// Child computing the minimum, when requested.
        min: Option<NodeId>,
        /// Child computing the maximum, when requested.
        max: Option<NodeId>,
        /// Child computing the mean, when requested.
        mean: Option<NodeId>,
        /// Child computing the standard deviation, when requested.
        std: Option<NodeId>,
    },
    /// One statistic of a summary node.
    SummaryItem {
        /// Which statistic this child yields.
        which: StatKind,
    },
    /// Wavefront scan expanding from a start cell.
    Radial {
        /// Scan origin in cell coordinates.
        start: Coord,
    },
    /// Loop continuation condition (scalar).
    LoopCond,
    /// Loop entry boundary.
    LoopHead,
    /// Loop exit boundary; consumes the switch at predecessor slot 1.
    LoopTail,
    /// Selects between initial and fed-back value.
    Switch,
    /// Loop feedback endpoint; twins link feed-in and feed-out.
    Feedback {
        /// `true` for the feed-in side, `false` for feed-out.
        feed_in: bool,
        /// The twin endpoint, linked after both exist.
        twin: Option<NodeId>,
    },
    /// Cell-wise copy.
    Identity,
}

// =============================================================================
// Node
// =============================================================================

/// One operation of the DAG.
#[derive(Debug, Clone)]
pub struct Node {
    /// Arena id, monotonic in creation order.
    pub id: NodeId,
    /// Static raster attributes.
    pub meta: MetaData,
    /// Subkind and intrinsic attributes.
    pub kind: NodeKind,
    /// Positional predecessor list.
    pub prev: Vec<NodeId>,
    /// Unordered successor list.
    pub next: Vec<NodeId>,
}

impl Node {
    /// Data-access pattern of this node.
    pub fn pattern(&self) -> Pattern {
        match &self.kind {
            NodeKind::Constant { .. } | NodeKind::Index { .. } => Pattern::FREE,
            NodeKind::Read { .. } => Pattern::INPUT,
            NodeKind::Write { .. }
            | NodeKind::Unary { .. }
            | NodeKind::Binary { .. }
            | NodeKind::Identity => Pattern::LOCAL,
            NodeKind::Switch => Pattern::LOOP + Pattern::LOCAL,
            NodeKind::Neighbor { .. }
            | NodeKind::Convolution { .. }
            | NodeKind::FocalFunc { .. }
            | NodeKind::FocalPercent { .. }
            | NodeKind::FocalFlow => Pattern::FOCAL,
            NodeKind::Zonal { .. } | NodeKind::SummaryItem { .. } => Pattern::ZONAL,
            NodeKind::Summary { .. } => Pattern::ZONAL + Pattern::STATS,
            NodeKind::Radial { .. } => Pattern::RADIAL,
            NodeKind::LoopCond => Pattern::LOOP,
            NodeKind::LoopHead => Pattern::HEAD,
            NodeKind::LoopTail => Pattern::TAIL,
            NodeKind::Feedback { feed_in, .. } => {
                if *feed_in {
                    Pattern::HEAD
                } else {
                    Pattern::LOOP
                }
            }
        }
    }

    /// Cell offsets this node reads around each coordinate, in a space of
    /// `ndim` axes (the owning cluster's dimensionality).
    pub fn input_reach(&self, ndim: usize) -> Mask {
        match &self.kind {
            NodeKind::Convolution { window, .. }
            | NodeKind::FocalFunc { window, .. }
            | NodeKind::FocalPercent { window, .. }
                if window.ndim() == ndim =>
            {
                window.clone()
            }
            NodeKind::FocalFlow if ndim > 0 => Mask::full(&vec![3; ndim]),
            NodeKind::Neighbor { offset } if offset.len() == ndim => {
                let size: Vec<i32> = offset.iter().map(|o| 2 * o.abs() + 1).collect();
                let cells = mask_cells_for_offset(&size, offset);
                Mask::with_cells(&size, cells)
            }
            _ => Mask::identity(ndim),
        }
    }

    /// Cell offsets this node influences around each coordinate.
    pub fn output_reach(&self, ndim: usize) -> Mask {
        Mask::identity(ndim)
    }

    /// One-character kind tag used in kernel signatures.
    pub fn class_signature(&self) -> char {
        self.kind.class_signature()
    }

    /// Stable per-node signature; cluster signatures concatenate these.
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        sig.push(self.class_signature());
        sig.push(self.meta.data_type.code());
        let _ = write!(sig, "{}", self.meta.num_dim.ndim());
        match &self.kind {
            NodeKind::Unary { op } => {
                let _ = write!(sig, ":{op:?}");
            }
            NodeKind::Binary { op } => {
                let _ = write!(sig, ":{op:?}");
            }
            NodeKind::Zonal { op } => {
                let _ = write!(sig, ":{op:?}");
            }
            NodeKind::FocalFunc { op, window } => {
                let _ = write!(sig, ":{op:?}{:?}", window.size());
            }
            NodeKind::FocalPercent { op, window } => {
                let _ = write!(sig, ":{op:?}{:?}", window.size());
            }
            NodeKind::Convolution { window, .. } => {
                let _ = write!(sig, ":{:?}", window.size());
            }
            NodeKind::SummaryItem { which } => {
                let _ = write!(sig, ":{which:?}");
            }
            _ => {}
        }
        sig
    }
}

impl NodeKind {
    /// One-character kind tag.
    pub fn class_signature(&self) -> char {
        match self {
            NodeKind::Constant { .. } => 'C',
            NodeKind::Index { .. } => 'I',
            NodeKind::Read { .. } => 'R',
            NodeKind::Write { .. } => 'W',
            NodeKind::Unary { .. } => 'U',
            NodeKind::Binary { .. } => 'B',
            NodeKind::Neighbor { .. } => 'N',
            NodeKind::Convolution { .. } => 'V',
            NodeKind::FocalFunc { .. } => 'F',
            NodeKind::FocalPercent { .. } => 'P',
            NodeKind::FocalFlow => 'O',
            NodeKind::Zonal { .. } => 'Z',
            NodeKind::Summary { .. } => 'S',
            NodeKind::SummaryItem { .. } => 'M',
            NodeKind::Radial { .. } => 'A',
            NodeKind::LoopCond => 'L',
            NodeKind::LoopHead => 'H',
            NodeKind::LoopTail => 'T',
            NodeKind::Switch => 'X',
            NodeKind::Feedback { .. } => 'D',
            NodeKind::Identity => 'E',
        }
    }
}

impl Node {
    /// Whether this node is provided from outside (demand-loaded blocks).
    pub fn is_input(&self) -> bool {
        matches!(self.kind, NodeKind::Read { .. })
    }

    /// Whether this node persists its raster to external storage.
    pub fn is_output(&self) -> bool {
        matches!(self.kind, NodeKind::Write { .. })
    }

    /// Whether this node reduces a raster to a scalar.
    pub fn is_reduction(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Zonal { .. } | NodeKind::Summary { .. } | NodeKind::SummaryItem { .. }
        )
    }

    /// Whether the node is a cell-aligned single-input operation whose output
    /// block may reuse the storage of its input block.
    pub fn can_forward(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Unary { .. } | NodeKind::Write { .. } | NodeKind::Identity
        )
    }

    /// The switch feeding a loop tail. Positional contract: predecessor
    /// slot 0 is the loop condition, slot 1 the switch.
    pub fn switch_input(&self) -> NodeId {
        assert!(matches!(self.kind, NodeKind::LoopTail));
        self.prev[1]
    }

    /// How a block of this node at `coord` is passed to a kernel.
    pub fn hold_type(&self, coord: &Coord, num_block: &NumBlock) -> HoldType {
        if !in_range(coord, num_block) {
            HoldType::Hold0
        } else if self.meta.num_dim == NumDim::D0 {
            HoldType::Hold1
        } else {
            HoldType::HoldN
        }
    }
}

fn mask_cells_for_offset(size: &[i32], offset: &[i32]) -> Vec<bool> {
    let total: usize = size.iter().map(|s| *s as usize).product();
    let mut cells = vec![false; total];
    let mut idx = 0usize;
    for (axis, off) in offset.iter().enumerate() {
        let pos = off + size[axis] / 2;
        idx = idx * size[axis] as usize + pos as usize;
    }
    cells[idx] = true;
    cells
}

// =============================================================================
// Hold Types
// =============================================================================

/// How a block argument is passed to a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldType {
    /// No storage: the coordinate lies outside the raster.
    Hold0,
    /// A single scalar cell.
    Hold1,
    /// A full block buffer.
    HoldN,
}

// =============================================================================
// Tests
// =============================================================================
