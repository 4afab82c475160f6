//! Atlas Core - Foundation Layer for the Atlas Map-Algebra Middle-End
//!
//! This crate provides the building blocks the fusion and task layers stand
//! on: the pattern algebra governing fusion legality, the node graph with its
//! interning factory, spatial reach masks, scalar values with block
//! statistics, visitor dispatch, and the shared configuration and clock.
//!
//! # Example
//! ```rust
//! use atlas_core::prelude::*;
//!
//! let mut rt = Runtime::new();
//! let meta = MetaData::new(NumDim::D2, vec![8, 8], DataType::F32,
//!                          MemOrder::RowMajor, vec![4, 4]);
//! let dem = rt.read(meta, "dem");
//! let neg = rt.unary(UnaryOp::Neg, dem);
//! let out = rt.write(neg, "out");
//! assert!(rt.node(out).pattern().is(Pattern::LOCAL));
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]

// =============================================================================
// Modules
// =============================================================================

pub mod clock;
pub mod config;
pub mod error;
pub mod mask;
pub mod meta;
pub mod node;
pub mod pattern;
pub mod runtime;
pub mod value;
pub mod visitor;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, Counter, Region, TimedRegion};
pub use config::Config;
pub use error::{Error, Result};
pub use mask::{flat, pipe, Mask};
pub use meta::{
    coord_add, in_range, iter_space, prod, BlockSize, Coord, DataSize, DataType, GroupSize,
    MemOrder, MetaData, NumBlock, NumDim,
};
pub use node::{
    BinaryOp, FocalOp, HoldType, Node, NodeId, NodeKind, PercentOp, ReduceOp, StatKind, UnaryOp,
};
pub use pattern::{can_flat_fuse, can_pipe_fuse, Pattern};
pub use runtime::Runtime;
pub use value::{CellStats, NodeStats, ValFix, Value};
pub use visitor::{accept, walk, Visitor};

// =============================================================================
// Prelude
// =============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::clock::{Clock, Counter, Region};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::mask::Mask;
    pub use crate::meta::{Coord, DataType, MemOrder, MetaData, NumDim};
    pub use crate::node::{
        BinaryOp, FocalOp, HoldType, NodeId, NodeKind, ReduceOp, StatKind, UnaryOp,
    };
    pub use crate::pattern::Pattern;
    pub use crate::runtime::Runtime;
    pub use crate::value::{CellStats, ValFix, Value};
}
