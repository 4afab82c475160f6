//! Blocks at the Task Boundary
//!
//! The block cache and I/O layer live outside the engine; what crosses the
//! boundary is the [`Block`] descriptor: key, hold type, remaining consumer
//! count, prediction state (value / fixed / forward), per-block statistics
//! and an opaque storage entry handle.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use atlas_core::node::HoldType;
use atlas_core::value::{CellStats, Value};

use crate::job::BlockKey;

/// Opaque handle of a storage slot owned by the external block cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

/// A request emitted by `blocks_to_load` / `blocks_to_store`: which block,
/// how it is held, and how many consumers remain.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRequest {
    /// The addressed block.
    pub key: BlockKey,
    /// How the block is passed to kernels.
    pub hold: HoldType,
    /// Remaining consumer count; -1 when not tracked.
    pub depend: i64,
}

/// One block as seen by the prediction and dispatch phases.
#[derive(Debug, Clone)]
pub struct Block {
    /// The addressed block.
    pub key: BlockKey,
    /// How the block is passed to kernels.
    pub hold: HoldType,
    /// Remaining consumer count; -1 when not tracked.
    pub depend: i64,
    /// Folded scalar value, when known.
    pub value: Option<Value>,
    /// Whether every cell equals `value`.
    pub fixed: bool,
    /// Whether the block's storage is forwarded from an input block.
    pub forward: bool,
    /// Per-block summary statistics, when known.
    pub stats: Option<CellStats>,
    /// Storage slot in the external cache, when bound.
    pub entry: Option<EntryId>,
}

impl Block {
    /// An unbound block descriptor.
    pub fn new(key: BlockKey, hold: HoldType) -> Self {
        Self {
            key,
            hold,
            depend: -1,
            value: None,
            fixed: false,
            forward: false,
            stats: None,
            entry: None,
        }
    }

    /// A block descriptor built from a load/store request.
    pub fn from_request(req: &BlockRequest) -> Self {
        let mut block = Self::new(req.key.clone(), req.hold);
        block.depend = req.depend;
        block
    }

    /// Marks the block as holding the single value `v` everywhere.
    pub fn set_fixed(&mut self, v: Value) {
        self.value = Some(v);
        self.fixed = true;
        self.stats = Some(CellStats::uniform(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::node::NodeId;

    #[test]
    fn test_fixed_block_carries_uniform_stats() {
        let key = BlockKey::new(NodeId::from_index(0), vec![0, 0]);
        let mut block = Block::new(key, HoldType::HoldN);
        assert!(!block.fixed && block.stats.is_none());
        block.set_fixed(Value::F32(2.0));
        assert!(block.fixed);
        assert_eq!(block.stats.unwrap().min, Value::F32(2.0));
    }
}
