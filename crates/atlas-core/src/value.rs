//! Scalar Values and Cell Statistics
//!
//! [`Value`] is the variant scalar flowing through constant folding, scalar
//! tasks and kernel arguments. [`CellStats`] summarizes one block,
//! [`NodeStats`] aggregates per-node summaries across blocks, and [`ValFix`]
//! is the per-coordinate folding state used by value prediction.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::meta::DataType;

// =============================================================================
// Value
// =============================================================================

/// A scalar of one of the supported cell types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Boolean cell.
    B8(bool),
    /// Unsigned 8-bit cell.
    U8(u8),
    /// Signed 16-bit cell.
    I16(i16),
    /// Signed 32-bit cell.
    I32(i32),
    /// Signed 64-bit cell.
    I64(i64),
    /// 32-bit float cell.
    F32(f32),
    /// 64-bit float cell.
    F64(f64),
}

impl Value {
    /// The data type of this value.
    pub fn data_type(self) -> DataType {
        match self {
            Self::B8(_) => DataType::B8,
            Self::U8(_) => DataType::U8,
            Self::I16(_) => DataType::I16,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
        }
    }

    /// Widens to `f64` for folding arithmetic.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::B8(v) => f64::from(u8::from(v)),
            Self::U8(v) => f64::from(v),
            Self::I16(v) => f64::from(v),
            Self::I32(v) => f64::from(v),
            Self::I64(v) => v as f64,
            Self::F32(v) => f64::from(v),
            Self::F64(v) => v,
        }
    }

    /// Truthiness used by loop conditions and logic operators.
    pub fn as_bool(self) -> bool {
        self.as_f64() != 0.0
    }

    /// Narrows an `f64` back into `dtype`.
    pub fn from_f64(v: f64, dtype: DataType) -> Self {
        match dtype {
            DataType::B8 => Self::B8(v != 0.0),
            DataType::U8 => Self::U8(v as u8),
            DataType::I16 => Self::I16(v as i16),
            DataType::I32 => Self::I32(v as i32),
            DataType::I64 => Self::I64(v as i64),
            DataType::F32 => Self::F32(v as f32),
            DataType::F64 => Self::F64(v),
        }
    }

    /// Converts to another cell type.
    pub fn convert(self, dtype: DataType) -> Self {
        Self::from_f64(self.as_f64(), dtype)
    }

    /// The additive zero of `dtype`.
    pub fn zero(dtype: DataType) -> Self {
        Self::from_f64(0.0, dtype)
    }
}

// =============================================================================
// Cell Statistics
// =============================================================================

/// Summary statistics of one block. Mean and standard deviation are only
/// present when a reduction actually produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellStats {
    /// Whether the record holds meaningful data.
    pub active: bool,
    /// Cell type the statistics refer to.
    pub data_type: DataType,
    /// Minimum cell value.
    pub min: Value,
    /// Maximum cell value.
    pub max: Value,
    /// Mean cell value, when one was computed.
    pub mean: Option<Value>,
    /// Standard deviation of cell values, when one was computed.
    pub std: Option<Value>,
}

impl CellStats {
    /// An inactive record with the widest possible range for `dtype`.
    pub fn default_for(dtype: DataType) -> Self {
        let (lo, hi) = match dtype {
            DataType::B8 => (0.0, 1.0),
            DataType::U8 => (0.0, f64::from(u8::MAX)),
            DataType::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            DataType::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            DataType::I64 => (i64::MIN as f64, i64::MAX as f64),
            DataType::F32 => (f64::from(f32::MIN), f64::from(f32::MAX)),
            DataType::F64 => (f64::MIN, f64::MAX),
        };
        Self {
            active: false,
            data_type: dtype,
            min: Value::from_f64(lo, dtype),
            max: Value::from_f64(hi, dtype),
            mean: None,
            std: None,
        }
    }

    /// A record where every cell holds the single value `v`.
    pub fn uniform(v: Value) -> Self {
        Self {
            active: true,
            data_type: v.data_type(),
            min: v,
            max: v,
            mean: Some(v),
            std: Some(Value::zero(v.data_type())),
        }
    }
}

/// Per-node aggregation of block statistics, filled as jobs complete.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Whether aggregation is enabled for the node.
    pub active: bool,
    /// Running minimum across blocks.
    pub min: Option<Value>,
    /// Running maximum across blocks.
    pub max: Option<Value>,
    /// Per-block records indexed by flattened block coordinate.
    pub per_block: Vec<Option<CellStats>>,
}

impl NodeStats {
    /// An active aggregation sized for `num_blocks` blocks.
    pub fn sized(num_blocks: usize) -> Self {
        Self {
            active: true,
            min: None,
            max: None,
            per_block: vec![None; num_blocks],
        }
    }

    /// Integrates one block record at flattened position `pos`.
    pub fn set(&mut self, pos: usize, stats: CellStats) {
        let lo = stats.min.as_f64();
        let hi = stats.max.as_f64();
        self.min = Some(match self.min {
            Some(m) if m.as_f64() <= lo => m,
            _ => stats.min,
        });
        self.max = Some(match self.max {
            Some(m) if m.as_f64() >= hi => m,
            _ => stats.max,
        });
        self.per_block[pos] = Some(stats);
    }
}

// =============================================================================
// Folding State
// =============================================================================

/// Constant-folding outcome for one (node, coordinate) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValFix {
    /// Folded value, when one is known.
    pub value: Option<Value>,
    /// Whether every cell of the block is known to equal `value`.
    pub fixed: bool,
    /// Statistics attached to the block, when known.
    pub stats: Option<CellStats>,
}

impl ValFix {
    /// Nothing is known about the block.
    pub fn unknown() -> Self {
        Self {
            value: None,
            fixed: false,
            stats: None,
        }
    }

    /// The whole block folds to the single value `v`.
    pub fn fixed(v: Value) -> Self {
        Self {
            value: Some(v),
            fixed: true,
            stats: Some(CellStats::uniform(v)),
        }
    }

    /// Whether any information was derived.
    pub fn active(&self) -> bool {
        self.stats.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let v = Value::F32(2.5);
        assert_eq!(v.data_type(), DataType::F32);
        assert_eq!(v.convert(DataType::I32), Value::I32(2));
        assert!(Value::B8(true).as_bool());
        assert!(!Value::I32(0).as_bool());
    }

    #[test]
    fn test_uniform_stats() {
        let s = CellStats::uniform(Value::F64(3.0));
        assert!(s.active);
        assert_eq!(s.min, s.max);
        assert_eq!(s.mean, Some(Value::F64(3.0)));
        assert_eq!(s.std, Some(Value::F64(0.0)));
        // Records without a computed moment leave the fields unset.
        assert_eq!(CellStats::default_for(DataType::F32).mean, None);
    }

    #[test]
    fn test_node_stats_running_bounds() {
        let mut ns = NodeStats::sized(4);
        ns.set(0, CellStats::uniform(Value::F64(5.0)));
        ns.set(2, CellStats::uniform(Value::F64(-1.0)));
        assert_eq!(ns.min.unwrap().as_f64(), -1.0);
        assert_eq!(ns.max.unwrap().as_f64(), 5.0);
        assert!(ns.per_block[1].is_none());
    }

    #[test]
    fn test_valfix_states() {
        assert!(!ValFix::unknown().active());
        let fx = ValFix::fixed(Value::I32(7));
        assert!(fx.fixed && fx.active());
        assert_eq!(fx.stats.unwrap().max, Value::I32(7));
    }
}
