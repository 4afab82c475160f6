//! Node Metadata - Dimensionality, Data Types, and Block Coordinates
//!
//! Every node carries a [`MetaData`] record fixing its dimensionality, raster
//! extent, element type, memory order and block size. Block coordinates are
//! small integer vectors ([`Coord`]) with the helpers the job engine needs:
//! range checks, element-wise addition, and dense space iteration.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Dimensionality
// =============================================================================

/// Number of raster dimensions. `D0` denotes a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NumDim {
    /// Scalar (no spatial extent).
    D0,
    /// One-dimensional raster.
    D1,
    /// Two-dimensional raster.
    D2,
    /// Three-dimensional raster.
    D3,
}

impl NumDim {
    /// Number of axes.
    pub fn ndim(self) -> usize {
        match self {
            Self::D0 => 0,
            Self::D1 => 1,
            Self::D2 => 2,
            Self::D3 => 3,
        }
    }

    /// Builds the dimensionality covering `ndim` axes.
    pub fn from_ndim(ndim: usize) -> Self {
        match ndim {
            0 => Self::D0,
            1 => Self::D1,
            2 => Self::D2,
            3 => Self::D3,
            other => panic!("unsupported dimensionality {other}"),
        }
    }
}

// =============================================================================
// Data Types
// =============================================================================

/// Element type of a raster cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 8-bit boolean.
    B8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DataType {
    /// Size of one cell in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::B8 | Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    /// One-character code used in kernel signatures.
    pub fn code(self) -> char {
        match self {
            Self::B8 => 'b',
            Self::U8 => 'u',
            Self::I16 => 'h',
            Self::I32 => 'i',
            Self::I64 => 'l',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    /// Whether the type is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// Cell layout of a raster in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemOrder {
    /// Row-major within each block.
    #[default]
    RowMajor,
    /// Column-major within each block.
    ColMajor,
}

// =============================================================================
// Coordinates
// =============================================================================

/// Integer vector over raster or block space. Empty for `D0`.
pub type Coord = Vec<i32>;

/// Raster extent in cells per dimension.
pub type DataSize = Coord;

/// Block extent in cells per dimension.
pub type BlockSize = Coord;

/// Number of blocks per dimension.
pub type NumBlock = Coord;

/// Workgroup extent per dimension.
pub type GroupSize = Coord;

/// Element-wise sum of two coordinates.
pub fn coord_add(a: &[i32], b: &[i32]) -> Coord {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Whether `coord` lies inside `[0, bound)` on every axis.
pub fn in_range(coord: &[i32], bound: &[i32]) -> bool {
    debug_assert_eq!(coord.len(), bound.len());
    coord.iter().zip(bound).all(|(c, b)| *c >= 0 && c < b)
}

/// Product of all axes; 1 for the empty (scalar) coordinate.
pub fn prod(coord: &[i32]) -> i64 {
    coord.iter().map(|c| i64::from(*c)).product()
}

/// Dense row-major iteration over `[beg, end)`. Yields one empty coordinate
/// when the space has no axes.
pub fn iter_space(beg: &[i32], end: &[i32]) -> Vec<Coord> {
    debug_assert_eq!(beg.len(), end.len());
    let mut out = Vec::new();
    let mut cur: Coord = beg.to_vec();
    if beg.iter().zip(end).any(|(b, e)| b >= e) && !beg.is_empty() {
        return out;
    }
    loop {
        out.push(cur.clone());
        if cur.is_empty() {
            return out;
        }
        let mut axis = cur.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            cur[axis] += 1;
            if cur[axis] < end[axis] {
                break;
            }
            cur[axis] = beg[axis];
        }
    }
}

// =============================================================================
// MetaData
// =============================================================================

/// Static attributes shared by every node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaData {
    /// Dimensionality of the produced raster.
    pub num_dim: NumDim,
    /// Raster extent in cells.
    pub data_size: DataSize,
    /// Element type.
    pub data_type: DataType,
    /// Memory order inside each block.
    pub mem_order: MemOrder,
    /// Block extent in cells.
    pub block_size: BlockSize,
}

impl MetaData {
    /// Metadata for a tiled raster.
    pub fn new(
        num_dim: NumDim,
        data_size: DataSize,
        data_type: DataType,
        mem_order: MemOrder,
        block_size: BlockSize,
    ) -> Self {
        assert_eq!(num_dim.ndim(), data_size.len());
        assert_eq!(num_dim.ndim(), block_size.len());
        Self {
            num_dim,
            data_size,
            data_type,
            mem_order,
            block_size,
        }
    }

    /// Metadata for a scalar value.
    pub fn scalar(data_type: DataType) -> Self {
        Self {
            num_dim: NumDim::D0,
            data_size: Coord::new(),
            data_type,
            mem_order: MemOrder::RowMajor,
            block_size: Coord::new(),
        }
    }

    /// Number of blocks per dimension (ceiling division).
    pub fn num_block(&self) -> NumBlock {
        self.data_size
            .iter()
            .zip(&self.block_size)
            .map(|(d, b)| (d + b - 1) / b)
            .collect()
    }
}

impl fmt::Display for MetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} {:?} bs={:?}",
            self.num_dim, self.data_type, self.data_size, self.block_size
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_block_rounds_up() {
        let meta = MetaData::new(
            NumDim::D2,
            vec![10, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        );
        assert_eq!(meta.num_block(), vec![3, 2]);
    }

    #[test]
    fn test_scalar_space_has_one_coord() {
        let coords = iter_space(&[], &[]);
        assert_eq!(coords, vec![Coord::new()]);
        assert_eq!(prod(&[]), 1);
    }

    #[test]
    fn test_iter_space_row_major() {
        let coords = iter_space(&[0, 0], &[2, 2]);
        assert_eq!(
            coords,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn test_in_range() {
        assert!(in_range(&[1, 1], &[2, 2]));
        assert!(!in_range(&[-1, 0], &[2, 2]));
        assert!(!in_range(&[0, 2], &[2, 2]));
    }
}
