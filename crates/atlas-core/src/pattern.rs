//! Pattern Algebra - Data-Access Categories Governing Fusion
//!
//! A [`Pattern`] is a set of tags describing the data-access shape of a node
//! or cluster (local cell, focal neighborhood, zonal reduction, ...). Patterns
//! compose with `+` (set union) and define which clusters may legally be
//! pipe-fused or flat-fused into a single kernel.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::ops::{Add, AddAssign};

// =============================================================================
// Pattern
// =============================================================================

/// A set of data-access tags. `FREE` is the empty set and the identity of `+`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Pattern {
    bits: u16,
}

impl Pattern {
    /// No data access at all (constants, indices). Identity of `+`.
    pub const FREE: Pattern = Pattern { bits: 0 };
    /// Externally provided raster (read from storage).
    pub const INPUT: Pattern = Pattern { bits: 1 << 0 };
    /// Per-cell access, output cell depends only on the same input cell.
    pub const LOCAL: Pattern = Pattern { bits: 1 << 1 };
    /// Neighborhood access within a bounded window.
    pub const FOCAL: Pattern = Pattern { bits: 1 << 2 };
    /// Whole-raster reduction to a scalar.
    pub const ZONAL: Pattern = Pattern { bits: 1 << 3 };
    /// Wavefront scan expanding from a start coordinate.
    pub const RADIAL: Pattern = Pattern { bits: 1 << 4 };
    /// Unbounded propagation (recognized, currently unimplemented).
    pub const SPREAD: Pattern = Pattern { bits: 1 << 5 };
    /// Carries per-block summary statistics.
    pub const STATS: Pattern = Pattern { bits: 1 << 6 };
    /// Iterative loop body.
    pub const LOOP: Pattern = Pattern { bits: 1 << 7 };
    /// Loop entry boundary.
    pub const HEAD: Pattern = Pattern { bits: 1 << 8 };
    /// Loop exit boundary.
    pub const TAIL: Pattern = Pattern { bits: 1 << 9 };

    /// Tags that constrain the iteration geometry of a fused kernel.
    const GEOMETRY: u16 = Self::LOCAL.bits
        | Self::FOCAL.bits
        | Self::ZONAL.bits
        | Self::RADIAL.bits
        | Self::SPREAD.bits
        | Self::LOOP.bits
        | Self::HEAD.bits
        | Self::TAIL.bits;

    /// Tags that force homogeneous fusion partners.
    const EXCLUSIVE: u16 = Self::RADIAL.bits
        | Self::SPREAD.bits
        | Self::LOOP.bits
        | Self::HEAD.bits
        | Self::TAIL.bits;

    /// Tests tag membership. `is(FREE)` holds only for the empty pattern.
    pub fn is(self, tag: Pattern) -> bool {
        if tag.bits == 0 {
            self.bits == 0
        } else {
            self.bits & tag.bits == tag.bits
        }
    }

    /// Negated [`Pattern::is`].
    pub fn is_not(self, tag: Pattern) -> bool {
        !self.is(tag)
    }

    /// This pattern with the tags of `tag` removed.
    pub fn strip(self, tag: Pattern) -> Pattern {
        Pattern {
            bits: self.bits & !tag.bits,
        }
    }

    /// The geometry-constraining subset of this pattern.
    fn geometry(self) -> Pattern {
        Pattern {
            bits: self.bits & Self::GEOMETRY,
        }
    }
}

impl Add for Pattern {
    type Output = Pattern;

    fn add(self, rhs: Pattern) -> Pattern {
        Pattern {
            bits: self.bits | rhs.bits,
        }
    }
}

impl AddAssign for Pattern {
    fn add_assign(&mut self, rhs: Pattern) {
        self.bits |= rhs.bits;
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Pattern, &str); 10] = [
            (Pattern::INPUT, "Input"),
            (Pattern::LOCAL, "Local"),
            (Pattern::FOCAL, "Focal"),
            (Pattern::ZONAL, "Zonal"),
            (Pattern::RADIAL, "Radial"),
            (Pattern::SPREAD, "Spread"),
            (Pattern::STATS, "Stats"),
            (Pattern::LOOP, "Loop"),
            (Pattern::HEAD, "Head"),
            (Pattern::TAIL, "Tail"),
        ];
        if self.bits == 0 {
            return write!(f, "Free");
        }
        let mut first = true;
        for (tag, name) in NAMES {
            if self.is(tag) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fusion Legality
// =============================================================================

/// Whether a producer cluster seen as `top` may be pipe-fused under a
/// consumer cluster seen as `bot`. Directional: `can_pipe_fuse(a, b)` and
/// `can_pipe_fuse(b, a)` generally differ.
pub fn can_pipe_fuse(top: Pattern, bot: Pattern) -> bool {
    if top.is(Pattern::INPUT) {
        return false; // read blocks stay demand-loaded, never buried in-kernel
    }
    if top.is(Pattern::TAIL) || bot.is(Pattern::TAIL) {
        return false; // the loop exit stays its own cluster
    }
    let loopish = Pattern::LOOP + Pattern::HEAD;
    if top.bits & loopish.bits != 0 && bot.bits & loopish.bits == 0 {
        return false; // iterated values leave a loop only through its tail
    }
    let (top, bot) = (top.strip(loopish), bot.strip(loopish));
    let (gt, gb) = (top.geometry(), bot.geometry());
    if gt.is(Pattern::FREE) || gb.is(Pattern::FREE) {
        return true; // FREE composes under any consumer geometry
    }
    if top.is(Pattern::SPREAD) || bot.is(Pattern::SPREAD) {
        return false;
    }
    if top.is(Pattern::RADIAL) {
        // A wavefront result may only feed cell-aligned consumers.
        return !(bot.is(Pattern::FOCAL) || bot.is(Pattern::RADIAL) || bot.is(Pattern::ZONAL));
    }
    if top.is(Pattern::ZONAL) {
        // Reduction results leave the kernel as scalars; only statistics
        // derived from the same reduction ride along.
        return bot.is(Pattern::ZONAL);
    }
    if top.is(Pattern::FOCAL) && (bot.is(Pattern::FOCAL) || bot.is(Pattern::RADIAL)) {
        return false; // composing halos would grow the window unboundedly
    }
    true
}

/// Whether two sibling clusters may be flat-fused into one kernel sharing a
/// workgroup geometry. Symmetric: `can_flat_fuse(a, b) == can_flat_fuse(b, a)`.
pub fn can_flat_fuse(a: Pattern, b: Pattern) -> bool {
    let (ga, gb) = (a.geometry(), b.geometry());
    if ga.is(Pattern::FREE) || gb.is(Pattern::FREE) {
        // A geometry-less cluster adopts a partner's geometry only when the
        // partner is plain LOCAL; anything wider replicates instead.
        let other = if ga.is(Pattern::FREE) { gb } else { ga };
        return other.is(Pattern::FREE) || other == Pattern::LOCAL;
    }
    if (ga.bits | gb.bits) & Pattern::EXCLUSIVE != 0 {
        return ga == gb; // RADIAL / SPREAD / LOOP only pair with themselves
    }
    true // LOCAL, FOCAL and ZONAL mixes share one block-wide geometry
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_identity_and_idempotence() {
        let local = Pattern::LOCAL;
        assert_eq!(local + Pattern::FREE, local);
        assert_eq!(Pattern::FREE + local, local);
        assert_eq!(local + local, local);
        assert_eq!(local + Pattern::FOCAL, Pattern::FOCAL + local);
    }

    #[test]
    fn test_is_free_only_for_empty() {
        assert!(Pattern::FREE.is(Pattern::FREE));
        assert!(Pattern::LOCAL.is_not(Pattern::FREE));
        assert!((Pattern::LOCAL + Pattern::FOCAL).is(Pattern::FOCAL));
        assert!((Pattern::LOCAL + Pattern::FOCAL).is_not(Pattern::ZONAL));
    }

    #[test]
    fn test_pipe_fuse_is_directional() {
        // A focal consumer may absorb a local producer...
        assert!(can_pipe_fuse(Pattern::LOCAL, Pattern::FOCAL));
        // ...but a radial producer never feeds a focal consumer in-kernel.
        assert!(!can_pipe_fuse(Pattern::RADIAL, Pattern::FOCAL));
        // Two focal stages would compose their halos.
        assert!(!can_pipe_fuse(Pattern::FOCAL, Pattern::FOCAL));
        // Reductions end a kernel, except for statistics derived from them.
        assert!(!can_pipe_fuse(Pattern::ZONAL, Pattern::LOCAL));
        assert!(can_pipe_fuse(Pattern::LOCAL, Pattern::ZONAL));
        assert!(can_pipe_fuse(Pattern::ZONAL, Pattern::ZONAL));
    }

    #[test]
    fn test_flat_fuse_is_symmetric() {
        let cases = [
            (Pattern::LOCAL, Pattern::LOCAL, true),
            (Pattern::LOCAL, Pattern::FOCAL, true),
            (Pattern::FOCAL, Pattern::ZONAL, true),
            (Pattern::RADIAL, Pattern::LOCAL, false),
            (Pattern::SPREAD, Pattern::SPREAD + Pattern::LOCAL, false),
            (Pattern::LOOP, Pattern::FOCAL, false),
        ];
        for (a, b, expect) in cases {
            assert_eq!(can_flat_fuse(a, b), expect, "{a} / {b}");
            assert_eq!(can_flat_fuse(b, a), expect, "{b} / {a}");
        }
    }

    #[test]
    fn test_free_pipes_anywhere_but_flats_with_local_only() {
        assert!(can_pipe_fuse(Pattern::FREE, Pattern::RADIAL));
        assert!(can_pipe_fuse(Pattern::FREE, Pattern::FOCAL));
        assert!(can_flat_fuse(Pattern::FREE, Pattern::LOCAL));
        assert!(can_flat_fuse(Pattern::FREE, Pattern::FREE));
        // Wider geometries pick free nodes up by replication instead.
        assert!(!can_flat_fuse(Pattern::FREE, Pattern::FOCAL));
        assert!(!can_flat_fuse(Pattern::FREE, Pattern::SPREAD));
    }

    #[test]
    fn test_input_producers_never_pipe() {
        assert!(!can_pipe_fuse(Pattern::INPUT, Pattern::LOCAL));
        assert!(!can_pipe_fuse(Pattern::INPUT, Pattern::FOCAL + Pattern::LOCAL));
    }

    #[test]
    fn test_display() {
        assert_eq!(Pattern::FREE.to_string(), "Free");
        assert_eq!((Pattern::LOCAL + Pattern::FOCAL).to_string(), "Local+Focal");
    }
}
