//! Ranges over the flattened leaf address space of an instance.
//!
//! A leaf address composes one local index per level: the anchor
//! instance's own index plus one bank index for every ancestor reactor
//! below the root. By default the flattening is bank-major: the leaf-most
//! digit varies fastest. Consider a root containing a bank `a` of width 2,
//! each containing a bank `b` of width 2, each with a multiport `p` of
//! width 2. The eight leaf addresses of `p` enumerate as
//!
//! ```text
//! address:  0  1  2  3  4  5  6  7
//! a index:  0  0  0  0  1  1  1  1
//! b index:  0  0  1  1  0  0  1  1
//! p index:  0  1  0  1  0  1  0  1
//! ```
//!
//! Marking an ancestor level *interleaved* moves its digit to the
//! fastest-varying position, changing how a multicast connection pairs
//! elements of differently shaped banks. A [`Range`] records its anchor,
//! a start offset, a width, and the set of interleaved levels; it never
//! materializes coordinate tuples, so slicing stays O(1) and membership
//! queries stay O(width · depth).

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Instance, InstanceTree, PortId, ReactorId};

/// A range over port instances; the endpoint type of a connection.
pub type PortRange = Range<PortId>;

/// An immutable block of linear indices `[start, start + width)` over the
/// flattened leaves of an anchor instance.
///
/// All operations return new ranges; a range is never mutated. Two ranges
/// are equal iff they have the same anchor, start, width, and interleaved
/// levels.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Range<L> {
    anchor: L,
    start: usize,
    width: usize,
    /// Interleaved ancestor levels, kept sorted so equality and hashing
    /// are independent of toggle order.
    interleaved: Vec<ReactorId>,
}

/// The error returned when a level passed to a range operation is not a
/// proper ancestor of the range's anchor.
///
/// This always indicates a bug in the pass that constructed the level,
/// not a problem with user code.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("{level} is not a proper ancestor of the range anchor")]
pub struct InvalidLevel {
    /// The offending level.
    pub level: ReactorId,
}

/// One digit of the flattened address space: the level it belongs to
/// (`None` for the anchor itself), its radix, and its place value in the
/// default bank-major order.
#[derive(Debug, Clone, Copy)]
struct Digit {
    level: Option<ReactorId>,
    radix: usize,
    place: usize,
}

impl<L: Instance> Range<L> {
    /// Creates a range covering `[start, start + width)` of `anchor`'s
    /// flattened leaf address space, with no interleaving.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or the range extends past
    /// `anchor.max_width(tree)`.
    pub fn new(tree: &InstanceTree, anchor: L, start: usize, width: usize) -> Self {
        assert!(width >= 1, "range width must be at least 1");
        assert!(
            start + width <= anchor.max_width(tree),
            "range [{start}, {}) exceeds the flattened width {} of {anchor}",
            start + width,
            anchor.max_width(tree),
        );
        Self {
            anchor,
            start,
            width,
            interleaved: Vec::new(),
        }
    }

    /// Creates a range covering the entire flattened width of `anchor`.
    pub fn full(tree: &InstanceTree, anchor: L) -> Self {
        Self::new(tree, anchor, 0, anchor.max_width(tree))
    }

    /// The instance this range is anchored to.
    #[inline]
    pub fn anchor(&self) -> L {
        self.anchor
    }

    /// The start offset (inclusive) of this range.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// The width of this range.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The end offset (**exclusive**) of this range.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.width
    }

    /// Returns `true` if this range contains the given linear position.
    #[inline]
    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && position < self.end()
    }

    /// The interleaved ancestor levels of this range, in identifier order.
    #[inline]
    pub fn interleaved(&self) -> &[ReactorId] {
        &self.interleaved
    }

    /// Returns `true` if the given level is currently interleaved.
    #[inline]
    pub fn is_interleaved(&self, level: ReactorId) -> bool {
        self.interleaved.binary_search(&level).is_ok()
    }

    /// Returns a range over the first `new_width` elements of this range,
    /// or this range unchanged if it is already narrower.
    ///
    /// Returns `None` if `new_width` is zero: an empty head is "no range",
    /// so exhausted slices terminate loops instead of raising errors.
    pub fn head(&self, new_width: usize) -> Option<Self> {
        if new_width == 0 {
            return None;
        }
        Some(Self {
            anchor: self.anchor,
            start: self.start,
            width: self.width.min(new_width),
            interleaved: self.interleaved.clone(),
        })
    }

    /// Returns the leftover range after consuming `offset` elements, or
    /// `None` if nothing is left.
    pub fn tail(&self, offset: usize) -> Option<Self> {
        if offset >= self.width {
            return None;
        }
        Some(Self {
            anchor: self.anchor,
            start: self.start + offset,
            width: self.width - offset,
            interleaved: self.interleaved.clone(),
        })
    }

    /// Returns a new range with `level`'s interleaving flipped.
    ///
    /// `level` must be a proper ancestor of the anchor, below the root
    /// (the root contributes no digit, so interleaving it is meaningless).
    /// Toggling the same level twice restores the original range.
    pub fn toggle_interleaved(
        &self,
        tree: &InstanceTree,
        level: ReactorId,
    ) -> Result<Self, InvalidLevel> {
        if !self.anchor.ancestors(tree).contains(&level) {
            return Err(InvalidLevel { level });
        }
        let mut interleaved = self.interleaved.clone();
        match interleaved.binary_search(&level) {
            Ok(position) => {
                interleaved.remove(position);
            }
            Err(position) => interleaved.insert(position, level),
        }
        Ok(Self {
            anchor: self.anchor,
            start: self.start,
            width: self.width,
            interleaved,
        })
    }

    /// The set of distinct leaf addresses touched by this range under its
    /// current interleaving.
    ///
    /// Without interleaving this is simply `{start, ..., start + width - 1}`.
    pub fn instances(&self, tree: &InstanceTree) -> BTreeSet<usize> {
        if self.interleaved.is_empty() {
            return (self.start..self.end()).collect();
        }
        let chain = self.digit_chain(tree);
        let order = self.significance_order(&chain);
        (self.start..self.end())
            .map(|position| canonicalize(position, &chain, &order))
            .collect()
    }

    /// The projection of this range's leaf addresses onto the digit of the
    /// given ancestor level: the set of distinct local indices touched at
    /// that level's granularity, honoring interleaving between `level` and
    /// the anchor.
    ///
    /// The root is a valid level; its projection is always `{0}`.
    pub fn ancestor_instances(
        &self,
        tree: &InstanceTree,
        level: ReactorId,
    ) -> Result<BTreeSet<usize>, InvalidLevel> {
        let place = if level == tree.root() {
            self.anchor.max_width(tree)
        } else {
            let chain = self.digit_chain(tree);
            chain
                .iter()
                .find(|digit| digit.level == Some(level))
                .ok_or(InvalidLevel { level })?
                .place
        };
        Ok(self
            .instances(tree)
            .into_iter()
            .map(|address| address / place)
            .collect())
    }

    /// Total, deterministic order: by the anchor's fully qualified name,
    /// then by start offset.
    pub fn cmp_within(&self, other: &Self, tree: &InstanceTree) -> Ordering {
        self.anchor
            .full_name(tree)
            .cmp(&other.anchor.full_name(tree))
            .then_with(|| self.start.cmp(&other.start))
    }

    /// The digits of the anchor's address space in default order,
    /// leaf-most first.
    fn digit_chain(&self, tree: &InstanceTree) -> Vec<Digit> {
        let mut chain = vec![Digit {
            level: None,
            radix: self.anchor.width(tree),
            place: 1,
        }];
        let mut place = self.anchor.width(tree);
        for level in self.anchor.ancestors(tree) {
            chain.push(Digit {
                level: Some(level),
                radix: level.width(tree),
                place,
            });
            place *= level.width(tree);
        }
        chain
    }

    /// The iteration order of the digits, least significant first.
    ///
    /// Walking the chain leaf-to-root, a non-interleaved level becomes the
    /// most significant digit so far, while an interleaved level is pushed
    /// to the least significant position. Toggling a level is therefore
    /// its own inverse, and the result does not depend on toggle order.
    fn significance_order(&self, chain: &[Digit]) -> Vec<usize> {
        let mut order = Vec::with_capacity(chain.len());
        for (index, digit) in chain.iter().enumerate() {
            if digit.level.is_some_and(|level| self.is_interleaved(level)) {
                order.insert(0, index);
            } else {
                order.push(index);
            }
        }
        order
    }
}

/// Maps a linear position in the range's iteration order to the canonical
/// (bank-major) leaf address it denotes: decompose the position over the
/// permuted radix order, then recompose each digit at its default place.
fn canonicalize(position: usize, chain: &[Digit], order: &[usize]) -> usize {
    let mut remainder = position;
    let mut address = 0;
    for &index in order {
        let digit = chain[index];
        address += (remainder % digit.radix) * digit.place;
        remainder /= digit.radix;
    }
    address
}
