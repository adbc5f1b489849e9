//! Multicast send ranges.

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::range::PortRange;
use crate::{Instance, InstanceTree, PortId, ReactorId};

/// A port range that sources data, together with the ordered list of
/// destination port ranges that all receive the data sent in this range.
///
/// Every destination's width is an integer multiple of the source width:
/// one source element may fan out to several elements of one destination,
/// never to a fractional number. Destinations do not necessarily share the
/// source's start offset.
///
/// Like [`PortRange`], a send range is a value: slicing returns a new send
/// range with every destination sliced in lock-step. The only interior
/// state is a memoized destination-reactor count, invalidated whenever the
/// destination list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRange {
    source: PortRange,
    destinations: Vec<PortRange>,
    #[serde(skip)]
    num_destination_reactors: OnceCell<usize>,
}

/// The error returned when a destination's width is not an integer
/// multiple of the sending range's width.
///
/// This is a genuine connection-width mismatch in the user's program; the
/// connection-resolution pass is responsible for attaching the offending
/// declaration's source location when reporting it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("destination width {destination_width} is not a multiple of sender width {sender_width}")]
pub struct WidthMismatch {
    /// The sending range's width.
    pub sender_width: usize,
    /// The offending destination's width.
    pub destination_width: usize,
}

impl SendRange {
    /// Creates a send range with no destinations yet.
    pub fn new(source: PortRange) -> Self {
        Self {
            source,
            destinations: Vec::new(),
            num_destination_reactors: OnceCell::new(),
        }
    }

    /// The source port range of this multicast.
    #[inline]
    pub fn source(&self) -> &PortRange {
        &self.source
    }

    /// The port instance this range sends from.
    #[inline]
    pub fn anchor(&self) -> PortId {
        self.source.anchor()
    }

    /// The start offset of the source range.
    #[inline]
    pub fn start(&self) -> usize {
        self.source.start()
    }

    /// The width of the source range.
    #[inline]
    pub fn width(&self) -> usize {
        self.source.width()
    }

    /// The destination ranges of this multicast, in insertion order.
    #[inline]
    pub fn destinations(&self) -> &[PortRange] {
        &self.destinations
    }

    /// Appends a destination range.
    ///
    /// Fails, without mutating anything, if the destination's width is not
    /// an integer multiple of this range's width. On success the memoized
    /// destination-reactor count is invalidated.
    pub fn add_destination(&mut self, destination: PortRange) -> Result<(), WidthMismatch> {
        if destination.width() % self.width() != 0 {
            return Err(WidthMismatch {
                sender_width: self.width(),
                destination_width: destination.width(),
            });
        }
        self.destinations.push(destination);
        self.num_destination_reactors.take();
        Ok(())
    }

    /// The number of distinct reactor instances that react to messages
    /// from this send range.
    ///
    /// Destination bank indices are grouped per destination-port parent
    /// *declaration* and unioned within each group before counting: the
    /// same parent declaration may be reached through several destination
    /// ranges whose index sets overlap, while index sets of different
    /// declarations must never be merged. Each destination's own
    /// interleaving is honored when projecting onto its parent's digit.
    ///
    /// The result is memoized until the destination list changes.
    pub fn num_destination_reactors(&self, tree: &InstanceTree) -> usize {
        *self.num_destination_reactors.get_or_init(|| {
            let mut indices_by_parent: IndexMap<ReactorId, BTreeSet<usize>> = IndexMap::new();
            for destination in &self.destinations {
                let parent = destination
                    .anchor()
                    .parent(tree)
                    .expect("ports always have a parent reactor");
                let indices = destination
                    .ancestor_instances(tree, parent)
                    .expect("a port's parent is always a valid level");
                indices_by_parent.entry(parent).or_default().extend(indices);
            }
            indices_by_parent.values().map(BTreeSet::len).sum()
        })
    }

    /// Slices this send range to its first `new_width` elements, applying
    /// the same `head` to every destination so that source and destination
    /// sub-ranges stay paired. Returns `None` if `new_width` is zero.
    pub fn head(&self, new_width: usize) -> Option<Self> {
        let source = self.source.head(new_width)?;
        let destinations = self
            .destinations
            .iter()
            .map(|destination| destination.head(new_width))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            source,
            destinations,
            num_destination_reactors: OnceCell::new(),
        })
    }

    /// The leftover send range after consuming `offset` elements, with the
    /// same `tail` applied to every destination. Returns `None` if nothing
    /// is left.
    pub fn tail(&self, offset: usize) -> Option<Self> {
        let source = self.source.tail(offset)?;
        let destinations = self
            .destinations
            .iter()
            .map(|destination| destination.tail(offset))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            source,
            destinations,
            num_destination_reactors: OnceCell::new(),
        })
    }

    /// Derives a send range anchored at another source range, inheriting
    /// this range's destinations narrowed to the smaller of the two
    /// widths.
    ///
    /// Used when a send range inherited from a containing connection must
    /// be restricted to the width actually available at a narrower
    /// upstream port.
    pub fn with_source(&self, source: &PortRange) -> Self {
        let width = self.width().min(source.width());
        let source = source
            .head(width)
            .expect("ranges always have nonzero width");
        let destinations = self
            .destinations
            .iter()
            .map(|destination| {
                destination
                    .head(width)
                    .expect("ranges always have nonzero width")
            })
            .collect();
        Self {
            source,
            destinations,
            num_destination_reactors: OnceCell::new(),
        }
    }

    /// Total, deterministic order over send ranges.
    ///
    /// Extends [`PortRange::cmp_within`]: when source ranges tie, a send
    /// range with **more** destinations sorts first, so passes that
    /// process ranges in order see the richest multicast sources before
    /// narrower ones; remaining ties fall back to the source port's fully
    /// qualified name.
    pub fn cmp_within(&self, other: &Self, tree: &InstanceTree) -> Ordering {
        self.source
            .cmp_within(&other.source, tree)
            .then_with(|| other.destinations.len().cmp(&self.destinations.len()))
            .then_with(|| {
                self.anchor()
                    .full_name(tree)
                    .cmp(&other.anchor().full_name(tree))
            })
    }
}

impl PartialEq for SendRange {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.destinations == other.destinations
    }
}

impl Eq for SendRange {}
