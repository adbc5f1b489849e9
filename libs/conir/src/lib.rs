//! Connection intermediate representation (CONIR).
//!
//! A resolved description of which individual port instances of a reactor
//! hierarchy send to which, used between instantiation and code generation.
//!
//! Reactors may be *banked* (replicated `width` times from one declaration)
//! and ports may be *multiports* (arrays of `width` channels). A single
//! declaration node therefore stands for many runtime replicas; replica
//! identity is expressed purely through index arithmetic over the flattened
//! leaf address space, never through distinct nodes. [`Range`] describes a
//! contiguous block of that address space, and [`SendRange`] pairs a source
//! range with the destination ranges of one multicast connection.
//!
//! The structures in this crate use stable arena indices, not references,
//! so the instance tree needs no shared-ownership graph machinery. Widths
//! are finalized before any range is constructed and never change
//! afterwards.
#![warn(missing_docs)]

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

pub mod range;
pub mod send;
pub mod validation;

pub use range::{InvalidLevel, PortRange, Range};
pub use send::{SendRange, WidthMismatch};

#[cfg(test)]
pub(crate) mod tests;

/// An opaque reactor instance identifier.
///
/// A reactor ID created in the context of one instance tree must *not* be
/// used in the context of another tree.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ReactorId(usize);

/// An opaque port instance identifier.
///
/// A port ID created in the context of one instance tree must *not* be
/// used in the context of another tree.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PortId(usize);

impl Display for ReactorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "reactor{}", self.0)
    }
}

impl Display for PortId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "port{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReactorData {
    name: ArcStr,
    width: usize,
    parent: Option<ReactorId>,
    depth: usize,
    children: Vec<ReactorId>,
    ports: Vec<PortId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortData {
    name: ArcStr,
    width: usize,
    parent: ReactorId,
}

/// A tree of reactor and port instances with finalized widths.
///
/// Built once by the instantiation-graph builder, then queried read-only
/// by ranges for the rest of the compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTree {
    reactors: Vec<ReactorData>,
    ports: Vec<PortData>,
}

impl InstanceTree {
    /// Creates a tree containing only the root reactor.
    ///
    /// The root always has width 1; it is excluded from flattened-width
    /// computations.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            reactors: vec![ReactorData {
                name: name.into(),
                width: 1,
                parent: None,
                depth: 0,
                children: Vec::new(),
                ports: Vec::new(),
            }],
            ports: Vec::new(),
        }
    }

    /// The root reactor of this tree.
    #[inline]
    pub fn root(&self) -> ReactorId {
        ReactorId(0)
    }

    /// Adds a child reactor under `parent`, replicated `width` times.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero.
    pub fn add_reactor(
        &mut self,
        parent: ReactorId,
        name: impl Into<ArcStr>,
        width: usize,
    ) -> ReactorId {
        assert!(width >= 1, "reactor width must be at least 1");
        let depth = self.reactors[parent.0].depth + 1;
        let id = ReactorId(self.reactors.len());
        self.reactors.push(ReactorData {
            name: name.into(),
            width,
            parent: Some(parent),
            depth,
            children: Vec::new(),
            ports: Vec::new(),
        });
        self.reactors[parent.0].children.push(id);
        id
    }

    /// Adds a port with `width` channels to the given reactor.
    ///
    /// A width of 1 is an ordinary port; anything larger is a multiport.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero.
    pub fn add_port(&mut self, parent: ReactorId, name: impl Into<ArcStr>, width: usize) -> PortId {
        assert!(width >= 1, "port width must be at least 1");
        let id = PortId(self.ports.len());
        self.ports.push(PortData {
            name: name.into(),
            width,
            parent,
        });
        self.reactors[parent.0].ports.push(id);
        id
    }

    /// The child reactors of the given reactor, in insertion order.
    #[inline]
    pub fn children(&self, reactor: ReactorId) -> &[ReactorId] {
        &self.reactors[reactor.0].children
    }

    /// The ports of the given reactor, in insertion order.
    #[inline]
    pub fn ports_of(&self, reactor: ReactorId) -> &[PortId] {
        &self.reactors[reactor.0].ports
    }

    /// Iterates over all reactor instances in creation order.
    pub fn reactors(&self) -> impl Iterator<Item = ReactorId> {
        (0..self.reactors.len()).map(ReactorId)
    }

    /// Iterates over all port instances in creation order.
    pub fn ports(&self) -> impl Iterator<Item = PortId> {
        (0..self.ports.len()).map(PortId)
    }

    /// Returns `true` if the given reactor ID belongs to this tree.
    #[inline]
    pub fn contains_reactor(&self, id: ReactorId) -> bool {
        id.0 < self.reactors.len()
    }

    /// Returns `true` if the given port ID belongs to this tree.
    #[inline]
    pub fn contains_port(&self, id: PortId) -> bool {
        id.0 < self.ports.len()
    }
}

/// A node in the instance tree, addressed by a stable identifier.
///
/// This is the seam that lets [`Range`] be generic over the kind of
/// instance it is anchored to: port ranges are the endpoints of
/// connections, reactor ranges describe bank slices.
pub trait Instance: Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug + Display {
    /// The local name of this instance.
    fn name(self, tree: &InstanceTree) -> &ArcStr;

    /// The width of this instance (bank replicas or multiport channels).
    fn width(self, tree: &InstanceTree) -> usize;

    /// The parent reactor, or `None` for the root.
    fn parent(self, tree: &InstanceTree) -> Option<ReactorId>;

    /// The number of reactor levels between this instance and the root.
    fn depth(self, tree: &InstanceTree) -> usize;

    /// Returns `true` if this identifier belongs to the given tree.
    fn exists(self, tree: &InstanceTree) -> bool;

    /// The reactor levels strictly above this instance, nearest first,
    /// excluding the root.
    ///
    /// These are the levels that contribute digits to the flattened leaf
    /// address space, and the only levels that may be interleaved.
    fn ancestors(self, tree: &InstanceTree) -> Vec<ReactorId> {
        let mut chain = Vec::new();
        let mut current = self.parent(tree);
        while let Some(level) = current {
            if level.depth(tree) == 0 {
                break;
            }
            chain.push(level);
            current = level.parent(tree);
        }
        chain
    }

    /// The total number of distinct leaf addresses under this instance:
    /// the product of its width and the widths of every strict ancestor
    /// up to, but not including, the root.
    fn max_width(self, tree: &InstanceTree) -> usize {
        self.ancestors(tree)
            .iter()
            .fold(self.width(tree), |product, level| {
                product * level.width(tree)
            })
    }

    /// The fully qualified, dot-separated name of this instance,
    /// starting at the root.
    fn full_name(self, tree: &InstanceTree) -> String {
        let mut parts = vec![self.name(tree).as_str()];
        let mut current = self.parent(tree);
        while let Some(level) = current {
            parts.push(level.name(tree).as_str());
            current = level.parent(tree);
        }
        parts.reverse();
        parts.join(".")
    }
}

impl Instance for ReactorId {
    fn name(self, tree: &InstanceTree) -> &ArcStr {
        &tree.reactors[self.0].name
    }

    fn width(self, tree: &InstanceTree) -> usize {
        tree.reactors[self.0].width
    }

    fn parent(self, tree: &InstanceTree) -> Option<ReactorId> {
        tree.reactors[self.0].parent
    }

    fn depth(self, tree: &InstanceTree) -> usize {
        tree.reactors[self.0].depth
    }

    fn exists(self, tree: &InstanceTree) -> bool {
        tree.contains_reactor(self)
    }
}

impl Instance for PortId {
    fn name(self, tree: &InstanceTree) -> &ArcStr {
        &tree.ports[self.0].name
    }

    fn width(self, tree: &InstanceTree) -> usize {
        tree.ports[self.0].width
    }

    fn parent(self, tree: &InstanceTree) -> Option<ReactorId> {
        Some(tree.ports[self.0].parent)
    }

    fn depth(self, tree: &InstanceTree) -> usize {
        tree.reactors[tree.ports[self.0].parent.0].depth + 1
    }

    fn exists(self, tree: &InstanceTree) -> bool {
        tree.contains_port(self)
    }
}
