#![forbid(unsafe_code)]

//! Syntax tree produced by the pattern parser.
//!
//! A [`SyntaxTree`] is an arena of [`SyntaxNode`]s addressed by [`NodeId`].
//! Chains are expressed through [`Segment::next`]; a cyclic pattern such as
//! `children*` stores an explicit back-edge (a `next` that points at an
//! ancestor) instead of recursing structurally.
//!
//! # Invariants
//!
//! 1. Trees are immutable once built. Every mutation helper returns a new tree.
//! 2. `Group` members are never the group itself, so walking `items`
//!    always terminates. Only `next` edges can form cycles.
//! 3. Two trees built from the same text compare equal.

use std::fmt;

use bitflags::bitflags;

/// Index of a node inside its [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Position of the node in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Per-segment switches set by the parser.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u8 {
        /// Plain attribute name, no prefix or metadata matching.
        const SIMPLE = 1 << 0;
        /// Bare `-`: every attribute change on the object.
        const ANY_ATTRIBUTE = 1 << 1;
        /// `name?`: a missing attribute is skipped instead of rejected.
        const OPTIONAL = 1 << 2;
        /// Changes to this segment are reported (`.` rather than `:`).
        const NOTIFY = 1 << 3;
        /// `name[]`: the handler receives itemized collection diffs.
        const ITEMS = 1 << 4;
        /// Downstream registration waits for the next assignment.
        const DEFERRED = 1 << 5;
    }
}

impl Default for SegmentFlags {
    fn default() -> Self {
        Self::SIMPLE | Self::NOTIFY
    }
}

/// Metadata presence filter (`prefix+meta` / `prefix-meta`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataFilter {
    /// Metadata key to test.
    pub name: String,
    /// `true` for `+` (key must be present), `false` for `-` (must be absent).
    pub defined: bool,
}

/// One attribute step of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    name: String,
    metadata: Option<MetadataFilter>,
    flags: SegmentFlags,
    next: Option<NodeId>,
}

impl Segment {
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            flags: SegmentFlags::default(),
            next: None,
        }
    }

    /// Attribute name, or the name prefix for non-simple segments.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&MetadataFilter> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn flags(&self) -> SegmentFlags {
        self.flags
    }

    #[must_use]
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.flags.contains(SegmentFlags::SIMPLE)
    }

    #[must_use]
    pub fn is_any_attribute(&self) -> bool {
        self.flags.contains(SegmentFlags::ANY_ATTRIBUTE)
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.flags.contains(SegmentFlags::OPTIONAL)
    }

    #[must_use]
    pub fn notifies(&self) -> bool {
        self.flags.contains(SegmentFlags::NOTIFY)
    }

    #[must_use]
    pub fn wants_items(&self) -> bool {
        self.flags.contains(SegmentFlags::ITEMS)
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.flags.contains(SegmentFlags::DEFERRED)
    }

    /// Whether an attribute name is selected by this segment's prefix.
    ///
    /// Simple segments match their exact name; prefix segments match any
    /// name starting with the prefix (an empty prefix matches everything).
    #[must_use]
    pub fn matches_name(&self, attribute: &str) -> bool {
        if self.is_simple() {
            self.name == attribute
        } else {
            attribute.starts_with(self.name.as_str())
        }
    }

    pub(crate) fn set_metadata(&mut self, filter: MetadataFilter) {
        self.metadata = Some(filter);
    }

    pub(crate) fn flags_mut(&mut self) -> &mut SegmentFlags {
        &mut self.flags
    }

    pub(crate) fn set_next(&mut self, next: NodeId) {
        self.next = Some(next);
    }
}

/// Arena node: a single segment or an alternation of sub-patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxNode {
    Segment(Segment),
    Group(Vec<NodeId>),
}

/// Compiled attribute-path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    source: String,
    nodes: Vec<SyntaxNode>,
    root: NodeId,
}

impl SyntaxTree {
    pub(crate) fn from_parts(source: impl Into<String>, nodes: Vec<SyntaxNode>, root: NodeId) -> Self {
        Self {
            source: source.into(),
            nodes,
            root,
        }
    }

    /// The (trimmed) pattern text this tree was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    /// The segment at `id`, or `None` for a group.
    #[must_use]
    pub fn segment(&self, id: NodeId) -> Option<&Segment> {
        match self.nodes.get(id.index()) {
            Some(SyntaxNode::Segment(segment)) => Some(segment),
            _ => None,
        }
    }

    /// All segments in arena order, with their ids.
    pub fn segments(&self) -> impl Iterator<Item = (NodeId, &Segment)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| match node {
                SyntaxNode::Segment(segment) => Some((NodeId::new(index), segment)),
                SyntaxNode::Group(_) => None,
            })
    }

    /// Successor of a node: a segment's `next`, or the first member's
    /// successor for a group.
    #[must_use]
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        match self.nodes.get(id.index())? {
            SyntaxNode::Segment(segment) => segment.next,
            SyntaxNode::Group(items) => items.first().and_then(|first| self.successor(*first)),
        }
    }

    /// Whether the chain starting at `id` always resolves to exactly one
    /// `(object, attribute)` destination: every step is a simple segment and
    /// the chain ends without looping back on itself.
    #[must_use]
    pub fn is_single_destination(&self, id: NodeId) -> bool {
        let mut seen = Vec::new();
        let mut current = id;
        loop {
            let Some(segment) = self.segment(current) else {
                return false;
            };
            if !segment.is_simple() || segment.is_any_attribute() {
                return false;
            }
            seen.push(current);
            match segment.next {
                None => return true,
                Some(next) if seen.contains(&next) => return false,
                Some(next) => current = next,
            }
        }
    }

    /// Whether any `next` edge points back at an ancestor.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        let mut path = Vec::new();
        self.cycle_from(self.root, &mut path)
    }

    fn cycle_from(&self, id: NodeId, path: &mut Vec<NodeId>) -> bool {
        if path.contains(&id) {
            return true;
        }
        path.push(id);
        let found = match self.node(id) {
            SyntaxNode::Segment(segment) => segment
                .next
                .is_some_and(|next| self.cycle_from(next, path)),
            SyntaxNode::Group(items) => items.iter().any(|item| self.cycle_from(*item, path)),
        };
        path.pop();
        found
    }

    /// Copy of this tree with every segment marked [`SegmentFlags::DEFERRED`].
    #[must_use]
    pub fn with_deferred(&self) -> Self {
        let mut tree = self.clone();
        for node in &mut tree.nodes {
            if let SyntaxNode::Segment(segment) = node {
                segment.flags.insert(SegmentFlags::DEFERRED);
            }
        }
        tree
    }

    fn write_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: NodeId,
        depth: usize,
        path: &mut Vec<NodeId>,
    ) -> fmt::Result {
        let pad = "  ".repeat(depth);
        if path.contains(&id) {
            return writeln!(f, "{pad}<cycle {id}>");
        }
        path.push(id);
        match self.node(id) {
            SyntaxNode::Segment(segment) => {
                write!(f, "{pad}Segment {id} {:?}", segment.name)?;
                if let Some(meta) = &segment.metadata {
                    let sign = if meta.defined { '+' } else { '-' };
                    write!(f, " {sign}{}", meta.name)?;
                }
                let names: Vec<&str> = segment.flags.iter_names().map(|(name, _)| name).collect();
                writeln!(f, " [{}]", names.join(" | "))?;
                if let Some(next) = segment.next {
                    self.write_node(f, next, depth + 1, path)?;
                }
            }
            SyntaxNode::Group(items) => {
                writeln!(f, "{pad}Group {id}")?;
                for item in items {
                    self.write_node(f, *item, depth + 1, path)?;
                }
            }
        }
        path.pop();
        Ok(())
    }
}

impl fmt::Display for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        self.write_node(f, self.root, 0, &mut path)
    }
}
