/*! Annotated syntax tree consumed by the program compiler.

The tree is produced by a regular expression parser, which is not part of
this crate, after every literal and character class in the pattern has been
published to the VM as a [`crate::charclass::CharClass`]. Leaf nodes refer
to those classes by the index of their root state in the VM.

Nodes are stored in an arena owned by [`ReTree`] and are identified by a
[`NodeIdx`]. The analysis passes that run before code emission annotate the
nodes in place: mark indexes for capture groups, guard indexes for
controlling repeats, and a few attributes used internally by the compiler.
*/

use std::fmt::{Display, Formatter};

use bitmask::bitmask;
use rustc_hash::FxHashMap;

use crate::compiler::dfs::DepthFirstSearch;

/// Index of the root state of a character class published in the VM.
pub type ClassRef = u32;

/// Repeat count used for repeats without an upper bound.
pub const COUNT_UNMEASURED: u32 = 0xFFFF;

/// Identifies a node in a [`ReTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(u32);

impl From<usize> for NodeIdx {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value as u32)
    }
}

impl From<NodeIdx> for usize {
    #[inline]
    fn from(value: NodeIdx) -> Self {
        value.0 as usize
    }
}

bitmask! {
    /// Attributes of a node.
    ///
    /// The first group is set by the parser, the rest are set by the
    /// compiler while analysing the tree.
    #[derive(Debug, Hash)]
    pub mask NodeAttrs: u32 where flags NodeAttr {
        /// Lazy group or repeat.
        NotGreedy            = 0x00001,
        /// Lookahead group, the input consumed by the group is given back.
        NotConsume           = 0x00002,
        /// Group that is not reported as a sub-match.
        NotCapture           = 0x00004,
        /// Repeat whose body can't match the first character of what
        /// follows it.
        Disjoint             = 0x00100,
        /// Shared suffix reachable from its parent alternation by a jump.
        BNode                = 0x00200,
        /// Repeat that has a guard for skipping already failed anchors.
        Controlling          = 0x00400,
        UsedAsLookahead      = 0x01000,
        ControlConsumed      = 0x02000,
        StartBufferStart     = 0x04000,
        StartAfterNewline    = 0x08000,
        Backreferenced       = 0x10000,
    }
}

/// Target of a backreference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backref {
    Index(u8),
    Name(String),
}

/// Zero-width assertions and other actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `^`, start of the buffer or after a newline.
    TextStart,
    /// `$`, end of the buffer or before a newline.
    TextEnd,
    /// `\A`
    BufferStart,
    /// `\z`
    BufferEnd,
    /// `\b`
    WordBoundary,
    /// `\B`
    NotWordBoundary,
    /// `\X`, grapheme cluster boundary.
    Grapheme,
    Backreference(Backref),
}

/// Kinds of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Sequence of nodes, optionally captured.
    Group,
    /// Alternatives, in priority order.
    Alt,
    /// Repetition of the only child. A `max` of [`None`] means there's no
    /// upper bound.
    Repeat { min: u32, max: Option<u32> },
    /// A character class, already published in the VM.
    Class(ClassRef),
    Action(Action),
}

/// Grapheme cluster break property values, or combinations of them, used
/// for testing grapheme boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphemeBreak {
    Cr,
    Lf,
    ControlCrLf,
    L,
    LVLvLvt,
    LvV,
    VT,
    LvtT,
    T,
    RegionalIndicator,
    Extend,
    SpacingMark,
    Prepend,
}

/// Auxiliary classes that the compiler needs for lowering actions. They
/// are published in the VM by the caller and registered in the tree with
/// [`ReTree::set_aux_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxClass {
    Newline,
    Word,
    NotWord,
    Any,
    GraphemeBreak(GraphemeBreak),
}

impl Display for AuxClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AuxClass::Newline => write!(f, "newline"),
            AuxClass::Word => write!(f, "word"),
            AuxClass::NotWord => write!(f, "not_word"),
            AuxClass::Any => write!(f, "any"),
            AuxClass::GraphemeBreak(gb) => {
                let name = match gb {
                    GraphemeBreak::Cr => "cr",
                    GraphemeBreak::Lf => "lf",
                    GraphemeBreak::ControlCrLf => "control_cr_lf",
                    GraphemeBreak::L => "l",
                    GraphemeBreak::LVLvLvt => "l_v_lv_lvt",
                    GraphemeBreak::LvV => "lv_v",
                    GraphemeBreak::VT => "v_t",
                    GraphemeBreak::LvtT => "lvt_t",
                    GraphemeBreak::T => "t",
                    GraphemeBreak::RegionalIndicator => "regional_indicator",
                    GraphemeBreak::Extend => "extend",
                    GraphemeBreak::SpacingMark => "spacingmark",
                    GraphemeBreak::Prepend => "prepend",
                };
                write!(f, "grapheme_cluster_break={}", name)
            }
        }
    }
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub attrs: NodeAttrs,
    pub children: Vec<NodeIdx>,
    /// Group name, for named groups.
    pub name: Option<String>,
    /// Class with the characters that can start a match of this node, if
    /// the parser could compute one.
    pub preview: Option<ClassRef>,
    /// For repeats, the node that follows the repeat, used for deciding
    /// whether another iteration is worth trying.
    pub look_ahead: Option<NodeIdx>,
    /// For the children of a top-level alternation, the number reported
    /// when this alternative matches.
    pub alt_index: Option<u32>,
    /// Capture slot, assigned by the group numbering pass.
    pub mark_index: Option<u8>,
    /// Guard slot, assigned to controlling repeats.
    pub guard_index: Option<u32>,
}

impl Node {
    fn new(kind: NodeKind, children: Vec<NodeIdx>) -> Self {
        Self {
            kind,
            children,
            attrs: NodeAttrs::none(),
            name: None,
            preview: None,
            look_ahead: None,
            alt_index: None,
            mark_index: None,
            guard_index: None,
        }
    }

    /// Returns the first child of the node, if any.
    #[inline]
    pub fn first_child(&self) -> Option<NodeIdx> {
        self.children.first().copied()
    }

    /// Returns the referenced class if the node is a character class.
    #[inline]
    pub fn class(&self) -> Option<ClassRef> {
        match self.kind {
            NodeKind::Class(class) => Some(class),
            _ => None,
        }
    }
}

/// A syntax tree annotated for compilation.
#[derive(Debug, Clone)]
pub struct ReTree {
    nodes: Vec<Node>,
    root: Option<NodeIdx>,
    aux: FxHashMap<AuxClass, ClassRef>,
    /// Byte order bits copied into the start command.
    pub endian_mask: u8,
    /// Number of bytes the anchor is advanced after a failed attempt.
    pub stride: u32,
}

impl Default for ReTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ReTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            aux: FxHashMap::default(),
            endian_mask: 0,
            stride: 1,
        }
    }

    /// Returns the root of the tree.
    #[inline]
    pub fn root(&self) -> Option<NodeIdx> {
        self.root
    }

    /// Sets the root of the tree, which should be a group.
    #[inline]
    pub fn set_root(&mut self, root: NodeIdx) {
        self.root = Some(root);
    }

    #[inline]
    pub fn get(&self, idx: NodeIdx) -> &Node {
        &self.nodes[usize::from(idx)]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[usize::from(idx)]
    }

    /// Number of nodes in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers the class used for an auxiliary character set.
    pub fn set_aux_class(&mut self, aux: AuxClass, class: ClassRef) {
        self.aux.insert(aux, class);
    }

    /// Returns the class registered for an auxiliary character set.
    pub fn aux_class(&self, aux: AuxClass) -> Option<ClassRef> {
        self.aux.get(&aux).copied()
    }

    /// Returns an iterator that traverses the sub-tree starting at `start`
    /// in depth-first order.
    pub fn dfs_iter(&self, start: NodeIdx) -> DepthFirstSearch<'_> {
        DepthFirstSearch::new(self, start)
    }

    pub fn group(&mut self, children: Vec<NodeIdx>) -> NodeIdx {
        self.push(Node::new(NodeKind::Group, children))
    }

    /// Creates a capture group with a name.
    pub fn named_group<N: Into<String>>(
        &mut self,
        name: N,
        children: Vec<NodeIdx>,
    ) -> NodeIdx {
        let idx = self.group(children);
        self.get_mut(idx).name = Some(name.into());
        idx
    }

    pub fn alt(&mut self, children: Vec<NodeIdx>) -> NodeIdx {
        self.push(Node::new(NodeKind::Alt, children))
    }

    pub fn repeat(
        &mut self,
        child: NodeIdx,
        min: u32,
        max: Option<u32>,
    ) -> NodeIdx {
        self.push(Node::new(NodeKind::Repeat { min, max }, vec![child]))
    }

    pub fn class(&mut self, class: ClassRef) -> NodeIdx {
        self.push(Node::new(NodeKind::Class(class), Vec::new()))
    }

    pub fn action(&mut self, action: Action) -> NodeIdx {
        self.push(Node::new(NodeKind::Action(action), Vec::new()))
    }

    /// Sets an attribute in a node and returns the node's index, so that it
    /// can be used while building the tree.
    pub fn with_attr(&mut self, idx: NodeIdx, attr: NodeAttr) -> NodeIdx {
        self.get_mut(idx).attrs.set(attr);
        idx
    }

    fn push(&mut self, node: Node) -> NodeIdx {
        let idx = NodeIdx::from(self.nodes.len());
        self.nodes.push(node);
        idx
    }
}
