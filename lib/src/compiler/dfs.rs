use crate::compiler::ir::{Node, NodeIdx, ReTree};

enum StackEvent {
    Enter(NodeIdx),
    Leave(NodeIdx),
}

pub enum Event<'a> {
    Enter((NodeIdx, &'a Node)),
    Leave((NodeIdx, &'a Node)),
}

/// An iterator that conducts a Depth First Search (DFS) traversal of a
/// [`ReTree`].
///
/// This iterator yields [`Event::Enter`] when entering a node, and
/// [`Event::Leave`] upon exiting a node. Children are visited in order. For
/// example, given the following tree structure:
///
/// ```text
///       a
///      / \
///     b   c
///        / \
///       d   e
/// ```
///
/// The sequence of events would be:
///
/// ```text
/// Enter(a)
/// Enter(b)
/// Leave(b)
/// Enter(c)
/// Enter(d)
/// Leave(d)
/// Enter(e)
/// Leave(e)
/// Leave(c)
/// Leave(a)
/// ```
///
/// The `look_ahead` links of repeats are not followed, they point to nodes
/// that are part of the tree anyways.
pub struct DepthFirstSearch<'a> {
    tree: &'a ReTree,
    stack: Vec<StackEvent>,
}

impl<'a> DepthFirstSearch<'a> {
    /// Creates a new [`DepthFirstSearch`] that traverses the tree starting
    /// at the given node.
    pub fn new(tree: &'a ReTree, start: NodeIdx) -> Self {
        Self { tree, stack: vec![StackEvent::Enter(start)] }
    }
}

impl<'a> Iterator for DepthFirstSearch<'a> {
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;

        if let StackEvent::Enter(idx) = next {
            self.stack.push(StackEvent::Leave(idx));
            for child in self.tree.get(idx).children.iter().rev() {
                self.stack.push(StackEvent::Enter(*child));
            }
        }

        let event = match next {
            StackEvent::Enter(idx) => Event::Enter((idx, self.tree.get(idx))),
            StackEvent::Leave(idx) => Event::Leave((idx, self.tree.get(idx))),
        };

        Some(event)
    }
}

#[cfg(test)]
mod test {
    use crate::compiler::dfs::Event;
    use crate::compiler::ir::{NodeKind, ReTree};

    #[test]
    fn dfs() {
        let mut tree = ReTree::new();

        let a = tree.class(1);
        let b = tree.class(2);
        let c = tree.class(3);
        let alt = tree.alt(vec![b, c]);
        let root = tree.group(vec![a, alt]);

        let mut dfs = tree.dfs_iter(root);

        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == root));
        assert!(matches!(
            dfs.next(),
            Some(Event::Enter((_, node))) if node.kind == NodeKind::Class(1)
        ));
        assert!(matches!(
            dfs.next(),
            Some(Event::Leave((_, node))) if node.kind == NodeKind::Class(1)
        ));
        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == alt));
        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == b));
        assert!(matches!(dfs.next(), Some(Event::Leave((idx, _))) if idx == b));
        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == c));
        assert!(matches!(dfs.next(), Some(Event::Leave((idx, _))) if idx == c));
        assert!(matches!(dfs.next(), Some(Event::Leave((idx, _))) if idx == alt));
        assert!(matches!(dfs.next(), Some(Event::Leave((idx, _))) if idx == root));
        assert!(dfs.next().is_none());

        let mut dfs = tree.dfs_iter(alt);

        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == alt));
        assert!(matches!(dfs.next(), Some(Event::Enter((idx, _))) if idx == b));
    }
}
