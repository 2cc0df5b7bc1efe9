use log::error;
use rustc_hash::FxHashMap;

use crate::compiler::dfs::Event;
use crate::compiler::errors::Error;
use crate::compiler::ir::{
    Action, Backref, NodeAttr, NodeIdx, NodeKind, ReTree,
};
use crate::config::{VmLimits, MARK_MASK_BITS};

/// Mask with all the marks set.
pub const MARK_MASK: u32 = 0xFFFF_FFFF;

/// Result of numbering the capture groups in a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupNumbering {
    /// Number of marks used by the program, including the one used for
    /// indexing alternatives.
    pub group_count: u8,
    /// Mark index of each named group.
    pub names: FxHashMap<String, u8>,
    /// For each group except the root, its position in the order in which
    /// groups end.
    pub end_order: FxHashMap<u8, usize>,
    /// Bit `i` is set if group `i` is the target of some backreference.
    pub backref_mask: u32,
    /// For each mark, the mask that clears the marks of the groups nested in
    /// it, including its own.
    pub sub_masks: Vec<u32>,
    /// Mark used for recording which alternative matched.
    pub alt_mark: Option<u8>,
}

/// Assigns mark indexes to the capturing groups in pre-order, starting with
/// the root, which always gets mark 0. Lookaheads and non-capturing groups
/// don't get a mark.
///
/// Backreferences by name are resolved to mark indexes, and the groups they
/// refer to are flagged as [`NodeAttr::Backreferenced`].
pub(crate) fn number_groups(
    tree: &mut ReTree,
    root: NodeIdx,
    index_alternatives: bool,
    limits: &VmLimits,
) -> Result<GroupNumbering, Error> {
    let max_marks = limits.max_mark_pairs.min(MARK_MASK_BITS);

    let capturing: Vec<NodeIdx> = tree
        .dfs_iter(root)
        .filter_map(|event| match event {
            Event::Enter((idx, node))
                if node.kind == NodeKind::Group
                    && (idx == root
                        || !node.attrs.intersects(
                            NodeAttr::NotCapture | NodeAttr::NotConsume,
                        )) =>
            {
                Some(idx)
            }
            _ => None,
        })
        .collect();

    let mut numbering = GroupNumbering::default();

    for (mark, idx) in capturing.into_iter().enumerate() {
        if mark >= max_marks as usize {
            error!("pattern has more than {} capture groups", max_marks);
            return Err(Error::TooManyGroups(max_marks));
        }
        let node = tree.get_mut(idx);
        node.mark_index = Some(mark as u8);
        if let Some(name) = &node.name {
            numbering.names.insert(name.clone(), mark as u8);
        }
        numbering.group_count = mark as u8 + 1;
    }

    if index_alternatives {
        if numbering.group_count >= max_marks {
            error!("no mark left for indexing alternatives");
            return Err(Error::NoAltMarkSlot(numbering.group_count));
        }
        numbering.alt_mark = Some(numbering.group_count);
        numbering.group_count += 1;
    }

    numbering.sub_masks = vec![MARK_MASK; max_marks as usize];

    let mut masks = Vec::new();
    let mut backrefs = Vec::new();

    for event in tree.dfs_iter(root) {
        match event {
            Event::Enter((idx, node)) => {
                masks.push(MARK_MASK);
                if let NodeKind::Action(Action::Backreference(_)) = node.kind {
                    backrefs.push(idx);
                }
            }
            Event::Leave((idx, node)) => {
                let mut mask = masks.pop().unwrap_or(MARK_MASK);
                if let (NodeKind::Group, Some(mark)) =
                    (&node.kind, node.mark_index)
                {
                    mask &= !(1 << mark);
                    numbering.sub_masks[mark as usize] = mask;
                    if idx != root {
                        let position = numbering.end_order.len();
                        numbering.end_order.insert(mark, position);
                    }
                }
                if let Some(parent) = masks.last_mut() {
                    *parent &= mask;
                }
            }
        }
    }

    for idx in backrefs {
        let NodeKind::Action(Action::Backreference(backref)) =
            &tree.get(idx).kind
        else {
            continue;
        };

        let mark = match backref {
            Backref::Name(name) => {
                *numbering.names.get(name).ok_or_else(|| {
                    error!("backreference to unknown group `{}`", name);
                    Error::UnknownBackreference(name.clone())
                })?
            }
            Backref::Index(mark) => *mark,
        };

        let group = capturing_group(tree, root, mark).ok_or_else(|| {
            error!("backreference to non-existent group {}", mark);
            Error::InvalidBackreference(mark)
        })?;

        tree.get_mut(idx).kind =
            NodeKind::Action(Action::Backreference(Backref::Index(mark)));
        tree.get_mut(group).attrs.set(NodeAttr::Backreferenced);
        numbering.backref_mask |= 1 << mark;
    }

    Ok(numbering)
}

/// Returns the group that has the given mark. The root can't be referenced.
fn capturing_group(tree: &ReTree, root: NodeIdx, mark: u8) -> Option<NodeIdx> {
    tree.dfs_iter(root).find_map(|event| match event {
        Event::Enter((idx, node))
            if idx != root
                && node.kind == NodeKind::Group
                && node.mark_index == Some(mark) =>
        {
            Some(idx)
        }
        _ => None,
    })
}
