use log::error;

use crate::compiler::errors::Error;
use crate::compiler::ir::{
    NodeAttr, NodeIdx, NodeKind, ReTree, COUNT_UNMEASURED,
};
use crate::config::VmLimits;

/// Repeats with an upper bound below or equal to this are not worth a
/// guard.
pub const LOOP_THRESHOLD_FOR_GUARDS: u32 = 5;

/// Marks the repeats that can advance the anchor, and assigns a guard index
/// to each of them. Returns the number of guards used.
///
/// A repeat of a single character that is either optional or disjoint with
/// what follows it controls the anchor: once the rest of the pattern failed
/// after some iteration of the repeat, it will fail after every other
/// iteration, so the anchor can be moved past the characters the repeat
/// consumed. The search stops at the first group that is the target of a
/// backreference, as the rest of the pattern then depends on where the
/// match started.
pub(crate) fn mark_controlling_repeats(
    tree: &mut ReTree,
    root: NodeIdx,
    limits: &VmLimits,
) -> Result<u32, Error> {
    let mut guards = Guards { count: 0, max: limits.max_guards };
    guards.mark(tree, root)?;
    Ok(guards.count)
}

struct Guards {
    count: u32,
    max: u32,
}

impl Guards {
    /// Returns `true` if a backreferenced group was found.
    fn mark(&mut self, tree: &mut ReTree, idx: NodeIdx) -> Result<bool, Error> {
        let node = tree.get(idx);
        let attrs = node.attrs;
        let children = node.children.clone();

        match node.kind {
            NodeKind::Group => {
                if attrs.contains(NodeAttr::NotConsume) {
                    return Ok(false);
                }
                if attrs.contains(NodeAttr::Backreferenced) {
                    return Ok(true);
                }
                for child in children {
                    if self.mark(tree, child)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NodeKind::Alt => {
                let mut backref = false;
                for child in children {
                    backref |= self.mark(tree, child)?;
                }
                Ok(backref)
            }
            NodeKind::Repeat { min, max } => {
                let Some(child) = children.first().copied() else {
                    return Ok(false);
                };
                let max = max.unwrap_or(COUNT_UNMEASURED);
                let single_char = tree.get(child).class().is_some();

                if single_char
                    && (attrs.contains(NodeAttr::Disjoint) || min == 0)
                    && max > LOOP_THRESHOLD_FOR_GUARDS
                {
                    if self.count >= self.max {
                        error!("pattern needs more than {} guards", self.max);
                        return Err(Error::TooManyGuards(self.max));
                    }
                    let node = tree.get_mut(idx);
                    node.attrs.set(NodeAttr::Controlling);
                    node.guard_index = Some(self.count);
                    self.count += 1;
                    Ok(false)
                } else if min == 0 {
                    // The body may not run at all.
                    Ok(false)
                } else {
                    self.mark(tree, child)
                }
            }
            NodeKind::Class(_) | NodeKind::Action(_) => Ok(false),
        }
    }
}
