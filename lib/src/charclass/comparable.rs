/*! Product construction used by set operations.

Two automata are *comparable* when, for every pair of corresponding states,
the transition codes leaving them are either identical or disjoint. Once two
trees are comparable, set operations reduce to operations between the leaf
codes of corresponding states.

[`make_comparable`] rewrites both trees in place, walking them breadth-first
from the roots. When a transition on one side partially overlaps a
transition on the other side, the overlapping bytes are split out into a
new transition on both sides, each one pointing to a fresh copy of the
original sub-tree, and the original transitions are narrowed to the bytes
they don't share.
*/

use std::collections::VecDeque;

use crate::charclass::{CharClass, Code, State, StateId, StateMap};

/// Makes `left` and `right` comparable, returning a map from states in
/// `right` to their corresponding states in `left`.
///
/// Both classes are converted into trees. On return, neither of them has
/// holes.
pub(crate) fn make_comparable(
    left: &mut CharClass,
    right: &mut CharClass,
) -> StateMap {
    left.to_tree();
    right.to_tree();

    let mut map = StateMap::default();

    if left.state_size() < 2 || right.state_size() < 2 {
        if !left.is_empty() && !right.is_empty() {
            map.insert(0, 0);
        }
        return map;
    }

    map.insert(0, 0);

    let mut left_holes = false;
    let mut right_holes = false;
    let mut pending = VecDeque::from([(0, 0)]);

    while let Some((root_l, root_r)) = pending.pop_front() {
        let left_codes: Vec<(Code, StateId)> = left.states[root_l]
            .transitions
            .iter()
            .map(|(code, next)| (*code, *next))
            .collect();

        for (mut code_l, next_l) in left_codes {
            let candidates: Vec<(Code, StateId)> = right.states[root_r]
                .transitions
                .iter()
                .filter(|(code, _)| code.intersects(&code_l))
                .map(|(code, next)| (*code, *next))
                .collect();

            for (mut code_r, next_r) in candidates {
                if code_r == code_l {
                    map.insert(next_r, next_l);
                    if has_transitions(left, next_l)
                        && has_transitions(right, next_r)
                    {
                        pending.push_back((next_l, next_r));
                    }
                    break;
                }

                let common = code_l & code_r;

                left.states[root_l].transitions.remove(&code_l);
                code_l = code_l.and_not(common);
                if !code_l.is_empty() {
                    left.states[root_l].transitions.insert(code_l, next_l);
                }

                right.states[root_r].transitions.remove(&code_r);
                code_r = code_r.and_not(common);
                if !code_r.is_empty() {
                    right.states[root_r].transitions.insert(code_r, next_r);
                }

                let new_l = clone_subtree(left, next_l);
                left.states[root_l].transitions.insert(common, new_l);

                let new_r = clone_subtree(right, next_r);
                right.states[root_r].transitions.insert(common, new_r);

                map.insert(new_r, new_l);
                if has_transitions(left, new_l) && has_transitions(right, new_r)
                {
                    pending.push_back((new_l, new_r));
                }

                if code_r.is_empty() {
                    delete_subtree(right, next_r);
                    right_holes = true;
                }

                if code_l.is_empty() {
                    delete_subtree(left, next_l);
                    left_holes = true;
                    break;
                }
            }
        }
    }

    if left_holes {
        map.retain(|_, l| !left.states[*l].is_hole());
        let moved = left.compact_states();
        for l in map.values_mut() {
            if let Some(new) = moved.get(l) {
                *l = *new;
            }
        }
    }

    if right_holes {
        map.retain(|r, _| !right.states[*r].is_hole());
        let moved = right.compact_states();
        for (old, new) in moved {
            if let Some(l) = map.remove(&old) {
                map.insert(new, l);
            }
        }
    }

    map
}

fn has_transitions(class: &CharClass, state: StateId) -> bool {
    !class.states[state].transitions.is_empty()
}

/// Appends to `class` a copy of the sub-tree rooted at `from`, returning the
/// index of the new root.
pub(crate) fn clone_subtree(class: &mut CharClass, from: StateId) -> StateId {
    let root = class.states.len();
    class.states.push(State::default());

    let mut stack = vec![(from, root)];

    while let Some((from, to)) = stack.pop() {
        class.states[to].leaf = class.states[from].leaf;
        let transitions: Vec<(Code, StateId)> = class.states[from]
            .transitions
            .iter()
            .map(|(code, next)| (*code, *next))
            .collect();
        for (code, next) in transitions {
            let new = class.states.len();
            class.states.push(State::default());
            class.states[to].transitions.insert(code, new);
            stack.push((next, new));
        }
    }

    root
}

/// Turns every state in the sub-tree rooted at `from` into a hole.
pub(crate) fn delete_subtree(class: &mut CharClass, from: StateId) {
    let mut stack = vec![from];
    while let Some(state) = stack.pop() {
        let state = &mut class.states[state];
        state.leaf = None;
        stack.extend(std::mem::take(&mut state.transitions).into_values());
    }
}
