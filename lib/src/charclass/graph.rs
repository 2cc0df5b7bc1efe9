use std::collections::{BTreeMap, VecDeque};

use crate::charclass::{CharClass, Code, State, StateId, StateMap};

/// A state with its transitions combined per destination, used for finding
/// states that accept the same byte sequences.
type Signature = (Option<Code>, Vec<(Code, StateId)>);

impl CharClass {
    /// Converts the automaton from tree form into a minimized graph.
    ///
    /// States are visited children first. Before a state is looked at, its
    /// transitions are redirected to the already merged children and all
    /// the codes going to the same child are combined. Two states with the
    /// same leaf and the same combined transitions accept the same
    /// sequences and become one. States that accept nothing are dropped
    /// along with the transitions leading to them.
    ///
    /// The result is the smallest graph for the class, so converting it to
    /// a tree and back gives the same graph.
    ///
    /// Does nothing if the automaton is already a graph.
    pub fn to_graph(&mut self) {
        if !self.is_tree {
            return;
        }

        if self.states.len() < 2 {
            return;
        }

        let mut merged: Vec<State> = Vec::new();
        let mut by_signature: BTreeMap<Signature, StateId> = BTreeMap::new();

        // For each state, `Some(None)` if it accepts nothing, or
        // `Some(Some(id))` with its index in `merged`.
        let mut resolved: Vec<Option<Option<StateId>>> =
            vec![None; self.states.len()];

        let mut stack = vec![(0, false)];

        while let Some((id, children_done)) = stack.pop() {
            if resolved[id].is_some() {
                continue;
            }

            if !children_done {
                stack.push((id, true));
                for child in self.states[id].transitions.values() {
                    if resolved[*child].is_none() {
                        stack.push((*child, false));
                    }
                }
                continue;
            }

            let state = &self.states[id];
            let mut by_dest: BTreeMap<StateId, Code> = BTreeMap::new();

            for (code, child) in state.transitions.iter() {
                if let Some(Some(dest)) = resolved[*child] {
                    *by_dest.entry(dest).or_default() |= *code;
                }
            }

            let leaf = state.leaf.filter(|leaf| !leaf.is_empty());
            let transitions: Vec<(Code, StateId)> = by_dest
                .into_iter()
                .filter(|(_, code)| !code.is_empty())
                .map(|(dest, code)| (code, dest))
                .collect();

            if leaf.is_none() && transitions.is_empty() {
                resolved[id] = Some(None);
                continue;
            }

            let signature = (leaf, transitions);
            let kept = match by_signature.get(&signature) {
                Some(kept) => *kept,
                None => {
                    let kept = merged.len();
                    merged.push(State {
                        transitions: signature.1.iter().copied().collect(),
                        leaf: signature.0,
                    });
                    by_signature.insert(signature, kept);
                    kept
                }
            };

            resolved[id] = Some(Some(kept));
        }

        let Some(Some(root)) = resolved[0] else {
            // Nothing is accepted.
            self.states.clear();
            return;
        };

        // Number the states in breadth-first order, with the root first.
        let mut numbering: Vec<Option<StateId>> = vec![None; merged.len()];
        let mut order = vec![root];
        let mut pending = VecDeque::from([root]);

        numbering[root] = Some(0);

        while let Some(id) = pending.pop_front() {
            for dest in merged[id].transitions.values() {
                if numbering[*dest].is_none() {
                    numbering[*dest] = Some(order.len());
                    order.push(*dest);
                    pending.push_back(*dest);
                }
            }
        }

        self.states = order
            .into_iter()
            .map(|id| {
                let mut state = std::mem::take(&mut merged[id]);
                for dest in state.transitions.values_mut() {
                    *dest = numbering[*dest].unwrap_or_default();
                }
                state
            })
            .collect();

        self.is_tree = false;
    }

    /// Converts the automaton from graph form into a tree, where every state
    /// except the root has exactly one parent. States are numbered in
    /// breadth-first order.
    ///
    /// Does nothing if the automaton is already a tree.
    pub fn to_tree(&mut self) {
        if self.is_tree {
            return;
        }

        if self.states.len() < 2 {
            self.is_tree = true;
            return;
        }

        let mut tree =
            vec![State { leaf: self.states[0].leaf, ..Default::default() }];
        let mut pending = VecDeque::from([(0, 0)]);

        while let Some((old, new)) = pending.pop_front() {
            for (code, old_child) in self.states[old].transitions.iter() {
                let new_child = tree.len();
                tree.push(State {
                    leaf: self.states[*old_child].leaf,
                    ..Default::default()
                });
                tree[new].transitions.insert(*code, new_child);
                if !self.states[*old_child].transitions.is_empty() {
                    pending.push_back((*old_child, new_child));
                }
            }
        }

        self.states = tree;
        self.is_tree = true;
    }

    /// Removes holes by moving the states at the top of the range into them,
    /// so that states are numbered from 0 to `state_size - 1` without gaps.
    ///
    /// Returns a map from the old index to the new index of the moved
    /// states.
    pub(crate) fn compact_states(&mut self) -> StateMap {
        let mut moved = StateMap::default();

        self.truncate_holes();

        let mut slot = 0;
        loop {
            while slot < self.states.len() && !self.states[slot].is_hole() {
                slot += 1;
            }
            if slot >= self.states.len() {
                break;
            }
            // The last state is not a hole, and `slot` is below it.
            let top = self.states.len() - 1;
            self.states.swap(slot, top);
            self.states.truncate(top);
            moved.insert(top, slot);
            self.truncate_holes();
        }

        if !moved.is_empty() {
            for state in self.states.iter_mut() {
                for dest in state.transitions.values_mut() {
                    if let Some(new) = moved.get(dest) {
                        *dest = *new;
                    }
                }
            }
        }

        moved
    }

    fn truncate_holes(&mut self) {
        while self.states.last().is_some_and(State::is_hole) {
            self.states.pop();
        }
    }

    /// Removes the states from which no leaf can be reached, together with
    /// the transitions leading to them. Requires a tree.
    pub(crate) fn trim_non_terminating_states(&mut self) {
        let parents: BTreeMap<StateId, (StateId, Code)> = self
            .states
            .iter()
            .enumerate()
            .flat_map(|(parent, state)| {
                state
                    .transitions
                    .iter()
                    .map(move |(code, child)| (*child, (parent, *code)))
            })
            .collect();

        for id in 0..self.states.len() {
            let mut state = id;
            loop {
                let current = &mut self.states[state];
                if current.leaf.is_some_and(|leaf| leaf.is_empty()) {
                    current.leaf = None;
                }
                if !current.is_hole() || state == 0 {
                    break;
                }
                let Some((parent, code)) = parents.get(&state) else {
                    break;
                };
                if self.states[*parent].transitions.remove(code).is_none() {
                    break;
                }
                state = *parent;
            }
        }
    }

    /// Summary of the automaton used for comparing different
    /// representations of it: number of states, of states with leafs and of
    /// states with transitions, and the sorted list of leaf codes.
    #[cfg(test)]
    pub(crate) fn shape(&self) -> (usize, usize, usize, Vec<Code>) {
        (
            self.states.len(),
            self.states.iter().filter(|s| s.leaf.is_some()).count(),
            self.states.iter().filter(|s| !s.transitions.is_empty()).count(),
            {
                let mut leafs: Vec<Code> =
                    self.states.iter().filter_map(|s| s.leaf).collect();
                leafs.sort();
                leafs
            },
        )
    }
}
