/*! Character classes compiled to finite-state automata.

A [`CharClass`] is a set of characters represented as an automaton over the
bytes of their encoded form. Every path from the root state to a leaf is
the encoding of one character in the class. For instance, in UTF-8 the class
`[é-ë]` is:

```text
 0 --[C3]--> 1 --leaf [A9-AB]
```

Transitions are labelled with a [`Code`], the set of bytes that lead from
one state to the next, and states can have a leaf code, the set of bytes
that complete a character when found at that state.

Automata exist in two forms. While being built, or while set operations are
applied, the automaton is a *tree*: every state except the root has exactly
one parent. Before being persisted or published to the VM the tree is
converted into a *graph*, where equivalent sub-trees are merged and the
transitions from one state to the same destination are combined into a
single code. The conversion is done lazily, each operation converts the
automaton to the form it needs.

Set operations (union, intersection, difference and equality) work by
making both operands *comparable* first, see [`comparable`].
*/

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::io::Write;

use log::error;
use rustc_hash::FxHashMap;
use thiserror::Error;

pub use crate::charclass::codes::Code;
pub use crate::charclass::encoding::{Encoding, UnknownEncoding};
pub use crate::charclass::file::{LoadError, NotPersistable};
pub use crate::charclass::registry::ClassRegistry;

use crate::charclass::comparable::make_comparable;
use crate::vm::{VmLoader, CHARACTER_OK};

mod codes;
mod comparable;
mod encoding;
mod file;
mod graph;
mod registry;


/// Index of a state within a [`CharClass`].
pub(crate) type StateId = usize;

/// Maps state indexes from one numbering to another.
pub(crate) type StateMap = FxHashMap<StateId, StateId>;

/// Errors returned by character class operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("can't combine classes for different encodings ({0} and {1})")]
    EncodingMismatch(Encoding, Encoding),

    #[error("invalid byte range ({0} - {1})")]
    InvalidByteRange(u32, u32),

    #[error("class too big for the VM ({states} states, {available} available)")]
    TooManyStates { states: u32, available: u32 },

    #[error(transparent)]
    Vm(#[from] crate::vm::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// A state in the automaton.
///
/// A state without transitions and without leaf is a hole, holes exist
/// only while states are being removed and disappear on compaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct State {
    pub transitions: BTreeMap<Code, StateId>,
    pub leaf: Option<Code>,
}

impl State {
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.transitions.is_empty() && self.leaf.is_none()
    }
}

/// A set of characters in a given encoding.
#[derive(Clone, Debug)]
pub struct CharClass {
    encoding: Encoding,
    states: Vec<State>,
    is_tree: bool,
}

impl CharClass {
    /// Creates an empty class.
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding, states: Vec::new(), is_tree: true }
    }

    /// Creates a class with the code points in the inclusive range
    /// `first..=last`.
    ///
    /// Code points that can't be represented in the encoding, like
    /// surrogates, are silently skipped, so the result may be empty.
    pub fn from_range(encoding: Encoding, first: u32, last: u32) -> Self {
        if first == last {
            return Self::from_encoded(encoding, encoding.encode(first));
        }

        let mut states = vec![State::default()];

        for code_point in first..=last {
            let Some(encoded) = encoding.encode(code_point) else {
                continue;
            };
            let Some((last_byte, prefix)) = encoded.split_last() else {
                continue;
            };

            // Follow the existing path for the prefix as far as possible,
            // creating new states for the rest of it.
            let mut state = 0;
            for byte in prefix {
                let code = Code::singleton(*byte);
                state = match states[state].transitions.get(&code) {
                    Some(next) => *next,
                    None => {
                        let next = states.len();
                        states.push(State::default());
                        states[state].transitions.insert(code, next);
                        next
                    }
                };
            }

            *states[state].leaf.get_or_insert(Code::EMPTY) |=
                Code::singleton(*last_byte);
        }

        if states.len() == 1 && states[0].is_hole() {
            return Self::new(encoding);
        }

        let mut class = Self { encoding, states, is_tree: true };
        class.to_graph();
        class
    }

    /// Creates a class with a single character.
    ///
    /// The string is encoded as a whole, so a sequence of code points like
    /// CR LF is a single character in the class. If the string can't be
    /// encoded the class is empty, callers that need the character should
    /// check [`CharClass::is_empty`].
    pub fn from_character(encoding: Encoding, s: &str) -> Self {
        Self::from_encoded(encoding, encoding.encode_str(s))
    }

    /// Creates a class with a single character and, if `ignore_case` is
    /// true, all the characters in its case folding cycle.
    ///
    /// Strings with more than one code point are treated as a single
    /// grapheme and are not case-folded.
    pub fn from_cased_character(
        encoding: Encoding,
        s: &str,
        folding: &CaseFolding,
        ignore_case: bool,
    ) -> Result<Self, Error> {
        let mut class = Self::from_character(encoding, s);

        let mut chars = s.chars();
        let (Some(ch), None) = (chars.next(), chars.next()) else {
            return Ok(class);
        };

        if !ignore_case {
            return Ok(class);
        }

        let mut visited = vec![ch];
        let mut next = folding.next(ch);

        while let Some(other) = next {
            if visited.contains(&other) {
                break;
            }
            let mut buf = [0_u8; 4];
            class.union(&Self::from_character(
                encoding,
                other.encode_utf8(&mut buf),
            ))?;
            visited.push(other);
            next = folding.next(other);
        }

        Ok(class)
    }

    fn from_encoded(encoding: Encoding, encoded: Option<Vec<u8>>) -> Self {
        let mut class = Self::new(encoding);

        let Some(bytes) = encoded else {
            return class;
        };
        let Some((last, prefix)) = bytes.split_last() else {
            return class;
        };

        for (i, byte) in prefix.iter().enumerate() {
            let mut state = State::default();
            state.transitions.insert(Code::singleton(*byte), i + 1);
            class.states.push(state);
        }

        class
            .states
            .push(State { leaf: Some(Code::singleton(*last)), ..Default::default() });

        class
    }

    /// Adds the bytes in the inclusive range `first..=last` to the class,
    /// regardless of its encoding. This is used for byte-oriented literals
    /// like hex escapes.
    pub fn add_byte_range(
        &mut self,
        first: u32,
        last: u32,
    ) -> Result<&mut Self, Error> {
        let (Ok(first_byte), Ok(last_byte)) =
            (u8::try_from(first), u8::try_from(last))
        else {
            return Err(Error::InvalidByteRange(first, last));
        };

        if self.states.is_empty() {
            self.states.push(State::default());
        }

        *self.states[0].leaf.get_or_insert(Code::EMPTY) |=
            Code::range(first_byte, last_byte);

        Ok(self)
    }

    /// Returns the class encoding.
    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns true if the class doesn't contain any character.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns the number of states in the automaton.
    #[inline]
    pub fn state_size(&self) -> usize {
        self.states.len()
    }

    /// Returns true if the automaton is currently in tree form.
    #[inline]
    pub fn is_tree(&self) -> bool {
        self.is_tree
    }

    /// Returns true if `bytes` is the encoded form of a character in the
    /// class.
    pub fn accepts(&self, bytes: &[u8]) -> bool {
        let Some((last, prefix)) = bytes.split_last() else {
            return false;
        };

        let mut state = 0;
        for byte in prefix {
            let Some(current) = self.states.get(state) else {
                return false;
            };
            match current
                .transitions
                .iter()
                .find(|(code, _)| code.contains(*byte))
            {
                Some((_, next)) => state = *next,
                None => return false,
            }
        }

        self.states
            .get(state)
            .and_then(|s| s.leaf)
            .is_some_and(|leaf| leaf.contains(*last))
    }

    /// Adds to `self` the characters in `other`.
    pub fn union(&mut self, other: &CharClass) -> Result<&mut Self, Error> {
        self.check_encoding(other)?;

        if self.is_empty() {
            *self = other.clone();
            return Ok(self);
        }

        if other.is_empty() {
            return Ok(self);
        }

        let mut right = other.clone();
        let mut map = make_comparable(self, &mut right);

        // Make room for the states that only exist in `right`.
        let old_size = self.states.len();
        for (rs, state) in right.states.iter().enumerate() {
            if !state.is_hole() && !map.contains_key(&rs) {
                map.insert(rs, self.states.len());
                self.states.push(State::default());
            }
        }

        for (rs, state) in right.states.iter().enumerate() {
            let Some(&ls) = map.get(&rs) else {
                continue;
            };
            for (code, next) in state.transitions.iter() {
                let Some(&lnext) = map.get(next) else {
                    continue;
                };
                // Transitions between states that exist on both sides are
                // already present in `self`.
                if ls >= old_size || lnext >= old_size {
                    self.states[ls].transitions.insert(*code, lnext);
                }
            }
            if let Some(leaf) = state.leaf {
                *self.states[ls].leaf.get_or_insert(Code::EMPTY) |= leaf;
            }
        }

        Ok(self)
    }

    /// Removes from `self` the characters that are not in `other`.
    pub fn intersect(
        &mut self,
        other: &CharClass,
    ) -> Result<&mut Self, Error> {
        self.check_encoding(other)?;

        if self.is_empty() || other.is_empty() {
            self.clear();
            return Ok(self);
        }

        let mut right = other.clone();
        let map = make_comparable(self, &mut right);

        let mut leafs = vec![None; self.states.len()];

        for (rs, state) in right.states.iter().enumerate() {
            let (Some(rleaf), Some(&ls)) = (state.leaf, map.get(&rs)) else {
                continue;
            };
            if let Some(lleaf) = self.states[ls].leaf {
                let common = lleaf & rleaf;
                if !common.is_empty() {
                    leafs[ls] = Some(common);
                }
            }
        }

        for (state, leaf) in self.states.iter_mut().zip(leafs) {
            state.leaf = leaf;
        }

        self.trim_non_terminating_states();
        self.compact_states();

        Ok(self)
    }

    /// Removes from `self` the characters in `other`.
    pub fn difference(
        &mut self,
        other: &CharClass,
    ) -> Result<&mut Self, Error> {
        self.check_encoding(other)?;

        if self.is_empty() || other.is_empty() {
            return Ok(self);
        }

        let mut right = other.clone();
        let map = make_comparable(self, &mut right);

        for (rs, state) in right.states.iter().enumerate() {
            let (Some(rleaf), Some(&ls)) = (state.leaf, map.get(&rs)) else {
                continue;
            };
            let left = &mut self.states[ls];
            if let Some(lleaf) = left.leaf {
                let rest = lleaf.and_not(rleaf);
                left.leaf = if rest.is_empty() { None } else { Some(rest) };
            }
        }

        self.trim_non_terminating_states();
        self.compact_states();

        Ok(self)
    }

    /// Replaces the class with its complement, that is, every character
    /// in the encoding that is not in the class.
    pub fn inverse(
        &mut self,
        registry: &mut ClassRegistry,
    ) -> Result<&mut Self, Error> {
        let mut any = registry.any(self.encoding);
        any.difference(self)?;
        *self = any;
        Ok(self)
    }

    /// Returns true if both classes contain the same characters.
    pub fn equals(&self, other: &CharClass) -> Result<bool, Error> {
        self.check_encoding(other)?;

        let mut left = self.clone();
        let mut right = other.clone();

        let map = make_comparable(&mut left, &mut right);

        let leaf_count =
            |c: &CharClass| c.states.iter().filter(|s| s.leaf.is_some()).count();

        let transition_count = |c: &CharClass| {
            c.states.iter().filter(|s| !s.transitions.is_empty()).count()
        };

        if left.state_size() != right.state_size()
            || leaf_count(&left) != leaf_count(&right)
            || transition_count(&left) != transition_count(&right)
            || right.state_size() != map.len()
        {
            return Ok(false);
        }

        for (rs, state) in right.states.iter().enumerate() {
            let Some(rleaf) = state.leaf else {
                continue;
            };
            let lleaf = map.get(&rs).and_then(|ls| left.states[*ls].leaf);
            if lleaf != Some(rleaf) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Appends `other` after every character in `self`, producing the
    /// class of all two-character sequences.
    pub fn add_as_sequence(
        &mut self,
        other: &CharClass,
    ) -> Result<&mut Self, Error> {
        if other.is_empty() {
            return Ok(self);
        }

        self.check_encoding(other)?;

        let mut right = other.clone();
        right.to_graph();

        if self.is_empty() {
            *self = right;
            return Ok(self);
        }

        self.to_graph();

        let base = self.states.len();

        for state in self.states.iter_mut() {
            if let Some(leaf) = state.leaf.take() {
                state.transitions.insert(leaf, base);
            }
        }

        self.states.extend(right.states.into_iter().map(|mut state| {
            state.transitions.values_mut().for_each(|next| *next += base);
            state
        }));

        self.is_tree = self.states.len() < 2;

        Ok(self)
    }

    /// Writes the class into the VM, returning the index of its root state.
    ///
    /// The class is converted into a graph, and `max(1, state_size)` states
    /// are allocated in the VM. Transitions that complete a character have
    /// [`CHARACTER_OK`] as their destination.
    pub fn publish<V: VmLoader>(&mut self, vm: &mut V) -> Result<u32, Error> {
        self.to_graph();

        let base = vm.next_state();
        let available = vm.limits().max_states.saturating_sub(base);
        let states = u32::try_from(self.states.len()).unwrap_or(u32::MAX);

        if states >= available {
            error!(
                "character class too big for the VM ({} states, {} available)",
                states, available
            );
            return Err(Error::TooManyStates { states, available });
        }

        vm.new_states(base, base + states.max(1))?;

        for (id, state) in self.states.iter().enumerate() {
            let source = base + id as u32;
            for (code, next) in state.transitions.iter() {
                for (first, last) in code.ranges() {
                    vm.new_transition_range(
                        source,
                        first,
                        last,
                        base + *next as u32,
                    )?;
                }
            }
            if let Some(leaf) = state.leaf {
                for (first, last) in leaf.ranges() {
                    vm.new_transition_range(source, first, last, CHARACTER_OK)?;
                }
            }
        }

        Ok(base)
    }

    /// Writes the automaton in GUESS graph definition format.
    ///
    /// Leafs are represented by synthetic nodes named after the state they
    /// belong to, followed by `L`.
    pub fn write_gdf<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "nodedef> name VARCHAR,label VARCHAR,Modularity Class VARCHAR")?;

        for id in 0..self.states.len() {
            writeln!(w, r#""{0}","{0}","1""#, id)?;
        }

        for (id, _) in self.leafs() {
            writeln!(w, r#""{0}L","{0}L","2""#, id)?;
        }

        writeln!(w, "edgedef> node1,node2,label VARCHAR,directed BOOLEAN")?;

        for (id, state) in self.states.iter().enumerate() {
            for (code, next) in state.transitions.iter() {
                writeln!(w, r#""{}","{}","{}",true"#, id, next, code)?;
            }
        }

        for (id, leaf) in self.leafs() {
            writeln!(w, r#""{0}","{0}L","{1}",true"#, id, leaf)?;
        }

        Ok(())
    }

    fn leafs(&self) -> impl Iterator<Item = (StateId, Code)> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(id, state)| state.leaf.map(|leaf| (id, leaf)))
    }

    fn clear(&mut self) {
        self.states.clear();
        self.is_tree = true;
    }

    fn check_encoding(&self, other: &CharClass) -> Result<(), Error> {
        if self.encoding != other.encoding {
            return Err(Error::EncodingMismatch(self.encoding, other.encoding));
        }
        Ok(())
    }
}

impl Display for CharClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} class, {} states, {}",
            self.encoding,
            self.states.len(),
            if self.is_tree { "tree" } else { "graph" }
        )?;
        for (id, state) in self.states.iter().enumerate() {
            for (code, next) in state.transitions.iter() {
                writeln!(f, "{:5}: [{}] -> {}", id, code, next)?;
            }
            if let Some(leaf) = state.leaf {
                writeln!(f, "{:5}: [{}] leaf", id, leaf)?;
            }
        }
        Ok(())
    }
}

/// Case folding cycles.
///
/// Maps every character with alternative cases to the next character in its
/// cycle. Most cycles have two members (`a` -> `A` -> `a`), but some have
/// three (`k` -> `K` -> `K` (Kelvin sign) -> `k`).
#[derive(Debug, Default, Clone)]
pub struct CaseFolding(FxHashMap<char, char>);

impl CaseFolding {
    /// Creates an empty case folding table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry to the table.
    pub fn insert(&mut self, from: char, to: char) {
        self.0.insert(from, to);
    }

    /// Returns the character that follows `ch` in its cycle.
    pub fn next(&self, ch: char) -> Option<char> {
        self.0.get(&ch).copied()
    }
}

impl FromIterator<(char, char)> for CaseFolding {
    fn from_iter<T: IntoIterator<Item = (char, char)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
