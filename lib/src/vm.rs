/*! Interface between the compiler and the matching virtual machine.

Compiled patterns are handed to the VM through a [`VmLoader`]. Character
classes are published as blocks of automaton states, each state holding a
list of transition ranges; programs are appended to the VM's bytecode area,
and every compiled pattern registers a [`StartDescriptor`] which is the
entry point used by the VM for matching it.

The interpreter itself is not part of this crate. [`MemoryVm`] is a loader
that simply keeps everything it receives in memory, which is useful for
inspecting the result of a compilation.
*/

use thiserror::Error;

use crate::compiler::{Instr, StartDescriptor};
use crate::config::VmLimits;

/// Destination used by transitions that complete a character.
pub const CHARACTER_OK: u32 = 0xFFFF;

/// Errors reported by a VM loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not enough VM states (requested {requested}, available {available})")]
    StatesExhausted { requested: u32, available: u32 },

    #[error("not enough bytecode space (requested {requested}, available {available})")]
    BytecodeExhausted { requested: u32, available: u32 },

    #[error("state block {first}..{last} doesn't start at the next free state")]
    BadStateBlock { first: u32, last: u32 },

    #[error("state {0} has not been allocated")]
    UnallocatedState(u32),

    #[error("unexpected start handle {0}")]
    BadStart(u32),
}

/// Operations that the compiler and the character classes need from the
/// target virtual machine.
pub trait VmLoader {
    /// Capacity limits of the VM.
    fn limits(&self) -> &VmLimits;

    /// Returns the index of the first unallocated state.
    fn next_state(&self) -> u32;

    /// Allocates the states in the range `first..last`. `first` must be the
    /// value returned by [`VmLoader::next_state`].
    fn new_states(&mut self, first: u32, last: u32) -> Result<(), Error>;

    /// Adds a transition from `state` to `dest` for the bytes in
    /// `first..=last`.
    fn new_transition_range(
        &mut self,
        state: u32,
        first: u8,
        last: u8,
        dest: u32,
    ) -> Result<(), Error>;

    /// Returns the address where the next program will be loaded.
    fn next_program_address(&self) -> u32;

    /// Appends a program, whose addresses must be already absolute, and
    /// returns the address of its first instruction.
    fn load_program(&mut self, program: &[Instr]) -> Result<u32, Error>;

    /// Returns the handle that will be assigned to the next start
    /// descriptor.
    fn next_start(&self) -> u32;

    /// Registers a start descriptor under the given handle.
    fn load_start(
        &mut self,
        handle: u32,
        start: &StartDescriptor,
    ) -> Result<(), Error>;
}

/// A transition range stored in [`MemoryVm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRange {
    pub first: u8,
    pub last: u8,
    pub dest: u32,
}

/// A [`VmLoader`] that keeps states, bytecode and start descriptors in
/// memory.
#[derive(Debug, Default)]
pub struct MemoryVm {
    limits: VmLimits,
    states: Vec<Vec<TransitionRange>>,
    program: Vec<Instr>,
    starts: Vec<StartDescriptor>,
}

impl MemoryVm {
    /// Creates an empty VM with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty VM with the given limits.
    pub fn with_limits(limits: VmLimits) -> Self {
        Self { limits, ..Default::default() }
    }

    /// Number of allocated states.
    pub fn state_count(&self) -> u32 {
        self.states.len() as u32
    }

    /// Transition ranges of a state, in the order they were added.
    pub fn transitions(&self, state: u32) -> &[TransitionRange] {
        self.states.get(state as usize).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// All the bytecode loaded so far.
    pub fn program(&self) -> &[Instr] {
        self.program.as_slice()
    }

    /// All the start descriptors loaded so far, indexed by handle.
    pub fn starts(&self) -> &[StartDescriptor] {
        self.starts.as_slice()
    }

    /// Returns the destination of the transition from `state` for `byte`,
    /// if any.
    pub fn step(&self, state: u32, byte: u8) -> Option<u32> {
        self.transitions(state)
            .iter()
            .find(|r| r.first <= byte && byte <= r.last)
            .map(|r| r.dest)
    }

    /// Returns true if the class published at `base` accepts `bytes` as one
    /// complete character.
    pub fn accepts(&self, base: u32, bytes: &[u8]) -> bool {
        let mut state = base;
        for (i, byte) in bytes.iter().enumerate() {
            let is_last = i == bytes.len() - 1;
            let dest = self.transitions(state).iter().find(|r| {
                r.first <= *byte
                    && *byte <= r.last
                    && (r.dest == CHARACTER_OK) == is_last
            });
            match dest {
                Some(r) if is_last => return r.dest == CHARACTER_OK,
                Some(r) => state = r.dest,
                None => return false,
            }
        }
        false
    }
}

impl VmLoader for MemoryVm {
    fn limits(&self) -> &VmLimits {
        &self.limits
    }

    fn next_state(&self) -> u32 {
        self.state_count()
    }

    fn new_states(&mut self, first: u32, last: u32) -> Result<(), Error> {
        if first != self.state_count() || last < first {
            return Err(Error::BadStateBlock { first, last });
        }
        if last > self.limits.max_states {
            return Err(Error::StatesExhausted {
                requested: last - first,
                available: self.limits.max_states.saturating_sub(first),
            });
        }
        self.states.resize_with(last as usize, Vec::new);
        Ok(())
    }

    fn new_transition_range(
        &mut self,
        state: u32,
        first: u8,
        last: u8,
        dest: u32,
    ) -> Result<(), Error> {
        let transitions = self
            .states
            .get_mut(state as usize)
            .ok_or(Error::UnallocatedState(state))?;
        transitions.push(TransitionRange { first, last, dest });
        Ok(())
    }

    fn next_program_address(&self) -> u32 {
        self.program.len() as u32
    }

    fn load_program(&mut self, program: &[Instr]) -> Result<u32, Error> {
        let base = self.next_program_address();
        let requested = program.len() as u32;
        let available = self.limits.max_bytecode.saturating_sub(base);
        if requested > available {
            return Err(Error::BytecodeExhausted { requested, available });
        }
        self.program.extend_from_slice(program);
        Ok(base)
    }

    fn next_start(&self) -> u32 {
        self.starts.len() as u32
    }

    fn load_start(
        &mut self,
        handle: u32,
        start: &StartDescriptor,
    ) -> Result<(), Error> {
        if handle != self.next_start() {
            return Err(Error::BadStart(handle));
        }
        self.starts.push(start.clone());
        Ok(())
    }
}
