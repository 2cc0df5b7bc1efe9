/*! Compiles annotated regular expression trees into VM programs.

The input of the compiler is a [`ReTree`] whose character classes have been
published to the VM already. Compiling a tree goes through these steps:

1. Start attributes: patterns that begin with `\A` or `^` are flagged so
   that the VM can use a faster way of finding match starts.
2. Group numbering: capture groups get their marks, backreferences are
   resolved and the masks for clearing nested groups are computed.
3. Guard marking: repeats that allow advancing the anchor after a failure
   get a guard.
4. Emission: the tree is lowered into a [`Program`].
5. Loading: the program is relocated to the next free address in the VM and
   loaded, together with the [`StartDescriptor`] that lets the VM run it.

Nothing is loaded into the VM unless every step succeeds.
*/

use log::{debug, error};
use rustc_hash::FxHashMap;

use crate::config::VmLimits;
use crate::vm::VmLoader;

pub use crate::compiler::errors::Error;
pub use crate::compiler::groups::{GroupNumbering, MARK_MASK};
pub use crate::compiler::guards::LOOP_THRESHOLD_FOR_GUARDS;
pub use crate::compiler::instr::{Instr, Program};
pub use crate::compiler::ir::*;

use crate::compiler::emit::Emitter;
use crate::compiler::groups::number_groups;
use crate::compiler::guards::mark_controlling_repeats;

mod dfs;
mod emit;
mod errors;
mod groups;
mod guards;
pub mod instr;
mod ir;

#[cfg(test)]
mod tests;

/// The search starts at sector boundaries, `offset` and `stride` in the
/// start descriptor describe the sectors.
pub const START_SECTOR: u16 = 0x8000;
/// Matches can only start at the beginning of the buffer.
pub const START_FIXED_ANCHOR: u16 = 0x4000;
/// The anchor is not advanced after a failure.
pub const START_NOINC_ANCHOR: u16 = 0x2000;
/// The program reports which alternative matched.
pub const START_RESERVED_MATCH: u16 = 0x1000;

/// Entry point registered in the VM for a compiled pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartDescriptor {
    /// Byte order bits and `START_*` flags.
    pub command: u16,
    /// Address of the first instruction of the program.
    pub start_address: u32,
    /// Number of marks used by the program.
    pub group_count: u8,
    pub offset: u32,
    pub stride: u32,
    pub guard_count: u32,
    /// Groups that are the target of some backreference.
    pub backref_mask: u32,
    /// Mask for clearing the marks nested in each group.
    pub sub_masks: Vec<u32>,
}

/// Result of compiling a pattern into a VM.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Handle of the start descriptor in the VM.
    pub start_handle: u32,
    /// Number of marks used by the program.
    pub group_count: u8,
    /// Mark index of each named group.
    pub names: FxHashMap<String, u8>,
    /// Position of each group in the order in which groups end.
    pub end_order: FxHashMap<u8, usize>,
    /// The descriptor that was loaded in the VM.
    pub start: StartDescriptor,
}

/// Compiles [`ReTree`]s into VM programs.
///
/// ```ignore
/// let mut vm = MemoryVm::new();
/// let compiled = Compiler::new()
///     .index_alternatives(true)
///     .compile(&mut tree, &mut vm)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    index_alternatives: bool,
    asynchronous: bool,
    sector: Option<(u32, u32)>,
    limits: VmLimits,
}

impl Compiler {
    /// Creates a compiler with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// If true, the program records which top-level alternative matched in
    /// a reserved mark. The alternatives must have an
    /// [`Node::alt_index`].
    pub fn index_alternatives(mut self, yes: bool) -> Self {
        self.index_alternatives = yes;
        self
    }

    /// If true, the anchor is not advanced with a fixed stride. This is
    /// used for patterns that are fed with input asynchronously.
    pub fn asynchronous(mut self, yes: bool) -> Self {
        self.asynchronous = yes;
        self
    }

    /// Restricts match starts to sector boundaries. Sectors start at
    /// `offset` and are `stride` bytes long.
    pub fn sector(mut self, offset: u32, stride: u32) -> Self {
        self.sector = Some((offset, stride));
        self
    }

    /// Limits used by [`Compiler::emit`]. When compiling into a VM, the
    /// limits of the VM are used instead.
    pub fn limits(mut self, limits: VmLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Compiles the tree and loads the resulting program and its start
    /// descriptor into the VM.
    ///
    /// The tree is annotated in the process. On error, the VM is left
    /// untouched.
    pub fn compile<V: VmLoader>(
        &self,
        tree: &mut ReTree,
        vm: &mut V,
    ) -> Result<Compiled, Error> {
        let limits = *vm.limits();
        let (program, mut start, groups) = self.build(tree, &limits)?;

        let address = vm.next_program_address();

        if address as u64 + program.len() as u64 > limits.max_bytecode as u64
        {
            error!(
                "program with {} instructions doesn't fit at address {}",
                program.len(),
                address
            );
            return Err(Error::ProgramTooLarge { len: program.len(), address });
        }

        let start_address = vm.load_program(&program.relocate(address))?;
        start.start_address = start_address;

        let start_handle = vm.next_start();
        vm.load_start(start_handle, &start)?;

        debug!(
            "program loaded at {:05x}, start descriptor {}",
            start_address, start_handle
        );

        Ok(Compiled {
            start_handle,
            group_count: groups.group_count,
            names: groups.names,
            end_order: groups.end_order,
            start,
        })
    }

    /// Compiles the tree without loading it anywhere. The program is
    /// returned with relative addresses.
    pub fn emit(&self, tree: &mut ReTree) -> Result<Program, Error> {
        let (program, _, _) = self.build(tree, &self.limits)?;
        Ok(program)
    }

    fn build(
        &self,
        tree: &mut ReTree,
        limits: &VmLimits,
    ) -> Result<(Program, StartDescriptor, GroupNumbering), Error> {
        let root = tree.root().ok_or(Error::NoRoot)?;

        mark_start_attributes(tree, root);

        let mut command = u16::from(tree.endian_mask & 0xF);
        let mut stride = tree.stride;
        let mut offset = 0;

        if let Some((sector_offset, sector_stride)) = self.sector {
            command |= START_SECTOR;
            offset = sector_offset;
            stride = sector_stride;
        } else if self.asynchronous {
            stride = 0;
        }

        if tree.get(root).attrs.contains(NodeAttr::StartBufferStart) {
            command |= START_FIXED_ANCHOR;
        }

        if self.index_alternatives {
            command |= START_RESERVED_MATCH;
        }

        let groups = number_groups(tree, root, self.index_alternatives, limits)?;
        let guard_count = mark_controlling_repeats(tree, root, limits)?;
        let program = Emitter::new(tree, *limits, &groups).emit(root)?;

        debug!("compiled program: {}", program);

        let start = StartDescriptor {
            command,
            start_address: 0,
            group_count: groups.group_count,
            offset,
            stride,
            guard_count,
            backref_mask: groups.backref_mask,
            sub_masks: groups.sub_masks.clone(),
        };

        Ok((program, start, groups))
    }
}

/// Flags the root when every match must start at the beginning of the
/// buffer, or at the beginning of a line.
///
/// Only the leading nodes of the pattern are looked at, following the
/// first child of groups and of unbounded repeats. An assertion found
/// inside a repeat doesn't count.
fn mark_start_attributes(tree: &mut ReTree, root: NodeIdx) {
    let mut idx = root;
    let mut below_loop = false;

    let attr = loop {
        let node = tree.get(idx);
        match &node.kind {
            NodeKind::Group if !node.attrs.contains(NodeAttr::NotConsume) => {}
            NodeKind::Repeat { max, .. }
                if !below_loop
                    && max.map_or(true, |max| max == COUNT_UNMEASURED) =>
            {
                below_loop = true;
            }
            NodeKind::Action(Action::BufferStart) if !below_loop => {
                break NodeAttr::StartBufferStart;
            }
            NodeKind::Action(Action::TextStart) if !below_loop => {
                break NodeAttr::StartAfterNewline;
            }
            _ => return,
        }
        match node.first_child() {
            Some(child) => idx = child,
            None => return,
        }
    };

    tree.get_mut(root).attrs.set(attr);
}
