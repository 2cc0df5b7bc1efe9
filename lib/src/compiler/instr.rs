/*!
Instructions executed by the matching VM, and the templates used for
generating them.

Instruction format
------------------

Every instruction is a tuple `(opcode, index, address, halt)`. The meaning
of `index` and `address` depends on the opcode. The most common instruction
is the character test, which runs a character class published in the VM
against the input:

```text
  CHAR 12                   match the class rooted at state 12
  CHAR_ZERO_BRANCH 12 1     test the class without consuming input, and
                            skip the next instruction if it doesn't match
```

Opcodes that don't test characters are plain numbers, while character tests
and conditional jumps are bit sets: [`CHARACTER`] and [`TEST`] combined with
modifier bits. The `halt` flag tells the VM to stop the current thread
after executing the instruction.

While a program is being generated, the `address` of forks and tests is
relative to the instruction that contains it. The compiler relocates the
program to absolute addresses right before loading it into the VM.

Templates
---------

The compiler never builds instructions one by one. Every construct is
lowered by instantiating a template, a fixed sequence of instructions where
some operands are left as slots to be filled in with the actual class
references, counters and offsets, see [`substitute`].
*/

use std::fmt::{Display, Formatter};

use log::error;

use crate::compiler::errors::Error;

/// Character test.
pub const CHARACTER: u8 = 0x20;
/// The character test sets the guard of the controlling repeat.
pub const CHAR_SET_GUARD: u8 = 0x10;
/// The character test doesn't consume input.
pub const CHAR_ZERO_WIDTH: u8 = 0x08;
/// The character continues the one tested by the previous instruction.
pub const CHAR_CONTINUE: u8 = 0x04;
/// Tests the character before the current position.
pub const CHAR_PREVIOUS: u8 = 0x02;
/// On failure, jump `index + 1` instructions ahead instead of failing.
pub const CHAR_BRANCH: u8 = 0x01;

/// Conditional jump. Without modifiers it's an unconditional jump.
pub const TEST: u8 = 0x40;
/// Negates the result of the test.
pub const TEST_NOT: u8 = 0x01;
/// Tests the VM flags in `index`.
pub const TEST_FLAGS: u8 = 0x02;
/// Tests whether counter `index` has reached zero.
pub const TEST_COUNT: u8 = 0x04;
/// Tests guard `index`.
pub const TEST_GUARD: u8 = 0x08;
/// Matches the text captured by group `index`.
pub const TEST_BACK: u8 = 0x10;

pub const NEW_THREAD: u8 = 0x01;
pub const RESET_TO_MARK: u8 = 0x02;
pub const SET_COUNT: u8 = 0x03;
pub const PUBLISH: u8 = 0x04;
pub const SCAN: u8 = 0x05;
pub const SET_CONTEXT: u8 = 0x06;
pub const SET_MARK: u8 = 0x07;
pub const MARK_START: u8 = 0x0A;
pub const MARK_END: u8 = 0x0E;

/// Placeholder that must be patched before the program is finished.
pub const NULL: u8 = 0x00;

// VM flags tested by TEST_FLAGS.
pub const VM_CHARACTER_OK: i32 = 0x01;
pub const VM_START: i32 = 0x02;
pub const VM_ANCHOR: i32 = 0x04;
pub const VM_END: i32 = 0x08;
pub const VM_PUBLISH: i32 = 0x10;

/// A VM instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Instr {
    pub opcode: u8,
    pub index: i32,
    pub address: i32,
    pub halt: bool,
}

impl Instr {
    #[inline]
    pub const fn new(opcode: u8, index: i32, address: i32, halt: bool) -> Self {
        Self { opcode, index, address, halt }
    }

    /// True for instructions whose address is an offset within the program.
    #[inline]
    pub fn has_code_address(&self) -> bool {
        self.opcode == NEW_THREAD || self.opcode & TEST != 0
    }

    /// Writes the instruction in human-readable form, assuming that it is
    /// located at `addr` in a program with relative addresses.
    fn fmt_at(&self, f: &mut Formatter<'_>, addr: usize) -> std::fmt::Result {
        let target = addr as i64 + self.address as i64;

        if self.opcode & CHARACTER != 0 {
            write!(f, "CHAR")?;
            for (bit, suffix) in [
                (CHAR_SET_GUARD, "_GUARD"),
                (CHAR_ZERO_WIDTH, "_ZERO"),
                (CHAR_CONTINUE, "_CONT"),
                (CHAR_PREVIOUS, "_PREV"),
                (CHAR_BRANCH, "_BRANCH"),
            ] {
                if self.opcode & bit != 0 {
                    write!(f, "{}", suffix)?;
                }
            }
            write!(f, " {}", self.address)?;
            if self.opcode & CHAR_BRANCH != 0 {
                write!(f, " else {:05x}", addr as i64 + 1 + self.index as i64)?;
            }
            return Ok(());
        }

        if self.opcode & TEST != 0 {
            let modifiers = self.opcode & !TEST;
            if modifiers == 0 {
                return write!(f, "JUMP {:05x}", target);
            }
            if modifiers == TEST_NOT {
                return write!(f, "NOP");
            }
            write!(f, "TEST")?;
            for (bit, suffix) in [
                (TEST_NOT, "_NOT"),
                (TEST_FLAGS, "_FLAGS"),
                (TEST_COUNT, "_COUNT"),
                (TEST_GUARD, "_GUARD"),
                (TEST_BACK, "_BACK"),
            ] {
                if modifiers & bit != 0 {
                    write!(f, "{}", suffix)?;
                }
            }
            write!(f, " {} {:05x}", self.index, target)?;
            if modifiers & TEST_FLAGS != 0 {
                let names: Vec<&str> = [
                    (VM_CHARACTER_OK, "CHARACTER_OK"),
                    (VM_START, "START"),
                    (VM_ANCHOR, "ANCHOR"),
                    (VM_END, "END"),
                    (VM_PUBLISH, "PUBLISH"),
                ]
                .into_iter()
                .filter(|(flag, _)| self.index & flag != 0)
                .map(|(_, name)| name)
                .collect();
                write!(f, " ({})", names.join("|"))?;
            }
            return Ok(());
        }

        match self.opcode {
            NEW_THREAD => write!(f, "FORK {:05x}", target),
            RESET_TO_MARK => write!(f, "RESET_TO_MARK {}", self.index),
            SET_COUNT => write!(f, "SET_COUNT {} {}", self.index, self.address),
            PUBLISH => write!(f, "PUBLISH"),
            SCAN => write!(f, "SCAN {}", self.address),
            SET_CONTEXT => write!(f, "SET_CONTEXT {}", self.index),
            SET_MARK => write!(f, "SET_MARK {} {}", self.index, self.address),
            MARK_START => write!(f, "MARK_START {}", self.index),
            MARK_END => write!(f, "MARK_END {}", self.index),
            NULL => write!(f, "NULL"),
            opcode => write!(f, "UNKNOWN {:#04x}", opcode),
        }
    }
}

/// An operand in a template instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Fixed(i32),
    /// Filled in with the next argument passed to [`substitute`].
    Subst,
}

use Slot::{Fixed, Subst};

/// An instruction in a template.
#[derive(Clone, Copy, Debug)]
pub struct TemplateInstr {
    pub opcode: u8,
    pub index: Slot,
    pub address: Slot,
    pub halt: bool,
}

const fn t(opcode: u8, index: Slot, address: Slot) -> TemplateInstr {
    TemplateInstr { opcode, index, address, halt: false }
}

const fn h(opcode: u8, index: Slot, address: Slot) -> TemplateInstr {
    TemplateInstr { opcode, index, address, halt: true }
}

pub type Template = &'static [TemplateInstr];

/// Finds the next newline and starts matching after it. Used when the
/// pattern starts with `^`.
pub static SCAN_NEWLINE: Template = &[
    t(TEST | TEST_FLAGS, Fixed(VM_START), Fixed(4)),
    t(CHARACTER | CHAR_PREVIOUS | CHAR_BRANCH, Fixed(1), Subst),
    t(TEST, Fixed(0), Fixed(2)),
    t(SCAN, Fixed(0), Subst),
    t(CHARACTER | CHAR_BRANCH, Fixed(1), Subst),
    t(TEST, Fixed(0), Fixed(-1)),
    t(MARK_START, Fixed(0), Fixed(0)),
];

pub static GROUP_START: Template = &[t(MARK_START, Subst, Fixed(0))];

pub static GROUP_START_NOT_GREEDY: Template =
    &[t(SET_CONTEXT, Subst, Fixed(0))];

pub static GROUP_END: Template =
    &[h(NEW_THREAD, Fixed(0), Fixed(1)), t(MARK_END, Subst, Fixed(0))];

pub static GROUP_RESET: Template = &[t(RESET_TO_MARK, Subst, Fixed(0))];

/// Skips the fork that follows unless the class matches at the current
/// position.
pub static JMP_LOOKAHEAD: Template = &[
    t(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Subst, Subst),
    t(NULL, Fixed(0), Fixed(0)),
];

pub static ALT_MARK_ID: Template = &[t(SET_MARK, Subst, Subst)];

pub static ALT_GUARD: Template =
    &[t(TEST | TEST_NOT | TEST_GUARD, Subst, Subst)];

pub static LOOP_SET_COUNT: Template = &[t(SET_COUNT, Subst, Subst)];

pub static LOOP_TEST: Template =
    &[t(TEST | TEST_NOT | TEST_COUNT, Subst, Subst)];

pub static LOOP_GUARD: Template = &[h(TEST | TEST_GUARD, Subst, Subst)];

pub static YIELD: Template = &[h(NEW_THREAD, Fixed(0), Fixed(1))];

pub static LINE_START: Template = &[
    t(TEST | TEST_FLAGS, Fixed(VM_START), Fixed(3)),
    h(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(0), Subst),
    t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst),
];

pub static LINE_END: Template = &[
    t(TEST | TEST_FLAGS, Fixed(VM_END), Fixed(3)),
    t(CHARACTER | CHAR_ZERO_WIDTH, Fixed(0), Subst),
    h(CHARACTER | CHAR_PREVIOUS | CHAR_BRANCH, Fixed(0), Subst),
];

pub static BACKREFERENCE: Template =
    &[h(TEST | TEST_BACK, Subst, Fixed(1))];

pub static WORD_BOUNDARY: Template = &[
    t(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(3), Subst),
    t(TEST | TEST_FLAGS, Fixed(VM_START), Fixed(6)),
    t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst),
    t(TEST, Fixed(0), Fixed(4)),
    t(TEST | TEST_FLAGS, Fixed(VM_END), Fixed(2)),
    t(CHARACTER | CHAR_ZERO_WIDTH, Fixed(0), Subst),
    t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst),
];

pub static NOT_WORD_BOUNDARY: Template = &[
    t(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(2), Subst),
    t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst),
    t(TEST, Fixed(0), Fixed(5)),
    t(TEST | TEST_FLAGS, Fixed(VM_END), Fixed(2)),
    t(CHARACTER | CHAR_ZERO_WIDTH, Fixed(0), Subst),
    t(TEST | TEST_FLAGS, Fixed(VM_START), Fixed(2)),
    t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst),
];

pub static TEST_START: Template =
    &[h(TEST | TEST_FLAGS, Fixed(VM_START), Fixed(1))];

pub static TEST_END: Template =
    &[h(TEST | TEST_FLAGS, Fixed(VM_END), Fixed(1))];

pub static JUMP_IF_START: Template =
    &[t(TEST | TEST_FLAGS, Fixed(VM_START), Subst)];

pub static JUMP_IF_END: Template =
    &[t(TEST | TEST_FLAGS, Fixed(VM_END), Subst)];

/// Fails if the previous character is in the first class and the next one
/// is in the second.
pub static FAIL_BETWEEN: Template = &[
    t(CHARACTER | CHAR_PREVIOUS | CHAR_BRANCH, Fixed(1), Subst),
    h(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(0), Subst),
];

pub static JUMP_IF_AFTER: Template = &[
    t(CHARACTER | CHAR_PREVIOUS | CHAR_BRANCH, Fixed(1), Subst),
    t(TEST, Fixed(0), Subst),
];

pub static JUMP_IF_BEFORE: Template = &[
    t(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(1), Subst),
    t(TEST, Fixed(0), Subst),
];

pub static FAIL_AFTER: Template =
    &[h(CHARACTER | CHAR_PREVIOUS | CHAR_BRANCH, Fixed(0), Subst)];

pub static FAIL_BEFORE: Template =
    &[h(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Fixed(0), Subst)];

pub static PREVIOUS: Template = &[t(CHARACTER | CHAR_PREVIOUS, Fixed(0), Subst)];

pub static CHAR: Template = &[t(CHARACTER, Fixed(0), Subst)];

pub static CHAR_BRANCH_TO: Template =
    &[t(CHARACTER | CHAR_BRANCH, Subst, Subst)];

pub static CHAR_ANCHOR: Template =
    &[t(CHARACTER | CHAR_SET_GUARD, Fixed(0), Subst)];

pub static CHAR_ANCHOR_BRANCH: Template =
    &[t(CHARACTER | CHAR_BRANCH | CHAR_SET_GUARD, Subst, Subst)];

pub static CHAR_ZERO: Template =
    &[t(CHARACTER | CHAR_ZERO_WIDTH | CHAR_BRANCH, Subst, Subst)];

pub static SCAN_FOR: Template = &[t(SCAN, Fixed(0), Subst)];

pub static LOOKAHEAD: Template =
    &[t(CHARACTER | CHAR_ZERO_WIDTH, Fixed(0), Subst)];

pub static PUBLISH_MATCH: Template = &[h(PUBLISH, Fixed(0), Fixed(0))];

pub static NULL_INSTR: Template = &[t(NULL, Fixed(0), Fixed(0))];

pub static NOP: Template = &[t(TEST | TEST_NOT, Fixed(0), Fixed(0))];

pub static STOP_THREAD: Template = &[h(TEST | TEST_NOT, Fixed(0), Fixed(0))];

pub static JUMP: Template = &[t(TEST, Fixed(0), Subst)];

/// Instantiates a template, filling its slots in order with `args`.
///
/// Returns an error if the number of arguments is not exactly the number of
/// slots in the template.
pub fn substitute(template: Template, args: &[i32]) -> Result<Vec<Instr>, Error> {
    let expected = template
        .iter()
        .map(|instr| {
            usize::from(instr.index == Subst) + usize::from(instr.address == Subst)
        })
        .sum();

    if expected != args.len() {
        error!(
            "template with {} slots instantiated with {} arguments",
            expected,
            args.len()
        );
        return Err(Error::TemplateArity { expected, found: args.len() });
    }

    let mut args = args.iter().copied();
    let mut fill = |slot: Slot| match slot {
        Fixed(value) => value,
        Subst => args.next().unwrap_or_default(),
    };

    Ok(template
        .iter()
        .map(|instr| {
            let index = fill(instr.index);
            let address = fill(instr.address);
            Instr::new(instr.opcode, index, address, instr.halt)
        })
        .collect())
}

/// A program where the addresses of forks and jumps are relative to the
/// instruction that contains them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program(Vec<Instr>);

impl Program {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn instrs(&self) -> &[Instr] {
        self.0.as_slice()
    }

    /// Returns a copy of the program with absolute addresses, for loading it
    /// at `base`.
    pub fn relocate(&self, base: u32) -> Vec<Instr> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, instr)| {
                let mut instr = *instr;
                if instr.has_code_address() {
                    instr.address += base as i32 + i as i32;
                }
                instr
            })
            .collect()
    }
}

impl From<Vec<Instr>> for Program {
    fn from(value: Vec<Instr>) -> Self {
        Self(value)
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        for (addr, instr) in self.0.iter().enumerate() {
            write!(f, "{:05x}: ", addr)?;
            instr.fmt_at(f, addr)?;
            if instr.halt {
                write!(f, " HALT")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
