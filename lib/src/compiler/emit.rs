/*! Lowering of an annotated [`ReTree`] into a VM program.

Each node is lowered by instantiating one or more templates from
[`crate::compiler::instr`]. Alternatives and optional repeats start new
threads with forks whose targets are not known until the code that follows
them has been emitted, so a `NULL` placeholder is emitted first and patched
later. Every placeholder must be patched by the time the program is
finished.
*/

use log::{error, info};

use crate::compiler::errors::Error;
use crate::compiler::groups::GroupNumbering;
use crate::compiler::instr::*;
use crate::compiler::ir::{
    Action, AuxClass, Backref, ClassRef, GraphemeBreak, NodeAttr, NodeIdx,
    NodeKind, ReTree, COUNT_UNMEASURED,
};
use crate::config::{VmLimits, MARK_MASK_BITS};

/// Number of instructions emitted for a grapheme boundary.
const GRAPHEME_LEN: usize = 20;

/// Single-character repeats are enumerated up to this many times, longer
/// ones use a counting loop.
const ENUMERATION_LIMIT: i64 = 64;

pub(crate) struct Emitter<'t> {
    tree: &'t mut ReTree,
    limits: VmLimits,
    alt_mark: Option<u8>,
    program: Vec<Instr>,
    /// Next free loop counter.
    counter: u8,
    /// Next free mark, marks below this are in use.
    next_mark: u8,
    /// Return addresses for shared suffixes of alternations.
    b_return: Vec<usize>,
}

impl<'t> Emitter<'t> {
    pub fn new(
        tree: &'t mut ReTree,
        limits: VmLimits,
        groups: &GroupNumbering,
    ) -> Self {
        Self {
            tree,
            limits,
            alt_mark: groups.alt_mark,
            program: Vec::new(),
            counter: 0,
            next_mark: groups.group_count,
            b_return: Vec::new(),
        }
    }

    /// Emits the program for the tree rooted at `root`.
    pub fn emit(mut self, root: NodeIdx) -> Result<Program, Error> {
        let root_node = self.tree.get(root);

        if root_node.attrs.contains(NodeAttr::StartAfterNewline) {
            let newline = self.aux(AuxClass::Newline)?;
            self.append(SCAN_NEWLINE, &[newline, newline, newline])?;
        } else {
            let preview = root_node.preview;
            match preview {
                Some(class) => {
                    self.append(SCAN_FOR, &[operand("class", class)?])?
                }
                None => info!("no scan trigger for this pattern"),
            }
            if let Some(guard) = self.controlling_repeat(root)? {
                self.append(LOOP_GUARD, &[guard, 1])?;
            }
            // The scan marks the start by itself.
            if preview.is_none() {
                self.append(GROUP_START, &[0])?;
            }
        }

        self.node(root)?;

        // Publishing in its own thread keeps matches ordered by priority.
        self.append(YIELD, &[])?;
        self.append(PUBLISH_MATCH, &[])?;

        if let Some(addr) = self.program.iter().position(|i| i.opcode == NULL)
        {
            error!("instruction {:05x} was not patched", addr);
            return Err(Error::NullInstruction(addr));
        }

        Ok(Program::from(self.program))
    }

    fn node(&mut self, idx: NodeIdx) -> Result<(), Error> {
        match self.tree.get(idx).kind.clone() {
            NodeKind::Group => self.group(idx),
            NodeKind::Alt => self.alt(idx),
            NodeKind::Repeat { min, max } => self.repeat(idx, min, max),
            NodeKind::Class(class) => {
                self.append(CHAR, &[operand("class", class)?])
            }
            NodeKind::Action(action) => self.action(&action),
        }
    }

    fn group(&mut self, idx: NodeIdx) -> Result<(), Error> {
        let node = self.tree.get(idx);
        let attrs = node.attrs;
        let children = node.children.clone();
        let mark_index = node.mark_index;

        // Lookaheads and lazy groups need a mark even if they don't capture.
        let dynamic = mark_index.is_none()
            && attrs.intersects(NodeAttr::NotConsume | NodeAttr::NotGreedy);

        let mark = match mark_index {
            Some(mark) => Some(mark),
            None if dynamic => Some(self.new_mark()?),
            None => None,
        };

        match mark {
            Some(mark) if attrs.contains(NodeAttr::NotGreedy) => {
                self.append(GROUP_START_NOT_GREEDY, &[mark.into()])?
            }
            Some(mark) if mark != 0 => {
                self.append(GROUP_START, &[mark.into()])?
            }
            _ => {}
        }

        for child in children {
            self.node(child)?;
        }

        match mark {
            Some(mark) if attrs.contains(NodeAttr::NotConsume) => {
                self.append(GROUP_RESET, &[mark.into()])?
            }
            Some(mark) => self.append(GROUP_END, &[mark.into()])?,
            None => {}
        }

        if dynamic {
            self.free_mark();
        }

        Ok(())
    }

    fn alt(&mut self, idx: NodeIdx) -> Result<(), Error> {
        let children = self.tree.get(idx).children.clone();

        // Decision block, one fork per alternative.
        let mut forks = Vec::with_capacity(children.len());

        for child in children.iter().copied() {
            let preview = self.preview(child);
            let guard = self.controlling_repeat(child)?;

            match (guard, preview) {
                (Some(guard), Some(class)) => {
                    self.append(ALT_GUARD, &[guard, 3])?;
                    self.append(CHAR_ZERO, &[1, operand("class", class)?])?;
                }
                (Some(guard), None) => self.append(ALT_GUARD, &[guard, 2])?,
                (None, Some(class)) => {
                    self.append(CHAR_ZERO, &[1, operand("class", class)?])?
                }
                (None, None) => {}
            }

            forks.push(self.placeholder()?);
        }

        if self.b_return.is_empty() {
            self.append(STOP_THREAD, &[])?;
        } else {
            let ret = self.pop_b_return()?;
            let offset = relative(self.program.len(), ret);
            self.append(JUMP, &[offset])?;
        }

        let mut ends = Vec::with_capacity(children.len());

        for (child, fork) in children.iter().copied().zip(forks) {
            let here = self.program.len();
            let node = self.tree.get(child);

            if node.attrs.contains(NodeAttr::BNode) {
                // Shared suffixes are reached with a jump, and return to
                // the instruction after the jump when done.
                self.program[fork] = Instr::new(TEST, 0, relative(fork, here), false);
                self.b_return.push(fork + 1);
            } else {
                self.program[fork] =
                    Instr::new(NEW_THREAD, 0, relative(fork, here), false);
                if let (Some(mark), Some(alt_index)) = (self.alt_mark, node.alt_index)
                {
                    self.append(
                        ALT_MARK_ID,
                        &[mark.into(), operand("alternative index", alt_index)?],
                    )?;
                }
            }

            self.node(child)?;
            ends.push(self.placeholder()?);
        }

        let end = self.program.len();
        for pos in ends {
            self.program[pos] = Instr::new(NEW_THREAD, 0, relative(pos, end), true);
        }

        Ok(())
    }

    fn repeat(
        &mut self,
        idx: NodeIdx,
        min: u32,
        max: Option<u32>,
    ) -> Result<(), Error> {
        let node = self.tree.get(idx);
        let attrs = node.attrs;
        let guard_index = node.guard_index;
        let look_ahead = node.look_ahead;
        let child = node
            .first_child()
            .ok_or(Error::MalformedTree("repeat without a body"))?;

        let char_class = self
            .tree
            .get(child)
            .class()
            .map(|class| operand("class", class))
            .transpose()?;
        let controlling = attrs.contains(NodeAttr::Controlling);
        let anchor_class = char_class.filter(|_| controlling);

        if controlling && !attrs.contains(NodeAttr::ControlConsumed) {
            let guard = guard_index
                .ok_or(Error::MalformedTree("controlling repeat without a guard"))?;
            self.append(LOOP_GUARD, &[operand("guard", guard)?, 1])?;
        }

        // Required iterations.
        let mut count = i64::from(min);

        if let Some(class) = char_class {
            if count > 0 && count < ENUMERATION_LIMIT {
                let template = if controlling { CHAR_ANCHOR } else { CHAR };
                for _ in 0..count {
                    self.append(template, &[class])?;
                }
                count = 0;
            }
        }

        if count == 1 || (count > 1 && self.separate_control_loop(child)) {
            self.node(child)?;
            count -= 1;
            // A single remaining iteration doesn't need a loop either.
            if count == 1 {
                self.node(child)?;
                count = 0;
            }
        }

        if count > 1 {
            let counter = self.new_counter()?;
            self.append(LOOP_SET_COUNT, &[counter, operand("repeat count", count)?])?;
            let head = self.program.len();

            match anchor_class {
                Some(class) => self.append(CHAR_ANCHOR, &[class])?,
                None => self.node(child)?,
            }

            if char_class.is_none() {
                self.append(YIELD, &[])?;
            }

            let offset = relative(self.program.len(), head);
            self.append(LOOP_TEST, &[counter, offset])?;
            self.free_counter();
        }

        // Optional iterations.
        let count = match max {
            Some(max) if max != COUNT_UNMEASURED => {
                i64::from(max) - i64::from(min)
            }
            _ => i64::from(COUNT_UNMEASURED),
        };

        if let (true, Some(class)) = (attrs.contains(NodeAttr::Disjoint), char_class) {
            self.disjoint_repeat(class, count, controlling)?;
            self.tree.get_mut(idx).attrs.unset(NodeAttr::Controlling);
            return Ok(());
        }

        let look_ahead = match look_ahead {
            Some(next) => self.preview(next),
            None => None,
        };

        if count == 1 {
            let fork = self.lookahead_fork(look_ahead)?;
            match anchor_class {
                Some(class) => self.append(CHAR_ANCHOR, &[class])?,
                None => self.node(child)?,
            }
            let end = self.program.len();
            self.program[fork] = Instr::new(NEW_THREAD, 0, relative(fork, end), false);
        } else if count > 1 {
            let counter = self.new_counter()?;
            self.append(LOOP_SET_COUNT, &[counter, operand("repeat count", count)?])?;
            let head = self.program.len();

            let fork = self.lookahead_fork(look_ahead)?;
            match anchor_class {
                Some(class) => self.append(CHAR_ANCHOR, &[class])?,
                None => self.node(child)?,
            }

            self.append(YIELD, &[])?;
            let offset = relative(self.program.len(), head);
            self.append(LOOP_TEST, &[counter, offset])?;

            let end = self.program.len();
            self.program[fork] = Instr::new(NEW_THREAD, 0, relative(fork, end), false);

            self.append(LOOP_SET_COUNT, &[counter, 0])?;
            self.free_counter();
        }

        // The guard is only useful the first time the repeat is entered.
        self.tree.get_mut(idx).attrs.unset(NodeAttr::Controlling);

        Ok(())
    }

    /// Optional iterations of a single character that can't be confused
    /// with what follows. No threads are needed, every iteration branches
    /// past the repeat when the character doesn't match.
    fn disjoint_repeat(
        &mut self,
        class: i32,
        count: i64,
        controlling: bool,
    ) -> Result<(), Error> {
        let template =
            if controlling { CHAR_ANCHOR_BRANCH } else { CHAR_BRANCH_TO };

        // Past the enumeration, the branches land on the instruction that
        // resets the counter of the remainder loop.
        let (enumerated, branch_offset) = if count > ENUMERATION_LIMIT {
            (ENUMERATION_LIMIT, ENUMERATION_LIMIT + 2)
        } else {
            (count, count - 1)
        };

        for i in 0..enumerated {
            self.append(template, &[operand("branch", branch_offset - i)?, class])?;
        }

        if count > ENUMERATION_LIMIT {
            let counter = self.new_counter()?;
            let rest = operand("repeat count", count - enumerated)?;
            self.append(LOOP_SET_COUNT, &[counter, rest])?;
            let head = self.program.len();
            self.append(template, &[1, class])?;
            let offset = relative(self.program.len(), head);
            self.append(LOOP_TEST, &[counter, offset])?;
            self.append(LOOP_SET_COUNT, &[counter, 0])?;
            self.free_counter();
        }

        Ok(())
    }

    /// Emits the placeholder for the fork that skips an optional iteration,
    /// preceded by a lookahead test if possible. Returns the position of the
    /// placeholder.
    fn lookahead_fork(&mut self, look_ahead: Option<ClassRef>) -> Result<usize, Error> {
        match look_ahead {
            Some(class) => {
                self.append(JMP_LOOKAHEAD, &[1, operand("class", class)?])?
            }
            None => self.append(NULL_INSTR, &[])?,
        }
        Ok(self.program.len() - 1)
    }

    fn action(&mut self, action: &Action) -> Result<(), Error> {
        match action {
            Action::BufferStart => self.append(TEST_START, &[]),
            Action::BufferEnd => self.append(TEST_END, &[]),
            Action::Backreference(Backref::Index(mark)) => {
                self.append(BACKREFERENCE, &[(*mark).into()])
            }
            Action::Backreference(Backref::Name(name)) => {
                Err(Error::UnknownBackreference(name.clone()))
            }
            Action::TextStart => {
                let newline = self.aux(AuxClass::Newline)?;
                self.append(LINE_START, &[newline, newline])
            }
            Action::TextEnd => {
                let newline = self.aux(AuxClass::Newline)?;
                self.append(LINE_END, &[newline, newline])
            }
            Action::WordBoundary => {
                let word = self.aux(AuxClass::Word)?;
                let not_word = self.aux(AuxClass::NotWord)?;
                self.append(WORD_BOUNDARY, &[word, not_word, not_word, word])
            }
            Action::NotWordBoundary => {
                let word = self.aux(AuxClass::Word)?;
                let not_word = self.aux(AuxClass::NotWord)?;
                self.append(NOT_WORD_BOUNDARY, &[word, word, not_word, not_word])
            }
            Action::Grapheme => self.grapheme(),
        }
    }

    /// Emits the test for a grapheme cluster boundary. Every jump lands
    /// right after the whole sequence.
    fn grapheme(&mut self) -> Result<(), Error> {
        use GraphemeBreak::*;

        let gb = |this: &Self, value: GraphemeBreak| {
            this.aux(AuxClass::GraphemeBreak(value))
        };
        let next = self.program.len() + GRAPHEME_LEN;

        let offset = relative(self.program.len(), next);
        self.append(JUMP_IF_START, &[offset])?;
        let offset = relative(self.program.len(), next);
        self.append(JUMP_IF_END, &[offset])?;

        self.append(FAIL_BETWEEN, &[gb(self, Cr)?, gb(self, Lf)?])?;

        // The jump is the second instruction of these templates.
        let control = gb(self, ControlCrLf)?;
        let offset = relative(self.program.len() + 1, next);
        self.append(JUMP_IF_AFTER, &[control, offset])?;
        let offset = relative(self.program.len() + 1, next);
        self.append(JUMP_IF_BEFORE, &[control, offset])?;

        self.append(FAIL_BETWEEN, &[gb(self, L)?, gb(self, LVLvLvt)?])?;
        self.append(FAIL_BETWEEN, &[gb(self, LvV)?, gb(self, VT)?])?;
        self.append(FAIL_BETWEEN, &[gb(self, LvtT)?, gb(self, T)?])?;
        let ri = gb(self, RegionalIndicator)?;
        self.append(FAIL_BETWEEN, &[ri, ri])?;
        self.append(FAIL_BEFORE, &[gb(self, Extend)?])?;
        self.append(FAIL_BEFORE, &[gb(self, SpacingMark)?])?;
        self.append(FAIL_AFTER, &[gb(self, Prepend)?])?;

        // Makes sure the position is not in the middle of a character.
        let any = self.aux(AuxClass::Any)?;
        self.append(PREVIOUS, &[any])
    }

    /// Returns a class that the input must match for the node to make
    /// progress, if there's one that hasn't been used yet.
    fn preview(&mut self, idx: NodeIdx) -> Option<ClassRef> {
        let mut idx = idx;
        loop {
            let node = self.tree.get(idx);
            let used = node.attrs.contains(NodeAttr::UsedAsLookahead);
            match node.kind {
                NodeKind::Class(class) => {
                    if used {
                        return None;
                    }
                    self.mark_used(idx);
                    return Some(class);
                }
                NodeKind::Repeat { min, .. } if min > 0 => {
                    idx = node.first_child()?;
                }
                NodeKind::Repeat { .. } => {
                    let preview = node.preview.filter(|_| !used)?;
                    self.mark_used(idx);
                    return Some(preview);
                }
                NodeKind::Alt => {
                    let preview = node.preview?;
                    self.mark_used(idx);
                    return Some(preview);
                }
                NodeKind::Group => {
                    if node.attrs.contains(NodeAttr::NotConsume) {
                        return None;
                    }
                    if node.preview.is_some() {
                        return node.preview;
                    }
                    idx = node.first_child()?;
                }
                NodeKind::Action(_) => return None,
            }
        }
    }

    fn mark_used(&mut self, idx: NodeIdx) {
        self.tree.get_mut(idx).attrs.set(NodeAttr::UsedAsLookahead);
    }

    /// Returns the guard of the controlling repeat at the start of the
    /// node, if any, and flags the repeat so that the guard is tested only
    /// once. Alternations are not looked into.
    fn controlling_repeat(&mut self, idx: NodeIdx) -> Result<Option<i32>, Error> {
        let mut idx = idx;
        loop {
            let node = self.tree.get(idx);
            match node.kind {
                NodeKind::Group if !node.attrs.contains(NodeAttr::NotConsume) => {
                    match node.first_child() {
                        Some(child) => idx = child,
                        None => return Ok(None),
                    }
                }
                NodeKind::Repeat { .. } => {
                    if node.attrs.contains(NodeAttr::ControlConsumed) {
                        return Ok(None);
                    }
                    if node.attrs.contains(NodeAttr::Controlling) {
                        let guard = node.guard_index.ok_or(
                            Error::MalformedTree("controlling repeat without a guard"),
                        )?;
                        self.tree.get_mut(idx).attrs.set(NodeAttr::ControlConsumed);
                        return operand("guard", guard).map(Some);
                    }
                    match node.first_child() {
                        Some(child) => idx = child,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    /// Tells whether a required repeat must emit its first iteration apart
    /// from the rest. This is the case when the body starts with a
    /// controlling repeat that is followed by something else, as only the
    /// first iteration can advance the anchor.
    fn separate_control_loop(&self, idx: NodeIdx) -> bool {
        let mut idx = idx;
        let mut opt_found = false;
        loop {
            let node = self.tree.get(idx);
            match node.kind {
                NodeKind::Group => {
                    if node.attrs.contains(NodeAttr::NotConsume) {
                        return false;
                    }
                    opt_found |= node.children.len() > 1;
                    match node.first_child() {
                        Some(child) => idx = child,
                        None => return false,
                    }
                }
                NodeKind::Repeat { min, .. } => {
                    if node.attrs.contains(NodeAttr::Controlling) {
                        return opt_found;
                    }
                    if min == 0 {
                        return false;
                    }
                    match node.first_child() {
                        Some(child) => idx = child,
                        None => return false,
                    }
                }
                _ => return false,
            }
        }
    }

    fn aux(&self, aux: AuxClass) -> Result<i32, Error> {
        let class = self.tree.aux_class(aux).ok_or_else(|| {
            error!("auxiliary class `{}` is required but not registered", aux);
            Error::MissingAuxClass(aux)
        })?;
        operand("class", class)
    }

    fn append(&mut self, template: Template, args: &[i32]) -> Result<(), Error> {
        self.program.extend(substitute(template, args)?);
        Ok(())
    }

    /// Emits a `NULL` to be patched later, and returns its position.
    fn placeholder(&mut self) -> Result<usize, Error> {
        self.append(NULL_INSTR, &[])?;
        Ok(self.program.len() - 1)
    }

    fn new_counter(&mut self) -> Result<i32, Error> {
        if self.counter >= self.limits.max_counters {
            error!(
                "loop nesting exceeds the maximum depth of {}",
                self.limits.max_counters
            );
            return Err(Error::TooManyCounters(self.limits.max_counters));
        }
        let counter = self.counter;
        self.counter += 1;
        Ok(counter.into())
    }

    fn free_counter(&mut self) {
        self.counter -= 1;
    }

    fn new_mark(&mut self) -> Result<u8, Error> {
        let max_marks = self.limits.max_mark_pairs.min(MARK_MASK_BITS);
        if self.next_mark >= max_marks {
            error!(
                "not enough marks for lookaheads and lazy groups (maximum is {})",
                max_marks
            );
            return Err(Error::TooManyDynamicMarks(max_marks));
        }
        let mark = self.next_mark;
        self.next_mark += 1;
        Ok(mark)
    }

    fn free_mark(&mut self) {
        self.next_mark -= 1;
    }

    fn pop_b_return(&mut self) -> Result<usize, Error> {
        self.b_return.pop().ok_or(Error::EmptyBReturnStack)
    }
}

/// Converts a value into an instruction operand.
fn operand<T: Into<i64>>(what: &'static str, value: T) -> Result<i32, Error> {
    let value = value.into();
    i32::try_from(value).map_err(|_| {
        error!("{} {} doesn't fit in an instruction operand", what, value);
        Error::OperandOverflow { what, value }
    })
}

/// Offset from the instruction at `from` to the one at `to`.
#[inline]
fn relative(from: usize, to: usize) -> i32 {
    to as i32 - from as i32
}
