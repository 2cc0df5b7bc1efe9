use pretty_assertions::assert_eq;

use crate::compiler::instr::{
    substitute, CHAR, NULL_INSTR, NEW_THREAD, WORD_BOUNDARY,
};
use crate::compiler::{
    Action, AuxClass, Backref, Compiler, Error, GraphemeBreak, NodeAttr,
    NodeIdx, NodeKind, ReTree, START_FIXED_ANCHOR, START_RESERVED_MATCH,
    START_SECTOR,
};
use crate::config::VmLimits;
use crate::vm::MemoryVm;

fn listing(tree: &mut ReTree) -> String {
    Compiler::new().emit(tree).unwrap().to_string()
}

fn lines(listing: &str) -> Vec<&str> {
    listing.lines().skip(1).collect()
}

/// `abc[x]{2,5}`
fn fixed_prefix_and_bounded_repeat() -> ReTree {
    let mut tree = ReTree::new();
    let a = tree.class(1);
    let b = tree.class(2);
    let c = tree.class(3);
    let x = tree.class(4);
    let rep = tree.repeat(x, 2, Some(5));
    let root = tree.group(vec![a, b, c, rep]);
    tree.set_root(root);
    tree
}

/// A group that is not captured.
fn plain_group(tree: &mut ReTree, children: Vec<NodeIdx>) -> NodeIdx {
    let group = tree.group(children);
    tree.with_attr(group, NodeAttr::NotCapture)
}

#[test]
fn template_arity() {
    assert_eq!(
        substitute(CHAR, &[]),
        Err(Error::TemplateArity { expected: 1, found: 0 })
    );

    assert_eq!(
        substitute(NULL_INSTR, &[7]),
        Err(Error::TemplateArity { expected: 0, found: 1 })
    );

    let instrs = substitute(WORD_BOUNDARY, &[1, 2, 3, 4]).unwrap();
    assert_eq!(instrs.len(), 7);
    assert_eq!(instrs[0].address, 1);
    assert_eq!(instrs[2].address, 2);
    assert_eq!(instrs[5].address, 3);
    assert_eq!(instrs[6].address, 4);
}

#[test]
fn alternation() {
    let mut tree = ReTree::new();
    let a = tree.class(10);
    let b = tree.class(11);
    let alt = tree.alt(vec![a, b]);
    let root = tree.group(vec![alt]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: CHAR_ZERO_BRANCH 10 else 00003
00002: FORK 00006
00003: CHAR_ZERO_BRANCH 11 else 00005
00004: FORK 00008
00005: NOP HALT
00006: CHAR 10
00007: FORK 0000a HALT
00008: CHAR 11
00009: FORK 0000a HALT
0000a: FORK 0000b HALT
0000b: MARK_END 0
0000c: FORK 0000d HALT
0000d: PUBLISH HALT
"#
    );
}

#[test]
fn groups() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let named = tree.named_group("x", vec![c1]);
    let c2 = tree.class(2);
    let non_capturing = plain_group(&mut tree, vec![c2]);
    let c3 = tree.class(3);
    let lookahead = tree.group(vec![c3]);
    tree.with_attr(lookahead, NodeAttr::NotConsume);
    let root = tree.group(vec![named, non_capturing, lookahead]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: MARK_START 1
00002: CHAR 1
00003: FORK 00004 HALT
00004: MARK_END 1
00005: CHAR 2
00006: MARK_START 2
00007: CHAR 3
00008: RESET_TO_MARK 2
00009: FORK 0000a HALT
0000a: MARK_END 0
0000b: FORK 0000c HALT
0000c: PUBLISH HALT
"#
    );

    assert_eq!(tree.get(root).mark_index, Some(0));
    assert_eq!(tree.get(named).mark_index, Some(1));
    assert_eq!(tree.get(non_capturing).mark_index, None);
    assert_eq!(tree.get(lookahead).mark_index, None);
}

#[test]
fn lazy_group() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let lazy = plain_group(&mut tree, vec![c1]);
    tree.with_attr(lazy, NodeAttr::NotGreedy);
    let root = tree.group(vec![lazy]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: SET_CONTEXT 1
00002: CHAR 1
00003: FORK 00004 HALT
00004: MARK_END 1
00005: FORK 00006 HALT
00006: MARK_END 0
00007: FORK 00008 HALT
00008: PUBLISH HALT
"#
    );
}

#[test]
fn nested_groups() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let g1 = tree.group(vec![c1]);
    let c2 = tree.class(2);
    let g3 = tree.group(vec![c2]);
    let g2 = tree.group(vec![g3]);
    let c3 = tree.class(3);
    let root = tree.group(vec![g1, g2, c3]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

    assert_eq!(compiled.group_count, 4);
    assert_eq!(tree.get(g1).mark_index, Some(1));
    assert_eq!(tree.get(g2).mark_index, Some(2));
    assert_eq!(tree.get(g3).mark_index, Some(3));

    assert_eq!(
        &compiled.start.sub_masks[..5],
        &[0xFFFFFFF0, 0xFFFFFFFD, 0xFFFFFFF3, 0xFFFFFFF7, 0xFFFFFFFF]
    );
    assert_eq!(compiled.start.sub_masks.len(), 32);

    assert_eq!(compiled.end_order.get(&1), Some(&0));
    assert_eq!(compiled.end_order.get(&3), Some(&1));
    assert_eq!(compiled.end_order.get(&2), Some(&2));
    assert_eq!(compiled.end_order.get(&0), None);
}

#[test]
fn backreference() {
    let mut tree = ReTree::new();
    let c5 = tree.class(5);
    let group = tree.named_group("a", vec![c5]);
    let backref = tree.action(Action::Backreference(Backref::Name("a".into())));
    let root = tree.group(vec![group, backref]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

    assert_eq!(compiled.start.backref_mask, 0b10);
    assert_eq!(compiled.names.get("a"), Some(&1));
    assert!(tree.get(group).attrs.contains(NodeAttr::Backreferenced));
    assert_eq!(
        tree.get(backref).kind,
        NodeKind::Action(Action::Backreference(Backref::Index(1)))
    );

    assert_eq!(
        Compiler::new().emit(&mut tree).unwrap().to_string(),
        r#"
00000: MARK_START 0
00001: MARK_START 1
00002: CHAR 5
00003: FORK 00004 HALT
00004: MARK_END 1
00005: TEST_BACK 1 00006 HALT
00006: FORK 00007 HALT
00007: MARK_END 0
00008: FORK 00009 HALT
00009: PUBLISH HALT
"#
    );
}

#[test]
fn bad_backreferences() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let group = tree.named_group("a", vec![c1]);
    let backref =
        tree.action(Action::Backreference(Backref::Name("nope".into())));
    let root = tree.group(vec![group, backref]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();

    assert_eq!(
        Compiler::new().compile(&mut tree, &mut vm).err(),
        Some(Error::UnknownBackreference("nope".to_string()))
    );

    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let group = tree.group(vec![c1]);
    let backref = tree.action(Action::Backreference(Backref::Index(3)));
    let root = tree.group(vec![group, backref]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().compile(&mut tree, &mut vm).err(),
        Some(Error::InvalidBackreference(3))
    );

    assert!(vm.program().is_empty());
    assert!(vm.starts().is_empty());
}

#[test]
fn word_boundary() {
    let mut tree = ReTree::new();
    tree.set_aux_class(AuxClass::Word, 20);
    tree.set_aux_class(AuxClass::NotWord, 21);
    let boundary = tree.action(Action::WordBoundary);
    let c7 = tree.class(7);
    let root = tree.group(vec![boundary, c7]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: CHAR_ZERO_BRANCH 20 else 00005
00002: TEST_FLAGS 2 00008 (START)
00003: CHAR_PREV 21
00004: JUMP 00008
00005: TEST_FLAGS 8 00007 (END)
00006: CHAR_ZERO 21
00007: CHAR_PREV 20
00008: CHAR 7
00009: FORK 0000a HALT
0000a: MARK_END 0
0000b: FORK 0000c HALT
0000c: PUBLISH HALT
"#
    );
}

#[test]
fn missing_aux_class() {
    let mut tree = ReTree::new();
    tree.set_aux_class(AuxClass::Word, 20);
    let boundary = tree.action(Action::NotWordBoundary);
    let root = tree.group(vec![boundary]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().emit(&mut tree).err(),
        Some(Error::MissingAuxClass(AuxClass::NotWord))
    );

    let mut tree = ReTree::new();
    let grapheme = tree.action(Action::Grapheme);
    let root = tree.group(vec![grapheme]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().emit(&mut tree).err(),
        Some(Error::MissingAuxClass(AuxClass::GraphemeBreak(GraphemeBreak::Cr)))
    );
}

#[test]
fn grapheme() {
    use GraphemeBreak::*;

    let mut tree = ReTree::new();
    for (i, gb) in [
        Cr,
        Lf,
        ControlCrLf,
        L,
        LVLvLvt,
        LvV,
        VT,
        LvtT,
        T,
        RegionalIndicator,
        Extend,
        SpacingMark,
        Prepend,
    ]
    .into_iter()
    .enumerate()
    {
        tree.set_aux_class(AuxClass::GraphemeBreak(gb), 100 + i as u32);
    }
    tree.set_aux_class(AuxClass::Any, 200);

    let grapheme = tree.action(Action::Grapheme);
    let root = tree.group(vec![grapheme]);
    tree.set_root(root);

    let program = Compiler::new().emit(&mut tree).unwrap();
    let instrs = program.instrs();

    assert_eq!(instrs.len(), 25);

    // Every jump lands right after the sequence, which starts at 1.
    for addr in [1, 2, 6, 8] {
        assert_eq!(addr as i32 + instrs[addr].address, 21, "at {}", addr);
    }

    let listing = program.to_string();
    let lines = lines(&listing);

    assert_eq!(lines[1], "00001: TEST_FLAGS 2 00015 (START)");
    assert_eq!(lines[3], "00003: CHAR_PREV_BRANCH 100 else 00005");
    assert_eq!(lines[4], "00004: CHAR_ZERO_BRANCH 101 else 00005 HALT");
    assert_eq!(lines[6], "00006: JUMP 00015");
    assert_eq!(lines[17], "00011: CHAR_ZERO_BRANCH 110 else 00012 HALT");
    assert_eq!(lines[19], "00013: CHAR_PREV_BRANCH 112 else 00014 HALT");
    assert_eq!(lines[20], "00014: CHAR_PREV 200");
}

#[test]
fn bounded_repeat() {
    let mut tree = fixed_prefix_and_bounded_repeat();

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: CHAR 1
00002: CHAR 2
00003: CHAR 3
00004: CHAR 4
00005: CHAR 4
00006: SET_COUNT 0 3
00007: FORK 0000b
00008: CHAR 4
00009: FORK 0000a HALT
0000a: TEST_NOT_COUNT 0 00007
0000b: SET_COUNT 0 0
0000c: FORK 0000d HALT
0000d: MARK_END 0
0000e: FORK 0000f HALT
0000f: PUBLISH HALT
"#
    );
}

#[test]
fn deterministic() {
    let mut vm_1 = MemoryVm::new();
    let mut vm_2 = MemoryVm::new();

    let compiled_1 = Compiler::new()
        .compile(&mut fixed_prefix_and_bounded_repeat(), &mut vm_1)
        .unwrap();

    let compiled_2 = Compiler::new()
        .compile(&mut fixed_prefix_and_bounded_repeat(), &mut vm_2)
        .unwrap();

    assert_eq!(vm_1.program(), vm_2.program());
    assert_eq!(vm_1.starts(), vm_2.starts());
    assert_eq!(compiled_1.start, compiled_2.start);
}

#[test]
fn optional_with_lookahead() {
    let mut tree = ReTree::new();
    let c4 = tree.class(4);
    let rep = tree.repeat(c4, 0, Some(1));
    let c5 = tree.class(5);
    tree.get_mut(rep).look_ahead = Some(c5);
    let root = tree.group(vec![rep, c5]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: CHAR_ZERO_BRANCH 5 else 00003
00002: FORK 00004
00003: CHAR 4
00004: CHAR 5
00005: FORK 00006 HALT
00006: MARK_END 0
00007: FORK 00008 HALT
00008: PUBLISH HALT
"#
    );

    assert!(tree.get(c5).attrs.contains(NodeAttr::UsedAsLookahead));
}

#[test]
fn disjoint_repeat() {
    let mut tree = ReTree::new();
    let c4 = tree.class(4);
    let rep = tree.repeat(c4, 2, Some(5));
    tree.with_attr(rep, NodeAttr::Disjoint);
    let root = tree.group(vec![rep]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: CHAR 4
00002: CHAR 4
00003: CHAR_BRANCH 4 else 00006
00004: CHAR_BRANCH 4 else 00006
00005: CHAR_BRANCH 4 else 00006
00006: FORK 00007 HALT
00007: MARK_END 0
00008: FORK 00009 HALT
00009: PUBLISH HALT
"#
    );
}

#[test]
fn controlling_repeat() {
    let mut tree = ReTree::new();
    let c9 = tree.class(9);
    let rep = tree.repeat(c9, 0, None);
    tree.with_attr(rep, NodeAttr::Disjoint);
    let c8 = tree.class(8);
    let root = tree.group(vec![rep, c8]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

    assert_eq!(compiled.start.guard_count, 1);
    assert_eq!(tree.get(rep).guard_index, Some(0));
    assert!(tree.get(rep).attrs.contains(NodeAttr::ControlConsumed));
    assert!(!tree.get(rep).attrs.contains(NodeAttr::Controlling));

    let mut tree = ReTree::new();
    let c9 = tree.class(9);
    let rep = tree.repeat(c9, 0, None);
    tree.with_attr(rep, NodeAttr::Disjoint);
    let c8 = tree.class(8);
    let root = tree.group(vec![rep, c8]);
    tree.set_root(root);

    let listing = listing(&mut tree);
    let lines = lines(&listing);

    assert_eq!(lines.len(), 75);
    assert_eq!(lines[0], "00000: TEST_GUARD 0 00001 HALT");
    assert_eq!(lines[1], "00001: MARK_START 0");
    assert_eq!(lines[2], "00002: CHAR_GUARD_BRANCH 9 else 00045");
    assert_eq!(lines[65], "00041: CHAR_GUARD_BRANCH 9 else 00045");
    assert_eq!(lines[66], "00042: SET_COUNT 0 65471");
    assert_eq!(lines[67], "00043: CHAR_GUARD_BRANCH 9 else 00045");
    assert_eq!(lines[68], "00044: TEST_NOT_COUNT 0 00043");
    assert_eq!(lines[69], "00045: SET_COUNT 0 0");
    assert_eq!(lines[70], "00046: CHAR 8");
}

#[test]
fn disjoint_remainder_of_one() {
    let mut tree = ReTree::new();
    let c4 = tree.class(4);
    let rep = tree.repeat(c4, 0, Some(65));
    tree.with_attr(rep, NodeAttr::Disjoint);
    let root = tree.group(vec![rep]);
    tree.set_root(root);

    let listing = listing(&mut tree);
    let lines = lines(&listing);

    // The 65th iteration is run by the remainder loop.
    assert_eq!(lines[2], "00002: CHAR_GUARD_BRANCH 4 else 00045");
    assert_eq!(lines[66], "00042: SET_COUNT 0 1");
    assert_eq!(lines[67], "00043: CHAR_GUARD_BRANCH 4 else 00045");
    assert_eq!(lines[69], "00045: SET_COUNT 0 0");
}

#[test]
fn separated_first_iteration() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let inner = tree.repeat(c1, 0, None);
    let c2 = tree.class(2);
    let body = plain_group(&mut tree, vec![inner, c2]);
    let outer = tree.repeat(body, 2, Some(2));
    let root = tree.group(vec![outer]);
    tree.set_root(root);

    // Both required iterations are emitted, only the first one is guarded.
    assert_eq!(
        listing(&mut tree),
        r#"
00000: TEST_GUARD 0 00001 HALT
00001: MARK_START 0
00002: SET_COUNT 0 65535
00003: FORK 00007
00004: CHAR_GUARD 1
00005: FORK 00006 HALT
00006: TEST_NOT_COUNT 0 00003
00007: SET_COUNT 0 0
00008: CHAR 2
00009: SET_COUNT 0 65535
0000a: FORK 0000e
0000b: CHAR 1
0000c: FORK 0000d HALT
0000d: TEST_NOT_COUNT 0 0000a
0000e: SET_COUNT 0 0
0000f: CHAR 2
00010: FORK 00011 HALT
00011: MARK_END 0
00012: FORK 00013 HALT
00013: PUBLISH HALT
"#
    );
}

#[test]
fn shared_suffix() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let c2 = tree.class(2);
    let inner = tree.alt(vec![c1, c2]);
    tree.with_attr(inner, NodeAttr::BNode);
    let c3 = tree.class(3);
    let outer = tree.alt(vec![inner, c3]);
    let root = tree.group(vec![outer]);
    tree.set_root(root);

    assert_eq!(
        listing(&mut tree),
        r#"
00000: MARK_START 0
00001: JUMP 00005
00002: CHAR_ZERO_BRANCH 3 else 00004
00003: FORK 0000f
00004: NOP HALT
00005: CHAR_ZERO_BRANCH 1 else 00007
00006: FORK 0000a
00007: CHAR_ZERO_BRANCH 2 else 00009
00008: FORK 0000c
00009: JUMP 00002
0000a: CHAR 1
0000b: FORK 0000e HALT
0000c: CHAR 2
0000d: FORK 0000e HALT
0000e: FORK 00011 HALT
0000f: CHAR 3
00010: FORK 00011 HALT
00011: FORK 00012 HALT
00012: MARK_END 0
00013: FORK 00014 HALT
00014: PUBLISH HALT
"#
    );
}

#[test]
fn indexed_alternatives() {
    let build = || {
        let mut tree = ReTree::new();
        let c1 = tree.class(1);
        let c2 = tree.class(2);
        tree.get_mut(c1).alt_index = Some(0);
        tree.get_mut(c2).alt_index = Some(1);
        let alt = tree.alt(vec![c1, c2]);
        let root = tree.group(vec![alt]);
        tree.set_root(root);
        tree
    };

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new()
        .index_alternatives(true)
        .compile(&mut build(), &mut vm)
        .unwrap();

    assert_eq!(compiled.group_count, 2);
    assert_ne!(compiled.start.command & START_RESERVED_MATCH, 0);

    let listing = Compiler::new()
        .index_alternatives(true)
        .emit(&mut build())
        .unwrap()
        .to_string();
    let lines = lines(&listing);

    assert_eq!(lines[2], "00002: FORK 00006");
    assert_eq!(lines[6], "00006: SET_MARK 1 0");
    assert_eq!(lines[9], "00009: SET_MARK 1 1");
}

#[test]
fn start_attributes() {
    let mut tree = ReTree::new();
    tree.endian_mask = 0x3;
    let start = tree.action(Action::BufferStart);
    let c1 = tree.class(1);
    let root = tree.group(vec![start, c1]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

    assert_eq!(compiled.start.command, START_FIXED_ANCHOR | 0x3);
    assert_eq!(compiled.start.stride, 1);

    let mut tree = ReTree::new();
    tree.set_aux_class(AuxClass::Newline, 30);
    let start = tree.action(Action::TextStart);
    let c1 = tree.class(1);
    let root = tree.group(vec![start, c1]);
    tree.set_root(root);

    let listing = listing(&mut tree);

    assert_eq!(
        &lines(&listing)[..10],
        &[
            "00000: TEST_FLAGS 2 00004 (START)",
            "00001: CHAR_PREV_BRANCH 30 else 00003",
            "00002: JUMP 00004",
            "00003: SCAN 30",
            "00004: CHAR_BRANCH 30 else 00006",
            "00005: JUMP 00004",
            "00006: MARK_START 0",
            "00007: TEST_FLAGS 2 0000a (START)",
            "00008: CHAR_ZERO_BRANCH 30 else 00009 HALT",
            "00009: CHAR_PREV 30",
        ]
    );

    // An assertion inside a repeat doesn't count.
    let mut tree = ReTree::new();
    let start = tree.action(Action::BufferStart);
    let rep = tree.repeat(start, 0, None);
    let root = tree.group(vec![rep]);
    tree.set_root(root);

    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();
    assert_eq!(compiled.start.command, 0);
}

#[test]
fn scan_trigger() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let root = tree.group(vec![c1]);
    tree.get_mut(root).preview = Some(40);
    tree.set_root(root);

    let listing = listing(&mut tree);

    assert_eq!(&lines(&listing)[..2], &["00000: SCAN 40", "00001: CHAR 1"]);
}

#[test]
fn start_descriptor() {
    let mut vm = MemoryVm::new();

    let compiled = Compiler::new()
        .sector(512, 4096)
        .compile(&mut fixed_prefix_and_bounded_repeat(), &mut vm)
        .unwrap();

    assert_eq!(compiled.start.command, START_SECTOR);
    assert_eq!(compiled.start.offset, 512);
    assert_eq!(compiled.start.stride, 4096);
    assert_eq!(compiled.start.group_count, 1);
    assert_eq!(compiled.start.guard_count, 0);

    let compiled = Compiler::new()
        .asynchronous(true)
        .compile(&mut fixed_prefix_and_bounded_repeat(), &mut vm)
        .unwrap();

    assert_eq!(compiled.start.command, 0);
    assert_eq!(compiled.start.stride, 0);
    assert_eq!(compiled.start_handle, 1);
    assert_eq!(vm.starts().len(), 2);
    assert_eq!(vm.starts()[1], compiled.start);
}

#[test]
fn relocation() {
    let single_char = || {
        let mut tree = ReTree::new();
        let c1 = tree.class(1);
        let root = tree.group(vec![c1]);
        tree.set_root(root);
        tree
    };

    let mut vm = MemoryVm::new();

    let first = Compiler::new().compile(&mut single_char(), &mut vm).unwrap();
    let second = Compiler::new().compile(&mut single_char(), &mut vm).unwrap();

    assert_eq!(first.start.start_address, 0);
    assert_eq!(second.start.start_address, 6);
    assert_eq!(second.start_handle, 1);
    assert_eq!(vm.program().len(), 12);

    // The group end fork, at 2 within the second program.
    assert_eq!(vm.program()[8].opcode, NEW_THREAD);
    assert_eq!(vm.program()[8].address, 9);
    assert_eq!(vm.program()[2].address, 3);
}

#[test]
fn too_many_counters() {
    let mut tree = ReTree::new();
    let mut body = tree.class(1);
    for _ in 0..5 {
        let group = plain_group(&mut tree, vec![body]);
        body = tree.repeat(group, 3, Some(3));
    }
    let root = tree.group(vec![body]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();

    assert_eq!(
        Compiler::new().compile(&mut tree, &mut vm).err(),
        Some(Error::TooManyCounters(4))
    );

    assert!(vm.program().is_empty());
    assert!(vm.starts().is_empty());
}

#[test]
fn program_too_large() {
    let limits = VmLimits { max_bytecode: 5, ..Default::default() };
    let mut vm = MemoryVm::with_limits(limits);

    let mut tree = ReTree::new();
    let a = tree.class(1);
    let b = tree.class(2);
    let c = tree.class(3);
    let root = tree.group(vec![a, b, c]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().compile(&mut tree, &mut vm).err(),
        Some(Error::ProgramTooLarge { len: 8, address: 0 })
    );

    assert!(vm.program().is_empty());
    assert!(vm.starts().is_empty());
}

#[test]
fn mark_limits() {
    let limits = VmLimits { max_mark_pairs: 2, ..Default::default() };

    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let g1 = tree.group(vec![c1]);
    let c2 = tree.class(2);
    let g2 = tree.group(vec![c2]);
    let root = tree.group(vec![g1, g2]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().limits(limits).emit(&mut tree).err(),
        Some(Error::TooManyGroups(2))
    );

    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let g1 = tree.group(vec![c1]);
    let root = tree.group(vec![g1]);
    tree.set_root(root);

    assert!(Compiler::new().limits(limits).emit(&mut tree.clone()).is_ok());

    assert_eq!(
        Compiler::new()
            .limits(limits)
            .index_alternatives(true)
            .emit(&mut tree)
            .err(),
        Some(Error::NoAltMarkSlot(2))
    );

    let limits = VmLimits { max_mark_pairs: 1, ..Default::default() };

    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let lookahead = tree.group(vec![c1]);
    tree.with_attr(lookahead, NodeAttr::NotConsume);
    let root = tree.group(vec![lookahead]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().limits(limits).emit(&mut tree).err(),
        Some(Error::TooManyDynamicMarks(1))
    );
}

#[test]
fn guards() {
    let mut tree = ReTree::new();
    let c5 = tree.class(5);
    let short = tree.repeat(c5, 0, Some(5));
    let c1 = tree.class(1);
    let long = tree.repeat(c1, 0, None);
    let c2 = tree.class(2);
    let inside_lookahead = tree.repeat(c2, 0, None);
    let lookahead = tree.group(vec![inside_lookahead]);
    tree.with_attr(lookahead, NodeAttr::NotConsume);
    let c4 = tree.class(4);
    let group = tree.named_group("g", vec![c4]);
    let c3 = tree.class(3);
    let after_group = tree.repeat(c3, 0, None);
    let backref = tree.action(Action::Backreference(Backref::Name("g".into())));
    let root = tree.group(vec![
        short,
        long,
        lookahead,
        group,
        after_group,
        backref,
    ]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();
    let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

    // Repeats after a backreferenced group are not guarded.
    assert_eq!(compiled.start.guard_count, 1);
    assert_eq!(tree.get(short).guard_index, None);
    assert_eq!(tree.get(long).guard_index, Some(0));
    assert_eq!(tree.get(inside_lookahead).guard_index, None);
    assert_eq!(tree.get(after_group).guard_index, None);
}

#[test]
fn too_many_guards() {
    let limits = VmLimits { max_guards: 1, ..Default::default() };

    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let rep_a = tree.repeat(c1, 0, None);
    let c2 = tree.class(2);
    let rep_b = tree.repeat(c2, 0, None);
    let alt = tree.alt(vec![rep_a, rep_b]);
    let root = tree.group(vec![alt]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().limits(limits).emit(&mut tree).err(),
        Some(Error::TooManyGuards(1))
    );
}

#[test]
fn no_root() {
    assert_eq!(
        Compiler::new().emit(&mut ReTree::new()).err(),
        Some(Error::NoRoot)
    );
}

#[test]
fn operand_overflow() {
    let mut tree = ReTree::new();
    let c1 = tree.class(1);
    let rep = tree.repeat(c1, 1, Some(u32::MAX));
    let root = tree.group(vec![rep]);
    tree.set_root(root);

    assert_eq!(
        Compiler::new().emit(&mut tree).err(),
        Some(Error::OperandOverflow {
            what: "repeat count",
            value: i64::from(u32::MAX) - 1
        })
    );

    let mut tree = ReTree::new();
    let class = tree.class(u32::MAX);
    let root = tree.group(vec![class]);
    tree.set_root(root);

    let mut vm = MemoryVm::new();

    assert_eq!(
        Compiler::new().compile(&mut tree, &mut vm).err(),
        Some(Error::OperandOverflow { what: "class", value: i64::from(u32::MAX) })
    );

    assert!(vm.program().is_empty());
}
