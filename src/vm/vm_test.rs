// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;
use crate::syscall::MockHostIo;

const GLOB_VAR: u32 = 1;
const KIND_LONG: u32 = 4;

fn code_from(program: &[(OpCode, &[u32])]) -> CodeBuffer {
    let mut code = CodeBuffer::new();
    for &(op, args) in program {
        code.push(Instruction::new(op, args));
    }
    code
}

/// Builds the iterative Fibonacci program of spec §8 scenario 1: four
/// globals `a, b, i, n` at byte offsets 0/9/18/27, looping `while i < n`
/// and printing `a` once the loop ends.
fn fib_program(n: i64) -> CodeBuffer {
    code_from(&[
        // a = 0; b = 1; i = 0; n = n
        (OpCode::PushLit, &[0, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 0]),
        (OpCode::PushLit, &[1, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 9]),
        (OpCode::PushLit, &[0, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 18]),
        (OpCode::PushLit, &[n as u32, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 27]),
        // loop_start (ip 8):
        (OpCode::LoadVar, &[GLOB_VAR, 18]),
        (OpCode::LoadVar, &[GLOB_VAR, 27]),
        (OpCode::CmpLt, &[0, 0, KIND_LONG]),
        (OpCode::JumpIfFalse, &[23]),
        // body (ip 12):
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::LoadVar, &[GLOB_VAR, 9]),
        (OpCode::Add, &[0, 0, KIND_LONG]),
        (OpCode::LoadVar, &[GLOB_VAR, 9]),
        (OpCode::StoreVar, &[GLOB_VAR, 0]),
        (OpCode::StoreVar, &[GLOB_VAR, 9]),
        (OpCode::LoadVar, &[GLOB_VAR, 18]),
        (OpCode::PushLit, &[1, 0, KIND_LONG]),
        (OpCode::Add, &[0, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 18]),
        (OpCode::Jump, &[8]),
        // end (ip 23):
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::StrFormatInt, &[]),
        (OpCode::SysCall, &[SysCallId::ConsolePrintLine as u32]),
        (OpCode::Halt, &[0]),
    ])
}

#[test]
fn fib_ten_prints_55() {
    let code = fib_program(10);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert!(vm.halted());
    assert_eq!(vm.exit_code(), 0);
}

#[test]
fn divide_by_zero_raises_exception() {
    let code = code_from(&[
        (OpCode::PushLit, &[1, 0, KIND_LONG]),
        (OpCode::PushLit, &[0, 0, KIND_LONG]),
        (OpCode::Div, &[0, 0, KIND_LONG]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let err = vm.run().unwrap_err();
    assert_eq!(err, VmFailure::Recoverable(VmError::new(SysExceptionCode::DivideByZero)));
}

#[test]
fn call_return_passes_a_value_back_to_the_caller() {
    let code = code_from(&[
        (OpCode::PushLit, &[41, 0, KIND_LONG]),
        (OpCode::StoreVar, &[GLOB_VAR, 0]),
        (OpCode::Call, &[4, 0, 0]),
        (OpCode::Halt, &[0]),
        // routine (ip 4):
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::PushLit, &[1, 0, KIND_LONG]),
        (OpCode::Add, &[0, 0, KIND_LONG]),
        (OpCode::Return, &[]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Long(42)));
}

#[test]
fn str_concat_then_upper_runs_purely_on_the_operand_stack() {
    let code = code_from(&[
        (OpCode::StrConcat, &[]),
        (OpCode::StrUpper, &[]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let a = StringComputer::alloc(&mut vm.aux, vm.scope_id, "hello, ").unwrap();
    let b = StringComputer::alloc(&mut vm.aux, vm.scope_id, "world").unwrap();
    vm.push_operand(Value::Ref(Ref::Block { id: a, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: b, offset: Addr::zero() }));
    vm.run().unwrap();
    let result = vm.pop_operand().unwrap();
    let id = result.as_ref().unwrap().block_id().unwrap();
    assert_eq!(StringComputer::as_str(&vm.aux, id).unwrap(), "HELLO, WORLD");
}

/// A separator string stored in a Global variable is read twice, once by
/// `ArraySplitString` and again by `ArrayJoinStrings`, exercising `Ref`
/// values surviving a round trip through `StoreVar`/`LoadVar`.
#[test]
fn split_then_join_round_trips_through_a_stored_separator_ref() {
    let code = code_from(&[
        (OpCode::StoreVar, &[GLOB_VAR, 0]), // store separator Ref
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::ArraySplitString, &[]),
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::ArrayJoinStrings, &[]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let sep = StringComputer::alloc(&mut vm.aux, vm.scope_id, ",").unwrap();
    let source = StringComputer::alloc(&mut vm.aux, vm.scope_id, "a,b,c").unwrap();
    // Pushed source-then-sep so StoreVar's first pop lands on the separator.
    vm.push_operand(Value::Ref(Ref::Block { id: source, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: sep, offset: Addr::zero() }));
    vm.run().unwrap();
    let result = vm.pop_operand().unwrap();
    let id = result.as_ref().unwrap().block_id().unwrap();
    assert_eq!(StringComputer::as_str(&vm.aux, id).unwrap(), "a,b,c");
}

/// The array reference is stashed in a Global so it can be fed to both
/// `StaOpenWrite` and, later, `StaOpenRead`; the handle each open pushes
/// back is discarded with `Pop` since this hand-written program addresses
/// iterators by a literal handle rather than threading it through a var.
#[test]
fn sta_write_then_read_round_trips_through_a_dynamic_array() {
    let code = code_from(&[
        (OpCode::StoreVar, &[GLOB_VAR, 0]),
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::StaOpenWrite, &[]),
        (OpCode::Pop, &[]),
        (OpCode::StaAdvance, &[0]),
        (OpCode::StaAdvance, &[0]),
        (OpCode::StaClose, &[0]),
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::StaOpenRead, &[]),
        (OpCode::StaAdvance, &[1]),
        (OpCode::StaAdvance, &[1]),
        (OpCode::StaAdvance, &[1]), // past the end, pushes Ref::Null
        (OpCode::StaClose, &[1]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let array = vm.arrays.alloc(&mut vm.aux, vm.scope_id, REF_SIZE as u32, &[0]).unwrap();
    let one = StringComputer::alloc(&mut vm.aux, vm.scope_id, "one").unwrap();
    let two = StringComputer::alloc(&mut vm.aux, vm.scope_id, "two").unwrap();
    vm.push_operand(Value::Ref(Ref::Block { id: one, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: two, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: array, offset: Addr::zero() }));
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Ref(Ref::Null)));
    let second_read = vm.pop_operand().unwrap();
    assert_eq!(
        StringComputer::as_str(&vm.aux, second_read.as_ref().unwrap().block_id().unwrap()).unwrap(),
        "one"
    );
    let first_read = vm.pop_operand().unwrap();
    assert_eq!(
        StringComputer::as_str(&vm.aux, first_read.as_ref().unwrap().block_id().unwrap()).unwrap(),
        "two"
    );
}

/// The path, the data to write and the write handle are each stashed in
/// their own Global (offsets spaced `VALUE_SIZE` apart, wide enough for a
/// `Ref`) so each can be reloaded in whatever order the next syscall
/// expects its operands popped.
#[test]
fn file_write_then_read_round_trips_through_the_host() {
    let code = code_from(&[
        (OpCode::StoreVar, &[GLOB_VAR, 0]),  // path -> var0
        (OpCode::StoreVar, &[GLOB_VAR, 25]), // contents -> var1
        (OpCode::StoreVar, &[GLOB_VAR, 50]), // path2 -> var2
        (OpCode::LoadVar, &[GLOB_VAR, 0]),
        (OpCode::SysCall, &[SysCallId::FileOpenWrite as u32]),
        (OpCode::StoreVar, &[GLOB_VAR, 75]), // handle -> var3
        (OpCode::LoadVar, &[GLOB_VAR, 75]),
        (OpCode::LoadVar, &[GLOB_VAR, 25]),
        (OpCode::SysCall, &[SysCallId::FileWriteAll as u32]),
        (OpCode::LoadVar, &[GLOB_VAR, 75]),
        (OpCode::SysCall, &[SysCallId::FileClose as u32]),
        (OpCode::LoadVar, &[GLOB_VAR, 50]),
        (OpCode::SysCall, &[SysCallId::FileOpenRead as u32]),
        (OpCode::SysCall, &[SysCallId::FileReadAll as u32]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let path2 = StringComputer::alloc(&mut vm.aux, vm.scope_id, "out.txt").unwrap();
    let contents = StringComputer::alloc(&mut vm.aux, vm.scope_id, "saved").unwrap();
    let path = StringComputer::alloc(&mut vm.aux, vm.scope_id, "out.txt").unwrap();
    vm.push_operand(Value::Ref(Ref::Block { id: path2, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: contents, offset: Addr::zero() }));
    vm.push_operand(Value::Ref(Ref::Block { id: path, offset: Addr::zero() }));
    vm.run().unwrap();
    let result = vm.pop_operand().unwrap();
    let id = result.as_ref().unwrap().block_id().unwrap();
    assert_eq!(StringComputer::as_str(&vm.aux, id).unwrap(), "saved");
    assert_eq!(vm.host.file_contents("out.txt"), Some(b"saved".as_slice()));
}

const KIND_FLOAT: u32 = 5;

#[test]
fn math_sqrt_computes_over_the_operand_stack() {
    let bits = 4.0f64.to_bits();
    let code = code_from(&[
        (OpCode::PushLit, &[(bits & 0xFFFF_FFFF) as u32, (bits >> 32) as u32, KIND_FLOAT]),
        (OpCode::SysCall, &[SysCallId::MathSqrt as u32]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Float(2.0)));
}

#[test]
fn panic_syscall_raises_program_panic_with_the_message() {
    let code = code_from(&[(OpCode::SysCall, &[SysCallId::Panic as u32]), (OpCode::Halt, &[0])]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let msg = StringComputer::alloc(&mut vm.aux, vm.scope_id, "boom").unwrap();
    vm.push_operand(Value::Ref(Ref::Block { id: msg, offset: Addr::zero() }));
    let err = vm.run().unwrap_err();
    assert_eq!(
        err,
        VmFailure::Recoverable(VmError::with_params(SysExceptionCode::ProgramPanic, &["boom"]))
    );
}

#[test]
fn jump_if_true_takes_the_branch_when_the_condition_holds() {
    let code = code_from(&[
        (OpCode::PushLit, &[1, 0, 0]), // Bool(true), kind tag 0
        (OpCode::JumpIfTrue, &[4]),
        (OpCode::Halt, &[1]),
        (OpCode::Nop, &[]),
        (OpCode::Halt, &[7]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.exit_code(), 7);
}

#[test]
fn block_copy_then_clear_move_bytes_between_global_slots() {
    let code = code_from(&[
        (OpCode::BlockCopy, &[]),
        (OpCode::BlockClear, &[]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    write_value(&mut vm.global, Addr::new(0), Value::Long(0x1122_3344_5566_7788));
    // BlockCopy pops len, then src, then dst (last-pushed popped first).
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(64)))); // copy dst
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(0)))); // copy src
    vm.push_operand(Value::Long(VALUE_SIZE as i64));
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(0)))); // clear dst
    vm.push_operand(Value::Long(VALUE_SIZE as i64));
    vm.run().unwrap();
    assert_eq!(read_value(&vm.global, Addr::new(64)), Value::Long(0x1122_3344_5566_7788));
    assert_eq!(read_value(&vm.global, Addr::new(0)), Value::Null);
}

#[test]
fn ref_array_element_takes_the_address_of_one_element() {
    let code = code_from(&[(OpCode::RefArrayElement, &[1]), (OpCode::Halt, &[0])]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let array = vm.arrays.alloc(&mut vm.aux, vm.scope_id, 8, &[4]).unwrap();
    vm.push_block(array);
    vm.push_operand(Value::Long(2));
    vm.run().unwrap();
    let r = vm.pop_operand().unwrap().as_ref().unwrap();
    let expected = vm.arrays.element_offset(&vm.aux, array, &[2]).unwrap();
    assert_eq!(r, Ref::Block { id: array, offset: Addr::new(expected) });
}

/// The degenerate zero-rule replication case (spec §4.6): `RepLeafString`
/// with no `RepLoopFixed`/`RepLoopDyn` rules pushed first copies a single
/// leaf directly.
#[test]
fn rep_leaf_string_with_no_rules_deep_copies_a_single_string() {
    let code = code_from(&[
        (OpCode::RepBegin, &[]),
        (OpCode::RepLeafString, &[0]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let source = StringComputer::alloc(&mut vm.aux, vm.scope_id, "hello").unwrap();
    write_ref(&mut vm.global, Addr::new(0), Ref::Block { id: source, offset: Addr::zero() });
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(100)))); // dest
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(0)))); // source
    vm.run().unwrap();
    let copy = match read_ref(&vm.global, Addr::new(100)) {
        Ref::Block { id, .. } => id,
        other => panic!("expected a block ref, got {other:?}"),
    };
    assert_ne!(copy, source);
    assert_eq!(StringComputer::as_str(&vm.aux, copy).unwrap(), "hello");
}

/// `RepLoopFixed` walks a 1-D geometry of three string-block cells,
/// replicating each element independently (spec §4.6's Cartesian-product
/// rule-stack walk, here with exactly one nesting level).
#[test]
fn rep_loop_fixed_replicates_every_element_of_a_fixed_array() {
    let code = code_from(&[
        (OpCode::RepBegin, &[]),
        (OpCode::RepLoopFixed, &[0, 0]),
        (OpCode::RepLeafString, &[0]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.array_geoms.push(ArrayGeometry::new(REF_SIZE as u32, &[3]).unwrap());
    let elems: Vec<BlockId> = ["a", "b", "c"]
        .iter()
        .map(|s| StringComputer::alloc(&mut vm.aux, vm.scope_id, s).unwrap())
        .collect();
    for (i, &id) in elems.iter().enumerate() {
        write_ref(
            &mut vm.global,
            Addr::new(i as u64 * REF_SIZE),
            Ref::Block { id, offset: Addr::zero() },
        );
    }
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(200)))); // dest
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(0)))); // source
    vm.run().unwrap();
    for (i, text) in ["a", "b", "c"].iter().enumerate() {
        let copy = match read_ref(&vm.global, Addr::new(200 + i as u64 * REF_SIZE)) {
            Ref::Block { id, .. } => id,
            other => panic!("expected a block ref, got {other:?}"),
        };
        assert_ne!(copy, elems[i]);
        assert_eq!(StringComputer::as_str(&vm.aux, copy).unwrap(), *text);
    }
}

/// `BlkInitLeafString` with no rules fills a single destination slot with a
/// freshly allocated empty string, independent of whatever was there before.
#[test]
fn blk_init_leaf_string_allocates_a_fresh_empty_string() {
    let code = code_from(&[
        (OpCode::BlkInitBegin, &[]),
        (OpCode::BlkInitLeafString, &[0]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.push_operand(Value::Ref(Ref::Global(Addr::new(300))));
    vm.run().unwrap();
    let id = match read_ref(&vm.global, Addr::new(300)) {
        Ref::Block { id, .. } => id,
        other => panic!("expected a block ref, got {other:?}"),
    };
    assert_eq!(StringComputer::as_str(&vm.aux, id).unwrap(), "");
}

/// `ArrayFixDefine`/`ArrayFixSetDimSize` build a 2x3 geometry, `ArrayFixSetIndex`
/// positions it, and `ArrayFixOffset` reads back the matching byte offset.
#[test]
fn fixed_array_define_and_set_index_compute_the_expected_offset() {
    const AGX: u32 = 0;
    let code = code_from(&[
        (OpCode::ArrayFixDefine, &[AGX, 2, 4]),
        (OpCode::ArrayFixSetDimSize, &[AGX, 0, 2]),
        (OpCode::ArrayFixSetDimSize, &[AGX, 1, 3]),
        (OpCode::ArrayFixSetIndex, &[AGX, 0]),
        (OpCode::ArrayFixSetIndex, &[AGX, 1]),
        (OpCode::ArrayFixOffset, &[AGX]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.push_operand(Value::Long(2)); // row index, popped by the second SetIndex
    vm.push_operand(Value::Long(1)); // col index, popped by the first SetIndex
    vm.run().unwrap();
    // index (1, 2) in a 2x3, cell_size=4 geometry: (1*3 + 2) * 4 = 20.
    assert_eq!(vm.pop_operand(), Some(Value::Long(20)));
}

/// `ArrayFixLoopRewind`/`ArrayFixLoopNext` walk every element of a geometry
/// in row-major order, reporting exhaustion once every combination has been
/// visited.
#[test]
fn fixed_array_loop_visits_every_element_then_stops() {
    const AGX: u32 = 0;
    let code = code_from(&[
        (OpCode::ArrayFixDefine, &[AGX, 1, 4]),
        (OpCode::ArrayFixSetDimSize, &[AGX, 0, 2]),
        (OpCode::ArrayFixLoopRewind, &[AGX]),
        (OpCode::ArrayFixLoopNext, &[AGX]),
        (OpCode::ArrayFixLoopNext, &[AGX]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Bool(false)));
    assert_eq!(vm.pop_operand(), Some(Value::Bool(true)));
}

/// A fixed-array geometry defined inside a call is addressed
/// `Agx::FrameRelative`; a nested call must not disturb the outer frame's
/// `array_fix_base`, and `Return` must restore it (the save/restore spec
/// §4.4.1 requires alongside the stack's own frame-base save/restore).
#[test]
fn nested_call_saves_and_restores_the_fixed_array_base() {
    const RELATIVE_AGX: u32 = Agx::FrameRelative(0).encode();
    let code = code_from(&[
        (OpCode::ArrayFixDefine, &[RELATIVE_AGX, 1, 4]), // outer geometry, slot 0 (relative)
        (OpCode::ArrayFixSetDimSize, &[RELATIVE_AGX, 0, 5]),
        (OpCode::Call, &[5, 0, 0]),
        (OpCode::ArrayFixGetDimSize, &[RELATIVE_AGX, 0]), // back in the outer frame
        (OpCode::Halt, &[0]),
        // inner routine (ip 5): defines its own relative-slot-0 geometry,
        // which must land in a different absolute slot than the outer one's.
        (OpCode::ArrayFixDefine, &[RELATIVE_AGX, 1, 4]),
        (OpCode::ArrayFixSetDimSize, &[RELATIVE_AGX, 0, 9]),
        (OpCode::Return, &[]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Long(5)));
}

/// Halting from inside the called routine (rather than returning) lets the
/// assertion observe the scope bump while the call is still active, since a
/// matched `Call`/`Return` pair nets back to the same `scope_id` either way.
#[test]
fn suppress_scope_keeps_the_scope_id_unchanged_across_the_next_call() {
    let code = code_from(&[
        (OpCode::SuppressScope, &[]),
        (OpCode::Call, &[3, 0, 0]),
        (OpCode::Halt, &[1]),
        (OpCode::Halt, &[0]),
    ]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let before = vm.scope_id();
    vm.run().unwrap();
    assert_eq!(vm.scope_id(), before);
}

#[test]
fn call_without_suppress_scope_bumps_the_scope_id_while_active() {
    let code = code_from(&[(OpCode::Call, &[2, 0, 0]), (OpCode::Halt, &[1]), (OpCode::Halt, &[0])]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    let before = vm.scope_id();
    vm.run().unwrap();
    assert_eq!(vm.scope_id(), before + 1);
}

#[test]
fn decoder_mode_opcode_is_an_accepted_no_op() {
    let code = code_from(&[(OpCode::DalV1, &[0, 0, 0]), (OpCode::Halt, &[3])]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.run().unwrap();
    assert_eq!(vm.exit_code(), 3);
}

#[test]
fn native_call_with_no_registered_host_function_fails() {
    let code = code_from(&[(OpCode::NativeCall, &[0, 1]), (OpCode::Halt, &[0])]);
    let host = MockHostIo::new(0);
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.push_operand(Value::Long(7));
    let err = vm.run().unwrap_err();
    assert_eq!(
        err,
        VmFailure::Recoverable(VmError::with_params(
            SysExceptionCode::DynLibInit1Failed,
            &["no native function registered for id 0"],
        ))
    );
}

/// A host that registers id 0 as "double the argument" exercises the
/// successful marshalling path: numeric operands in, one numeric result
/// pushed back.
struct DoublingHostIo(MockHostIo);

impl HostIo for DoublingHostIo {
    fn console_print(&mut self, severity: ConsoleSeverity, text: &str) {
        self.0.console_print(severity, text);
    }
    fn file_open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, alloc::string::String> {
        self.0.file_open(path, mode)
    }
    fn file_close(&mut self, handle: FileHandle) {
        self.0.file_close(handle);
    }
    fn file_read_all(&mut self, handle: FileHandle) -> Result<Vec<u8>, alloc::string::String> {
        self.0.file_read_all(handle)
    }
    fn file_write_all(&mut self, handle: FileHandle, data: &[u8]) -> Result<(), alloc::string::String> {
        self.0.file_write_all(handle, data)
    }
    fn file_exists(&self, path: &str) -> bool {
        self.0.file_exists(path)
    }
    fn now(&self) -> i64 {
        self.0.now()
    }
    fn delay_ms(&mut self, millis: u64) {
        self.0.delay_ms(millis);
    }
    fn seed_rand(&mut self, seed: u64) {
        self.0.seed_rand(seed);
    }
    fn rand(&mut self) -> f64 {
        self.0.rand()
    }
    fn exit(&mut self, code: i32) {
        self.0.exit(code);
    }
    fn native_call(&mut self, id: u32, args: &[i64]) -> Result<i64, alloc::string::String> {
        match id {
            0 => Ok(args[0] * 2),
            _ => Err(alloc::format!("no native function registered for id {id}")),
        }
    }
}

#[test]
fn native_call_marshals_numeric_arguments_through_to_the_host() {
    let code = code_from(&[(OpCode::NativeCall, &[0, 1]), (OpCode::Halt, &[0])]);
    let host = DoublingHostIo(MockHostIo::new(0));
    let mut vm = Vm::new(code, PoolConfig::default(), host);
    vm.push_operand(Value::Long(21));
    vm.run().unwrap();
    assert_eq!(vm.pop_operand(), Some(Value::Long(42)));
}
