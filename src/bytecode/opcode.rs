// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The opcode enumeration (spec §6).
//!
//! The original instruction set runs to 361 opcodes, one per
//! type/width/operation combination. Reproducing that table mechanically
//! would just be repetition; this enumeration keeps one opcode per
//! operation family and lets the interpreter branch on a `width`/`kind`
//! argument word for the per-type variants (arithmetic, comparison,
//! conversion), the same way the teacher's `vm` module dispatches on a tag
//! byte rather than enumerating a handler per concrete type. The four
//! decoder addressing-mode opcodes and their four argument slots are kept
//! as a true 4x4 grid, since those are structurally distinct operations
//! (one decoder-patch opcode per argument position), not a type family.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One VM operation. See `crate::vm` for the dispatch loop that interprets
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum OpCode {
    /// Do nothing.
    Nop = 0,

    // --- literal loads / variable access -----------------------------------
    /// Push an immediate literal (args[0..2]=64-bit payload, args[2]=kind tag).
    PushLit,
    /// Load a resolved variable's value onto the stack (args[0]=address mode,
    /// args[1]=offset).
    LoadVar,
    /// Store the top of stack into a resolved variable (args[0]=address mode,
    /// args[1]=offset).
    StoreVar,

    // --- address-taking ---------------------------------------------------------
    /// Compute a `Ref` to a variable and push it (`REFOF`).
    RefOf,
    /// Compute a `Ref` to an array element and push it (`REFAD`).
    RefArrayElement,
    /// Dereference a `Ref` on the stack, pushing its pointee (`REFER`).
    RefDeref,

    // --- block copy ---------------------------------------------------------
    /// Copy `n` bytes from one resolved address to another (`COPY`).
    BlockCopy,
    /// Zero-fill `n` bytes at a resolved address (`CLEAR`).
    BlockClear,

    // --- arithmetic/logic/bitwise/comparison, dispatched on a width tag ---------
    /// `dst = lhs + rhs`, width tagged by args[2].
    Add,
    /// `dst = lhs - rhs`.
    Sub,
    /// `dst = lhs * rhs`.
    Mul,
    /// `dst = lhs / rhs`; raises `DivideByZero` on a zero divisor.
    Div,
    /// `dst = lhs % rhs`; raises `DivideByZero` on a zero divisor.
    Rem,
    /// `dst = -src`.
    Neg,
    /// Boolean/bitwise and.
    And,
    /// Boolean/bitwise or.
    Or,
    /// Boolean/bitwise xor.
    Xor,
    /// Boolean/bitwise not.
    Not,
    /// Bitwise shift left.
    Shl,
    /// Bitwise shift right.
    Shr,
    /// `dst = (lhs == rhs)`.
    CmpEq,
    /// `dst = (lhs != rhs)`.
    CmpNe,
    /// `dst = (lhs < rhs)`.
    CmpLt,
    /// `dst = (lhs <= rhs)`.
    CmpLe,
    /// `dst = (lhs > rhs)`.
    CmpGt,
    /// `dst = (lhs >= rhs)`.
    CmpGe,

    // --- conversions ---------------------------------------------------------
    /// Convert between two numeric widths/kinds tagged in args[1]/args[2].
    Convert,

    // --- string ops (spec §4.3) ------------------------------------------------
    StrConcat,
    StrSubstring,
    StrIndexOf,
    StrCompare,
    StrLen,
    StrUpper,
    StrLower,
    StrTrim,
    StrStartsWith,
    StrEndsWith,
    StrRepeat,
    StrReplaceAll,
    StrJustifyLeft,
    StrJustifyRight,
    StrLike,
    StrParseInt,
    StrParseFloat,
    StrFormatInt,
    StrFormatFloat,

    // --- array ops (spec §4.4) -----------------------------------------------
    /// Allocate a dynamic array (args[0]=cell size, args[1]=dim count; pops
    /// `dim count` dimension sizes off the stack, innermost last).
    ArrayAlloc,
    /// Resize a dynamic array in place (args[0]=dim count; pops `dim count`
    /// new sizes, then the array reference).
    ArrayResize,
    /// Compute an element's byte offset (args[0]=dim count; pops `dim
    /// count` indices, then the array reference); pushes the offset.
    ArrayElementOffset,
    /// Join a 1-D array of strings with a separator (pops separator, then
    /// array reference; pushes the joined string).
    ArrayJoinStrings,
    /// Split a string on a separator into a new 1-D string array (pops
    /// separator, then the source string; pushes the array reference).
    ArraySplitString,
    /// Open a string-array iterator for sequential reads (pops the array
    /// reference; pushes an iterator handle).
    StaOpenRead,
    /// Open a string-array iterator for sequential appends (pops the array
    /// reference; pushes an iterator handle).
    StaOpenWrite,
    /// Advance an iterator (args[0]=handle): reading pushes the next
    /// element (`Ref::Null` at end); writing pops the element to append.
    StaAdvance,
    /// Close an iterator (args[0]=handle).
    StaClose,

    // --- fixed-size array ops (spec §4.4.1, `crate::arrays::fixed`) -----------
    /// Define a geometry's shape (args[0]=Agx, args[1]=dim count,
    /// args[2]=cell size); dimension sizes are filled in afterwards one at a
    /// time by `ArrayFixSetDimSize` (`AFDEF`).
    ArrayFixDefine,
    /// Set one dimension's size (args[0]=Agx, args[1]=dim index, args[2]=size)
    /// (`AFSSZ`).
    ArrayFixSetDimSize,
    /// Push one dimension's size (args[0]=Agx, args[1]=dim index) (`AFGSZ`).
    ArrayFixGetDimSize,
    /// Set one dimension's current loop index (args[0]=Agx, args[1]=dim
    /// index; pops the index) (`AFIDX`).
    ArrayFixSetIndex,
    /// Push the byte offset named by the currently-set indices (args[0]=Agx)
    /// (`AFOFN`).
    ArrayFixOffset,
    /// Push the byte offset of a single-dimension element (args[0]=Agx; pops
    /// the index) (`AF1OF`).
    ArrayFix1Offset,
    /// Reposition a geometry's loop walk to its first element (args[0]=Agx)
    /// (`AF1RW`).
    ArrayFixLoopRewind,
    /// Advance a geometry's loop walk by one element, pushing whether an
    /// element remains in bounds (args[0]=Agx) (`AF1NX`).
    ArrayFixLoopNext,
    /// Join a 1-D fixed array of string blocks with a separator (args[0]=Agx;
    /// pops separator, then the array base reference; pushes the joined
    /// string) (`AFJOIN`, bridges to `ArrayJoinStrings`).
    ArrayFixJoinStrings,
    /// Copy a fixed array's bytes into a freshly allocated dynamic array of
    /// matching shape (args[0]=Agx; pops the fixed array's base reference;
    /// pushes the new dynamic array reference) (`AF2D`).
    ArrayFixToDynamic,
    /// Copy a dynamic array's bytes into a fixed array's storage, truncating
    /// or zero-padding to fit (args[0]=Agx; pops the dynamic array
    /// reference, then the fixed array's base reference) (`AD2F`).
    ArrayDynToFixed,
    /// Reshape one dynamic array to match another's shape and copy its bytes
    /// (pops the source array reference, then the destination array
    /// reference) (`AD2D`).
    ArrayDynToDynamicCast,

    // --- block replication/initialization (spec §5, `crate::vm::replicate`) ---
    /// Clear the in-progress composite-replication rule stack (`RPBEG`).
    RepBegin,
    /// Push a fixed-array nesting level (args[0]=Agx naming an already
    /// defined geometry, args[1]=byte offset within the composite)
    /// (`RPLOF`).
    RepLoopFixed,
    /// Push a dynamic-array nesting level (args[0]=byte offset within the
    /// composite) (`RPLOD`).
    RepLoopDyn,
    /// Replicate every leaf reachable through the rule stack as a string
    /// block (args[0]=leaf byte offset; pops source reference, then
    /// destination reference) (`RPSTR`).
    RepLeafString,
    /// Replicate every leaf reachable through the rule stack as a dynamic
    /// array (args[0]=leaf byte offset; pops source reference, then
    /// destination reference) (`RPARR`).
    RepLeafArray,
    /// End a replication pass, resetting the rule stack (`RPEND`).
    RepEnd,
    /// Clear the in-progress block-initialization rule stack (`BIBEG`).
    BlkInitBegin,
    /// Push a fixed-array nesting level for initialization (args[0]=Agx,
    /// args[1]=byte offset) (`BILOF`).
    BlkInitLoopFixed,
    /// Initialize every leaf reachable through the rule stack as a fresh
    /// string block (args[0]=leaf byte offset; pops destination reference)
    /// (`BISTR`).
    BlkInitLeafString,
    /// Initialize every leaf reachable through the rule stack as a fresh
    /// dynamic array (args[0]=leaf byte offset; pops destination reference)
    /// (`BIARR`).
    BlkInitLeafArray,
    /// End an initialization pass, resetting the rule stack (`BIEND`).
    BlkInitEnd,

    // --- push/call/return -----------------------------------------------------
    /// Push a resolved value onto the parameter stack.
    Push,
    /// Pop the top of the parameter stack, discarding it.
    Pop,
    /// Call a bytecode routine at a known code offset (args[0]=target ip).
    Call,
    /// Invoke a VM-internal service (`SCALL n`).
    SysCall,
    /// Invoke a pre-registered host-native function (`LCALL n`).
    NativeCall,
    /// Suppress the next CALL/RET scope change (`SULOK`).
    SuppressScope,
    /// Return from the current call frame.
    Return,
    /// Grow the stack buffer by the requested number of units (`STACK`).
    GrowStack,

    // --- jumps ---------------------------------------------------------------
    /// Unconditional jump.
    Jump,
    /// Jump if the top-of-stack boolean is true.
    JumpIfTrue,
    /// Jump if the top-of-stack boolean is false.
    JumpIfFalse,

    // --- decoder addressing-mode opcodes (4 modes x 4 argument slots = 16) ---
    DalV1,
    DalV2,
    DalV3,
    DalV4,
    DagV1,
    DagV2,
    DagV3,
    DagV4,
    DalI1,
    DalI2,
    DalI3,
    DalI4,
    DagI1,
    DagI2,
    DagI3,
    DagI4,

    // --- program exit ---------------------------------------------------------
    /// Halt the interpreter with the given exit code.
    Halt,
}

impl OpCode {
    /// Whether this opcode is one of the 16 decoder addressing-mode
    /// opcodes (spec §4/§6 `DAxYn`).
    #[must_use]
    pub const fn is_decoder_mode(self) -> bool {
        matches!(
            self,
            Self::DalV1
                | Self::DalV2
                | Self::DalV3
                | Self::DalV4
                | Self::DagV1
                | Self::DagV2
                | Self::DagV3
                | Self::DagV4
                | Self::DalI1
                | Self::DalI2
                | Self::DalI3
                | Self::DalI4
                | Self::DagI1
                | Self::DagI2
                | Self::DagI3
                | Self::DagI4
        )
    }
}
