// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Error types for the Dungeon Spells VM.
//!
//! Two families exist, mirroring spec §7: `SysExceptionCode`/`VmError` are
//! recoverable program-level failures a running bytecode program can be
//! expected to raise (divide by zero, out-of-bounds array access) and that
//! a future `on error` handler could trap. `FatalError` is reserved for
//! memory-manager invariant violations that mean the runtime's own
//! bookkeeping is corrupt; there is no recovering from one.

#[cfg(test)]
mod error_test;

use core::fmt;

/// Maximum number of stringified parameters a `VmError` carries (spec §7.1).
pub const MAX_ERROR_PARAMS: usize = 5;
/// Maximum length of a single stringified error parameter.
pub const MAX_PARAM_LEN: usize = 32;

/// The kind of a recoverable runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysExceptionCode {
    /// Integer or float division (or modulo) by zero.
    DivideByZero,
    /// A reference used as an array handle does not name an array block.
    InvalidArrayBlock,
    /// A reference used as a string handle does not name a string block.
    InvalidStringBlock,
    /// The string computer could not allocate storage for an operation.
    StringAllocationError,
    /// An array index fell outside `[0, DimSize)` for its dimension.
    ArrayIndexingOutOfBounds,
    /// A null `Ref` was dereferenced.
    NullReferenceIndirection,
    /// An offset fell outside the addressed memory space's bounds.
    InvalidMemoryAddress,
    /// `RET` executed with no matching `CALL` frame.
    CallStackUnderflow,
    /// The call stack exceeded its configured maximum depth.
    StackOverflow,
    /// The parameter stack underflowed (pop with nothing pushed).
    StackUnderflow,
    /// A string-array iterator operation used while already open for writing.
    StaAlreadyOpen,
    /// A string-array iterator operation used before opening.
    StaNotOpen,
    /// A string-array iterator close requested on an already-closed iterator.
    StaAlreadyClosed,
    /// A dynamic library's first-stage initialization failed.
    DynLibInit1Failed,
    /// A dynamic library's second-stage initialization failed.
    DynLibInit2Failed,
    /// A dynamic library was built for a different architecture.
    DynLibArchMismatch,
    /// A string-to-number conversion failed because the text was not numeric.
    InvalidNumericConversion,
    /// A string did not encode a well-formed date.
    InvalidDate,
    /// A string did not encode a well-formed time.
    InvalidTime,
    /// The requested system call id is not defined.
    UnknownSysCall,
    /// An operand's runtime kind did not match what the opcode expected.
    TypeMismatch,
    /// The running program raised an explicit panic (`SCALL Panic`).
    ProgramPanic,
    /// A host filesystem operation failed.
    FileOperationFailed,
}

impl SysExceptionCode {
    /// Stable short name, used for display and for program-visible traps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DivideByZero => "DivideByZero",
            Self::InvalidArrayBlock => "InvalidArrayBlock",
            Self::InvalidStringBlock => "InvalidStringBlock",
            Self::StringAllocationError => "StringAllocationError",
            Self::ArrayIndexingOutOfBounds => "ArrayIndexingOutOfBounds",
            Self::NullReferenceIndirection => "NullReferenceIndirection",
            Self::InvalidMemoryAddress => "InvalidMemoryAddress",
            Self::CallStackUnderflow => "CallStackUnderflow",
            Self::StackOverflow => "StackOverflow",
            Self::StackUnderflow => "StackUnderflow",
            Self::StaAlreadyOpen => "StaAlreadyOpen",
            Self::StaNotOpen => "StaNotOpen",
            Self::StaAlreadyClosed => "StaAlreadyClosed",
            Self::DynLibInit1Failed => "DynLibInit1Failed",
            Self::DynLibInit2Failed => "DynLibInit2Failed",
            Self::DynLibArchMismatch => "DynLibArchMismatch",
            Self::InvalidNumericConversion => "InvalidNumericConversion",
            Self::InvalidDate => "InvalidDate",
            Self::InvalidTime => "InvalidTime",
            Self::UnknownSysCall => "UnknownSysCall",
            Self::TypeMismatch => "TypeMismatch",
            Self::ProgramPanic => "ProgramPanic",
            Self::FileOperationFailed => "FileOperationFailed",
        }
    }
}

impl fmt::Display for SysExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-capacity string used for error parameters, to stay allocation-free
/// on the error path (matters when the error is itself "out of memory").
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParamStr {
    bytes: [u8; MAX_PARAM_LEN],
    len: u8,
}

impl ParamStr {
    /// Build a parameter string, truncating at `MAX_PARAM_LEN` bytes.
    #[must_use]
    pub fn new(s: &str) -> Self {
        let mut bytes = [0u8; MAX_PARAM_LEN];
        let n = s.len().min(MAX_PARAM_LEN);
        bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self { bytes, len: n as u8 }
    }

    /// View this parameter as a `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Debug for ParamStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for ParamStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable VM error: a `SysExceptionCode` plus context parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmError {
    /// What went wrong.
    pub code: SysExceptionCode,
    params: [ParamStr; MAX_ERROR_PARAMS],
    param_count: u8,
}

impl VmError {
    /// Build an error with no parameters.
    #[must_use]
    pub const fn new(code: SysExceptionCode) -> Self {
        Self {
            code,
            params: [ParamStr {
                bytes: [0; MAX_PARAM_LEN],
                len: 0,
            }; MAX_ERROR_PARAMS],
            param_count: 0,
        }
    }

    /// Build an error carrying up to `MAX_ERROR_PARAMS` context strings.
    #[must_use]
    pub fn with_params(code: SysExceptionCode, params: &[&str]) -> Self {
        let mut err = Self::new(code);
        for (slot, p) in err.params.iter_mut().zip(params.iter()) {
            *slot = ParamStr::new(p);
            err.param_count += 1;
        }
        err
    }

    /// The context parameters attached to this error.
    #[must_use]
    pub fn params(&self) -> &[ParamStr] {
        &self.params[..self.param_count as usize]
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        for p in self.params() {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

/// An infrastructure failure: a memory-manager invariant was violated.
///
/// Unlike `VmError`, a program cannot catch this; it means the pool or aux
/// bookkeeping itself is inconsistent and the process must terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The memory pool's free-list or block-header chain is corrupt.
    PoolCorruption,
    /// The pool could not be extended by another page/chunk when required.
    PoolExhausted,
    /// The aux block table overflowed its configured maximum entry count.
    AuxTableExhausted,
    /// A block handle pointed at a pool region whose header was inconsistent
    /// with the handle's recorded size.
    BlockHeaderMismatch,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PoolCorruption => "memory pool corruption detected",
            Self::PoolExhausted => "memory pool exhausted and could not grow",
            Self::AuxTableExhausted => "aux block table exhausted",
            Self::BlockHeaderMismatch => "block header inconsistent with handle",
        };
        f.write_str(s)
    }
}

/// Any failure the interpreter's dispatch loop can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFailure {
    /// A recoverable exception, as defined above.
    Recoverable(VmError),
    /// An unrecoverable infrastructure failure.
    Fatal(FatalError),
}

impl From<VmError> for VmFailure {
    fn from(e: VmError) -> Self {
        Self::Recoverable(e)
    }
}

impl From<FatalError> for VmFailure {
    fn from(e: FatalError) -> Self {
        Self::Fatal(e)
    }
}

impl fmt::Display for VmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable(e) => write!(f, "{e}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}
