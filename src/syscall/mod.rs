// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! System calls: the fixed set of VM-internal services an `SCALL`
//! instruction can invoke (spec §4.8/§6), and the host I/O port they are
//! implemented through.
//!
//! The full catalogue numbers 91 calls; the ones a source-language runtime
//! would actually reach through console, filesystem, math and date/time
//! opcodes are enumerated below. Everything below `SysCallId` is answered
//! by a `HostIo` implementation — the VM itself never touches a real file
//! descriptor or clock.


mod mock;

pub use mock::MockHostIo;

use alloc::string::String;
use alloc::vec::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Severity of a console print call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSeverity {
    Info,
    Warning,
    Error,
}

/// Whether a file is opened for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// A fixed-size file handle the host facade hands back to the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub u32);

/// Identifiers for every VM-internal service reachable via `SCALL` (spec
/// §4.8/§6). Grouped by category in the order spec.md lists them: control
/// (exit/panic/delay/execute/error/hostsystem/arg), console, filesystem,
/// math, date/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SysCallId {
    Exit = 0,
    Panic,
    Delay,
    Execute,
    LastErrorKind,
    LastErrorMessage,
    HostSystemName,
    ArgCount,
    ArgValue,

    ConsolePrintInfo,
    ConsolePrintWarning,
    ConsolePrintError,
    ConsolePrintLine,

    FileOpenRead,
    FileOpenWrite,
    FileOpenAppend,
    FileClose,
    FileReadByte,
    FileReadLine,
    FileReadAll,
    FileWriteByte,
    FileWriteLine,
    FileWriteAll,
    FileSize,
    FileExists,
    FileDelete,
    FileRename,
    PathJoin,
    PathBaseName,
    PathDirName,

    MathAbsInt,
    MathAbsFloat,
    MathMinInt,
    MathMaxInt,
    MathMinFloat,
    MathMaxFloat,
    MathExp,
    MathLog,
    MathSin,
    MathCos,
    MathTan,
    MathSinh,
    MathCosh,
    MathTanh,
    MathCeil,
    MathFloor,
    MathRound,
    MathSqrt,
    MathPow,
    MathSeedRand,
    MathRand,

    DateValidate,
    DateConstruct,
    DateExtractYear,
    DateExtractMonth,
    DateExtractDay,
    DateAddDays,
    DateDiffDays,
    DateNow,
    TimeValidate,
    TimeConstruct,
    TimeExtractHour,
    TimeExtractMinute,
    TimeExtractSecond,
    TimeNow,
    TimeAddSeconds,
}

/// The minimal I/O port the interpreter calls through for anything that
/// touches the outside world (spec §1's "host facade", reduced to the
/// surface `SCALL` actually needs). A real embedding wires this to an OS;
/// tests use `MockHostIo`.
pub trait HostIo {
    /// Write one console line at the given severity.
    fn console_print(&mut self, severity: ConsoleSeverity, text: &str);

    /// Open a file, returning a handle or an OS-defined error message.
    fn file_open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, String>;
    /// Close a previously opened file.
    fn file_close(&mut self, handle: FileHandle);
    /// Read the entire remaining contents of a file.
    fn file_read_all(&mut self, handle: FileHandle) -> Result<Vec<u8>, String>;
    /// Write bytes to a file.
    fn file_write_all(&mut self, handle: FileHandle, data: &[u8]) -> Result<(), String>;
    /// Whether a path exists on the host filesystem.
    fn file_exists(&self, path: &str) -> bool;

    /// Current host date/time as a Unix timestamp in seconds.
    fn now(&self) -> i64;
    /// Sleep for the given number of milliseconds.
    fn delay_ms(&mut self, millis: u64);
    /// Seed the host-facade pseudo-random generator.
    fn seed_rand(&mut self, seed: u64);
    /// Draw the next pseudo-random value in `[0.0, 1.0)`.
    fn rand(&mut self) -> f64;

    /// Record that the program asked to terminate with `code`. The
    /// interpreter's dispatch loop is responsible for actually stopping;
    /// this only notifies the host facade so it can, e.g., set the host
    /// process's exit status once the VM returns control.
    fn exit(&mut self, code: i32);

    /// Invoke a host-native function registered under `id` (`LCALL`),
    /// passing its arguments as raw 64-bit words (numeric `Value`s only;
    /// `Ref`s never cross this boundary). The default rejects every id,
    /// since a host that hasn't registered any native functions has
    /// nothing to dispatch to.
    fn native_call(&mut self, id: u32, args: &[i64]) -> Result<i64, String> {
        let _ = args;
        Err(alloc::format!("no native function registered for id {id}"))
    }
}
