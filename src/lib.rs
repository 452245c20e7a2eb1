// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! A virtual machine runtime for the Dungeon Spells bytecode format.
//!
//! The crate is layered bottom-up, each module building on the ones above
//! it in this list:
//!
//! - [`memory`] — linear, byte-addressable memory spaces (Global/Stack/Code).
//! - [`pool`] — the first-level segregated free-list allocator over a
//!   [`memory::LinearMemory`] arena.
//! - [`aux`] — the second-level, handle-based allocator that issues stable
//!   [`types::BlockId`]s and tracks owning scopes for zombie reclamation.
//! - [`strings`] / [`arrays`] — string and array value primitives built on
//!   [`aux`] blocks.
//! - [`bytecode`] — the fixed-size instruction encoding and opcode catalogue.
//! - [`decode`] — resolves an instruction's address arguments to a concrete
//!   [`types::Ref`], caching the resolution per instruction slot.
//! - [`loader`] — parses an executable/library image into a runnable
//!   [`bytecode::CodeBuffer`] plus pre-initialized blocks.
//! - [`syscall`] — the `SCALL` catalogue and the [`syscall::HostIo`] facade
//!   a host embeds to answer console/filesystem/math/date-time requests.
//! - [`vm`] — the interpreter core: [`vm::Vm`] owns every tier above and
//!   drives the fetch/decode/execute loop.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arrays;
pub mod aux;
pub mod bytecode;
pub mod decode;
pub mod error;
pub mod loader;
pub mod memory;
pub mod pool;
pub mod strings;
pub mod syscall;
pub mod types;
pub mod vm;

pub use bytecode::{CodeBuffer, Instruction, OpCode};
pub use error::{FatalError, SysExceptionCode, VmError, VmFailure};
pub use loader::{Architecture, LoadedImage};
pub use syscall::HostIo;
pub use types::{Addr, BlockId, Ref};
pub use vm::{Value, Vm};

/// The crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
