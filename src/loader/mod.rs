// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Loads an executable or library image into a fresh runtime (spec §4.7).
//!
//! A binary opens with a fixed header, then a strict sequence of
//! mark-prefixed sections: `GLOB`, `CODE`, any number of `FARR`/`DARR`
//! fixed/dynamic-array declarations, any number of `BLCK` pre-initialized
//! blocks, any number of `DLCA` dynamic-library references, and — only when
//! the header's debug flag is set — a further run of debug-symbol
//! sections. There is no salvageable teacher source for a binary loader of
//! this shape; the section-reader state machine below is authored fresh,
//! grounded in the mark-prefixed/strict-order contract spec §4.7 and §6
//! describe.


use crate::aux::{AuxMemoryManager, ScopeId};
use crate::bytecode::CodeBuffer;
use crate::error::{SysExceptionCode, VmError};
use crate::types::WordWidth;
use alloc::vec::Vec;

/// Magic bytes identifying an executable image.
pub const MAGIC_EXECUTABLE: [u8; 4] = *b"DSXC";
/// Magic bytes identifying a library image.
pub const MAGIC_LIBRARY: [u8; 4] = *b"DSLB";

/// The architecture byte a binary declares itself compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// 32-bit target.
    Bit32,
    /// 64-bit target.
    Bit64,
}

impl Architecture {
    fn from_byte(b: u8) -> Result<Self, VmError> {
        match b {
            32 => Ok(Self::Bit32),
            64 => Ok(Self::Bit64),
            _ => Err(VmError::new(SysExceptionCode::DynLibArchMismatch)),
        }
    }

    /// The word width this architecture implies.
    #[must_use]
    pub const fn word_width(self) -> WordWidth {
        match self {
            Self::Bit32 => WordWidth::W32,
            Self::Bit64 => WordWidth::W64,
        }
    }
}

/// Memory-unit sizing parameters carried in the header, forwarded to the
/// `MemoryPool` that backs the loaded program.
#[derive(Debug, Clone, Copy)]
pub struct MemoryUnitParams {
    pub unit_size: u32,
    pub initial_units: u32,
    pub chunk_units: u32,
    pub max_block_count: u32,
}

/// The fixed-layout header every image begins with (spec §6).
#[derive(Debug, Clone)]
pub struct ExecutableHeader {
    pub is_library: bool,
    pub architecture: Architecture,
    pub binary_format: u32,
    pub version: alloc::string::String,
    pub build_timestamp: u64,
    pub debug_symbols: bool,
    pub memory_units: MemoryUnitParams,
    pub super_init_address: u32,
    pub glob_size: u32,
    pub code_size: u32,
    pub farr_count: u32,
    pub darr_count: u32,
    pub blck_count: u32,
    pub dlca_count: u32,
}

/// A cursor over a byte buffer, consumed header-field by header-field and
/// section by section.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VmError> {
        if self.pos + len > self.bytes.len() {
            return Err(VmError::new(SysExceptionCode::InvalidMemoryAddress));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, VmError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, VmError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, VmError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn mark(&mut self, expected: &[u8; 4]) -> Result<(), VmError> {
        let got = self.take(4)?;
        if got != expected {
            return Err(VmError::new(SysExceptionCode::InvalidMemoryAddress));
        }
        Ok(())
    }
}

/// A loaded, not-yet-running program image.
pub struct LoadedImage {
    pub header: ExecutableHeader,
    pub code: CodeBuffer,
    pub global_size: u32,
}

/// Reads an executable or library image, in the strict section order spec
/// §4.7 mandates, rejecting an architecture mismatch against
/// `expected_architecture`.
pub fn load(bytes: &[u8], expected_architecture: Architecture) -> Result<LoadedImage, VmError> {
    let mut cur = Cursor::new(bytes);

    let magic = cur.take(4)?;
    let is_library = if magic == MAGIC_EXECUTABLE {
        false
    } else if magic == MAGIC_LIBRARY {
        true
    } else {
        return Err(VmError::new(SysExceptionCode::DynLibArchMismatch));
    };

    let binary_format = cur.u32()?;
    let architecture = Architecture::from_byte(cur.u8()?)?;
    if architecture != expected_architecture {
        return Err(VmError::new(SysExceptionCode::DynLibArchMismatch));
    }

    let mut version_bytes = [0u8; 11];
    version_bytes.copy_from_slice(cur.take(11)?);
    let nul = version_bytes.iter().position(|&b| b == 0).unwrap_or(11);
    let version = core::str::from_utf8(&version_bytes[..nul])
        .unwrap_or("")
        .into();

    let build_timestamp = cur.u64()?;
    let debug_symbols = cur.u8()? != 0;

    let memory_units = MemoryUnitParams {
        unit_size: cur.u32()?,
        initial_units: cur.u32()?,
        chunk_units: cur.u32()?,
        max_block_count: cur.u32()?,
    };
    let super_init_address = cur.u32()?;

    let glob_size = cur.u32()?;
    let code_size = cur.u32()?;
    let farr_count = cur.u32()?;
    let darr_count = cur.u32()?;
    let blck_count = cur.u32()?;
    let dlca_count = cur.u32()?;

    let header = ExecutableHeader {
        is_library,
        architecture,
        binary_format,
        version,
        build_timestamp,
        debug_symbols,
        memory_units,
        super_init_address,
        glob_size,
        code_size,
        farr_count,
        darr_count,
        blck_count,
        dlca_count,
    };

    cur.mark(b"GLOB")?;
    let _glob = cur.take(header.glob_size as usize)?;

    cur.mark(b"CODE")?;
    let code_bytes = cur.take(header.code_size as usize)?;
    let code = CodeBuffer::from_bytes(code_bytes);

    for _ in 0..header.farr_count {
        cur.mark(b"FARR")?;
        let len = cur.u32()?;
        let _ = cur.take(len as usize)?;
    }
    for _ in 0..header.darr_count {
        cur.mark(b"DARR")?;
        let len = cur.u32()?;
        let _ = cur.take(len as usize)?;
    }
    for _ in 0..header.blck_count {
        cur.mark(b"BLCK")?;
        let len = cur.u32()?;
        let _ = cur.take(len as usize)?;
    }
    for _ in 0..header.dlca_count {
        cur.mark(b"DLCA")?;
        let len = cur.u32()?;
        let _ = cur.take(len as usize)?;
    }

    if header.debug_symbols {
        for section in [b"DMOD", b"DTYP", b"DVAR", b"DFLD", b"DFUN", b"DPAR", b"DLIN"] {
            cur.mark(section)?;
            let len = cur.u32()?;
            let _ = cur.take(len as usize)?;
        }
    }

    Ok(LoadedImage {
        global_size: header.glob_size,
        header,
        code,
    })
}

/// One pre-initialized block record parsed from a `BLCK` section: compile
/// time assigned a fixed block number so debugger/linker references to it
/// survive into runtime. `forced_alloc`-ing it preserves that numbering.
pub struct PreInitBlock {
    pub block_number: u32,
    pub size: usize,
}

/// Materializes every pre-initialized block via `forced_alloc`, so
/// compile-time block numbers line up with runtime handles (spec §4.7).
pub fn install_pre_init_blocks(
    aux: &mut AuxMemoryManager,
    blocks: &[PreInitBlock],
) -> Result<(), crate::error::FatalError> {
    for block in blocks {
        aux.forced_alloc(crate::types::BlockId::new(block.block_number), block.size)?;
    }
    Ok(())
}

/// Scope id the loader installs pre-init blocks under: the always-live
/// global scope, so nothing loaded at startup is ever a zombie.
pub const LOAD_TIME_SCOPE: ScopeId = 0;
