// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The argument decoder (spec §4.5).
//!
//! Every instruction argument classified as an "address" names a value
//! indirectly, through one of four modes: a stack offset relative to the
//! current frame base, an absolute offset into global memory, or either of
//! those taken as a `Ref` to dereference once more. Resolving a mode to a
//! concrete `Ref` is cheap but not free, so the interpreter caches the
//! resolved `Ref` for each argument slot the first time it is computed.
//!
//! The source interpreter achieves this by physically overwriting the
//! instruction's argument bytes in the code buffer with an already-resolved
//! host pointer (the `DAxYn` opcode family) and restoring the original bytes
//! when the cache must be invalidated. Mutating the owned `CodeBuffer` in
//! place that way is exactly the kind of pointer-punning this crate avoids;
//! instead the resolved value is kept in a side table (`ResolvedCache`)
//! indexed the same way the code buffer is, with the same invalidation
//! trigger: growth of the Stack buffer, which moves every `LoclVar`-relative
//! address.

#[cfg(test)]
mod decode_test;

use crate::aux::ScopeId;
use crate::types::{Addr, Ref};

/// One of the four ways an instruction argument can name a value (spec
/// §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Offset relative to the current frame's base pointer.
    LoclVar,
    /// Absolute offset into global memory.
    GlobVar,
    /// A `Ref` stored at a stack-relative offset, dereferenced once more.
    LoclInd,
    /// A `Ref` stored at a global offset, dereferenced once more.
    GlobInd,
}

/// A raw, not-yet-resolved address argument as it appears in an instruction
/// word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAddress {
    pub mode: AddressMode,
    pub offset: u32,
}

/// The resolved form of an address argument: a concrete reference into one
/// of the VM's memory spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub reference: Ref,
}

/// Resolve a raw address against the current frame. `frame_scope`/`base` are
/// the active call frame's scope id and base pointer; `indirect` is called
/// to read a `Ref` out of stack or global memory for the `*Ind` modes.
pub fn resolve(
    raw: RawAddress,
    frame_scope: ScopeId,
    base: Addr,
    read_ref_stack: impl FnOnce(Addr) -> Ref,
    read_ref_global: impl FnOnce(Addr) -> Ref,
) -> ResolvedAddress {
    let reference = match raw.mode {
        AddressMode::LoclVar => Ref::Stack {
            scope_id: frame_scope,
            offset: base.add(u64::from(raw.offset)),
        },
        AddressMode::GlobVar => Ref::Global(Addr::new(u64::from(raw.offset))),
        AddressMode::LoclInd => read_ref_stack(base.add(u64::from(raw.offset))),
        AddressMode::GlobInd => read_ref_global(Addr::new(u64::from(raw.offset))),
    };
    ResolvedAddress { reference }
}

/// One entry in the per-instruction resolved-argument cache: which argument
/// slot (0..3) and the address that was resolved there, plus whether the
/// resolution depends on the current frame base (and so must be dropped
/// when the Stack buffer moves).
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    instr_index: usize,
    slot: u8,
    resolved: ResolvedAddress,
    frame_relative: bool,
}

/// Caches resolved address arguments by instruction index and slot, so the
/// interpreter only re-derives a `Ref` from a raw offset once per
/// instruction (per frame generation).
///
/// This stands in for the source design's in-place instruction patching:
/// instead of overwriting code bytes with a resolved pointer and a sidecar
/// to restore them, the resolved value lives here, addressed the same way.
/// A Stack growth calls `invalidate_frame_relative`, which is the
/// equivalent of the source's "re-encoding rule" walk over the code buffer.
#[derive(Debug, Default)]
pub struct Decoder {
    entries: alloc::vec::Vec<Option<CacheEntry>>,
}

impl Decoder {
    /// A decoder with no cached resolutions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: alloc::vec::Vec::new(),
        }
    }

    fn key(instr_index: usize, slot: u8) -> usize {
        instr_index * 4 + slot as usize
    }

    /// Look up a previously resolved address for this instruction/slot.
    #[must_use]
    pub fn cached(&self, instr_index: usize, slot: u8) -> Option<ResolvedAddress> {
        self.entries
            .get(Self::key(instr_index, slot))
            .copied()
            .flatten()
            .map(|e| e.resolved)
    }

    /// Resolve (or reuse a cached resolution for) an address argument.
    pub fn resolve_cached(
        &mut self,
        instr_index: usize,
        slot: u8,
        raw: RawAddress,
        frame_scope: ScopeId,
        base: Addr,
        read_ref_stack: impl FnOnce(Addr) -> Ref,
        read_ref_global: impl FnOnce(Addr) -> Ref,
    ) -> ResolvedAddress {
        if let Some(cached) = self.cached(instr_index, slot) {
            return cached;
        }
        let resolved = resolve(raw, frame_scope, base, read_ref_stack, read_ref_global);
        let key = Self::key(instr_index, slot);
        if key >= self.entries.len() {
            self.entries.resize(key + 1, None);
        }
        self.entries[key] = Some(CacheEntry {
            instr_index,
            slot,
            resolved,
            frame_relative: matches!(raw.mode, AddressMode::LoclVar | AddressMode::LoclInd),
        });
        resolved
    }

    /// Drop every cached resolution that depended on a frame-relative
    /// (`LoclVar`/`LoclInd`) base pointer. Called whenever the Stack buffer
    /// is reallocated, since every such resolution now points at stale
    /// storage (spec §5's re-encoding rule).
    pub fn invalidate_frame_relative(&mut self) {
        for entry in &mut self.entries {
            if entry.is_some_and(|e| e.frame_relative) {
                *entry = None;
            }
        }
    }

    /// Forget every cached resolution unconditionally.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
