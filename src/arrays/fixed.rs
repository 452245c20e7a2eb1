// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Fixed-shape arrays: geometry known at compile time, addressed either
//! absolutely or relative to the current call frame (`Agx`, spec §4.4/§6).
//!
//! The original `ArrayGeometry` bundles the shape together with the
//! per-geometry loop-walk state (`DimValue`/`LoopIndex` in the source's
//! `arrcomp.hpp`) rather than keeping them apart, since every `AF*`
//! instruction addresses a geometry by the same `Agx` handle whether it is
//! reading the shape or advancing the walk. `FixedLoopState` keeps that
//! state as its own type for readability, but it lives inside
//! `ArrayGeometry` rather than a sibling table, matching that original
//! layout.

#[cfg(test)]
mod fixed_test;

use super::{MAX_DIMS, element_offset, total_size};
use crate::error::{SysExceptionCode, VmError};

/// The current position of an in-progress walk over a fixed array's
/// dimensions (`AF1RW`/`AF1FO`/`AF1NX`/`AFIDX`): one index per dimension
/// plus the equivalent linear position.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLoopState {
    dim_value: [u32; MAX_DIMS],
    loop_index: u64,
}

impl FixedLoopState {
    /// A loop positioned at the first element of every dimension.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dim_value: [0; MAX_DIMS],
            loop_index: 0,
        }
    }

    /// Set dimension `i`'s current index directly (`AFIDX`).
    pub fn set(&mut self, i: usize, value: u32) {
        self.dim_value[i] = value;
    }

    /// Dimension `i`'s current index.
    #[must_use]
    pub fn get(&self, i: usize) -> u32 {
        self.dim_value[i]
    }

    /// The indices for the first `dim_count` dimensions, outermost first.
    #[must_use]
    pub fn indices(&self, dim_count: usize) -> &[u32] {
        &self.dim_value[..dim_count]
    }

    /// Linear position reached so far (number of `advance` calls since the
    /// last `reset`).
    #[must_use]
    pub const fn loop_index(&self) -> u64 {
        self.loop_index
    }

    /// Reset to the first element of every dimension.
    pub fn reset(&mut self) {
        self.dim_value = [0; MAX_DIMS];
        self.loop_index = 0;
    }

    /// Advance to the next element, carrying into outer dimensions the way
    /// an odometer does (innermost, i.e. last, dimension varies fastest).
    /// Returns `true` if the new position is still within `dim_size`,
    /// `false` once every dimension has wrapped (the walk is exhausted).
    pub fn advance(&mut self, dim_size: &[u32]) -> bool {
        self.loop_index += 1;
        for d in (0..dim_size.len()).rev() {
            self.dim_value[d] += 1;
            if self.dim_value[d] < dim_size[d] {
                return true;
            }
            self.dim_value[d] = 0;
        }
        false
    }
}

/// The fixed shape of an array: up to `MAX_DIMS` dimensions, each with a
/// known size, a fixed per-cell size, and the loop-walk position the
/// `AF1RW`/`AF1FO`/`AF1NX`/`AFIDX` family reads and advances.
#[derive(Debug, Clone, Copy)]
pub struct ArrayGeometry {
    cell_size: u32,
    dim_count: u8,
    dim_size: [u32; MAX_DIMS],
    loop_state: FixedLoopState,
}

impl ArrayGeometry {
    /// Build a geometry from the dimension sizes in outermost-to-innermost
    /// order. `dims.len()` must be in `1..=MAX_DIMS`.
    pub fn new(cell_size: u32, dims: &[u32]) -> Result<Self, VmError> {
        if dims.is_empty() || dims.len() > MAX_DIMS {
            return Err(VmError::new(SysExceptionCode::InvalidMemoryAddress));
        }
        let mut dim_size = [0u32; MAX_DIMS];
        dim_size[..dims.len()].copy_from_slice(dims);
        Ok(Self {
            cell_size,
            dim_count: dims.len() as u8,
            dim_size,
            loop_state: FixedLoopState::new(),
        })
    }

    /// A geometry with `dim_count` dimensions, every size left at zero
    /// (`AFDEF`; sizes are filled in afterwards one at a time by `AFSSZ`).
    pub fn new_defined(cell_size: u32, dim_count: usize) -> Result<Self, VmError> {
        if dim_count == 0 || dim_count > MAX_DIMS {
            return Err(VmError::new(SysExceptionCode::InvalidMemoryAddress));
        }
        Ok(Self {
            cell_size,
            dim_count: dim_count as u8,
            dim_size: [0; MAX_DIMS],
            loop_state: FixedLoopState::new(),
        })
    }

    /// A placeholder occupying a geometry-table slot before `AFDEF` has
    /// named it; `dim_count() == 0` marks it as not yet defined.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cell_size: 0,
            dim_count: 0,
            dim_size: [0; MAX_DIMS],
            loop_state: FixedLoopState::new(),
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub const fn dim_count(&self) -> usize {
        self.dim_count as usize
    }

    /// Size, in elements, of dimension `i` (0-indexed, outermost first).
    #[must_use]
    pub fn dim_size(&self, i: usize) -> u32 {
        self.dim_size[i]
    }

    /// Set dimension `i`'s size (`AFSSZ`).
    pub fn set_dim_size(&mut self, i: usize, size: u32) -> Result<(), VmError> {
        if i >= self.dim_count() {
            return Err(VmError::new(SysExceptionCode::ArrayIndexingOutOfBounds));
        }
        self.dim_size[i] = size;
        Ok(())
    }

    /// Per-cell size in bytes.
    #[must_use]
    pub const fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Total storage required, in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        total_size(self.cell_size, &self.dim_size[..self.dim_count()])
    }

    /// Byte offset of the element at `indices`, or an out-of-bounds error.
    pub fn offset(&self, indices: &[u32]) -> Result<u64, VmError> {
        element_offset(self.cell_size, &self.dim_size[..self.dim_count()], indices)
            .ok_or_else(|| VmError::new(SysExceptionCode::ArrayIndexingOutOfBounds))
    }

    /// Set dimension `i`'s current loop index (`AFIDX`).
    pub fn set_index(&mut self, i: usize, value: u32) -> Result<(), VmError> {
        if i >= self.dim_count() {
            return Err(VmError::new(SysExceptionCode::ArrayIndexingOutOfBounds));
        }
        self.loop_state.set(i, value);
        Ok(())
    }

    /// Byte offset of the element named by the currently-set indices
    /// (`AFOFN`).
    pub fn current_offset(&self) -> Result<u64, VmError> {
        let dim_count = self.dim_count();
        self.offset(self.loop_state.indices(dim_count))
    }

    /// Reposition the loop-walk state to the first element (`AF1RW`).
    pub fn reset_loop(&mut self) {
        self.loop_state.reset();
    }

    /// Advance the loop-walk state by one element (`AF1NX`/`AF1FO`),
    /// returning whether an element remains in bounds.
    pub fn advance_loop(&mut self) -> bool {
        let dim_count = self.dim_count();
        let dim_size = self.dim_size;
        self.loop_state.advance(&dim_size[..dim_count])
    }
}

/// An array index, as encoded in the bytecode: the high bit distinguishes
/// an address that is absolute within the geometry table from one that is
/// relative to the current call frame's `ArrayFix` base (spec §4.4/§6
/// `Agx`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agx {
    /// Absolute index into the geometry table.
    Absolute(u32),
    /// Offset relative to the active frame's `ArrayFix` base.
    FrameRelative(u32),
}

impl Agx {
    const RELATIVE_BIT: u32 = 1 << 31;

    /// Decode a raw 32-bit encoded index value.
    #[must_use]
    pub const fn decode(raw: u32) -> Self {
        if raw & Self::RELATIVE_BIT != 0 {
            Self::FrameRelative(raw & !Self::RELATIVE_BIT)
        } else {
            Self::Absolute(raw)
        }
    }

    /// Encode back to the raw 32-bit representation.
    #[must_use]
    pub const fn encode(self) -> u32 {
        match self {
            Self::Absolute(v) => v,
            Self::FrameRelative(v) => v | Self::RELATIVE_BIT,
        }
    }

    /// Resolve to an absolute geometry-table index given the current
    /// frame's `ArrayFix` base.
    #[must_use]
    pub const fn resolve(self, frame_base: u32) -> u32 {
        match self {
            Self::Absolute(v) => v,
            Self::FrameRelative(v) => frame_base + v,
        }
    }
}
