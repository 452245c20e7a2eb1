// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Offset and handle newtypes.
//!
//! `Addr` is an offset into one of the VM's linear memory spaces (Global,
//! Stack or Code); it carries no information about which space it belongs
//! to on its own; `Ref` (see `reference.rs`) is the type that ties an
//! offset to a space. `BlockId` is a stable handle into the aux memory
//! manager's block table; it survives block moves/reallocations, unlike a
//! raw offset would.

use core::fmt;
use core::ops::{Add, Sub};

/// An offset into a linear memory space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Addr(u64);

impl Addr {
    /// The zero offset.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create a new offset.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Get the raw offset value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Get the raw offset value as `usize`, for indexing a buffer.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Add a byte count to this offset.
    #[inline]
    #[must_use]
    pub const fn add(self, delta: u64) -> Self {
        Self(self.0.wrapping_add(delta))
    }

    /// Subtract a byte count from this offset.
    #[inline]
    #[must_use]
    pub const fn sub(self, delta: u64) -> Self {
        Self(self.0.wrapping_sub(delta))
    }

    /// Align this offset up to the given alignment.
    ///
    /// Returns `None` if alignment is zero or not a power of two.
    #[inline]
    #[must_use]
    pub const fn align_up(self, alignment: u64) -> Option<Self> {
        if !alignment.is_power_of_two() {
            return None;
        }
        let mask = alignment - 1;
        Some(Self((self.0.wrapping_add(mask)) & !mask))
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:#x})", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Addr {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl Add<u64> for Addr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        self.add(rhs)
    }
}

impl Sub<u64> for Addr {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        self.sub(rhs)
    }
}

/// A stable handle to an aux-managed block (string or array).
///
/// `BlockId::NULL` never denotes a live block; the aux table's slot 0 is
/// reserved and never handed out by `alloc`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// Sentinel denoting "no block".
    pub const NULL: Self = Self(0);

    /// Wrap a raw table index as a block id.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw table index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Check whether this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}
