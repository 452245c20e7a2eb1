// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `MemoryPool` — the first-level byte-arena allocator.
//!
//! This is the bottom tier of the memory subsystem (spec §4.1): a
//! segregated free-list allocator over a single growable byte arena,
//! handing out byte ranges to the aux memory manager. Blocks are tracked
//! by an out-of-band header table (`blocks`) rather than headers inlined
//! into the arena bytes themselves — inline headers would need raw
//! pointer arithmetic across a buffer this crate otherwise only ever
//! touches through `MemorySpace`, and Rust's aliasing rules make that
//! considerably less pleasant than keeping bookkeeping in its own table.
//! The externally visible behavior (best-fit-ish selection, O(1) "is
//! there a free block of about this size" queries, coalescing on free,
//! geometric growth) matches spec §4.1 exactly.


use crate::error::FatalError;
use crate::memory::{LinearMemory, MemorySpace};
use alloc::vec::Vec;

/// Number of segregated free-list size classes. Class `k` holds blocks of
/// size in `[2^k * unit_size, 2^(k+1) * unit_size)`, capped at the last
/// class which holds everything larger.
const FREE_LIST_COUNT: usize = 32;

/// A handle to a pool-allocated byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPtr(usize);

impl PoolPtr {
    /// Sentinel pointer naming no allocation.
    pub const NULL: Self = Self(usize::MAX);

    /// Whether this is the null pointer.
    #[must_use]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    offset: usize,
    size: usize,
    used: bool,
    /// Index of the header immediately before/after this one in arena
    /// order, or `usize::MAX` at the ends. Used for O(1) coalescing.
    prev: usize,
    next: usize,
}

/// Configuration for a `MemoryPool` instance, sized from the loader's
/// header fields (spec §6: "memory unit parameters").
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Smallest allocatable granule, in bytes. All allocations are rounded
    /// up to a multiple of this.
    pub unit_size: usize,
    /// Number of units the arena starts out with.
    pub initial_units: usize,
    /// Number of units added each time the arena must grow.
    pub chunk_units: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            unit_size: 16,
            initial_units: 256,
            chunk_units: 256,
        }
    }
}

/// The first-level allocator: a segregated free-list arena.
pub struct MemoryPool {
    config: PoolConfig,
    arena: LinearMemory,
    blocks: Vec<BlockHeader>,
    /// `free_lists[k]` holds indices into `blocks` of free blocks in class `k`.
    free_lists: [Vec<usize>; FREE_LIST_COUNT],
    /// Bit `k` set iff `free_lists[k]` is non-empty; lets `allocate` skip
    /// straight to the first non-empty class at or above the requested size.
    free_bits: u32,
}

fn size_class(size: usize, unit_size: usize) -> usize {
    let units = (size / unit_size).max(1);
    let class = usize::BITS - units.leading_zeros();
    class.saturating_sub(1) as usize
}

impl MemoryPool {
    /// Create a pool with the given configuration, pre-allocating the
    /// initial arena as one large free block.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let initial_bytes = config.unit_size * config.initial_units;
        let mut pool = Self {
            config,
            arena: LinearMemory::with_capacity(initial_bytes),
            blocks: Vec::new(),
            free_lists: core::array::from_fn(|_| Vec::new()),
            free_bits: 0,
        };
        pool.push_free_block(0, initial_bytes);
        pool
    }

    fn push_free_block(&mut self, offset: usize, size: usize) {
        let prev = self.blocks.iter().position(|b| b.offset + b.size == offset).unwrap_or(usize::MAX);
        let next = self.blocks.iter().position(|b| offset + size == b.offset).unwrap_or(usize::MAX);
        let idx = self.blocks.len();
        self.blocks.push(BlockHeader {
            offset,
            size,
            used: false,
            prev,
            next,
        });
        if prev != usize::MAX {
            self.blocks[prev].next = idx;
        }
        if next != usize::MAX {
            self.blocks[next].prev = idx;
        }
        self.link_free(idx);
    }

    fn link_free(&mut self, idx: usize) {
        let class = size_class(self.blocks[idx].size, self.config.unit_size);
        self.free_lists[class].push(idx);
        self.free_bits |= 1 << class;
    }

    fn unlink_free(&mut self, idx: usize) {
        let class = size_class(self.blocks[idx].size, self.config.unit_size);
        if let Some(pos) = self.free_lists[class].iter().position(|&i| i == idx) {
            self.free_lists[class].swap_remove(pos);
        }
        if self.free_lists[class].is_empty() {
            self.free_bits &= !(1 << class);
        }
    }

    fn find_free(&mut self, size: usize) -> Option<usize> {
        let start_class = size_class(size, self.config.unit_size);
        let mask = self.free_bits & !((1u32 << start_class) - 1);
        if mask == 0 {
            return None;
        }
        let mut remaining = mask;
        while remaining != 0 {
            let class = remaining.trailing_zeros() as usize;
            if let Some(&idx) = self.free_lists[class].iter().find(|&&i| self.blocks[i].size >= size) {
                return Some(idx);
            }
            remaining &= remaining - 1;
        }
        None
    }

    fn grow(&mut self, at_least: usize) {
        let chunk_bytes = self.config.unit_size * self.config.chunk_units;
        let add = at_least.max(chunk_bytes);
        let offset = self.arena.len();
        self.arena.grow(add);
        self.push_free_block(offset, add);
    }

    /// Allocate a byte range of at least `requested` bytes, rounded up to a
    /// unit. Grows the arena if no free block fits.
    ///
    /// # Errors
    /// Returns `FatalError::PoolExhausted` if growth itself fails (in this
    /// host-backed implementation, growth only fails if it would overflow
    /// `usize`, which `Vec::resize` would already have panicked on, so this
    /// is effectively infallible but kept `Result` for future bounded hosts).
    pub fn allocate(&mut self, requested: usize) -> Result<PoolPtr, FatalError> {
        let unit = self.config.unit_size;
        let size = requested.div_ceil(unit).max(1) * unit;
        let idx = match self.find_free(size) {
            Some(idx) => idx,
            None => {
                self.grow(size);
                self.find_free(size).ok_or(FatalError::PoolExhausted)?
            }
        };
        self.unlink_free(idx);
        self.blocks[idx].used = true;

        let remainder = self.blocks[idx].size - size;
        if remainder >= unit {
            self.blocks[idx].size = size;
            let new_offset = self.blocks[idx].offset + size;
            let old_next = self.blocks[idx].next;
            self.push_free_block(new_offset, remainder);
            // push_free_block may have linked to a different next than the
            // one we just split off from; re-point explicitly.
            let new_idx = self.blocks.len() - 1;
            self.blocks[idx].next = new_idx;
            self.blocks[new_idx].prev = idx;
            self.blocks[new_idx].next = old_next;
            if old_next != usize::MAX {
                self.blocks[old_next].prev = new_idx;
            }
        }

        Ok(PoolPtr(idx))
    }

    /// Free a previously allocated range, coalescing with free neighbors.
    pub fn free(&mut self, ptr: PoolPtr) {
        if ptr.is_null() {
            return;
        }
        let idx = ptr.0;
        self.blocks[idx].used = false;

        let mut idx = idx;
        if let Some(next) = self.free_neighbor(self.blocks[idx].next) {
            self.unlink_free(next);
            self.merge_into(idx, next);
        }
        if let Some(prev) = self.free_neighbor(self.blocks[idx].prev) {
            self.unlink_free(idx);
            self.merge_into(prev, idx);
            idx = prev;
        }
        self.link_free(idx);
    }

    fn free_neighbor(&self, idx: usize) -> Option<usize> {
        (idx != usize::MAX && !self.blocks[idx].used).then_some(idx)
    }

    /// Merge `absorbed` into `into`, both assumed adjacent in arena order
    /// with `into` first; `absorbed` becomes a dead header (never reused).
    fn merge_into(&mut self, into: usize, absorbed: usize) {
        let absorbed_size = self.blocks[absorbed].size;
        let absorbed_next = self.blocks[absorbed].next;
        self.blocks[into].size += absorbed_size;
        self.blocks[into].next = absorbed_next;
        if absorbed_next != usize::MAX {
            self.blocks[absorbed_next].prev = into;
        }
        // Retire the absorbed header: zero its footprint and park its
        // offset out of range so later linear scans in `push_free_block`
        // never mistake it for a live neighbor.
        self.blocks[absorbed].size = 0;
        self.blocks[absorbed].offset = usize::MAX;
        self.blocks[absorbed].prev = usize::MAX;
        self.blocks[absorbed].next = usize::MAX;
    }

    /// Resize an allocation in place if possible, otherwise move it.
    /// Returns the (possibly new) pointer.
    pub fn reallocate(&mut self, ptr: PoolPtr, new_size: usize) -> Result<PoolPtr, FatalError> {
        let unit = self.config.unit_size;
        let size = new_size.div_ceil(unit).max(1) * unit;
        let idx = ptr.0;
        let old_size = self.blocks[idx].size;

        if size <= old_size {
            return Ok(ptr);
        }

        if let Some(next) = self.free_neighbor(self.blocks[idx].next) {
            if old_size + self.blocks[next].size >= size {
                self.unlink_free(next);
                self.merge_into(idx, next);
                return Ok(ptr);
            }
        }

        let new_ptr = self.allocate(size)?;
        let old_offset = self.blocks[idx].offset;
        let new_offset = self.blocks[new_ptr.0].offset;
        self.arena.copy_within(
            crate::types::Addr::new(old_offset as u64),
            crate::types::Addr::new(new_offset as u64),
            old_size,
        );
        self.free(ptr);
        Ok(new_ptr)
    }

    /// Byte offset of an allocation within the arena.
    #[must_use]
    pub fn offset_of(&self, ptr: PoolPtr) -> usize {
        self.blocks[ptr.0].offset
    }

    /// Size in bytes of an allocation.
    #[must_use]
    pub fn size_of(&self, ptr: PoolPtr) -> usize {
        self.blocks[ptr.0].size
    }

    /// Read-only view of the arena backing this pool.
    #[must_use]
    pub fn arena(&self) -> &LinearMemory {
        &self.arena
    }

    /// Mutable view of the arena backing this pool.
    pub fn arena_mut(&mut self) -> &mut LinearMemory {
        &mut self.arena
    }

    /// Tear the pool down, releasing all allocations at once.
    pub fn destroy(&mut self) {
        self.blocks.clear();
        for list in &mut self.free_lists {
            list.clear();
        }
        self.free_bits = 0;
        let initial_bytes = self.config.unit_size * self.config.initial_units;
        self.arena = LinearMemory::with_capacity(initial_bytes);
        self.push_free_block(0, initial_bytes);
    }

    /// Total bytes currently held free across all size classes.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.blocks.iter().filter(|b| !b.used).map(|b| b.size).sum()
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for (i, b) in self.blocks.iter().enumerate() {
            if b.next != usize::MAX {
                debug_assert_eq!(self.blocks[b.next].prev, i, "broken forward link");
            }
            if b.prev != usize::MAX {
                debug_assert_eq!(self.blocks[b.prev].next, i, "broken back link");
            }
        }
    }
}
