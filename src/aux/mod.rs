// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `AuxMemoryManager` — the second-level allocator.
//!
//! Issues stable `BlockId` handles backed by `MemoryPool` storage, for the
//! string and array computers to build on. Unlike the pool, which only
//! knows about byte ranges, aux tracks the *owning scope* of every block it
//! hands out (spec §3, §4.2). A block's owning scope is the call frame that
//! was active when it was allocated; once that call returns without the
//! block having been returned/stored into an outliving location, the block
//! becomes a "zombie" — dead weight nobody will ever free explicitly. There
//! is no tracing GC here: zombies are only swept when an allocation can't
//! otherwise be satisfied (spec §4.2/§4.9), keeping steady-state allocation
//! cost independent of how much garbage is lying around.

#[cfg(test)]
mod aux_test;

use crate::error::FatalError;
use crate::pool::{MemoryPool, PoolPtr};
use crate::types::BlockId;
use alloc::vec::Vec;

/// A call-scope identifier paired with the monotonically increasing
/// "scope number" that makes every *activation* of a given id unique, even
/// across recursive calls that reuse the same call depth.
pub type ScopeId = u32;
pub type ScopeNr = u64;

#[derive(Debug, Clone, Copy)]
struct Block {
    pool_ptr: PoolPtr,
    capacity: usize,
    len: usize,
    owner_scope_id: ScopeId,
    owner_scope_nr: ScopeNr,
    array_meta: Option<u32>,
    live: bool,
}

/// The second-level, handle-based allocator.
pub struct AuxMemoryManager {
    pool: MemoryPool,
    blocks: Vec<Block>,
    /// Recycled slot indices, reused before the table grows.
    free_slots: Vec<u32>,
    /// Stack of scope activations currently on the call path, most recent
    /// last. A block is live iff its `owner_scope_nr` appears here.
    live_scopes: Vec<(ScopeId, ScopeNr)>,
    next_scope_nr: ScopeNr,
}

impl AuxMemoryManager {
    /// Create an aux manager over a fresh pool with the given configuration.
    #[must_use]
    pub fn new(pool: MemoryPool) -> Self {
        Self {
            pool,
            // slot 0 reserved for `BlockId::NULL`
            blocks: alloc::vec![Block {
                pool_ptr: PoolPtr::NULL,
                capacity: 0,
                len: 0,
                owner_scope_id: 0,
                owner_scope_nr: 0,
                array_meta: None,
                live: false,
            }],
            free_slots: Vec::new(),
            live_scopes: alloc::vec![(0, 0)],
            next_scope_nr: 1,
        }
    }

    /// Enter a new call scope, returning its scope number.
    pub fn enter_scope(&mut self, scope_id: ScopeId) -> ScopeNr {
        let nr = self.next_scope_nr;
        self.next_scope_nr += 1;
        self.live_scopes.push((scope_id, nr));
        nr
    }

    /// Leave the current call scope. Blocks it created become zombies
    /// unless some outer scope still references them.
    pub fn leave_scope(&mut self) {
        self.live_scopes.pop();
    }

    fn is_scope_live(&self, nr: ScopeNr) -> bool {
        self.live_scopes.iter().any(|&(_, n)| n == nr)
    }

    /// Whether a block's creating scope has already returned.
    #[must_use]
    pub fn is_zombie(&self, id: BlockId) -> bool {
        let block = &self.blocks[id.index()];
        block.live && !self.is_scope_live(block.owner_scope_nr)
    }

    /// Whether a handle names a currently live (non-freed) block.
    #[must_use]
    pub fn is_valid(&self, id: BlockId) -> bool {
        !id.is_null() && id.index() < self.blocks.len() && self.blocks[id.index()].live
    }

    fn alloc_slot(&mut self) -> u32 {
        if let Some(slot) = self.free_slots.pop() {
            slot
        } else {
            let slot = self.blocks.len() as u32;
            self.blocks.push(Block {
                pool_ptr: PoolPtr::NULL,
                capacity: 0,
                len: 0,
                owner_scope_id: 0,
                owner_scope_nr: 0,
                array_meta: None,
                live: false,
            });
            slot
        }
    }

    /// Allocate a block of `size` bytes owned by the current top scope.
    ///
    /// If the pool cannot satisfy the request, zombies are swept once and
    /// the allocation is retried before failing.
    pub fn alloc(&mut self, size: usize, scope_id: ScopeId) -> Result<BlockId, FatalError> {
        let owner_scope_nr = self.live_scopes.last().map_or(0, |&(_, nr)| nr);
        let pool_ptr = match self.pool.allocate(size) {
            Ok(ptr) => ptr,
            Err(_) => {
                self.sweep_zombies();
                self.pool.allocate(size)?
            }
        };
        let slot = self.alloc_slot();
        self.blocks[slot as usize] = Block {
            pool_ptr,
            capacity: self.pool.size_of(pool_ptr),
            len: size,
            owner_scope_id: scope_id,
            owner_scope_nr,
            array_meta: None,
            live: true,
        };
        Ok(BlockId::new(slot))
    }

    /// Allocate a block at a specific, loader-assigned handle number,
    /// growing the table if needed (spec §4.7 `forced_alloc`: executables
    /// reference blocks by the number the compiler baked into the binary,
    /// so the loader must be able to pin them rather than let `alloc`
    /// choose).
    pub fn forced_alloc(&mut self, id: BlockId, size: usize) -> Result<(), FatalError> {
        while self.blocks.len() <= id.index() {
            self.blocks.push(Block {
                pool_ptr: PoolPtr::NULL,
                capacity: 0,
                len: 0,
                owner_scope_id: 0,
                owner_scope_nr: 0,
                array_meta: None,
                live: false,
            });
        }
        let pool_ptr = self.pool.allocate(size)?;
        self.blocks[id.index()] = Block {
            pool_ptr,
            capacity: self.pool.size_of(pool_ptr),
            len: size,
            owner_scope_id: 0,
            owner_scope_nr: 0, // scope 0 is always "live" (global lifetime)
            array_meta: None,
            live: true,
        };
        Ok(())
    }

    /// Resize a block's storage in place (growing if necessary).
    pub fn realloc(&mut self, id: BlockId, new_size: usize) -> Result<(), FatalError> {
        let old_ptr = self.blocks[id.index()].pool_ptr;
        let new_ptr = self.pool.reallocate(old_ptr, new_size)?;
        let block = &mut self.blocks[id.index()];
        block.pool_ptr = new_ptr;
        block.capacity = self.pool.size_of(new_ptr);
        block.len = new_size;
        Ok(())
    }

    /// Free a block explicitly.
    pub fn free(&mut self, id: BlockId) {
        if id.is_null() || !self.blocks[id.index()].live {
            return;
        }
        self.pool.free(self.blocks[id.index()].pool_ptr);
        self.blocks[id.index()].live = false;
        self.free_slots.push(id.index() as u32);
    }

    /// Sweep all zombies, reclaiming their pool storage.
    pub fn sweep_zombies(&mut self) {
        for idx in 0..self.blocks.len() {
            let id = BlockId::new(idx as u32);
            if self.is_zombie(id) {
                self.free(id);
            }
        }
    }

    /// Tear everything down (used when a process terminates).
    pub fn clear(&mut self) {
        self.pool.destroy();
        self.blocks.truncate(1);
        self.free_slots.clear();
        self.live_scopes.truncate(1);
    }

    /// Logical length in bytes of a block's content.
    #[must_use]
    pub fn len(&self, id: BlockId) -> usize {
        self.blocks[id.index()].len
    }

    /// Set the logical length (e.g. after a string mutation shortens it).
    pub fn set_len(&mut self, id: BlockId, len: usize) {
        self.blocks[id.index()].len = len;
    }

    /// Capacity in bytes currently backing a block.
    #[must_use]
    pub fn capacity(&self, id: BlockId) -> usize {
        self.blocks[id.index()].capacity
    }

    /// Byte offset into the pool arena for a block's storage.
    #[must_use]
    pub fn offset(&self, id: BlockId) -> usize {
        self.pool.offset_of(self.blocks[id.index()].pool_ptr)
    }

    /// Array-metadata table index associated with a block, if it is a
    /// dynamic array.
    #[must_use]
    pub fn array_meta(&self, id: BlockId) -> Option<u32> {
        self.blocks[id.index()].array_meta
    }

    /// Associate a dynamic array's metadata table index with a block.
    pub fn set_array_meta(&mut self, id: BlockId, meta: u32) {
        self.blocks[id.index()].array_meta = Some(meta);
    }

    /// The call-depth scope that created a block, for diagnostics.
    #[must_use]
    pub fn owner_scope(&self, id: BlockId) -> ScopeId {
        self.blocks[id.index()].owner_scope_id
    }

    /// Access the backing pool (for the string/array computers to read and
    /// write bytes through).
    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Mutable access to the backing pool.
    pub fn pool_mut(&mut self) -> &mut MemoryPool {
        &mut self.pool
    }
}
