// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Dynamic arrays: runtime-resizable, backed by an aux block plus a side
//! table of `ArrayMeta` records (spec §4.4).

#[cfg(test)]
mod dynamic_test;

use super::{MAX_DIMS, element_offset, total_size};
use crate::aux::{AuxMemoryManager, ScopeId};
use crate::error::{SysExceptionCode, VmError};
use crate::memory::MemorySpace;
use crate::types::{Addr, BlockId};
use alloc::vec::Vec;

/// Metadata describing a dynamic array's current shape.
#[derive(Debug, Clone, Copy)]
pub struct ArrayMeta {
    cell_size: u32,
    dim_count: u8,
    dim_size: [u32; MAX_DIMS],
}

impl ArrayMeta {
    fn dims(&self) -> &[u32] {
        &self.dim_size[..self.dim_count as usize]
    }

    /// Total element count.
    #[must_use]
    pub fn element_count(&self) -> u64 {
        self.dims().iter().fold(1u64, |acc, &d| acc * u64::from(d))
    }

    /// Total byte size for the current shape.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        total_size(self.cell_size, self.dims())
    }
}

/// The dynamic-array side table plus the operations spec §4.4 names.
///
/// Indices into `metas` are handed out by `alloc` and stashed on the
/// owning aux block via `AuxMemoryManager::set_array_meta`, so a block id
/// is enough to find a dynamic array's current shape.
#[derive(Default)]
pub struct DynamicArrayComputer {
    metas: Vec<ArrayMeta>,
}

impl DynamicArrayComputer {
    /// Create an empty side table.
    #[must_use]
    pub const fn new() -> Self {
        Self { metas: Vec::new() }
    }

    /// Allocate a new dynamic array of the given shape.
    pub fn alloc(
        &mut self,
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        cell_size: u32,
        dims: &[u32],
    ) -> Result<BlockId, VmError> {
        if dims.is_empty() || dims.len() > MAX_DIMS {
            return Err(VmError::new(SysExceptionCode::InvalidMemoryAddress));
        }
        let mut dim_size = [0u32; MAX_DIMS];
        dim_size[..dims.len()].copy_from_slice(dims);
        let meta = ArrayMeta {
            cell_size,
            dim_count: dims.len() as u8,
            dim_size,
        };
        let byte_size = meta.byte_size() as usize;
        let id = aux
            .alloc(byte_size, scope)
            .map_err(|_| VmError::new(SysExceptionCode::StringAllocationError))?;
        let meta_index = self.metas.len() as u32;
        self.metas.push(meta);
        aux.set_array_meta(id, meta_index);
        Ok(id)
    }

    fn meta(&self, aux: &AuxMemoryManager, id: BlockId) -> Result<ArrayMeta, VmError> {
        let idx = aux
            .array_meta(id)
            .ok_or_else(|| VmError::new(SysExceptionCode::InvalidArrayBlock))?;
        Ok(self.metas[idx as usize])
    }

    /// Current shape of a dynamic array.
    pub fn shape(&self, aux: &AuxMemoryManager, id: BlockId) -> Result<Vec<u32>, VmError> {
        Ok(self.meta(aux, id)?.dims().to_vec())
    }

    /// Resize a dynamic array to `new_dims`. For a 1-D array, this extends
    /// or truncates in place without moving surviving elements. For n-D
    /// arrays, this copies element-by-element into freshly sized storage
    /// since row strides change with any dimension but the last (spec
    /// §4.4's "copy element-wise for n-D" rule).
    pub fn resize(
        &mut self,
        aux: &mut AuxMemoryManager,
        id: BlockId,
        new_dims: &[u32],
    ) -> Result<(), VmError> {
        let old_meta = self.meta(aux, id)?;
        if new_dims.len() != old_meta.dim_count as usize {
            return Err(VmError::new(SysExceptionCode::InvalidArrayBlock));
        }
        let mut new_dim_size = [0u32; MAX_DIMS];
        new_dim_size[..new_dims.len()].copy_from_slice(new_dims);
        let new_meta = ArrayMeta {
            cell_size: old_meta.cell_size,
            dim_count: old_meta.dim_count,
            dim_size: new_dim_size,
        };

        if old_meta.dim_count == 1 {
            aux.realloc(id, new_meta.byte_size() as usize)
                .map_err(|_| VmError::new(SysExceptionCode::StringAllocationError))?;
        } else {
            let old_bytes = Self::read_all(aux, id, &old_meta);
            let new_byte_len = new_meta.byte_size() as usize;
            aux.realloc(id, new_byte_len)
                .map_err(|_| VmError::new(SysExceptionCode::StringAllocationError))?;
            aux.pool_mut().arena_mut().zero(Addr::new(aux.offset(id) as u64), new_byte_len);
            Self::copy_elementwise(aux, id, &old_meta, &new_meta, &old_bytes);
        }

        let idx = aux.array_meta(id).expect("array block always carries meta");
        self.metas[idx as usize] = new_meta;
        Ok(())
    }

    fn read_all(aux: &AuxMemoryManager, id: BlockId, meta: &ArrayMeta) -> Vec<u8> {
        let offset = aux.offset(id);
        aux.pool()
            .arena()
            .slice(Addr::new(offset as u64), meta.byte_size() as usize)
            .to_vec()
    }

    fn copy_elementwise(
        aux: &mut AuxMemoryManager,
        id: BlockId,
        old_meta: &ArrayMeta,
        new_meta: &ArrayMeta,
        old_bytes: &[u8],
    ) {
        let cell = old_meta.cell_size as usize;
        let base = aux.offset(id) as u64;
        let mut indices = [0u32; MAX_DIMS];
        let dims = old_meta.dims();
        let total: u64 = dims.iter().fold(1u64, |acc, &d| acc * u64::from(d));
        for linear in 0..total {
            let mut rem = linear;
            for (i, &d) in dims.iter().enumerate().rev() {
                indices[i] = (rem % u64::from(d)) as u32;
                rem /= u64::from(d);
            }
            let idx = &indices[..dims.len()];
            // an index that no longer fits the new (possibly smaller)
            // shape is simply dropped, matching truncation semantics.
            let Some(new_off) = element_offset(new_meta.cell_size, new_meta.dims(), idx) else {
                continue;
            };
            let old_off = element_offset(old_meta.cell_size, dims, idx).unwrap_or(0) as usize;
            let src = &old_bytes[old_off..old_off + cell];
            aux.pool_mut()
                .arena_mut()
                .slice_mut(Addr::new(base + new_off), cell)
                .copy_from_slice(src);
        }
    }

    /// Byte offset of one element, resolved against the array's current
    /// shape.
    pub fn element_offset(
        &self,
        aux: &AuxMemoryManager,
        id: BlockId,
        indices: &[u32],
    ) -> Result<u64, VmError> {
        let meta = self.meta(aux, id)?;
        element_offset(meta.cell_size, meta.dims(), indices)
            .ok_or_else(|| VmError::new(SysExceptionCode::ArrayIndexingOutOfBounds))
    }

    /// Join the elements of a 1-D array of string blocks with a separator,
    /// producing one new string block (spec §4.4 "bridging to char array").
    pub fn join_strings(
        &self,
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        elements: &[BlockId],
        separator: &str,
    ) -> Result<BlockId, VmError> {
        let mut out = alloc::string::String::new();
        for (i, &elem) in elements.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            out.push_str(crate::strings::StringComputer::as_str(aux, elem)?);
        }
        crate::strings::StringComputer::alloc(aux, scope, &out)
    }

    /// The raw bytes currently backing a dynamic array, for bridging into a
    /// fixed array of matching size (`AF2D`/`AD2F`).
    pub fn raw_bytes(&self, aux: &AuxMemoryManager, id: BlockId) -> Result<Vec<u8>, VmError> {
        let meta = self.meta(aux, id)?;
        Ok(Self::read_all(aux, id, &meta))
    }

    /// Reshape `dest` to `source`'s current shape and cell size and copy its
    /// bytes over, replacing whatever `dest` held (`AD2D`).
    pub fn cast_from(
        &mut self,
        aux: &mut AuxMemoryManager,
        dest: BlockId,
        source: BlockId,
    ) -> Result<(), VmError> {
        let src_meta = self.meta(aux, source)?;
        let bytes = Self::read_all(aux, source, &src_meta);
        let byte_len = src_meta.byte_size() as usize;
        aux.realloc(dest, byte_len)
            .map_err(|_| VmError::new(SysExceptionCode::StringAllocationError))?;
        aux.pool_mut()
            .arena_mut()
            .slice_mut(Addr::new(aux.offset(dest) as u64), byte_len)
            .copy_from_slice(&bytes);
        let idx = aux
            .array_meta(dest)
            .ok_or_else(|| VmError::new(SysExceptionCode::InvalidArrayBlock))?;
        self.metas[idx as usize] = src_meta;
        Ok(())
    }

    /// Split a string block on a separator into a vector of new string
    /// blocks.
    pub fn split_string(
        &self,
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        separator: &str,
    ) -> Result<Vec<BlockId>, VmError> {
        let parts: Vec<alloc::string::String> = crate::strings::StringComputer::as_str(aux, id)?
            .split(separator)
            .map(alloc::string::ToString::to_string)
            .collect();
        parts
            .iter()
            .map(|p| crate::strings::StringComputer::alloc(aux, scope, p))
            .collect()
    }
}

/// State machine for the `STA` string-array iterator (spec §4.4): a
/// sequential cursor over a dynamic array of strings, opened either for
/// reading or writing and required to be explicitly closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaState {
    #[default]
    Closed,
    OpenRead {
        cursor: usize,
    },
    OpenWrite {
        cursor: usize,
    },
}

/// A string-array iterator instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringArrayIterator {
    state: StaState,
}

impl StringArrayIterator {
    /// Create a closed iterator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: StaState::Closed,
        }
    }

    /// Open for sequential reads.
    pub fn open_read(&mut self) -> Result<(), VmError> {
        if self.state != StaState::Closed {
            return Err(VmError::new(SysExceptionCode::StaAlreadyOpen));
        }
        self.state = StaState::OpenRead { cursor: 0 };
        Ok(())
    }

    /// Open for sequential writes (appends).
    pub fn open_write(&mut self) -> Result<(), VmError> {
        if self.state != StaState::Closed {
            return Err(VmError::new(SysExceptionCode::StaAlreadyOpen));
        }
        self.state = StaState::OpenWrite { cursor: 0 };
        Ok(())
    }

    /// Advance and return the next read cursor.
    pub fn advance_read(&mut self) -> Result<usize, VmError> {
        match &mut self.state {
            StaState::OpenRead { cursor } => {
                let c = *cursor;
                *cursor += 1;
                Ok(c)
            }
            _ => Err(VmError::new(SysExceptionCode::StaNotOpen)),
        }
    }

    /// Advance and return the next write cursor.
    pub fn advance_write(&mut self) -> Result<usize, VmError> {
        match &mut self.state {
            StaState::OpenWrite { cursor } => {
                let c = *cursor;
                *cursor += 1;
                Ok(c)
            }
            _ => Err(VmError::new(SysExceptionCode::StaNotOpen)),
        }
    }

    /// Close the iterator.
    pub fn close(&mut self) -> Result<(), VmError> {
        if self.state == StaState::Closed {
            return Err(VmError::new(SysExceptionCode::StaAlreadyClosed));
        }
        self.state = StaState::Closed;
        Ok(())
    }

    /// Current state, for inspection/tests.
    #[must_use]
    pub const fn state(&self) -> StaState {
        self.state
    }
}
