// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `ArrayComputer` — fixed and dynamic array primitives (spec §4.4).
//!
//! Both array flavors share the same offset formula for turning an
//! n-dimensional index into a byte offset:
//!
//! ```text
//! offset(d1..dn) = sum_i( d_i * CellSize * prod_{j>i}(DimSize_j) )
//! ```
//!
//! `fixed` implements `ArrayGeometry`, the compile-time-shaped array (size
//! known up front, stored inline wherever its owner lives). `dynamic`
//! implements `ArrayMeta`-backed arrays, which live in their own aux block
//! and can be resized at runtime.


pub mod dynamic;
pub mod fixed;

/// Maximum number of dimensions an array may have (spec §3).
pub const MAX_DIMS: usize = 5;

/// Compute the shared offset formula for one fully-specified index tuple.
///
/// Returns `None` if `indices.len() != dim_size.len()` or any index is out
/// of range for its dimension.
#[must_use]
pub fn element_offset(cell_size: u32, dim_size: &[u32], indices: &[u32]) -> Option<u64> {
    if indices.len() != dim_size.len() {
        return None;
    }
    for (&idx, &size) in indices.iter().zip(dim_size) {
        if idx >= size {
            return None;
        }
    }
    let mut offset: u64 = 0;
    for i in 0..indices.len() {
        let mut stride: u64 = u64::from(cell_size);
        for &size in &dim_size[i + 1..] {
            stride *= u64::from(size);
        }
        offset += u64::from(indices[i]) * stride;
    }
    Some(offset)
}

/// Total storage size in bytes for a geometry with the given cell size and
/// dimension sizes.
#[must_use]
pub fn total_size(cell_size: u32, dim_size: &[u32]) -> u64 {
    dim_size
        .iter()
        .fold(u64::from(cell_size), |acc, &d| acc * u64::from(d))
}
