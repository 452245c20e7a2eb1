// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Block replication and initialization (spec §4.6, `RPBEG..RPEND` /
//! `BIBEG..BIEND`).
//!
//! A composite value (a struct containing strings or dynamic arrays) cannot
//! be copied by `memcpy`: the nested blocks need their own sub-allocations,
//! or the copy would alias the source's storage. The source format
//! expresses "how to walk this value's nested blocks" as a small stack of
//! rule descriptors built once by `RPBEG`/`RPLOF`/`RPLOD`, then consumed by
//! an iterative Cartesian-product enumerator rather than a recursive
//! walk — spec §9 calls this out explicitly as the shape to keep. This
//! module is that enumerator, used both for deep-copying (`replicate`,
//! strings/arrays are duplicated into fresh blocks) and for initializing a
//! freshly allocated composite with empty blocks (`initialize`).

#[cfg(test)]
mod replicate_test;

use crate::arrays::dynamic::DynamicArrayComputer;
use crate::arrays::fixed::ArrayGeometry;
use crate::aux::{AuxMemoryManager, ScopeId};
use crate::error::VmError;
use crate::strings::StringComputer;
use crate::types::BlockId;
use alloc::vec::Vec;

/// One nesting level in the rule stack: "at this offset from the current
/// cursor there is a sub-block of this shape".
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    /// A fixed-geometry array of sub-blocks at `offset`.
    FixedArray { offset: u64, geometry: ArrayGeometry },
    /// A dynamic array handle at `offset`.
    DynamicArray { offset: u64 },
}

/// The kind of leaf being replicated at the end of the rule chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    String,
    DynamicArray,
}

/// Walks a rule stack's Cartesian product, copying or initializing one leaf
/// block per combination of nesting indices.
///
/// With an empty rule stack, a single leaf is processed directly (the
/// degenerate "no rules" case spec §4.6 calls out).
pub struct ReplicationEngine {
    rules: Vec<Rule>,
}

impl ReplicationEngine {
    /// Start a fresh rule stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Describe a fixed-array nesting level (`RPLOF`/`BILOF`).
    pub fn push_fixed_array(&mut self, offset: u64, geometry: ArrayGeometry) {
        self.rules.push(Rule::FixedArray { offset, geometry });
    }

    /// Describe a dynamic-array nesting level (`RPLOD`).
    pub fn push_dynamic_array(&mut self, offset: u64) {
        self.rules.push(Rule::DynamicArray { offset });
    }

    /// Drop every accumulated rule, ready for the next composite value.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Number of nesting levels currently described.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.rules.len()
    }

    /// Deep-copy every leaf block reachable through the rule stack
    /// (`RPSTR`/`RPARR`), each leaf at `leaf_offset` from its innermost
    /// cursor, reading a source `BlockId` and producing a fresh one owned
    /// by `dest_scope`.
    pub fn replicate(
        &self,
        aux: &mut AuxMemoryManager,
        arrays: &mut DynamicArrayComputer,
        dest_scope: ScopeId,
        leaf_offset: u64,
        leaf: LeafKind,
        read_source: impl Fn(u64) -> BlockId,
        mut write_dest: impl FnMut(u64, BlockId),
    ) -> Result<(), VmError> {
        self.walk(leaf_offset, &mut |abs_offset| {
            let source = read_source(abs_offset);
            let copy = Self::copy_leaf(aux, arrays, dest_scope, leaf, source)?;
            write_dest(abs_offset, copy);
            Ok(())
        })
    }

    /// Initialize every leaf position reachable through the rule stack with
    /// a fresh, empty block (`BISTR`/`BIARR`).
    pub fn initialize(
        &self,
        aux: &mut AuxMemoryManager,
        arrays: &mut DynamicArrayComputer,
        dest_scope: ScopeId,
        leaf_offset: u64,
        leaf: LeafKind,
        mut write_dest: impl FnMut(u64, BlockId),
    ) -> Result<(), VmError> {
        self.walk(leaf_offset, &mut |abs_offset| {
            let empty = match leaf {
                LeafKind::String => StringComputer::alloc_empty(aux, dest_scope)?,
                LeafKind::DynamicArray => arrays.alloc(aux, dest_scope, 1, &[0])?,
            };
            write_dest(abs_offset, empty);
            Ok(())
        })
    }

    fn copy_leaf(
        aux: &mut AuxMemoryManager,
        arrays: &mut DynamicArrayComputer,
        dest_scope: ScopeId,
        leaf: LeafKind,
        source: BlockId,
    ) -> Result<BlockId, VmError> {
        match leaf {
            LeafKind::String => {
                let text = StringComputer::as_str(aux, source)?;
                let text = alloc::string::ToString::to_string(text);
                StringComputer::alloc(aux, dest_scope, &text)
            }
            LeafKind::DynamicArray => {
                let shape = arrays.shape(aux, source)?;
                arrays.alloc(aux, dest_scope, 1, &shape)
            }
        }
    }

    /// Enumerate every combination of indices described by the rule stack
    /// (innermost rule varies fastest), invoking `visit` with the absolute
    /// byte offset of each leaf.
    fn walk(
        &self,
        leaf_offset: u64,
        visit: &mut impl FnMut(u64) -> Result<(), VmError>,
    ) -> Result<(), VmError> {
        Self::walk_rules(&self.rules, 0, leaf_offset, visit)
    }

    fn walk_rules(
        rules: &[Rule],
        cursor: u64,
        leaf_offset: u64,
        visit: &mut impl FnMut(u64) -> Result<(), VmError>,
    ) -> Result<(), VmError> {
        let Some((rule, rest)) = rules.split_first() else {
            return visit(cursor + leaf_offset);
        };
        match *rule {
            Rule::FixedArray { offset, geometry } => {
                let count = (0..geometry.dim_count())
                    .map(|d| u64::from(geometry.dim_size(d)))
                    .product::<u64>();
                let elem_size = geometry.byte_size() / count.max(1);
                for i in 0..count {
                    Self::walk_rules(rest, cursor + offset + i * elem_size, leaf_offset, visit)?;
                }
                Ok(())
            }
            Rule::DynamicArray { offset } => {
                Self::walk_rules(rest, cursor + offset, leaf_offset, visit)
            }
        }
    }
}

impl Default for ReplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}
