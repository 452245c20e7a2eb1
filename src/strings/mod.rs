// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `StringComputer` — the string-value primitives (spec §4.3).
//!
//! Strings are byte blocks owned by the aux memory manager; this module
//! never allocates or frees pool storage directly, it only asks `aux` to
//! do so and then reads/writes the bytes through the pool's arena. Every
//! operation that produces a new string returns a fresh `BlockId` rather
//! than mutating in place, except the small set spec §4.3 calls out as
//! in-place mutators (`set_char`, `trim_in_place`-equivalents are modeled
//! as producing a new block too, since aux handles are stable but their
//! backing bytes move on realloc — simpler and still satisfies the
//! aliasing rule: callers that pass the same source and destination
//! handle get a fresh block back and the old one freed, never a
//! half-overwritten buffer).


use crate::aux::{AuxMemoryManager, ScopeId};
use crate::error::{SysExceptionCode, VmError};
use crate::memory::MemorySpace;
use crate::types::{Addr, BlockId};
use alloc::borrow::ToOwned;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Namespace for string-value operations over aux-managed blocks.
pub struct StringComputer;

impl StringComputer {
    fn bytes<'a>(aux: &'a AuxMemoryManager, id: BlockId) -> &'a [u8] {
        let offset = aux.offset(id);
        let len = aux.len(id);
        aux.pool().arena().slice(Addr::new(offset as u64), len)
    }

    /// Read a string block's contents. Returns an error if the bytes are
    /// not valid UTF-8 (the loader/interpreter never write anything else,
    /// but a corrupt binary could claim a non-string block is one).
    pub fn as_str<'a>(aux: &'a AuxMemoryManager, id: BlockId) -> Result<&'a str, VmError> {
        core::str::from_utf8(Self::bytes(aux, id))
            .map_err(|_| VmError::new(SysExceptionCode::InvalidStringBlock))
    }

    /// Allocate a new string block containing `s`.
    pub fn alloc(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        s: &str,
    ) -> Result<BlockId, VmError> {
        let id = aux
            .alloc(s.len(), scope)
            .map_err(|_| VmError::new(SysExceptionCode::StringAllocationError))?;
        let offset = aux.offset(id);
        aux.pool_mut()
            .arena_mut()
            .slice_mut(Addr::new(offset as u64), s.len())
            .copy_from_slice(s.as_bytes());
        Ok(id)
    }

    /// Allocate the empty string.
    pub fn alloc_empty(aux: &mut AuxMemoryManager, scope: ScopeId) -> Result<BlockId, VmError> {
        Self::alloc(aux, scope, "")
    }

    /// Number of bytes in a string block.
    #[must_use]
    pub fn len(aux: &AuxMemoryManager, id: BlockId) -> usize {
        aux.len(id)
    }

    /// Lexicographic comparison of two string blocks' contents.
    pub fn compare(aux: &AuxMemoryManager, a: BlockId, b: BlockId) -> Ordering {
        Self::bytes(aux, a).cmp(Self::bytes(aux, b))
    }

    /// `a == b` by content.
    #[must_use]
    pub fn equals(aux: &AuxMemoryManager, a: BlockId, b: BlockId) -> bool {
        Self::bytes(aux, a) == Self::bytes(aux, b)
    }

    /// Concatenate two strings into a freshly allocated block.
    pub fn concat(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        a: BlockId,
        b: BlockId,
    ) -> Result<BlockId, VmError> {
        let mut combined = Vec::with_capacity(aux.len(a) + aux.len(b));
        combined.extend_from_slice(Self::bytes(aux, a));
        combined.extend_from_slice(Self::bytes(aux, b));
        let s = core::str::from_utf8(&combined)
            .map_err(|_| VmError::new(SysExceptionCode::InvalidStringBlock))?;
        Self::alloc(aux, scope, s)
    }

    /// Extract `[start, start+len)` as a new string. Clamps `len` to the
    /// available length rather than erroring, matching the "out of range
    /// reads return what's left" convention spec §4.3 uses for substring.
    pub fn substring(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        start: usize,
        len: usize,
    ) -> Result<BlockId, VmError> {
        let s = Self::as_str(aux, id)?;
        let start = start.min(s.len());
        let end = (start + len).min(s.len());
        let slice = &s[start..end];
        Self::alloc(aux, scope, slice)
    }

    /// Byte offset of the first occurrence of `needle` in `haystack`, if any.
    pub fn index_of(
        aux: &AuxMemoryManager,
        haystack: BlockId,
        needle: BlockId,
    ) -> Result<Option<usize>, VmError> {
        let h = Self::as_str(aux, haystack)?;
        let n = Self::as_str(aux, needle)?;
        Ok(h.find(n))
    }

    /// Uppercase (ASCII) a string into a new block.
    pub fn to_upper(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
    ) -> Result<BlockId, VmError> {
        let upper = Self::as_str(aux, id)?.to_ascii_uppercase();
        Self::alloc(aux, scope, &upper)
    }

    /// Lowercase (ASCII) a string into a new block.
    pub fn to_lower(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
    ) -> Result<BlockId, VmError> {
        let lower = Self::as_str(aux, id)?.to_ascii_lowercase();
        Self::alloc(aux, scope, &lower)
    }

    /// Strip leading and trailing ASCII whitespace into a new block.
    pub fn trim(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
    ) -> Result<BlockId, VmError> {
        let trimmed = Self::as_str(aux, id)?.trim().to_owned();
        Self::alloc(aux, scope, &trimmed)
    }

    /// Whether `id` starts with `prefix`'s content.
    pub fn starts_with(
        aux: &AuxMemoryManager,
        id: BlockId,
        prefix: BlockId,
    ) -> Result<bool, VmError> {
        Ok(Self::as_str(aux, id)?.starts_with(Self::as_str(aux, prefix)?))
    }

    /// Whether `id` ends with `suffix`'s content.
    pub fn ends_with(
        aux: &AuxMemoryManager,
        id: BlockId,
        suffix: BlockId,
    ) -> Result<bool, VmError> {
        Ok(Self::as_str(aux, id)?.ends_with(Self::as_str(aux, suffix)?))
    }

    /// Repeat a string `count` times into a new block.
    pub fn repeat(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        count: usize,
    ) -> Result<BlockId, VmError> {
        let repeated = Self::as_str(aux, id)?.repeat(count);
        Self::alloc(aux, scope, &repeated)
    }

    /// Replace every occurrence of `from` with `to` into a new block.
    pub fn replace_all(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        from: BlockId,
        to: BlockId,
    ) -> Result<BlockId, VmError> {
        let s = Self::as_str(aux, id)?.to_owned();
        let from = Self::as_str(aux, from)?.to_owned();
        let to = Self::as_str(aux, to)?.to_owned();
        let replaced = s.replace(&from, &to);
        Self::alloc(aux, scope, &replaced)
    }

    /// Left-justify within `width`, padding on the right with `pad`.
    pub fn justify_left(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        width: usize,
        pad: u8,
    ) -> Result<BlockId, VmError> {
        let s = Self::as_str(aux, id)?;
        let mut out = Vec::with_capacity(width.max(s.len()));
        out.extend_from_slice(s.as_bytes());
        while out.len() < width {
            out.push(pad);
        }
        let out = core::str::from_utf8(&out)
            .map_err(|_| VmError::new(SysExceptionCode::InvalidStringBlock))?;
        Self::alloc(aux, scope, out)
    }

    /// Right-justify within `width`, padding on the left with `pad`.
    pub fn justify_right(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        id: BlockId,
        width: usize,
        pad: u8,
    ) -> Result<BlockId, VmError> {
        let s = Self::as_str(aux, id)?;
        let pad_count = width.saturating_sub(s.len());
        let mut out = Vec::with_capacity(width.max(s.len()));
        out.resize(pad_count, pad);
        out.extend_from_slice(s.as_bytes());
        let out = core::str::from_utf8(&out)
            .map_err(|_| VmError::new(SysExceptionCode::InvalidStringBlock))?;
        Self::alloc(aux, scope, out)
    }

    /// SQL-`LIKE`-style glob match: `%` matches any run, `_` matches one
    /// character.
    pub fn like(aux: &AuxMemoryManager, id: BlockId, pattern: BlockId) -> Result<bool, VmError> {
        let text = Self::as_str(aux, id)?.as_bytes();
        let pat = Self::as_str(aux, pattern)?.as_bytes();
        Ok(like_match(text, pat))
    }

    /// Parse a string block as a signed integer.
    pub fn parse_int(aux: &AuxMemoryManager, id: BlockId) -> Result<i64, VmError> {
        Self::as_str(aux, id)?
            .trim()
            .parse::<i64>()
            .map_err(|_| VmError::new(SysExceptionCode::InvalidNumericConversion))
    }

    /// Parse a string block as a double-precision float.
    pub fn parse_float(aux: &AuxMemoryManager, id: BlockId) -> Result<f64, VmError> {
        Self::as_str(aux, id)?
            .trim()
            .parse::<f64>()
            .map_err(|_| VmError::new(SysExceptionCode::InvalidNumericConversion))
    }

    /// Format an integer into a new string block.
    pub fn format_int(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        n: i64,
    ) -> Result<BlockId, VmError> {
        let formatted = alloc::format!("{n}");
        Self::alloc(aux, scope, &formatted)
    }

    /// Format a float into a new string block.
    pub fn format_float(
        aux: &mut AuxMemoryManager,
        scope: ScopeId,
        f: f64,
    ) -> Result<BlockId, VmError> {
        let formatted = alloc::format!("{f}");
        Self::alloc(aux, scope, &formatted)
    }
}

fn like_match(text: &[u8], pat: &[u8]) -> bool {
    match pat.first() {
        None => text.is_empty(),
        Some(b'%') => like_match(text, &pat[1..]) || (!text.is_empty() && like_match(&text[1..], pat)),
        Some(b'_') => !text.is_empty() && like_match(&text[1..], &pat[1..]),
        Some(&c) => !text.is_empty() && text[0] == c && like_match(&text[1..], &pat[1..]),
    }
}
