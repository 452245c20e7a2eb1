// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;

#[test]
fn locl_var_resolves_relative_to_base() {
    let raw = RawAddress {
        mode: AddressMode::LoclVar,
        offset: 8,
    };
    let resolved = resolve(raw, 3, Addr::new(100), |_| Ref::Null, |_| Ref::Null);
    assert_eq!(
        resolved.reference,
        Ref::Stack {
            scope_id: 3,
            offset: Addr::new(108)
        }
    );
}

#[test]
fn glob_var_resolves_to_absolute_offset() {
    let raw = RawAddress {
        mode: AddressMode::GlobVar,
        offset: 40,
    };
    let resolved = resolve(raw, 0, Addr::new(100), |_| Ref::Null, |_| Ref::Null);
    assert_eq!(resolved.reference, Ref::Global(Addr::new(40)));
}

#[test]
fn locl_ind_dereferences_through_the_stack_reader() {
    let raw = RawAddress {
        mode: AddressMode::LoclInd,
        offset: 4,
    };
    let target = Ref::Global(Addr::new(77));
    let resolved = resolve(raw, 0, Addr::zero(), |_| target, |_| Ref::Null);
    assert_eq!(resolved.reference, target);
}

#[test]
fn decoder_caches_a_resolution_and_reuses_it() {
    let mut decoder = Decoder::new();
    let raw = RawAddress {
        mode: AddressMode::LoclInd,
        offset: 0,
    };
    let calls = core::cell::Cell::new(0);
    let make = || {
        calls.set(calls.get() + 1);
        Ref::Null
    };
    let _ = decoder.resolve_cached(5, 0, raw, 0, Addr::zero(), |_| make(), |_| make());
    assert!(decoder.cached(5, 0).is_some());
    assert_eq!(calls.get(), 1);
    let _ = decoder.resolve_cached(5, 0, raw, 0, Addr::zero(), |_| make(), |_| make());
    assert_eq!(calls.get(), 1);
}

#[test]
fn invalidate_frame_relative_drops_only_locl_entries() {
    let mut decoder = Decoder::new();
    let locl = RawAddress {
        mode: AddressMode::LoclVar,
        offset: 0,
    };
    let glob = RawAddress {
        mode: AddressMode::GlobVar,
        offset: 0,
    };
    let _ = decoder.resolve_cached(0, 0, locl, 0, Addr::zero(), |_| Ref::Null, |_| Ref::Null);
    let _ = decoder.resolve_cached(1, 0, glob, 0, Addr::zero(), |_| Ref::Null, |_| Ref::Null);
    decoder.invalidate_frame_relative();
    assert!(decoder.cached(0, 0).is_none());
    assert!(decoder.cached(1, 0).is_some());
}

#[test]
fn clear_drops_every_cached_entry() {
    let mut decoder = Decoder::new();
    let raw = RawAddress {
        mode: AddressMode::GlobVar,
        offset: 0,
    };
    let _ = decoder.resolve_cached(0, 0, raw, 0, Addr::zero(), |_| Ref::Null, |_| Ref::Null);
    decoder.clear();
    assert!(decoder.cached(0, 0).is_none());
}
