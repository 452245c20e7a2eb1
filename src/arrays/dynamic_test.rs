// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;
use crate::pool::{MemoryPool, PoolConfig};
use crate::strings::StringComputer;

fn fresh_aux() -> AuxMemoryManager {
    AuxMemoryManager::new(MemoryPool::new(PoolConfig {
        unit_size: 16,
        initial_units: 64,
        chunk_units: 64,
    }))
}

#[test]
fn alloc_records_shape() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let id = arrays.alloc(&mut aux, 0, 4, &[3, 2]).unwrap();
    assert_eq!(arrays.shape(&aux, id).unwrap(), alloc::vec![3, 2]);
}

#[test]
fn element_offset_matches_shared_formula() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let id = arrays.alloc(&mut aux, 0, 4, &[3, 2]).unwrap();
    assert_eq!(arrays.element_offset(&aux, id, &[1, 1]).unwrap(), 4 * 2 + 4);
}

#[test]
fn resize_1d_extends_without_reshuffling_survivors() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let id = arrays.alloc(&mut aux, 0, 4, &[2]).unwrap();
    let off0 = arrays.element_offset(&aux, id, &[0]).unwrap();
    aux.pool_mut()
        .arena_mut()
        .write(Addr::new(aux.offset(id) as u64 + off0), 99u32);
    arrays.resize(&mut aux, id, &[5]).unwrap();
    assert_eq!(arrays.shape(&aux, id).unwrap(), alloc::vec![5]);
    let off0 = arrays.element_offset(&aux, id, &[0]).unwrap();
    let value: u32 = aux.pool().arena().read(Addr::new(aux.offset(id) as u64 + off0));
    assert_eq!(value, 99);
}

#[test]
fn resize_2d_preserves_elements_at_same_indices() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let id = arrays.alloc(&mut aux, 0, 4, &[2, 2]).unwrap();
    let off = arrays.element_offset(&aux, id, &[1, 1]).unwrap();
    aux.pool_mut()
        .arena_mut()
        .write(Addr::new(aux.offset(id) as u64 + off), 7u32);
    arrays.resize(&mut aux, id, &[3, 3]).unwrap();
    let off = arrays.element_offset(&aux, id, &[1, 1]).unwrap();
    let value: u32 = aux.pool().arena().read(Addr::new(aux.offset(id) as u64 + off));
    assert_eq!(value, 7);
}

#[test]
fn join_and_split_round_trip() {
    let mut aux = fresh_aux();
    let arrays = DynamicArrayComputer::new();
    let a = StringComputer::alloc(&mut aux, 0, "foo").unwrap();
    let b = StringComputer::alloc(&mut aux, 0, "bar").unwrap();
    let joined = arrays.join_strings(&mut aux, 0, &[a, b], ",").unwrap();
    assert_eq!(StringComputer::as_str(&aux, joined).unwrap(), "foo,bar");

    let parts = arrays.split_string(&mut aux, 0, joined, ",").unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(StringComputer::as_str(&aux, parts[0]).unwrap(), "foo");
    assert_eq!(StringComputer::as_str(&aux, parts[1]).unwrap(), "bar");
}

/// Allocate a 2x3 int array, fill with 1..6, resize to 3x4, and check the
/// read-back values at the positions the scenario calls out.
#[test]
fn resize_2x3_to_3x4_matches_the_scenario_values() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let id = arrays.alloc(&mut aux, 0, 4, &[2, 3]).unwrap();
    let mut n = 1u32;
    for row in 0..2 {
        for col in 0..3 {
            let off = arrays.element_offset(&aux, id, &[row, col]).unwrap();
            aux.pool_mut().arena_mut().write(Addr::new(aux.offset(id) as u64 + off), n);
            n += 1;
        }
    }
    arrays.resize(&mut aux, id, &[3, 4]).unwrap();
    let read = |arrays: &DynamicArrayComputer, aux: &AuxMemoryManager, row: u32, col: u32| -> u32 {
        let off = arrays.element_offset(aux, id, &[row, col]).unwrap();
        aux.pool().arena().read(Addr::new(aux.offset(id) as u64 + off))
    };
    assert_eq!(read(&arrays, &aux, 0, 0), 1);
    assert_eq!(read(&arrays, &aux, 0, 2), 3);
    assert_eq!(read(&arrays, &aux, 1, 0), 4);
    assert_eq!(read(&arrays, &aux, 2, 3), 0);
}

#[test]
fn sta_must_be_opened_before_advancing() {
    let mut sta = StringArrayIterator::new();
    assert!(sta.advance_read().is_err());
    sta.open_read().unwrap();
    assert_eq!(sta.advance_read().unwrap(), 0);
    assert_eq!(sta.advance_read().unwrap(), 1);
}

#[test]
fn sta_rejects_double_open_and_double_close() {
    let mut sta = StringArrayIterator::new();
    sta.open_write().unwrap();
    assert!(sta.open_read().is_err());
    sta.close().unwrap();
    assert!(sta.close().is_err());
}
