// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;
use crate::pool::PoolConfig;

fn fresh_aux() -> AuxMemoryManager {
    AuxMemoryManager::new(MemoryPool::new(PoolConfig {
        unit_size: 16,
        initial_units: 16,
        chunk_units: 16,
    }))
}

#[test]
fn alloc_returns_non_null_valid_handle() {
    let mut aux = fresh_aux();
    let id = aux.alloc(32, 1).unwrap();
    assert!(!id.is_null());
    assert!(aux.is_valid(id));
    assert_eq!(aux.len(id), 32);
}

#[test]
fn block_is_zombie_once_its_scope_returns() {
    let mut aux = fresh_aux();
    aux.enter_scope(1);
    let id = aux.alloc(16, 1).unwrap();
    assert!(!aux.is_zombie(id));
    aux.leave_scope();
    assert!(aux.is_zombie(id));
}

#[test]
fn block_outlives_its_scope_if_reparented_by_forced_alloc() {
    let mut aux = fresh_aux();
    let id = BlockId::new(5);
    aux.forced_alloc(id, 16).unwrap();
    assert!(!aux.is_zombie(id));
}

#[test]
fn sweep_zombies_reclaims_pool_space() {
    let mut aux = fresh_aux();
    aux.enter_scope(1);
    let id = aux.alloc(16, 1).unwrap();
    aux.leave_scope();
    assert!(aux.is_zombie(id));
    aux.sweep_zombies();
    assert!(!aux.is_valid(id));
}

#[test]
fn free_marks_handle_invalid() {
    let mut aux = fresh_aux();
    let id = aux.alloc(16, 0).unwrap();
    aux.free(id);
    assert!(!aux.is_valid(id));
}

#[test]
fn freed_slots_are_recycled() {
    let mut aux = fresh_aux();
    let a = aux.alloc(16, 0).unwrap();
    aux.free(a);
    let b = aux.alloc(16, 0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn realloc_updates_length_and_capacity() {
    let mut aux = fresh_aux();
    let id = aux.alloc(16, 0).unwrap();
    aux.realloc(id, 64).unwrap();
    assert_eq!(aux.len(id), 64);
    assert!(aux.capacity(id) >= 64);
}
