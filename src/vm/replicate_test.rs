// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;
use crate::pool::{MemoryPool, PoolConfig};

fn fresh_aux() -> AuxMemoryManager {
    AuxMemoryManager::new(MemoryPool::new(PoolConfig {
        unit_size: 16,
        initial_units: 64,
        chunk_units: 64,
    }))
}

#[test]
fn degenerate_rule_stack_copies_a_single_leaf() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let source = StringComputer::alloc(&mut aux, 0, "hello").unwrap();

    let engine = ReplicationEngine::new();
    let mut dest = BlockId::NULL;
    engine
        .replicate(
            &mut aux,
            &mut arrays,
            0,
            0,
            LeafKind::String,
            |_| source,
            |_, copy| dest = copy,
        )
        .unwrap();

    assert_ne!(dest, source);
    assert_eq!(StringComputer::as_str(&aux, dest).unwrap(), "hello");
}

#[test]
fn fixed_array_rule_visits_every_element() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let sources: Vec<BlockId> = (0..4)
        .map(|i| StringComputer::alloc(&mut aux, 0, &alloc::format!("s{i}")).unwrap())
        .collect();

    let geometry = ArrayGeometry::new(8, &[2, 2]).unwrap();
    let mut engine = ReplicationEngine::new();
    engine.push_fixed_array(0, geometry);
    assert_eq!(engine.depth(), 1);

    let mut copies = alloc::vec![BlockId::NULL; 4];
    engine
        .replicate(
            &mut aux,
            &mut arrays,
            0,
            0,
            LeafKind::String,
            |offset| sources[(offset / 8) as usize],
            |offset, copy| copies[(offset / 8) as usize] = copy,
        )
        .unwrap();

    for (i, &copy) in copies.iter().enumerate() {
        assert_eq!(
            StringComputer::as_str(&aux, copy).unwrap(),
            alloc::format!("s{i}")
        );
    }
}

#[test]
fn initialize_fills_every_leaf_with_an_empty_string() {
    let mut aux = fresh_aux();
    let mut arrays = DynamicArrayComputer::new();
    let geometry = ArrayGeometry::new(8, &[3]).unwrap();
    let mut engine = ReplicationEngine::new();
    engine.push_fixed_array(0, geometry);

    let mut created = Vec::new();
    engine
        .initialize(&mut aux, &mut arrays, 0, 0, LeafKind::String, |_, id| {
            created.push(id);
        })
        .unwrap();

    assert_eq!(created.len(), 3);
    for id in created {
        assert_eq!(StringComputer::as_str(&aux, id).unwrap(), "");
    }
}

#[test]
fn clear_drops_the_rule_stack() {
    let mut engine = ReplicationEngine::new();
    engine.push_dynamic_array(0);
    assert_eq!(engine.depth(), 1);
    engine.clear();
    assert_eq!(engine.depth(), 0);
}
