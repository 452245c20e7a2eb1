// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! An in-memory `HostIo` used by tests and the end-to-end scenarios (spec
//! §8): a fake filesystem keyed by path, a captured console transcript, and
//! a deterministic linear-congruential generator so `rand`/`seed_rand`
//! produce reproducible sequences without pulling in a dependency just for
//! test doubles.

use super::{ConsoleSeverity, FileHandle, HostIo, OpenMode};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A captured console line: its severity and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub severity: ConsoleSeverity,
    pub text: String,
}

/// Deterministic, allocation-light `HostIo` for tests.
pub struct MockHostIo {
    pub console: Vec<ConsoleLine>,
    files: BTreeMap<String, Vec<u8>>,
    open_files: BTreeMap<u32, (String, OpenMode, usize)>,
    next_handle: u32,
    clock: i64,
    rng_state: u64,
    pub exit_code: Option<i32>,
    pub delays: Vec<u64>,
}

impl MockHostIo {
    /// A mock with an empty filesystem and console, clock fixed at `clock`.
    #[must_use]
    pub fn new(clock: i64) -> Self {
        Self {
            console: Vec::new(),
            files: BTreeMap::new(),
            open_files: BTreeMap::new(),
            next_handle: 1,
            clock,
            rng_state: 0x2545_F491_4F6C_DD1D,
            exit_code: None,
            delays: Vec::new(),
        }
    }

    /// Seed the fake filesystem with a file's contents before running a
    /// program that expects to find it.
    pub fn seed_file(&mut self, path: &str, contents: &[u8]) {
        self.files.insert(path.to_string(), contents.to_vec());
    }

    /// Read back whatever a program wrote to `path`, if anything.
    #[must_use]
    pub fn file_contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

impl HostIo for MockHostIo {
    fn console_print(&mut self, severity: ConsoleSeverity, text: &str) {
        self.console.push(ConsoleLine {
            severity,
            text: text.to_string(),
        });
    }

    fn file_open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, String> {
        if mode == OpenMode::Read && !self.files.contains_key(path) {
            return Err(alloc::format!("no such file: {path}"));
        }
        if mode == OpenMode::Write {
            self.files.insert(path.to_string(), Vec::new());
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.open_files.insert(handle, (path.to_string(), mode, 0));
        Ok(FileHandle(handle))
    }

    fn file_close(&mut self, handle: FileHandle) {
        self.open_files.remove(&handle.0);
    }

    fn file_read_all(&mut self, handle: FileHandle) -> Result<Vec<u8>, String> {
        let (path, _, cursor) = self
            .open_files
            .get(&handle.0)
            .ok_or_else(|| "file not open".to_string())?;
        let contents = self
            .files
            .get(path)
            .ok_or_else(|| "file not open".to_string())?;
        Ok(contents[*cursor..].to_vec())
    }

    fn file_write_all(&mut self, handle: FileHandle, data: &[u8]) -> Result<(), String> {
        let (path, mode, _) = self
            .open_files
            .get(&handle.0)
            .ok_or_else(|| "file not open".to_string())?;
        if *mode == OpenMode::Read {
            return Err("file not opened for writing".to_string());
        }
        let entry = self.files.entry(path.clone()).or_default();
        entry.extend_from_slice(data);
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn now(&self) -> i64 {
        self.clock
    }

    fn delay_ms(&mut self, millis: u64) {
        self.delays.push(millis);
    }

    fn seed_rand(&mut self, seed: u64) {
        self.rng_state = seed;
    }

    fn rand(&mut self) -> f64 {
        // xorshift64*, picked only for reproducibility in tests.
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let scaled = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        (scaled as f64) / ((1u64 << 53) as f64)
    }

    fn exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }
}
