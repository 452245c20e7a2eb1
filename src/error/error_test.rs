// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;

#[test]
fn error_without_params_displays_name() {
    let e = VmError::new(SysExceptionCode::DivideByZero);
    assert_eq!(e.params().len(), 0);
    assert_eq!(format!("{e}"), "DivideByZero");
}

#[test]
fn error_with_params_displays_them_in_order() {
    let e = VmError::with_params(SysExceptionCode::ArrayIndexingOutOfBounds, &["3", "10"]);
    assert_eq!(e.params().len(), 2);
    assert_eq!(format!("{e}"), "ArrayIndexingOutOfBounds 3 10");
}

#[test]
fn param_str_truncates_long_input() {
    let long = "x".repeat(MAX_PARAM_LEN + 10);
    let p = ParamStr::new(&long);
    assert_eq!(p.as_str().len(), MAX_PARAM_LEN);
}

#[test]
fn vm_failure_converts_from_both_kinds() {
    let recoverable: VmFailure = VmError::new(SysExceptionCode::StackOverflow).into();
    let fatal: VmFailure = FatalError::PoolExhausted.into();
    assert!(matches!(recoverable, VmFailure::Recoverable(_)));
    assert!(matches!(fatal, VmFailure::Fatal(_)));
}
