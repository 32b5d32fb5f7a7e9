//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - invalid snapshot, policy or request
pub const VALIDATION_ERROR: i32 = 2;

/// Drift found while `--exit-code` was requested
pub const DRIFT_DETECTED: i32 = 3;

/// Reconciliation batch failed or had failing items
pub const RECONCILE_FAILED: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// A critical conflict needs a human decision
pub const MANUAL_REVIEW: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
