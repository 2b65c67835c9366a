//! Integration tests for `applycore`
//!
//! The tests in `tests/` drive whole applies, from serialized execution
//! graph to new state snapshot, against the in-memory provider and
//! evaluator from `applycore::testing`. This crate holds what they share:
//! graph shapes for common plans and an evaluator whose answers depend on
//! results of the apply itself.

pub mod oracles;
pub mod scenarios;
