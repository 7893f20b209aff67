//! Unit tests for the recovery crate

pub mod rollback_tests;
