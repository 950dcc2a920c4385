//! Tests for the pipeline executor
//!
//! Organized by feature area

mod executor_tests;
mod helpers;
