//! Tests for the component lifecycle manager

mod helpers;
