//! Tests for the cairn-engine crate.

mod helpers;

mod extraction;
