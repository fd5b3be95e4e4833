//! Shared helpers.

pub mod parallel;
