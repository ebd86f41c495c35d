//! Common test utilities for vectorq end-to-end tests

#[allow(dead_code)]
pub mod converter;
#[allow(dead_code)]
pub mod fixtures;

pub use converter::*;
pub use fixtures::*;
