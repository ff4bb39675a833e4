//! Shared fixtures for unit tests.

mod factories;

pub use cil::*;
pub use factories::*;
