#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can name the identifier type without
// depending on `ferroid` directly.
pub use ferroid;
