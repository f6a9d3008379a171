//! Common types and helpers used by the `psymtab` crates.
//!
//! This crate hosts the leaf vocabulary that every other crate in the suite
//! shares: source [`Language`] tags with filename-based deduction,
//! [`UnrelocatedAddr`] (an address as emitted by the compiler, before any
//! section offset is applied), the per-object [`NameInterner`], and the
//! ordered search-name comparison used to keep global partial symbols
//! sorted.

#![warn(missing_docs)]

mod intern;
mod name;
mod types;

pub use intern::*;
pub use name::*;
pub use types::*;
