//! Partial symbol tables for on-demand debug information indexing.
//!
//! A debugger that parsed every byte of debug information up front would
//! spend most of its startup on files the user never asks about. This crate
//! implements the alternative: a cheap first pass over each compilation
//! unit records a *partial symbol table* (psymtab) — the externally visible
//! names, the unit's text address range, and its inter-unit dependencies —
//! and full reconstruction is deferred until a query actually needs a unit.
//!
//! The crate is format-agnostic. Format parsers (see `psymtab-stabs` and
//! `psymtab-mdebug`) drive a [`PsymtabBuilder`] with symbol events and
//! install the results into a per-object [`PsymtabStorage`]. Queries go
//! through [`PsymbolFunctions`], which answers from the partial tables
//! where it can and triggers expansion through a reader-supplied
//! [`Expander`] where it cannot.
//!
//! Partial symbols themselves are deduplicated through a content-addressed
//! [`PsymbolBcache`]: many units referencing the same external name share
//! one allocation.

#![warn(missing_docs)]

mod base;
mod bcache;
mod builder;
mod complaints;
mod dump;
mod error;
mod expand;
mod minsyms;
mod objfile;
mod psymtab;
mod quick;
mod storage;

pub use base::*;
pub use bcache::*;
pub use builder::*;
pub use complaints::*;
pub use dump::*;
pub use error::*;
pub use expand::*;
pub use minsyms::*;
pub use objfile::*;
pub use psymtab::*;
pub use quick::*;
pub use storage::*;
