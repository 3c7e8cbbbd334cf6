//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (currently `core-sources`). Host applications can depend
//! on `mpc-workspace` and enable `desktop-shims` to get the reqwest-backed
//! HTTP client and per-user cache directories without wiring each crate.

#[cfg(feature = "desktop-shims")]
pub use core_sources as sources;
