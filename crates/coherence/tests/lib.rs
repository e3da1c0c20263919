//! Integration test suite for the coherence engine.
//!
//! `common` holds the platform harness shared by every scenario; the
//! `scenarios` modules replay the end-to-end protocol episodes (refill,
//! update, LL/SC, cleanup races, broadcast, page-table maintenance, I/O
//! ordering) and check the externally observable outcome of each.

pub mod common;
pub mod scenarios;
