//! # Service Public Core
//!
//! Shared, I/O-free logic for the Service Public BJ aggregator: data
//! models, the per-provider catalog store with its derived indices, the
//! token/fuzzy search index, and the string helpers they share.
//!
//! This crate contains no tokio, reqwest, filesystem access, or other
//! runtime dependencies. Every mutation is a synchronous, non-suspending
//! step, which is what lets the async layers above treat a catalog update
//! as atomic with respect to concurrent readers.

pub mod catalog;
pub mod fuzzy;
pub mod models;
pub mod search;
pub mod text;
