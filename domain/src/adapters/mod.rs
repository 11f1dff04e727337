//! Test-only adapters that live inside the domain crate for convenience.
//!
//! These are intended for unit testing, local demos and the `memory` storage
//! provider of the server. Real adapters (SQLite, DynamoDB, filesystem blobs)
//! live in separate crates.

pub mod memory_repo;
pub mod memory_session;
