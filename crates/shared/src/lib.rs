#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Kennel Desk shared infrastructure
//!
//! Database pool construction, embedded migrations and money helpers used by
//! both the API server and the background worker.

pub mod db;
pub mod money;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use money::{format_cents, line_total_cents};
