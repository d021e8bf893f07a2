//! Shared test utilities for the compute cost crates
//!
//! - `fixtures`: JSON payloads shaped like the retail catalog and the
//!   cost-management query (always available)
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//!
//! # Redis Testing
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Container tests need Docker, so mark them `#[ignore = "requires Docker"]`.

pub mod fixtures;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;
