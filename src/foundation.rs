//! Shared building blocks: configuration, the error taxonomy, geometry
//! types and the hash used for request and cache keys.

/// Engine tuning knobs and their defaults.
pub mod config;
/// The error taxonomy and settle statuses.
pub mod error;
/// Canonical and pixel geometry.
pub mod geometry;
pub(crate) mod hash;
