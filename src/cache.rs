//! Tiled images and the process-wide image cache concurrent renders share
//! tiles through.

/// Tile-grid images, CPU or GL-texture backed, plus the keyed cache.
pub mod image;
/// Per-tile render states and the claim/commit/rollback protocol.
pub mod tiles;
