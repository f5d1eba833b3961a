//! Execution: the worker pool, the per-tree launch loop and the per-node
//! render pipeline that fills and commits tiles.

pub(crate) mod node_render;
/// The fixed-slot worker pool with slot release/reserve.
pub mod pool;
/// The per-render tree context and its launch loop.
pub mod tree;
