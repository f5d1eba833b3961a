//! The node model: effects (plugin instances), graph nodes, planes and the
//! per-render clone that pins a node at one frame/view.

/// Render clones: one node pinned at one (time, view) inside one tree.
pub mod clone;
/// The [`Effect`](effect::Effect) trait and its action argument types.
pub mod effect;
/// Graph nodes, plugins and their render locks.
pub mod node;
/// Planes, frame times and views.
pub mod plane;
/// Memoized action results, keyed per frame/view/scale.
pub mod results;
