//! Cairn is a render-request scheduling engine for node-based image
//! compositing.
//!
//! A host builds a graph of [`Node`]s (each wrapping an [`Effect`]
//! implementation) and launches a [`TreeRender`] for one frame and view.
//! The engine then:
//!
//! 1. **Builds**: walks the graph from the requested node, resolving
//!    regions of definition, identity redirections, needed frames and
//!    plane routing into a deduplicated graph of [`FrameViewRequest`]s.
//! 2. **Executes**: drains dependency-free requests through a fixed-slot
//!    [`WorkerPool`], more-listened-to requests first.
//! 3. **Renders**: per request, claims unrendered cache tiles, fans
//!    rectangles across frame threads when the plugin allows, and commits
//!    tiles so concurrent renders of the same image share the work.
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Deduplication first**: two consumers of the same node output at the
//!   same coordinate share one request and one render.
//! - **Cooperative cancellation**: aborts are sticky flags observed at
//!   checkpoints; claimed tiles roll back so other renders can take over.
//! - **No deadlocks by construction**: a worker that blocks on other work
//!   hands its pool slot back for the duration.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod foundation;
/// OpenGL context plumbing between the host and plugin renders.
pub mod gl;
pub mod graph;
pub mod node;
pub mod render;


pub use cache::image::{Image, ImageKey, TileCache};
pub use cache::tiles::{TileState, TileStateMap};
pub use foundation::config::{RenderConfig, DEFAULT_TILE_SIZE};
pub use foundation::error::{RenderError, RenderResult, Status};
pub use foundation::geometry::{Mat3, Point, Rect, RectI, RenderScale};
pub use gl::{BackendKind, GlContext, GpuContextProvider};
pub use graph::exec::ExecutionData;
pub use graph::policy::CachePolicy;
pub use graph::request::{FrameViewRequest, RequestId, RequestStatus};
pub use node::effect::{
    Distortion, DistortionStack, DistortionTransform, Effect, FrameRangeD, FramesNeeded,
    GlSupport, IdentityInput, IdentityResult, InputImage, LayersInfo, PassThroughPlanes,
    RenderActionArgs, RenderPlane, SequenceRenderArgs, SequentialPreference, ThreadSafety,
};
pub use node::node::{Node, NodeId, Plugin};
pub use node::plane::{PlaneDesc, TimeValue, ViewIdx};
pub use render::pool::WorkerPool;
pub use render::tree::{
    PaintStroke, RenderStatsSnapshot, TreeRender, TreeRenderArgs,
};
