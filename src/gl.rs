use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Compute backend a rectangle is rendered with. Resolved once per request
/// from plugin capabilities and context availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Plain CPU buffers.
    Cpu,
    /// GPU OpenGL context, texture-backed images.
    OpenGl,
    /// CPU OpenGL (OSMesa-style) context rendering into CPU buffers.
    OsMesa,
}

impl BackendKind {
    /// True for the two OpenGL flavours.
    pub fn is_gl(self) -> bool {
        matches!(self, BackendKind::OpenGl | BackendKind::OsMesa)
    }
}

/// Opaque handle to an OpenGL context owned by the host. The engine never
/// issues GL calls itself; it only routes the handle to plugin renders and
/// scopes attach/detach notifications around them.
#[derive(Debug)]
pub struct GlContext {
    id: u64,
    max_texture_size: i32,
    gpu: bool,
}

impl GlContext {
    /// Wraps a host context. `gpu` is false for OSMesa-style CPU contexts.
    pub fn new(id: u64, max_texture_size: i32, gpu: bool) -> Self {
        Self { id, max_texture_size, gpu }
    }

    /// Host-assigned context identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Largest texture edge the context supports.
    pub fn max_texture_size(&self) -> i32 {
        self.max_texture_size
    }

    /// True when the context runs on the GPU.
    pub fn is_gpu(&self) -> bool {
        self.gpu
    }
}

/// Host hook handing OpenGL contexts to a render tree. Fetched once at tree
/// creation; every request in the tree then shares the same contexts, which
/// matters for accumulating paint strokes.
pub trait GpuContextProvider: Send + Sync {
    /// A GPU context, or `None` when GPU rendering is unavailable.
    fn gpu_context(&self) -> Option<Arc<GlContext>>;

    /// A CPU (OSMesa-style) GL context, or `None` when unavailable.
    fn cpu_gl_context(&self) -> Option<Arc<GlContext>>;
}
