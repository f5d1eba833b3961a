use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{RenderError, RenderResult};
use crate::foundation::geometry::RectI;
use crate::gl::BackendKind;
use crate::node::effect::GlSupport;
use crate::graph::exec::ExecutionData;
use crate::graph::request::FrameViewRequest;
use crate::render::tree::TreeRender;

/// How a request's output image interacts with the tile cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Not cache-backed at all.
    None,
    /// Read existing tiles, write the ones we render.
    ReadWrite,
    /// Ignore existing tiles but publish what we render.
    WriteOnly,
}

/// Decides the cache policy for a request.
///
/// Writers never cache (their output is the encoded file). The tree root
/// and host-requested extra results always cache so the host can fetch
/// them. Everything else asks the effect's heuristic, and a still-armed
/// one-shot cache by-pass downgrades a caching answer to write-only so the
/// first pass re-renders but still publishes.
pub fn resolve_cache_policy(
    tree: &TreeRender,
    _exec: &Arc<ExecutionData>,
    request: &Arc<FrameViewRequest>,
) -> CachePolicy {
    let node = request.node();
    let effect = node.effect();
    if effect.is_writer() {
        return CachePolicy::None;
    }
    let wants_cache = if tree.is_root_or_extra(node.id()) {
        true
    } else {
        effect.should_cache_output(request.total_listener_count(), tree.is_playback())
    };
    if !wants_cache {
        return CachePolicy::None;
    }
    if request.check_if_bypass_cache_enabled_and_turn_off() {
        CachePolicy::WriteOnly
    } else {
        CachePolicy::ReadWrite
    }
}

/// True when the request's pixel ROI cannot fit a texture of edge
/// `max_edge`. A request with no ROI yet is assumed to fit.
fn roi_exceeds_texture(request: &Arc<FrameViewRequest>, max_edge: i32) -> bool {
    match request.roi() {
        Some(roi) => {
            let px = RectI::from_canonical_enclosing(&roi, request.combined_scale());
            px.width() > max_edge || px.height() > max_edge
        }
        None => false,
    }
}

/// Resolves the backend a request renders with, from the plugin's declared
/// GL support, the contexts fetched at tree creation and their texture
/// limits.
///
/// GPU textures cannot live in the tile cache, so a plugin that merely
/// supports OpenGL only gets the GPU when nothing wants the result cached
/// or reused; a plugin that requires it takes the GPU whenever the
/// rectangle fits, with the cache policy downgraded to none. OSMesa-style
/// CPU contexts render into cacheable buffers and serve as the fallback
/// for both flavours.
pub fn resolve_render_backend(
    tree: &TreeRender,
    request: &Arc<FrameViewRequest>,
    cache_policy: &mut CachePolicy,
) -> RenderResult<BackendKind> {
    let node = request.node();
    let support = node.effect().gl_support();
    if support == GlSupport::Unsupported {
        return Ok(BackendKind::Cpu);
    }
    if let Some(ctx) = tree.gpu_context() {
        let fits = !roi_exceeds_texture(request, ctx.max_texture_size());
        let wants_gpu = match support {
            GlSupport::Required => fits,
            _ => {
                fits && *cache_policy == CachePolicy::None
                    && request.total_listener_count() <= 1
            }
        };
        if wants_gpu {
            *cache_policy = CachePolicy::None;
            return Ok(BackendKind::OpenGl);
        }
    }
    if let Some(ctx) = tree.cpu_gl_context()
        && !roi_exceeds_texture(request, ctx.max_texture_size())
    {
        return Ok(BackendKind::OsMesa);
    }
    if support == GlSupport::Required {
        return Err(RenderError::failed(format!(
            "node {} requires an OpenGL context and none is usable",
            node.label()
        )));
    }
    Ok(BackendKind::Cpu)
}

#[cfg(test)]
#[path = "../../tests/unit/graph/policy.rs"]
mod tests;
