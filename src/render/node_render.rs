//! Per-node execution: everything that happens between a request leaving
//! the ready queue and its image being published.
//!
//! The flow per request: claim unrendered tiles, split them into identity
//! copies and plugin rectangles, take the locks the plugin's declared
//! thread safety requires, fan plugin rectangles across host frame threads
//! when allowed, then post-process (unprocessed channels, mask/mix, NaN
//! repair) and commit the tiles. Concurrent renders of the same image
//! coordinate purely through the tile states.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::cache::image::{Image, ImageKey};
use crate::foundation::error::{status_of, RenderError, RenderResult, Status};
use crate::foundation::geometry::{clip_infinite_rect, rect_is_infinite, Rect, RectI};
use crate::gl::{BackendKind, GlContext};
use crate::graph::build;
use crate::graph::exec::ExecutionData;
use crate::graph::policy::CachePolicy;
use crate::graph::request::{FrameViewRequest, RequestStatus};
use crate::node::effect::{
    IdentityInput, InputImage, RenderActionArgs, RenderPlane, SequenceRenderArgs,
    SequentialPreference, ThreadSafety,
};
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};
use crate::render::pool::{PoolSlotRelease, WorkerPool};
use crate::render::tree::TreeRender;

/// A rectangle scheduled for one plugin render call or one identity copy.
#[derive(Clone, Debug)]
struct RectToRender {
    rect: RectI,
    identity: Option<IdentitySource>,
}

#[derive(Clone, Copy, Debug)]
struct IdentitySource {
    input: usize,
    time: TimeValue,
    view: ViewIdx,
}

/// Worker entry point: render one request, settle it, propagate completion
/// to its listeners and wake the launch loop.
pub(crate) fn run_task(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    req: &Arc<FrameViewRequest>,
) {
    let result = launch_node_render(tree, exec, req);
    let status = status_of(&result);
    trace!(request = %req.id(), ?status, "task settled");

    // Dependency images pinned for this render are no longer needed.
    req.clear_resolved_dependencies(exec.id());
    tree.register_extra_result(req);

    for listener_id in req.listener_ids(exec.id()) {
        let Some(listener) = exec.get(listener_id) else { continue };
        let remaining = listener.mark_dependency_as_rendered(exec.id(), req);
        if remaining == 0 {
            exec.make_ready(&listener);
        }
    }
    exec.task_done(status);
}

/// Renders one request under its exclusive render lock. Settled requests
/// short-circuit; the terminal status is recorded exactly once.
fn launch_node_render(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    req: &Arc<FrameViewRequest>,
) -> RenderResult<()> {
    let _render_guard = req.render_lock().lock().expect("request render lock");

    match req.status() {
        RequestStatus::Rendered | RequestStatus::PassThrough => {
            return match RenderError::from_status(req.terminal_status()) {
                None => Ok(()),
                Some(e) => Err(e),
            };
        }
        RequestStatus::Pending => {
            debug_assert!(false, "request scheduled while already pending");
            return Err(RenderError::failed("request scheduled twice"));
        }
        RequestStatus::NotRendered => {}
    }
    req.notify_render_started();

    let result = render_request(tree, exec, req);
    let mut status = status_of(&result);
    // A failure observed after an abort is reported as the abort; the
    // plugin was likely cancelled mid-call.
    if status == Status::Failed && tree.is_render_aborted() {
        status = Status::Aborted;
    }
    req.notify_render_finished(status);
    match RenderError::from_status(status) {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// The per-request render loop: allocate/fetch the image, drain unrendered
/// tiles, wait out concurrent renders of the same image, downscale when
/// the plugin rendered at full scale on our behalf.
fn render_request(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    req: &Arc<FrameViewRequest>,
) -> RenderResult<()> {
    if tree.is_render_aborted() {
        return Err(RenderError::Aborted);
    }
    let node = req.node();
    let effect = node.effect();
    let tile_size = tree.cache().tile_size();

    let requested_mip = req.mip_level();
    let mapped_mip = if effect.supports_render_scale() { requested_mip } else { 0 };
    let mapped_scale = req.proxy_scale().combined_with_mip(mapped_mip);

    let roi_canonical = req
        .roi()
        .ok_or_else(|| RenderError::failed("request has no region of interest"))?;
    let rod_rect = req
        .rod_results()
        .and_then(|r| r.rod)
        .ok_or_else(|| RenderError::failed("request has no region of definition"))?;
    let rod_clipped = if rect_is_infinite(&rod_rect) {
        clip_infinite_rect(&rod_rect, &roi_canonical)
    } else {
        rod_rect
    };
    let rod_px = RectI::from_canonical_enclosing(&rod_clipped, mapped_scale)
        .round_to_tile_grid(tile_size);
    let roi_px = RectI::from_canonical_enclosing(&roi_canonical, mapped_scale);
    let Some(roi_px) = roi_px.round_to_tile_grid(tile_size).intersect(&rod_px) else {
        return Ok(());
    };
    let roi_px = if effect.supports_tiles() { roi_px } else { rod_px };

    let backend = req.backend().unwrap_or(BackendKind::Cpu);
    let cache_policy = req.cache_policy();
    let token = req.id().as_u64();

    let planes = resolve_output_planes(tree, req, &rod_px, backend, cache_policy, mapped_mip)?;
    let image = planes[0].image.clone();

    // Write-only: re-render everything in the ROI but still publish it.
    if cache_policy == CachePolicy::WriteOnly {
        image.invalidate_rect(&roi_px);
    }

    loop {
        if tree.is_render_aborted() {
            image.mark_aborted(token);
            return Err(RenderError::Aborted);
        }
        let rects = check_rest_to_render(tree, req, &image, &roi_px, token, mapped_mip)?;
        if rects.is_empty() {
            if image.has_foreign_pending(&roi_px, token) {
                // Another render owns tiles we need; hand our pool slot
                // back while we sit out.
                let _slot = PoolSlotRelease::new(tree.pool());
                let all_rendered = image.wait_for_pending_tiles(&roi_px, token);
                if !all_rendered {
                    // The other render rolled back; claim the leftovers.
                    continue;
                }
            }
            break;
        }
        debug!(
            request = %req.id(),
            rects = rects.len(),
            "rendering rectangles"
        );
        match render_for_safety_and_backend(
            tree, exec, req, &planes, &rects, mapped_mip, backend, token,
        ) {
            Ok(()) => {}
            Err(e) => {
                for p in &planes {
                    p.image.mark_aborted(token);
                }
                if matches!(e, RenderError::OutOfMemory)
                    && backend == BackendKind::OpenGl
                    && req.take_fallback_once()
                {
                    warn!(
                        node = node.label(),
                        "GPU render ran out of memory; retrying on the CPU"
                    );
                    tree.stats_raw().oom_fallbacks.fetch_add(1, Ordering::Relaxed);
                    return cpu_fallback(tree, req, &roi_canonical);
                }
                return Err(e);
            }
        }
    }

    if mapped_mip != requested_mip {
        req.set_full_scale_image(image.clone());
        let target = downscale_to_requested(tree, req, &image, &rod_clipped, &roi_canonical)?;
        req.set_image(target);
    } else {
        req.set_image(image);
    }
    Ok(())
}

/// Output plane buffers for this render: the requested plane first, plus
/// every other produced plane when the plugin renders them all at once.
fn resolve_output_planes(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    rod_px: &RectI,
    backend: BackendKind,
    cache_policy: CachePolicy,
    mapped_mip: u32,
) -> RenderResult<Vec<RenderPlane>> {
    let node = req.node();
    let mut plane_descs = vec![req.plane().clone()];
    if node.effect().renders_all_planes_at_once() {
        if let Some(layers) = req.layers_results() {
            for p in &layers.layers.produced {
                if p != req.plane() {
                    plane_descs.push(p.clone());
                }
            }
        }
    }

    let mut planes = Vec::with_capacity(plane_descs.len());
    for (idx, desc) in plane_descs.iter().enumerate() {
        let image = ensure_plane_image(
            tree,
            req,
            desc,
            rod_px,
            backend,
            cache_policy,
            mapped_mip,
            idx == 0,
        )?;
        planes.push(RenderPlane { plane: desc.clone(), image });
    }
    Ok(planes)
}

#[allow(clippy::too_many_arguments)]
fn ensure_plane_image(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    plane: &PlaneDesc,
    rod_px: &RectI,
    backend: BackendKind,
    cache_policy: CachePolicy,
    mapped_mip: u32,
    primary: bool,
) -> RenderResult<Image> {
    let node = req.node();
    let tile_size = tree.cache().tile_size();

    // An image kept from an earlier pass (or the accumulation buffer) is
    // reused when its storage and bounds still fit.
    if primary {
        if let Some(existing) = req.image() {
            let storage_ok = match backend {
                BackendKind::Cpu | BackendKind::OsMesa => existing.is_cpu(),
                BackendKind::OpenGl => !existing.is_cpu(),
            };
            if storage_ok && existing.bounds().contains_rect(rod_px) {
                return Ok(existing);
            }
        }
    }

    let image = match backend {
        BackendKind::OpenGl => {
            let ctx = tree
                .gpu_context()
                .ok_or_else(|| RenderError::failed("GPU backend without a GL context"))?;
            Image::new_gl(rod_px, plane.clone(), tile_size, req.id().as_u64(), ctx.id())
        }
        BackendKind::Cpu | BackendKind::OsMesa => {
            if cache_policy == CachePolicy::None {
                Image::new_cpu(rod_px, plane.clone(), tile_size)
            } else {
                let key = ImageKey {
                    node_hash: node.frame_view_hash(req.time(), req.view()),
                    plane: plane.clone(),
                    mip_level: mapped_mip,
                    proxy_bits: req.proxy_scale().to_hash_bits(),
                    draft: tree.is_draft(),
                };
                tree.cache().fetch_or_create(&key, rod_px, plane)
            }
        }
    };
    if primary && node.effect().accumulates() {
        node.set_accumulation_image(image.clone());
    }
    Ok(image)
}

/// Claims what is left to render inside `roi_px` and shapes it into
/// rectangles: identity tiles become tagged copies, the rest reduce to
/// minimal rects, and a lone big rect splits across frame threads when
/// the plugin allows it.
fn check_rest_to_render(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    image: &Image,
    roi_px: &RectI,
    token: u64,
    mapped_mip: u32,
) -> RenderResult<Vec<RectToRender>> {
    let node = req.node();
    let effect = node.effect();
    let mapped_scale = req.proxy_scale().combined_with_mip(mapped_mip);

    let (claimed, _foreign) = image.claim_unrendered(roi_px, token);
    if claimed.is_empty() {
        return Ok(Vec::new());
    }
    if !effect.supports_tiles() {
        return Ok(vec![RectToRender { rect: *roi_px, identity: None }]);
    }

    // Tiles outside the intersection of the input RoDs are usually an
    // identity (the plugin only composes where inputs overlap); probing
    // them per-tile turns whole regions into plain copies.
    let inputs_intersection = connected_inputs_intersection(tree, req, mapped_mip)?;
    let probe_identity = inputs_intersection.is_some() && node.input_count() >= 2;

    let mut identity_rects = Vec::new();
    let mut plain_tiles = Vec::new();
    for tile in claimed {
        let probe = match (probe_identity, &inputs_intersection) {
            (true, Some(ix)) => !ix.contains_rect(&tile),
            _ => false,
        };
        if probe {
            let id = effect.is_identity(req.time(), mapped_scale, tile, req.view())?;
            // Same broken-plugin rule as the build-time identity pass.
            if id.input == IdentityInput::SelfAtTimeView
                && id.time.quantized() == req.time().quantized()
                && id.view == req.view()
            {
                let msg = format!(
                    "node {} declared itself identity on itself at the same frame and view",
                    node.label()
                );
                node.set_persistent_message(&msg);
                return Err(RenderError::failed(msg));
            }
            if let IdentityInput::Input(i) = id.input {
                identity_rects.push(RectToRender {
                    rect: tile,
                    identity: Some(IdentitySource { input: i, time: id.time, view: id.view }),
                });
                continue;
            }
        }
        plain_tiles.push(tile);
    }

    let mut rects: Vec<RectToRender> = image
        .reduce_tile_rects(&plain_tiles)
        .into_iter()
        .map(|rect| RectToRender { rect, identity: None })
        .collect();

    // Host frame threading: one big rectangle splits into bands sized by
    // the area heuristic; the pool clamps real parallelism.
    if rects.len() == 1
        && identity_rects.is_empty()
        && effect.thread_safety() == ThreadSafety::FullySafeFrame
        && !matches!(req.backend(), Some(b) if b.is_gl())
    {
        let rect = rects[0].rect;
        let min_area = tree.config().frame_threading_min_area.max(1);
        let wanted = (rect.area() / min_area).max(1) as usize;
        let bands = wanted.min(tree.pool().max_slots());
        if bands > 1 {
            rects = rect
                .split_rows(bands)
                .into_iter()
                .map(|rect| RectToRender { rect, identity: None })
                .collect();
        }
    }

    rects.extend(identity_rects);
    Ok(rects)
}

/// Pixel intersection of the connected inputs' RoDs at the mapped scale,
/// `None` when no input is connected.
fn connected_inputs_intersection(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    mapped_mip: u32,
) -> RenderResult<Option<RectI>> {
    let node = req.node();
    let mapped_scale = req.proxy_scale().combined_with_mip(mapped_mip);
    let mut acc: Option<RectI> = None;
    for i in 0..node.input_count() {
        let Some(input) = node.input(i) else { continue };
        let clone = tree.clone_for(&input, req.time(), req.view());
        let rod = build::resolved_rod(tree, &clone, mapped_mip, req.proxy_scale())?;
        let Some(r) = rod.rod else { continue };
        if rect_is_infinite(&r) {
            continue;
        }
        let px = RectI::from_canonical_enclosing(&r, mapped_scale);
        acc = Some(match acc {
            Some(a) => match a.intersect(&px) {
                Some(x) => x,
                None => RectI::ZERO,
            },
            None => px,
        });
    }
    Ok(acc)
}

fn lock_with_slot_release<'a>(
    m: &'a Mutex<()>,
    pool: &Arc<WorkerPool>,
) -> MutexGuard<'a, ()> {
    if let Ok(g) = m.try_lock() {
        return g;
    }
    // Blocking on another render's serial lock; let our slot go so that
    // render can actually make progress.
    let _slot = PoolSlotRelease::new(pool);
    m.lock().expect("render serial lock")
}

/// Everything a rectangle job needs, shared across frame threads.
struct FunctorCtx {
    tree: Arc<TreeRender>,
    req: Arc<FrameViewRequest>,
    planes: Vec<RenderPlane>,
    input_images: Vec<InputImage>,
    identity_sources: HashMap<(usize, i64, u32), Image>,
    backend: BackendKind,
    gl_ctx: Option<Arc<GlContext>>,
    mapped_mip: u32,
    token: u64,
}

/// Takes the declared thread-safety locks and the GL attach scope, then
/// hands the rectangles to the frame-threading fan-out.
#[allow(clippy::too_many_arguments)]
fn render_for_safety_and_backend(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    req: &Arc<FrameViewRequest>,
    planes: &[RenderPlane],
    rects: &[RectToRender],
    mapped_mip: u32,
    backend: BackendKind,
    token: u64,
) -> RenderResult<()> {
    let node = req.node();
    let effect = node.effect();

    let _safety_guard = match effect.thread_safety() {
        ThreadSafety::InstanceSafe => Some(lock_with_slot_release(node.instance_lock(), tree.pool())),
        ThreadSafety::Unsafe => {
            Some(lock_with_slot_release(node.plugin().render_lock(), tree.pool()))
        }
        ThreadSafety::FullySafe | ThreadSafety::FullySafeFrame => None,
    };

    let gl_ctx = match backend {
        BackendKind::OpenGl => tree.gpu_context().cloned(),
        BackendKind::OsMesa => tree.cpu_gl_context().cloned(),
        BackendKind::Cpu => None,
    };
    // Plugins that cannot share a context across concurrent renders get a
    // fresh attach/detach scope around every batch.
    let transient_attach = gl_ctx.is_some() && !effect.supports_concurrent_gl_renders();
    if let Some(ctx) = &gl_ctx {
        if transient_attach || node.mark_gl_attached(ctx.id()) {
            effect.attach_gl_context(ctx)?;
        }
    }

    let result = render_plugin_rects(tree, exec, req, planes, rects, mapped_mip, backend, &gl_ctx, token);

    if transient_attach {
        if let Some(ctx) = &gl_ctx {
            node.unmark_gl_attached(ctx.id());
            effect.detach_gl_context(ctx)?;
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn render_plugin_rects(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    req: &Arc<FrameViewRequest>,
    planes: &[RenderPlane],
    rects: &[RectToRender],
    mapped_mip: u32,
    backend: BackendKind,
    gl_ctx: &Option<Arc<GlContext>>,
    token: u64,
) -> RenderResult<()> {
    let node = req.node();
    let effect = node.effect();

    let sequential_writer =
        effect.is_writer() && effect.sequential_preference() == SequentialPreference::OnlySequential;
    let seq_args = SequenceRenderArgs {
        first: req.time(),
        last: req.time(),
        playback: tree.is_playback(),
        draft: tree.is_draft(),
        backend,
    };
    if !sequential_writer {
        effect.begin_sequence_render(&seq_args)?;
    }

    // Pre-fetch each distinct identity source once; every tagged tile
    // then copies from the shared image.
    let mut identity_sources: HashMap<(usize, i64, u32), Image> = HashMap::new();
    for r in rects {
        let Some(src) = &r.identity else { continue };
        let key = (src.input, src.time.quantized(), src.view.0);
        if identity_sources.contains_key(&key) {
            continue;
        }
        if let Some(img) =
            fetch_identity_source(tree, req, src, mapped_mip, backend)?
        {
            identity_sources.insert(key, img);
        }
    }

    let ctx = Arc::new(FunctorCtx {
        tree: Arc::clone(tree),
        req: Arc::clone(req),
        planes: planes.to_vec(),
        input_images: gather_input_images(exec, req),
        identity_sources,
        backend,
        gl_ctx: gl_ctx.clone(),
        mapped_mip,
        token,
    });

    let frame_threaded = effect.thread_safety() == ThreadSafety::FullySafeFrame
        && backend == BackendKind::Cpu
        && rects.len() > 1;

    let result = if frame_threaded {
        run_rects_parallel(tree, &ctx, rects)
    } else {
        rects
            .iter()
            .try_for_each(|r| tiled_rendering_functor(&ctx, r))
    };

    if !sequential_writer {
        effect.end_sequence_render(&seq_args)?;
    }
    result
}

struct ParallelState {
    remaining: Mutex<usize>,
    cv: Condvar,
    first_error: Mutex<Option<RenderError>>,
}

fn run_rects_parallel(
    tree: &Arc<TreeRender>,
    ctx: &Arc<FunctorCtx>,
    rects: &[RectToRender],
) -> RenderResult<()> {
    let state = Arc::new(ParallelState {
        remaining: Mutex::new(rects.len()),
        cv: Condvar::new(),
        first_error: Mutex::new(None),
    });
    for r in rects {
        let ctx = Arc::clone(ctx);
        let state = Arc::clone(&state);
        let rect = r.clone();
        tree.pool().spawn(move || {
            let res = tiled_rendering_functor(&ctx, &rect);
            if let Err(e) = res {
                let mut err = state.first_error.lock().expect("parallel error lock");
                if err.is_none() {
                    *err = Some(e);
                }
            }
            let mut remaining = state.remaining.lock().expect("parallel remaining lock");
            *remaining -= 1;
            state.cv.notify_all();
        });
    }
    {
        let _slot = PoolSlotRelease::new(tree.pool());
        let mut remaining = state.remaining.lock().expect("parallel remaining lock");
        while *remaining > 0 {
            remaining = state.cv.wait(remaining).expect("parallel remaining lock");
        }
    }
    match state.first_error.lock().expect("parallel error lock").take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Renders or copies one rectangle, post-processes it and commits its
/// tiles. Errors leave the tiles pending for the caller to roll back.
fn tiled_rendering_functor(ctx: &Arc<FunctorCtx>, r: &RectToRender) -> RenderResult<()> {
    let tree = &ctx.tree;
    let node = ctx.req.node();
    if tree.is_render_aborted() {
        return Err(RenderError::Aborted);
    }
    if tree.paint_stroke().is_some() && node.effect().accumulates() {
        tree.add_stroke_update_area(&r.rect);
    }

    match &r.identity {
        Some(src) => {
            render_handler_identity(ctx, r, src)?;
            tree.stats_raw().identity_rectangles.fetch_add(1, Ordering::Relaxed);
        }
        None => {
            render_handler_plugin(ctx, r)?;
            tree.stats_raw().rectangles_rendered.fetch_add(1, Ordering::Relaxed);
        }
    }
    render_handler_post_process(ctx, r)?;

    if tree.is_render_aborted() {
        return Err(RenderError::Aborted);
    }
    for p in &ctx.planes {
        p.image.mark_rendered(&r.rect, ctx.token);
    }
    Ok(())
}

fn render_handler_identity(
    ctx: &Arc<FunctorCtx>,
    r: &RectToRender,
    src: &IdentitySource,
) -> RenderResult<()> {
    let key = (src.input, src.time.quantized(), src.view.0);
    match ctx.identity_sources.get(&key) {
        Some(source) => {
            for p in &ctx.planes {
                p.image.copy_from(source, &r.rect)?;
            }
        }
        None => {
            for p in &ctx.planes {
                p.image.fill_zero(&r.rect)?;
            }
        }
    }
    Ok(())
}

fn render_handler_plugin(ctx: &Arc<FunctorCtx>, r: &RectToRender) -> RenderResult<()> {
    let req = &ctx.req;
    let distortion = req.distortion_stack();
    let mut args = RenderActionArgs {
        time: req.time(),
        view: req.view(),
        mip_level: ctx.mapped_mip,
        proxy_scale: req.proxy_scale(),
        roi: r.rect,
        backend: ctx.backend,
        gl_context: ctx.gl_ctx.as_deref(),
        planes: &ctx.planes,
        input_images: &ctx.input_images,
        distortion: &distortion,
        draft: ctx.tree.is_draft(),
    };
    req.node().effect().render(&mut args)
}

const NAN_MESSAGE_PREFIX: &str = "rendered NaN values";

fn render_handler_post_process(ctx: &Arc<FunctorCtx>, r: &RectToRender) -> RenderResult<()> {
    let req = &ctx.req;
    let node = req.node();
    let effect = node.effect();

    let main_input = node.main_input();
    let main_image = main_input
        .as_ref()
        .and_then(|(idx, _)| ctx.input_images.iter().find(|i| i.input == *idx))
        .map(|i| i.image.clone());

    // Channels the plugin declared untouched come from the main input.
    if let Some(layers) = req.layers_results() {
        let process = layers.layers.process_channels;
        if process.iter().any(|p| !p) {
            for p in &ctx.planes {
                p.image.copy_unprocessed_channels(&r.rect, process, main_image.as_ref())?;
            }
        }
    }

    // Host mix / mask blending against the main input.
    let mix = effect.host_mix(req.time()).clamp(0.0, 1.0);
    let mask_image = effect
        .mask_input()
        .and_then(|m| ctx.input_images.iter().find(|i| i.input == m))
        .map(|i| i.image.clone());
    if mix < 1.0 || mask_image.is_some() {
        for p in &ctx.planes {
            p.image.apply_mask_mix(&r.rect, mask_image.as_ref(), main_image.as_ref(), mix)?;
        }
    }

    // NaN repair, with a latched diagnostic on the node.
    if ctx.tree.config().handle_nans {
        let mut found = false;
        for p in &ctx.planes {
            found |= p.image.fix_nans(&r.rect)?;
        }
        if found {
            node.set_persistent_message(format!(
                "{NAN_MESSAGE_PREFIX} (repaired to zero) in {}",
                node.label()
            ));
        } else if node
            .persistent_message()
            .is_some_and(|m| m.starts_with(NAN_MESSAGE_PREFIX))
        {
            node.clear_persistent_message();
        }
    }
    Ok(())
}

/// Images of this request's settled dependencies, mapped back to input
/// slots for the plugin render call.
fn gather_input_images(exec: &Arc<ExecutionData>, req: &Arc<FrameViewRequest>) -> Vec<InputImage> {
    let node = req.node();
    let mut out = Vec::new();
    for dep in req.resolved_dependencies(exec.id()) {
        let Some(image) = dep.image() else { continue };
        let dep_node = dep.node();
        for i in 0..node.input_count() {
            if node.input(i).is_some_and(|n| n.id() == dep_node.id()) {
                out.push(InputImage {
                    input: i,
                    time: dep.time(),
                    view: dep.view(),
                    image: image.clone(),
                });
            }
        }
    }
    out
}

/// Source image for identity-tagged tiles. Tile identities surface at
/// execution time, so the build pass never requested these inputs; a
/// nested render (cache-assisted) produces them on demand.
fn fetch_identity_source(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    src: &IdentitySource,
    mapped_mip: u32,
    backend: BackendKind,
) -> RenderResult<Option<Image>> {
    let node = req.node();
    let Some(input) = node.input(src.input) else {
        return Ok(None);
    };
    let Some(roi) = req.roi() else { return Ok(None) };
    let sub = tree.launch_sub_render(
        &input,
        src.time,
        src.view,
        req.plane(),
        mapped_mip,
        &roi,
        backend == BackendKind::Cpu,
    );
    match sub {
        Ok(sub_req) => Ok(sub_req.image()),
        Err(RenderError::InputDisconnected) => Ok(None),
        Err(e) => Err(e),
    }
}

/// One-shot CPU retry after a GPU out-of-memory: a nested tree with the
/// GPU context withheld renders the same coordinate, and its image becomes
/// this request's result.
fn cpu_fallback(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    roi_canonical: &Rect,
) -> RenderResult<()> {
    let node = req.node();
    let sub_req = tree.launch_sub_render(
        &node,
        req.time(),
        req.view(),
        req.plane(),
        req.mip_level(),
        roi_canonical,
        true,
    )?;
    if let Some(img) = sub_req.image() {
        req.set_image(img);
    }
    Ok(())
}

/// Plugins that only render at scale one produce a mip-0 image; the engine
/// owes the requester the requested mip. Box-downscale into a (cached)
/// target image, tile bookkeeping included.
fn downscale_to_requested(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    full: &Image,
    rod_clipped: &Rect,
    roi_canonical: &Rect,
) -> RenderResult<Image> {
    let node = req.node();
    let tile_size = tree.cache().tile_size();
    let requested_mip = req.mip_level();
    let scale = req.combined_scale();
    let rod_px =
        RectI::from_canonical_enclosing(rod_clipped, scale).round_to_tile_grid(tile_size);
    let Some(roi_px) = RectI::from_canonical_enclosing(roi_canonical, scale)
        .round_to_tile_grid(tile_size)
        .intersect(&rod_px)
    else {
        return Ok(Image::new_cpu(&rod_px, req.plane().clone(), tile_size));
    };

    let target = if req.cache_policy() == CachePolicy::None {
        Image::new_cpu(&rod_px, req.plane().clone(), tile_size)
    } else {
        let key = ImageKey {
            node_hash: node.frame_view_hash(req.time(), req.view()),
            plane: req.plane().clone(),
            mip_level: requested_mip,
            proxy_bits: req.proxy_scale().to_hash_bits(),
            draft: tree.is_draft(),
        };
        tree.cache().fetch_or_create(&key, &rod_px, req.plane())
    };

    let token = req.id().as_u64();
    let (claimed, _) = target.claim_unrendered(&roi_px, token);
    for tile in &claimed {
        target.downscale_from(full, tile, requested_mip)?;
        target.mark_rendered(tile, token);
    }
    if target.has_foreign_pending(&roi_px, token) {
        let _slot = PoolSlotRelease::new(tree.pool());
        target.wait_for_pending_tiles(&roi_px, token);
    }
    Ok(target)
}

#[cfg(test)]
#[path = "../../tests/unit/render/node_render.rs"]
mod tests;
