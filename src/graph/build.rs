//! Recursive construction of the deduplicated request graph.
//!
//! `request_render` is the build-time walk: starting from the tree root it
//! resolves planes, identity, RoD, frames needed and distortion for one
//! node at one (time, view, plane, scale), deduplicates against requests
//! already created for the same coordinate, accumulates ROIs, and recurses
//! into the node's inputs, wiring dependency and listener edges as it
//! goes. Nothing renders here; the execution pass drains the graph later.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::cache::image::{Image, ImageKey};
use crate::foundation::error::{RenderError, RenderResult, Status};
use crate::foundation::geometry::{
    clip_infinite_rect, rect_is_infinite, Rect, RectI, RenderScale,
};
use crate::graph::exec::ExecutionData;
use crate::graph::policy::{resolve_cache_policy, resolve_render_backend, CachePolicy};
use crate::graph::request::{FrameViewRequest, RequestStatus};
use crate::node::clone::{RenderClone, RequestKey};
use crate::node::effect::{
    DistortionTransform, FrameRangeD, FramesNeeded, IdentityInput, LayersInfo, PassThroughPlanes,
};
use crate::node::node::Node;
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};
use crate::node::results::{
    action_result_key, DistortionResults, FramesNeededResults, IdentityResults, LayersResults,
    RegionOfDefinitionResults, TAG_DISTORTION, TAG_FRAMES, TAG_IDENTITY, TAG_LAYERS, TAG_ROD,
};
use crate::render::tree::TreeRender;

/// First plane the clone's node produces; the default render target when
/// the host does not name one.
pub(crate) fn first_produced_plane(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
) -> RenderResult<PlaneDesc> {
    let layers = resolved_layers(tree, clone)?;
    layers
        .layers
        .produced
        .first()
        .cloned()
        .ok_or_else(|| {
            RenderError::failed(format!("node {} produces no plane", clone.node().label()))
        })
}

/// The clone's full RoD at the tree scale, as the default ROI.
pub(crate) fn full_rod_roi(tree: &Arc<TreeRender>, clone: &Arc<RenderClone>) -> RenderResult<Rect> {
    let rod = resolved_rod(tree, clone, tree.mip_level(), tree.proxy_scale())?;
    rod.rod.ok_or(RenderError::InputDisconnected)
}

/// Memoized layers action with engine defaults applied.
pub(crate) fn resolved_layers(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
) -> RenderResult<Arc<LayersResults>> {
    let node = clone.node();
    let key = action_result_key(
        node.frame_view_hash(clone.time(), clone.view()),
        RenderScale::ONE,
        node.plugin().id(),
        TAG_LAYERS,
    );
    if let Some(hit) = tree.results_store().layers(key) {
        return Ok(hit);
    }
    let answered = node.effect().layers_produced_and_needed(clone.time(), clone.view())?;
    let layers = match answered {
        Some(info) => info,
        None => default_layers(node, clone.time(), clone.view()),
    };
    let record = Arc::new(LayersResults { layers });
    tree.results_store().put_layers(key, Arc::clone(&record));
    Ok(record)
}

fn default_layers(node: &Arc<Node>, time: TimeValue, view: ViewIdx) -> LayersInfo {
    let produced = vec![PlaneDesc::rgba()];
    let mask = node.effect().mask_input();
    let mut needed = BTreeMap::new();
    for i in 0..node.input_count() {
        if node.input(i).is_none() {
            continue;
        }
        let planes = if Some(i) == mask { vec![PlaneDesc::alpha()] } else { produced.clone() };
        needed.insert(i, planes);
    }
    let pass_through = node
        .main_input()
        .map(|(input, _)| PassThroughPlanes { input, time, view });
    LayersInfo { produced, needed, pass_through, process_channels: [true; 4] }
}

/// Memoized RoD action. `Ok(None)` from the plugin resolves to the union
/// of connected inputs' RoDs; no connected input resolves to no RoD.
pub(crate) fn resolved_rod(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
    mip_level: u32,
    proxy_scale: RenderScale,
) -> RenderResult<Arc<RegionOfDefinitionResults>> {
    let node = clone.node();
    let scale = proxy_scale.combined_with_mip(mip_level);
    let key = action_result_key(
        node.frame_view_hash(clone.time(), clone.view()),
        scale,
        node.plugin().id(),
        TAG_ROD,
    );
    if let Some(hit) = tree.results_store().rod(key) {
        return Ok(hit);
    }
    let own = node.effect().region_of_definition(clone.time(), scale, clone.view())?;
    let rod = match own {
        Some(r) => Some(r),
        None => {
            let mut acc: Option<Rect> = None;
            for i in 0..node.input_count() {
                let Some(input) = node.input(i) else { continue };
                let input_clone = tree.clone_for(&input, clone.time(), clone.view());
                let up = resolved_rod(tree, &input_clone, mip_level, proxy_scale)?;
                if let Some(r) = up.rod {
                    acc = Some(match acc {
                        Some(a) => a.union(r),
                        None => r,
                    });
                }
            }
            acc
        }
    };
    let record = Arc::new(RegionOfDefinitionResults { rod });
    tree.results_store().put_rod(key, Arc::clone(&record));
    Ok(record)
}

/// Memoized frames-needed action with the engine default (every connected
/// input at the same time and view).
pub(crate) fn resolved_frames_needed(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
) -> RenderResult<Arc<FramesNeededResults>> {
    let node = clone.node();
    let key = action_result_key(
        node.frame_view_hash(clone.time(), clone.view()),
        RenderScale::ONE,
        node.plugin().id(),
        TAG_FRAMES,
    );
    if let Some(hit) = tree.results_store().frames(key) {
        return Ok(hit);
    }
    let answered = node.effect().frames_needed(clone.time(), clone.view())?;
    let frames = match answered {
        Some(f) => f,
        None => {
            let mut frames: FramesNeeded = BTreeMap::new();
            for i in 0..node.input_count() {
                if node.input(i).is_none() {
                    continue;
                }
                let mut views = BTreeMap::new();
                views.insert(clone.view(), vec![FrameRangeD::single(clone.time().0)]);
                frames.insert(i, views);
            }
            frames
        }
    };
    let record = Arc::new(FramesNeededResults { frames });
    tree.results_store().put_frames(key, Arc::clone(&record));
    Ok(record)
}

/// Memoized whole-RoD identity probe at the request scale.
fn resolved_identity(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
    mip_level: u32,
    proxy_scale: RenderScale,
    rod: &Rect,
) -> RenderResult<Arc<IdentityResults>> {
    let node = clone.node();
    let scale = proxy_scale.combined_with_mip(mip_level);
    let key = action_result_key(
        node.frame_view_hash(clone.time(), clone.view()),
        scale,
        node.plugin().id(),
        TAG_IDENTITY,
    );
    if let Some(hit) = tree.results_store().identity(key) {
        return Ok(hit);
    }
    let rod_pixel = RectI::from_canonical_enclosing(rod, scale);
    let identity = node.effect().is_identity(clone.time(), scale, rod_pixel, clone.view())?;
    // A node claiming identity on itself at the same coordinate would
    // recurse forever; the plugin is broken.
    if identity.input == IdentityInput::SelfAtTimeView
        && identity.time.quantized() == clone.time().quantized()
        && identity.view == clone.view()
    {
        let msg = format!(
            "node {} declared itself identity on itself at the same frame and view",
            node.label()
        );
        node.set_persistent_message(&msg);
        return Err(RenderError::failed(msg));
    }
    let record = Arc::new(IdentityResults { identity });
    tree.results_store().put_identity(key, Arc::clone(&record));
    Ok(record)
}

/// Memoized distortion declaration.
fn resolved_distortion(
    tree: &Arc<TreeRender>,
    clone: &Arc<RenderClone>,
    mip_level: u32,
    proxy_scale: RenderScale,
) -> RenderResult<Arc<DistortionResults>> {
    let node = clone.node();
    let scale = proxy_scale.combined_with_mip(mip_level);
    let key = action_result_key(
        node.frame_view_hash(clone.time(), clone.view()),
        scale,
        node.plugin().id(),
        TAG_DISTORTION,
    );
    if let Some(hit) = tree.results_store().distortion(key) {
        return Ok(hit);
    }
    let distortion = if node.effect().can_distort() {
        node.effect().inverse_distortion(clone.time(), scale, tree.is_draft(), clone.view())?
    } else {
        None
    };
    let record = Arc::new(DistortionResults { distortion });
    tree.results_store().put_distortion(key, Arc::clone(&record));
    Ok(record)
}

/// Wires `req` under `requester`: a listener edge down, a dependency edge
/// up. A request that already settled at build time resolves the edge
/// immediately instead of leaving a dangling dependency.
fn link(
    exec: &Arc<ExecutionData>,
    requester: Option<&Arc<FrameViewRequest>>,
    req: &Arc<FrameViewRequest>,
) {
    let Some(requester) = requester else { return };
    req.add_listener(exec.id(), requester.id());
    requester.add_dependency(exec.id(), req);
    if req.status() == RequestStatus::Rendered {
        requester.mark_dependency_as_rendered(exec.id(), req);
    }
}

/// Settles a request at build time without scheduling it.
fn settle_now(
    exec: &Arc<ExecutionData>,
    requester: Option<&Arc<FrameViewRequest>>,
    req: &Arc<FrameViewRequest>,
    terminal: Status,
) -> Arc<FrameViewRequest> {
    req.notify_render_started();
    req.notify_render_finished(terminal);
    link(exec, requester, req);
    Arc::clone(req)
}

/// The request's final image, when the cache already holds every tile of
/// its ROI. Such a request settles at build time with no task and no
/// upstream recursion.
fn lookup_cached_image(
    tree: &Arc<TreeRender>,
    req: &Arc<FrameViewRequest>,
    roi: &Rect,
    rod_rect: &Rect,
) -> Option<Image> {
    let node = req.node();
    let key = ImageKey {
        node_hash: node.frame_view_hash(req.time(), req.view()),
        plane: req.plane().clone(),
        mip_level: req.mip_level(),
        proxy_bits: req.proxy_scale().to_hash_bits(),
        draft: tree.is_draft(),
    };
    let image = tree.cache().get(&key)?;
    let tile_size = tree.cache().tile_size();
    let scale = req.combined_scale();
    let rod_clipped = if rect_is_infinite(rod_rect) {
        clip_infinite_rect(rod_rect, roi)
    } else {
        *rod_rect
    };
    let rod_px = RectI::from_canonical_enclosing(&rod_clipped, scale).round_to_tile_grid(tile_size);
    let roi_px = RectI::from_canonical_enclosing(roi, scale)
        .round_to_tile_grid(tile_size)
        .intersect(&rod_px)?;
    if !image.bounds().contains_rect(&roi_px) {
        return None;
    }
    // Pending tiles mean another render is mid-flight; the exec pass waits
    // for those, so the request must still run as a task.
    if image.has_foreign_pending(&roi_px, req.id().as_u64()) || !image.all_rendered(&roi_px) {
        return None;
    }
    Some(image)
}

/// Builds (or revisits) the request for `node` at `(time, view)` for one
/// plane and scale, recursing into everything it depends on.
///
/// Revisits of an existing request with an already covered ROI
/// short-circuit; a grown ROI re-runs the input recursion so upstream ROIs
/// grow to match.
#[allow(clippy::too_many_arguments)]
pub(crate) fn request_render(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    node: &Arc<Node>,
    time: TimeValue,
    view: ViewIdx,
    plane: &PlaneDesc,
    mip_level: u32,
    proxy_scale: RenderScale,
    canonical_roi: &Rect,
    requester: Option<&Arc<FrameViewRequest>>,
    inherited_stack: Option<&crate::node::effect::DistortionStack>,
) -> RenderResult<Arc<FrameViewRequest>> {
    // Plugins that cannot render fractional times get the nearest frame,
    // so retimed requests do not fragment the cache.
    let time = if time.is_integer() || node.effect().supports_fractional_frames() {
        time
    } else {
        time.rounded()
    };

    let clone = tree.clone_for(node, time, view);
    let request_key = RequestKey::new(plane, mip_level, proxy_scale);

    // Deduplicate against an existing request for the same coordinate. A
    // covered ROI short-circuits; a grown one re-arms the request and
    // re-runs the recursion so upstream ROIs grow to match.
    if let Some(existing) = clone.find_request(&request_key) {
        let grew = existing.grow_roi(canonical_roi);
        if let Some(stack) = inherited_stack {
            existing.set_distortion_stack(stack.clone());
        }
        if grew {
            existing.rearm_for_more_roi();
        }
        if existing.status() != RequestStatus::Rendered {
            exec.register_task(&existing);
        }
        link(exec, requester, &existing);
        if grew {
            revisit(tree, exec, &clone, &existing, mip_level, proxy_scale)?;
            finalize(tree, exec, &existing);
        }
        return Ok(existing);
    }

    let req = FrameViewRequest::new(
        Arc::clone(&clone),
        plane.clone(),
        mip_level,
        proxy_scale,
        tree.arms_bypass_cache(),
    );
    clone.remember_request(request_key, &req);
    if let Some(stack) = inherited_stack {
        req.set_distortion_stack(stack.clone());
    }
    tree.stats_raw().requests_created.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    // Planes the node does not produce route through the pass-through
    // input; the request never renders, it copies its dependency through.
    let layers = resolved_layers(tree, &clone)?;
    req.set_layers_results(Arc::clone(&layers));
    if !layers.layers.produced.contains(plane) {
        let Some(pt) = layers.layers.pass_through else {
            return Err(RenderError::failed(format!(
                "node {} does not produce plane {} and has no pass-through input",
                node.label(),
                plane.id()
            )));
        };
        let Some(pt_input) = node.input(pt.input) else {
            return Ok(settle_now(exec, requester, &req, Status::InputDisconnected));
        };
        req.mark_pass_through();
        exec.register_task(&req);
        link(exec, requester, &req);
        request_render(
            tree,
            exec,
            &pt_input,
            pt.time,
            pt.view,
            plane,
            mip_level,
            proxy_scale,
            canonical_roi,
            Some(&req),
            None,
        )?;
        finalize(tree, exec, &req);
        return Ok(req);
    }

    // RoD; a missing one reads as nothing upstream, an empty ROI as
    // vacuous success. An unbounded ROI cannot be rendered at all.
    let rod = resolved_rod(tree, &clone, mip_level, proxy_scale)?;
    req.set_rod_results(Arc::clone(&rod));
    let Some(rod_rect) = rod.rod else {
        return Ok(settle_now(exec, requester, &req, Status::InputDisconnected));
    };
    if rect_is_infinite(canonical_roi) {
        let msg = format!(
            "node {} was asked for an unbounded region of interest",
            node.label()
        );
        node.set_persistent_message(&msg);
        return Err(RenderError::failed(msg));
    }
    let roi = canonical_roi.intersect(rod_rect);
    if roi.width() <= 0.0 || roi.height() <= 0.0 {
        return Ok(settle_now(exec, requester, &req, Status::Ok));
    }
    req.grow_roi(&roi);

    // Whole-RoD identity redirects the request wholesale.
    let identity = resolved_identity(tree, &clone, mip_level, proxy_scale, &rod_rect)?;
    req.set_identity_results(Arc::clone(&identity));
    match identity.identity.input {
        IdentityInput::NotIdentity => {}
        IdentityInput::SelfAtTimeView => {
            req.mark_pass_through();
            exec.register_task(&req);
            link(exec, requester, &req);
            request_render(
                tree,
                exec,
                node,
                identity.identity.time,
                identity.identity.view,
                plane,
                mip_level,
                proxy_scale,
                &roi,
                Some(&req),
                None,
            )?;
            finalize(tree, exec, &req);
            return Ok(req);
        }
        IdentityInput::Input(i) => {
            let Some(input) = node.input(i) else {
                return Ok(settle_now(exec, requester, &req, Status::InputDisconnected));
            };
            req.mark_pass_through();
            exec.register_task(&req);
            link(exec, requester, &req);
            request_render(
                tree,
                exec,
                &input,
                identity.identity.time,
                identity.identity.view,
                plane,
                mip_level,
                proxy_scale,
                &roi,
                Some(&req),
                None,
            )?;
            finalize(tree, exec, &req);
            return Ok(req);
        }
    }

    // Concatenated distortion: when the target input can fold a distortion
    // stack into its own sampling, this node never renders. Its request
    // routes to that input with the node's transform appended, and the
    // stack keeps travelling until a node that cannot receive it renders.
    if tree.config().enable_concatenations {
        let distortion = resolved_distortion(tree, &clone, mip_level, proxy_scale)?;
        req.set_distortion_results(Arc::clone(&distortion));
        if let Some(d) = &distortion.distortion
            && let Some(input) = node.input(d.input)
            && input.effect().can_receive_distortion()
        {
            let mut stack = req.distortion_stack();
            stack.push(d.transform.clone());
            req.set_distortion_stack(stack.clone());

            let scale = proxy_scale.combined_with_mip(mip_level);
            let roi_map = node
                .effect()
                .regions_of_interest(clone.time(), scale, clone.view(), &roi)?
                .unwrap_or_default();
            let mut input_roi = *roi_map.get(&d.input).unwrap_or(&roi);
            if let DistortionTransform::Matrix(m) = &d.transform {
                input_roi = m.transform_rect_bounds(&input_roi);
            }

            req.mark_pass_through();
            exec.register_task(&req);
            link(exec, requester, &req);
            request_render(
                tree,
                exec,
                &input,
                clone.time(),
                clone.view(),
                plane,
                mip_level,
                proxy_scale,
                &input_roi,
                Some(&req),
                Some(&stack),
            )?;
            finalize(tree, exec, &req);
            return Ok(req);
        }
    }

    // Resolve caching and backend up front; failure here is a build-time
    // failure of the whole branch.
    if !node.effect().supports_render_scale() && !proxy_scale.is_one() {
        let msg = format!(
            "node {} does not support proxy-scale rendering",
            node.label()
        );
        node.set_persistent_message(&msg);
        return Err(RenderError::failed(msg));
    }
    let mut cache_policy = resolve_cache_policy(tree, exec, &req);
    let backend = resolve_render_backend(tree, &req, &mut cache_policy).inspect_err(|e| {
        node.set_persistent_message(e.to_string());
    })?;
    req.set_cache_policy(cache_policy);
    req.set_backend(backend);

    // A request the cache already fully covers settles here: no task, no
    // upstream recursion, the cached image is the result.
    if cache_policy == CachePolicy::ReadWrite
        && !node.effect().accumulates()
        && let Some(image) = lookup_cached_image(tree, &req, &roi, &rod_rect)
    {
        req.set_image(image);
        return Ok(settle_now(exec, requester, &req, Status::Ok));
    }

    // Accumulating paint nodes reuse their buffer; the area the user just
    // changed is invalidated so only it re-renders.
    if node.effect().accumulates()
        && let Some(stroke) = tree.paint_stroke()
        && let Some(accum) = node.accumulation_image()
    {
        if let Some(changed) = stroke.take_changed_area() {
            let scale = proxy_scale.combined_with_mip(mip_level);
            let changed_px =
                crate::foundation::geometry::RectI::from_canonical_enclosing(&changed, scale);
            accum.invalidate_rect(&changed_px);
        }
        req.set_image(accum);
    }

    exec.register_task(&req);
    link(exec, requester, &req);

    recurse_inputs(tree, exec, &clone, &req, mip_level, proxy_scale)?;
    finalize(tree, exec, &req);
    Ok(req)
}

/// Queues the request when its dependency edges all settled during build.
fn finalize(tree: &Arc<TreeRender>, exec: &Arc<ExecutionData>, req: &Arc<FrameViewRequest>) {
    let _ = tree;
    if matches!(req.status(), RequestStatus::NotRendered | RequestStatus::PassThrough)
        && req.dependency_count(exec.id()) == 0
    {
        exec.make_ready(req);
    }
}

/// Re-runs the upstream recursion of a revisited request whose ROI grew.
/// Pass-through requests re-request their routed target; plain requests
/// re-run the frames-needed recursion.
fn revisit(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    clone: &Arc<RenderClone>,
    req: &Arc<FrameViewRequest>,
    mip_level: u32,
    proxy_scale: RenderScale,
) -> RenderResult<()> {
    if req.status() != RequestStatus::PassThrough {
        return recurse_inputs(tree, exec, clone, req, mip_level, proxy_scale);
    }
    let node = clone.node();
    let Some(roi) = req.roi() else { return Ok(()) };
    let identity = req.identity_results().map(|r| r.identity);

    // A distortion pass-through re-routes to its target input with the
    // grown ROI run through the same transform.
    if !matches!(
        identity.map(|i| i.input),
        Some(IdentityInput::SelfAtTimeView) | Some(IdentityInput::Input(_))
    ) && let Some(d) = req.distortion_results().and_then(|r| r.distortion.clone())
        && let Some(input) = node.input(d.input)
        && input.effect().can_receive_distortion()
    {
        let mut input_roi = roi;
        if let DistortionTransform::Matrix(m) = &d.transform {
            input_roi = m.transform_rect_bounds(&input_roi);
        }
        let stack = req.distortion_stack();
        request_render(
            tree,
            exec,
            &input,
            clone.time(),
            clone.view(),
            &req.plane().clone(),
            mip_level,
            proxy_scale,
            &input_roi,
            Some(req),
            Some(&stack),
        )?;
        return Ok(());
    }

    let target = match identity.map(|i| i.input) {
        Some(IdentityInput::SelfAtTimeView) => {
            let id = identity.expect("identity present");
            Some((Arc::clone(node), id.time, id.view))
        }
        Some(IdentityInput::Input(i)) => {
            let id = identity.expect("identity present");
            node.input(i).map(|n| (n, id.time, id.view))
        }
        _ => req
            .layers_results()
            .and_then(|l| l.layers.pass_through)
            .and_then(|pt| node.input(pt.input).map(|n| (n, pt.time, pt.view))),
    };
    if let Some((target_node, t, v)) = target {
        request_render(
            tree,
            exec,
            &target_node,
            t,
            v,
            &req.plane().clone(),
            mip_level,
            proxy_scale,
            &roi,
            Some(req),
            None,
        )?;
    }
    Ok(())
}

/// Recurses into every input the frames-needed answer names, with the
/// prefetch cap, frame-range clamping and per-input ROI/distortion rules
/// applied.
fn recurse_inputs(
    tree: &Arc<TreeRender>,
    exec: &Arc<ExecutionData>,
    clone: &Arc<RenderClone>,
    req: &Arc<FrameViewRequest>,
    mip_level: u32,
    proxy_scale: RenderScale,
) -> RenderResult<()> {
    let node = clone.node();
    let Some(roi) = req.roi() else { return Ok(()) };
    let scale = proxy_scale.combined_with_mip(mip_level);

    let frames = resolved_frames_needed(tree, clone)?;
    req.set_frames_needed_results(Arc::clone(&frames));
    let layers = req
        .layers_results()
        .map(|l| l.layers.clone())
        .unwrap_or_else(|| default_layers(node, clone.time(), clone.view()));

    let roi_map = node
        .effect()
        .regions_of_interest(clone.time(), scale, clone.view(), &roi)?
        .unwrap_or_default();

    for (&input_idx, views) in &frames.frames {
        let Some(input) = node.input(input_idx) else { continue };
        let input_range = input.effect().frame_range()?;
        let input_roi = *roi_map.get(&input_idx).unwrap_or(&roi);

        let needed_planes = layers
            .needed
            .get(&input_idx)
            .cloned()
            .unwrap_or_else(|| vec![req.plane().clone()]);

        for (&input_view, ranges) in views {
            let mut fetched = 0usize;
            let cap = tree.config().max_frames_needed_prefetch.max(1);
            'ranges: for range in ranges {
                if range.min.fract() != 0.0 || range.max.fract() != 0.0 {
                    warn!(
                        node = node.label(),
                        input = input_idx,
                        min = range.min,
                        max = range.max,
                        "frames-needed range has non-integer endpoints"
                    );
                }
                let mut t = range.min;
                while t <= range.max + f64::EPSILON {
                    if fetched >= cap {
                        warn!(
                            node = node.label(),
                            input = input_idx,
                            cap,
                            "frames-needed range truncated by the prefetch cap"
                        );
                        break 'ranges;
                    }
                    let clamped = match input_range {
                        Some((lo, hi)) => t.clamp(lo, hi),
                        None => t,
                    };
                    for needed_plane in &needed_planes {
                        request_render(
                            tree,
                            exec,
                            &input,
                            TimeValue(clamped),
                            input_view,
                            needed_plane,
                            mip_level,
                            proxy_scale,
                            &input_roi,
                            Some(req),
                            None,
                        )?;
                    }
                    fetched += 1;
                    if range.max <= range.min {
                        break;
                    }
                    t += 1.0;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/graph/build.rs"]
mod tests;
