use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::image::TileCache;
use crate::foundation::config::RenderConfig;
use crate::foundation::error::{RenderError, RenderResult, Status};
use crate::foundation::geometry::{Rect, RectI, RenderScale};
use crate::gl::{GlContext, GpuContextProvider};
use crate::graph::build;
use crate::graph::exec::{ExecutionData, PassProgress};
use crate::graph::request::{FrameViewRequest, RequestStatus};
use crate::node::clone::RenderClone;
use crate::node::node::{Node, NodeId};
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};
use crate::node::results::ActionResultsStore;
use crate::render::node_render;
use crate::render::pool::{PoolSlotRelease, WorkerPool};

/// Counters accumulated over one tree render.
#[derive(Default)]
pub struct RenderStats {
    pub(crate) requests_created: AtomicUsize,
    pub(crate) tasks_executed: AtomicUsize,
    pub(crate) rectangles_rendered: AtomicUsize,
    pub(crate) identity_rectangles: AtomicUsize,
    pub(crate) oom_fallbacks: AtomicUsize,
}

/// Plain snapshot of [`RenderStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStatsSnapshot {
    /// Requests created (after deduplication).
    pub requests_created: usize,
    /// Tasks a worker picked up.
    pub tasks_executed: usize,
    /// Rectangles fed to plugin render calls.
    pub rectangles_rendered: usize,
    /// Rectangles satisfied by identity copies.
    pub identity_rectangles: usize,
    /// GPU renders retried on the CPU after an out-of-memory.
    pub oom_fallbacks: usize,
}

impl RenderStats {
    fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            requests_created: self.requests_created.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            rectangles_rendered: self.rectangles_rendered.load(Ordering::Relaxed),
            identity_rectangles: self.identity_rectangles.load(Ordering::Relaxed),
            oom_fallbacks: self.oom_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Host-side state of an interactive paint stroke. Successive stroke ticks
/// launch successive trees against the same accumulating buffer; the host
/// reports the canonical area the user just changed so only that area is
/// re-rendered.
#[derive(Default)]
pub struct PaintStroke {
    changed_area: Mutex<Option<Rect>>,
}

impl PaintStroke {
    /// New stroke context.
    pub fn new() -> Arc<PaintStroke> {
        Arc::new(PaintStroke::default())
    }

    /// Records the canonical area changed since the last render tick.
    pub fn set_changed_area(&self, area: Rect) {
        *self.changed_area.lock().expect("paint stroke lock") = Some(area);
    }

    /// Takes the pending changed area, clearing it.
    pub fn take_changed_area(&self) -> Option<Rect> {
        self.changed_area.lock().expect("paint stroke lock").take()
    }
}

/// Everything needed to create a [`TreeRender`].
pub struct TreeRenderArgs {
    /// Node whose output is wanted.
    pub root: Arc<Node>,
    /// Frame time.
    pub time: TimeValue,
    /// View.
    pub view: ViewIdx,
    /// Proxy scale.
    pub proxy_scale: RenderScale,
    /// Mipmap level.
    pub mip_level: u32,
    /// Plane to render; `None` picks the root's first produced plane.
    pub plane: Option<PlaneDesc>,
    /// Canonical region of interest; `None` renders the root's full RoD.
    pub canonical_roi: Option<Rect>,
    /// Draft-quality render.
    pub draft: bool,
    /// True during timeline playback.
    pub playback: bool,
    /// Arms the one-shot cache by-pass on every request of this tree.
    pub bypass_cache: bool,
    /// Additional nodes whose results must be kept for the host.
    pub extra_nodes: Vec<Arc<Node>>,
    /// Active interactive paint stroke, if any.
    pub paint_stroke: Option<Arc<PaintStroke>>,
    /// Worker pool; `None` builds one from the config.
    pub pool: Option<Arc<WorkerPool>>,
    /// Shared tile cache; `None` builds a fresh one.
    pub cache: Option<Arc<TileCache>>,
    /// GL context source; `None` means CPU only.
    pub gpu_provider: Option<Arc<dyn GpuContextProvider>>,
    /// Engine tuning, snapshotted into the tree.
    pub config: RenderConfig,
}

impl TreeRenderArgs {
    /// Minimal args: render `root` at `time`/`view`, full RoD, defaults
    /// everywhere else.
    pub fn new(root: Arc<Node>, time: TimeValue, view: ViewIdx) -> Self {
        Self {
            root,
            time,
            view,
            proxy_scale: RenderScale::ONE,
            mip_level: 0,
            plane: None,
            canonical_roi: None,
            draft: false,
            playback: false,
            bypass_cache: false,
            extra_nodes: Vec::new(),
            paint_stroke: None,
            pool: None,
            cache: None,
            gpu_provider: None,
            config: RenderConfig::default(),
        }
    }
}

type CloneKey = (NodeId, i64, ViewIdx);

/// One render of one node tree at one frame/view: the shared context every
/// request, action memo and worker of the render hangs off. Everything in
/// it is immutable after creation except the abort flag and bookkeeping
/// maps, so workers read it without coordination.
pub struct TreeRender {
    root: Arc<Node>,
    time: TimeValue,
    view: ViewIdx,
    proxy_scale: RenderScale,
    mip_level: u32,
    requested_plane: Option<PlaneDesc>,
    canonical_roi: Option<Rect>,
    draft: bool,
    playback: bool,
    bypass_cache: bool,
    extra_ids: HashSet<NodeId>,
    extra_nodes: Vec<Arc<Node>>,
    paint_stroke: Option<Arc<PaintStroke>>,
    config: RenderConfig,
    pool: Arc<WorkerPool>,
    cache: Arc<TileCache>,
    gl_context: Option<Arc<GlContext>>,
    cpu_gl_context: Option<Arc<GlContext>>,
    parent: Option<Arc<TreeRender>>,
    aborted: AtomicBool,
    clones: Mutex<HashMap<CloneKey, Arc<RenderClone>>>,
    results: ActionResultsStore,
    extra_results: Mutex<HashMap<NodeId, Arc<FrameViewRequest>>>,
    stroke_update_area: Mutex<Option<RectI>>,
    stats: RenderStats,
}

impl TreeRender {
    /// Creates a render tree. Contexts, pool and cache are resolved here
    /// once; the tree never re-reads host state afterwards.
    pub fn create(args: TreeRenderArgs) -> RenderResult<Arc<TreeRender>> {
        let (gl_context, cpu_gl_context) = match &args.gpu_provider {
            Some(p) => (p.gpu_context(), p.cpu_gl_context()),
            None => (None, None),
        };
        Self::create_internal(args, gl_context, cpu_gl_context, None)
    }

    fn create_internal(
        args: TreeRenderArgs,
        gl_context: Option<Arc<GlContext>>,
        cpu_gl_context: Option<Arc<GlContext>>,
        parent: Option<Arc<TreeRender>>,
    ) -> RenderResult<Arc<TreeRender>> {
        if args.config.tile_size <= 0 || (args.config.tile_size & (args.config.tile_size - 1)) != 0
        {
            return Err(RenderError::failed(format!(
                "tile size {} is not a power of two",
                args.config.tile_size
            )));
        }
        let pool = args
            .pool
            .unwrap_or_else(|| WorkerPool::new(args.config.effective_pool_threads()));
        let cache = args.cache.unwrap_or_else(|| TileCache::new(args.config.tile_size));
        let extra_ids = args.extra_nodes.iter().map(|n| n.id()).collect();
        Ok(Arc::new(TreeRender {
            root: args.root,
            time: args.time,
            view: args.view,
            proxy_scale: args.proxy_scale,
            mip_level: args.mip_level,
            requested_plane: args.plane,
            canonical_roi: args.canonical_roi,
            draft: args.draft,
            playback: args.playback,
            bypass_cache: args.bypass_cache,
            extra_ids,
            extra_nodes: args.extra_nodes,
            paint_stroke: args.paint_stroke,
            config: args.config,
            pool,
            cache,
            gl_context,
            cpu_gl_context,
            parent,
            aborted: AtomicBool::new(false),
            clones: Mutex::new(HashMap::new()),
            results: ActionResultsStore::default(),
            extra_results: Mutex::new(HashMap::new()),
            stroke_update_area: Mutex::new(None),
            stats: RenderStats::default(),
        }))
    }

    // --- accessors --------------------------------------------------------

    /// Root node of the tree.
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Frame time of the render.
    pub fn time(&self) -> TimeValue {
        self.time
    }

    /// View of the render.
    pub fn view(&self) -> ViewIdx {
        self.view
    }

    /// Proxy scale of the render.
    pub fn proxy_scale(&self) -> RenderScale {
        self.proxy_scale
    }

    /// Mipmap level requested at the root.
    pub fn mip_level(&self) -> u32 {
        self.mip_level
    }

    /// Draft-quality render.
    pub fn is_draft(&self) -> bool {
        self.draft
    }

    /// True during timeline playback.
    pub fn is_playback(&self) -> bool {
        self.playback
    }

    /// Engine tuning snapshotted at creation.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Worker pool driving this tree.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Tile cache backing this tree.
    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// GPU GL context fetched at creation.
    pub fn gpu_context(&self) -> Option<&Arc<GlContext>> {
        self.gl_context.as_ref()
    }

    /// CPU GL context fetched at creation.
    pub fn cpu_gl_context(&self) -> Option<&Arc<GlContext>> {
        self.cpu_gl_context.as_ref()
    }

    /// Active paint stroke context, if any.
    pub fn paint_stroke(&self) -> Option<&Arc<PaintStroke>> {
        self.paint_stroke.as_ref()
    }

    pub(crate) fn arms_bypass_cache(&self) -> bool {
        self.bypass_cache
    }

    /// True for the tree root and host-requested extra nodes; their
    /// results always cache.
    pub fn is_root_or_extra(&self, id: NodeId) -> bool {
        id == self.root.id() || self.extra_ids.contains(&id)
    }

    pub(crate) fn results_store(&self) -> &ActionResultsStore {
        &self.results
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> RenderStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_raw(&self) -> &RenderStats {
        &self.stats
    }

    // --- abort ------------------------------------------------------------

    /// Flags the render as aborted. Sticky; in-flight workers observe it
    /// at their next checkpoint.
    pub fn set_render_aborted(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// True when this tree or any ancestor tree was aborted.
    pub fn is_render_aborted(&self) -> bool {
        if self.aborted.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_render_aborted())
    }

    // --- per-render bookkeeping -------------------------------------------

    /// The render clone pinning `node` at `(time, view)`, created on first
    /// use. All request deduplication flows through these.
    pub(crate) fn clone_for(
        &self,
        node: &Arc<Node>,
        time: TimeValue,
        view: ViewIdx,
    ) -> Arc<RenderClone> {
        let key = (node.id(), time.quantized(), view);
        let mut clones = self.clones.lock().expect("tree clones lock");
        Arc::clone(
            clones
                .entry(key)
                .or_insert_with(|| RenderClone::new(Arc::clone(node), time, view)),
        )
    }

    /// Result of a host-requested extra node, once its request exists.
    pub fn extra_result(&self, id: NodeId) -> Option<Arc<FrameViewRequest>> {
        self.extra_results.lock().expect("extra results lock").get(&id).cloned()
    }

    pub(crate) fn register_extra_result(&self, req: &Arc<FrameViewRequest>) {
        let id = req.node().id();
        if self.extra_ids.contains(&id) {
            self.extra_results.lock().expect("extra results lock").insert(id, Arc::clone(req));
        }
    }

    /// Accumulates a pixel rect rendered into an accumulating paint node,
    /// so the host knows what to refresh on screen.
    pub(crate) fn add_stroke_update_area(&self, rect: &RectI) {
        let mut area = self.stroke_update_area.lock().expect("stroke area lock");
        *area = Some(match *area {
            Some(cur) => cur.union(rect),
            None => *rect,
        });
    }

    /// Takes the accumulated stroke update area.
    pub fn take_stroke_update_area(&self) -> Option<RectI> {
        self.stroke_update_area.lock().expect("stroke area lock").take()
    }

    // --- launching --------------------------------------------------------

    /// Builds the request graph for the root (and extra nodes) and drains
    /// it to completion. Returns the root's settled request; its image is
    /// the render result.
    pub fn launch_render(self: &Arc<Self>) -> RenderResult<Arc<FrameViewRequest>> {
        let exec = ExecutionData::new();
        let clone = self.clone_for(&self.root, self.time, self.view);

        let plane = match &self.requested_plane {
            Some(p) => p.clone(),
            None => build::first_produced_plane(self, &clone)?,
        };
        let roi = match self.canonical_roi {
            Some(r) => r,
            None => build::full_rod_roi(self, &clone)?,
        };

        let root_req = build::request_render(
            self,
            &exec,
            &self.root,
            self.time,
            self.view,
            &plane,
            self.mip_level,
            self.proxy_scale,
            &roi,
            None,
            None,
        )?;

        let extras = self.extra_nodes.clone();
        for extra in &extras {
            let extra_clone = self.clone_for(extra, self.time, self.view);
            let extra_plane = build::first_produced_plane(self, &extra_clone)?;
            let extra_roi = build::full_rod_roi(self, &extra_clone)?;
            let req = build::request_render(
                self,
                &exec,
                extra,
                self.time,
                self.view,
                &extra_plane,
                self.mip_level,
                self.proxy_scale,
                &extra_roi,
                None,
                None,
            )?;
            self.register_extra_result(&req);
        }
        self.register_extra_result(&root_req);

        self.launch_render_internal(&exec, &root_req)
    }

    /// Renders one node of this tree in a nested pass, reusing the tree's
    /// clones, memos, cache and pool. Used for exec-time fetches the build
    /// pass could not predict (identity tile sources, isolated renders).
    pub(crate) fn launch_sub_render(
        self: &Arc<Self>,
        node: &Arc<Node>,
        time: TimeValue,
        view: ViewIdx,
        plane: &PlaneDesc,
        mip_level: u32,
        roi: &Rect,
        disable_gpu: bool,
    ) -> RenderResult<Arc<FrameViewRequest>> {
        let sub = TreeRender::create_internal(
            TreeRenderArgs {
                root: Arc::clone(node),
                time,
                view,
                proxy_scale: self.proxy_scale,
                mip_level,
                plane: Some(plane.clone()),
                canonical_roi: Some(*roi),
                draft: self.draft,
                playback: self.playback,
                bypass_cache: false,
                extra_nodes: Vec::new(),
                paint_stroke: self.paint_stroke.clone(),
                pool: Some(Arc::clone(&self.pool)),
                cache: Some(Arc::clone(&self.cache)),
                gpu_provider: None,
                config: self.config.clone(),
            },
            if disable_gpu { None } else { self.gl_context.clone() },
            self.cpu_gl_context.clone(),
            Some(Arc::clone(self)),
        )?;
        sub.launch_render()
    }

    fn launch_render_internal(
        self: &Arc<Self>,
        exec: &Arc<ExecutionData>,
        root_req: &Arc<FrameViewRequest>,
    ) -> RenderResult<Arc<FrameViewRequest>> {
        debug_assert!(
            exec.outstanding_count() == 0 || exec.has_ready(),
            "request graph built with no dependency-free request"
        );
        debug!(
            outstanding = exec.outstanding_count(),
            root = %root_req.id(),
            "launching render pass"
        );
        loop {
            for req in exec.take_ready() {
                trace!(request = %req.id(), "submitting task");
                self.stats.tasks_executed.fetch_add(1, Ordering::Relaxed);
                let tree = Arc::clone(self);
                let pass = Arc::clone(exec);
                let task = Arc::clone(&req);
                self.pool.spawn(move || node_render::run_task(&tree, &pass, &task));
            }
            // Waiting for workers from a pool thread hands the slot back so
            // the tasks we just queued can actually run.
            let progress = {
                let _slot = PoolSlotRelease::new(&self.pool);
                exec.wait_progress()
            };
            match progress {
                PassProgress::Ready => continue,
                PassProgress::Done => break,
                PassProgress::Failed(status) => {
                    // Unblock anything parked on tiles owned by this pass.
                    self.set_render_aborted();
                    debug!(?status, "render pass failed");
                    return Err(RenderError::from_status(status)
                        .unwrap_or_else(|| RenderError::failed("render pass failed")));
                }
            }
        }
        match root_req.status() {
            RequestStatus::Rendered | RequestStatus::PassThrough => {
                match RenderError::from_status(root_req.terminal_status()) {
                    None => Ok(Arc::clone(root_req)),
                    Some(RenderError::InputDisconnected) => Ok(Arc::clone(root_req)),
                    Some(err) => Err(err),
                }
            }
            other => Err(RenderError::failed(format!(
                "root request settled in unexpected state {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/tree.rs"]
mod tests;
