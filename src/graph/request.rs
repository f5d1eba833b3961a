use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::image::Image;
use crate::foundation::error::Status;
use crate::foundation::geometry::{Rect, RenderScale};
use crate::gl::BackendKind;
use crate::graph::exec::ExecId;
use crate::graph::policy::CachePolicy;
use crate::node::clone::RenderClone;
use crate::node::effect::{DistortionStack, DistortionTransform};
use crate::node::node::Node;
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};
use crate::node::results::{
    DistortionResults, FramesNeededResults, IdentityResults, LayersResults,
    RegionOfDefinitionResults,
};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identifier. Also the tiebreaker in priority
/// ordering, so ids are handed out monotonically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> RequestId {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Lifecycle of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created, not yet picked up by a worker.
    NotRendered,
    /// A worker owns it right now.
    Pending,
    /// Settled; [`FrameViewRequest::terminal_status`] says how.
    Rendered,
    /// Never renders itself: its image is copied through from its single
    /// dependency when that one settles.
    PassThrough,
}

struct RequestState {
    status: RequestStatus,
    terminal: Status,
    roi_canonical: Option<Rect>,
    cache_policy: CachePolicy,
    backend: Option<BackendKind>,
    rod: Option<Arc<RegionOfDefinitionResults>>,
    frames: Option<Arc<FramesNeededResults>>,
    layers: Option<Arc<LayersResults>>,
    identity: Option<Arc<IdentityResults>>,
    distortion: Option<Arc<DistortionResults>>,
    distortion_stack: DistortionStack,
    image: Option<Image>,
    full_scale_image: Option<Image>,
    fallback_tried: bool,
}

/// Per-execution-pass bookkeeping on a request. A request created in one
/// pass can be depended upon again by a later pass of the same tree; each
/// pass tracks its own edges.
#[derive(Default)]
struct PassData {
    deps: HashMap<RequestId, ()>,
    resolved_deps: Vec<Arc<FrameViewRequest>>,
    listeners: Vec<RequestId>,
}

/// One deduplicated unit of render work: a node at a time/view (through
/// its [`RenderClone`]) asked for one plane at one scale. Any number of
/// downstream requesters share the same request; the first worker to pick
/// it up renders, everyone else consumes the settled result.
pub struct FrameViewRequest {
    id: RequestId,
    clone: Arc<RenderClone>,
    plane: PlaneDesc,
    mip_level: u32,
    proxy_scale: RenderScale,
    bypass_cache: AtomicBool,
    render_lock: Mutex<()>,
    state: Mutex<RequestState>,
    passes: Mutex<HashMap<ExecId, PassData>>,
}

impl fmt::Debug for FrameViewRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameViewRequest")
            .field("id", &self.id)
            .field("node", &self.clone.node().label())
            .field("plane", &self.plane.id())
            .field("mip_level", &self.mip_level)
            .finish_non_exhaustive()
    }
}

impl FrameViewRequest {
    pub(crate) fn new(
        clone: Arc<RenderClone>,
        plane: PlaneDesc,
        mip_level: u32,
        proxy_scale: RenderScale,
        bypass_cache: bool,
    ) -> Arc<FrameViewRequest> {
        Arc::new(FrameViewRequest {
            id: RequestId::next(),
            clone,
            plane,
            mip_level,
            proxy_scale,
            bypass_cache: AtomicBool::new(bypass_cache),
            render_lock: Mutex::new(()),
            state: Mutex::new(RequestState {
                status: RequestStatus::NotRendered,
                terminal: Status::Ok,
                roi_canonical: None,
                cache_policy: CachePolicy::ReadWrite,
                backend: None,
                rod: None,
                frames: None,
                layers: None,
                identity: None,
                distortion: None,
                distortion_stack: DistortionStack::new(),
                image: None,
                full_scale_image: None,
                fallback_tried: false,
            }),
            passes: Mutex::new(HashMap::new()),
        })
    }

    /// Request identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The render clone this request belongs to.
    pub fn render_clone(&self) -> &Arc<RenderClone> {
        &self.clone
    }

    /// The node being rendered.
    pub fn node(&self) -> Arc<Node> {
        Arc::clone(self.clone.node())
    }

    /// Frame time of the request.
    pub fn time(&self) -> TimeValue {
        self.clone.time()
    }

    /// View of the request.
    pub fn view(&self) -> ViewIdx {
        self.clone.view()
    }

    /// Requested plane.
    pub fn plane(&self) -> &PlaneDesc {
        &self.plane
    }

    /// Requested mipmap level.
    pub fn mip_level(&self) -> u32 {
        self.mip_level
    }

    /// Requested proxy scale.
    pub fn proxy_scale(&self) -> RenderScale {
        self.proxy_scale
    }

    /// Proxy scale and mip level combined into one scale factor.
    pub fn combined_scale(&self) -> RenderScale {
        self.proxy_scale.combined_with_mip(self.mip_level)
    }

    pub(crate) fn render_lock(&self) -> &Mutex<()> {
        &self.render_lock
    }

    // --- lifecycle --------------------------------------------------------

    /// Current lifecycle status.
    pub fn status(&self) -> RequestStatus {
        self.state.lock().expect("request state lock").status
    }

    /// Terminal status; meaningful once [`RequestStatus::Rendered`].
    pub fn terminal_status(&self) -> Status {
        self.state.lock().expect("request state lock").terminal
    }

    /// Flips to pending and returns the prior status, so the caller can
    /// short-circuit on anything but `NotRendered`. Starting a request that
    /// is already pending is a scheduling bug.
    pub(crate) fn notify_render_started(&self) -> RequestStatus {
        let mut s = self.state.lock().expect("request state lock");
        let prior = s.status;
        debug_assert!(prior != RequestStatus::Pending, "request started while already pending");
        if prior == RequestStatus::NotRendered {
            s.status = RequestStatus::Pending;
        }
        prior
    }

    /// Settles the request. Only a started (pending) request may settle;
    /// the terminal status is written exactly once per render.
    pub(crate) fn notify_render_finished(&self, terminal: Status) {
        let mut s = self.state.lock().expect("request state lock");
        debug_assert!(s.status == RequestStatus::Pending, "request settled without being started");
        s.status = RequestStatus::Rendered;
        s.terminal = terminal;
    }

    /// Marks the request as a pure pass-through of its single dependency.
    pub(crate) fn mark_pass_through(&self) {
        self.state.lock().expect("request state lock").status = RequestStatus::PassThrough;
    }

    /// Re-arms an already settled request whose accumulated ROI just grew:
    /// the next worker pass renders the missing region (cached tiles make
    /// the overlap cheap).
    pub(crate) fn rearm_for_more_roi(&self) {
        let mut s = self.state.lock().expect("request state lock");
        if s.status == RequestStatus::Rendered {
            s.status = RequestStatus::NotRendered;
        }
    }

    /// Consumes the one-shot cache by-pass. True at most once.
    pub fn check_if_bypass_cache_enabled_and_turn_off(&self) -> bool {
        self.bypass_cache.swap(false, Ordering::AcqRel)
    }

    // --- accumulated ROI --------------------------------------------------

    /// Canonical region of interest accumulated across requesters.
    pub fn roi(&self) -> Option<Rect> {
        self.state.lock().expect("request state lock").roi_canonical
    }

    /// Unions `roi` in. Returns false when the accumulated ROI already
    /// contained it, which lets revisits short-circuit.
    pub(crate) fn grow_roi(&self, roi: &Rect) -> bool {
        let mut s = self.state.lock().expect("request state lock");
        match s.roi_canonical {
            None => {
                s.roi_canonical = Some(*roi);
                true
            }
            Some(cur) => {
                let grown = cur.union(*roi);
                if grown == cur {
                    false
                } else {
                    s.roi_canonical = Some(grown);
                    true
                }
            }
        }
    }

    // --- resolved policy --------------------------------------------------

    /// Cache policy resolved for this request.
    pub fn cache_policy(&self) -> CachePolicy {
        self.state.lock().expect("request state lock").cache_policy
    }

    pub(crate) fn set_cache_policy(&self, p: CachePolicy) {
        self.state.lock().expect("request state lock").cache_policy = p;
    }

    /// Backend resolved for this request, once resolved.
    pub fn backend(&self) -> Option<BackendKind> {
        self.state.lock().expect("request state lock").backend
    }

    pub(crate) fn set_backend(&self, b: BackendKind) {
        self.state.lock().expect("request state lock").backend = Some(b);
    }

    /// Arms the one-shot out-of-memory CPU fallback. True the first time.
    pub(crate) fn take_fallback_once(&self) -> bool {
        let mut s = self.state.lock().expect("request state lock");
        if s.fallback_tried {
            false
        } else {
            s.fallback_tried = true;
            true
        }
    }

    // --- pinned action results --------------------------------------------

    /// Resolved region of definition, once computed.
    pub fn rod_results(&self) -> Option<Arc<RegionOfDefinitionResults>> {
        self.state.lock().expect("request state lock").rod.clone()
    }

    pub(crate) fn set_rod_results(&self, v: Arc<RegionOfDefinitionResults>) {
        self.state.lock().expect("request state lock").rod = Some(v);
    }

    /// Resolved frames-needed answer, once computed.
    pub fn frames_needed_results(&self) -> Option<Arc<FramesNeededResults>> {
        self.state.lock().expect("request state lock").frames.clone()
    }

    pub(crate) fn set_frames_needed_results(&self, v: Arc<FramesNeededResults>) {
        self.state.lock().expect("request state lock").frames = Some(v);
    }

    /// Resolved layers answer, once computed.
    pub fn layers_results(&self) -> Option<Arc<LayersResults>> {
        self.state.lock().expect("request state lock").layers.clone()
    }

    pub(crate) fn set_layers_results(&self, v: Arc<LayersResults>) {
        self.state.lock().expect("request state lock").layers = Some(v);
    }

    /// Whole-RoD identity answer, once computed.
    pub fn identity_results(&self) -> Option<Arc<IdentityResults>> {
        self.state.lock().expect("request state lock").identity.clone()
    }

    pub(crate) fn set_identity_results(&self, v: Arc<IdentityResults>) {
        self.state.lock().expect("request state lock").identity = Some(v);
    }

    /// Declared distortion, once computed.
    pub fn distortion_results(&self) -> Option<Arc<DistortionResults>> {
        self.state.lock().expect("request state lock").distortion.clone()
    }

    pub(crate) fn set_distortion_results(&self, v: Arc<DistortionResults>) {
        self.state.lock().expect("request state lock").distortion = Some(v);
    }

    /// Inverse distortions accumulated from downstream concatenation.
    pub fn distortion_stack(&self) -> DistortionStack {
        self.state.lock().expect("request state lock").distortion_stack.clone()
    }

    pub(crate) fn set_distortion_stack(&self, stack: DistortionStack) {
        self.state.lock().expect("request state lock").distortion_stack = stack;
    }

    // --- images -----------------------------------------------------------

    /// Image at the requested scale, once rendered.
    pub fn image(&self) -> Option<Image> {
        self.state.lock().expect("request state lock").image.clone()
    }

    pub(crate) fn set_image(&self, img: Image) {
        self.state.lock().expect("request state lock").image = Some(img);
    }

    /// Mip-0 image kept when the plugin cannot render at the requested
    /// scale and the engine downscales on its behalf.
    pub fn full_scale_image(&self) -> Option<Image> {
        self.state.lock().expect("request state lock").full_scale_image.clone()
    }

    pub(crate) fn set_full_scale_image(&self, img: Image) {
        self.state.lock().expect("request state lock").full_scale_image = Some(img);
    }

    // --- per-pass edges ---------------------------------------------------

    /// Records that this request must wait for `dep` in `pass`.
    pub(crate) fn add_dependency(&self, pass: ExecId, dep: &Arc<FrameViewRequest>) {
        let mut passes = self.passes.lock().expect("request passes lock");
        passes.entry(pass).or_default().deps.insert(dep.id, ());
    }

    /// Records that `listener` wants this request's result in `pass`.
    pub(crate) fn add_listener(&self, pass: ExecId, listener: RequestId) {
        let mut passes = self.passes.lock().expect("request passes lock");
        let data = passes.entry(pass).or_default();
        if !data.listeners.contains(&listener) {
            data.listeners.push(listener);
        }
    }

    /// Unsettled dependencies left in `pass`.
    pub fn dependency_count(&self, pass: ExecId) -> usize {
        self.passes
            .lock()
            .expect("request passes lock")
            .get(&pass)
            .map_or(0, |d| d.deps.len())
    }

    /// Listener ids registered in `pass`.
    pub(crate) fn listener_ids(&self, pass: ExecId) -> Vec<RequestId> {
        self.passes
            .lock()
            .expect("request passes lock")
            .get(&pass)
            .map_or_else(Vec::new, |d| d.listeners.clone())
    }

    /// Listeners registered in `pass`.
    pub fn listener_count(&self, pass: ExecId) -> usize {
        self.passes
            .lock()
            .expect("request passes lock")
            .get(&pass)
            .map_or(0, |d| d.listeners.len())
    }

    /// Listeners across every pass of the tree. Drives the caching
    /// heuristic: results wanted in several places are worth keeping.
    pub fn total_listener_count(&self) -> usize {
        self.passes
            .lock()
            .expect("request passes lock")
            .values()
            .map(|d| d.listeners.len())
            .sum()
    }

    /// Marks `dep` settled for `pass`, pinning it (and so its image) until
    /// this request finishes. For a pass-through request the dependency's
    /// image, ROI and terminal status copy straight through. Returns the
    /// number of unsettled dependencies left.
    pub(crate) fn mark_dependency_as_rendered(
        &self,
        pass: ExecId,
        dep: &Arc<FrameViewRequest>,
    ) -> usize {
        let remaining = {
            let mut passes = self.passes.lock().expect("request passes lock");
            let data = passes.entry(pass).or_default();
            if data.deps.remove(&dep.id).is_some() {
                data.resolved_deps.push(Arc::clone(dep));
            }
            data.deps.len()
        };
        let is_pass_through =
            self.state.lock().expect("request state lock").status == RequestStatus::PassThrough;
        if is_pass_through {
            let (dep_image, dep_roi, dep_terminal) = {
                let ds = dep.state.lock().expect("request state lock");
                (ds.image.clone(), ds.roi_canonical, ds.terminal)
            };
            let mut s = self.state.lock().expect("request state lock");
            if let Some(img) = dep_image {
                s.image = Some(img);
            }
            if let Some(roi) = dep_roi {
                s.roi_canonical = Some(match s.roi_canonical {
                    Some(cur) => cur.union(roi),
                    None => roi,
                });
            }
            s.terminal = dep_terminal;
        }
        remaining
    }

    /// Dependencies already settled in `pass`, pinned with their images.
    pub(crate) fn resolved_dependencies(&self, pass: ExecId) -> Vec<Arc<FrameViewRequest>> {
        self.passes
            .lock()
            .expect("request passes lock")
            .get(&pass)
            .map_or_else(Vec::new, |d| d.resolved_deps.clone())
    }

    /// Drops the pinned dependency images once this request has rendered.
    pub(crate) fn clear_resolved_dependencies(&self, pass: ExecId) {
        if let Some(data) = self.passes.lock().expect("request passes lock").get_mut(&pass) {
            data.resolved_deps.clear();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/request.rs"]
mod tests;
