use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::image::Image;
use crate::foundation::error::RenderResult;
use crate::foundation::geometry::{Mat3, Point, Rect, RectI, RenderScale};
use crate::gl::{BackendKind, GlContext};
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};

/// Render-thread discipline a plugin declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadSafety {
    /// Only one render at a time across every instance of the plugin.
    Unsafe,
    /// One render at a time per node instance.
    InstanceSafe,
    /// Concurrent renders on one instance, one rectangle per call.
    FullySafe,
    /// Concurrent renders on one instance, and the host may split a single
    /// rectangle across its own frame threads.
    FullySafeFrame,
}

/// Whether a plugin can or must render through OpenGL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlSupport {
    /// CPU only.
    Unsupported,
    /// Either backend works; GPU preferred when a context exists.
    Supported,
    /// Refuses to render without a GL context.
    Required,
}

/// Whether frames must be rendered in sequence (writers encoding video).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequentialPreference {
    /// Frames render in any order.
    NotSequential,
    /// Frames only make sense strictly in order.
    OnlySequential,
}

/// Inclusive frame range requested from an input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRangeD {
    /// First frame, inclusive.
    pub min: f64,
    /// Last frame, inclusive.
    pub max: f64,
}

impl FrameRangeD {
    /// Single-frame range.
    pub fn single(t: f64) -> Self {
        Self { min: t, max: t }
    }
}

/// Frames a node consumes from each input: input index to view to ranges.
pub type FramesNeeded = BTreeMap<usize, BTreeMap<ViewIdx, Vec<FrameRangeD>>>;

/// Where an identity answer redirects the render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityInput {
    /// Not an identity; the plugin renders.
    NotIdentity,
    /// Identity on the node itself at another time or view.
    SelfAtTimeView,
    /// Identity on the given input.
    Input(usize),
}

/// Full identity answer: redirection target plus the time and view to
/// fetch it at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityResult {
    /// Redirection target.
    pub input: IdentityInput,
    /// Time to fetch the redirected image at.
    pub time: TimeValue,
    /// View to fetch the redirected image at.
    pub view: ViewIdx,
}

impl IdentityResult {
    /// The non-identity answer.
    pub fn not_identity(time: TimeValue, view: ViewIdx) -> Self {
        Self { input: IdentityInput::NotIdentity, time, view }
    }
}

/// Planes a node does not produce are fetched through this input instead.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassThroughPlanes {
    /// Input the missing planes come from.
    pub input: usize,
    /// Time to fetch them at.
    pub time: TimeValue,
    /// View to fetch them at.
    pub view: ViewIdx,
}

/// Answer of the layers action: what the node produces, what it wants from
/// each input, and how missing planes route around it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayersInfo {
    /// Planes the node renders itself.
    pub produced: Vec<PlaneDesc>,
    /// Planes wanted from each connected input.
    pub needed: BTreeMap<usize, Vec<PlaneDesc>>,
    /// Route for planes the node does not produce.
    pub pass_through: Option<PassThroughPlanes>,
    /// RGBA channels the plugin actually writes; unprocessed channels are
    /// copied from the main input after the render.
    pub process_channels: [bool; 4],
}

/// One inverse distortion step, owned by the node that declared it.
#[derive(Clone)]
pub enum DistortionTransform {
    /// Homogeneous 3x3 matrix, concatenatable with neighbours.
    Matrix(Mat3),
    /// Opaque per-pixel function; breaks concatenation with neighbours.
    Function(Arc<dyn Fn(Point) -> Point + Send + Sync>),
}

impl fmt::Debug for DistortionTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistortionTransform::Matrix(m) => f.debug_tuple("Matrix").field(m).finish(),
            DistortionTransform::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl PartialEq for DistortionTransform {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DistortionTransform::Matrix(a), DistortionTransform::Matrix(b)) => a == b,
            (DistortionTransform::Function(a), DistortionTransform::Function(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl DistortionTransform {
    /// The matrix form, when this step is one.
    pub fn as_matrix(&self) -> Option<&Mat3> {
        match self {
            DistortionTransform::Matrix(m) => Some(m),
            DistortionTransform::Function(_) => None,
        }
    }
}

/// Inverse distortion a node applies to one of its inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct Distortion {
    /// Input the distortion pulls pixels from.
    pub input: usize,
    /// The inverse transform.
    pub transform: DistortionTransform,
}

/// Ordered inverse transforms accumulated down a distortion-concatenating
/// chain, applied by the node at the bottom of the chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistortionStack(Vec<DistortionTransform>);

impl DistortionStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Pushes the next upstream transform.
    pub fn push(&mut self, t: DistortionTransform) {
        self.0.push(t);
    }

    /// Transforms in upstream-to-downstream order.
    pub fn entries(&self) -> &[DistortionTransform] {
        &self.0
    }

    /// Number of accumulated transforms.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no transform is accumulated.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An input image resolved ahead of a render call.
#[derive(Clone, Debug)]
pub struct InputImage {
    /// Input index the image came from.
    pub input: usize,
    /// Time it was rendered at.
    pub time: TimeValue,
    /// View it was rendered at.
    pub view: ViewIdx,
    /// The rendered image.
    pub image: Image,
}

/// One output plane buffer handed to the render action.
#[derive(Clone, Debug)]
pub struct RenderPlane {
    /// Which plane the buffer holds.
    pub plane: PlaneDesc,
    /// Destination buffer; the plugin writes `roi` pixels into it.
    pub image: Image,
}

/// Everything a render call sees. One call renders one rectangle of one or
/// more planes at one time/view.
pub struct RenderActionArgs<'a> {
    /// Frame time.
    pub time: TimeValue,
    /// View.
    pub view: ViewIdx,
    /// Mipmap level the buffers are allocated at.
    pub mip_level: u32,
    /// Proxy scale the buffers are allocated at.
    pub proxy_scale: RenderScale,
    /// Pixel rectangle to fill, in the buffers' coordinate space.
    pub roi: RectI,
    /// Backend resolved for this render.
    pub backend: BackendKind,
    /// Bound GL context when the backend is a GL one.
    pub gl_context: Option<&'a GlContext>,
    /// Output plane buffers.
    pub planes: &'a [RenderPlane],
    /// Pre-resolved input images (dependencies rendered earlier).
    pub input_images: &'a [InputImage],
    /// Accumulated inverse distortions to apply while sampling inputs.
    pub distortion: &'a DistortionStack,
    /// Draft-quality render.
    pub draft: bool,
}

/// Arguments for the begin/end sequence notifications.
#[derive(Clone, Copy, Debug)]
pub struct SequenceRenderArgs {
    /// First frame of the sequence.
    pub first: TimeValue,
    /// Last frame of the sequence.
    pub last: TimeValue,
    /// True during timeline playback.
    pub playback: bool,
    /// Draft-quality render.
    pub draft: bool,
    /// Backend the sequence renders with.
    pub backend: BackendKind,
}

/// A plugin instance. Everything the scheduler knows about a node's
/// behavior goes through this trait; default methods describe a plain
/// single-input filter so small effects override almost nothing.
///
/// Implementations must be internally synchronized: the scheduler calls
/// actions concurrently up to the declared [`ThreadSafety`].
pub trait Effect: Send + Sync + 'static {
    /// Stable plugin identifier, shared by all instances of the plugin.
    fn plugin_id(&self) -> &str {
        "cairn.generic"
    }

    /// Number of input slots.
    fn input_count(&self) -> usize {
        1
    }

    /// Which input, if any, is a mask. Masks are skipped by the default
    /// frames-needed answer when unconnected and blended in post.
    fn mask_input(&self) -> Option<usize> {
        None
    }

    /// Declared render-thread discipline.
    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    /// Declared OpenGL capability.
    fn gl_support(&self) -> GlSupport {
        GlSupport::Unsupported
    }

    /// False when the plugin must render its whole RoD in one call.
    fn supports_tiles(&self) -> bool {
        true
    }

    /// False when the plugin only renders at scale one; the engine then
    /// renders at mip 0 and downscales on its behalf.
    fn supports_render_scale(&self) -> bool {
        true
    }

    /// True when the plugin declares an inverse distortion that chains can
    /// concatenate through.
    fn can_distort(&self) -> bool {
        false
    }

    /// True when the plugin samples its input through a transform and can
    /// fold a downstream-concatenated distortion stack into that sampling.
    fn can_receive_distortion(&self) -> bool {
        false
    }

    /// True when the plugin renders meaningfully at fractional frame
    /// times; otherwise requests round down to the nearest frame.
    fn supports_fractional_frames(&self) -> bool {
        false
    }

    /// True when one render call produces every plane at once.
    fn renders_all_planes_at_once(&self) -> bool {
        false
    }

    /// False forces attach/detach notifications around every GL render.
    fn supports_concurrent_gl_renders(&self) -> bool {
        true
    }

    /// Writers encode to disk and are never cached.
    fn is_writer(&self) -> bool {
        false
    }

    /// Frame ordering requirement.
    fn sequential_preference(&self) -> SequentialPreference {
        SequentialPreference::NotSequential
    }

    /// False when the output is the same at every frame time.
    fn is_frame_varying(&self) -> bool {
        true
    }

    /// True for paint-style nodes that accumulate strokes into a reused
    /// buffer across successive renders.
    fn accumulates(&self) -> bool {
        false
    }

    /// Host-applied mix-with-source factor in `[0, 1]`.
    fn host_mix(&self, time: TimeValue) -> f64 {
        let _ = time;
        1.0
    }

    /// Hash of everything besides time/view that changes the output
    /// (knob values). Folded into request and cache keys.
    fn variant_hash(&self, time: TimeValue, view: ViewIdx) -> u64 {
        let _ = (time, view);
        0
    }

    /// Caching heuristic consulted for nodes that are neither writers nor
    /// tree outputs.
    fn should_cache_output(&self, num_listeners: usize, playback: bool) -> bool {
        num_listeners > 1 || (playback && self.is_frame_varying())
    }

    /// Declared frame range, `None` for unbounded. Frames requested from
    /// this node are clamped into the range.
    fn frame_range(&self) -> RenderResult<Option<(f64, f64)>> {
        Ok(None)
    }

    /// Region of definition in canonical coordinates. `Ok(None)` asks the
    /// engine for the default: the union of connected inputs' RoDs.
    fn region_of_definition(
        &self,
        time: TimeValue,
        scale: RenderScale,
        view: ViewIdx,
    ) -> RenderResult<Option<Rect>> {
        let _ = (time, scale, view);
        Ok(None)
    }

    /// Frames wanted from each input. `Ok(None)` asks for the default:
    /// every connected non-mask input at the same time and view.
    fn frames_needed(&self, time: TimeValue, view: ViewIdx) -> RenderResult<Option<FramesNeeded>> {
        let _ = (time, view);
        Ok(None)
    }

    /// Whether the render would be a pixel-for-pixel copy of an input (or
    /// of this node at another time/view) over `roi`.
    fn is_identity(
        &self,
        time: TimeValue,
        scale: RenderScale,
        roi: RectI,
        view: ViewIdx,
    ) -> RenderResult<IdentityResult> {
        let _ = (scale, roi);
        Ok(IdentityResult::not_identity(time, view))
    }

    /// Planes produced and needed. `Ok(None)` asks for the default: produce
    /// RGBA, want the produced planes from every connected input, pass
    /// unknown planes through the main input, process all channels.
    fn layers_produced_and_needed(
        &self,
        time: TimeValue,
        view: ViewIdx,
    ) -> RenderResult<Option<LayersInfo>> {
        let _ = (time, view);
        Ok(None)
    }

    /// Region wanted from each input to fill `output_roi`. `Ok(None)` asks
    /// for the default: the same region from every input.
    fn regions_of_interest(
        &self,
        time: TimeValue,
        scale: RenderScale,
        view: ViewIdx,
        output_roi: &Rect,
    ) -> RenderResult<Option<BTreeMap<usize, Rect>>> {
        let _ = (time, scale, view, output_roi);
        Ok(None)
    }

    /// Inverse distortion this node applies, when [`Effect::can_distort`].
    fn inverse_distortion(
        &self,
        time: TimeValue,
        scale: RenderScale,
        draft: bool,
        view: ViewIdx,
    ) -> RenderResult<Option<Distortion>> {
        let _ = (time, scale, draft, view);
        Ok(None)
    }

    /// Renders one rectangle of the output planes. The default clears the
    /// rectangle to transparent black.
    fn render(&self, args: &mut RenderActionArgs<'_>) -> RenderResult<()> {
        for plane in args.planes {
            plane.image.fill_zero(&args.roi)?;
        }
        Ok(())
    }

    /// Called once before the first render call of a sequence.
    fn begin_sequence_render(&self, args: &SequenceRenderArgs) -> RenderResult<()> {
        let _ = args;
        Ok(())
    }

    /// Called once after the last render call of a sequence.
    fn end_sequence_render(&self, args: &SequenceRenderArgs) -> RenderResult<()> {
        let _ = args;
        Ok(())
    }

    /// Notifies the plugin that `ctx` is about to be used with this node.
    fn attach_gl_context(&self, ctx: &GlContext) -> RenderResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Counterpart of [`Effect::attach_gl_context`].
    fn detach_gl_context(&self, ctx: &GlContext) -> RenderResult<()> {
        let _ = ctx;
        Ok(())
    }
}
