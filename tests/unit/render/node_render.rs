use super::*;
use crate::foundation::error::RenderResult;
use crate::foundation::geometry::RenderScale;
use crate::node::effect::{Effect, GlSupport, IdentityResult};
use crate::node::node::Node;
use crate::testing::{test_args, test_rod, FailMode, StubEffect};

struct FixedProvider {
    gpu: Option<Arc<GlContext>>,
}

impl crate::gl::GpuContextProvider for FixedProvider {
    fn gpu_context(&self) -> Option<Arc<GlContext>> {
        self.gpu.clone()
    }

    fn cpu_gl_context(&self) -> Option<Arc<GlContext>> {
        None
    }
}

fn gpu_args(root: Arc<Node>) -> crate::render::tree::TreeRenderArgs {
    let mut args = test_args(root);
    args.gpu_provider = Some(Arc::new(FixedProvider {
        gpu: Some(Arc::new(GlContext::new(1, 4096, true))),
    }));
    args
}

// The tree root always caches, which keeps a merely GL-supporting plugin
// off the GPU; an identity root makes the GL node interior and uncached.
fn behind_identity_root(src: &Arc<Node>) -> Arc<Node> {
    let pass = Node::new(
        "pass",
        Arc::new(StubEffect::filter().with_identity(IdentityResult {
            input: IdentityInput::Input(0),
            time: TimeValue(1.0),
            view: ViewIdx(0),
        })),
    );
    pass.connect_input(0, src).unwrap();
    pass
}

#[test]
fn gpu_oom_falls_back_to_the_cpu_once() {
    let effect = Arc::new(
        StubEffect::source(test_rod(), 0.5)
            .with_gl_support(GlSupport::Supported)
            .with_fail_mode(FailMode::OomOnGl),
    );
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let root = behind_identity_root(&src);
    let tree = TreeRender::create(gpu_args(Arc::clone(&root))).unwrap();

    let req = tree.launch_render().unwrap();
    assert_eq!(tree.stats().oom_fallbacks, 1);
    let backends: Vec<BackendKind> = effect.seen_backends.lock().unwrap().clone();
    assert!(backends.contains(&BackendKind::OpenGl));
    assert!(backends.contains(&BackendKind::Cpu));
    let image = req.image().unwrap();
    assert!(image.is_cpu());
    assert_eq!(image.pixel(10, 10).unwrap(), vec![0.5; 4]);
}

#[test]
fn persistent_oom_is_not_retried_twice() {
    let effect = Arc::new(
        StubEffect::source(test_rod(), 0.5)
            .with_gl_support(GlSupport::Supported)
            .with_fail_mode(FailMode::OomAlways),
    );
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let root = behind_identity_root(&src);
    let tree = TreeRender::create(gpu_args(Arc::clone(&root))).unwrap();

    let err = tree.launch_render().unwrap_err();
    assert!(matches!(err, RenderError::OutOfMemory));
    assert_eq!(tree.stats().oom_fallbacks, 1);
}

#[test]
fn nan_output_is_repaired_and_flagged() {
    let src = Node::new("src", Arc::new(StubEffect::source(test_rod(), f32::NAN)));
    let tree = TreeRender::create(test_args(Arc::clone(&src))).unwrap();

    let req = tree.launch_render().unwrap();
    assert_eq!(req.image().unwrap().pixel(10, 10).unwrap(), vec![0.0; 4]);
    let msg = src.persistent_message().unwrap();
    assert!(msg.starts_with("rendered NaN values"));
}

#[test]
fn host_mix_blends_with_the_main_input() {
    let src = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let filter = Node::new("filter", Arc::new(StubEffect::filter().with_host_mix(0.5)));
    filter.connect_input(0, &src).unwrap();
    let tree = TreeRender::create(test_args(Arc::clone(&filter))).unwrap();

    let req = tree.launch_render().unwrap();
    // The filter painted 0.0; half-mixed with the 1.0 input.
    assert_eq!(req.image().unwrap().pixel(10, 10).unwrap(), vec![0.5; 4]);
}

#[test]
fn zero_mask_keeps_the_main_input() {
    let layers = crate::node::effect::LayersInfo {
        produced: vec![PlaneDesc::alpha()],
        needed: std::collections::BTreeMap::new(),
        pass_through: None,
        process_channels: [true; 4],
    };
    let src = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let mask = Node::new("mask", Arc::new(StubEffect::source(test_rod(), 0.0).with_layers(layers)));
    let filter = Node::new(
        "filter",
        Arc::new(StubEffect::multi_input(2).with_mask_input(1)),
    );
    filter.connect_input(0, &src).unwrap();
    filter.connect_input(1, &mask).unwrap();
    let tree = TreeRender::create(test_args(Arc::clone(&filter))).unwrap();

    let req = tree.launch_render().unwrap();
    // Mask alpha is zero everywhere, so the render is fully masked out.
    assert_eq!(req.image().unwrap().pixel(10, 10).unwrap(), vec![1.0; 4]);
}

#[test]
fn large_rectangles_split_across_frame_threads() {
    let effect = Arc::new(StubEffect::source(Rect::new(0.0, 0.0, 256.0, 256.0), 1.0));
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let tree = TreeRender::create(test_args(Arc::clone(&src))).unwrap();

    let req = tree.launch_render().unwrap();
    let rects = effect.rendered_rects();
    // Two pool slots, well over the area threshold: two bands.
    assert_eq!(rects.len(), 2);
    let covered = rects[0].union(&rects[1]);
    assert_eq!(covered, RectI::new(0, 0, 256, 256));
    assert_eq!(req.image().unwrap().pixel(200, 200).unwrap(), vec![1.0; 4]);
}

#[test]
fn untiled_plugins_render_the_whole_rod() {
    let effect = Arc::new(StubEffect::source(Rect::new(0.0, 0.0, 128.0, 128.0), 1.0).without_tiles());
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let mut args = test_args(Arc::clone(&src));
    args.canonical_roi = Some(Rect::new(0.0, 0.0, 64.0, 64.0));
    let tree = TreeRender::create(args).unwrap();

    tree.launch_render().unwrap();
    assert_eq!(effect.rendered_rects(), vec![RectI::new(0, 0, 128, 128)]);
    assert_eq!(effect.sequence_begins.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn mip_requests_render_full_scale_then_downscale() {
    let effect =
        Arc::new(StubEffect::source(Rect::new(0.0, 0.0, 128.0, 128.0), 1.0).without_render_scale());
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let mut args = test_args(Arc::clone(&src));
    args.mip_level = 1;
    let tree = TreeRender::create(args).unwrap();

    let req = tree.launch_render().unwrap();
    // The plugin rendered at scale one; the engine owes mip 1.
    assert!(effect.rendered_rects().iter().all(|r| r.x2 <= 128 && r.y2 <= 128));
    let full = req.full_scale_image().unwrap();
    assert_eq!(full.bounds(), &RectI::new(0, 0, 128, 128));
    let image = req.image().unwrap();
    assert_eq!(image.bounds(), &RectI::new(0, 0, 64, 64));
    assert_eq!(image.pixel(10, 10).unwrap(), vec![1.0; 4]);
}

#[test]
fn distortion_stack_reaches_the_bottom_render_call() {
    let src_effect = Arc::new(StubEffect::source(test_rod(), 1.0).receiving_distortion());
    let src = Node::new("src", Arc::clone(&src_effect) as Arc<dyn Effect>);
    let warp_effect = Arc::new(StubEffect::filter().with_distortion(
        crate::node::effect::Distortion {
            input: 0,
            transform: crate::node::effect::DistortionTransform::Matrix(
                crate::foundation::geometry::Mat3::translation(16.0, 0.0),
            ),
        },
    ));
    let warp = Node::new("warp", Arc::clone(&warp_effect) as Arc<dyn Effect>);
    warp.connect_input(0, &src).unwrap();
    let tree = TreeRender::create(test_args(Arc::clone(&warp))).unwrap();

    tree.launch_render().unwrap();
    // The declaring node never renders; the node below it applies the
    // accumulated transform.
    assert!(warp_effect.seen_distortion_lens().is_empty());
    assert_eq!(src_effect.seen_distortion_lens(), vec![1]);
}

#[test]
fn unsafe_plugins_do_not_frame_thread() {
    let effect = Arc::new(
        StubEffect::source(Rect::new(0.0, 0.0, 256.0, 256.0), 1.0)
            .with_thread_safety(ThreadSafety::Unsafe),
    );
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let tree = TreeRender::create(test_args(Arc::clone(&src))).unwrap();
    tree.launch_render().unwrap();
    assert_eq!(effect.rendered_rects(), vec![RectI::new(0, 0, 256, 256)]);
}

/// Two inputs with disjoint RoDs; outside their overlap every tile is an
/// identity of whichever side it falls on.
struct SideIdentity;

impl Effect for SideIdentity {
    fn plugin_id(&self) -> &str {
        "test.side-identity"
    }

    fn input_count(&self) -> usize {
        2
    }

    fn is_identity(
        &self,
        time: TimeValue,
        _scale: RenderScale,
        roi: RectI,
        view: ViewIdx,
    ) -> RenderResult<IdentityResult> {
        if roi.x2 <= 64 {
            Ok(IdentityResult { input: IdentityInput::Input(0), time, view })
        } else if roi.x1 >= 64 {
            Ok(IdentityResult { input: IdentityInput::Input(1), time, view })
        } else {
            Ok(IdentityResult::not_identity(time, view))
        }
    }

    fn render(&self, _args: &mut crate::node::effect::RenderActionArgs<'_>) -> RenderResult<()> {
        Ok(())
    }
}

#[test]
fn identity_tiles_copy_from_their_source_input() {
    let left = Node::new("left", Arc::new(StubEffect::source(Rect::new(0.0, 0.0, 64.0, 64.0), 1.0)));
    let right = Node::new(
        "right",
        Arc::new(StubEffect::source(Rect::new(64.0, 0.0, 128.0, 64.0), 0.25)),
    );
    let merge = Node::new("merge", Arc::new(SideIdentity));
    merge.connect_input(0, &left).unwrap();
    merge.connect_input(1, &right).unwrap();
    let tree = TreeRender::create(test_args(Arc::clone(&merge))).unwrap();

    let req = tree.launch_render().unwrap();
    let image = req.image().unwrap();
    assert_eq!(image.pixel(10, 10).unwrap(), vec![1.0; 4]);
    assert_eq!(image.pixel(70, 10).unwrap(), vec![0.25; 4]);
    assert_eq!(tree.stats().identity_rectangles, 2);
}

#[test]
fn armed_bypass_rerenders_over_cached_tiles() {
    let effect = Arc::new(StubEffect::source(test_rod(), 1.0));
    let src = Node::new("src", Arc::clone(&effect) as Arc<dyn Effect>);
    let cache = crate::cache::image::TileCache::new(64);

    let mut first = test_args(Arc::clone(&src));
    first.cache = Some(Arc::clone(&cache));
    TreeRender::create(first).unwrap().launch_render().unwrap();
    assert_eq!(effect.render_call_count(), 1);

    // A second tree over the same cache finds everything rendered.
    let mut second = test_args(Arc::clone(&src));
    second.cache = Some(Arc::clone(&cache));
    TreeRender::create(second).unwrap().launch_render().unwrap();
    assert_eq!(effect.render_call_count(), 1);

    // Arming the by-pass invalidates the ROI and renders again.
    let mut third = test_args(Arc::clone(&src));
    third.cache = Some(Arc::clone(&cache));
    third.bypass_cache = true;
    TreeRender::create(third).unwrap().launch_render().unwrap();
    assert_eq!(effect.render_call_count(), 2);
}
