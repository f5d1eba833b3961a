use super::*;
use crate::foundation::geometry::RenderScale;
use crate::node::plane::PlaneDesc;
use crate::testing::{test_rod, StubEffect};

fn make_clone() -> Arc<RenderClone> {
    let node = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    RenderClone::new(node, TimeValue(1.0), ViewIdx(0))
}

#[test]
fn remembered_requests_deduplicate() {
    let clone = make_clone();
    let key = RequestKey::new(&PlaneDesc::rgba(), 0, RenderScale::ONE);
    assert!(clone.find_request(&key).is_none());

    let req = FrameViewRequest::new(Arc::clone(&clone), PlaneDesc::rgba(), 0, RenderScale::ONE, false);
    clone.remember_request(key.clone(), &req);
    let found = clone.find_request(&key).unwrap();
    assert_eq!(found.id(), req.id());
}

#[test]
fn distinct_planes_and_scales_key_separately() {
    let clone = make_clone();
    let rgba = RequestKey::new(&PlaneDesc::rgba(), 0, RenderScale::ONE);
    let alpha = RequestKey::new(&PlaneDesc::alpha(), 0, RenderScale::ONE);
    let mip1 = RequestKey::new(&PlaneDesc::rgba(), 1, RenderScale::ONE);
    assert_ne!(rgba, alpha);
    assert_ne!(rgba, mip1);

    let req = FrameViewRequest::new(Arc::clone(&clone), PlaneDesc::rgba(), 0, RenderScale::ONE, false);
    clone.remember_request(rgba, &req);
    assert!(clone.find_request(&alpha).is_none());
    assert!(clone.find_request(&mip1).is_none());
}

#[test]
fn dropped_requests_are_not_resurrected() {
    let clone = make_clone();
    let key = RequestKey::new(&PlaneDesc::rgba(), 0, RenderScale::ONE);
    let req = FrameViewRequest::new(Arc::clone(&clone), PlaneDesc::rgba(), 0, RenderScale::ONE, false);
    clone.remember_request(key.clone(), &req);
    drop(req);
    assert!(clone.find_request(&key).is_none());
}
