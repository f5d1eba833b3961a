use super::*;
use crate::graph::exec::ExecutionData;
use crate::testing::{test_rod, StubEffect};

fn make_request() -> Arc<FrameViewRequest> {
    let node = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let clone = RenderClone::new(node, TimeValue(1.0), ViewIdx(0));
    FrameViewRequest::new(clone, PlaneDesc::rgba(), 0, RenderScale::ONE, false)
}

#[test]
fn lifecycle_not_rendered_to_rendered() {
    let req = make_request();
    assert_eq!(req.status(), RequestStatus::NotRendered);
    assert_eq!(req.notify_render_started(), RequestStatus::NotRendered);
    assert_eq!(req.status(), RequestStatus::Pending);
    req.notify_render_finished(Status::Ok);
    assert_eq!(req.status(), RequestStatus::Rendered);
    assert_eq!(req.terminal_status(), Status::Ok);
}

#[test]
#[should_panic(expected = "already pending")]
fn starting_a_pending_request_is_a_bug() {
    let req = make_request();
    req.notify_render_started();
    req.notify_render_started();
}

#[test]
#[should_panic(expected = "without being started")]
fn settling_an_unstarted_request_is_a_bug() {
    let req = make_request();
    req.notify_render_finished(Status::Ok);
}

#[test]
fn roi_accumulates_by_union() {
    let req = make_request();
    assert!(req.roi().is_none());
    assert!(req.grow_roi(&Rect::new(0.0, 0.0, 10.0, 10.0)));
    // A covered ROI does not grow.
    assert!(!req.grow_roi(&Rect::new(2.0, 2.0, 8.0, 8.0)));
    assert!(req.grow_roi(&Rect::new(5.0, 5.0, 20.0, 20.0)));
    assert_eq!(req.roi().unwrap(), Rect::new(0.0, 0.0, 20.0, 20.0));
}

#[test]
fn rearm_reopens_only_settled_requests() {
    let req = make_request();
    req.rearm_for_more_roi();
    assert_eq!(req.status(), RequestStatus::NotRendered);
    req.notify_render_started();
    req.rearm_for_more_roi();
    assert_eq!(req.status(), RequestStatus::Pending);
    req.notify_render_finished(Status::Ok);
    req.rearm_for_more_roi();
    assert_eq!(req.status(), RequestStatus::NotRendered);
}

#[test]
fn bypass_cache_fires_once() {
    let node = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let clone = RenderClone::new(node, TimeValue(1.0), ViewIdx(0));
    let req = FrameViewRequest::new(clone, PlaneDesc::rgba(), 0, RenderScale::ONE, true);
    assert!(req.check_if_bypass_cache_enabled_and_turn_off());
    assert!(!req.check_if_bypass_cache_enabled_and_turn_off());
}

#[test]
fn oom_fallback_fires_once() {
    let req = make_request();
    assert!(req.take_fallback_once());
    assert!(!req.take_fallback_once());
}

#[test]
fn dependency_edges_settle_and_pin() {
    let exec = ExecutionData::new();
    let pass = exec.id();
    let dep_a = make_request();
    let dep_b = make_request();
    let req = make_request();

    req.add_dependency(pass, &dep_a);
    req.add_dependency(pass, &dep_b);
    dep_a.add_listener(pass, req.id());
    dep_b.add_listener(pass, req.id());
    assert_eq!(req.dependency_count(pass), 2);
    assert_eq!(dep_a.listener_count(pass), 1);

    assert_eq!(req.mark_dependency_as_rendered(pass, &dep_a), 1);
    assert_eq!(req.mark_dependency_as_rendered(pass, &dep_b), 0);
    let resolved = req.resolved_dependencies(pass);
    assert_eq!(resolved.len(), 2);
    assert!(resolved.iter().any(|d| d.id() == dep_a.id()));

    req.clear_resolved_dependencies(pass);
    assert!(req.resolved_dependencies(pass).is_empty());
}

#[test]
fn duplicate_listeners_collapse() {
    let exec = ExecutionData::new();
    let pass = exec.id();
    let dep = make_request();
    let req = make_request();
    dep.add_listener(pass, req.id());
    dep.add_listener(pass, req.id());
    assert_eq!(dep.listener_count(pass), 1);
    assert_eq!(dep.total_listener_count(), 1);
}

#[test]
fn pass_through_copies_image_roi_and_terminal() {
    let exec = ExecutionData::new();
    let pass = exec.id();
    let dep = make_request();
    let req = make_request();
    req.mark_pass_through();
    req.add_dependency(pass, &dep);

    let img = Image::new_cpu(&crate::foundation::geometry::RectI::new(0, 0, 64, 64), PlaneDesc::rgba(), 64);
    dep.set_image(img);
    dep.grow_roi(&Rect::new(0.0, 0.0, 64.0, 64.0));
    dep.notify_render_started();
    dep.notify_render_finished(Status::Ok);

    assert_eq!(req.mark_dependency_as_rendered(pass, &dep), 0);
    assert!(req.image().is_some());
    assert_eq!(req.roi().unwrap(), Rect::new(0.0, 0.0, 64.0, 64.0));
    assert_eq!(req.terminal_status(), Status::Ok);
}

#[test]
fn distortion_stack_accumulates() {
    let req = make_request();
    assert!(req.distortion_stack().is_empty());
    let mut stack = DistortionStack::new();
    stack.push(DistortionTransform::Matrix(crate::foundation::geometry::Mat3::translation(1.0, 2.0)));
    stack.push(DistortionTransform::Matrix(crate::foundation::geometry::Mat3::IDENTITY));
    req.set_distortion_stack(stack);
    assert_eq!(req.distortion_stack().len(), 2);
}
