use super::*;
use crate::foundation::geometry::RenderScale;
use crate::node::clone::RenderClone;
use crate::node::node::Node;
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};
use crate::testing::{test_rod, StubEffect};

fn make_request() -> Arc<FrameViewRequest> {
    let node = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let clone = RenderClone::new(node, TimeValue(1.0), ViewIdx(0));
    FrameViewRequest::new(clone, PlaneDesc::rgba(), 0, RenderScale::ONE, false)
}

#[test]
fn register_is_idempotent() {
    let exec = ExecutionData::new();
    let req = make_request();
    exec.register_task(&req);
    exec.register_task(&req);
    assert_eq!(exec.outstanding_count(), 1);
    assert!(exec.get(req.id()).is_some());
}

#[test]
fn ready_queue_orders_by_listener_count() {
    let exec = ExecutionData::new();
    let few = make_request();
    let many = make_request();
    let consumer_a = make_request();
    let consumer_b = make_request();
    many.add_listener(exec.id(), consumer_a.id());
    many.add_listener(exec.id(), consumer_b.id());
    few.add_listener(exec.id(), consumer_a.id());
    exec.register_task(&few);
    exec.register_task(&many);
    // Queued in the "wrong" order; drained by priority.
    exec.make_ready(&few);
    exec.make_ready(&many);

    let drained = exec.take_ready();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].id(), many.id());
    assert_eq!(drained[1].id(), few.id());
    assert!(!exec.has_ready());
}

#[test]
fn make_ready_deduplicates() {
    let exec = ExecutionData::new();
    let req = make_request();
    exec.register_task(&req);
    exec.make_ready(&req);
    exec.make_ready(&req);
    assert_eq!(exec.take_ready().len(), 1);
}

#[test]
fn first_failure_wins_sticky() {
    let exec = ExecutionData::new();
    let a = make_request();
    let b = make_request();
    let c = make_request();
    exec.register_task(&a);
    exec.register_task(&b);
    exec.register_task(&c);
    exec.task_done(Status::Ok);
    exec.task_done(Status::OutOfMemory);
    exec.task_done(Status::Aborted);
    assert_eq!(exec.sticky_status(), Status::OutOfMemory);
    assert_eq!(exec.outstanding_count(), 0);
}

#[test]
fn input_disconnected_does_not_poison_the_pass() {
    let exec = ExecutionData::new();
    let req = make_request();
    exec.register_task(&req);
    exec.task_done(Status::InputDisconnected);
    assert_eq!(exec.sticky_status(), Status::Ok);
    assert_eq!(exec.wait_progress(), PassProgress::Done);
}

#[test]
fn wait_progress_reports_ready_then_done() {
    let exec = ExecutionData::new();
    let req = make_request();
    exec.register_task(&req);
    exec.make_ready(&req);
    assert_eq!(exec.wait_progress(), PassProgress::Ready);
    exec.take_ready();
    exec.task_done(Status::Ok);
    assert_eq!(exec.wait_progress(), PassProgress::Done);
}

#[test]
fn wait_progress_reports_failure_over_ready() {
    let exec = ExecutionData::new();
    let a = make_request();
    let b = make_request();
    exec.register_task(&a);
    exec.register_task(&b);
    exec.make_ready(&a);
    exec.task_done(Status::Failed);
    assert_eq!(exec.wait_progress(), PassProgress::Failed(Status::Failed));
}
