use super::*;
use crate::testing::{test_rod, StubEffect};

#[test]
fn connect_and_disconnect_inputs() {
    let src = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let filter = Node::new("filter", Arc::new(StubEffect::filter()));
    assert_eq!(filter.input_count(), 1);
    assert!(filter.input(0).is_none());

    filter.connect_input(0, &src).unwrap();
    assert_eq!(filter.input(0).unwrap().id(), src.id());

    filter.disconnect_input(0);
    assert!(filter.input(0).is_none());

    assert!(filter.connect_input(5, &src).is_err());
}

#[test]
fn main_input_skips_the_mask() {
    let src = Node::new("src", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let mask = Node::new("mask", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let merge =
        Node::new("merge", Arc::new(StubEffect::multi_input(2).with_mask_input(0)));
    merge.connect_input(0, &mask).unwrap();
    merge.connect_input(1, &src).unwrap();
    let (idx, main) = merge.main_input().unwrap();
    assert_eq!(idx, 1);
    assert_eq!(main.id(), src.id());
}

#[test]
fn nodes_from_one_plugin_share_the_render_lock() {
    let plugin = Plugin::new("test.shared");
    let a = Node::with_plugin("a", Arc::new(StubEffect::filter()), Arc::clone(&plugin));
    let b = Node::with_plugin("b", Arc::new(StubEffect::filter()), Arc::clone(&plugin));
    assert!(Arc::ptr_eq(a.plugin(), b.plugin()));
    let c = Node::new("c", Arc::new(StubEffect::filter()));
    assert!(!Arc::ptr_eq(a.plugin(), c.plugin()));
}

#[test]
fn persistent_message_latches() {
    let n = Node::new("n", Arc::new(StubEffect::filter()));
    assert!(n.persistent_message().is_none());
    n.set_persistent_message("rendered NaN values");
    assert_eq!(n.persistent_message().unwrap(), "rendered NaN values");
    n.clear_persistent_message();
    assert!(n.persistent_message().is_none());
}

#[test]
fn frame_view_hash_varies_with_time_and_view() {
    let n = Node::new("n", Arc::new(StubEffect::source(test_rod(), 1.0)));
    let base = n.frame_view_hash(TimeValue(1.0), ViewIdx(0));
    assert_eq!(base, n.frame_view_hash(TimeValue(1.0), ViewIdx(0)));
    assert_ne!(base, n.frame_view_hash(TimeValue(2.0), ViewIdx(0)));
    assert_ne!(base, n.frame_view_hash(TimeValue(1.0), ViewIdx(1)));
}

#[test]
fn frame_view_hash_separates_instances() {
    let effect = Arc::new(StubEffect::source(test_rod(), 1.0));
    let a = Node::new("a", Arc::clone(&effect) as Arc<dyn Effect>);
    let b = Node::new("b", effect);
    assert_ne!(
        a.frame_view_hash(TimeValue(1.0), ViewIdx(0)),
        b.frame_view_hash(TimeValue(1.0), ViewIdx(0))
    );
}
