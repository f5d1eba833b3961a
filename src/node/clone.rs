use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::foundation::geometry::RenderScale;
use crate::graph::request::FrameViewRequest;
use crate::node::node::Node;
use crate::node::plane::{PlaneDesc, TimeValue, ViewIdx};

/// Key of a request within one render clone: requests for the same plane
/// at the same scale deduplicate here.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RequestKey {
    pub plane: PlaneDesc,
    pub mip_level: u32,
    pub proxy_bits: (u64, u64),
}

impl RequestKey {
    pub(crate) fn new(plane: &PlaneDesc, mip_level: u32, proxy_scale: RenderScale) -> Self {
        Self {
            plane: plane.clone(),
            mip_level,
            proxy_bits: proxy_scale.to_hash_bits(),
        }
    }
}

/// One node pinned at one (time, view) inside one render tree. All request
/// deduplication for that coordinate funnels through the clone's request
/// map: a second requester for the same plane/scale gets the first one's
/// [`FrameViewRequest`] back.
///
/// Back-references are weak so a request dropped by the scheduler (its
/// image consumed and released) does not keep the whole graph alive.
pub struct RenderClone {
    node: Arc<Node>,
    time: TimeValue,
    view: ViewIdx,
    requests: Mutex<HashMap<RequestKey, Weak<FrameViewRequest>>>,
}

impl RenderClone {
    pub(crate) fn new(node: Arc<Node>, time: TimeValue, view: ViewIdx) -> Arc<RenderClone> {
        Arc::new(RenderClone { node, time, view, requests: Mutex::new(HashMap::new()) })
    }

    /// The node this clone pins.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Pinned frame time.
    pub fn time(&self) -> TimeValue {
        self.time
    }

    /// Pinned view.
    pub fn view(&self) -> ViewIdx {
        self.view
    }

    /// Live request for `key`, if one was registered and is still alive.
    pub(crate) fn find_request(&self, key: &RequestKey) -> Option<Arc<FrameViewRequest>> {
        self.requests.lock().expect("clone requests lock").get(key).and_then(Weak::upgrade)
    }

    /// Registers a freshly created request under `key`.
    pub(crate) fn remember_request(&self, key: RequestKey, req: &Arc<FrameViewRequest>) {
        self.requests.lock().expect("clone requests lock").insert(key, Arc::downgrade(req));
    }
}

#[cfg(test)]
#[path = "../../tests/unit/node/clone.rs"]
mod tests;
