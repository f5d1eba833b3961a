use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::foundation::geometry::{Rect, RenderScale};
use crate::foundation::hash::Fnv1a64;
use crate::node::effect::{Distortion, FramesNeeded, IdentityResult, LayersInfo};

/// Resolved region of definition at one scale. `None` means the node has
/// no definition there (nothing connected upstream of a default RoD).
#[derive(Clone, Debug, PartialEq)]
pub struct RegionOfDefinitionResults {
    /// Canonical RoD.
    pub rod: Option<Rect>,
}

/// Resolved frames-needed answer, defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct FramesNeededResults {
    /// Frames wanted per input and view.
    pub frames: FramesNeeded,
}

/// Resolved layers answer, defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct LayersResults {
    /// Produced/needed planes and channel processing.
    pub layers: LayersInfo,
}

/// Memoized whole-RoD identity answer.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityResults {
    /// The identity answer.
    pub identity: IdentityResult,
}

/// Memoized distortion declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct DistortionResults {
    /// Declared inverse distortion, if any.
    pub distortion: Option<Distortion>,
}

/// Key of a memoized action result: the node's frame/view hash, the
/// combined render scale, the owning plugin and an action discriminant.
pub(crate) fn action_result_key(
    frame_view_hash: u64,
    scale: RenderScale,
    plugin_id: &str,
    action_tag: u8,
) -> u64 {
    let mut h = Fnv1a64::new(Fnv1a64::OFFSET_BASIS ^ u64::from(action_tag));
    h.write_u64(frame_view_hash);
    let (sx, sy) = scale.to_hash_bits();
    h.write_u64(sx);
    h.write_u64(sy);
    h.write_bytes(plugin_id.as_bytes());
    h.finish()
}

pub(crate) const TAG_ROD: u8 = 1;
pub(crate) const TAG_FRAMES: u8 = 2;
pub(crate) const TAG_LAYERS: u8 = 3;
pub(crate) const TAG_IDENTITY: u8 = 4;
pub(crate) const TAG_DISTORTION: u8 = 5;

/// Per-render memo of action results. Repeated calls with the same key hit
/// the memo instead of the plugin; records also get pinned on the request
/// that produced them so dependents read them without rekeying.
#[derive(Default)]
pub(crate) struct ActionResultsStore {
    rod: Mutex<HashMap<u64, Arc<RegionOfDefinitionResults>>>,
    frames: Mutex<HashMap<u64, Arc<FramesNeededResults>>>,
    layers: Mutex<HashMap<u64, Arc<LayersResults>>>,
    identity: Mutex<HashMap<u64, Arc<IdentityResults>>>,
    distortion: Mutex<HashMap<u64, Arc<DistortionResults>>>,
}

impl ActionResultsStore {
    pub(crate) fn rod(&self, key: u64) -> Option<Arc<RegionOfDefinitionResults>> {
        self.rod.lock().expect("results lock").get(&key).cloned()
    }

    pub(crate) fn put_rod(&self, key: u64, v: Arc<RegionOfDefinitionResults>) {
        self.rod.lock().expect("results lock").insert(key, v);
    }

    pub(crate) fn frames(&self, key: u64) -> Option<Arc<FramesNeededResults>> {
        self.frames.lock().expect("results lock").get(&key).cloned()
    }

    pub(crate) fn put_frames(&self, key: u64, v: Arc<FramesNeededResults>) {
        self.frames.lock().expect("results lock").insert(key, v);
    }

    pub(crate) fn layers(&self, key: u64) -> Option<Arc<LayersResults>> {
        self.layers.lock().expect("results lock").get(&key).cloned()
    }

    pub(crate) fn put_layers(&self, key: u64, v: Arc<LayersResults>) {
        self.layers.lock().expect("results lock").insert(key, v);
    }

    pub(crate) fn identity(&self, key: u64) -> Option<Arc<IdentityResults>> {
        self.identity.lock().expect("results lock").get(&key).cloned()
    }

    pub(crate) fn put_identity(&self, key: u64, v: Arc<IdentityResults>) {
        self.identity.lock().expect("results lock").insert(key, v);
    }

    pub(crate) fn distortion(&self, key: u64) -> Option<Arc<DistortionResults>> {
        self.distortion.lock().expect("results lock").get(&key).cloned()
    }

    pub(crate) fn put_distortion(&self, key: u64, v: Arc<DistortionResults>) {
        self.distortion.lock().expect("results lock").insert(key, v);
    }
}
