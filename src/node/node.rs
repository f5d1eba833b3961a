use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::image::Image;
use crate::foundation::error::{RenderError, RenderResult};
use crate::foundation::hash::Fnv1a64;
use crate::node::effect::Effect;
use crate::node::plane::{TimeValue, ViewIdx};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> NodeId {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for hashing.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A loaded plugin. Nodes built from the same `Plugin` value share one
/// render lock, which is what serializes [`ThreadSafety::Unsafe`] plugins
/// across all their instances.
///
/// [`ThreadSafety::Unsafe`]: crate::node::effect::ThreadSafety::Unsafe
#[derive(Debug)]
pub struct Plugin {
    id: String,
    render_lock: Mutex<()>,
}

impl Plugin {
    /// Registers a plugin identity.
    pub fn new(id: impl Into<String>) -> Arc<Plugin> {
        Arc::new(Plugin { id: id.into(), render_lock: Mutex::new(()) })
    }

    /// Plugin identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn render_lock(&self) -> &Mutex<()> {
        &self.render_lock
    }
}

/// A node in the compositing graph: an [`Effect`] instance plus its input
/// connections and the per-instance state the scheduler needs (persistent
/// message slot, instance render lock, GL attach bookkeeping).
///
/// Graph topology is expected to be settled before a render launches;
/// connecting inputs while a tree renders is not supported.
pub struct Node {
    id: NodeId,
    label: String,
    plugin: Arc<Plugin>,
    effect: Arc<dyn Effect>,
    inputs: Mutex<Vec<Option<Arc<Node>>>>,
    instance_lock: Mutex<()>,
    persistent_message: Mutex<Option<String>>,
    attached_gl: Mutex<HashSet<u64>>,
    accum_image: Mutex<Option<Image>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("plugin", &self.plugin.id)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a node whose plugin identity is taken from the effect. Each
    /// such node gets its own [`Plugin`] value; use [`Node::with_plugin`]
    /// to share one across instances.
    pub fn new(label: impl Into<String>, effect: Arc<dyn Effect>) -> Arc<Node> {
        let plugin = Plugin::new(effect.plugin_id().to_owned());
        Self::with_plugin(label, effect, plugin)
    }

    /// Creates a node bound to an explicit plugin registration.
    pub fn with_plugin(
        label: impl Into<String>,
        effect: Arc<dyn Effect>,
        plugin: Arc<Plugin>,
    ) -> Arc<Node> {
        let inputs = vec![None; effect.input_count()];
        Arc::new(Node {
            id: NodeId::next(),
            label: label.into(),
            plugin,
            effect,
            inputs: Mutex::new(inputs),
            instance_lock: Mutex::new(()),
            persistent_message: Mutex::new(None),
            attached_gl: Mutex::new(HashSet::new()),
            accum_image: Mutex::new(None),
        })
    }

    /// Node identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// User-facing label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The plugin this node instantiates.
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    /// The effect implementation.
    pub fn effect(&self) -> &Arc<dyn Effect> {
        &self.effect
    }

    /// Number of input slots.
    pub fn input_count(&self) -> usize {
        self.inputs.lock().expect("node inputs lock").len()
    }

    /// Connects `upstream` into slot `idx`.
    pub fn connect_input(&self, idx: usize, upstream: &Arc<Node>) -> RenderResult<()> {
        let mut inputs = self.inputs.lock().expect("node inputs lock");
        if idx >= inputs.len() {
            return Err(RenderError::failed(format!(
                "input {idx} out of range for node {} ({} inputs)",
                self.label,
                inputs.len()
            )));
        }
        inputs[idx] = Some(Arc::clone(upstream));
        Ok(())
    }

    /// Disconnects slot `idx` if it exists.
    pub fn disconnect_input(&self, idx: usize) {
        let mut inputs = self.inputs.lock().expect("node inputs lock");
        if let Some(slot) = inputs.get_mut(idx) {
            *slot = None;
        }
    }

    /// The node connected to slot `idx`, if any.
    pub fn input(&self, idx: usize) -> Option<Arc<Node>> {
        self.inputs.lock().expect("node inputs lock").get(idx).cloned().flatten()
    }

    /// First connected input that is not the mask input. This is the
    /// "main" input post-processing copies unprocessed channels from.
    pub fn main_input(&self) -> Option<(usize, Arc<Node>)> {
        let mask = self.effect.mask_input();
        let inputs = self.inputs.lock().expect("node inputs lock");
        inputs
            .iter()
            .enumerate()
            .find_map(|(i, n)| match n {
                Some(n) if Some(i) != mask => Some((i, Arc::clone(n))),
                _ => None,
            })
    }

    /// Latched plugin diagnostic shown by the host until cleared.
    pub fn persistent_message(&self) -> Option<String> {
        self.persistent_message.lock().expect("persistent message lock").clone()
    }

    /// Latches a diagnostic message on the node.
    pub fn set_persistent_message(&self, msg: impl Into<String>) {
        *self.persistent_message.lock().expect("persistent message lock") = Some(msg.into());
    }

    /// Clears the latched diagnostic.
    pub fn clear_persistent_message(&self) {
        *self.persistent_message.lock().expect("persistent message lock") = None;
    }

    pub(crate) fn instance_lock(&self) -> &Mutex<()> {
        &self.instance_lock
    }

    /// Records that `ctx_id` is used with this node. Returns true on the
    /// first attach, when the plugin must be notified.
    pub(crate) fn mark_gl_attached(&self, ctx_id: u64) -> bool {
        self.attached_gl.lock().expect("gl attach lock").insert(ctx_id)
    }

    pub(crate) fn unmark_gl_attached(&self, ctx_id: u64) {
        self.attached_gl.lock().expect("gl attach lock").remove(&ctx_id);
    }

    /// Buffer an accumulating paint node keeps across successive stroke
    /// renders.
    pub fn accumulation_image(&self) -> Option<Image> {
        self.accum_image.lock().expect("accum image lock").clone()
    }

    pub(crate) fn set_accumulation_image(&self, img: Image) {
        *self.accum_image.lock().expect("accum image lock") = Some(img);
    }

    /// Drops the accumulation buffer (stroke ended or was cleared).
    pub fn clear_accumulation_image(&self) {
        *self.accum_image.lock().expect("accum image lock") = None;
    }

    /// Hash identifying this node's output at one frame and view: node
    /// identity, plugin, quantized time, view and the effect's variant
    /// hash. Keys requests, memoized actions and cached images.
    pub fn frame_view_hash(&self, time: TimeValue, view: ViewIdx) -> u64 {
        let mut h = Fnv1a64::new_default();
        h.write_u64(self.id.as_u64());
        h.write_bytes(self.plugin.id.as_bytes());
        h.write_i64(time.quantized());
        h.write_u32(view.0);
        h.write_u64(self.effect.variant_hash(time, view));
        h.finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/node/node.rs"]
mod tests;
