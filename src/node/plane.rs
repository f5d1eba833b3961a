use serde::{Deserialize, Serialize};

use crate::foundation::config::quantize_time;

/// A frame time on the timeline. Fractional times are legal (retimers
/// produce them); times closer than the engine epsilon compare equal for
/// request and cache keying via [`TimeValue::quantized`].
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeValue(pub f64);

impl TimeValue {
    /// Epsilon-quantized key for maps and hashes.
    pub fn quantized(self) -> i64 {
        quantize_time(self.0)
    }

    /// Nearest integer frame. Plugins that cannot render fractional times
    /// get their request time rounded with this.
    pub fn rounded(self) -> TimeValue {
        TimeValue((self.0 + 0.5).floor())
    }

    /// True when the time has no fractional part.
    pub fn is_integer(self) -> bool {
        self.0.fract() == 0.0
    }
}

impl From<f64> for TimeValue {
    fn from(v: f64) -> Self {
        TimeValue(v)
    }
}

/// Index of a view in a multi-view project (stereo, multi-cam).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ViewIdx(pub u32);

/// An image plane a node can produce or consume (color, motion vectors,
/// arbitrary AOVs). Identity is the plane id plus its channel count.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaneDesc {
    id: String,
    channels: u8,
}

impl PlaneDesc {
    /// An arbitrary plane with `channels` components (1 to 4).
    pub fn new(id: impl Into<String>, channels: u8) -> Self {
        Self { id: id.into(), channels: channels.clamp(1, 4) }
    }

    /// The standard 4-channel color plane.
    pub fn rgba() -> Self {
        Self::new("color.rgba", 4)
    }

    /// A single-channel alpha plane.
    pub fn alpha() -> Self {
        Self::new("color.alpha", 1)
    }

    /// Plane identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Components per pixel.
    pub fn channel_count(&self) -> usize {
        usize::from(self.channels)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/node/plane.rs"]
mod tests;
