use serde::{Deserialize, Serialize};

/// Edge length of a cache tile, in pixels. Power of two.
pub const DEFAULT_TILE_SIZE: i32 = 64;

/// Upper bound on distinct input frames pre-fetched per input and view when
/// a plugin reports the frames it needs. Animated frame ranges can ask for
/// arbitrarily many frames; past this count the range is truncated.
pub const MAX_FRAMES_NEEDED_PRE_FETCHING: usize = 3;

/// Minimum pixel area a rectangle must have for host frame threading to
/// split it into one band per estimated worker.
pub const FRAME_THREADING_MIN_AREA: i64 = 4096;

/// Two frame times closer than this render identically and share a request.
pub const TIME_EQUALITY_EPS: f64 = 1e-5;

/// Immutable engine tuning, snapshotted when a render tree is created so a
/// settings change mid-flight cannot tear an execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Cache tile edge length in pixels. Must be a power of two.
    pub tile_size: i32,
    /// Worker threads for a pool created by the engine. Zero picks the
    /// available hardware parallelism.
    pub pool_threads: usize,
    /// Scan rendered tiles for NaNs and repair them to zero.
    pub handle_nans: bool,
    /// Allow distortion-capable chains to concatenate into a single
    /// transform applied at the bottom of the chain.
    pub enable_concatenations: bool,
    /// Per-input, per-view cap on pre-fetched frames.
    pub max_frames_needed_prefetch: usize,
    /// Area threshold for splitting a rectangle across frame threads.
    pub frame_threading_min_area: i64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            pool_threads: 0,
            handle_nans: true,
            enable_concatenations: true,
            max_frames_needed_prefetch: MAX_FRAMES_NEEDED_PRE_FETCHING,
            frame_threading_min_area: FRAME_THREADING_MIN_AREA,
        }
    }
}

impl RenderConfig {
    /// Worker count after resolving `pool_threads == 0` to the hardware.
    pub fn effective_pool_threads(&self) -> usize {
        if self.pool_threads > 0 {
            self.pool_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        }
    }
}

/// Quantizes a frame time so that times closer than [`TIME_EQUALITY_EPS`]
/// key identically in request and cache maps.
pub fn quantize_time(time: f64) -> i64 {
    (time / TIME_EQUALITY_EPS).round() as i64
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
