use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::cache::tiles::{TileState, TileStateMap};
use crate::foundation::error::{RenderError, RenderResult};
use crate::foundation::geometry::RectI;
use crate::node::plane::PlaneDesc;

/// Key of a cached image: one node output at one frame/view (folded into
/// the hash), one plane, one scale, one quality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageKey {
    /// [`Node::frame_view_hash`] of the producing node.
    ///
    /// [`Node::frame_view_hash`]: crate::node::node::Node::frame_view_hash
    pub node_hash: u64,
    /// Plane held by the image.
    pub plane: PlaneDesc,
    /// Mipmap level.
    pub mip_level: u32,
    /// Proxy scale bit patterns.
    pub proxy_bits: (u64, u64),
    /// Draft-quality images never mix with full-quality ones.
    pub draft: bool,
}

/// Where an image's pixels live.
#[derive(Debug)]
enum Storage {
    /// Interleaved f32 channels, row-major from the bottom-left of bounds.
    Cpu(RwLock<Vec<f32>>),
    /// Texture owned by a GL context; opaque to the engine.
    Gl {
        /// Host texture name.
        texture: u64,
        /// Owning context id.
        context_id: u64,
    },
}

/// Tile bookkeeping attached to an image buffer. Shared through the
/// [`TileCache`] when the image is cached, private otherwise, so render
/// code tracks progress the same way in both cases.
pub struct CacheEntry {
    state: Mutex<TileStateMap>,
    cv: Condvar,
}

impl CacheEntry {
    fn new(bounds: &RectI, tile_size: i32) -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            state: Mutex::new(TileStateMap::new(bounds, tile_size)),
            cv: Condvar::new(),
        })
    }
}

#[derive(Debug)]
struct ImageInner {
    bounds: RectI,
    plane: PlaneDesc,
    storage: Storage,
    entry: Arc<CacheEntry>,
    cached: bool,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry").finish_non_exhaustive()
    }
}

/// A reference-counted image buffer plus its tile states. Cloning shares
/// the pixels. Pixel access goes through row operations so concurrent
/// renders of disjoint tiles stay safe without unsafe code.
#[derive(Clone, Debug)]
pub struct Image(Arc<ImageInner>);

impl Image {
    /// Allocates a zeroed CPU image over `bounds`.
    pub fn new_cpu(bounds: &RectI, plane: PlaneDesc, tile_size: i32) -> Image {
        let len = bounds.area().max(0) as usize * plane.channel_count();
        Image(Arc::new(ImageInner {
            bounds: *bounds,
            plane,
            storage: Storage::Cpu(RwLock::new(vec![0.0; len])),
            entry: CacheEntry::new(bounds, tile_size),
            cached: false,
        }))
    }

    /// Wraps a host-owned GL texture.
    pub fn new_gl(
        bounds: &RectI,
        plane: PlaneDesc,
        tile_size: i32,
        texture: u64,
        context_id: u64,
    ) -> Image {
        Image(Arc::new(ImageInner {
            bounds: *bounds,
            plane,
            storage: Storage::Gl { texture, context_id },
            entry: CacheEntry::new(bounds, tile_size),
            cached: false,
        }))
    }

    fn new_cached(bounds: &RectI, plane: PlaneDesc, tile_size: i32) -> Image {
        let len = bounds.area().max(0) as usize * plane.channel_count();
        Image(Arc::new(ImageInner {
            bounds: *bounds,
            plane,
            storage: Storage::Cpu(RwLock::new(vec![0.0; len])),
            entry: CacheEntry::new(bounds, tile_size),
            cached: true,
        }))
    }

    /// Pixel bounds.
    pub fn bounds(&self) -> &RectI {
        &self.0.bounds
    }

    /// Plane held by the image.
    pub fn plane(&self) -> &PlaneDesc {
        &self.0.plane
    }

    /// Components per pixel.
    pub fn channel_count(&self) -> usize {
        self.0.plane.channel_count()
    }

    /// True when the buffer is shared through a [`TileCache`].
    pub fn is_cached(&self) -> bool {
        self.0.cached
    }

    /// True for CPU-backed storage.
    pub fn is_cpu(&self) -> bool {
        matches!(self.0.storage, Storage::Cpu(_))
    }

    /// GL texture and owning context, for GL storage.
    pub fn gl_texture(&self) -> Option<(u64, u64)> {
        match self.0.storage {
            Storage::Gl { texture, context_id } => Some((texture, context_id)),
            Storage::Cpu(_) => None,
        }
    }

    // --- tile bookkeeping -------------------------------------------------

    /// Claims every unrendered tile touching `rect` for `token`. Returns
    /// the claimed tile rects and whether other tokens hold pending tiles
    /// in `rect`.
    pub fn claim_unrendered(&self, rect: &RectI, token: u64) -> (Vec<RectI>, bool) {
        self.0.entry.state.lock().expect("tile state lock").claim_unrendered(rect, token)
    }

    /// Flips tiles claimed with `token` inside `rect` to rendered and
    /// wakes waiters.
    pub fn mark_rendered(&self, rect: &RectI, token: u64) {
        self.0.entry.state.lock().expect("tile state lock").commit_pending(rect, token);
        self.0.entry.cv.notify_all();
    }

    /// Rolls back every tile claimed with `token` and wakes waiters, so
    /// another render can take the tiles over.
    pub fn mark_aborted(&self, token: u64) {
        self.0.entry.state.lock().expect("tile state lock").rollback_pending(token);
        self.0.entry.cv.notify_all();
    }

    /// Forces tiles touching `rect` back to unrendered (accumulating paint
    /// strokes invalidate the sub-region the user just edited).
    pub fn invalidate_rect(&self, rect: &RectI) {
        self.0.entry.state.lock().expect("tile state lock").set_rect(rect, TileState::NotRendered);
        self.0.entry.cv.notify_all();
    }

    /// Blocks until no tile in `rect` is pending under a foreign token.
    /// Returns true when the whole rect ended up rendered, false when the
    /// foreign render was rolled back and tiles need re-claiming.
    pub fn wait_for_pending_tiles(&self, rect: &RectI, token: u64) -> bool {
        let mut state = self.0.entry.state.lock().expect("tile state lock");
        while state.has_foreign_pending(rect, token) {
            state = self.0.entry.cv.wait(state).expect("tile state lock");
        }
        state.all_rendered(rect)
    }

    /// True when some tile in `rect` is pending under a foreign token.
    pub fn has_foreign_pending(&self, rect: &RectI, token: u64) -> bool {
        self.0.entry.state.lock().expect("tile state lock").has_foreign_pending(rect, token)
    }

    /// True when every tile touching `rect` is rendered.
    pub fn all_rendered(&self, rect: &RectI) -> bool {
        self.0.entry.state.lock().expect("tile state lock").all_rendered(rect)
    }

    /// Merges single-tile rects into a minimal rect list.
    pub fn reduce_tile_rects(&self, tiles: &[RectI]) -> Vec<RectI> {
        self.0.entry.state.lock().expect("tile state lock").reduce_to_rects(tiles)
    }

    // --- pixel operations (CPU storage) -----------------------------------

    fn cpu_storage(&self) -> RenderResult<&RwLock<Vec<f32>>> {
        match &self.0.storage {
            Storage::Cpu(buf) => Ok(buf),
            Storage::Gl { .. } => {
                Err(RenderError::failed("pixel operation on GL-backed image"))
            }
        }
    }

    fn offset_of(&self, x: i32, y: i32) -> usize {
        let b = &self.0.bounds;
        ((y - b.y1) as usize * b.width() as usize + (x - b.x1) as usize) * self.channel_count()
    }

    /// Channel values at `(x, y)`, `None` outside bounds or on GL storage.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Vec<f32>> {
        if !self.0.bounds.contains(x, y) {
            return None;
        }
        let buf = self.cpu_storage().ok()?.read().expect("image buffer lock");
        let o = self.offset_of(x, y);
        Some(buf[o..o + self.channel_count()].to_vec())
    }

    /// Clears `rect` (clipped to bounds) to zero. No-op on GL storage; the
    /// plugin owns texture contents there.
    pub fn fill_zero(&self, rect: &RectI) -> RenderResult<()> {
        self.fill_constant(rect, 0.0)
    }

    /// Writes `value` into every channel of `rect` (clipped to bounds).
    pub fn fill_constant(&self, rect: &RectI, value: f32) -> RenderResult<()> {
        if !self.is_cpu() {
            return Ok(());
        }
        let Some(rect) = rect.intersect(self.bounds()) else {
            return Ok(());
        };
        let c = self.channel_count();
        let mut buf = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            let o = self.offset_of(rect.x1, y);
            buf[o..o + rect.width() as usize * c].fill(value);
        }
        Ok(())
    }

    /// Copies the overlap of `rect`, `src.bounds()` and `self.bounds()`
    /// from `src`, matching up to the common channel count.
    pub fn copy_from(&self, src: &Image, rect: &RectI) -> RenderResult<()> {
        if !self.is_cpu() || !src.is_cpu() {
            return Err(RenderError::failed("cross-storage image copy is not supported"));
        }
        let Some(rect) = rect
            .intersect(self.bounds())
            .and_then(|r| r.intersect(src.bounds()))
        else {
            return Ok(());
        };
        let dst_c = self.channel_count();
        let src_c = src.channel_count();
        let c = dst_c.min(src_c);
        let src_buf = src.cpu_storage()?.read().expect("image buffer lock");
        let mut dst_buf = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let so = src.offset_of(x, y);
                let dof = self.offset_of(x, y);
                for k in 0..c {
                    dst_buf[dof + k] = src_buf[so + k];
                }
            }
        }
        Ok(())
    }

    /// Replaces NaN samples in `rect` with zero. Returns true when any NaN
    /// was found.
    pub fn fix_nans(&self, rect: &RectI) -> RenderResult<bool> {
        if !self.is_cpu() {
            return Ok(false);
        }
        let Some(rect) = rect.intersect(self.bounds()) else {
            return Ok(false);
        };
        let c = self.channel_count();
        let mut found = false;
        let mut buf = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            let o = self.offset_of(rect.x1, y);
            for v in &mut buf[o..o + rect.width() as usize * c] {
                if v.is_nan() {
                    *v = 0.0;
                    found = true;
                }
            }
        }
        Ok(found)
    }

    /// Restores channels the plugin did not process from the main input
    /// image (zero where no input is available).
    pub fn copy_unprocessed_channels(
        &self,
        rect: &RectI,
        process: [bool; 4],
        src: Option<&Image>,
    ) -> RenderResult<()> {
        if !self.is_cpu() || process.iter().all(|p| *p) {
            return Ok(());
        }
        let Some(rect) = rect.intersect(self.bounds()) else {
            return Ok(());
        };
        let c = self.channel_count();
        let src_buf = match src {
            Some(s) if s.is_cpu() => Some((s, s.cpu_storage()?.read().expect("image buffer lock"))),
            _ => None,
        };
        let mut dst = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let o = self.offset_of(x, y);
                for (k, processed) in process.iter().enumerate().take(c) {
                    if *processed {
                        continue;
                    }
                    dst[o + k] = match &src_buf {
                        Some((s, buf)) if s.bounds().contains(x, y) && k < s.channel_count() => {
                            buf[s.offset_of(x, y) + k]
                        }
                        _ => 0.0,
                    };
                }
            }
        }
        Ok(())
    }

    /// Blends the rendered result against the main input by
    /// `mix * mask_alpha`: `dst = dst * a + src * (1 - a)`.
    pub fn apply_mask_mix(
        &self,
        rect: &RectI,
        mask: Option<&Image>,
        src: Option<&Image>,
        mix: f64,
    ) -> RenderResult<()> {
        if !self.is_cpu() {
            return Ok(());
        }
        let Some(rect) = rect.intersect(self.bounds()) else {
            return Ok(());
        };
        let c = self.channel_count();
        let mask_buf = match mask {
            Some(m) if m.is_cpu() => Some((m, m.cpu_storage()?.read().expect("image buffer lock"))),
            _ => None,
        };
        let src_buf = match src {
            Some(s) if s.is_cpu() => Some((s, s.cpu_storage()?.read().expect("image buffer lock"))),
            _ => None,
        };
        let mut dst = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let mask_a = match &mask_buf {
                    Some((m, buf)) if m.bounds().contains(x, y) => {
                        // Mask alpha is its last channel.
                        f64::from(buf[m.offset_of(x, y) + m.channel_count() - 1])
                    }
                    Some(_) => 0.0,
                    None => 1.0,
                };
                let a = (mix * mask_a).clamp(0.0, 1.0);
                let o = self.offset_of(x, y);
                for k in 0..c {
                    let src_v = match &src_buf {
                        Some((s, buf)) if s.bounds().contains(x, y) && k < s.channel_count() => {
                            f64::from(buf[s.offset_of(x, y) + k])
                        }
                        _ => 0.0,
                    };
                    dst[o + k] = (f64::from(dst[o + k]) * a + src_v * (1.0 - a)) as f32;
                }
            }
        }
        Ok(())
    }

    /// Box-filters `src` (at a finer mip) down into `rect` of this image.
    /// `mip_delta` is the number of halvings between the two.
    pub fn downscale_from(&self, src: &Image, rect: &RectI, mip_delta: u32) -> RenderResult<()> {
        if !self.is_cpu() || !src.is_cpu() {
            return Err(RenderError::failed("downscale requires CPU images"));
        }
        let Some(rect) = rect.intersect(self.bounds()) else {
            return Ok(());
        };
        let f = 1i32 << mip_delta.min(15);
        let c = self.channel_count().min(src.channel_count());
        let src_buf = src.cpu_storage()?.read().expect("image buffer lock");
        let mut dst = self.cpu_storage()?.write().expect("image buffer lock");
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let mut acc = [0.0f64; 4];
                let mut n = 0u32;
                for sy in (y * f)..(y * f + f) {
                    for sx in (x * f)..(x * f + f) {
                        if !src.bounds().contains(sx, sy) {
                            continue;
                        }
                        let so = src.offset_of(sx, sy);
                        for (k, a) in acc.iter_mut().enumerate().take(c) {
                            *a += f64::from(src_buf[so + k]);
                        }
                        n += 1;
                    }
                }
                let o = self.offset_of(x, y);
                if n > 0 {
                    for (k, a) in acc.iter().enumerate().take(c) {
                        dst[o + k] = (*a / f64::from(n)) as f32;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Process-wide shared image cache. Entries are allocated at tile-aligned
/// RoD bounds and shared between every render that keys to the same image,
/// which is what lets concurrent renders split one image's tiles.
pub struct TileCache {
    tile_size: i32,
    entries: Mutex<HashMap<ImageKey, Image>>,
}

impl TileCache {
    /// Creates a cache with the given tile edge length (power of two).
    pub fn new(tile_size: i32) -> Arc<TileCache> {
        Arc::new(TileCache { tile_size, entries: Mutex::new(HashMap::new()) })
    }

    /// Tile edge length.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    /// Returns the cached image for `key`, creating a zeroed CPU-backed
    /// one over `bounds` when absent. A cached image whose bounds no
    /// longer match is discarded and recreated (its holders keep the old
    /// buffer alive).
    pub fn fetch_or_create(&self, key: &ImageKey, bounds: &RectI, plane: &PlaneDesc) -> Image {
        let aligned = bounds.round_to_tile_grid(self.tile_size);
        let mut entries = self.entries.lock().expect("tile cache lock");
        if let Some(existing) = entries.get(key) {
            if existing.bounds() == &aligned {
                return existing.clone();
            }
        }
        let img = Image::new_cached(&aligned, plane.clone(), self.tile_size);
        entries.insert(key.clone(), img.clone());
        img
    }

    /// Looks up `key` without creating.
    pub fn get(&self, key: &ImageKey) -> Option<Image> {
        self.entries.lock().expect("tile cache lock").get(key).cloned()
    }

    /// Drops every entry. In-flight holders keep their buffers.
    pub fn clear(&self) {
        self.entries.lock().expect("tile cache lock").clear();
    }

    /// Number of resident entries.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("tile cache lock").len()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/image.rs"]
mod tests;
