use crate::foundation::geometry::RectI;

/// Render state of one cache tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileState {
    /// Nobody rendered or claimed the tile.
    NotRendered,
    /// Claimed by the execution pass with this token; its pixels are being
    /// produced right now.
    Pending(u64),
    /// Pixels are valid.
    Rendered,
}

/// Per-tile render states over a tile-aligned pixel region. This is the
/// unit of sharing between concurrent renders of one image: claim tiles,
/// render them, flip them to rendered, or roll them back on failure.
#[derive(Clone, Debug)]
pub struct TileStateMap {
    bounds: RectI,
    tile_size: i32,
    tiles_x: i32,
    states: Vec<TileState>,
}

impl TileStateMap {
    /// Builds an all-unrendered map covering `bounds` rounded outward to
    /// the tile grid.
    pub fn new(bounds: &RectI, tile_size: i32) -> Self {
        let bounds = bounds.round_to_tile_grid(tile_size);
        let tiles_x = bounds.width() / tile_size;
        let tiles_y = bounds.height() / tile_size;
        Self {
            bounds,
            tile_size,
            tiles_x,
            states: vec![TileState::NotRendered; (tiles_x * tiles_y).max(0) as usize],
        }
    }

    /// Tile-aligned bounds of the map.
    pub fn bounds(&self) -> &RectI {
        &self.bounds
    }

    /// Tile edge length.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    fn index(&self, tx: i32, ty: i32) -> usize {
        (ty * self.tiles_x + tx) as usize
    }

    fn tile_range(&self, rect: &RectI) -> Option<(i32, i32, i32, i32)> {
        let clipped = rect.intersect(&self.bounds)?;
        let t = self.tile_size;
        Some((
            (clipped.x1 - self.bounds.x1) / t,
            (clipped.y1 - self.bounds.y1) / t,
            (clipped.x2 - self.bounds.x1 + t - 1) / t,
            (clipped.y2 - self.bounds.y1 + t - 1) / t,
        ))
    }

    /// Pixel rect of the tile at tile coordinates `(tx, ty)`.
    pub fn tile_rect(&self, tx: i32, ty: i32) -> RectI {
        let t = self.tile_size;
        RectI::new(
            self.bounds.x1 + tx * t,
            self.bounds.y1 + ty * t,
            self.bounds.x1 + (tx + 1) * t,
            self.bounds.y1 + (ty + 1) * t,
        )
    }

    /// State of the tile at tile coordinates `(tx, ty)`.
    pub fn state_at(&self, tx: i32, ty: i32) -> TileState {
        self.states[self.index(tx, ty)]
    }

    /// Sets every tile touching `rect` to `state`.
    pub fn set_rect(&mut self, rect: &RectI, state: TileState) {
        let Some((x1, y1, x2, y2)) = self.tile_range(rect) else {
            return;
        };
        for ty in y1..y2 {
            for tx in x1..x2 {
                let i = self.index(tx, ty);
                self.states[i] = state;
            }
        }
    }

    /// Flips every tile claimed with `token` back to unrendered. Used when
    /// a render errors out after claiming its tiles.
    pub fn rollback_pending(&mut self, token: u64) {
        for s in &mut self.states {
            if *s == TileState::Pending(token) {
                *s = TileState::NotRendered;
            }
        }
    }

    /// Flips every tile claimed with `token` inside `rect` to rendered.
    pub fn commit_pending(&mut self, rect: &RectI, token: u64) {
        let Some((x1, y1, x2, y2)) = self.tile_range(rect) else {
            return;
        };
        for ty in y1..y2 {
            for tx in x1..x2 {
                let i = self.index(tx, ty);
                if self.states[i] == TileState::Pending(token) {
                    self.states[i] = TileState::Rendered;
                }
            }
        }
    }

    /// Claims every unrendered tile touching `rect` for `token` and
    /// returns their pixel rects, plus whether any tile in `rect` is
    /// pending under a different token.
    pub fn claim_unrendered(&mut self, rect: &RectI, token: u64) -> (Vec<RectI>, bool) {
        let mut claimed = Vec::new();
        let mut others_pending = false;
        let Some((x1, y1, x2, y2)) = self.tile_range(rect) else {
            return (claimed, false);
        };
        for ty in y1..y2 {
            for tx in x1..x2 {
                let i = self.index(tx, ty);
                match self.states[i] {
                    TileState::NotRendered => {
                        self.states[i] = TileState::Pending(token);
                        claimed.push(self.tile_rect(tx, ty));
                    }
                    TileState::Pending(t) if t != token => others_pending = true,
                    _ => {}
                }
            }
        }
        (claimed, others_pending)
    }

    /// True when some tile touching `rect` is pending under a token other
    /// than `token`.
    pub fn has_foreign_pending(&self, rect: &RectI, token: u64) -> bool {
        let Some((x1, y1, x2, y2)) = self.tile_range(rect) else {
            return false;
        };
        for ty in y1..y2 {
            for tx in x1..x2 {
                if let TileState::Pending(t) = self.state_at(tx, ty) {
                    if t != token {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// True when every tile touching `rect` is rendered.
    pub fn all_rendered(&self, rect: &RectI) -> bool {
        let Some((x1, y1, x2, y2)) = self.tile_range(rect) else {
            return true;
        };
        for ty in y1..y2 {
            for tx in x1..x2 {
                if self.state_at(tx, ty) != TileState::Rendered {
                    return false;
                }
            }
        }
        true
    }

    /// Reduces a set of tile rects (each exactly one tile) to a minimal
    /// list of larger rectangles: per tile row, runs of horizontally
    /// adjacent tiles merge; vertically adjacent rows with identical runs
    /// merge into bands.
    pub fn reduce_to_rects(&self, tile_rects: &[RectI]) -> Vec<RectI> {
        use std::collections::BTreeMap;

        // Tile coordinates per row.
        let mut rows: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for r in tile_rects {
            let tx = (r.x1 - self.bounds.x1) / self.tile_size;
            let ty = (r.y1 - self.bounds.y1) / self.tile_size;
            rows.entry(ty).or_default().push(tx);
        }

        // Horizontal runs per row, as (start, end) tile columns.
        let mut row_runs: BTreeMap<i32, Vec<(i32, i32)>> = BTreeMap::new();
        for (ty, mut cols) in rows {
            cols.sort_unstable();
            cols.dedup();
            let mut runs = Vec::new();
            let mut start = cols[0];
            let mut prev = cols[0];
            for &c in &cols[1..] {
                if c != prev + 1 {
                    runs.push((start, prev + 1));
                    start = c;
                }
                prev = c;
            }
            runs.push((start, prev + 1));
            row_runs.insert(ty, runs);
        }

        // Merge vertically adjacent rows with identical run lists.
        let mut out = Vec::new();
        let mut iter = row_runs.into_iter();
        let Some((first_ty, first_runs)) = iter.next() else {
            return out;
        };
        let mut band_start = first_ty;
        let mut band_end = first_ty + 1;
        let mut band_runs = first_runs;
        let mut flush = |start: i32, end: i32, runs: &[(i32, i32)], out: &mut Vec<RectI>| {
            for &(c1, c2) in runs {
                out.push(RectI::new(
                    self.bounds.x1 + c1 * self.tile_size,
                    self.bounds.y1 + start * self.tile_size,
                    self.bounds.x1 + c2 * self.tile_size,
                    self.bounds.y1 + end * self.tile_size,
                ));
            }
        };
        for (ty, runs) in iter {
            if ty == band_end && runs == band_runs {
                band_end += 1;
            } else {
                flush(band_start, band_end, &band_runs, &mut out);
                band_start = ty;
                band_end = ty + 1;
                band_runs = runs;
            }
        }
        flush(band_start, band_end, &band_runs, &mut out);
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/tiles.rs"]
mod tests;
