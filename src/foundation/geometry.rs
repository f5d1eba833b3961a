use serde::{Deserialize, Serialize};

pub use kurbo::{Point, Rect};

/// Canonical coordinates beyond this magnitude are treated as unbounded.
/// Format RoDs and projection-format effects use this to mean "everything".
pub const CANONICAL_INFINITY: f64 = 1e15;

/// Returns true if `r` extends past the canonical-infinity guard on any side.
pub fn rect_is_infinite(r: &Rect) -> bool {
    r.x0 <= -CANONICAL_INFINITY
        || r.y0 <= -CANONICAL_INFINITY
        || r.x1 >= CANONICAL_INFINITY
        || r.y1 >= CANONICAL_INFINITY
}

/// Clips infinite sides of `r` against `bounds`, leaving finite sides alone.
pub fn clip_infinite_rect(r: &Rect, bounds: &Rect) -> Rect {
    Rect::new(
        if r.x0 <= -CANONICAL_INFINITY { bounds.x0 } else { r.x0 },
        if r.y0 <= -CANONICAL_INFINITY { bounds.y0 } else { r.y0 },
        if r.x1 >= CANONICAL_INFINITY { bounds.x1 } else { r.x1 },
        if r.y1 >= CANONICAL_INFINITY { bounds.y1 } else { r.y1 },
    )
}

/// Axis-aligned pixel rectangle, half-open on both axes: a point `(x, y)` is
/// inside when `x1 <= x < x2` and `y1 <= y < y2`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RectI {
    /// Left edge (inclusive).
    pub x1: i32,
    /// Bottom edge (inclusive).
    pub y1: i32,
    /// Right edge (exclusive).
    pub x2: i32,
    /// Top edge (exclusive).
    pub y2: i32,
}

impl RectI {
    /// Builds a rectangle from its edges. Callers are responsible for
    /// `x1 <= x2` and `y1 <= y2`; a reversed rect reads as empty.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The empty rectangle at the origin.
    pub const ZERO: RectI = RectI { x1: 0, y1: 0, x2: 0, y2: 0 };

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Width in pixels, zero for empty rects.
    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    /// Height in pixels, zero for empty rects.
    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    /// Pixel count.
    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    /// True when `(x, y)` lies inside.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// True when `other` is entirely inside `self`. The empty rect is
    /// contained everywhere.
    pub fn contains_rect(&self, other: &RectI) -> bool {
        other.is_empty()
            || (other.x1 >= self.x1
                && other.x2 <= self.x2
                && other.y1 >= self.y1
                && other.y2 <= self.y2)
    }

    /// Intersection, or `None` when the rects do not overlap.
    pub fn intersect(&self, other: &RectI) -> Option<RectI> {
        let r = RectI {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        if r.is_empty() { None } else { Some(r) }
    }

    /// Bounding union. Empty operands are ignored.
    pub fn union(&self, other: &RectI) -> RectI {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        RectI {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Grows every side outward to the enclosing multiple of `tile_size`.
    /// `tile_size` must be a power of two.
    pub fn round_to_tile_grid(&self, tile_size: i32) -> RectI {
        debug_assert!(tile_size > 0 && (tile_size & (tile_size - 1)) == 0);
        let m = tile_size - 1;
        RectI {
            x1: self.x1 & !m,
            y1: self.y1 & !m,
            x2: (self.x2 + m) & !m,
            y2: (self.y2 + m) & !m,
        }
    }

    /// Converts to canonical coordinates under the given combined scale.
    pub fn to_canonical(&self, scale: RenderScale) -> Rect {
        Rect::new(
            f64::from(self.x1) / scale.x,
            f64::from(self.y1) / scale.y,
            f64::from(self.x2) / scale.x,
            f64::from(self.y2) / scale.y,
        )
    }

    /// Smallest pixel rect enclosing a canonical rect under the given
    /// combined scale.
    pub fn from_canonical_enclosing(r: &Rect, scale: RenderScale) -> RectI {
        RectI {
            x1: (r.x0 * scale.x).floor() as i32,
            y1: (r.y0 * scale.y).floor() as i32,
            x2: (r.x1 * scale.x).ceil() as i32,
            y2: (r.y1 * scale.y).ceil() as i32,
        }
    }

    /// Splits into `count` horizontal bands of near-equal height. Returns
    /// fewer rects when the height cannot feed that many bands.
    pub fn split_rows(&self, count: usize) -> Vec<RectI> {
        let count = count.max(1).min(self.height().max(1) as usize);
        if self.is_empty() {
            return Vec::new();
        }
        let h = self.height();
        let mut out = Vec::with_capacity(count);
        let mut y = self.y1;
        for i in 0..count {
            let next = self.y1 + ((i as i64 + 1) * i64::from(h) / count as i64) as i32;
            if next > y {
                out.push(RectI::new(self.x1, y, self.x2, next));
            }
            y = next;
        }
        out
    }
}

/// Proxy render scale on each axis. Mipmapping is tracked separately as a
/// power-of-two level and combined on demand.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderScale {
    /// Horizontal scale factor, canonical to pixel.
    pub x: f64,
    /// Vertical scale factor, canonical to pixel.
    pub y: f64,
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::ONE
    }
}

impl RenderScale {
    /// Identity scale.
    pub const ONE: RenderScale = RenderScale { x: 1.0, y: 1.0 };

    /// True when both axes are exactly one.
    pub fn is_one(&self) -> bool {
        self.x == 1.0 && self.y == 1.0
    }

    /// This proxy scale combined with a mipmap level: each level halves
    /// both axes.
    pub fn combined_with_mip(&self, mip_level: u32) -> RenderScale {
        let f = mip_scale_factor(mip_level);
        RenderScale { x: self.x * f, y: self.y * f }
    }

    /// Stable bit pattern for hashing.
    pub fn to_hash_bits(&self) -> (u64, u64) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

/// Scale factor contributed by a mipmap level (1, 1/2, 1/4, ...).
pub fn mip_scale_factor(mip_level: u32) -> f64 {
    1.0 / f64::from(1u32 << mip_level.min(31))
}

/// Row-major 3x3 matrix over canonical homogeneous coordinates. Used for
/// concatenated inverse distortion transforms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mat3 {
    /// Rows of the matrix.
    pub m: [[f64; 3]; 3],
}

impl Mat3 {
    /// Identity transform.
    pub const IDENTITY: Mat3 = Mat3 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Pure translation.
    pub fn translation(tx: f64, ty: f64) -> Mat3 {
        Mat3 {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]],
        }
    }

    /// Uniform scaling about the origin.
    pub fn scaling(sx: f64, sy: f64) -> Mat3 {
        Mat3 {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Matrix product `self * rhs` (apply `rhs` first).
    pub fn mul(&self, rhs: &Mat3) -> Mat3 {
        let mut out = [[0.0f64; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Mat3 { m: out }
    }

    /// Applies the transform to a canonical point with homogeneous divide.
    pub fn apply(&self, p: Point) -> Point {
        let x = self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2];
        let y = self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2];
        let w = self.m[2][0] * p.x + self.m[2][1] * p.y + self.m[2][2];
        if w.abs() < f64::EPSILON {
            Point::new(x, y)
        } else {
            Point::new(x / w, y / w)
        }
    }

    /// Bounding box of the four transformed corners of `r`.
    pub fn transform_rect_bounds(&self, r: &Rect) -> Rect {
        let corners = [
            Point::new(r.x0, r.y0),
            Point::new(r.x1, r.y0),
            Point::new(r.x0, r.y1),
            Point::new(r.x1, r.y1),
        ];
        let mut x0 = f64::INFINITY;
        let mut y0 = f64::INFINITY;
        let mut x1 = f64::NEG_INFINITY;
        let mut y1 = f64::NEG_INFINITY;
        for c in corners {
            let p = self.apply(c);
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Rect::new(x0, y0, x1, y1)
    }

    /// Inverse, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Mat3> {
        let m = &self.m;
        let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
        let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
        let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
        let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let out = [
            [
                c00 * inv_det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
            ],
            [
                c01 * inv_det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
            ],
            [
                c02 * inv_det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
            ],
        ];
        Some(Mat3 { m: out })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/geometry.rs"]
mod tests;
