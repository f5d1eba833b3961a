use super::*;

#[test]
fn empty_and_dimensions() {
    let r = RectI::new(0, 0, 10, 5);
    assert!(!r.is_empty());
    assert_eq!(r.width(), 10);
    assert_eq!(r.height(), 5);
    assert_eq!(r.area(), 50);
    assert!(RectI::new(3, 3, 3, 9).is_empty());
    assert!(RectI::new(5, 0, 2, 9).is_empty());
    assert_eq!(RectI::new(5, 0, 2, 9).width(), 0);
}

#[test]
fn intersect_overlapping_and_disjoint() {
    let a = RectI::new(0, 0, 10, 10);
    let b = RectI::new(5, 5, 20, 20);
    assert_eq!(a.intersect(&b), Some(RectI::new(5, 5, 10, 10)));
    assert_eq!(a.intersect(&RectI::new(10, 0, 20, 10)), None);
}

#[test]
fn union_ignores_empty_operands() {
    let a = RectI::new(0, 0, 4, 4);
    assert_eq!(a.union(&RectI::ZERO), a);
    assert_eq!(RectI::ZERO.union(&a), a);
    assert_eq!(a.union(&RectI::new(8, 8, 12, 12)), RectI::new(0, 0, 12, 12));
}

#[test]
fn contains_rect_accepts_empty() {
    let a = RectI::new(0, 0, 4, 4);
    assert!(a.contains_rect(&RectI::new(1, 1, 3, 3)));
    assert!(a.contains_rect(&RectI::ZERO));
    assert!(!a.contains_rect(&RectI::new(1, 1, 5, 3)));
}

#[test]
fn tile_grid_rounding_expands_outward() {
    let r = RectI::new(3, -3, 65, 64);
    assert_eq!(r.round_to_tile_grid(64), RectI::new(0, -64, 128, 64));
    // Already aligned rects are untouched.
    let aligned = RectI::new(-64, 0, 64, 128);
    assert_eq!(aligned.round_to_tile_grid(64), aligned);
}

#[test]
fn split_rows_covers_exactly() {
    let r = RectI::new(0, 0, 16, 10);
    let bands = r.split_rows(3);
    assert_eq!(bands.len(), 3);
    assert_eq!(bands[0].y1, 0);
    assert_eq!(bands.last().unwrap().y2, 10);
    let total: i64 = bands.iter().map(RectI::area).sum();
    assert_eq!(total, r.area());
    // More bands than rows degrades gracefully.
    assert_eq!(RectI::new(0, 0, 4, 2).split_rows(10).len(), 2);
}

#[test]
fn canonical_round_trip_encloses() {
    let scale = RenderScale { x: 0.5, y: 0.5 };
    let px = RectI::from_canonical_enclosing(&Rect::new(1.0, 1.0, 63.0, 63.0), scale);
    assert_eq!(px, RectI::new(0, 0, 32, 32));
    let back = px.to_canonical(scale);
    assert!(back.x0 <= 1.0 && back.x1 >= 63.0);
}

#[test]
fn mip_levels_halve_the_scale() {
    let s = RenderScale { x: 1.0, y: 1.0 }.combined_with_mip(2);
    assert_eq!(s.x, 0.25);
    assert_eq!(s.y, 0.25);
    assert!(RenderScale::ONE.is_one());
    assert!(!s.is_one());
}

#[test]
fn infinite_rects_clip_against_bounds() {
    let inf = Rect::new(-1e18, 0.0, 1e18, 100.0);
    assert!(rect_is_infinite(&inf));
    let clipped = clip_infinite_rect(&inf, &Rect::new(-50.0, -50.0, 50.0, 50.0));
    assert_eq!(clipped, Rect::new(-50.0, 0.0, 50.0, 100.0));
    assert!(!rect_is_infinite(&clipped));
}

#[test]
fn mat3_translation_and_inverse() {
    let t = Mat3::translation(10.0, -4.0);
    let p = t.apply(Point::new(1.0, 1.0));
    assert_eq!(p, Point::new(11.0, -3.0));
    let inv = t.invert().unwrap();
    let back = inv.apply(p);
    assert!((back.x - 1.0).abs() < 1e-12);
    assert!((back.y - 1.0).abs() < 1e-12);
}

#[test]
fn mat3_mul_applies_rhs_first() {
    let scale = Mat3::scaling(2.0, 2.0);
    let shift = Mat3::translation(1.0, 0.0);
    // shift * scale: scale first, then shift.
    let p = shift.mul(&scale).apply(Point::new(3.0, 5.0));
    assert_eq!(p, Point::new(7.0, 10.0));
}

#[test]
fn mat3_transform_rect_bounds_covers_corners() {
    let m = Mat3::scaling(2.0, 3.0);
    let out = m.transform_rect_bounds(&Rect::new(1.0, 1.0, 2.0, 2.0));
    assert_eq!(out, Rect::new(2.0, 3.0, 4.0, 6.0));
}

#[test]
fn singular_matrix_has_no_inverse() {
    let m = Mat3 { m: [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]] };
    assert!(m.invert().is_none());
}
