use super::*;

fn map_128() -> TileStateMap {
    TileStateMap::new(&RectI::new(0, 0, 128, 128), 64)
}

#[test]
fn new_map_is_all_unrendered() {
    let m = map_128();
    assert_eq!(m.bounds(), &RectI::new(0, 0, 128, 128));
    for ty in 0..2 {
        for tx in 0..2 {
            assert_eq!(m.state_at(tx, ty), TileState::NotRendered);
        }
    }
}

#[test]
fn claim_then_commit() {
    let mut m = map_128();
    let (claimed, others) = m.claim_unrendered(&RectI::new(0, 0, 128, 64), 1);
    assert_eq!(claimed.len(), 2);
    assert!(!others);
    assert_eq!(m.state_at(0, 0), TileState::Pending(1));

    // A second claimant sees the pending tiles and gets nothing.
    let (again, others) = m.claim_unrendered(&RectI::new(0, 0, 128, 128), 2);
    assert_eq!(again.len(), 2); // the top row was still free
    assert!(others);

    m.commit_pending(&RectI::new(0, 0, 128, 64), 1);
    assert_eq!(m.state_at(0, 0), TileState::Rendered);
    assert_eq!(m.state_at(1, 0), TileState::Rendered);
    assert!(!m.all_rendered(&RectI::new(0, 0, 128, 128)));
    m.commit_pending(&RectI::new(0, 64, 128, 128), 2);
    assert!(m.all_rendered(&RectI::new(0, 0, 128, 128)));
}

#[test]
fn commit_only_touches_own_token() {
    let mut m = map_128();
    m.claim_unrendered(&RectI::new(0, 0, 64, 64), 1);
    m.claim_unrendered(&RectI::new(64, 0, 128, 64), 2);
    m.commit_pending(&RectI::new(0, 0, 128, 64), 1);
    assert_eq!(m.state_at(0, 0), TileState::Rendered);
    assert_eq!(m.state_at(1, 0), TileState::Pending(2));
}

#[test]
fn rollback_frees_only_own_claims() {
    let mut m = map_128();
    m.claim_unrendered(&RectI::new(0, 0, 64, 64), 1);
    m.claim_unrendered(&RectI::new(64, 0, 128, 64), 2);
    m.rollback_pending(1);
    assert_eq!(m.state_at(0, 0), TileState::NotRendered);
    assert_eq!(m.state_at(1, 0), TileState::Pending(2));
}

#[test]
fn foreign_pending_detection() {
    let mut m = map_128();
    m.claim_unrendered(&RectI::new(0, 0, 64, 64), 1);
    assert!(!m.has_foreign_pending(&RectI::new(0, 0, 128, 128), 1));
    assert!(m.has_foreign_pending(&RectI::new(0, 0, 128, 128), 2));
    assert!(!m.has_foreign_pending(&RectI::new(64, 64, 128, 128), 2));
}

#[test]
fn partial_tiles_at_the_rect_edge_count() {
    let mut m = map_128();
    // A rect clipped inside one tile claims that whole tile.
    let (claimed, _) = m.claim_unrendered(&RectI::new(10, 10, 20, 20), 1);
    assert_eq!(claimed, vec![RectI::new(0, 0, 64, 64)]);
}

#[test]
fn reduce_merges_rows_and_bands() {
    let m = TileStateMap::new(&RectI::new(0, 0, 256, 256), 64);
    // Full 4x2 block: one rect.
    let mut tiles = Vec::new();
    for ty in 0..2 {
        for tx in 0..4 {
            tiles.push(m.tile_rect(tx, ty));
        }
    }
    assert_eq!(m.reduce_to_rects(&tiles), vec![RectI::new(0, 0, 256, 128)]);

    // An L shape cannot merge into one rect.
    let l_shape = vec![m.tile_rect(0, 0), m.tile_rect(1, 0), m.tile_rect(0, 1)];
    let reduced = m.reduce_to_rects(&l_shape);
    assert_eq!(reduced.len(), 2);
    let total: i64 = reduced.iter().map(RectI::area).sum();
    assert_eq!(total, 3 * 64 * 64);
}

#[test]
fn reduce_of_nothing_is_empty() {
    let m = map_128();
    assert!(m.reduce_to_rects(&[]).is_empty());
}
