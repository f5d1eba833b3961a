use super::*;

#[test]
fn defaults_are_the_documented_constants() {
    let c = RenderConfig::default();
    assert_eq!(c.tile_size, DEFAULT_TILE_SIZE);
    assert_eq!(c.max_frames_needed_prefetch, MAX_FRAMES_NEEDED_PRE_FETCHING);
    assert_eq!(c.frame_threading_min_area, FRAME_THREADING_MIN_AREA);
    assert!(c.handle_nans);
    assert!(c.enable_concatenations);
}

#[test]
fn zero_pool_threads_resolves_to_hardware() {
    let c = RenderConfig { pool_threads: 0, ..RenderConfig::default() };
    assert!(c.effective_pool_threads() >= 1);
    let c = RenderConfig { pool_threads: 3, ..RenderConfig::default() };
    assert_eq!(c.effective_pool_threads(), 3);
}

#[test]
fn near_times_quantize_identically() {
    assert_eq!(quantize_time(1.0), quantize_time(1.0 + TIME_EQUALITY_EPS / 3.0));
    assert_ne!(quantize_time(1.0), quantize_time(1.0 + TIME_EQUALITY_EPS * 2.0));
    assert_ne!(quantize_time(1.0), quantize_time(2.0));
}
