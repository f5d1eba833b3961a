use super::*;

#[test]
fn time_quantization_and_rounding() {
    assert_eq!(TimeValue(1.0).quantized(), TimeValue(1.0 + 1e-7).quantized());
    assert_ne!(TimeValue(1.0).quantized(), TimeValue(1.5).quantized());
    assert!(TimeValue(3.0).is_integer());
    assert!(!TimeValue(3.25).is_integer());
    assert_eq!(TimeValue(3.75).rounded().0, 4.0);
    assert_eq!(TimeValue(3.25).rounded().0, 3.0);
}

#[test]
fn plane_channel_count_is_clamped() {
    assert_eq!(PlaneDesc::rgba().channel_count(), 4);
    assert_eq!(PlaneDesc::alpha().channel_count(), 1);
    assert_eq!(PlaneDesc::new("motion.uv", 2).channel_count(), 2);
    assert_eq!(PlaneDesc::new("huge", 9).channel_count(), 4);
    assert_eq!(PlaneDesc::new("none", 0).channel_count(), 1);
}

#[test]
fn plane_identity_is_id_and_channels() {
    assert_eq!(PlaneDesc::rgba(), PlaneDesc::new("color.rgba", 4));
    assert_ne!(PlaneDesc::rgba(), PlaneDesc::new("color.rgba", 3));
    assert_ne!(PlaneDesc::rgba(), PlaneDesc::alpha());
}
