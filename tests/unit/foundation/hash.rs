use super::*;

#[test]
fn deterministic_for_equal_input() {
    let mut a = Fnv1a64::new_default();
    a.write_u64(42);
    a.write_bytes(b"plane");
    let mut b = Fnv1a64::new_default();
    b.write_u64(42);
    b.write_bytes(b"plane");
    assert_eq!(a.finish(), b.finish());
}

#[test]
fn order_matters() {
    let mut a = Fnv1a64::new_default();
    a.write_u32(1);
    a.write_u32(2);
    let mut b = Fnv1a64::new_default();
    b.write_u32(2);
    b.write_u32(1);
    assert_ne!(a.finish(), b.finish());
}

#[test]
fn seed_separates_domains() {
    let mut a = Fnv1a64::new(Fnv1a64::OFFSET_BASIS ^ 1);
    a.write_i64(-7);
    let mut b = Fnv1a64::new(Fnv1a64::OFFSET_BASIS ^ 2);
    b.write_i64(-7);
    assert_ne!(a.finish(), b.finish());
}
