//! Sequence number comparisons on the 32-bit ring.
//!
//! `a` precedes `b` when `b` is less than half the ring ahead of it.

/// Signed distance from `a` forward to `b`
fn distance(a: u32, b: u32) -> i32 {
    b.wrapping_sub(a) as i32
}

/// a < b on the ring
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    distance(a, b) > 0
}

/// a <= b on the ring
pub(crate) fn seq_leq(a: u32, b: u32) -> bool {
    distance(a, b) >= 0
}

/// a > b on the ring
pub(crate) fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}
