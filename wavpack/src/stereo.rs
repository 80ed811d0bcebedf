//! Joint-stereo (mid/side) transform.

/// Convert left/right to mid/side in place.
///
/// `mid = left - right`, `side = (left + right) >> 1`. The floor shift loses the
/// low bit of the sum, which `mid`'s parity restores on the way back.
pub fn joint_stereo(left: &mut [i64], right: &mut [i64]) {
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let mid = l.wrapping_sub(*r);
        let side = l.wrapping_add(*r) >> 1;
        *l = mid;
        *r = side;
    }
}

/// Convert mid/side back to left/right in place.
pub fn undo_joint_stereo(mid: &mut [i64], side: &mut [i64]) {
    for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
        let right = s.wrapping_sub(*m >> 1);
        let left = m.wrapping_add(right);
        *m = left;
        *s = right;
    }
}
