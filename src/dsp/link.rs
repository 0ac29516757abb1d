/// Pull the less attenuated channel toward the more attenuated one.
///
/// `link = 0` leaves both curves alone, `link = 1` makes both equal to the
/// per-sample minimum.
pub fn stereo_link(left: &mut [f32], right: &mut [f32], link: f32) {
    if link <= 0.0 {
        return;
    }
    if link >= 1.0 {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let m = l.min(*r);
            *l = m;
            *r = m;
        }
        return;
    }
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        if *l < *r {
            *r += (*l - *r) * link;
        } else {
            *l += (*r - *l) * link;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_link_takes_minimum() {
        let l0 = [1.0f32, 0.5, 0.25, 0.8, 0.3];
        let r0 = [0.7f32, 0.9, 0.25, 0.1, 1.0];
        let (mut l, mut r) = (l0, r0);
        stereo_link(&mut l, &mut r, 1.0);
        for i in 0..l0.len() {
            assert_eq!(l[i].to_bits(), r[i].to_bits());
            assert_eq!(l[i], l0[i].min(r0[i]));
        }
    }

    #[test]
    fn test_zero_link_is_independent() {
        let (mut l, mut r) = ([0.2f32, 0.9], [0.6f32, 0.1]);
        stereo_link(&mut l, &mut r, 0.0);
        assert_eq!(l, [0.2, 0.9]);
        assert_eq!(r, [0.6, 0.1]);
    }

    #[test]
    fn test_partial_link_moves_only_the_louder_channel() {
        let (mut l, mut r) = ([0.2f32, 1.0], [1.0f32, 0.4]);
        stereo_link(&mut l, &mut r, 0.5);
        assert_eq!(l[0], 0.2);
        assert!((r[0] - 0.6).abs() < 1e-6);
        assert_eq!(r[1], 0.4);
        assert!((l[1] - 0.7).abs() < 1e-6);
    }
}
