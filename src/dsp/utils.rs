pub const DB_EPS: f32 = 1e-9;

/// Smallest VCA gain the limiters will ever emit (-120 dB).
pub const GAIN_FLOOR: f32 = 1e-6;

#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(DB_EPS).log10()
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
#[inline]
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = (ms * 0.001 * sample_rate).max(1.0);
    (-1.0 / samples).exp()
}

#[inline]
pub fn millis_to_samples(sample_rate: f32, ms: f32) -> usize {
    (ms.max(0.0) * 0.001 * sample_rate).round() as usize
}

/// Largest absolute sample value.
pub fn abs_max(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
}

pub fn min_value(buf: &[f32]) -> f32 {
    buf.iter().fold(f32::INFINITY, |acc, &x| acc.min(x))
}

/// `floor(log2(v))`, with `int_log2(0) == 0`.
#[inline]
pub fn int_log2(v: usize) -> usize {
    if v == 0 {
        0
    } else {
        (usize::BITS - 1 - v.leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_roundtrip() {
        for db in [-48.0f32, -6.0, 0.0, 12.0] {
            assert!((lin_to_db(db_to_lin(db)) - db).abs() < 1e-3);
        }
        assert!(lin_to_db(0.0) < -170.0);
    }

    #[test]
    fn test_int_log2() {
        assert_eq!(int_log2(0), 0);
        assert_eq!(int_log2(1), 0);
        assert_eq!(int_log2(2), 1);
        assert_eq!(int_log2(9), 3);
        assert_eq!(int_log2(4096), 12);
    }

    #[test]
    fn test_block_helpers() {
        let buf = [0.25f32, -0.75, 0.5];
        assert_eq!(abs_max(&buf), 0.75);
        assert_eq!(min_value(&buf), -0.75);
        assert_eq!(abs_max(&[]), 0.0);
        assert_eq!(millis_to_samples(48_000.0, 5.0), 240);
    }
}
