//! TPDF dither ahead of the host's word-length reduction.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Dither {
    bits: u32,
    /// One LSB at the target depth, full scale being [-1, 1].
    lsb: f32,
    rng: StdRng,
}

impl Dither {
    pub fn new(seed: u64) -> Self {
        Self {
            bits: 0,
            lsb: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 0 disables the stage.
    pub fn set_bits(&mut self, bits: u32) {
        self.bits = bits;
        self.lsb = if bits == 0 {
            0.0
        } else {
            2.0f32.powi(1 - bits as i32)
        };
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        if self.bits == 0 {
            return;
        }
        for x in buf.iter_mut() {
            let r1: f32 = self.rng.gen();
            let r2: f32 = self.rng.gen();
            *x += (r1 - r2) * self.lsb;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_transparent() {
        let mut d = Dither::new(1);
        let mut buf = [0.5f32, -0.25, 0.0];
        d.process(&mut buf);
        assert_eq!(buf, [0.5, -0.25, 0.0]);
    }

    #[test]
    fn test_noise_stays_within_one_lsb() {
        let mut d = Dither::new(3);
        d.set_bits(8);
        let lsb = 2.0f32.powi(-7);
        let mut buf = vec![0.0f32; 10_000];
        d.process(&mut buf);
        assert!(buf.iter().all(|x| x.abs() <= lsb));
        assert!(buf.iter().any(|&x| x != 0.0));
        let mean = buf.iter().sum::<f32>() / buf.len() as f32;
        assert!(mean.abs() < lsb * 0.05);
    }
}
