//! Click-free bypass: a short linear crossfade between the processed signal
//! and the latency-compensated dry signal.

/// Crossfade length in seconds.
const BYPASS_FADE_SEC: f32 = 0.005;

pub struct Bypass {
    /// 0 = fully processed, 1 = fully dry.
    state: f32,
    target: f32,
    step: f32,
}

impl Default for Bypass {
    fn default() -> Self {
        Self::new()
    }
}

impl Bypass {
    pub fn new() -> Self {
        Self {
            state: 0.0,
            target: 0.0,
            step: 1.0,
        }
    }

    pub fn init(&mut self, sample_rate: f32) {
        self.step = 1.0 / (BYPASS_FADE_SEC * sample_rate).max(1.0);
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.target = if bypass { 1.0 } else { 0.0 };
    }

    pub fn is_bypassed(&self) -> bool {
        self.state >= 1.0 && self.target >= 1.0
    }

    /// Jump to the target without fading.
    pub fn settle(&mut self) {
        self.state = self.target;
    }

    /// `dst = wet * (1 - state) + dry * state`, ramping `state` per sample.
    pub fn process(&mut self, dst: &mut [f32], dry: &[f32], wet: &[f32]) {
        for ((y, &d), &w) in dst.iter_mut().zip(dry).zip(wet) {
            if self.state < self.target {
                self.state = (self.state + self.step).min(self.target);
            } else if self.state > self.target {
                self.state = (self.state - self.step).max(self.target);
            }
            *y = if self.state <= 0.0 {
                w
            } else if self.state >= 1.0 {
                d
            } else {
                w + (d - w) * self.state
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_reaches_dry() {
        let mut b = Bypass::new();
        b.init(48_000.0);
        b.set_bypass(true);
        let dry = vec![1.0f32; 480];
        let wet = vec![0.0f32; 480];
        let mut out = vec![0.0f32; 480];
        b.process(&mut out, &dry, &wet);
        assert!(out[0] > 0.0 && out[0] < 0.01);
        for w in out.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert_eq!(out[479], 1.0);
        assert!(b.is_bypassed());
    }

    #[test]
    fn test_active_is_wet() {
        let mut b = Bypass::new();
        b.init(48_000.0);
        let dry = [1.0f32; 4];
        let wet = [0.25f32; 4];
        let mut out = [0.0f32; 4];
        b.process(&mut out, &dry, &wet);
        assert_eq!(out, wet);
    }
}
