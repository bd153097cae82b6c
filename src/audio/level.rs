/// Root-mean-square amplitude of a block, normalized to [0, 1]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() / i16::MAX as f64;
    rms.clamp(0.0, 1.0) as f32
}

/// Live input level for a pre-recording meter.
///
/// Rises immediately with the signal and decays smoothly so the meter does
/// not flicker between blocks.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    decay: f32,
    level: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl LevelMeter {
    /// `decay` in [0, 1): fraction of the previous level kept per block
    pub fn new(decay: f32) -> Self {
        Self {
            decay: decay.clamp(0.0, 0.99),
            level: 0.0,
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn update(&mut self, samples: &[i16]) -> f32 {
        let current = rms(samples);
        let decayed = self.level * self.decay;
        self.level = current.max(decayed).clamp(0.0, 1.0);
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}
