//! Streaming linear resampler
//!
//! Converts device-rate `f32` blocks into target-rate `i16` samples. Output
//! positions are tracked as exact integer fractions of the input stream, so
//! splitting the input into arbitrary blocks produces the same samples as
//! resampling it in one go.

/// Linear-interpolating resampler that keeps state across blocks
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u64,
    to_rate: u64,
    consumed: u64,
    produced: u64,
    last: f32,
}

impl LinearResampler {
    /// Create a resampler from `from_rate` Hz to `to_rate` Hz
    #[must_use]
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: u64::from(from_rate.max(1)),
            to_rate: u64::from(to_rate.max(1)),
            consumed: 0,
            produced: 0,
            last: 0.0,
        }
    }

    /// Whether input and output rates match
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample one block of device samples
    pub fn process(&mut self, block: &[f32]) -> Vec<i16> {
        if block.is_empty() {
            return Vec::new();
        }
        if self.is_passthrough() {
            self.consumed += block.len() as u64;
            self.produced += block.len() as u64;
            self.last = block[block.len() - 1];
            return block.iter().map(|&s| to_i16(s)).collect();
        }

        let end = self.consumed + block.len() as u64;
        let mut out = Vec::with_capacity(
            (block.len() as u64 * self.to_rate / self.from_rate + 1) as usize,
        );

        loop {
            let position = self.produced * self.from_rate;
            let index = position / self.to_rate;
            let rem = position % self.to_rate;

            if rem == 0 {
                if index >= end {
                    break;
                }
                out.push(to_i16(self.sample_at(block, index)));
            } else {
                if index + 1 >= end {
                    break;
                }
                let a = self.sample_at(block, index);
                let b = self.sample_at(block, index + 1);
                let frac = rem as f32 / self.to_rate as f32;
                out.push(to_i16(a + (b - a) * frac));
            }
            self.produced += 1;
        }

        self.consumed = end;
        self.last = block[block.len() - 1];
        out
    }

    /// Forget stream position
    pub fn reset(&mut self) {
        self.consumed = 0;
        self.produced = 0;
        self.last = 0.0;
    }

    fn sample_at(&self, block: &[f32], index: u64) -> f32 {
        if index >= self.consumed {
            block[(index - self.consumed) as usize]
        } else {
            self.last
        }
    }
}

/// Convert a float sample to 16-bit PCM, clamping out-of-range input
#[must_use]
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
