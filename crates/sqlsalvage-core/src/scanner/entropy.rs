//! Sampled Shannon entropy.
//!
//! Only every `stride`-th byte is counted, so a multi-megabyte chunk costs a
//! few tens of thousands of histogram updates. The score ranges from 0.0
//! (constant data) to 8.0 (uniformly random bytes).

/// Maximum entropy of a byte alphabet
pub const MAX_ENTROPY: f64 = 8.0;

/// Computes the entropy of every `stride`-th byte of `data`.
///
/// The sampled positions are `stride - 1`, `2 * stride - 1`, and so on.
/// Returns `None` when nothing can be sampled, which is the case for input
/// shorter than one stride.
pub fn sample_entropy(data: &[u8], stride: usize) -> Option<f64> {
    if data.is_empty() || stride == 0 {
        return None;
    }

    let mut freq = [0u32; 256];
    let mut total = 0u32;
    for &b in data.iter().skip(stride - 1).step_by(stride) {
        freq[b as usize] += 1;
        total += 1;
    }

    if total == 0 {
        return None;
    }

    let total = f64::from(total);
    let entropy: f64 = freq
        .iter()
        .filter(|&&f| f > 0)
        .map(|&f| {
            let p = f64::from(f) / total;
            -p * p.log2()
        })
        .sum();

    Some(entropy.clamp(0.0, MAX_ENTROPY))
}

/// Running `(sum, count)` of per-chunk entropy samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntropyAccumulator {
    sum: f64,
    count: u64,
}

impl EntropyAccumulator {
    /// Creates an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one chunk sample
    pub fn record(&mut self, sample: f64) {
        self.sum += sample;
        self.count += 1;
    }

    /// Number of recorded samples
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of all samples, `None` if nothing was recorded
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}
