use crate::sampler::{MaxLogit, Sampler};

/// Samples from the temperature-scaled softmax of the logits.
///
/// Higher temperatures produce more uniform distributions (more random),
/// while lower temperatures sharpen the distribution (more deterministic).
pub struct TemperatureSampler {
    temperature: f32,
}

impl TemperatureSampler {
    /// Create a new temperature sampler. A zero temperature is treated as
    /// a very small positive one.
    pub fn new(temperature: f32) -> Self {
        let temperature = if temperature <= 0.0 { 1e-7 } else { temperature };
        Self { temperature }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Rewrite `logits` into `exp((logit - max) / T)`, normalized to sum to 1.
    pub fn to_distribution(&self, logits: &mut [f32], max: f32) {
        let mut sum = 0.0f32;
        for l in logits.iter_mut() {
            *l = ((*l - max) / self.temperature).exp();
            sum += *l;
        }
        for l in logits.iter_mut() {
            *l /= sum;
        }
    }
}

/// First index whose running total reaches `uniform`, walking in index order.
///
/// Rounding can leave the total just short of `uniform`; the last index is
/// returned then.
pub fn pick_cumulative(probs: &[f32], uniform: f32) -> usize {
    let mut total = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        total += p;
        if total >= uniform {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}

impl Sampler for TemperatureSampler {
    fn name(&self) -> &str {
        "temperature"
    }

    fn select(&self, logits: &mut [f32], max: MaxLogit, uniform: f32) -> u32 {
        let max = if max.is_none() { MaxLogit::of(logits) } else { max };
        self.to_distribution(logits, max.value);
        pick_cumulative(logits, uniform) as u32
    }
}
