use crate::sampler::{MaxLogit, Sampler};

/// Greedy sampler: selects the token with the highest logit.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn select(&self, logits: &mut [f32], max: MaxLogit, _uniform: f32) -> u32 {
        if max.is_none() {
            return MaxLogit::of(logits).index.min(logits.len().saturating_sub(1)) as u32;
        }
        max.index as u32
    }
}
