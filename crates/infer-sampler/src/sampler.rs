use rand::Rng;

use crate::greedy::GreedySampler;
use crate::temperature::TemperatureSampler;

/// Running maximum over a range of logits and the index it was seen at.
///
/// Workers each track their own maximum over a disjoint range; the partial
/// results are then folded with [`MaxLogit::merge`]. Equal values resolve to
/// the lowest index, so the reduction is independent of how the range was
/// split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxLogit {
    pub value: f32,
    pub index: usize,
}

impl MaxLogit {
    /// Identity for [`MaxLogit::merge`].
    pub const NONE: MaxLogit = MaxLogit {
        value: f32::NEG_INFINITY,
        index: usize::MAX,
    };

    /// Record `value` seen at `index`.
    #[inline]
    pub fn observe(&mut self, index: usize, value: f32) {
        if value > self.value || (value == self.value && index < self.index) {
            self.value = value;
            self.index = index;
        }
    }

    pub fn merge(self, other: MaxLogit) -> MaxLogit {
        let mut out = self;
        out.observe(other.index, other.value);
        out
    }

    /// Maximum of a whole slice, sequentially.
    pub fn of(logits: &[f32]) -> MaxLogit {
        let mut max = MaxLogit::NONE;
        for (i, &v) in logits.iter().enumerate() {
            max.observe(i, v);
        }
        max
    }

    pub fn is_none(&self) -> bool {
        self.index == usize::MAX
    }
}

impl Default for MaxLogit {
    fn default() -> Self {
        MaxLogit::NONE
    }
}

/// Picks the next token from a filled logits buffer.
pub trait Sampler: Send + Sync {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Select a token. `max` is the reduced maximum of `logits`; `uniform`
    /// is a draw from `[0, 1)`. The buffer may be rewritten in place.
    fn select(&self, logits: &mut [f32], max: MaxLogit, uniform: f32) -> u32;

    /// Select a token using a fresh uniform draw from `rng`.
    fn sample<R: Rng + ?Sized>(&self, logits: &mut [f32], max: MaxLogit, rng: &mut R) -> u32
    where
        Self: Sized,
    {
        let uniform: f32 = rng.gen();
        self.select(logits, max, uniform)
    }
}

/// Greedy selection at temperature zero, temperature sampling otherwise.
pub fn sampler_for(temperature: f32) -> Box<dyn Sampler> {
    if temperature == 0.0 {
        Box::new(GreedySampler::new())
    } else {
        Box::new(TemperatureSampler::new(temperature))
    }
}
