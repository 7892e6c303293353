//! `infer-sampler` - turns a vocabulary of logits into the next token.

pub mod greedy;
pub mod sampler;
pub mod temperature;

pub use greedy::GreedySampler;
pub use sampler::{sampler_for, MaxLogit, Sampler};
pub use temperature::TemperatureSampler;
