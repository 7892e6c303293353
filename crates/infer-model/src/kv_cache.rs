use infer_tensor::{DType, Tensor, TensorViewMut};

use crate::config::Config;
use crate::error::{ModelError, Result};

/// Key-value cache for one generation session.
///
/// Keys and values computed for earlier positions are kept so each new token
/// only attends over stored rows instead of recomputing them.
///
/// One pooled tensor of shape `[layers, max_tokens, 2 * embedding_length]`.
/// Within a position's row, keys occupy `[0, kv_dim)` and values start at
/// `embedding_length`.
pub struct KvCache {
    buffer: Tensor,
    max_tokens: usize,
}

impl KvCache {
    /// Zeroed cache for `max_tokens` positions, drawn from the config's pool.
    pub fn new(config: &Config, max_tokens: usize) -> Result<Self> {
        let buffer = config.pool().acquire(
            DType::F32,
            &[config.layer_count, max_tokens, 2 * config.embedding_length],
        )?;
        Ok(KvCache { buffer, max_tokens })
    }

    /// `[max_tokens, 2 * embedding_length]` view for layer `layer`.
    pub fn layer_mut(&mut self, layer: usize) -> Result<TensorViewMut<'_>> {
        Ok(self.buffer.slice_mut(layer)?)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn layers(&self) -> usize {
        self.buffer.shape().dim(0)
    }
}

/// Split the row for `position` of a layer view into its key and value
/// halves, each `embedding_length` wide.
pub fn row_mut<'a>(
    kv: &'a mut TensorViewMut<'_>,
    position: usize,
    embedding_length: usize,
) -> Result<(&'a mut [f32], &'a mut [f32])> {
    let rows = kv.shape().dim(0);
    if position >= rows {
        return Err(ModelError::Tensor(infer_tensor::TensorError::IndexOutOfBounds {
            index: position,
            size: rows,
        }));
    }
    let row_len = 2 * embedding_length;
    let data = kv.as_f32_mut()?;
    let row = &mut data[position * row_len..(position + 1) * row_len];
    Ok(row.split_at_mut(embedding_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new(16, 8, 2, 3, 1e-5, 10, 1, 2)
    }

    #[test]
    fn test_layout() {
        let c = config();
        let mut cache = KvCache::new(&c, 4).unwrap();
        assert_eq!(cache.layers(), 3);
        assert_eq!(cache.max_tokens(), 4);

        let mut layer = cache.layer_mut(1).unwrap();
        assert_eq!(layer.shape().dims(), &[4, 16]);
        {
            let (k, v) = row_mut(&mut layer, 2, 8).unwrap();
            assert_eq!((k.len(), v.len()), (8, 8));
            k[0] = 1.0;
            v[0] = 2.0;
        }
        let data = layer.as_f32().unwrap();
        assert_eq!(data[2 * 16], 1.0);
        assert_eq!(data[2 * 16 + 8], 2.0);
    }

    #[test]
    fn test_dropping_a_layer_view_keeps_the_buffer() {
        let c = config();
        let mut cache = KvCache::new(&c, 2).unwrap();
        {
            let mut layer = cache.layer_mut(0).unwrap();
            row_mut(&mut layer, 1, 8).unwrap().0[3] = 4.0;
        }
        {
            let mut layer = cache.layer_mut(2).unwrap();
            row_mut(&mut layer, 0, 8).unwrap().1[0] = 5.0;
        }
        assert_eq!(cache.layer_mut(0).unwrap().as_f32().unwrap()[16 + 3], 4.0);
        assert_eq!(cache.layer_mut(2).unwrap().as_f32().unwrap()[8], 5.0);
    }

    #[test]
    fn test_position_past_capacity() {
        let c = config();
        let mut cache = KvCache::new(&c, 4).unwrap();
        let mut layer = cache.layer_mut(0).unwrap();
        assert!(matches!(
            row_mut(&mut layer, 4, 8),
            Err(ModelError::Tensor(infer_tensor::TensorError::IndexOutOfBounds { .. }))
        ));
        assert!(cache.layer_mut(3).is_err());
    }
}
