use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use crate::storage::CpuStorage;
use crate::tensor::Tensor;

/// Free-list key: storage of one dtype and element count is interchangeable
/// regardless of how it was shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub dtype: DType,
    pub numel: usize,
}

/// Process-wide reuse pool for working tensors.
///
/// The per-token hot loop allocates the same handful of activation shapes
/// over and over; the pool keeps released storage on per-key free lists and
/// hands it back zeroed. Cached storage is capped at `capacity_bytes`;
/// anything released beyond that is freed.
#[derive(Debug)]
pub struct TensorPool {
    free: Mutex<HashMap<PoolKey, Vec<CpuStorage>>>,
    capacity_bytes: usize,
    cached_bytes: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TensorPool {
    /// Default cap on cached storage: 256 MiB.
    pub const DEFAULT_CAPACITY_BYTES: usize = 256 * 1024 * 1024;

    pub fn new(capacity_bytes: usize) -> Self {
        TensorPool {
            free: Mutex::new(HashMap::new()),
            capacity_bytes,
            cached_bytes: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Acquire a zero-filled tensor of the given dtype and shape.
    ///
    /// The returned owner puts its storage back into this pool when dropped.
    pub fn acquire(self: &Arc<Self>, dtype: DType, dims: &[usize]) -> Result<Tensor> {
        let shape = Shape::from_slice(dims)?;
        let key = PoolKey {
            dtype,
            numel: CpuStorage::rounded_numel(dtype, shape.numel()),
        };

        let reused = {
            let mut free = self.free.lock();
            let storage = free.get_mut(&key).and_then(|list| list.pop());
            if let Some(storage) = &storage {
                self.cached_bytes
                    .fetch_sub(storage.size_in_bytes(), Ordering::Relaxed);
            }
            storage
        };
        let storage = match reused {
            Some(mut storage) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                storage.fill_zero();
                storage
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CpuStorage::zeros(dtype, shape.numel())?
            }
        };

        Ok(Tensor::pooled(storage, shape, Arc::clone(self)))
    }

    /// Take back storage from a dropped owner.
    pub(crate) fn release(&self, storage: CpuStorage) {
        let bytes = storage.size_in_bytes();
        if bytes == 0 {
            return;
        }
        let key = PoolKey {
            dtype: storage.dtype(),
            numel: storage.numel(),
        };
        // `cached_bytes` only changes under the free-list lock.
        let mut free = self.free.lock();
        let cached = self.cached_bytes.load(Ordering::Relaxed);
        if cached.saturating_add(bytes) > self.capacity_bytes {
            drop(free);
            trace!(bytes, cached, "tensor pool full, freeing storage");
            return;
        }
        self.cached_bytes.fetch_add(bytes, Ordering::Relaxed);
        free.entry(key).or_default().push(storage);
    }

    /// Number of storage buffers currently cached.
    pub fn cached_count(&self) -> usize {
        self.free.lock().values().map(Vec::len).sum()
    }

    /// Bytes currently held on the free lists.
    pub fn cached_bytes(&self) -> usize {
        self.cached_bytes.load(Ordering::Relaxed)
    }

    /// Acquisitions served from a free list.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Acquisitions that had to allocate.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every cached buffer.
    pub fn clear(&self) {
        let mut free = self.free.lock();
        free.clear();
        self.cached_bytes.store(0, Ordering::Relaxed);
    }
}

impl Default for TensorPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY_BYTES)
    }
}
