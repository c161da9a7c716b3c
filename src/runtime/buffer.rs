//! Per-worker receive buffer pool.
//!
//! Every reactive session reads into one fixed-size buffer for its whole
//! lifetime. Buffers are allocated up front and recycled through a free list,
//! so a worker's memory is bounded by `max_connections * buffer_size`.

/// Pool of equally sized buffers addressed by index.
pub struct BufferPool {
    /// Actual buffer storage.
    buffers: Vec<Box<[u8]>>,
    /// Stack of available buffer indices (LIFO for cache locality).
    free_list: Vec<usize>,
}

impl BufferPool {
    /// Create a pool of `count` buffers of `size` bytes each.
    pub fn new(count: usize, size: usize) -> Self {
        let buffers = (0..count).map(|_| vec![0u8; size].into_boxed_slice()).collect();
        let free_list = (0..count).rev().collect();

        Self { buffers, free_list }
    }

    /// Allocate a buffer from the pool.
    ///
    /// Returns `None` if no buffers are available.
    pub fn alloc(&mut self) -> Option<usize> {
        self.free_list.pop()
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, idx: usize) {
        debug_assert!(idx < self.buffers.len(), "buffer index out of bounds");
        debug_assert!(!self.free_list.contains(&idx), "buffer freed twice");
        self.free_list.push(idx);
    }

    #[cfg(test)]
    pub fn get(&self, idx: usize) -> &[u8] {
        &self.buffers[idx]
    }

    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.buffers[idx]
    }

    /// Number of buffers not currently handed out.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let mut pool = BufferPool::new(2, 16);
        assert_eq!(pool.available(), 2);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert!(pool.alloc().is_none());

        pool.free(a);
        assert_eq!(pool.alloc(), Some(a));
        pool.free(b);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_buffers_are_fixed_size() {
        let mut pool = BufferPool::new(1, 8);
        let idx = pool.alloc().unwrap();
        assert_eq!(pool.get(idx).len(), 8);

        pool.get_mut(idx)[..3].copy_from_slice(b"abc");
        assert_eq!(&pool.get(idx)[..3], b"abc");
    }
}
