//! Reusable buffers for field serialization.
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// Working storage for encoding a single field
#[derive(Debug, Default)]
pub struct Scratch {
    /// The field being assembled
    pub(crate) line: Vec<u8>,
    /// The part currently being produced
    pub(crate) part: Vec<u8>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.line.clear();
        self.part.clear();
    }
}

/// A free list of [Scratch] buffers that can be shared between threads
#[derive(Debug)]
pub struct ScratchPool {
    free: Mutex<Vec<Scratch>>,
    max_spare: usize,
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ScratchPool {
    /// At most `max_spare` buffers are retained once released
    pub fn new(max_spare: usize) -> Self {
        Self {
            free: Mutex::new(vec![]),
            max_spare,
        }
    }

    pub fn acquire(&self) -> ScratchGuard<'_> {
        let scratch = self.free.lock().pop().unwrap_or_default();
        ScratchGuard {
            pool: self,
            scratch,
        }
    }

    fn release(&self, mut scratch: Scratch) {
        scratch.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_spare {
            free.push(scratch);
        }
    }

    pub fn spare_count(&self) -> usize {
        self.free.lock().len()
    }
}

/// Returns its buffers to the pool when dropped
#[derive(Debug)]
pub struct ScratchGuard<'p> {
    pool: &'p ScratchPool,
    scratch: Scratch,
}

impl Deref for ScratchGuard<'_> {
    type Target = Scratch;
    fn deref(&self) -> &Scratch {
        &self.scratch
    }
}

impl DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.scratch));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn buffers_are_recycled() {
        let pool = ScratchPool::new(1);
        let mut a = pool.acquire();
        let b = pool.acquire();
        a.line.extend_from_slice(b"hello");
        assert_equal!(pool.spare_count(), 0);
        drop(a);
        // The pool is full, so this one is discarded
        drop(b);
        assert_equal!(pool.spare_count(), 1);

        let a = pool.acquire();
        assert!(a.line.is_empty());
        assert!(a.line.capacity() >= 5);
        assert_equal!(pool.spare_count(), 0);
    }

    #[test]
    fn released_on_unwind() {
        let pool = ScratchPool::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = pool.acquire();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_equal!(pool.spare_count(), 1);
    }
}
