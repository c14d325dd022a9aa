use std::sync::{Arc, Mutex, PoisonError};

use crate::core::CanvasSpec;
use crate::error::{LapseError, LapseResult};

/// Pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct FramePoolOpts {
    /// Maximum number of returned buffers kept for reuse.
    pub max_retained: usize,
}

impl Default for FramePoolOpts {
    fn default() -> Self {
        // The pipeline holds at most two buffers at a time (one composing,
        // one draining into the encoder), so a small cap is enough.
        Self { max_retained: 4 }
    }
}

/// Pool usage counters.
#[derive(Debug, Default, Clone)]
pub struct FramePoolStats {
    /// Fresh buffer allocations.
    pub allocations: u64,
    /// Buffers handed out from the free list.
    pub reuses: u64,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Highest number of buffers handed out at once.
    pub peak_outstanding: usize,
    /// Buffers currently on the free list.
    pub retained: usize,
    /// Returned buffers dropped because the free list was full.
    pub dropped_on_return: u64,
}

struct PoolInner {
    free: Vec<Vec<u8>>,
    max_retained: usize,
    allocations: u64,
    reuses: u64,
    outstanding: usize,
    peak_outstanding: usize,
    dropped_on_return: u64,
}

/// Pooled allocator for encoder-consumable frame buffers.
///
/// Every buffer is exactly `spec.frame_bytes()` long with tight stride. The
/// spec is fixed at construction; an export session never reconfigures it.
/// Buffers return to the pool when dropped, so they can travel into the
/// encode session and still be recycled.
pub struct FrameBufferPool {
    spec: CanvasSpec,
    inner: Arc<Mutex<PoolInner>>,
}

impl FrameBufferPool {
    /// Create a pool for `spec` with default retention.
    pub fn new(spec: CanvasSpec) -> Self {
        Self::with_opts(spec, FramePoolOpts::default())
    }

    /// Create a pool for `spec` with explicit options.
    pub fn with_opts(spec: CanvasSpec, opts: FramePoolOpts) -> Self {
        Self {
            spec,
            inner: Arc::new(Mutex::new(PoolInner {
                free: Vec::new(),
                max_retained: opts.max_retained,
                allocations: 0,
                reuses: 0,
                outstanding: 0,
                peak_outstanding: 0,
                dropped_on_return: 0,
            })),
        }
    }

    /// Canvas spec every buffer of this pool conforms to.
    pub fn spec(&self) -> CanvasSpec {
        self.spec
    }

    /// Hand out a buffer, reusing a returned one when available.
    ///
    /// Reused buffers keep their previous contents; the compositor always
    /// fills the full canvas before drawing. Allocation failure is fatal for
    /// the export and never retried here.
    pub fn allocate(&self) -> LapseResult<FrameBuffer> {
        let len = self.spec.frame_bytes();
        let mut inner = lock(&self.inner);

        let data = if let Some(data) = inner.free.pop() {
            inner.reuses = inner.reuses.saturating_add(1);
            data
        } else {
            let mut data = Vec::new();
            if let Err(e) = data.try_reserve_exact(len) {
                return Err(LapseError::allocation(format!(
                    "could not reserve {len} bytes for a {}x{} frame: {e}",
                    self.spec.width, self.spec.height
                )));
            }
            data.resize(len, 0);
            inner.allocations = inner.allocations.saturating_add(1);
            data
        };

        inner.outstanding += 1;
        inner.peak_outstanding = inner.peak_outstanding.max(inner.outstanding);
        drop(inner);

        Ok(FrameBuffer {
            data,
            spec: self.spec,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> FramePoolStats {
        let inner = lock(&self.inner);
        FramePoolStats {
            allocations: inner.allocations,
            reuses: inner.reuses,
            outstanding: inner.outstanding,
            peak_outstanding: inner.peak_outstanding,
            retained: inner.free.len(),
            dropped_on_return: inner.dropped_on_return,
        }
    }
}

fn lock(inner: &Mutex<PoolInner>) -> std::sync::MutexGuard<'_, PoolInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One canvas-sized pixel buffer on loan from a [`FrameBufferPool`].
///
/// Returns its storage to the pool on drop.
pub struct FrameBuffer {
    data: Vec<u8>,
    spec: CanvasSpec,
    pool: Arc<Mutex<PoolInner>>,
}

impl FrameBuffer {
    /// Canvas spec this buffer conforms to.
    pub fn spec(&self) -> CanvasSpec {
        self.spec
    }

    /// Frame bytes, row-major, tight stride.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable frame bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("spec", &self.spec)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let mut inner = lock(&self.pool);
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if inner.free.len() < inner.max_retained {
            inner.free.push(data);
        } else {
            inner.dropped_on_return = inner.dropped_on_return.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> CanvasSpec {
        CanvasSpec::new(8, 8)
    }

    #[test]
    fn buffers_match_spec_length() {
        let pool = FrameBufferPool::new(small_spec());
        let buf = pool.allocate().unwrap();
        assert_eq!(buf.as_slice().len(), 8 * 8 * 4);
        assert_eq!(buf.spec(), small_spec());
    }

    #[test]
    fn returned_buffers_are_reused() {
        let pool = FrameBufferPool::new(small_spec());
        let a = pool.allocate().unwrap();
        drop(a);
        let _b = pool.allocate().unwrap();

        let st = pool.stats();
        assert_eq!(st.allocations, 1);
        assert_eq!(st.reuses, 1);
        assert_eq!(st.outstanding, 1);
    }

    #[test]
    fn pool_honors_retention_cap() {
        let pool = FrameBufferPool::with_opts(small_spec(), FramePoolOpts { max_retained: 1 });
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        drop(a);
        drop(b);

        let st = pool.stats();
        assert_eq!(st.retained, 1);
        assert_eq!(st.dropped_on_return, 1);
        assert_eq!(st.outstanding, 0);
    }

    #[test]
    fn peak_outstanding_tracks_concurrent_loans() {
        let pool = FrameBufferPool::new(small_spec());
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        drop(a);
        let c = pool.allocate().unwrap();
        drop(b);
        drop(c);

        let st = pool.stats();
        assert_eq!(st.peak_outstanding, 2);
        assert_eq!(st.outstanding, 0);
    }
}
