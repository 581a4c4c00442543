//! Page replacement policies for the buffer pool.

use parking_lot::Mutex;

use crate::frame::FrameId;

/// Trait for page replacement algorithms.
///
/// The pool records accesses and removals; `evict` consults the supplied
/// predicate so that pinned frames are never selected.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame among those the predicate accepts.
    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of frames currently tracked.
    fn len(&self) -> usize;

    /// Returns true when no frames are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Least-recently-used replacement.
///
/// Tracks access recency in a queue; `evict` scans from the cold end and
/// returns the first frame the predicate accepts.
pub struct LruReplacer {
    inner: Mutex<LruInner>,
}

struct LruInner {
    /// Frame ids ordered cold-to-hot.
    queue: Vec<FrameId>,
}

impl LruReplacer {
    /// Creates an LRU replacer sized for the given frame count.
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                queue: Vec::with_capacity(num_frames),
            }),
        }
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.queue.iter().position(|&f| f == frame_id) {
            inner.queue.remove(pos);
        }
        inner.queue.push(frame_id);
    }

    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let pos = inner.queue.iter().position(|&f| evictable(f))?;
        Some(inner.queue.remove(pos))
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.queue.iter().position(|&f| f == frame_id) {
            inner.queue.remove(pos);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
