//! Buffer pool manager.

use parking_lot::Mutex;
use std::collections::HashMap;

use kaze_common::page::PAGE_SIZE;
use kaze_common::types::PageId;
use kaze_common::{KazeError, Result};

use crate::frame::{Frame, FrameId};
use crate::replacer::{LruReplacer, Replacer};

/// A dirty page that was evicted from the buffer pool.
///
/// The caller must write this to disk before reusing the frame's old
/// contents, or the modification is lost.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - page id to frame id mapping
/// - free frame list for cold frames
/// - LRU replacement for eviction
/// - pin counting
///
/// Pinned frames are never evicted; evicting a dirty frame hands its bytes
/// back to the caller as an [`EvictedPage`] for write-back.
pub struct BufferPool {
    /// Array of buffer frames.
    frames: Vec<Frame>,
    /// Page id to frame id mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame ids.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: LruReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| Frame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Sum of pin counts across all frames.
    ///
    /// Zero after every completed public operation; used by tests to verify
    /// the pinning discipline.
    pub fn pinned_total(&self) -> u32 {
        self.frames.iter().map(|f| f.pin_count()).sum()
    }

    /// Fetches a resident page, pinning its frame.
    ///
    /// Returns None on a miss; the caller loads from disk via
    /// [`BufferPool::load_page`].
    pub fn fetch_page(&self, page_id: PageId) -> Option<&Frame> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Allocates a frame for a new page, evicting if necessary.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0);

        let Some(victim_id) = victim_id else {
            return Err(KazeError::NoFreeFrames);
        };

        let frame = &self.frames[victim_id.0 as usize];
        let evicted = if frame.is_dirty() {
            frame.page_id().map(|page_id| {
                let guard = frame.read_data();
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**guard);
                EvictedPage { page_id, data }
            })
        } else {
            None
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.lock().remove(&old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Registers a page in the pool, returning its pinned frame.
    ///
    /// If the page is already resident the existing frame is pinned and
    /// returned. Otherwise a frame is allocated (possibly evicting) and
    /// reset; the caller fills it.
    pub fn new_page(&self, page_id: PageId) -> Result<(&Frame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.lock().get(&page_id).copied() {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.lock().insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        Ok((frame, evicted))
    }

    /// Loads page bytes into the pool, returning the pinned frame.
    pub fn load_page(&self, page_id: PageId, data: &[u8]) -> Result<(&Frame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Unpins a page, latching the dirty flag when requested.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let Some(frame_id) = self.page_table.lock().get(&page_id).copied() else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if is_dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
        true
    }

    /// Flushes one page through the callback if it is dirty.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let Some(frame_id) = self.page_table.lock().get(&page_id).copied() else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if !frame.is_dirty() {
            return Ok(false);
        }
        let data = frame.read_data();
        flush_fn(page_id, &**data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every dirty page through the callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let resident: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .map(|(&p, &f)| (p, f))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops an unpinned page from the pool without flushing.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut table = self.page_table.lock();
        let Some(frame_id) = table.get(&page_id).copied() else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return false;
        }
        table.remove(&page_id);
        drop(table);

        self.replacer.remove(frame_id);
        frame.reset();
        self.free_list.lock().push(frame_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_and_fetch() {
        let pool = BufferPool::new(10);
        let (frame, evicted) = pool.new_page(2).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(2));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);

        pool.unpin_page(2, false);
        let frame = pool.fetch_page(2).unwrap();
        assert!(frame.is_pinned());
        pool.unpin_page(2, false);
        assert_eq!(pool.pinned_total(), 0);
    }

    #[test]
    fn test_fetch_miss() {
        let pool = BufferPool::new(4);
        assert!(pool.fetch_page(99).is_none());
    }

    #[test]
    fn test_dirty_latches_until_flush() {
        let pool = BufferPool::new(4);
        pool.new_page(2).unwrap();
        pool.unpin_page(2, true);

        // Re-pinning and unpinning clean does not clear the flag.
        pool.fetch_page(2).unwrap();
        pool.unpin_page(2, false);
        let frame = pool.fetch_page(2).unwrap();
        assert!(frame.is_dirty());
        pool.unpin_page(2, false);

        let mut flushed = Vec::new();
        pool.flush_all(|pid, _| {
            flushed.push(pid);
            Ok(())
        })
        .unwrap();
        assert_eq!(flushed, vec![2]);
        assert!(!pool.fetch_page(2).unwrap().is_dirty());
        pool.unpin_page(2, false);
    }

    #[test]
    fn test_eviction_prefers_unpinned() {
        let pool = BufferPool::new(2);
        pool.new_page(2).unwrap();
        pool.new_page(3).unwrap();
        pool.unpin_page(3, false);

        // Page 2 stays pinned, so page 3 is the victim.
        pool.new_page(4).unwrap();
        assert!(pool.contains(2));
        assert!(!pool.contains(3));
        assert!(pool.contains(4));
    }

    #[test]
    fn test_eviction_returns_dirty_page() {
        let pool = BufferPool::new(1);
        let (frame, _) = pool.new_page(2).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(2, true);

        let (_, evicted) = pool.new_page(3).unwrap();
        let evicted = evicted.expect("dirty page must surface on eviction");
        assert_eq!(evicted.page_id, 2);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_all_pinned_fails() {
        let pool = BufferPool::new(2);
        pool.new_page(2).unwrap();
        pool.new_page(3).unwrap();
        let err = pool.new_page(4).unwrap_err();
        assert!(matches!(err, KazeError::NoFreeFrames));
    }

    #[test]
    fn test_load_page_copies_bytes() {
        let pool = BufferPool::new(4);
        let mut data = [0u8; PAGE_SIZE];
        data[7] = 0x7E;
        let (frame, _) = pool.load_page(2, &data).unwrap();
        assert_eq!(frame.read_data()[7], 0x7E);
        pool.unpin_page(2, false);
    }

    #[test]
    fn test_delete_page() {
        let pool = BufferPool::new(4);
        pool.new_page(2).unwrap();

        // Pinned: refuse.
        assert!(!pool.delete_page(2));
        pool.unpin_page(2, false);

        assert!(pool.delete_page(2));
        assert!(!pool.contains(2));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_duplicate_new_page_returns_existing() {
        let pool = BufferPool::new(4);
        let (frame, _) = pool.new_page(2).unwrap();
        frame.write_data()[0] = 0x11;
        pool.unpin_page(2, true);

        let (frame, evicted) = pool.new_page(2).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.read_data()[0], 0x11);
        assert_eq!(pool.page_count(), 1);
        pool.unpin_page(2, false);
    }
}
