//! Fixed-size page with a slotted record directory.
//!
//! Page layout (little-endian):
//! ```text
//! +--------------------+ 0
//! | Page Header (36)   |
//! +--------------------+ 36
//! | Slot Directory     |  (offset u16, length u16) per slot, grows forward
//! +--------------------+ 36 + 4*slot_count
//! |     Free Space     |
//! +--------------------+ free_space_offset
//! | Record Payloads    |  grows backward from page end
//! +--------------------+ PAGE_SIZE
//! ```
//!
//! A slot with length 0 is a tombstone: reads return "not present" but the
//! slot id persists for any external references until the page is
//! reinitialized.

use serde::{Deserialize, Serialize};

use crate::error::{KazeError, Result};
use crate::types::{PageId, SlotId};

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Page magic, "KZPG".
pub const PAGE_MAGIC: u32 = 0x4B5A_5047;

/// Size of one slot directory entry (offset u16 + length u16).
pub const SLOT_ENTRY_SIZE: usize = 4;

/// Page types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Heap page holding table rows (also used by the catalog lists).
    Data = 1,
    /// B+ tree node page.
    Index = 2,
    /// The per-file metadata page.
    Metadata = 3,
    /// Member of the free-list chain.
    Free = 4,
}

impl PageType {
    /// Decodes the on-disk type tag.
    pub fn from_u8(tag: u8) -> Option<PageType> {
        match tag {
            1 => Some(PageType::Data),
            2 => Some(PageType::Index),
            3 => Some(PageType::Metadata),
            4 => Some(PageType::Free),
            _ => None,
        }
    }
}

/// Header at the start of every page.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_type: PageType,
    pub slot_count: u16,
    pub record_count: u16,
    /// Top of the payload heap; payloads are written below this offset.
    pub free_space_offset: u16,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 36;

    /// Creates a header for a freshly initialized page.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            slot_count: 0,
            record_count: 0,
            free_space_offset: PAGE_SIZE as u16,
            prev_page_id: crate::types::INVALID_PAGE_ID,
            next_page_id: crate::types::INVALID_PAGE_ID,
        }
    }

    /// Parses and validates a header from the start of a page buffer.
    pub fn read(data: &[u8]) -> Result<PageHeader> {
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let page_id = i64::from_le_bytes(data[4..12].try_into().expect("slice length"));
        if magic != PAGE_MAGIC {
            return Err(KazeError::InvalidRecordFormat(format!(
                "page {page_id} magic mismatch: {magic:#010x}"
            )));
        }
        let page_type = PageType::from_u8(data[12]).ok_or(KazeError::InvalidPageType {
            page_id,
            found: data[12],
        })?;
        Ok(PageHeader {
            page_id,
            page_type,
            slot_count: u16::from_le_bytes([data[14], data[15]]),
            record_count: u16::from_le_bytes([data[16], data[17]]),
            free_space_offset: u16::from_le_bytes([data[18], data[19]]),
            prev_page_id: i64::from_le_bytes(data[20..28].try_into().expect("slice length")),
            next_page_id: i64::from_le_bytes(data[28..36].try_into().expect("slice length")),
        })
    }

    /// Writes the header to the start of a page buffer.
    pub fn write(&self, data: &mut [u8]) {
        data[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        data[4..12].copy_from_slice(&self.page_id.to_le_bytes());
        data[12] = self.page_type as u8;
        data[13] = 0;
        data[14..16].copy_from_slice(&self.slot_count.to_le_bytes());
        data[16..18].copy_from_slice(&self.record_count.to_le_bytes());
        data[18..20].copy_from_slice(&self.free_space_offset.to_le_bytes());
        data[20..28].copy_from_slice(&self.prev_page_id.to_le_bytes());
        data[28..36].copy_from_slice(&self.next_page_id.to_le_bytes());
    }

    /// Contiguous free bytes between the directory end and the payload heap.
    pub fn free_space(&self) -> usize {
        let directory_end = Self::SIZE + self.slot_count as usize * SLOT_ENTRY_SIZE;
        (self.free_space_offset as usize).saturating_sub(directory_end)
    }
}

/// An owned page buffer.
///
/// The `*_in_slice` associated functions provide the same operations over a
/// borrowed buffer so that callers holding buffer-pool frames can mutate
/// pages without copying them out.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Creates a new initialized page.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        PageHeader::new(page_id, page_type).write(&mut data[..]);
        Self { data }
    }

    /// Wraps raw page bytes.
    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Self {
        Self {
            data: Box::new(data),
        }
    }

    /// Returns the raw page bytes.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the raw page bytes mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// Parses the page header.
    pub fn header(&self) -> Result<PageHeader> {
        PageHeader::read(&self.data[..])
    }

    /// Reinitializes the page in place, dropping all slots and payloads.
    pub fn init(&mut self, page_id: PageId, page_type: PageType) {
        Self::init_in_slice(&mut self.data[..], page_id, page_type);
    }

    /// Inserts a record payload; see [`Page::insert_in_slice`].
    pub fn insert(&mut self, payload: &[u8]) -> Result<SlotId> {
        Self::insert_in_slice(&mut self.data[..], payload)
    }

    /// Reads a live record payload, or None for tombstoned/missing slots.
    pub fn read(&self, slot: SlotId) -> Option<&[u8]> {
        Self::read_in_slice(&self.data[..], slot)
    }

    /// Updates a record in place; see [`Page::update_in_slice`].
    pub fn update(&mut self, slot: SlotId, payload: &[u8]) -> Result<bool> {
        Self::update_in_slice(&mut self.data[..], slot, payload)
    }

    /// Tombstones a slot; see [`Page::erase_in_slice`].
    pub fn erase(&mut self, slot: SlotId) -> bool {
        Self::erase_in_slice(&mut self.data[..], slot)
    }

    /// Contiguous free bytes remaining.
    pub fn free_space(&self) -> usize {
        Self::free_space_in_slice(&self.data[..])
    }

    // =========================================================================
    // In-slice operations
    // =========================================================================

    /// Reinitializes a page buffer in place.
    pub fn init_in_slice(data: &mut [u8], page_id: PageId, page_type: PageType) {
        data.fill(0);
        PageHeader::new(page_id, page_type).write(data);
    }

    #[inline]
    fn slot_entry(data: &[u8], slot: SlotId) -> (u16, u16) {
        let base = PageHeader::SIZE + slot as usize * SLOT_ENTRY_SIZE;
        let offset = u16::from_le_bytes([data[base], data[base + 1]]);
        let length = u16::from_le_bytes([data[base + 2], data[base + 3]]);
        (offset, length)
    }

    #[inline]
    fn set_slot_entry(data: &mut [u8], slot: SlotId, offset: u16, length: u16) {
        let base = PageHeader::SIZE + slot as usize * SLOT_ENTRY_SIZE;
        data[base..base + 2].copy_from_slice(&offset.to_le_bytes());
        data[base + 2..base + 4].copy_from_slice(&length.to_le_bytes());
    }

    /// Contiguous free bytes in a page buffer.
    pub fn free_space_in_slice(data: &[u8]) -> usize {
        let slot_count = u16::from_le_bytes([data[14], data[15]]) as usize;
        let free_space_offset = u16::from_le_bytes([data[18], data[19]]) as usize;
        let directory_end = PageHeader::SIZE + slot_count * SLOT_ENTRY_SIZE;
        free_space_offset.saturating_sub(directory_end)
    }

    /// Payload bytes held by tombstoned slots, reclaimable by compaction.
    pub fn reclaimable_space_in_slice(data: &[u8]) -> usize {
        let slot_count = u16::from_le_bytes([data[14], data[15]]);
        let free_space_offset = u16::from_le_bytes([data[18], data[19]]) as usize;
        let mut live = 0usize;
        for i in 0..slot_count {
            let (_, length) = Self::slot_entry(data, i);
            live += length as usize;
        }
        (PAGE_SIZE - free_space_offset).saturating_sub(live)
    }

    /// Rewrites live payloads contiguously from the page end, reclaiming
    /// the space of erased records. Slot ids are preserved; tombstoned
    /// entries stay in the directory with length 0.
    pub fn compact_in_slice(data: &mut [u8]) -> Result<()> {
        let mut header = PageHeader::read(data)?;

        let mut live: Vec<(SlotId, Vec<u8>)> = Vec::new();
        for i in 0..header.slot_count {
            let (offset, length) = Self::slot_entry(data, i);
            if length != 0 {
                live.push((i, data[offset as usize..(offset + length) as usize].to_vec()));
            }
        }

        let mut write_end = PAGE_SIZE;
        for (slot, payload) in &live {
            write_end -= payload.len();
            data[write_end..write_end + payload.len()].copy_from_slice(payload);
            Self::set_slot_entry(data, *slot, write_end as u16, payload.len() as u16);
        }

        header.free_space_offset = write_end as u16;
        header.write(data);
        Ok(())
    }

    /// Inserts a record payload into a page buffer.
    ///
    /// Reuses the first tombstoned slot if one exists, else appends a new
    /// directory entry. When the contiguous free span is too small but
    /// tombstoned payload bytes would cover the shortfall, the page is
    /// compacted first. Fails with `PAGE_FULL` otherwise.
    pub fn insert_in_slice(data: &mut [u8], payload: &[u8]) -> Result<SlotId> {
        let needed = payload.len() + SLOT_ENTRY_SIZE;
        if Self::free_space_in_slice(data) < needed {
            let reclaimable = Self::reclaimable_space_in_slice(data);
            if Self::free_space_in_slice(data) + reclaimable < needed {
                let header = PageHeader::read(data)?;
                return Err(KazeError::PageFull {
                    page_id: header.page_id,
                });
            }
            Self::compact_in_slice(data)?;
        }
        let mut header = PageHeader::read(data)?;

        let mut slot = None;
        for i in 0..header.slot_count {
            let (_, length) = Self::slot_entry(data, i);
            if length == 0 {
                slot = Some(i);
                break;
            }
        }

        let new_offset = header.free_space_offset - payload.len() as u16;
        data[new_offset as usize..new_offset as usize + payload.len()].copy_from_slice(payload);

        let slot = match slot {
            Some(reused) => reused,
            None => {
                let appended = header.slot_count;
                header.slot_count += 1;
                appended
            }
        };
        Self::set_slot_entry(data, slot, new_offset, payload.len() as u16);

        header.free_space_offset = new_offset;
        header.record_count += 1;
        header.write(data);
        Ok(slot)
    }

    /// Reads a live record payload from a page buffer.
    pub fn read_in_slice(data: &[u8], slot: SlotId) -> Option<&[u8]> {
        let slot_count = u16::from_le_bytes([data[14], data[15]]);
        if slot >= slot_count {
            return None;
        }
        let (offset, length) = Self::slot_entry(data, slot);
        if length == 0 {
            return None;
        }
        Some(&data[offset as usize..offset as usize + length as usize])
    }

    /// Updates a record in place.
    ///
    /// Returns Ok(true) when the new payload fit in the old one's space
    /// (the payload is rewritten at the same offset and the slot length
    /// shrunk), Ok(false) when it did not and the caller must erase and
    /// re-insert, accepting a new record id.
    pub fn update_in_slice(data: &mut [u8], slot: SlotId, payload: &[u8]) -> Result<bool> {
        let slot_count = u16::from_le_bytes([data[14], data[15]]);
        if slot >= slot_count {
            return Err(KazeError::InvalidArgument(format!(
                "update of missing slot {slot}"
            )));
        }
        let (offset, length) = Self::slot_entry(data, slot);
        if length == 0 {
            return Err(KazeError::InvalidArgument(format!(
                "update of tombstoned slot {slot}"
            )));
        }
        if payload.len() > length as usize {
            return Ok(false);
        }
        data[offset as usize..offset as usize + payload.len()].copy_from_slice(payload);
        Self::set_slot_entry(data, slot, offset, payload.len() as u16);
        Ok(true)
    }

    /// Tombstones a slot. The payload bytes are not reclaimed.
    ///
    /// Returns false if the slot is missing or already tombstoned.
    pub fn erase_in_slice(data: &mut [u8], slot: SlotId) -> bool {
        let slot_count = u16::from_le_bytes([data[14], data[15]]);
        if slot >= slot_count {
            return false;
        }
        let (offset, length) = Self::slot_entry(data, slot);
        if length == 0 {
            return false;
        }
        Self::set_slot_entry(data, slot, offset, 0);
        let record_count = u16::from_le_bytes([data[16], data[17]]).saturating_sub(1);
        data[16..18].copy_from_slice(&record_count.to_le_bytes());
        true
    }

    /// Reads the next-page link without parsing the whole header.
    pub fn next_page_id_in_slice(data: &[u8]) -> PageId {
        i64::from_le_bytes(data[28..36].try_into().expect("slice length"))
    }

    /// Writes the next-page link.
    pub fn set_next_page_id_in_slice(data: &mut [u8], next: PageId) {
        data[28..36].copy_from_slice(&next.to_le_bytes());
    }

    /// Reads the previous-page link.
    pub fn prev_page_id_in_slice(data: &[u8]) -> PageId {
        i64::from_le_bytes(data[20..28].try_into().expect("slice length"))
    }

    /// Writes the previous-page link.
    pub fn set_prev_page_id_in_slice(data: &mut [u8], prev: PageId) {
        data[20..28].copy_from_slice(&prev.to_le_bytes());
    }

    /// Reads the slot count.
    pub fn slot_count_in_slice(data: &[u8]) -> u16 {
        u16::from_le_bytes([data[14], data[15]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = PageHeader::new(9, PageType::Data);
        header.slot_count = 3;
        header.record_count = 2;
        header.free_space_offset = 4000;
        header.prev_page_id = 4;
        header.next_page_id = 11;
        header.write(&mut buf);

        let read = PageHeader::read(&buf).unwrap();
        assert_eq!(read.page_id, 9);
        assert_eq!(read.page_type, PageType::Data);
        assert_eq!(read.slot_count, 3);
        assert_eq!(read.record_count, 2);
        assert_eq!(read.free_space_offset, 4000);
        assert_eq!(read.prev_page_id, 4);
        assert_eq!(read.next_page_id, 11);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let buf = [0u8; PAGE_SIZE];
        let err = PageHeader::read(&buf).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::StatusCode::InvalidRecordFormat
        );
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let mut buf = [0u8; PAGE_SIZE];
        PageHeader::new(2, PageType::Data).write(&mut buf);
        buf[12] = 99;
        let err = PageHeader::read(&buf).unwrap_err();
        assert_eq!(err.code(), crate::error::StatusCode::InvalidPageType);
    }

    #[test]
    fn test_insert_and_read() {
        let mut page = Page::new(2, PageType::Data);
        let slot = page.insert(b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.read(slot), Some(&b"hello"[..]));

        let header = page.header().unwrap();
        assert_eq!(header.slot_count, 1);
        assert_eq!(header.record_count, 1);
        assert_eq!(header.free_space_offset as usize, PAGE_SIZE - 5);
    }

    #[test]
    fn test_payload_grows_backward() {
        let mut page = Page::new(2, PageType::Data);
        page.insert(b"aaaa").unwrap();
        page.insert(b"bb").unwrap();
        let header = page.header().unwrap();
        assert_eq!(header.free_space_offset as usize, PAGE_SIZE - 6);
        assert_eq!(page.read(0), Some(&b"aaaa"[..]));
        assert_eq!(page.read(1), Some(&b"bb"[..]));
    }

    #[test]
    fn test_erase_tombstones() {
        let mut page = Page::new(2, PageType::Data);
        let slot = page.insert(b"gone").unwrap();
        assert!(page.erase(slot));
        assert_eq!(page.read(slot), None);
        assert!(!page.erase(slot));

        let header = page.header().unwrap();
        // Tombstoned slots stay in the directory.
        assert_eq!(header.slot_count, 1);
        assert_eq!(header.record_count, 0);
    }

    #[test]
    fn test_insert_reuses_tombstoned_slot() {
        let mut page = Page::new(2, PageType::Data);
        let a = page.insert(b"first").unwrap();
        let b = page.insert(b"second").unwrap();
        page.erase(a);

        let c = page.insert(b"third").unwrap();
        assert_eq!(c, a);
        assert_eq!(page.header().unwrap().slot_count, 2);
        assert_eq!(page.read(b), Some(&b"second"[..]));
        assert_eq!(page.read(c), Some(&b"third"[..]));
    }

    #[test]
    fn test_update_in_place_shrink() {
        let mut page = Page::new(2, PageType::Data);
        let slot = page.insert(b"long payload").unwrap();
        assert!(page.update(slot, b"short").unwrap());
        assert_eq!(page.read(slot), Some(&b"short"[..]));
    }

    #[test]
    fn test_update_rejects_growth() {
        let mut page = Page::new(2, PageType::Data);
        let slot = page.insert(b"tiny").unwrap();
        assert!(!page.update(slot, b"much larger payload").unwrap());
        // Untouched on failure.
        assert_eq!(page.read(slot), Some(&b"tiny"[..]));
    }

    #[test]
    fn test_update_of_tombstone_is_error() {
        let mut page = Page::new(2, PageType::Data);
        let slot = page.insert(b"x").unwrap();
        page.erase(slot);
        assert!(page.update(slot, b"y").is_err());
        assert!(page.update(99, b"y").is_err());
    }

    #[test]
    fn test_page_full() {
        let mut page = Page::new(2, PageType::Data);
        let payload = vec![0u8; 1000];
        let mut inserted = 0;
        loop {
            match page.insert(&payload) {
                Ok(_) => inserted += 1,
                Err(err) => {
                    assert_eq!(err.code(), crate::error::StatusCode::PageFull);
                    break;
                }
            }
        }
        assert_eq!(inserted, 4);
    }

    #[test]
    fn test_compaction_reclaims_erased_payloads() {
        let mut page = Page::new(2, PageType::Data);
        let payload = vec![3u8; 1000];
        let mut slots = Vec::new();
        for _ in 0..4 {
            slots.push(page.insert(&payload).unwrap());
        }
        assert!(page.insert(&payload).is_err());

        // Tombstone everything; the contiguous span alone is still too
        // small, so the next insert must compact.
        for slot in &slots {
            page.erase(*slot);
        }
        assert!(Page::reclaimable_space_in_slice(page.as_bytes()) >= 4000);

        for _ in 0..4 {
            let slot = page.insert(&payload).unwrap();
            assert!(slots.contains(&slot));
        }
        assert_eq!(page.header().unwrap().slot_count, 4);
    }

    #[test]
    fn test_compaction_preserves_live_rows_and_slot_ids() {
        let mut page = Page::new(2, PageType::Data);
        let keep_a = page.insert(b"keep-a").unwrap();
        let dead = page.insert(&vec![0u8; 2000]).unwrap();
        let keep_b = page.insert(b"keep-b").unwrap();
        page.erase(dead);

        Page::compact_in_slice(page.as_bytes_mut()).unwrap();
        assert_eq!(page.read(keep_a), Some(&b"keep-a"[..]));
        assert_eq!(page.read(keep_b), Some(&b"keep-b"[..]));
        assert_eq!(page.read(dead), None);
        assert_eq!(Page::reclaimable_space_in_slice(page.as_bytes()), 0);
    }

    #[test]
    fn test_free_space_accounting() {
        let mut page = Page::new(2, PageType::Data);
        let initial = page.free_space();
        assert_eq!(initial, PAGE_SIZE - PageHeader::SIZE);

        page.insert(b"12345678").unwrap();
        assert_eq!(page.free_space(), initial - 8 - SLOT_ENTRY_SIZE);
    }

    #[test]
    fn test_init_resets_everything() {
        let mut page = Page::new(2, PageType::Data);
        page.insert(b"data").unwrap();
        page.init(5, PageType::Free);

        let header = page.header().unwrap();
        assert_eq!(header.page_id, 5);
        assert_eq!(header.page_type, PageType::Free);
        assert_eq!(header.slot_count, 0);
        assert_eq!(header.free_space_offset as usize, PAGE_SIZE);
        assert_eq!(page.read(0), None);
    }

    #[test]
    fn test_chain_links() {
        let mut page = Page::new(2, PageType::Data);
        Page::set_next_page_id_in_slice(page.as_bytes_mut(), 7);
        Page::set_prev_page_id_in_slice(page.as_bytes_mut(), 3);
        assert_eq!(Page::next_page_id_in_slice(page.as_bytes()), 7);
        assert_eq!(Page::prev_page_id_in_slice(page.as_bytes()), 3);
        let header = page.header().unwrap();
        assert_eq!(header.next_page_id, 7);
        assert_eq!(header.prev_page_id, 3);
    }
}
