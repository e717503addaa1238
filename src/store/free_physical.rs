//! # Free Physical Slot Tracking
//!
//! When a record is deleted its slot (page location plus rounded available
//! size) is remembered so a later insert of a compatible size can reuse it
//! instead of consuming fresh page space.
//!
//! ## Size Classes
//!
//! A single root page (type `FreePhysicalRoot`) holds one 6-byte chain-head
//! pointer per size class. Each class covers a contiguous band of available
//! sizes; a lookup for `size` scans class `size / width` and every class
//! above it, so any entry it returns is guaranteed at least as large as the
//! request. Only the head page of each class chain is scanned; deeper pages
//! become reachable as heads drain and are freed.
//!
//! ## Slot Page Layout (type `FreePhysical`)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------
//! 14      6     next page in this class chain
//! 20      2     entry count
//! 22      8*n   entries: 6-byte row id + 2-byte available size
//! ```
//!
//! The 2-byte entry size caps tracking at 65535 bytes. Freed slots larger
//! than that are simply not tracked; after continuation-page trimming such
//! slots only occur with very large page sizes.
//!
//! ## Transaction Boundary
//!
//! Frees accumulate in memory and are flushed to slot pages at commit, so a
//! rolled-back delete never leaks its slot into the reuse pool.

use eyre::Result;
use tracing::debug;

use super::alloc::PageManager;
use super::cache::PageFile;
use super::page::PageType;
use super::PAGE_HEADER_SIZE;

const NEXT_IN_CLASS_OFFSET: usize = PAGE_HEADER_SIZE;
const COUNT_OFFSET: usize = NEXT_IN_CLASS_OFFSET + 6;
const ENTRIES_OFFSET: usize = COUNT_OFFSET + 2;
const ENTRY_SIZE: usize = 8;

/// Largest available size an entry can record.
const MAX_TRACKED_SIZE: usize = u16::MAX as usize;

fn class_count(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE) / 6
}

fn class_width(page_size: usize) -> usize {
    1 + MAX_TRACKED_SIZE / class_count(page_size)
}

fn class_of(size: usize, page_size: usize) -> usize {
    (size / class_width(page_size)).min(class_count(page_size) - 1)
}

fn page_capacity(page_size: usize) -> usize {
    (page_size - ENTRIES_OFFSET) / ENTRY_SIZE
}

fn class_slot_offset(class: usize) -> usize {
    PAGE_HEADER_SIZE + class * 6
}

pub struct FreePhysicalTracker {
    pending: Vec<(i64, usize)>,
}

impl FreePhysicalTracker {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Remembers a freed slot for reuse after the next commit. `size` is the
    /// slot's rounded available size.
    pub fn put_free_record(&mut self, id: i64, size: usize) {
        if size > MAX_TRACKED_SIZE {
            debug!(id, size, "freed slot too large to track, abandoning");
            return;
        }
        self.pending.push((id, size));
    }

    /// Looks for a previously freed slot with available size in
    /// `size ..= max_size` and removes it from the pool. The upper bound
    /// exists because a reused slot keeps its recorded available size, and
    /// the record header can only express a bounded gap between available
    /// and current size.
    pub fn get_free_record(
        &mut self,
        file: &mut PageFile,
        pages: &mut PageManager,
        size: usize,
        max_size: usize,
    ) -> Result<Option<(i64, usize)>> {
        let root_no = pages.first(PageType::FreePhysicalRoot);
        if root_no == 0 || size > MAX_TRACKED_SIZE {
            return Ok(None);
        }
        let page_size = file.page_size();

        let mut root = file.get(root_no)?;
        if let Err(err) = root.expect_type(PageType::FreePhysicalRoot) {
            file.release(root, false);
            return Err(err);
        }

        for class in class_of(size, page_size)..class_count(page_size) {
            let head = root.get_six(class_slot_offset(class));
            if head == 0 {
                continue;
            }
            let mut slot = file.get(head)?;
            if let Err(err) = slot.expect_type(PageType::FreePhysical) {
                file.release(slot, false);
                file.release(root, false);
                return Err(err);
            }
            let count = slot.get_u16(COUNT_OFFSET) as usize;
            let mut found = None;
            for entry in 0..count {
                let off = ENTRIES_OFFSET + entry * ENTRY_SIZE;
                let entry_size = slot.get_u16(off + 6) as usize;
                if entry_size >= size && entry_size <= max_size {
                    found = Some((entry, slot.get_six(off), entry_size));
                    break;
                }
            }
            let Some((entry, id, entry_size)) = found else {
                file.release(slot, false);
                continue;
            };

            // Swap the last entry into the hole.
            let last = ENTRIES_OFFSET + (count - 1) * ENTRY_SIZE;
            if entry * ENTRY_SIZE + ENTRIES_OFFSET != last {
                let moved_id = slot.get_six(last);
                let moved_size = slot.get_u16(last + 6);
                let off = ENTRIES_OFFSET + entry * ENTRY_SIZE;
                slot.put_six(off, moved_id);
                slot.put_u16(off + 6, moved_size);
            }
            slot.put_u16(COUNT_OFFSET, (count - 1) as u16);

            if count == 1 {
                let next = slot.get_six(NEXT_IN_CLASS_OFFSET);
                root.put_six(class_slot_offset(class), next);
                file.release(slot, true);
                file.release(root, true);
                pages.free(file, PageType::FreePhysical, head)?;
            } else {
                file.release(slot, true);
                file.release(root, true);
            }
            debug!(id, entry_size, "reusing freed record slot");
            return Ok(Some((id, entry_size)));
        }

        file.release(root, false);
        Ok(None)
    }

    /// Flushes pending frees into slot pages, allocating the root and new
    /// slot pages as needed.
    pub fn commit(&mut self, file: &mut PageFile, pages: &mut PageManager) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let page_size = file.page_size();
        let capacity = page_capacity(page_size);

        let root_no = match pages.first(PageType::FreePhysicalRoot) {
            0 => pages.allocate(file, PageType::FreePhysicalRoot)?,
            existing => existing,
        };

        // Sorting groups same-class entries so consecutive inserts hit the
        // same head page.
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_unstable_by_key(|&(id, size)| (size, id));
        for (id, size) in pending {
            let class = class_of(size, page_size);

            let mut root = file.get(root_no)?;
            let head = root.get_six(class_slot_offset(class));

            let mut target = head;
            if head != 0 {
                let slot = file.get(head)?;
                let full = slot.get_u16(COUNT_OFFSET) as usize >= capacity;
                file.release(slot, false);
                if full {
                    target = 0;
                }
            }
            if target == 0 {
                // Allocation touches other pages, so park the root first.
                file.release(root, false);
                target = pages.allocate(file, PageType::FreePhysical)?;
                let mut slot = file.get(target)?;
                slot.put_six(NEXT_IN_CLASS_OFFSET, head);
                slot.put_u16(COUNT_OFFSET, 0);
                file.release(slot, true);
                root = file.get(root_no)?;
                root.put_six(class_slot_offset(class), target);
            }
            file.release(root, true);

            let mut slot = file.get(target)?;
            let count = slot.get_u16(COUNT_OFFSET) as usize;
            let off = ENTRIES_OFFSET + count * ENTRY_SIZE;
            slot.put_six(off, id);
            slot.put_u16(off + 6, size as u16);
            slot.put_u16(COUNT_OFFSET, (count + 1) as u16);
            file.release(slot, true);
        }
        Ok(())
    }

    /// Drops frees staged since the last commit.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }
}

impl Default for FreePhysicalTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::store::backend::MemBackend;

    const PS: usize = 512;

    fn fresh() -> (PageFile, PageManager, FreePhysicalTracker) {
        let backend = MemBackend::new(PS);
        let mut file = PageFile::new(
            Box::new(backend),
            &StoreOptions::default().page_size(PS),
        )
        .expect("should open");
        let pages = PageManager::load(&mut file).expect("should load");
        (file, pages, FreePhysicalTracker::new())
    }

    #[test]
    fn freed_slot_invisible_until_commit() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(0x1234, 100);

        let found = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up");
        assert!(found.is_none());

        tracker.commit(&mut file, &mut pages).expect("should flush");
        let found = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up");
        assert_eq!(found, Some((0x1234, 100)));
    }

    #[test]
    fn lookup_searches_higher_classes() {
        let (mut file, mut pages, mut tracker) = fresh();
        // Well above the width of the request's class.
        tracker.put_free_record(7, 60000);
        tracker.commit(&mut file, &mut pages).expect("should flush");

        let found = tracker
            .get_free_record(&mut file, &mut pages, 10, MAX_TRACKED_SIZE)
            .expect("should look up");
        assert_eq!(found, Some((7, 60000)));
    }

    #[test]
    fn lookup_honors_upper_bound() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(7, 1000);
        tracker.commit(&mut file, &mut pages).expect("should flush");

        let found = tracker
            .get_free_record(&mut file, &mut pages, 10, 264)
            .expect("should look up");
        assert!(found.is_none(), "slot larger than max_size must not match");

        let found = tracker
            .get_free_record(&mut file, &mut pages, 10, 1000)
            .expect("should look up");
        assert_eq!(found, Some((7, 1000)));
    }

    #[test]
    fn consumed_entry_is_removed() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(1, 100);
        tracker.put_free_record(2, 100);
        tracker.commit(&mut file, &mut pages).expect("should flush");

        let first = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up")
            .expect("should find");
        let second = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up")
            .expect("should find");
        assert_ne!(first.0, second.0);
        let third = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up");
        assert!(third.is_none());
    }

    #[test]
    fn drained_slot_page_is_freed() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(1, 100);
        tracker.commit(&mut file, &mut pages).expect("should flush");
        assert_ne!(pages.first(PageType::FreePhysical), 0);

        tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up")
            .expect("should find");
        assert_eq!(pages.first(PageType::FreePhysical), 0);
        assert_ne!(pages.first(PageType::Free), 0, "slot page went to free list");
    }

    #[test]
    fn oversized_slot_is_not_tracked() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(1, MAX_TRACKED_SIZE + 1);
        tracker.commit(&mut file, &mut pages).expect("should flush");
        assert_eq!(pages.first(PageType::FreePhysicalRoot), 0);
    }

    #[test]
    fn rollback_drops_pending_frees() {
        let (mut file, mut pages, mut tracker) = fresh();
        tracker.put_free_record(1, 100);
        tracker.rollback();
        tracker.commit(&mut file, &mut pages).expect("should flush");
        let found = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up");
        assert!(found.is_none());
    }

    #[test]
    fn slot_pages_chain_when_head_fills() {
        let (mut file, mut pages, mut tracker) = fresh();
        let capacity = page_capacity(PS);
        for i in 0..capacity + 1 {
            tracker.put_free_record(1000 + i as i64, 100);
        }
        tracker.commit(&mut file, &mut pages).expect("should flush");

        // Drain everything: the overflow entry sits in a second chained page
        // that becomes reachable once the head page drains and is freed.
        for _ in 0..capacity + 1 {
            tracker
                .get_free_record(&mut file, &mut pages, 100, 354)
                .expect("should look up")
                .expect("should find");
        }
        let found = tracker
            .get_free_record(&mut file, &mut pages, 100, 354)
            .expect("should look up");
        assert!(found.is_none());
        assert_eq!(pages.first(PageType::FreePhysical), 0);
    }
}
