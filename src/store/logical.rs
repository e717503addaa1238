//! # Logical Row Ids
//!
//! A logical row id is a stable handle that survives record relocation. It
//! names a 6-byte slot on a translation page; the slot holds the record's
//! current physical row id and is rewritten in place whenever the record
//! moves. Translation pages live in the negative page-number space, so
//! logical and physical ids can never be confused for one another.
//!
//! ## Translation Page Layout
//!
//! 6-byte physical-id slots packed from offset 14 to the end of the page.
//! The logical id *is* the slot's location: `loc_compose(page, offset)`.
//!
//! ## Free Logical Ids
//!
//! Deleted logical ids are staged in memory until commit, then pushed onto
//! pages of type `FreeLogical`:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------
//! 14      2     entry count
//! 16      6*n   free logical ids (LIFO)
//! ```
//!
//! The allocator's type list doubles as the stack order: ids are pushed to
//! and popped from the tail page, and a drained tail page is freed. When no
//! free id exists anywhere, a fresh translation page is allocated and every
//! slot but the one being handed out is staged as free.

use eyre::{ensure, Result};

use super::alloc::PageManager;
use super::cache::PageFile;
use super::page::PageType;
use super::{loc_compose, loc_offset, loc_page, PAGE_HEADER_SIZE};

const SLOT_SIZE: usize = 6;
const COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = COUNT_OFFSET + 2;

fn slots_per_page(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE) / SLOT_SIZE
}

fn free_page_capacity(page_size: usize) -> usize {
    (page_size - ENTRIES_OFFSET) / SLOT_SIZE
}

pub struct LogicalRowIdManager {
    pending_free: Vec<i64>,
}

impl LogicalRowIdManager {
    pub fn new() -> Self {
        Self {
            pending_free: Vec::new(),
        }
    }

    /// Allocates a logical id and points it at `phys_id`. Reuses a freed id
    /// when one exists; otherwise grows the translation space by one page.
    pub fn insert(
        &mut self,
        file: &mut PageFile,
        pages: &mut PageManager,
        phys_id: i64,
    ) -> Result<i64> {
        let log_id = match self.take_free(file, pages)? {
            Some(id) => id,
            None => self.grow(file, pages)?,
        };
        self.update(file, log_id, phys_id)?;
        Ok(log_id)
    }

    /// Resolves a logical id to the physical id it currently points at.
    /// Returns 0 for a slot that was never written.
    pub fn fetch(&self, file: &mut PageFile, log_id: i64) -> Result<i64> {
        let page_no = loc_page(log_id, file.shift());
        let offset = loc_offset(log_id, file.shift());
        ensure!(
            page_no < 0 && offset >= PAGE_HEADER_SIZE,
            "{log_id} is not a logical row id"
        );

        let buf = file.get(page_no)?;
        if buf.is_blank() {
            file.release(buf, false);
            return Ok(0);
        }
        let checked = buf.expect_type(PageType::Translation);
        let phys_id = buf.get_six(offset);
        file.release(buf, false);
        checked?;
        Ok(phys_id)
    }

    /// Repoints an existing logical id at a new physical id.
    pub fn update(&mut self, file: &mut PageFile, log_id: i64, phys_id: i64) -> Result<()> {
        let page_no = loc_page(log_id, file.shift());
        let offset = loc_offset(log_id, file.shift());
        ensure!(
            page_no < 0 && offset >= PAGE_HEADER_SIZE,
            "{log_id} is not a logical row id"
        );

        let mut buf = file.get(page_no)?;
        let checked = buf.expect_type(PageType::Translation);
        if let Err(err) = checked {
            file.release(buf, false);
            return Err(err);
        }
        buf.put_six(offset, phys_id);
        file.release(buf, true);
        Ok(())
    }

    /// Clears a logical id and stages it for reuse after the next commit.
    pub fn delete(&mut self, file: &mut PageFile, log_id: i64) -> Result<()> {
        self.update(file, log_id, 0)?;
        self.pending_free.push(log_id);
        Ok(())
    }

    fn take_free(&mut self, file: &mut PageFile, pages: &mut PageManager) -> Result<Option<i64>> {
        if let Some(id) = self.pending_free.pop() {
            return Ok(Some(id));
        }

        let tail = pages.last(PageType::FreeLogical);
        if tail == 0 {
            return Ok(None);
        }
        let mut buf = file.get(tail)?;
        if let Err(err) = buf.expect_type(PageType::FreeLogical) {
            file.release(buf, false);
            return Err(err);
        }
        let count = buf.get_u16(COUNT_OFFSET) as usize;
        debug_assert!(count > 0, "empty free-logical page left on the list");
        let id = buf.get_six(ENTRIES_OFFSET + (count - 1) * SLOT_SIZE);
        buf.put_u16(COUNT_OFFSET, (count - 1) as u16);

        if count == 1 {
            file.release(buf, true);
            pages.free(file, PageType::FreeLogical, tail)?;
        } else {
            file.release(buf, true);
        }
        Ok(Some(id))
    }

    fn grow(&mut self, file: &mut PageFile, pages: &mut PageManager) -> Result<i64> {
        let page_no = pages.allocate(file, PageType::Translation)?;
        let shift = file.shift();
        let slots = slots_per_page(file.page_size());

        let first = loc_compose(page_no, PAGE_HEADER_SIZE, shift);
        for slot in 1..slots {
            let offset = PAGE_HEADER_SIZE + slot * SLOT_SIZE;
            self.pending_free.push(loc_compose(page_no, offset, shift));
        }
        Ok(first)
    }

    /// Flushes staged free ids onto the durable free-logical stack.
    pub fn commit(&mut self, file: &mut PageFile, pages: &mut PageManager) -> Result<()> {
        if self.pending_free.is_empty() {
            return Ok(());
        }
        let capacity = free_page_capacity(file.page_size());

        for id in std::mem::take(&mut self.pending_free) {
            let mut tail = pages.last(PageType::FreeLogical);
            if tail != 0 {
                let buf = file.get(tail)?;
                let full = buf.get_u16(COUNT_OFFSET) as usize >= capacity;
                file.release(buf, false);
                if full {
                    tail = 0;
                }
            }
            if tail == 0 {
                tail = pages.allocate(file, PageType::FreeLogical)?;
            }
            let mut buf = file.get(tail)?;
            let count = buf.get_u16(COUNT_OFFSET) as usize;
            buf.put_six(ENTRIES_OFFSET + count * SLOT_SIZE, id);
            buf.put_u16(COUNT_OFFSET, (count + 1) as u16);
            file.release(buf, true);
        }
        Ok(())
    }

    /// Drops free ids staged since the last commit.
    pub fn rollback(&mut self) {
        self.pending_free.clear();
    }
}

impl Default for LogicalRowIdManager {
    fn default() -> Self {
        Self::new()
    }
}
