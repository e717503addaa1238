//! # Page Types and Buffers
//!
//! This module defines the page-type enumeration, the shared page-header
//! accessors, and [`PageBuf`], the in-memory mutable view of one page that
//! the cache hands out.
//!
//! ## Page Types
//!
//! Each page's 2-byte magic is `BASE_PAGE_MAGIC + ordinal`:
//!
//! - **Free** (0): recycled page awaiting reuse
//! - **Data** (1): record payload page
//! - **Translation** (2): logical-id indirection table (negative-numbered)
//! - **FreeLogical** (3): freed logical row ids
//! - **FreePhysical** (4): freed physical row ids of one size class
//! - **FreePhysicalRoot** (5): per-size-class heads of FreePhysical chains
//!
//! ## Copy-on-Write
//!
//! A buffer read from the backend may be shared (for instance, an in-memory
//! backend handing out its own `Arc`'d page). The first in-place write takes
//! ownership via a copy, so a `PageBuf` never mutates storage that might be
//! visible elsewhere.
//!
//! ## Dirty and Transaction State
//!
//! The dirty flag is sticky: once any typed write has touched the buffer it
//! stays set until the cache stages the page for durability. The
//! transaction counter is an integer, not a boolean — a page may sit in more
//! than one pending log batch before it is durably applied, and decrementing
//! past zero is an invariant violation that panics.

use std::sync::Arc;

use eyre::{bail, Result};

use super::packed::{six_get, six_put};
use super::BASE_PAGE_MAGIC;

const MAGIC_OFFSET: usize = 0;
const PREV_OFFSET: usize = 2;
const NEXT_OFFSET: usize = 8;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 0,
    Data = 1,
    Translation = 2,
    FreeLogical = 3,
    FreePhysical = 4,
    FreePhysicalRoot = 5,
}

impl PageType {
    pub fn magic(self) -> u16 {
        BASE_PAGE_MAGIC + self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            PageType::Free => "free",
            PageType::Data => "data",
            PageType::Translation => "translation",
            PageType::FreeLogical => "free-logical",
            PageType::FreePhysical => "free-physical",
            PageType::FreePhysicalRoot => "free-physical-root",
        }
    }
}

/// Page contents as read from the backend: either exclusively owned or a
/// shared, read-only region.
#[derive(Debug, Clone)]
pub enum PageData {
    Owned(Box<[u8]>),
    Shared(Arc<[u8]>),
}

impl PageData {
    pub fn zeroed(page_size: usize) -> Self {
        PageData::Owned(vec![0u8; page_size].into_boxed_slice())
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            PageData::Owned(b) => b,
            PageData::Shared(a) => a,
        }
    }
}

/// An in-memory mutable view of one page.
#[derive(Debug)]
pub struct PageBuf {
    page_no: i64,
    data: PageData,
    dirty: bool,
    txn_count: u32,
}

impl PageBuf {
    pub fn new(page_no: i64, data: PageData) -> Self {
        Self {
            page_no,
            data,
            dirty: false,
            txn_count: 0,
        }
    }

    pub fn page_no(&self) -> i64 {
        self.page_no
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Mutable access to the page contents. Copies shared backing storage on
    /// first use (copy-on-write) and marks the buffer dirty.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        if let PageData::Shared(shared) = &self.data {
            self.data = PageData::Owned(shared.as_ref().into());
        }
        self.dirty = true;
        match &mut self.data {
            PageData::Owned(b) => b,
            PageData::Shared(_) => unreachable!("shared data after copy-on-write"),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn txn_count(&self) -> u32 {
        self.txn_count
    }

    pub fn incr_txn(&mut self) {
        self.txn_count += 1;
    }

    pub fn decr_txn(&mut self) {
        assert!(
            self.txn_count > 0,
            "transaction count underflow on page {}",
            self.page_no
        );
        self.txn_count -= 1;
    }

    pub fn zero_fill(&mut self) {
        self.bytes_mut().fill(0);
    }

    pub fn get_u8(&self, off: usize) -> u8 {
        self.bytes()[off]
    }

    pub fn put_u8(&mut self, off: usize, value: u8) {
        self.bytes_mut()[off] = value;
    }

    pub fn get_u16(&self, off: usize) -> u16 {
        let b = self.bytes();
        u16::from_be_bytes([b[off], b[off + 1]])
    }

    pub fn put_u16(&mut self, off: usize, value: u16) {
        self.bytes_mut()[off..off + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn get_i64(&self, off: usize) -> i64 {
        let b = self.bytes();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b[off..off + 8]);
        i64::from_be_bytes(raw)
    }

    pub fn put_i64(&mut self, off: usize, value: i64) {
        self.bytes_mut()[off..off + 8].copy_from_slice(&value.to_be_bytes());
    }

    pub fn get_six(&self, off: usize) -> i64 {
        six_get(self.bytes(), off)
    }

    pub fn put_six(&mut self, off: usize, value: i64) {
        six_put(self.bytes_mut(), off, value);
    }

    pub fn magic(&self) -> u16 {
        self.get_u16(MAGIC_OFFSET)
    }

    pub fn set_type(&mut self, ty: PageType) {
        self.put_u16(MAGIC_OFFSET, ty.magic());
    }

    pub fn prev(&self) -> i64 {
        self.get_six(PREV_OFFSET)
    }

    pub fn set_prev(&mut self, page_no: i64) {
        self.put_six(PREV_OFFSET, page_no);
    }

    pub fn next(&self) -> i64 {
        self.get_six(NEXT_OFFSET)
    }

    pub fn set_next(&mut self, page_no: i64) {
        self.put_six(NEXT_OFFSET, page_no);
    }

    /// Paranoia check: the stored magic must match the type this page is
    /// being used as. A mismatch means a stale or corrupt pointer was
    /// followed and is never auto-repaired.
    pub fn expect_type(&self, ty: PageType) -> Result<()> {
        let magic = self.magic();
        if magic != ty.magic() {
            bail!(
                "page {} has magic {:#06x}, expected {} ({:#06x})",
                self.page_no,
                magic,
                ty.name(),
                ty.magic()
            );
        }
        Ok(())
    }

    /// True while the page has never been written: backend reads of unknown
    /// pages return all-zero buffers by convention.
    pub fn is_blank(&self) -> bool {
        self.magic() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_page(page_no: i64) -> PageBuf {
        PageBuf::new(page_no, PageData::zeroed(4096))
    }

    #[test]
    fn typed_writes_set_dirty() {
        let mut page = owned_page(1);
        assert!(!page.is_dirty());
        page.put_u16(20, 7);
        assert!(page.is_dirty());
    }

    #[test]
    fn header_accessors_roundtrip() {
        let mut page = owned_page(5);
        page.set_type(PageType::Data);
        page.set_prev(4);
        page.set_next(6);
        assert_eq!(page.magic(), PageType::Data.magic());
        assert_eq!(page.prev(), 4);
        assert_eq!(page.next(), 6);
    }

    #[test]
    fn expect_type_accepts_matching_magic() {
        let mut page = owned_page(2);
        page.set_type(PageType::Translation);
        assert!(page.expect_type(PageType::Translation).is_ok());
    }

    #[test]
    fn expect_type_rejects_mismatched_magic() {
        let mut page = owned_page(2);
        page.set_type(PageType::Free);
        let err = page.expect_type(PageType::Data).unwrap_err();
        assert!(err.to_string().contains("expected data"));
    }

    #[test]
    fn blank_page_detected() {
        let page = owned_page(9);
        assert!(page.is_blank());
    }

    #[test]
    fn copy_on_write_leaves_shared_data_untouched() {
        let shared: Arc<[u8]> = vec![0u8; 4096].into();
        let mut page = PageBuf::new(3, PageData::Shared(Arc::clone(&shared)));
        page.put_u8(100, 0xAB);
        assert_eq!(shared[100], 0, "shared backing must not be mutated");
        assert_eq!(page.get_u8(100), 0xAB);
        assert!(page.is_dirty());
    }

    #[test]
    fn txn_count_tracks_pending_batches() {
        let mut page = owned_page(7);
        page.incr_txn();
        page.incr_txn();
        page.decr_txn();
        assert_eq!(page.txn_count(), 1);
    }

    #[test]
    #[should_panic(expected = "transaction count underflow")]
    fn txn_count_underflow_panics() {
        let mut page = owned_page(7);
        page.decr_txn();
    }
}
