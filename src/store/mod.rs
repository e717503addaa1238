//! # Storage Module
//!
//! The storage layer of recdb: page buffers, the check-out/check-in page
//! cache, the typed page allocator, the redo log, and the three record
//! managers (physical, free-physical, logical) layered on top.
//!
//! ## Page Layout
//!
//! Every page starts with the same 14-byte header:
//!
//! ```text
//! Offset  Size  Field   Description
//! ------  ----  ------  --------------------------------------------
//! 0       2     magic   BASE_PAGE_MAGIC + page-type ordinal
//! 2       6     prev    packed pointer to previous page of this type
//! 8       6     next    packed pointer to next page of this type
//! ```
//!
//! Data pages additionally carry a 2-byte `first_header` field at offset 14
//! (the in-page offset of the first record header that starts on the page,
//! 0 if none does), so record payload begins at offset 16.
//!
//! Page 0 is the file header: the first/last pointers of all six type lists
//! plus 16 eight-byte root-identifier slots reserved for the structures
//! built on top of this crate.
//!
//! ## Page Numbering
//!
//! Positive page numbers address ordinary pages in the main store. Negative
//! page numbers address translation pages, a separate numbering space that
//! grows downward (-1, -2, ...) and is backed by its own file. Zero means
//! "no page" wherever a pointer is stored.
//!
//! ## Module Organization
//!
//! - `packed`: 6-byte signed pointer codec and varint lengths
//! - `page`: page types, header accessors, copy-on-write page buffer
//! - `backend`: block backend trait plus file and in-memory backends
//! - `cache`: check-out/check-in page cache ([`cache::PageFile`])
//! - `txlog`: append-only redo log and startup recovery
//! - `alloc`: typed page lists, extent growth, root ids ([`alloc::PageManager`])
//! - `header`: 3-byte record header codec
//! - `free_physical`: size-class free lists for record slots
//! - `logical`: translation pages and logical row ids
//! - `physical`: variable-length record storage with page chaining
//! - `engine`: the [`engine::RecordStore`] facade

pub mod alloc;
pub mod backend;
pub mod cache;
pub mod engine;
pub mod free_physical;
pub mod header;
pub mod logical;
pub mod packed;
pub mod page;
pub mod physical;
pub mod txlog;

/// Common 14-byte page header: 2-byte magic + two 6-byte list pointers.
pub const PAGE_HEADER_SIZE: usize = 14;

/// Offset of the 2-byte `first_header` field on data pages.
pub const FIRST_HEADER_OFFSET: usize = PAGE_HEADER_SIZE;

/// Offset where record payload starts on data pages.
pub const DATA_START: usize = PAGE_HEADER_SIZE + 2;

/// Base value of the per-page magic; the page-type ordinal is added to it.
pub const BASE_PAGE_MAGIC: u16 = 0x5244;

/// Magic of the file header page (page 0).
pub const FILE_HEADER_MAGIC: u16 = 0x5253;

/// Magic at the start of the transaction log stream.
pub const LOG_MAGIC: u16 = 0x524C;

/// Number of persistent root-identifier slots in the file header.
pub const ROOT_SLOT_COUNT: usize = 16;

/// Composes a physical or logical row id from a page number and an in-page
/// offset. The page number may be negative (translation pages); arithmetic
/// shift keeps the encoding invertible.
#[inline]
pub fn loc_compose(page: i64, offset: usize, shift: u32) -> i64 {
    debug_assert!(offset < (1usize << shift));
    (page << shift) | offset as i64
}

/// Page-number half of a row id.
#[inline]
pub fn loc_page(id: i64, shift: u32) -> i64 {
    id >> shift
}

/// In-page-offset half of a row id.
#[inline]
pub fn loc_offset(id: i64, shift: u32) -> usize {
    (id & ((1i64 << shift) - 1)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loc_roundtrip_positive_page() {
        let id = loc_compose(7, 123, 12);
        assert_eq!(loc_page(id, 12), 7);
        assert_eq!(loc_offset(id, 12), 123);
    }

    #[test]
    fn loc_roundtrip_negative_page() {
        let id = loc_compose(-3, 20, 12);
        assert_eq!(loc_page(id, 12), -3);
        assert_eq!(loc_offset(id, 12), 20);
    }

    #[test]
    fn loc_zero_offset() {
        let id = loc_compose(-1, 0, 12);
        assert_eq!(loc_page(id, 12), -1);
        assert_eq!(loc_offset(id, 12), 0);
    }
}
