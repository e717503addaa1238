//! # Page Allocator
//!
//! [`PageManager`] owns the file-header state (page 0) and maintains the
//! typed doubly-linked page lists: free, data, translation, free-logical,
//! free-physical and free-physical-root. Every page belongs to exactly one
//! list at a time, linked through the prev/next pointers in its header.
//!
//! ## File Header Layout (page 0)
//!
//! ```text
//! Offset  Size   Field
//! ------  -----  -----------------------------------------
//! 0       2      FILE_HEADER_MAGIC
//! 2       6*12   first/last packed pointers, one pair per page type
//! 74      16*8   persistent root identifier slots
//! ```
//!
//! The header is kept as an in-memory image and written back through the
//! page cache on commit, so it rides the same durability path as every
//! other page.
//!
//! ## Allocation Strategy
//!
//! `allocate` pulls the head of the free list when one exists; otherwise it
//! extends the file. The free list's `last` slot doubles as the extent
//! high-water mark — free-list insertion only ever touches `first`, so
//! `last(Free) + 1` is always the next never-used page number.
//!
//! Translation pages are different: they live in a separate, negatively
//! growing numbering space (-1, -2, ...) tracked by `last(Translation)`,
//! and they are never recycled through the generic free list.

use eyre::{bail, Result};

use super::cache::PageFile;
use super::page::PageType;
use super::{FILE_HEADER_MAGIC, ROOT_SLOT_COUNT};

const LIST_TABLE_OFFSET: usize = 2;
const ROOT_TABLE_OFFSET: usize = LIST_TABLE_OFFSET + PAGE_TYPE_COUNT * 12;
const PAGE_TYPE_COUNT: usize = 6;

#[derive(Debug, Default)]
struct FileHeader {
    first: [i64; PAGE_TYPE_COUNT],
    last: [i64; PAGE_TYPE_COUNT],
    roots: [i64; ROOT_SLOT_COUNT],
}

pub struct PageManager {
    header: FileHeader,
    dirty: bool,
}

impl PageManager {
    /// Loads the file header from page 0. A blank page 0 means a fresh
    /// store; the default header is written out on the first commit.
    pub fn load(file: &mut PageFile) -> Result<Self> {
        let buf = file.get(0)?;
        let mut manager = Self {
            header: FileHeader::default(),
            dirty: false,
        };
        if buf.is_blank() {
            manager.dirty = true;
        } else {
            let magic = buf.get_u16(0);
            if magic != FILE_HEADER_MAGIC {
                file.release(buf, false);
                bail!("file header has magic {magic:#06x}, expected {FILE_HEADER_MAGIC:#06x}");
            }
            for t in 0..PAGE_TYPE_COUNT {
                manager.header.first[t] = buf.get_six(LIST_TABLE_OFFSET + t * 12);
                manager.header.last[t] = buf.get_six(LIST_TABLE_OFFSET + t * 12 + 6);
            }
            for slot in 0..ROOT_SLOT_COUNT {
                manager.header.roots[slot] = buf.get_i64(ROOT_TABLE_OFFSET + slot * 8);
            }
        }
        file.release(buf, false);
        Ok(manager)
    }

    pub fn first(&self, ty: PageType) -> i64 {
        self.header.first[ty as usize]
    }

    pub fn last(&self, ty: PageType) -> i64 {
        self.header.last[ty as usize]
    }

    /// Allocates a page of the given type, reusing a free page when one
    /// exists. The new page is zero-filled, tagged, and linked to the tail
    /// of its type list.
    pub fn allocate(&mut self, file: &mut PageFile, ty: PageType) -> Result<i64> {
        assert!(ty != PageType::Free, "cannot allocate a page as free");
        if ty == PageType::Translation {
            return self.allocate_translation(file);
        }

        let free_head = self.header.first[PageType::Free as usize];
        let (page_no, mut buf) = if free_head != 0 {
            let mut fb = file.get(free_head)?;
            fb.expect_type(PageType::Free)?;
            let next_free = fb.next();
            fb.zero_fill();
            self.header.first[PageType::Free as usize] = next_free;
            if next_free != 0 {
                let mut nb = file.get(next_free)?;
                nb.expect_type(PageType::Free)?;
                nb.set_prev(0);
                file.release(nb, true);
            }
            (free_head, fb)
        } else {
            // Extend the file: last(Free) is the extent high-water mark.
            let page_no = self.header.last[PageType::Free as usize] + 1;
            self.header.last[PageType::Free as usize] = page_no;
            (page_no, file.get(page_no)?)
        };

        let tail = self.header.last[ty as usize];
        buf.set_type(ty);
        buf.set_prev(tail);
        buf.set_next(0);
        file.release(buf, true);

        if tail != 0 {
            let mut tb = file.get(tail)?;
            tb.expect_type(ty)?;
            tb.set_next(page_no);
            file.release(tb, true);
        } else {
            self.header.first[ty as usize] = page_no;
        }
        self.header.last[ty as usize] = page_no;
        self.dirty = true;
        Ok(page_no)
    }

    fn allocate_translation(&mut self, file: &mut PageFile) -> Result<i64> {
        let t = PageType::Translation as usize;
        let tail = self.header.last[t];
        let page_no = if tail == 0 { -1 } else { tail - 1 };

        let mut buf = file.get(page_no)?;
        buf.zero_fill();
        buf.set_type(PageType::Translation);
        buf.set_prev(tail);
        buf.set_next(0);
        file.release(buf, true);

        if tail != 0 {
            let mut tb = file.get(tail)?;
            tb.expect_type(PageType::Translation)?;
            tb.set_next(page_no);
            file.release(tb, true);
        } else {
            self.header.first[t] = page_no;
        }
        self.header.last[t] = page_no;
        self.dirty = true;
        Ok(page_no)
    }

    /// Unlinks a page from its type list and prepends it to the free list.
    pub fn free(&mut self, file: &mut PageFile, ty: PageType, page_no: i64) -> Result<()> {
        assert!(
            ty != PageType::Translation,
            "translation pages are never freed"
        );
        assert!(page_no > 0, "cannot free page {page_no}");

        let mut buf = file.get(page_no)?;
        buf.expect_type(ty)?;
        let (prev, next) = (buf.prev(), buf.next());

        let old_free_head = self.header.first[PageType::Free as usize];
        buf.set_type(PageType::Free);
        buf.set_prev(0);
        buf.set_next(old_free_head);
        file.release(buf, true);

        if old_free_head != 0 {
            let mut fb = file.get(old_free_head)?;
            fb.expect_type(PageType::Free)?;
            fb.set_prev(page_no);
            file.release(fb, true);
        }
        self.header.first[PageType::Free as usize] = page_no;

        if prev != 0 {
            let mut pb = file.get(prev)?;
            pb.expect_type(ty)?;
            pb.set_next(next);
            file.release(pb, true);
        } else {
            self.header.first[ty as usize] = next;
        }
        if next != 0 {
            let mut nb = file.get(next)?;
            nb.expect_type(ty)?;
            nb.set_prev(prev);
            file.release(nb, true);
        } else {
            self.header.last[ty as usize] = prev;
        }
        self.dirty = true;
        Ok(())
    }

    /// Follows a type list forward from `page_no`.
    pub fn next(&self, file: &mut PageFile, ty: PageType, page_no: i64) -> Result<i64> {
        let buf = file.get(page_no)?;
        let checked = buf.expect_type(ty);
        let next = buf.next();
        file.release(buf, false);
        checked?;
        Ok(next)
    }

    /// Follows a type list backward from `page_no`.
    pub fn prev(&self, file: &mut PageFile, ty: PageType, page_no: i64) -> Result<i64> {
        let buf = file.get(page_no)?;
        let checked = buf.expect_type(ty);
        let prev = buf.prev();
        file.release(buf, false);
        checked?;
        Ok(prev)
    }

    pub fn get_root(&self, slot: usize) -> i64 {
        assert!(slot < ROOT_SLOT_COUNT, "root slot {slot} out of range");
        self.header.roots[slot]
    }

    pub fn set_root(&mut self, slot: usize, id: i64) {
        assert!(slot < ROOT_SLOT_COUNT, "root slot {slot} out of range");
        self.header.roots[slot] = id;
        self.dirty = true;
    }

    /// Writes the header image back to page 0 through the cache.
    pub fn commit(&mut self, file: &mut PageFile) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut buf = file.get(0)?;
        buf.zero_fill();
        buf.put_u16(0, FILE_HEADER_MAGIC);
        for t in 0..PAGE_TYPE_COUNT {
            buf.put_six(LIST_TABLE_OFFSET + t * 12, self.header.first[t]);
            buf.put_six(LIST_TABLE_OFFSET + t * 12 + 6, self.header.last[t]);
        }
        for slot in 0..ROOT_SLOT_COUNT {
            buf.put_i64(ROOT_TABLE_OFFSET + slot * 8, self.header.roots[slot]);
        }
        file.release(buf, true);
        self.dirty = false;
        Ok(())
    }

    /// Discards in-memory header state and reloads the durable image. The
    /// cache must have been rolled back first.
    pub fn rollback(&mut self, file: &mut PageFile) -> Result<()> {
        *self = Self::load(file)?;
        Ok(())
    }
}
