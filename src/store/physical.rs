//! # Physical Records
//!
//! Variable-length record storage on data pages. A physical row id names
//! the page and in-page offset of a record's 3-byte header; the payload
//! follows the header and may spill across continuation pages.
//!
//! ## Data Page Layout
//!
//! ```text
//! +-- 14-byte page header --+-- first_header (2 B) --+-- records... --+
//! ```
//!
//! `first_header` is the in-page offset of the first record header that
//! *starts* on this page, or 0 when none does (the page is entirely the
//! continuation of a record from an earlier page, or packed full). Records
//! on a page are contiguous: the next header sits exactly `3 + available`
//! bytes after the previous one, and an available size of 0 marks the start
//! of virgin space.
//!
//! ## Chaining
//!
//! A record larger than the space left on its first page continues on the
//! following pages of the data-page list, which are allocated immediately
//! behind it and therefore adjacent in list order. Continuation payload
//! always starts at the data offset; the final page of a chain gets its
//! `first_header` pointed just past the record's end when the leftover is
//! worth keeping.
//!
//! ## Updates, Deletes and Slot Reuse
//!
//! An update rewrites in place when the new length fits the slot and the
//! header's bounded size delta can express it; otherwise the record is
//! relocated and its old slot freed. A freed slot keeps its available size,
//! goes to the free-slot pool, and has any fully-covered continuation pages
//! past the first returned to the page allocator.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::alloc::PageManager;
use super::cache::PageFile;
use super::free_physical::FreePhysicalTracker;
use super::header::{self, MAX_SIZE_DELTA, RECORD_HEADER_SIZE};
use super::page::PageType;
use super::{loc_compose, loc_offset, loc_page, DATA_START, FIRST_HEADER_OFFSET};

/// Page space smaller than this is not worth a record header; it is either
/// absorbed into the preceding slot or left unreachable.
const MIN_SLOT_SPACE: usize = RECORD_HEADER_SIZE + 16;

pub struct PhysicalRowIdManager {
    free: FreePhysicalTracker,
}

impl PhysicalRowIdManager {
    pub fn new() -> Self {
        Self {
            free: FreePhysicalTracker::new(),
        }
    }

    /// Stores a record, preferring a compatible freed slot over fresh page
    /// space. Returns its physical row id.
    pub fn insert(
        &mut self,
        file: &mut PageFile,
        pages: &mut PageManager,
        data: &[u8],
    ) -> Result<i64> {
        // A zero-length record still occupies a minimal slot so its header
        // is distinguishable from virgin space.
        let rounded = header::round_available_size(data.len().max(1))?;
        let max_size = data.len().max(1) + MAX_SIZE_DELTA;
        if let Some((id, avail)) = self.free.get_free_record(file, pages, rounded, max_size)? {
            self.write_record(file, id, avail, data, false)?;
            return Ok(id);
        }
        self.insert_new(file, pages, data, rounded)
    }

    /// Reads a record's payload.
    pub fn fetch(&self, file: &mut PageFile, id: i64) -> Result<Vec<u8>> {
        let page_size = file.page_size();
        let (page_no, off) = decompose(file, id)?;

        let mut buf = file.get(page_no)?;
        if let Err(err) = buf.expect_type(PageType::Data) {
            file.release(buf, false);
            return Err(err);
        }
        let avail = header::get_available_size(buf.bytes(), off);
        if avail == 0 {
            file.release(buf, false);
            bail!("no record at physical id {id}");
        }
        let len = header::get_current_size(buf.bytes(), off, avail);

        let mut out = Vec::with_capacity(len);
        let first = (page_size - off - RECORD_HEADER_SIZE).min(len);
        out.extend_from_slice(&buf.bytes()[off + RECORD_HEADER_SIZE..off + RECORD_HEADER_SIZE + first]);
        while out.len() < len {
            let next = buf.next();
            file.release(buf, false);
            if next == 0 {
                bail!("record chain at {id} ends after {} of {len} bytes", out.len());
            }
            buf = file.get(next)?;
            if let Err(err) = buf.expect_type(PageType::Data) {
                file.release(buf, false);
                return Err(err);
            }
            let n = (page_size - DATA_START).min(len - out.len());
            out.extend_from_slice(&buf.bytes()[DATA_START..DATA_START + n]);
        }
        file.release(buf, false);
        Ok(out)
    }

    /// Rewrites a record. In place when the slot can hold the new length,
    /// otherwise relocated; the id actually holding the record afterwards is
    /// returned.
    pub fn update(
        &mut self,
        file: &mut PageFile,
        pages: &mut PageManager,
        id: i64,
        data: &[u8],
    ) -> Result<i64> {
        let (page_no, off) = decompose(file, id)?;
        let buf = file.get(page_no)?;
        if let Err(err) = buf.expect_type(PageType::Data) {
            file.release(buf, false);
            return Err(err);
        }
        let avail = header::get_available_size(buf.bytes(), off);
        file.release(buf, false);
        if avail == 0 {
            bail!("no record at physical id {id}");
        }

        let fits = data.len() <= avail
            && (data.is_empty() || avail - data.len() <= MAX_SIZE_DELTA);
        if fits {
            self.write_record(file, id, avail, data, false)?;
            Ok(id)
        } else {
            debug!(id, avail, len = data.len(), "relocating record on update");
            self.delete(file, pages, id)?;
            self.insert(file, pages, data)
        }
    }

    /// Deletes a record: current size drops to zero, fully-covered
    /// continuation pages go back to the allocator, and the remaining slot
    /// joins the free pool.
    pub fn delete(&mut self, file: &mut PageFile, pages: &mut PageManager, id: i64) -> Result<()> {
        let page_size = file.page_size();
        let (page_no, off) = decompose(file, id)?;

        let mut buf = file.get(page_no)?;
        if let Err(err) = buf.expect_type(PageType::Data) {
            file.release(buf, false);
            return Err(err);
        }
        let avail = header::get_available_size(buf.bytes(), off);
        if avail == 0 {
            file.release(buf, false);
            bail!("no record at physical id {id}");
        }

        let first_cap = page_size - off - RECORD_HEADER_SIZE;
        let cont_cap = page_size - DATA_START;
        let mut to_free: SmallVec<[i64; 4]> = SmallVec::new();
        let mut kept = avail;

        if avail > first_cap {
            let spilled = avail - first_cap;
            kept = first_cap + spilled.min(cont_cap);

            // The first continuation page stays with the slot; anything
            // beyond it that no other record starts on is reclaimed.
            let first_cont = buf.next();
            let mut walk = {
                let cb = file.get(first_cont)?;
                let next = cb.next();
                file.release(cb, false);
                next
            };
            let mut remaining = spilled.saturating_sub(cont_cap);
            while remaining > 0 && walk != 0 {
                let wb = file.get(walk)?;
                let first_header = wb.get_u16(FIRST_HEADER_OFFSET);
                let next = wb.next();
                file.release(wb, false);
                if first_header != 0 {
                    break;
                }
                to_free.push(walk);
                remaining = remaining.saturating_sub(cont_cap);
                walk = next;
            }
        }

        let new_avail = header::round_down_available_size(kept);
        let write = header::set_available_size(buf.bytes_mut(), off, new_avail)
            .and_then(|_| header::set_current_size(buf.bytes_mut(), off, new_avail, 0));
        if let Err(err) = write {
            file.release(buf, false);
            return Err(err);
        }
        file.release(buf, true);

        for page in to_free {
            pages.free(file, PageType::Data, page)?;
        }
        self.free.put_free_record(id, new_avail);
        debug!(id, avail = new_avail, "record deleted");
        Ok(())
    }

    /// Flushes the free-slot pool's staged entries.
    pub fn commit(&mut self, file: &mut PageFile, pages: &mut PageManager) -> Result<()> {
        self.free.commit(file, pages)
    }

    /// Drops free-slot entries staged since the last commit.
    pub fn rollback(&mut self) {
        self.free.rollback();
    }

    fn insert_new(
        &mut self,
        file: &mut PageFile,
        pages: &mut PageManager,
        data: &[u8],
        rounded: usize,
    ) -> Result<i64> {
        let page_size = file.page_size();
        let cont_cap = page_size - DATA_START;

        let (page_no, off) = find_insert_point(file, pages)?;
        let capacity = page_size - off - RECORD_HEADER_SIZE;
        let id = loc_compose(page_no, off, file.shift());

        if rounded <= capacity {
            let mut avail = rounded;
            let leftover = capacity - rounded;
            if leftover > 0 && leftover < MIN_SLOT_SPACE {
                // Absorb a trailing sliver no future record could use, as
                // long as the header's size delta can still express it.
                let widened = header::round_down_available_size(capacity);
                if widened - data.len().max(1) <= MAX_SIZE_DELTA {
                    avail = widened;
                }
            }
            self.write_record(file, id, avail, data, true)?;
            return Ok(id);
        }

        let spilled = rounded - capacity;
        let cont_pages = spilled.div_ceil(cont_cap);
        for _ in 0..cont_pages {
            pages.allocate(file, PageType::Data)?;
        }
        let used_last = spilled - (cont_pages - 1) * cont_cap;
        if cont_cap - used_last >= MIN_SLOT_SPACE {
            let tail = pages.last(PageType::Data);
            let mut buf = file.get(tail)?;
            buf.put_u16(FIRST_HEADER_OFFSET, (DATA_START + used_last) as u16);
            file.release(buf, true);
        }
        self.write_record(file, id, rounded, data, true)?;
        Ok(id)
    }

    fn write_record(
        &self,
        file: &mut PageFile,
        id: i64,
        avail: usize,
        data: &[u8],
        write_avail: bool,
    ) -> Result<()> {
        let page_size = file.page_size();
        let (page_no, off) = decompose(file, id)?;
        ensure!(
            data.len() <= avail,
            "record of {} bytes does not fit a slot of {avail}",
            data.len()
        );

        let mut buf = file.get(page_no)?;
        let write = buf
            .expect_type(PageType::Data)
            .and_then(|_| {
                if write_avail {
                    header::set_available_size(buf.bytes_mut(), off, avail)
                } else {
                    Ok(())
                }
            })
            .and_then(|_| header::set_current_size(buf.bytes_mut(), off, avail, data.len()));
        if let Err(err) = write {
            file.release(buf, false);
            return Err(err);
        }

        let first = (page_size - off - RECORD_HEADER_SIZE).min(data.len());
        buf.bytes_mut()[off + RECORD_HEADER_SIZE..off + RECORD_HEADER_SIZE + first]
            .copy_from_slice(&data[..first]);
        let mut written = first;
        while written < data.len() {
            let next = buf.next();
            file.release(buf, true);
            if next == 0 {
                bail!(
                    "record chain at {id} ends after {written} of {} bytes",
                    data.len()
                );
            }
            buf = file.get(next)?;
            if let Err(err) = buf.expect_type(PageType::Data) {
                file.release(buf, false);
                return Err(err);
            }
            let n = (page_size - DATA_START).min(data.len() - written);
            buf.bytes_mut()[DATA_START..DATA_START + n]
                .copy_from_slice(&data[written..written + n]);
            written += n;
        }
        file.release(buf, true);
        Ok(())
    }
}

impl Default for PhysicalRowIdManager {
    fn default() -> Self {
        Self::new()
    }
}

fn decompose(file: &PageFile, id: i64) -> Result<(i64, usize)> {
    let page_no = loc_page(id, file.shift());
    let off = loc_offset(id, file.shift());
    ensure!(
        page_no > 0 && off >= DATA_START && off + RECORD_HEADER_SIZE <= file.page_size(),
        "{id} is not a physical row id"
    );
    Ok((page_no, off))
}

/// Finds the first virgin header position on the tail data page, or
/// allocates a new page when the tail is packed (or absent).
fn find_insert_point(file: &mut PageFile, pages: &mut PageManager) -> Result<(i64, usize)> {
    let page_size = file.page_size();
    let tail = pages.last(PageType::Data);
    if tail != 0 {
        let buf = file.get(tail)?;
        if let Err(err) = buf.expect_type(PageType::Data) {
            file.release(buf, false);
            return Err(err);
        }
        let mut pos = buf.get_u16(FIRST_HEADER_OFFSET) as usize;
        let mut found = None;
        if pos != 0 {
            while pos + RECORD_HEADER_SIZE <= page_size {
                let avail = header::get_available_size(buf.bytes(), pos);
                if avail == 0 {
                    found = Some(pos);
                    break;
                }
                pos += RECORD_HEADER_SIZE + avail;
            }
        }
        file.release(buf, false);
        if let Some(off) = found {
            return Ok((tail, off));
        }
    }

    let page_no = pages.allocate(file, PageType::Data)?;
    let mut buf = file.get(page_no)?;
    buf.put_u16(FIRST_HEADER_OFFSET, DATA_START as u16);
    file.release(buf, true);
    Ok((page_no, DATA_START))
}
