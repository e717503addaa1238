//! # Record Store
//!
//! [`RecordStore`] ties the layers together behind a small CRUD surface.
//! Callers speak logical row ids exclusively; the physical location of a
//! record is an internal matter that may change on update.
//!
//! ```text
//! insert(data) -> id        fetch(id) -> Option<Vec<u8>>
//! update(id, data)          delete(id)
//! commit() / rollback()     get_root(slot) / set_root(slot, id)
//! ```
//!
//! ## Commit Order
//!
//! The record managers flush their staged state first (which may allocate
//! pages), then the page allocator writes the file header, and finally the
//! page cache makes the whole dirty set durable in one log batch. Rollback
//! runs the other way: cached mutations are discarded first, then the
//! allocator reloads the durable header.

use std::path::Path;

use eyre::{ensure, Result};
use tracing::info;

use super::alloc::PageManager;
use super::backend::{BlockBackend, FileBackend};
use super::cache::PageFile;
use super::logical::LogicalRowIdManager;
use super::physical::PhysicalRowIdManager;
use crate::config::StoreOptions;

pub struct RecordStore {
    file: PageFile,
    pages: PageManager,
    physical: PhysicalRowIdManager,
    logical: LogicalRowIdManager,
}

impl RecordStore {
    /// Opens (or creates) a store in the given directory.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let backend = FileBackend::open(dir.as_ref(), options.page_size)?;
        Self::open_with_backend(Box::new(backend), options)
    }

    /// Opens a store over any block backend. Log recovery, if needed, runs
    /// before this returns.
    pub fn open_with_backend(
        backend: Box<dyn BlockBackend>,
        options: StoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        let mut file = PageFile::new(backend, &options)?;
        let pages = PageManager::load(&mut file)?;
        info!(
            page_size = options.page_size,
            transactions = options.transactions,
            "record store opened"
        );
        Ok(Self {
            file,
            pages,
            physical: PhysicalRowIdManager::new(),
            logical: LogicalRowIdManager::new(),
        })
    }

    /// Stores a record and returns its id. The id stays valid for the life
    /// of the record, however often it is updated.
    pub fn insert(&mut self, data: &[u8]) -> Result<i64> {
        let phys = self.physical.insert(&mut self.file, &mut self.pages, data)?;
        self.logical.insert(&mut self.file, &mut self.pages, phys)
    }

    /// Reads a record. `None` when the id does not name a live record.
    pub fn fetch(&mut self, id: i64) -> Result<Option<Vec<u8>>> {
        let phys = self.logical.fetch(&mut self.file, id)?;
        if phys == 0 {
            return Ok(None);
        }
        self.physical.fetch(&mut self.file, phys).map(Some)
    }

    /// Replaces a record's payload, relocating it transparently when the
    /// new length no longer fits its slot.
    pub fn update(&mut self, id: i64, data: &[u8]) -> Result<()> {
        let phys = self.logical.fetch(&mut self.file, id)?;
        ensure!(phys != 0, "no record with id {id}");
        let moved = self
            .physical
            .update(&mut self.file, &mut self.pages, phys, data)?;
        if moved != phys {
            self.logical.update(&mut self.file, id, moved)?;
        }
        Ok(())
    }

    /// Deletes a record. Its id and slot become reusable after the next
    /// commit.
    pub fn delete(&mut self, id: i64) -> Result<()> {
        let phys = self.logical.fetch(&mut self.file, id)?;
        ensure!(phys != 0, "no record with id {id}");
        self.physical.delete(&mut self.file, &mut self.pages, phys)?;
        self.logical.delete(&mut self.file, id)
    }

    /// Reads a named root id. Unset slots read as 0.
    pub fn get_root(&self, slot: usize) -> i64 {
        self.pages.get_root(slot)
    }

    /// Stores an id in a named root slot, durable from the next commit.
    pub fn set_root(&mut self, slot: usize, id: i64) {
        self.pages.set_root(slot, id);
    }

    /// Makes everything since the last commit durable, atomically.
    pub fn commit(&mut self) -> Result<()> {
        self.physical.commit(&mut self.file, &mut self.pages)?;
        self.logical.commit(&mut self.file, &mut self.pages)?;
        self.pages.commit(&mut self.file)?;
        self.file.commit()
    }

    /// Reverts everything since the last commit.
    pub fn rollback(&mut self) -> Result<()> {
        self.physical.rollback();
        self.logical.rollback();
        self.file.rollback()?;
        self.pages.rollback(&mut self.file)
    }

    /// Commits and shuts the store down cleanly.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemBackend;

    const PS: usize = 512;

    fn mem_store() -> RecordStore {
        RecordStore::open_with_backend(
            Box::new(MemBackend::new(PS)),
            StoreOptions::default().page_size(PS),
        )
        .expect("should open")
    }

    #[test]
    fn insert_fetch_update_delete_cycle() {
        let mut store = mem_store();
        let id = store.insert(b"first").expect("should insert");
        assert_eq!(
            store.fetch(id).expect("should fetch").expect("record exists"),
            b"first"
        );
        store.update(id, b"second").expect("should update");
        assert_eq!(
            store.fetch(id).expect("should fetch").expect("record exists"),
            b"second"
        );
        store.delete(id).expect("should delete");
        assert!(store.fetch(id).expect("should fetch").is_none());
    }

    #[test]
    fn id_survives_relocating_update() {
        let mut store = mem_store();
        let id = store.insert(b"tiny").expect("should insert");
        let big = vec![0x42u8; 3 * PS];
        store.update(id, &big).expect("should update");
        assert_eq!(
            store.fetch(id).expect("should fetch").expect("record exists"),
            big
        );
    }

    #[test]
    fn operations_on_missing_record_fail() {
        let mut store = mem_store();
        let id = store.insert(b"x").expect("should insert");
        store.delete(id).expect("should delete");
        assert!(store.update(id, b"y").is_err());
        assert!(store.delete(id).is_err());
    }

    #[test]
    fn roots_default_to_zero_and_persist() {
        let backend = MemBackend::new(PS);
        let options = StoreOptions::default().page_size(PS);
        let mut store =
            RecordStore::open_with_backend(Box::new(backend.clone()), options.clone())
                .expect("should open");
        assert_eq!(store.get_root(5), 0);
        store.set_root(5, 12345);
        store.close().expect("should close");

        let store = RecordStore::open_with_backend(Box::new(backend), options)
            .expect("should reopen");
        assert_eq!(store.get_root(5), 12345);
    }

    #[test]
    fn rollback_reverts_to_last_commit() {
        let mut store = mem_store();
        let keep = store.insert(b"keep").expect("should insert");
        store.commit().expect("should commit");

        let gone = store.insert(b"gone").expect("should insert");
        store.update(keep, b"KEEP").expect("should update");
        store.rollback().expect("should rollback");

        assert_eq!(
            store
                .fetch(keep)
                .expect("should fetch")
                .expect("record exists"),
            b"keep"
        );
        assert!(store.fetch(gone).expect("should fetch").is_none());
    }
}
