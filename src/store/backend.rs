//! # Block Storage Backend
//!
//! The backend trait is the narrow seam between the storage core and the
//! bytes it persists: fixed-size page read/write, a sync barrier, and an
//! append-only transaction-log stream. Everything above this trait is
//! backend-agnostic.
//!
//! ## Contract
//!
//! - `read` returns a page-sized buffer; a page that has never been written
//!   reads as all zeroes. The buffer may be shared, read-only storage — the
//!   page buffer layer copies on first write.
//! - Positive page numbers address the main store, negative page numbers
//!   address the translation space, a separately growing region.
//! - The log stream is opaque bytes: the redo log decides its format, the
//!   backend only appends, syncs, reads back and deletes it.
//!
//! ## Implementations
//!
//! - [`FileBackend`]: a directory holding `data.rdb` (pages >= 0),
//!   `translation.rdb` (pages < 0) and `redo.log`.
//! - [`MemBackend`]: an in-memory page map with shared (`Arc`) page buffers,
//!   cloneable so tests can reopen "the same storage" after a simulated
//!   crash. Its shared buffers are what exercise the copy-on-write path.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::page::PageData;

pub trait BlockBackend {
    /// Reads one page; never-written pages read as all zeroes.
    fn read(&mut self, page_no: i64) -> Result<PageData>;

    /// Writes one page. Durability requires a following `sync`.
    fn write(&mut self, page_no: i64, data: &[u8]) -> Result<()>;

    /// Flushes all pending page writes to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Creates (or truncates) the transaction log stream.
    fn open_log(&mut self) -> Result<()>;

    /// Appends bytes to the open log stream.
    fn append_log(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes the log stream to durable storage.
    fn sync_log(&mut self) -> Result<()>;

    /// Returns the full log contents, or `None` if no log exists.
    fn read_log(&mut self) -> Result<Option<Vec<u8>>>;

    /// Removes the log stream, if any.
    fn delete_log(&mut self) -> Result<()>;

    fn is_readonly(&self) -> bool {
        false
    }

    /// Drops any held resources without flushing.
    fn force_close(&mut self) -> Result<()>;
}

/// File-pair backend: one file for the main page space, one for the
/// negatively-numbered translation space, plus the redo log.
pub struct FileBackend {
    dir: PathBuf,
    data: File,
    translation: File,
    log: Option<File>,
    page_size: usize,
}

const DATA_FILE: &str = "data.rdb";
const TRANSLATION_FILE: &str = "translation.rdb";
const LOG_FILE: &str = "redo.log";

impl FileBackend {
    pub fn open(dir: &Path, page_size: usize) -> Result<Self> {
        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create store directory at {dir:?}"))?;
        let open = |name: &str| -> Result<File> {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(dir.join(name))
                .wrap_err_with(|| format!("failed to open {name} in {dir:?}"))
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            data: open(DATA_FILE)?,
            translation: open(TRANSLATION_FILE)?,
            log: None,
            page_size,
        })
    }

    /// Maps a page number onto (file, byte offset). Negative pages live in
    /// the translation file, packed from its start.
    fn locate(&mut self, page_no: i64) -> (&mut File, u64) {
        if page_no >= 0 {
            (&mut self.data, page_no as u64 * self.page_size as u64)
        } else {
            (
                &mut self.translation,
                (-page_no - 1) as u64 * self.page_size as u64,
            )
        }
    }
}

impl BlockBackend for FileBackend {
    fn read(&mut self, page_no: i64) -> Result<PageData> {
        let page_size = self.page_size;
        let (file, offset) = self.locate(page_no);
        let len = file.metadata().wrap_err("failed to stat store file")?.len();
        let mut buf = vec![0u8; page_size];
        if offset < len {
            file.seek(SeekFrom::Start(offset))
                .wrap_err("failed to seek store file")?;
            let readable = ((len - offset) as usize).min(page_size);
            file.read_exact(&mut buf[..readable])
                .wrap_err_with(|| format!("failed to read page {page_no}"))?;
        }
        Ok(PageData::Owned(buf.into_boxed_slice()))
    }

    fn write(&mut self, page_no: i64, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "page write must be exactly {} bytes, got {}",
            self.page_size,
            data.len()
        );
        let (file, offset) = self.locate(page_no);
        file.seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek store file")?;
        file.write_all(data)
            .wrap_err_with(|| format!("failed to write page {page_no}"))?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.data.sync_all().wrap_err("failed to sync data file")?;
        self.translation
            .sync_all()
            .wrap_err("failed to sync translation file")?;
        Ok(())
    }

    fn open_log(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.dir.join(LOG_FILE))
            .wrap_err_with(|| format!("failed to create transaction log in {:?}", self.dir))?;
        self.log = Some(file);
        Ok(())
    }

    fn append_log(&mut self, data: &[u8]) -> Result<()> {
        let log = self
            .log
            .as_mut()
            .ok_or_else(|| eyre::eyre!("transaction log is not open"))?;
        log.write_all(data).wrap_err("failed to append to transaction log")
    }

    fn sync_log(&mut self) -> Result<()> {
        let log = self
            .log
            .as_mut()
            .ok_or_else(|| eyre::eyre!("transaction log is not open"))?;
        log.sync_all().wrap_err("failed to sync transaction log")
    }

    fn read_log(&mut self) -> Result<Option<Vec<u8>>> {
        let path = self.dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut contents = Vec::new();
        File::open(&path)
            .wrap_err("failed to open transaction log")?
            .read_to_end(&mut contents)
            .wrap_err("failed to read transaction log")?;
        Ok(Some(contents))
    }

    fn delete_log(&mut self) -> Result<()> {
        self.log = None;
        let path = self.dir.join(LOG_FILE);
        if path.exists() {
            fs::remove_file(&path).wrap_err("failed to delete transaction log")?;
        }
        Ok(())
    }

    fn force_close(&mut self) -> Result<()> {
        self.log = None;
        Ok(())
    }
}

#[derive(Default)]
struct MemInner {
    pages: HashMap<i64, Arc<[u8]>>,
    log: Option<Vec<u8>>,
}

/// In-memory backend with shared page buffers. Cloning yields a handle to
/// the same storage, which is how crash tests "reopen" it.
#[derive(Clone)]
pub struct MemBackend {
    inner: Arc<Mutex<MemInner>>,
    page_size: usize,
}

impl MemBackend {
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemInner::default())),
            page_size,
        }
    }
}

impl BlockBackend for MemBackend {
    fn read(&mut self, page_no: i64) -> Result<PageData> {
        let inner = self.inner.lock();
        match inner.pages.get(&page_no) {
            Some(page) => Ok(PageData::Shared(Arc::clone(page))),
            None => Ok(PageData::zeroed(self.page_size)),
        }
    }

    fn write(&mut self, page_no: i64, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "page write must be exactly {} bytes, got {}",
            self.page_size,
            data.len()
        );
        self.inner.lock().pages.insert(page_no, data.into());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn open_log(&mut self) -> Result<()> {
        self.inner.lock().log = Some(Vec::new());
        Ok(())
    }

    fn append_log(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let log = inner
            .log
            .as_mut()
            .ok_or_else(|| eyre::eyre!("transaction log is not open"))?;
        log.extend_from_slice(data);
        Ok(())
    }

    fn sync_log(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_log(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().log.clone())
    }

    fn delete_log(&mut self) -> Result<()> {
        self.inner.lock().log = None;
        Ok(())
    }

    fn force_close(&mut self) -> Result<()> {
        Ok(())
    }
}
