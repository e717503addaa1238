//! # Page Cache
//!
//! [`PageFile`] owns the backend and the redo log and enforces the page
//! check-out protocol every higher layer goes through:
//!
//! ```text
//! get(page_no) ──> caller holds the PageBuf exclusively
//!       │
//! release(buf, dirty) ──> dirty set        (modified, awaiting commit)
//!                     ──> in-txn set       (clean but still log-pending)
//!                     ──> dropped          (clean, re-read on demand)
//! ```
//!
//! ## Checkout Discipline
//!
//! A page number must never be checked out twice concurrently, and every
//! `get` must pair with exactly one `release` or `discard`. Violations are
//! bugs in the calling layer and panic; they are not recoverable errors.
//!
//! ## Commit and Rollback
//!
//! `commit` requires the in-use set to be empty. Dirty pages are staged in
//! page-number order (the dirty set is an ordered map, which gives the
//! backend sequential write locality and staged batches a deterministic
//! layout). With transactions enabled the batch goes to the redo log;
//! otherwise pages are written straight through and synced.
//!
//! `rollback` discards the dirty set, then forces the redo log to
//! synchronize from its durable on-disk state — page mutations that never
//! reached the log simply vanish.
//!
//! There is no separate clean-page cache at this layer: a page released
//! clean and log-idle is dropped and re-read from the backend next time.

use std::collections::BTreeMap;

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use tracing::debug;

use super::backend::BlockBackend;
use super::page::PageBuf;
use super::txlog::TxnLog;
use crate::config::StoreOptions;

pub struct PageFile {
    backend: Box<dyn BlockBackend>,
    txn: Option<TxnLog>,
    in_use: HashSet<i64>,
    dirty: BTreeMap<i64, PageBuf>,
    in_txn: HashMap<i64, PageBuf>,
    page_size: usize,
    shift: u32,
}

impl PageFile {
    /// Wraps a backend, running log recovery first when transactions are
    /// enabled so the cache never reads pre-crash state.
    pub fn new(mut backend: Box<dyn BlockBackend>, options: &StoreOptions) -> Result<Self> {
        let txn = if options.transactions {
            TxnLog::recover(backend.as_mut(), options.page_size)?;
            Some(TxnLog::new(options.page_size))
        } else {
            None
        };
        Ok(Self {
            backend,
            txn,
            in_use: HashSet::new(),
            dirty: BTreeMap::new(),
            in_txn: HashMap::new(),
            page_size: options.page_size,
            shift: options.shift(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Checks a page out. Sources, in order: the in-transaction set, the
    /// dirty set, the backend.
    pub fn get(&mut self, page_no: i64) -> Result<PageBuf> {
        assert!(
            self.in_use.insert(page_no),
            "page {page_no} is already checked out"
        );
        if let Some(buf) = self.in_txn.remove(&page_no) {
            return Ok(buf);
        }
        if let Some(buf) = self.dirty.remove(&page_no) {
            return Ok(buf);
        }
        let data = self.backend.read(page_no)?;
        Ok(PageBuf::new(page_no, data))
    }

    /// Checks a page back in. The dirty flag is sticky: a page modified on
    /// an earlier checkout stays in the dirty set even when released clean
    /// later.
    pub fn release(&mut self, mut buf: PageBuf, dirty: bool) {
        assert!(
            self.in_use.remove(&buf.page_no()),
            "page {} released without being checked out",
            buf.page_no()
        );
        if dirty {
            buf.set_dirty();
        }
        if buf.is_dirty() {
            self.dirty.insert(buf.page_no(), buf);
        } else if buf.txn_count() > 0 {
            self.in_txn.insert(buf.page_no(), buf);
        }
    }

    /// Checks a page back in and forgets any modifications made while it
    /// was checked out.
    pub fn discard(&mut self, buf: PageBuf) {
        assert!(
            self.in_use.remove(&buf.page_no()),
            "page {} discarded without being checked out",
            buf.page_no()
        );
        if !buf.is_dirty() && buf.txn_count() > 0 {
            self.in_txn.insert(buf.page_no(), buf);
        }
    }

    /// Makes all dirty pages durable: staged through the redo log, or
    /// written straight through when transactions are disabled.
    pub fn commit(&mut self) -> Result<()> {
        assert!(
            self.in_use.is_empty(),
            "{} pages still checked out at commit",
            self.in_use.len()
        );
        if self.dirty.is_empty() {
            return Ok(());
        }
        debug!(pages = self.dirty.len(), "committing dirty pages");

        match self.txn.as_mut() {
            Some(txn) => {
                txn.start();
                // Ordered map iteration stages pages in page-number order.
                for (page_no, mut buf) in std::mem::take(&mut self.dirty) {
                    txn.add(page_no, buf.bytes());
                    buf.incr_txn();
                    buf.clear_dirty();
                    self.in_txn.insert(page_no, buf);
                }
                let decrements = txn.commit(self.backend.as_mut())?;
                self.apply_decrements(&decrements);
            }
            None => {
                for (page_no, buf) in std::mem::take(&mut self.dirty) {
                    self.backend.write(page_no, buf.bytes())?;
                }
                self.backend.sync()?;
            }
        }
        Ok(())
    }

    /// Discards all uncommitted page mutations and resynchronizes the
    /// backend from the durable log.
    pub fn rollback(&mut self) -> Result<()> {
        assert!(
            self.in_use.is_empty(),
            "{} pages still checked out at rollback",
            self.in_use.len()
        );
        self.dirty.clear();
        if let Some(txn) = self.txn.as_mut() {
            txn.synchronize(self.backend.as_mut())?;
        }
        // Everything durably logged is now in the main store.
        self.in_txn.clear();
        Ok(())
    }

    /// Final commit plus log shutdown. Any page still checked out here is a
    /// consistency bug in the caller.
    pub fn close(&mut self) -> Result<()> {
        self.commit()?;
        if let Some(txn) = self.txn.as_mut() {
            let decrements = txn.close(self.backend.as_mut())?;
            self.apply_decrements(&decrements);
        }
        assert!(
            self.in_txn.is_empty() && self.dirty.is_empty(),
            "residual cached pages after close"
        );
        self.backend.force_close()?;
        Ok(())
    }

    fn apply_decrements(&mut self, decrements: &[i64]) {
        for page_no in decrements {
            if let Some(buf) = self.in_txn.get_mut(page_no) {
                buf.decr_txn();
                if buf.txn_count() == 0 {
                    self.in_txn.remove(page_no);
                }
            }
        }
    }
}
