//! # Transaction Log
//!
//! An append-only redo log. The page cache hands a committing transaction's
//! dirty pages to [`TxnLog`]; the log serializes the whole batch to the
//! backend's log stream and fsyncs it, at which point the transaction is
//! durable. Replaying logged pages into the main store is deferred: it
//! happens once enough batches accumulate, on rollback, and on shutdown.
//!
//! ## Log Stream Format
//!
//! ```text
//! +-------+-----------------------------------------------+
//! | magic | batch | batch | ...                           |
//! | (2 B) |                                               |
//! +-------+-----------------------------------------------+
//!
//! batch := packed-length page count, then per page:
//!          8-byte big-endian page number + page_size bytes of content
//! ```
//!
//! ## Transaction States
//!
//! ```text
//! start() ──> pages accumulate ──> commit(): batch appended + fsynced
//!                                     │
//!                  (two pending batches, rollback, or close)
//!                                     │
//!                              synchronize(): replay into main store,
//!                              fsync backend, delete + reopen log
//! ```
//!
//! ## Recovery
//!
//! On store open, the log (if any) is scanned front to back. Only complete,
//! fully-written batches are replayed; a torn trailing batch means the
//! process died mid-append, and since its commit never returned it is
//! silently discarded. This is redo-only — an uncommitted in-memory
//! transaction was never appended and is simply never replayed, so rollback
//! is "discard memory, trust only what the log or store already holds".

use std::collections::BTreeMap;

use eyre::Result;
use tracing::{debug, info};

use super::backend::BlockBackend;
use super::packed::{len_get, len_put};
use super::LOG_MAGIC;

/// Pending committed batches are replayed into the main store once this
/// many have accumulated.
const SYNC_AFTER_BATCHES: usize = 2;

type Batch = Vec<(i64, Box<[u8]>)>;

pub struct TxnLog {
    page_size: usize,
    current: Option<Batch>,
    pending: Vec<Batch>,
    log_open: bool,
}

impl TxnLog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            current: None,
            pending: Vec::new(),
            log_open: false,
        }
    }

    /// Replays any committed batches left in the on-disk log into the main
    /// store. Called once at open, before anything reads through the cache.
    /// Returns the number of batches replayed.
    pub fn recover(backend: &mut dyn BlockBackend, page_size: usize) -> Result<usize> {
        let Some(contents) = backend.read_log()? else {
            return Ok(0);
        };
        if contents.len() < 2 {
            backend.delete_log()?;
            return Ok(0);
        }
        if u16::from_be_bytes([contents[0], contents[1]]) != LOG_MAGIC {
            debug!("transaction log has bad magic, discarding");
            backend.delete_log()?;
            return Ok(0);
        }

        let entry_size = 8 + page_size;
        let mut replay: BTreeMap<i64, &[u8]> = BTreeMap::new();
        let mut pos = 2;
        let mut batches = 0usize;
        loop {
            let Ok((count, consumed)) = len_get(&contents[pos..]) else {
                break;
            };
            let batch_end = pos + consumed + count as usize * entry_size;
            if batch_end > contents.len() {
                debug!(batch = batches, "dropping torn trailing log batch");
                break;
            }
            let mut entry = pos + consumed;
            for _ in 0..count {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&contents[entry..entry + 8]);
                let page_no = i64::from_be_bytes(raw);
                replay.insert(page_no, &contents[entry + 8..entry + entry_size]);
                entry += entry_size;
            }
            pos = batch_end;
            batches += 1;
            if pos == contents.len() {
                break;
            }
        }

        for (page_no, data) in &replay {
            backend.write(*page_no, data)?;
        }
        backend.sync()?;
        backend.delete_log()?;
        if batches > 0 {
            info!(batches, pages = replay.len(), "recovered transaction log");
        }
        Ok(batches)
    }

    /// Opens a transaction. Exactly one may be open at a time.
    pub fn start(&mut self) {
        assert!(
            self.current.is_none(),
            "transaction already open: one transaction at a time"
        );
        self.current = Some(Vec::new());
    }

    /// Stages one page into the open transaction.
    pub fn add(&mut self, page_no: i64, data: &[u8]) {
        debug_assert_eq!(data.len(), self.page_size);
        let batch = self
            .current
            .as_mut()
            .expect("page added outside an open transaction");
        batch.push((page_no, data.into()));
    }

    /// Appends the open transaction to the log stream and fsyncs it. After
    /// this returns, the transaction is durable. Returns the page numbers
    /// whose transaction counters must be decremented (non-empty only when
    /// the pending batches were synchronized into the main store).
    pub fn commit(&mut self, backend: &mut dyn BlockBackend) -> Result<Vec<i64>> {
        let batch = self.current.take().expect("commit without an open transaction");
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        if !self.log_open {
            backend.open_log()?;
            backend.append_log(&LOG_MAGIC.to_be_bytes())?;
            self.log_open = true;
        }

        let mut out = Vec::with_capacity(8 + batch.len() * (8 + self.page_size));
        len_put(batch.len() as u64, &mut out);
        for (page_no, data) in &batch {
            out.extend_from_slice(&page_no.to_be_bytes());
            out.extend_from_slice(data);
        }
        backend.append_log(&out)?;
        backend.sync_log()?;
        debug!(pages = batch.len(), "transaction batch appended to log");
        self.pending.push(batch);

        if self.pending.len() >= SYNC_AFTER_BATCHES {
            self.synchronize(backend)
        } else {
            Ok(Vec::new())
        }
    }

    /// Replays all pending batches into the main store in page-number order
    /// (later writes win for repeated pages), fsyncs the backend, and starts
    /// a fresh log. Returns one entry per (batch, page) occurrence so the
    /// cache can decrement transaction counters.
    pub fn synchronize(&mut self, backend: &mut dyn BlockBackend) -> Result<Vec<i64>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut decrements = Vec::new();
        let mut replay: BTreeMap<i64, &[u8]> = BTreeMap::new();
        for batch in &self.pending {
            for (page_no, data) in batch {
                decrements.push(*page_no);
                replay.insert(*page_no, data);
            }
        }
        for (page_no, data) in &replay {
            backend.write(*page_no, data)?;
        }
        backend.sync()?;
        debug!(
            batches = self.pending.len(),
            pages = replay.len(),
            "synchronized log into main store"
        );

        self.pending.clear();
        backend.delete_log()?;
        self.log_open = false;
        Ok(decrements)
    }

    /// Flushes everything pending and removes the log. The returned page
    /// numbers need their transaction counters decremented.
    pub fn close(&mut self, backend: &mut dyn BlockBackend) -> Result<Vec<i64>> {
        assert!(
            self.current.is_none(),
            "transaction still open at log shutdown"
        );
        let decrements = self.synchronize(backend)?;
        backend.delete_log()?;
        self.log_open = false;
        Ok(decrements)
    }
}
