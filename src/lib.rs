//! # recdb - Embedded Page-and-Record Storage Engine
//!
//! recdb is a file-backed storage substrate: it stores durable, variable-length
//! byte records addressed by stable identifiers, with crash-recoverable
//! transactions. It is the layer that indexed collections (B-trees, hash
//! trees) are built on top of; those structures live outside this crate and
//! consume it purely through insert/fetch/update/delete of opaque records
//! plus commit/rollback.
//!
//! ## Architecture
//!
//! recdb uses a layered architecture, leaves first:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Public API (RecordStore)          │
//! ├──────────────────────────────────────────┤
//! │ Logical Row Ids  │  Physical Row Ids     │
//! │ (translation)    │  (record headers)     │
//! ├──────────────────┴───────────────────────┤
//! │  Page Allocator (typed page lists)       │
//! ├──────────────────────────────────────────┤
//! │  Page Cache (check-out / check-in)       │
//! ├──────────────────────────────────────────┤
//! │  Redo Log (TxnLog)  │  Block Backend     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! - **Block backend**: fixed-size page read/write plus an append-only log
//!   stream, over a file pair or an in-memory map.
//! - **Page cache**: strict check-out/check-in discipline partitioning pages
//!   into in-use, dirty, and in-transaction sets.
//! - **Page allocator**: typed doubly-linked page lists and persistent root
//!   identifiers, all rooted in the reserved page 0.
//! - **Redo log**: buffers a transaction's dirty pages, fsyncs them before
//!   they count as durable, and replays them into the main store. Recovery is
//!   redo-only; there is no undo phase.
//! - **Row-id managers**: physical ids address a 3-byte record header inside
//!   a data page; logical ids resolve through translation pages so records
//!   can relocate without invalidating external references.
//!
//! ## Quick Start
//!
//! ```ignore
//! use recdb::{RecordStore, StoreOptions};
//!
//! let mut store = RecordStore::open("./mydata", StoreOptions::default())?;
//! let id = store.insert(b"hello")?;
//! store.commit()?;
//!
//! assert_eq!(store.fetch(id)?.as_deref(), Some(&b"hello"[..]));
//! store.close()?;
//! ```
//!
//! ## Concurrency Model
//!
//! Single writer, exactly one open transaction at a time. Nothing in this
//! crate locks internally; callers serialize all access. Misuse of the page
//! checkout discipline (double check-out, release without check-out) is a
//! bug in the calling layer and panics rather than returning an error.

pub mod config;
pub mod store;

pub use config::StoreOptions;
pub use store::engine::RecordStore;
