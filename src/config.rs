//! # Store Configuration
//!
//! This module centralizes the knobs a store is opened with, plus the
//! constants derived from them. Values that depend on each other are
//! co-located so they cannot drift apart.
//!
//! ## Page Size
//!
//! The page size is fixed for the lifetime of a store and must be a power of
//! two. The default of 4096 bytes keeps page headers small relative to
//! payload while matching common filesystem block sizes. Several layout
//! values derive from it:
//!
//! ```text
//! page_size (4096)
//!     │
//!     ├─> shift = log2(page_size)        physical id = (page << shift) | offset
//!     ├─> data payload per page          page_size - DATA_START
//!     └─> translation slots per page     (page_size - PAGE_HEADER_SIZE) / 6
//! ```
//!
//! ## Transactions
//!
//! With `transactions` enabled (the default), commits are staged through the
//! redo log and survive crashes. With it disabled, commits write dirty pages
//! straight to the backend; this is faster for bulk loads that can be
//! restarted from scratch.

use eyre::{ensure, Result};

/// Smallest supported page size. Below this, a page cannot hold its own
/// header plus a useful amount of payload.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size. The in-page offset must fit in the low bits
/// of a 48-bit packed physical id alongside a useful page-number range.
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Options a [`crate::RecordStore`] is opened with.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Page size in bytes. Power of two, fixed for the store's lifetime.
    pub page_size: usize,
    /// Stage commits through the redo log (durable) or write straight
    /// through to the backend (fast, not crash-safe).
    pub transactions: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            transactions: true,
        }
    }
}

impl StoreOptions {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn transactions(mut self, enabled: bool) -> Self {
        self.transactions = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.page_size.is_power_of_two(),
            "page size {} is not a power of two",
            self.page_size
        );
        ensure!(
            (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size),
            "page size {} outside supported range {}..={}",
            self.page_size,
            MIN_PAGE_SIZE,
            MAX_PAGE_SIZE
        );
        Ok(())
    }

    /// log2 of the page size, used to pack `(page, offset)` into one id.
    pub fn shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        let opts = StoreOptions::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.page_size, 4096);
        assert!(opts.transactions);
    }

    #[test]
    fn non_power_of_two_page_size_rejected() {
        let opts = StoreOptions::default().page_size(3000);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn tiny_page_size_rejected() {
        let opts = StoreOptions::default().page_size(256);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn shift_matches_page_size() {
        assert_eq!(StoreOptions::default().shift(), 12);
        assert_eq!(StoreOptions::default().page_size(512).shift(), 9);
    }
}
