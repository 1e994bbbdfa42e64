// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A word-based software transactional memory runtime implementing
//! TL2 (Transactional Locking II): a global version clock, a striped
//! table of versioned locks, and per-transaction read/write logs that
//! buffer speculative work until a validated commit.
//!
//! The core addresses transactable memory by raw pointer and byte
//! length rather than through a generic typed wrapper, mirroring how
//! the protocol itself is agnostic to what lives at an address. Callers
//! who want a safe, typed handle build it on top of [`Stm::begin`] and
//! [`Transaction::read`]/[`Transaction::write`], or use [`Stm::atomically`]
//! directly for the common begin/commit/retry loop.
//!
//! ```
//! use stm::Stm;
//!
//! let stm = Stm::core_init();
//! let mut balance: u64 = 100;
//! let ptr = &mut balance as *mut u64 as *mut u8;
//!
//! stm.atomically(|tx| unsafe {
//!     let mut buf = [0u8; 8];
//!     tx.read(&mut buf, ptr as *const u8)?;
//!     let value = u64::from_ne_bytes(buf) + 50;
//!     tx.write(ptr, &value.to_ne_bytes())
//! })
//! .expect("transaction failed");
//!
//! assert_eq!(balance, 150);
//! ```

pub mod bloom;
pub mod clock;
pub mod error;
pub mod lock_table;
pub mod runtime;
pub mod stats;
pub mod tlog;
pub mod transaction;

pub use error::TxError;
pub use runtime::{Stm, StmConfig};
pub use stats::StatsSnapshot;
pub use transaction::{Status, Transaction};
