// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy from the design: conflicts are the expected,
//! non-fatal failure mode a retry loop swallows; everything else is a
//! programming error the driver never catches on the caller's behalf.

use thiserror::Error as DeriveError;

/// Errors a transaction can surface.
///
/// [`TxError::Conflict`] is the only variant a well-behaved retry loop
/// should catch and retry on; every other variant indicates misuse of
/// the API and should propagate to the caller.
#[derive(Debug, DeriveError, PartialEq, Eq, Clone, Copy)]
pub enum TxError {
    /// A read or commit detected a version mismatch, a locked slot, or a
    /// failed lock acquisition. Non-fatal: abort and retry.
    #[error("transaction conflict, retry")]
    Conflict,

    /// A write was attempted, or commit/abort was called, on a context
    /// that is not [`crate::transaction::Status::Active`].
    #[error("transaction is not active")]
    NotActive,

    /// A read or write named a zero-length value.
    #[error("zero-sized transactional access")]
    ZeroSizedAccess,

    /// A read or write named a null address.
    #[error("null transactional address")]
    NullAddress,

    /// The destination buffer passed to a read did not match the size
    /// recorded for that address in an earlier write within the same
    /// transaction.
    #[error("read destination size does not match the logged write size")]
    SizeMismatch,
}

impl TxError {
    /// Whether this error is the expected, retry-worthy kind, as opposed
    /// to a fatal programming error.
    pub fn is_conflict(self) -> bool {
        matches!(self, TxError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflict_is_a_conflict() {
        assert!(TxError::Conflict.is_conflict());
        assert!(!TxError::NotActive.is_conflict());
        assert!(!TxError::ZeroSizedAccess.is_conflict());
        assert!(!TxError::NullAddress.is_conflict());
        assert!(!TxError::SizeMismatch.is_conflict());
    }
}
