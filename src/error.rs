// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for ledger operations.
//!
//! Every failure carries a coarse [`ErrorKind`] and a stable [`code`](PointError::code)
//! so an API layer can map it onto its own transport without inspecting messages.

use thiserror::Error;

/// Coarse classification of a [`PointError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    AccessDenied,
    Internal,
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Earn amount falls outside the active policy bounds
    #[error("earn amount must be between {min} and {max}")]
    EarnAmountOutOfRange { min: i64, max: i64 },

    /// Earning would push the wallet over the possession limit
    #[error("maximum possession limit of {limit} exceeded")]
    PossessionLimitExceeded { limit: i64 },

    /// Wallet balance is lower than the requested amount
    #[error("insufficient point balance")]
    InsufficientBalance,

    /// Wallet balance covers the amount but the unexpired lots do not
    #[error("not enough usable points (some lots have expired)")]
    InsufficientUsablePoints,

    /// Reference id (order or event key) is empty
    #[error("missing reference id")]
    MissingRefId,

    /// The same reference id was already processed
    #[error("request already processed for reference {0}")]
    DuplicateRequest(String),

    /// Cancel amount plus earlier refunds exceeds the original usage
    #[error("cancel amount exceeds the refundable amount")]
    RefundExceeded,

    /// Earn cancellation on a lot that has been partially or fully used
    #[error("point item has already been used")]
    ItemAlreadyUsed,

    /// Lot is not in a state that allows the operation
    #[error("point item is not available")]
    ItemNotAvailable,

    /// Lot is past its expiry
    #[error("point item has expired")]
    ItemExpired,

    /// Refund would push a lot above its original amount
    #[error("cannot restore more than the original amount")]
    RestoreExceedsOriginal,

    /// Policy values violate their bounds
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Policy update request carries no field
    #[error("policy update must change at least one field")]
    EmptyPolicyUpdate,

    /// Query date range is inverted or too wide
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// Page size outside the accepted range
    #[error("invalid page request")]
    InvalidPage,

    /// User has never earned points
    #[error("wallet not found")]
    WalletNotFound,

    /// Referenced lot does not exist
    #[error("point item not found")]
    ItemNotFound,

    /// No USE history exists for the order being cancelled
    #[error("no point usage found for order {0}")]
    UsageNotFound(String),

    /// No policy version has been stored
    #[error("no active point policy")]
    PolicyNotFound,

    /// Lot belongs to another user
    #[error("point item does not belong to this user")]
    OwnershipMismatch,

    /// Unexpected failure; the payload is for logs only
    #[error("internal error")]
    Internal(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PointError>;

impl PointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WalletNotFound
            | Self::ItemNotFound
            | Self::UsageNotFound(_)
            | Self::PolicyNotFound => ErrorKind::NotFound,
            Self::OwnershipMismatch => ErrorKind::AccessDenied,
            Self::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::InvalidInput,
        }
    }

    /// Stable error code for external callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount | Self::EarnAmountOutOfRange { .. } => "P004",
            Self::PossessionLimitExceeded { .. } => "P003",
            Self::InsufficientBalance | Self::InsufficientUsablePoints => "P002",
            Self::WalletNotFound | Self::ItemNotFound | Self::UsageNotFound(_) => "P001",
            Self::PolicyNotFound => "P501",
            Self::OwnershipMismatch => "C003",
            Self::Internal(_) => "C002",
            _ => "C001",
        }
    }
}
