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

//! Point lots.
//!
//! Each [`PointItem`] is one grant of points with its own balance, expiry and
//! priority flag. Lots move through a small state machine:
//!
//! ```text
//!  AVAILABLE ──use (drained)──► EXHAUSTED
//!      ▲                            │
//!      └────────cancel (refund)─────┘
//!
//!  AVAILABLE (untouched) ──cancel_earn──► CANCELED   (terminal)
//!  AVAILABLE ──────────────expire───────► EXPIRED    (terminal)
//! ```

use crate::PointError;
use crate::base::{PointItemId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointStatus {
    Available,
    Exhausted,
    Canceled,
    Expired,
}

impl PointStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }
}

/// One discrete grant of points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointItem {
    id: PointItemId,
    user_id: UserId,
    original_amount: i64,
    remain_amount: i64,
    expire_at: DateTime<Utc>,
    is_manual: bool,
    status: PointStatus,
    created_at: DateTime<Utc>,
}

impl PointItem {
    /// Creates a fresh, fully available lot.
    ///
    /// `expire_at` must lie after `now`.
    pub fn new(
        id: PointItemId,
        user_id: UserId,
        amount: i64,
        expire_at: DateTime<Utc>,
        is_manual: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        if amount < 1 {
            return Err(PointError::InvalidAmount);
        }
        if expire_at <= now {
            return Err(PointError::ItemExpired);
        }
        Ok(Self {
            id,
            user_id,
            original_amount: amount,
            remain_amount: amount,
            expire_at,
            is_manual,
            status: PointStatus::Available,
            created_at: now,
        })
    }

    pub fn id(&self) -> PointItemId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn original_amount(&self) -> i64 {
        self.original_amount
    }

    pub fn remain_amount(&self) -> i64 {
        self.remain_amount
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    pub fn is_manual(&self) -> bool {
        self.is_manual
    }

    pub fn status(&self) -> PointStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// A lot expiring exactly at `now` counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    /// Whether `use` may draw from this lot at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PointStatus::Available && self.remain_amount > 0 && !self.is_expired_at(now)
    }

    /// Whether the expiration sweep should pick this lot for `cutoff`.
    pub fn is_sweepable_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == PointStatus::Available && self.expire_at < cutoff
    }

    fn assert_invariants(&self) {
        debug_assert!(
            (0..=self.original_amount).contains(&self.remain_amount),
            "Invariant violated: remain {} outside 0..={}",
            self.remain_amount,
            self.original_amount
        );
        debug_assert!(
            !(self.status == PointStatus::Available && self.remain_amount == 0),
            "Invariant violated: available lot {} has nothing left",
            self.id
        );
    }

    /// Draws `amount` from the lot, marking it exhausted when drained.
    pub fn use_points(&mut self, amount: i64, now: DateTime<Utc>) -> Result<(), PointError> {
        if amount <= 0 {
            return Err(PointError::InvalidAmount);
        }
        if self.status != PointStatus::Available {
            return Err(PointError::ItemNotAvailable);
        }
        if self.is_expired_at(now) {
            return Err(PointError::ItemExpired);
        }
        if amount > self.remain_amount {
            return Err(PointError::InsufficientBalance);
        }

        self.remain_amount -= amount;
        if self.remain_amount == 0 {
            self.status = PointStatus::Exhausted;
        }
        self.assert_invariants();
        Ok(())
    }

    /// Gives back `amount` previously drawn by a use.
    ///
    /// An exhausted lot becomes available again. Expired lots cannot be
    /// refunded in place.
    pub fn cancel(&mut self, amount: i64, now: DateTime<Utc>) -> Result<(), PointError> {
        if amount <= 0 {
            return Err(PointError::InvalidAmount);
        }
        if self.status.is_terminal() {
            return Err(PointError::ItemNotAvailable);
        }
        if self.is_expired_at(now) {
            return Err(PointError::ItemExpired);
        }
        if self.remain_amount + amount > self.original_amount {
            return Err(PointError::RestoreExceedsOriginal);
        }

        self.remain_amount += amount;
        if self.status == PointStatus::Exhausted {
            self.status = PointStatus::Available;
        }
        self.assert_invariants();
        Ok(())
    }

    /// Revokes an untouched lot.
    pub fn cancel_earn(&mut self) -> Result<(), PointError> {
        if self.status.is_terminal() {
            return Err(PointError::ItemNotAvailable);
        }
        if self.remain_amount != self.original_amount {
            return Err(PointError::ItemAlreadyUsed);
        }
        self.status = PointStatus::Canceled;
        self.remain_amount = 0;
        Ok(())
    }

    /// Expires the lot and returns the amount that was forfeited.
    ///
    /// Lots that are not available or already empty are left alone and
    /// forfeit nothing.
    pub fn expire(&mut self) -> i64 {
        if self.status != PointStatus::Available || self.remain_amount == 0 {
            return 0;
        }
        let forfeited = self.remain_amount;
        self.status = PointStatus::Expired;
        self.remain_amount = 0;
        forfeited
    }
}
