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

//! Per-user balance aggregate.
//!
//! The wallet only knows its balance. It never looks at point lots; keeping
//! `balance == Σ remain_amount` is the job of the ledger, which mutates the
//! wallet and the lots in the same unit of work.
//!
//! # Example
//!
//! ```
//! use point_ledger_rs::{UserId, Wallet};
//!
//! let mut wallet = Wallet::new(UserId(1));
//! wallet.earn(1_000, 2_000_000).unwrap();
//! wallet.use_points(400).unwrap();
//! assert_eq!(wallet.balance(), 600);
//! ```

use crate::PointError;
use crate::base::UserId;
use serde::Serialize;

/// Balance held by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    #[serde(rename = "user")]
    user_id: UserId,
    balance: i64,
}

impl Wallet {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= 0,
            "Invariant violated: wallet balance went negative: {}",
            self.balance
        );
    }

    /// Increases the balance, refusing to exceed `max_limit`.
    pub fn earn(&mut self, amount: i64, max_limit: i64) -> Result<(), PointError> {
        if amount <= 0 {
            return Err(PointError::InvalidAmount);
        }
        let next = self
            .balance
            .checked_add(amount)
            .ok_or(PointError::PossessionLimitExceeded { limit: max_limit })?;
        if next > max_limit {
            return Err(PointError::PossessionLimitExceeded { limit: max_limit });
        }
        self.balance = next;
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance.
    pub fn use_points(&mut self, amount: i64) -> Result<(), PointError> {
        if amount <= 0 {
            return Err(PointError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(PointError::InsufficientBalance);
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }
}
