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

//! Append-only audit trail.
//!
//! A [`PointHistory`] records one balance-changing transaction and owns the
//! [`PointHistoryDetail`] rows that attribute it to individual lots. Histories
//! are assembled as a [`HistoryDraft`] inside a unit of work and frozen on
//! commit; nothing mutates them afterwards.

use crate::base::{HistoryId, PointItemId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction kind recorded in a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointType {
    Earn,
    EarnCancel,
    Use,
    UseCancel,
    Expire,
    Restore,
    AdminGrant,
    AdminRevoke,
}

impl PointType {
    pub const ALL: [PointType; 8] = [
        Self::Earn,
        Self::EarnCancel,
        Self::Use,
        Self::UseCancel,
        Self::Expire,
        Self::Restore,
        Self::AdminGrant,
        Self::AdminRevoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "EARN",
            Self::EarnCancel => "EARN_CANCEL",
            Self::Use => "USE",
            Self::UseCancel => "USE_CANCEL",
            Self::Expire => "EXPIRE",
            Self::Restore => "RESTORE",
            Self::AdminGrant => "ADMIN_GRANT",
            Self::AdminRevoke => "ADMIN_REVOKE",
        }
    }

    /// History types that count as refunds of a USE.
    pub fn is_refund(&self) -> bool {
        matches!(self, Self::UseCancel | Self::Restore)
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a transaction attributed to one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointHistoryDetail {
    pub item_id: PointItemId,
    pub amount: i64,
    /// Set only on RESTORE details: the expired lot this new lot replaces.
    pub restored_from_item_id: Option<PointItemId>,
}

/// One committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointHistory {
    id: HistoryId,
    user_id: UserId,
    point_type: PointType,
    amount: i64,
    ref_id: String,
    created_at: DateTime<Utc>,
    details: Vec<PointHistoryDetail>,
}

impl PointHistory {
    pub fn id(&self) -> HistoryId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn point_type(&self) -> PointType {
        self.point_type
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Details in the order they were recorded.
    pub fn details(&self) -> &[PointHistoryDetail] {
        &self.details
    }
}

/// A history under construction.
///
/// The amount is always the sum of the details, so a draft cannot be frozen
/// into a history that disagrees with its own breakdown.
#[derive(Debug, Clone)]
pub struct HistoryDraft {
    user_id: UserId,
    point_type: PointType,
    ref_id: String,
    details: Vec<PointHistoryDetail>,
}

impl HistoryDraft {
    pub fn new(user_id: UserId, point_type: PointType, ref_id: impl Into<String>) -> Self {
        Self {
            user_id,
            point_type,
            ref_id: ref_id.into(),
            details: Vec::new(),
        }
    }

    pub fn add_detail(&mut self, item_id: PointItemId, amount: i64) {
        self.details.push(PointHistoryDetail {
            item_id,
            amount,
            restored_from_item_id: None,
        });
    }

    pub fn add_restore_detail(&mut self, item_id: PointItemId, amount: i64, from: PointItemId) {
        self.details.push(PointHistoryDetail {
            item_id,
            amount,
            restored_from_item_id: Some(from),
        });
    }

    pub fn amount(&self) -> i64 {
        self.details.iter().map(|d| d.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.amount() == 0
    }

    pub(crate) fn freeze(self, id: HistoryId, created_at: DateTime<Utc>) -> PointHistory {
        PointHistory {
            id,
            user_id: self.user_id,
            point_type: self.point_type,
            amount: self.amount(),
            ref_id: self.ref_id,
            created_at,
            details: self.details,
        }
    }
}
