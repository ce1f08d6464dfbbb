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

//! Core identifier types for users, point lots and history records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a user wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a point lot ([`PointItem`](crate::PointItem)).
///
/// Ids are handed out in increasing order, so sorting by id is sorting by
/// creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PointItemId(pub u64);

impl fmt::Display for PointItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HistoryId(pub u64);

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide id sequence shared by items and histories.
#[derive(Debug)]
pub(crate) struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_item_id(&self) -> PointItemId {
        PointItemId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_history_id(&self) -> HistoryId {
        HistoryId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing_across_kinds() {
        let seq = IdSequence::new();
        let a = seq.next_item_id();
        let h = seq.next_history_id();
        let b = seq.next_item_id();
        assert!(a.0 < h.0);
        assert!(h.0 < b.0);
    }

    #[test]
    fn ids_display_as_plain_numbers() {
        assert_eq!(UserId(999).to_string(), "999");
        assert_eq!(PointItemId(42).to_string(), "42");
        assert_eq!(HistoryId(7).to_string(), "7");
    }
}
