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

//! Read-side queries for reporting and support tooling.
//!
//! None of these mutate state. Each book is locked only long enough to copy
//! out what the query needs.

use crate::PointLedger;
use crate::base::{PointItemId, UserId};
use crate::error::{PointError, Result};
use crate::history::{PointHistory, PointType};
use crate::item::{PointItem, PointStatus};
use crate::wallet::Wallet;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Window used by [`PointLedger::expiring_items`] callers that have no preference.
pub const DEFAULT_EXPIRING_WINDOW_DAYS: u32 = 30;

/// Longest range, in calendar months, a user may query at once.
const MAX_USER_RANGE_MONTHS: i32 = 3;

const MAX_PAGE_SIZE: usize = 100;

/// History filter. Dates are inclusive and compared against the UTC date of
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySearch {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub user_id: Option<UserId>,
    pub ref_id: Option<String>,
    pub point_type: Option<PointType>,
}

impl HistorySearch {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            user_id: None,
            ref_id: None,
            point_type: None,
        }
    }

    fn matches(&self, history: &PointHistory) -> bool {
        let day = history.created_at().date_naive();
        day >= self.start
            && day <= self.end
            && self.user_id.is_none_or(|u| history.user_id() == u)
            && self
                .ref_id
                .as_deref()
                .is_none_or(|r| history.ref_id() == r)
            && self.point_type.is_none_or(|t| history.point_type() == t)
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    fn slice(mut all: Vec<T>, request: PageRequest) -> Result<Self> {
        if request.size == 0 || request.size > MAX_PAGE_SIZE {
            return Err(PointError::InvalidPage);
        }
        let total = all.len();
        let start = request.page.saturating_mul(request.size).min(total);
        let end = start.saturating_add(request.size).min(total);
        let items = all.drain(start..end).collect();
        Ok(Self {
            items,
            page: request.page,
            size: request.size,
            total,
        })
    }
}

/// An available lot nearing its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiringPoint {
    pub item_id: PointItemId,
    pub amount: i64,
    pub expire_at: DateTime<Utc>,
}

/// Sum of history amounts for one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TypeTotal {
    pub point_type: PointType,
    pub total: i64,
}

impl PointLedger {
    /// Current balance of a user who has a wallet.
    pub fn balance(&self, user_id: UserId) -> Result<i64> {
        self.store
            .read(user_id, |book| book.wallet().map(|w| w.balance()))
            .flatten()
            .ok_or(PointError::WalletNotFound)
    }

    /// Current balance, treating an unknown user as empty.
    pub fn admin_balance(&self, user_id: UserId) -> i64 {
        self.balance(user_id).unwrap_or(0)
    }

    /// A user's own history, limited to a three-month window.
    pub fn user_histories(
        &self,
        user_id: UserId,
        search: &HistorySearch,
        page: PageRequest,
    ) -> Result<Page<PointHistory>> {
        validate_range(search.start, search.end)?;
        if months_between(search.start, search.end) > MAX_USER_RANGE_MONTHS {
            return Err(PointError::InvalidDateRange(format!(
                "range may span at most {MAX_USER_RANGE_MONTHS} months"
            )));
        }
        let search = HistorySearch {
            user_id: Some(user_id),
            ..search.clone()
        };
        let found = self
            .store
            .read(user_id, |book| collect_histories(book.histories(), &search))
            .unwrap_or_default();
        Page::slice(newest_first(found), page)
    }

    /// History across all users, optionally narrowed to one.
    pub fn admin_histories(
        &self,
        search: &HistorySearch,
        page: PageRequest,
    ) -> Result<Page<PointHistory>> {
        validate_range(search.start, search.end)?;
        let found = match search.user_id {
            Some(user_id) => self
                .store
                .read(user_id, |book| collect_histories(book.histories(), search))
                .unwrap_or_default(),
            None => {
                let mut found = Vec::new();
                self.store.for_each_book(|_, book| {
                    found.extend(collect_histories(book.histories(), search));
                });
                found
            }
        };
        Page::slice(newest_first(found), page)
    }

    /// Every history recorded for `(user, ref_id)`, oldest first.
    pub fn histories_for_ref(&self, user_id: UserId, ref_id: &str) -> Vec<PointHistory> {
        self.store
            .read(user_id, |book| {
                book.histories()
                    .iter()
                    .filter(|h| h.ref_id() == ref_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Available lots expiring within `within_days`, soonest first.
    pub fn expiring_items(&self, user_id: UserId, within_days: u32) -> Result<Vec<ExpiringPoint>> {
        let now = self.clock.now();
        let horizon = Duration::try_days(i64::from(within_days))
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut expiring = self
            .store
            .read(user_id, |book| {
                book.items()
                    .filter(|item| item.status() == PointStatus::Available)
                    .filter(|item| item.expire_at() > now && item.expire_at() <= horizon)
                    .map(|item| ExpiringPoint {
                        item_id: item.id(),
                        amount: item.remain_amount(),
                        expire_at: item.expire_at(),
                    })
                    .collect::<Vec<_>>()
            })
            .ok_or(PointError::WalletNotFound)?;
        expiring.sort_by_key(|e| (e.expire_at, e.item_id));
        Ok(expiring)
    }

    /// Sum of remaining points over every available lot in the system.
    pub fn total_available_remain(&self) -> i64 {
        let mut total = 0;
        self.store.for_each_book(|_, book| {
            total += book
                .items()
                .filter(|item| item.status() == PointStatus::Available)
                .map(PointItem::remain_amount)
                .sum::<i64>();
        });
        total
    }

    /// Amount totals per history type over an inclusive date range.
    pub fn statistics(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<TypeTotal>> {
        validate_range(start, end)?;
        let search = HistorySearch::between(start, end);
        let mut totals: BTreeMap<PointType, i64> = BTreeMap::new();
        self.store.for_each_book(|_, book| {
            for history in book.histories().iter().filter(|h| search.matches(h)) {
                *totals.entry(history.point_type()).or_default() += history.amount();
            }
        });
        Ok(totals
            .into_iter()
            .map(|(point_type, total)| TypeTotal { point_type, total })
            .collect())
    }

    /// Looks up a single lot by id.
    pub fn item(&self, item_id: PointItemId) -> Option<PointItem> {
        let owner = self.store.item_owner(item_id)?;
        self.store
            .read(owner, |book| book.item(item_id).cloned())
            .flatten()
    }

    /// Snapshot of every wallet, ordered by user.
    pub fn wallets(&self) -> Vec<Wallet> {
        let mut wallets = Vec::new();
        self.store.for_each_book(|_, book| {
            wallets.extend(book.wallet().cloned());
        });
        wallets.sort_by_key(Wallet::user_id);
        wallets
    }

    /// All lots of a user, oldest first.
    pub fn items(&self, user_id: UserId) -> Vec<PointItem> {
        self.store
            .read(user_id, |book| book.items().cloned().collect())
            .unwrap_or_default()
    }
}

fn collect_histories(histories: &[PointHistory], search: &HistorySearch) -> Vec<PointHistory> {
    histories
        .iter()
        .filter(|h| search.matches(h))
        .cloned()
        .collect()
}

fn newest_first(mut histories: Vec<PointHistory>) -> Vec<PointHistory> {
    histories.sort_by(|a, b| b.id().cmp(&a.id()));
    histories
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(PointError::InvalidDateRange(
            "end date is before start date".into(),
        ));
    }
    Ok(())
}

/// Whole calendar months from `start` to `end`.
fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let mut months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    if end.day() < start.day() {
        months -= 1;
    }
    months
}
