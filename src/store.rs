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

//! In-memory datastore with per-user transactions.
//!
//! Each user owns a [`UserBook`] (wallet, lots, histories) behind its own
//! mutex. [`LedgerStore::transact`] holds that mutex for the whole operation
//! and stages every change in a [`UnitOfWork`]; the book is only touched when
//! the operation returns `Ok`, so a failure anywhere leaves no trace.
//!
//! # Thread Safety
//!
//! Operations on different users run in parallel. The `DashMap` shard guard is
//! always released before a book mutex is taken, so the two lock levels never
//! nest in the opposite order.

use crate::base::{IdSequence, PointItemId, UserId};
use crate::error::{PointError, Result};
use crate::history::{HistoryDraft, PointHistory, PointType};
use crate::item::PointItem;
use crate::wallet::Wallet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the ledger knows about one user.
#[derive(Debug, Default)]
pub(crate) struct UserBook {
    wallet: Option<Wallet>,
    items: BTreeMap<PointItemId, PointItem>,
    histories: Vec<PointHistory>,
}

impl UserBook {
    pub(crate) fn wallet(&self) -> Option<&Wallet> {
        self.wallet.as_ref()
    }

    pub(crate) fn items(&self) -> impl Iterator<Item = &PointItem> {
        self.items.values()
    }

    pub(crate) fn item(&self, id: PointItemId) -> Option<&PointItem> {
        self.items.get(&id)
    }

    pub(crate) fn histories(&self) -> &[PointHistory] {
        &self.histories
    }

    fn is_empty(&self) -> bool {
        self.wallet.is_none() && self.items.is_empty() && self.histories.is_empty()
    }

    fn assert_invariants(&self) {
        if let Some(wallet) = &self.wallet {
            let held: i64 = self
                .items
                .values()
                .filter(|item| !item.status().is_terminal())
                .map(PointItem::remain_amount)
                .sum();
            debug_assert_eq!(
                wallet.balance(),
                held,
                "Invariant violated: wallet balance differs from lot balances"
            );
        }
    }
}

/// Whether a transaction may create the user's book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BookAccess {
    CreateIfMissing,
    Existing,
}

#[derive(Debug)]
pub(crate) struct LedgerStore {
    books: DashMap<UserId, Arc<Mutex<UserBook>>>,
    /// Owner of every committed lot, for lookups by lot id alone.
    item_owners: DashMap<PointItemId, UserId>,
    ids: IdSequence,
}

impl LedgerStore {
    pub(crate) fn new() -> Self {
        Self {
            books: DashMap::new(),
            item_owners: DashMap::new(),
            ids: IdSequence::new(),
        }
    }

    fn book(&self, user_id: UserId, access: BookAccess) -> Option<Arc<Mutex<UserBook>>> {
        match access {
            BookAccess::CreateIfMissing => Some(Arc::clone(
                self.books.entry(user_id).or_default().value(),
            )),
            BookAccess::Existing => self.books.get(&user_id).map(|book| Arc::clone(book.value())),
        }
    }

    pub(crate) fn item_owner(&self, item_id: PointItemId) -> Option<UserId> {
        self.item_owners.get(&item_id).map(|owner| *owner)
    }

    /// Snapshot of every user id that has a book.
    pub(crate) fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.books.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Runs `f` against a user's book under its lock, without changing it.
    pub(crate) fn read<T>(&self, user_id: UserId, f: impl FnOnce(&UserBook) -> T) -> Option<T> {
        let book = self.book(user_id, BookAccess::Existing)?;
        let guard = book.lock();
        Some(f(&guard))
    }

    /// Runs `f` against every book, one lock at a time.
    pub(crate) fn for_each_book(&self, mut f: impl FnMut(UserId, &UserBook)) {
        for user_id in self.user_ids() {
            if let Some(book) = self.book(user_id, BookAccess::Existing) {
                f(user_id, &book.lock());
            }
        }
    }

    /// Drops a book that never received a commit, unless another caller holds it.
    fn discard_if_empty(&self, user_id: UserId) {
        self.books.remove_if(&user_id, |_, book| {
            Arc::strong_count(book) == 1 && book.try_lock().is_some_and(|b| b.is_empty())
        });
    }

    /// Executes one all-or-nothing unit of work for `user_id`.
    ///
    /// A missing book with [`BookAccess::Existing`] fails with
    /// [`PointError::WalletNotFound`].
    pub(crate) fn transact<T>(
        &self,
        user_id: UserId,
        access: BookAccess,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        let book = self
            .book(user_id, access)
            .ok_or(PointError::WalletNotFound)?;
        let mut guard = book.lock();

        let mut uow = UnitOfWork::new(user_id, &guard, &self.ids, now);
        let output = match f(&mut uow) {
            Ok(output) => output,
            Err(e) => {
                drop(uow);
                drop(guard);
                drop(book);
                if access == BookAccess::CreateIfMissing {
                    self.discard_if_empty(user_id);
                }
                return Err(e);
            }
        };
        let changes = uow.into_changes();

        changes.apply(&mut guard, &self.item_owners);
        guard.assert_invariants();
        Ok(output)
    }
}

/// Staged changes for one user, read through on top of the committed book.
pub(crate) struct UnitOfWork<'a> {
    user_id: UserId,
    book: &'a UserBook,
    ids: &'a IdSequence,
    now: DateTime<Utc>,
    wallet: Option<Wallet>,
    wallet_dirty: bool,
    items: BTreeMap<PointItemId, PointItem>,
    histories: Vec<PointHistory>,
}

impl<'a> UnitOfWork<'a> {
    fn new(user_id: UserId, book: &'a UserBook, ids: &'a IdSequence, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            book,
            ids,
            now,
            wallet: book.wallet.clone(),
            wallet_dirty: false,
            items: BTreeMap::new(),
            histories: Vec::new(),
        }
    }

    pub(crate) fn wallet(&mut self) -> Result<&mut Wallet> {
        self.wallet_dirty = true;
        self.wallet.as_mut().ok_or(PointError::WalletNotFound)
    }

    pub(crate) fn wallet_or_create(&mut self) -> &mut Wallet {
        self.wallet_dirty = true;
        let user_id = self.user_id;
        self.wallet.get_or_insert_with(|| Wallet::new(user_id))
    }

    pub(crate) fn item(&self, id: PointItemId) -> Option<&PointItem> {
        self.items.get(&id).or_else(|| self.book.items.get(&id))
    }

    /// Stages a copy of the lot on first write.
    pub(crate) fn item_mut(&mut self, id: PointItemId) -> Option<&mut PointItem> {
        if !self.items.contains_key(&id) {
            let committed = self.book.items.get(&id)?.clone();
            self.items.insert(id, committed);
        }
        self.items.get_mut(&id)
    }

    pub(crate) fn create_item(
        &mut self,
        amount: i64,
        expire_at: DateTime<Utc>,
        is_manual: bool,
    ) -> Result<PointItemId> {
        let id = self.ids.next_item_id();
        let item = PointItem::new(id, self.user_id, amount, expire_at, is_manual, self.now)?;
        self.items.insert(id, item);
        Ok(id)
    }

    /// Lots `use` may draw from, in consumption order: manual grants first,
    /// then soonest expiry, then oldest.
    pub(crate) fn usable_items(&self) -> Vec<PointItemId> {
        let mut usable: Vec<&PointItem> = self
            .book
            .items
            .keys()
            .chain(self.items.keys().filter(|id| !self.book.items.contains_key(*id)))
            .filter_map(|id| self.item(*id))
            .filter(|item| item.is_usable_at(self.now))
            .collect();
        usable.sort_by(|a, b| {
            b.is_manual()
                .cmp(&a.is_manual())
                .then(a.expire_at().cmp(&b.expire_at()))
                .then(a.id().cmp(&b.id()))
        });
        usable.into_iter().map(PointItem::id).collect()
    }

    fn all_histories(&self) -> impl Iterator<Item = &PointHistory> {
        self.book.histories.iter().chain(self.histories.iter())
    }

    pub(crate) fn has_history(&self, ref_id: &str, point_type: PointType) -> bool {
        self.all_histories()
            .any(|h| h.point_type() == point_type && h.ref_id() == ref_id)
    }

    pub(crate) fn find_history(&self, ref_id: &str, point_type: PointType) -> Option<PointHistory> {
        self.all_histories()
            .find(|h| h.point_type() == point_type && h.ref_id() == ref_id)
            .cloned()
    }

    /// Total already given back (USE_CANCEL + RESTORE) for `ref_id`.
    pub(crate) fn refunded_total(&self, ref_id: &str) -> i64 {
        self.all_histories()
            .filter(|h| h.point_type().is_refund() && h.ref_id() == ref_id)
            .map(PointHistory::amount)
            .sum()
    }

    pub(crate) fn record(&mut self, draft: HistoryDraft) {
        let history = draft.freeze(self.ids.next_history_id(), self.now);
        self.histories.push(history);
    }

    fn into_changes(self) -> Changes {
        Changes {
            wallet: if self.wallet_dirty { self.wallet } else { None },
            items: self.items,
            histories: self.histories,
        }
    }
}

struct Changes {
    wallet: Option<Wallet>,
    items: BTreeMap<PointItemId, PointItem>,
    histories: Vec<PointHistory>,
}

impl Changes {
    fn apply(self, book: &mut UserBook, owners: &DashMap<PointItemId, UserId>) {
        if let Some(wallet) = self.wallet {
            book.wallet = Some(wallet);
        }
        for (id, item) in self.items {
            if !book.items.contains_key(&id) {
                owners.insert(id, item.user_id());
            }
            book.items.insert(id, item);
        }
        book.histories.extend(self.histories);
    }
}
